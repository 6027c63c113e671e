use crate::error::{DocFlowError, Result};
use crate::types::Pt;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use ttf_parser::GlyphId;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

/// Font programs known to the engine, keyed by family and style.
///
/// The registry is filled before the cache is built and is read-only
/// afterwards; only the width cache mutates, behind its own lock.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    styles: HashMap<String, usize>,
    families: HashMap<String, usize>,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) family: String,
    pub(crate) style: String,
    program: FontProgram,
    pub(crate) metrics: FaceMetrics,
}

#[derive(Debug)]
enum FontProgram {
    Parsed(Vec<u8>),
    /// Fixed-advance stand-in used when no font file is available.
    Synthetic,
}

/// Face metrics in 1/1000 em.
#[derive(Debug)]
pub(crate) struct FaceMetrics {
    first_char: u8,
    last_char: u8,
    widths: Vec<u16>,
    glyph_ids: Vec<u16>,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) line_gap: i16,
    missing_width: u16,
    kerning: HashMap<(u16, u16), i16>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            styles: HashMap::new(),
            families: HashMap::new(),
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Registers every `.ttf`/`.otf` file in `path`; returns how many loaded.
    pub fn register_dir(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = 0;
        for entry in fs::read_dir(path.as_ref())?.flatten() {
            let path = entry.path();
            if !path.is_file() || !is_font_file(&path) {
                continue;
            }
            match self.register_file(&path) {
                Ok(_) => loaded += 1,
                Err(err) => log::warn!("skipping font {}: {err}", path.display()),
            }
        }
        Ok(loaded)
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !is_font_file(path) {
            return Err(DocFlowError::Font(format!(
                "{} is not a .ttf or .otf file",
                path.display()
            )));
        }
        let data = fs::read(path)?;
        self.register_program(data, path)
    }

    pub fn register_bytes(&mut self, data: Vec<u8>, source_name: Option<&str>) -> Result<usize> {
        let source = source_name.unwrap_or("EmbeddedFont");
        self.register_program(data, Path::new(source))
    }

    /// Registers a face whose every glyph advances by `advance_ratio` em.
    pub fn register_synthetic(&mut self, family: &str, style: &str, advance_ratio: f32) -> usize {
        let advance = (advance_ratio.max(0.0) * 1000.0).round() as i32;
        let advance = advance.clamp(0, u16::MAX as i32) as u16;
        let metrics = FaceMetrics {
            first_char: 32,
            last_char: 255,
            widths: vec![advance; 224],
            glyph_ids: vec![0; 224],
            ascent: 800,
            descent: -200,
            line_gap: 200,
            missing_width: advance,
            kerning: HashMap::new(),
        };
        self.insert(RegisteredFont {
            family: family.to_string(),
            style: style.to_string(),
            program: FontProgram::Synthetic,
            metrics,
        })
    }

    fn register_program(&mut self, data: Vec<u8>, source: &Path) -> Result<usize> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
            DocFlowError::Font(format!("invalid font data for {}: {err}", source.display()))
        })?;
        let (family, style) = font_names(&face, source);
        let metrics = FaceMetrics::from_face(&face);
        drop(face);
        Ok(self.insert(RegisteredFont {
            family,
            style,
            program: FontProgram::Parsed(data),
            metrics,
        }))
    }

    fn insert(&mut self, font: RegisteredFont) -> usize {
        let index = self.fonts.len();
        let family = normalize_name(&font.family);
        let key = style_key(&font.family, &font.style);
        log::debug!("registered font {} {} as {index}", font.family, font.style);
        self.styles.entry(key).or_insert(index);
        self.families.entry(family).or_insert(index);
        self.fonts.push(font);
        index
    }

    /// Exact family and style first, then the first style registered for the
    /// family.
    pub fn lookup(&self, face: &str, style: &str) -> Option<usize> {
        self.styles
            .get(&style_key(face, style))
            .or_else(|| self.families.get(&normalize_name(face)))
            .copied()
    }

    pub(crate) fn font(&self, index: usize) -> Option<&RegisteredFont> {
        self.fonts.get(index)
    }

    pub fn measure_text_width(&self, index: usize, font_size: Pt, text: &str) -> Pt {
        let Some(font) = self.fonts.get(index) else {
            let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
            return char_width * (text.chars().count() as i32);
        };
        if text.is_empty() {
            return Pt::ZERO;
        }
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let value = match &font.program {
            FontProgram::Parsed(data) if !font.metrics.is_within_basic_latin(text) => {
                measure_text_width_full(data, font_size, text)
                    .unwrap_or_else(|| font.metrics.measure_text_width(font_size, text))
            }
            _ => font.metrics.measure_text_width(font_size, text),
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }
}

impl FaceMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let glyph_ids = build_glyph_ids(face, first_char, last_char);
        let widths = build_widths(face, scale, first_char, last_char);
        let missing_width = widths
            .get((b' ' - first_char) as usize)
            .copied()
            .unwrap_or(0);
        let kerning = build_kerning_pairs(face, &glyph_ids, scale);

        Self {
            first_char,
            last_char,
            widths,
            glyph_ids,
            ascent: scale_i16(face.ascender(), scale),
            descent: scale_i16(face.descender(), scale),
            line_gap: scale_i16(face.line_gap(), scale),
            missing_width,
            kerning,
        }
    }

    fn glyph_id_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if code < self.first_char as u32 || code > self.last_char as u32 {
            return 0;
        }
        let idx = (code - self.first_char as u32) as usize;
        self.glyph_ids.get(idx).copied().unwrap_or(0)
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if code < self.first_char as u32 || code > self.last_char as u32 {
            return self.missing_width;
        }
        let idx = (code - self.first_char as u32) as usize;
        self.widths.get(idx).copied().unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_units: i32 = 0;
        let mut prev: Option<u16> = None;
        for ch in text.chars() {
            let gid = self.glyph_id_for_char(ch);
            total_units = total_units.saturating_add(self.advance_for_char(ch) as i32);
            if let Some(prev_gid) = prev {
                if let Some(k) = self.kerning.get(&(prev_gid, gid)) {
                    total_units = total_units.saturating_add(*k as i32);
                }
            }
            prev = Some(gid);
        }
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_basic_latin(&self, text: &str) -> bool {
        text.chars().all(|ch| {
            let code = ch as u32;
            code >= self.first_char as u32 && code <= self.last_char as u32
        })
    }
}

fn build_glyph_ids(face: &ttf_parser::Face<'_>, first: u8, last: u8) -> Vec<u16> {
    (first..=last)
        .map(|code| {
            char::from_u32(code as u32)
                .and_then(|ch| face.glyph_index(ch))
                .map(|g| g.0)
                .unwrap_or(0)
        })
        .collect()
}

fn build_widths(face: &ttf_parser::Face<'_>, scale: f32, first: u8, last: u8) -> Vec<u16> {
    (first..=last)
        .map(|code| {
            let width = char::from_u32(code as u32)
                .and_then(|ch| face.glyph_index(ch))
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(0);
            let scaled = (width as f32 * scale).round() as i32;
            scaled.clamp(0, u16::MAX as i32) as u16
        })
        .collect()
}

fn build_kerning_pairs(
    face: &ttf_parser::Face<'_>,
    glyph_ids: &[u16],
    scale: f32,
) -> HashMap<(u16, u16), i16> {
    let mut out = HashMap::new();
    let Some(kern) = face.tables().kern else {
        return out;
    };
    let subtables: Vec<_> = kern
        .subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.has_cross_stream && !s.has_state_machine)
        .collect();
    if subtables.is_empty() {
        return out;
    }
    for &left in glyph_ids.iter().filter(|gid| **gid != 0) {
        for &right in glyph_ids.iter().filter(|gid| **gid != 0) {
            let total: i32 = subtables
                .iter()
                .filter_map(|sub| sub.glyphs_kerning(GlyphId(left), GlyphId(right)))
                .map(i32::from)
                .sum();
            if total == 0 {
                continue;
            }
            let clamped = total.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            let scaled = scale_i16(clamped, scale);
            if scaled != 0 {
                out.insert((left, right), scaled);
            }
        }
    }
    out
}

fn measure_text_width_full(data: &[u8], font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total_units: i32 = positions
        .iter()
        .map(|pos| (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32)
        .fold(0i32, |acc, adv| acc.saturating_add(adv));
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Family and style names, falling back to the file stem and "Regular".
fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, String) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut style = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY if family.is_none() => {
                family = Some(name);
            }
            name_id::TYPOGRAPHIC_SUBFAMILY | name_id::SUBFAMILY if style.is_none() => {
                style = Some(name);
            }
            _ => {}
        }
    }
    let family = family
        .or_else(|| {
            path.file_stem()
                .and_then(|v| v.to_str())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    (family, style.unwrap_or_else(|| "Regular".to_string()))
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|v| v.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"))
        .unwrap_or(false)
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

fn style_key(face: &str, style: &str) -> String {
    format!("{}|{}", normalize_name(face), normalize_name(style))
}

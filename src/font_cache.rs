use crate::error::{DocFlowError, Result};
use crate::font::{FontRegistry, normalize_name};
use crate::style::HAlign;
use crate::types::Pt;
use std::collections::HashMap;
use std::sync::Mutex;

/// Vertical metrics of a resolved font at its pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub ascent: Pt,
    /// Distance below the baseline, positive.
    pub descent: Pt,
    /// Ascent plus descent.
    pub height: Pt,
    pub gutter: Pt,
    /// Height plus gutter: the advance from one line to the next.
    pub line_spacing: Pt,
    pub space_width: Pt,
}

#[derive(Debug, Clone)]
pub struct FontEntry {
    /// Index of the font program in the registry.
    pub handle: usize,
    pub face: String,
    pub style: String,
    pub size: i32,
    pub metrics: FontMetrics,
    pub align: HAlign,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FontKey {
    face: String,
    style: String,
    size: i32,
}

impl FontKey {
    fn new(face: &str, style: &str, size: i32) -> Self {
        Self {
            face: normalize_name(face),
            style: normalize_name(style),
            size,
        }
    }
}

/// Append-only cache of resolved fonts shared by every document.
///
/// Entries are never removed or moved, so an index handed out once stays
/// valid for the life of the cache. `resolve` serializes the check-and-append
/// under one lock; `get` reads without locking.
#[derive(Debug)]
pub struct FontCache {
    registry: FontRegistry,
    entries: boxcar::Vec<FontEntry>,
    index: Mutex<HashMap<FontKey, usize>>,
    fallback: FontEntry,
}

impl FontCache {
    /// Builds the cache and seeds entry 0 with the default face, registering a
    /// synthetic stand-in when no program for it is known.
    pub fn new(mut registry: FontRegistry, face: &str, style: &str, size: i32) -> Self {
        let size = size.max(1);
        let handle = match registry.lookup(face, style) {
            Some(handle) => handle,
            None => {
                log::debug!("default font {face} {style} not registered; using a synthetic face");
                registry.register_synthetic(face, style, 0.6)
            }
        };
        let fallback = build_entry(&registry, handle, face, style, size);
        let entries = boxcar::Vec::new();
        entries.push(fallback.clone());
        let mut index = HashMap::new();
        index.insert(FontKey::new(face, style, size), 0);
        Self {
            registry,
            entries,
            index: Mutex::new(index),
            fallback,
        }
    }

    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    /// Returns the index for `(face, style, size)`, appending a new entry on
    /// the first request.
    pub fn resolve(&self, face: &str, style: &str, size: i32) -> Result<usize> {
        let size = size.max(1);
        let key = FontKey::new(face, style, size);
        let mut index = self
            .index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(found) = index.get(&key) {
            return Ok(*found);
        }
        let Some(handle) = self.registry.lookup(face, style) else {
            return Err(DocFlowError::FontNotFound {
                face: face.to_string(),
                style: style.to_string(),
                size,
            });
        };
        let entry = build_entry(&self.registry, handle, face, style, size);
        let position = self.entries.push(entry);
        index.insert(key, position);
        log::trace!("font cache: {face} {style} {size}px -> {position}");
        Ok(position)
    }

    /// Like `resolve`, but a miss logs an error and yields entry 0.
    pub fn resolve_or_fallback(&self, face: &str, style: &str, size: i32) -> usize {
        match self.resolve(face, style, size) {
            Ok(index) => index,
            Err(err) => {
                log::error!("{err}; falling back to {}", self.fallback.face);
                0
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&FontEntry> {
        self.entries.get(index)
    }

    /// The entry at `index`, or entry 0 when the index is out of range.
    pub fn entry(&self, index: usize) -> &FontEntry {
        self.entries.get(index).unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.count() == 0
    }

    pub fn measure(&self, index: usize, text: &str) -> Pt {
        let entry = self.entry(index);
        self.registry
            .measure_text_width(entry.handle, Pt::from_i32(entry.size), text)
    }
}

fn build_entry(registry: &FontRegistry, handle: usize, face: &str, style: &str, size: i32) -> FontEntry {
    let font_size = Pt::from_i32(size);
    let (ascent, descent, gap) = registry
        .font(handle)
        .map(|font| {
            (
                font.metrics.ascent as i32,
                -(font.metrics.descent as i32),
                font.metrics.line_gap as i32,
            )
        })
        .unwrap_or((800, 200, 200));
    let ascent = font_size.mul_ratio(ascent.max(0), 1000);
    let descent = font_size.mul_ratio(descent.max(0), 1000);
    let gutter = font_size.mul_ratio(gap.max(0), 1000);
    let height = ascent + descent;
    FontEntry {
        handle,
        face: face.to_string(),
        style: style.to_string(),
        size,
        metrics: FontMetrics {
            ascent,
            descent,
            height,
            gutter,
            line_spacing: height + gutter,
            space_width: registry.measure_text_width(handle, font_size, " "),
        },
        align: HAlign::Left,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache() -> FontCache {
        let mut registry = FontRegistry::new();
        registry.register_synthetic("Serif", "Regular", 0.5);
        FontCache::new(registry, "Noto Sans", "Regular", 14)
    }

    #[test]
    fn default_face_seeds_entry_zero() {
        let cache = cache();
        assert_eq!(cache.len(), 1);
        let entry = cache.entry(0);
        assert_eq!(entry.face, "Noto Sans");
        assert_eq!(entry.size, 14);
        assert_eq!(entry.metrics.ascent, Pt::from_f32(11.2));
        assert_eq!(entry.metrics.line_spacing, Pt::from_f32(16.8));
        assert_eq!(entry.metrics.space_width, Pt::from_f32(8.4));
    }

    #[test]
    fn repeated_resolution_hits_the_cache() {
        let cache = cache();
        let before = cache.len();
        let first = cache.resolve("Serif", "Regular", 12).expect("registered face");
        assert_eq!(cache.len(), before + 1);
        let second = cache.resolve("serif", "regular", 12).expect("registered face");
        assert_eq!(first, second);
        assert_eq!(cache.len(), before + 1);
        let other_size = cache.resolve("Serif", "Regular", 13).expect("registered face");
        assert_ne!(first, other_size);
    }

    #[test]
    fn unknown_face_falls_back_to_entry_zero() {
        let cache = cache();
        assert!(matches!(
            cache.resolve("Nope", "Regular", 12),
            Err(DocFlowError::FontNotFound { .. })
        ));
        assert_eq!(cache.resolve_or_fallback("Nope", "Regular", 12), 0);
        assert_eq!(cache.entry(999).face, "Noto Sans");
    }

    #[test]
    fn concurrent_resolution_appends_once() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.resolve("Serif", "Regular", 20))
            })
            .collect();
        let indices: Vec<usize> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread").expect("resolved"))
            .collect();
        assert!(indices.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn measures_with_entry_size() {
        let cache = cache();
        let index = cache.resolve("Serif", "Regular", 10).expect("registered face");
        assert_eq!(cache.measure(index, "abcd"), Pt::from_i32(20));
    }
}

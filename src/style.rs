use crate::diagnostics::{Diagnostics, LayoutWarning};
use crate::font_cache::{FontCache, FontEntry};
use crate::length::{Length, LengthContext};
use crate::types::Pt;

pub const DEFAULT_FONT_FACE: &str = "Noto Sans";
pub const DEFAULT_FONT_STYLE: &str = "Regular";
pub const DEFAULT_FONT_SIZE: i32 = 14;
pub const DEFAULT_FONT_FILL: &str = "rgb(0,0,0)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VAlign {
    Top,
    Center,
    /// Baseline alignment against the bottom of the line.
    #[default]
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontOptions {
    pub underline: bool,
    pub overline: bool,
    pub strikethrough: bool,
}

/// Requested font attributes plus the cache index they resolved to.
///
/// The index is only trusted between the layout pass that set it and the
/// next copy of the style: cloning or `apply` always clears it.
#[derive(Debug, PartialEq)]
pub struct FontStyle {
    font_index: i32,
    pub face: String,
    pub style: String,
    /// Requested size. `Em` and `Percent` are relative to the enclosing font.
    pub size: Length,
    /// Size in whole pixels chosen by the last resolution.
    pub pixel_size: i32,
    pub fill: String,
    pub options: FontOptions,
    pub align: HAlign,
    pub valign: VAlign,
}

impl Clone for FontStyle {
    fn clone(&self) -> Self {
        Self {
            font_index: -1,
            face: self.face.clone(),
            style: self.style.clone(),
            size: self.size,
            pixel_size: self.pixel_size,
            fill: self.fill.clone(),
            options: self.options,
            align: self.align,
            valign: self.valign,
        }
    }
}

impl Default for FontStyle {
    fn default() -> Self {
        Self::new(DEFAULT_FONT_FACE, DEFAULT_FONT_STYLE, DEFAULT_FONT_SIZE)
    }
}

impl FontStyle {
    pub fn new(face: impl Into<String>, style: impl Into<String>, size: i32) -> Self {
        Self {
            font_index: -1,
            face: face.into(),
            style: style.into(),
            size: Length::Px(Pt::from_i32(size)),
            pixel_size: size,
            fill: DEFAULT_FONT_FILL.to_string(),
            options: FontOptions::default(),
            align: HAlign::Left,
            valign: VAlign::Bottom,
        }
    }

    pub fn with_align(mut self, align: HAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_valign(mut self, valign: VAlign) -> Self {
        self.valign = valign;
        self
    }

    pub fn with_size(mut self, size: Length) -> Self {
        self.size = size;
        self.font_index = -1;
        self
    }

    pub fn font_index(&self) -> Option<usize> {
        usize::try_from(self.font_index).ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.font_index >= 0
    }

    pub fn invalidate(&mut self) {
        self.font_index = -1;
    }

    /// Copies every attribute of `other`; the resolved index is cleared.
    pub fn apply(&mut self, other: &FontStyle) {
        *self = other.clone();
    }

    /// Whole-pixel size this style asks for inside a font of `parent_size`.
    pub(crate) fn pixel_size_for(&self, parent_size: Pt) -> i32 {
        let ctx = LengthContext::new(parent_size, parent_size, parent_size, parent_size);
        self.size.resolve_or(&ctx, parent_size).round_i32().max(1)
    }

    /// Resolves the style against the cache for the current enclosing size,
    /// reusing the cached index when it still matches.
    pub fn layout_font(
        &mut self,
        cache: &FontCache,
        parent_size: Pt,
        diagnostics: &mut Diagnostics,
    ) -> usize {
        let pixel_size = self.pixel_size_for(parent_size);
        if let Some(index) = self.font_index() {
            if cache.get(index).is_some_and(|entry| entry.size == pixel_size) {
                return index;
            }
        }
        let index = match cache.resolve(&self.face, &self.style, pixel_size) {
            Ok(index) => index,
            Err(_) => {
                diagnostics.warn(LayoutWarning::FontFallback {
                    face: self.face.clone(),
                    style: self.style.clone(),
                    size: pixel_size,
                });
                0
            }
        };
        self.pixel_size = pixel_size;
        self.font_index = index as i32;
        index
    }

    /// The resolved cache entry. Reading an unresolved style is an ordering
    /// bug in the caller; it is logged and entry 0 is returned.
    pub fn get_font<'c>(&self, cache: &'c FontCache) -> &'c FontEntry {
        match self.font_index() {
            Some(index) => cache.entry(index),
            None => {
                log::error!(
                    "font {} {} read before layout resolved it",
                    self.face,
                    self.style
                );
                cache.entry(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;

    fn cache() -> FontCache {
        let mut registry = FontRegistry::new();
        registry.register_synthetic("Serif", "Regular", 0.5);
        FontCache::new(registry, DEFAULT_FONT_FACE, DEFAULT_FONT_STYLE, DEFAULT_FONT_SIZE)
    }

    #[test]
    fn copies_reset_the_resolved_index() {
        let cache = cache();
        let mut diagnostics = Diagnostics::new();
        let mut style = FontStyle::new("Serif", "Regular", 12);
        let index = style.layout_font(&cache, Pt::from_i32(14), &mut diagnostics);
        assert_eq!(style.font_index(), Some(index));

        let copy = style.clone();
        assert!(!copy.is_resolved());

        let mut target = FontStyle::default();
        target.layout_font(&cache, Pt::from_i32(14), &mut diagnostics);
        target.apply(&style);
        assert!(!target.is_resolved());
        assert_eq!(target.face, "Serif");
    }

    #[test]
    fn relative_sizes_follow_the_parent() {
        let cache = cache();
        let mut diagnostics = Diagnostics::new();
        let mut style = FontStyle::new("Serif", "Regular", 12).with_size(Length::Em(1.5));
        let index = style.layout_font(&cache, Pt::from_i32(20), &mut diagnostics);
        assert_eq!(cache.entry(index).size, 30);
        assert_eq!(style.pixel_size, 30);

        let again = style.layout_font(&cache, Pt::from_i32(10), &mut diagnostics);
        assert_ne!(index, again);
        assert_eq!(cache.entry(again).size, 15);
    }

    #[test]
    fn unknown_face_records_fallback() {
        let cache = cache();
        let mut diagnostics = Diagnostics::new();
        let mut style = FontStyle::new("Missing", "Bold", 12);
        assert_eq!(style.layout_font(&cache, Pt::from_i32(14), &mut diagnostics), 0);
        assert_eq!(diagnostics.warnings().len(), 1);
        assert!(matches!(
            diagnostics.warnings()[0],
            LayoutWarning::FontFallback { .. }
        ));
    }

    #[test]
    fn unresolved_style_reads_entry_zero() {
        let cache = cache();
        let style = FontStyle::new("Serif", "Regular", 12);
        assert_eq!(style.get_font(&cache).face, DEFAULT_FONT_FACE);
    }
}

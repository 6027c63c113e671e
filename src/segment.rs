use crate::diagnostics::{Diagnostics, LayoutWarning};
use crate::entity::{EntityKind, Uid};
use crate::font_cache::FontMetrics;
use crate::length::Edges;
use crate::position::Position;
use crate::style::{HAlign, VAlign};
use crate::types::{Pt, Rect};

/// Which stream a segment's positions refer to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StreamOwner {
    #[default]
    Root,
    /// The sub-stream owned by the cell or button with this uid.
    Entity(Uid),
}

/// A laid-out run of content on one line, `[start, stop)` in position space.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: Position,
    pub stop: Position,
    /// `stop` with trailing whitespace excluded.
    pub trim_stop: Position,
    pub area: Rect,
    pub descent: Pt,
    /// Width available to the line, used by centered and right alignment.
    pub align_width: Pt,
    pub align: HAlign,
    pub owner: StreamOwner,
    pub edit: bool,
    /// Control-only segments may be merged with their neighbours.
    pub allow_merge: bool,
}

impl Segment {
    /// Horizontal draw offset for content starting at `advance`.
    pub fn x(&self, advance: Pt, align: HAlign) -> Pt {
        match align {
            HAlign::Center => advance + (self.align_width - self.area.width) / 2,
            HAlign::Right => advance + (self.align_width - self.area.width),
            HAlign::Left => advance,
        }
    }

    /// Baseline for a run in `font` under vertical alignment `valign`.
    pub fn y(&self, valign: VAlign, font: &FontMetrics) -> Pt {
        match valign {
            VAlign::Top => self.area.y + font.ascent,
            VAlign::Center => {
                let avail = self.area.height - self.descent;
                self.area.y + avail - (avail - font.height) / 2
            }
            VAlign::Bottom => self.area.y + self.area.height - self.descent,
        }
    }

    pub fn contains_point(&self, x: Pt, y: Pt) -> bool {
        self.area.contains(x, y)
    }
}

/// Rectangle the text flow must wrap around.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub left: Pt,
    pub top: Pt,
    pub right: Pt,
    pub bottom: Pt,
    /// Stream index of the entity that produced the clip.
    pub index: usize,
    /// Transparent clips are recorded but text does not avoid them.
    pub transparent: bool,
    pub name: String,
}

pub const DEFAULT_CLIP_LIMIT: i32 = 20_000;

impl Clip {
    /// Builds a clip, collapsing it to zero area when either side exceeds
    /// `limit`.
    pub fn new(
        area: Rect,
        index: usize,
        transparent: bool,
        name: impl Into<String>,
        limit: Pt,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let name = name.into();
        let mut clip = Self {
            left: area.x,
            top: area.y,
            right: area.right(),
            bottom: area.bottom(),
            index,
            transparent,
            name,
        };
        if area.width > limit || area.height > limit {
            diagnostics.warn(LayoutWarning::OversizedClip {
                name: clip.name.clone(),
                width: area.width,
                height: area.height,
            });
            clip.right = clip.left;
            clip.bottom = clip.top;
        }
        clip
    }

    pub fn width(&self) -> Pt {
        self.right - self.left
    }

    pub fn height(&self) -> Pt {
        self.bottom - self.top
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.width(), self.height())
    }

    /// Whether text placed over `[x, x + width)` on the band `[y, y + height)`
    /// must avoid this clip.
    pub(crate) fn blocks(&self, x: Pt, width: Pt, y: Pt, height: Pt) -> bool {
        !self.transparent
            && self.right > self.left
            && y < self.bottom
            && y + height.max(Pt::from_milli_i64(1)) > self.top
            && x < self.right
            && x + width.max(Pt::from_milli_i64(1)) > self.left
    }
}

/// Target of a tab stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabRef {
    /// An embedded control or other vector object.
    Vector(Uid),
    Link(Uid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tab {
    pub reference: TabRef,
    pub active: bool,
}

/// Hit-test rectangle for one line's worth of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkArea {
    pub link: Uid,
    pub area: Rect,
    pub start: Position,
    pub stop: Position,
    pub owner: StreamOwner,
}

/// Final geometry handed to an embedded control.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetPlacement {
    pub uid: Uid,
    pub kind: EntityKind,
    /// The control itself, inside padding and beside the label.
    pub rect: Rect,
    pub padding: Edges,
    pub label: Option<Rect>,
    pub owner: StreamOwner,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(width: i32, align_width: i32) -> Segment {
        Segment {
            start: Position::start(),
            stop: Position::new(1, 0),
            trim_stop: Position::new(1, 0),
            area: Rect::new(
                Pt::ZERO,
                Pt::from_i32(10),
                Pt::from_i32(width),
                Pt::from_i32(20),
            ),
            descent: Pt::from_i32(4),
            align_width: Pt::from_i32(align_width),
            align: HAlign::Left,
            owner: StreamOwner::Root,
            edit: false,
            allow_merge: false,
        }
    }

    fn metrics() -> FontMetrics {
        FontMetrics {
            ascent: Pt::from_i32(8),
            descent: Pt::from_i32(2),
            height: Pt::from_i32(10),
            gutter: Pt::from_i32(2),
            line_spacing: Pt::from_i32(12),
            space_width: Pt::from_i32(3),
        }
    }

    #[test]
    fn horizontal_offset_follows_alignment() {
        let seg = segment(100, 200);
        let advance = Pt::from_i32(7);
        assert_eq!(seg.x(advance, HAlign::Center), Pt::from_i32(57));
        assert_eq!(seg.x(advance, HAlign::Right), Pt::from_i32(107));
        assert_eq!(seg.x(advance, HAlign::Left), advance);
    }

    #[test]
    fn vertical_offset_follows_alignment() {
        let seg = segment(100, 200);
        let font = metrics();
        assert_eq!(seg.y(VAlign::Top, &font), Pt::from_i32(18));
        assert_eq!(seg.y(VAlign::Bottom, &font), Pt::from_i32(26));
        // avail = 16, baseline = 10 + 16 - (16 - 10) / 2
        assert_eq!(seg.y(VAlign::Center, &font), Pt::from_i32(23));
    }

    #[test]
    fn oversized_clip_collapses_with_warning() {
        let mut diagnostics = Diagnostics::new();
        let clip = Clip::new(
            Rect::new(Pt::from_i32(10), Pt::ZERO, Pt::from_i32(25_000), Pt::from_i32(10)),
            0,
            false,
            "runaway",
            Pt::from_i32(DEFAULT_CLIP_LIMIT),
            &mut diagnostics,
        );
        assert_eq!(clip.right, clip.left);
        assert_eq!(clip.bottom, clip.top);
        assert_eq!(diagnostics.warnings().len(), 1);
        assert!(matches!(
            diagnostics.warnings()[0],
            LayoutWarning::OversizedClip { .. }
        ));
    }

    #[test]
    fn transparent_and_empty_clips_never_block() {
        let mut diagnostics = Diagnostics::new();
        let area = Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(50), Pt::from_i32(50));
        let solid = Clip::new(area, 0, false, "solid", Pt::from_i32(100), &mut diagnostics);
        let glass = Clip::new(area, 0, true, "glass", Pt::from_i32(100), &mut diagnostics);
        let one = Pt::from_i32(1);
        assert!(solid.blocks(Pt::from_i32(10), one, Pt::from_i32(10), one));
        assert!(!solid.blocks(Pt::from_i32(50), one, Pt::from_i32(10), one));
        assert!(!glass.blocks(Pt::from_i32(10), one, Pt::from_i32(10), one));
        assert!(diagnostics.warnings().is_empty());
    }
}

use crate::debug::DebugLogger;
use crate::diagnostics::{Diagnostics, LayoutWarning};
use crate::entity::{
    Advance, EntityData, EntityKind, IndexEnd, IndexStart, Link, List, ListKind, Paragraph, TextRun, Uid,
};
use crate::font_cache::{FontCache, FontMetrics};
use crate::length::{Length, LengthContext};
use crate::position::Position;
use crate::segment::{Clip, DEFAULT_CLIP_LIMIT, LinkArea, Segment, StreamOwner, Tab, TabRef, WidgetPlacement};
use crate::stream::Stream;
use crate::style::{FontStyle, HAlign, VAlign};
use crate::types::{Margins, Pt, Rect, Size};
use crate::widget::Button;
use serde_json::json;
use std::ops::Range;

pub const MIN_PAGE_WIDTH: i32 = 20;
pub const MAX_PAGE_WIDTH: i32 = 30_000;
pub const DEFAULT_WIDTH_LIMIT: i32 = 4_000;
pub const DEFAULT_MAX_TABLE_DEPTH: usize = 40;
pub const DEFAULT_WRAP_LOOP_LIMIT: usize = 1_000;
/// Space between a list marker and the item text.
const MARKER_GAP: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub margins: Margins,
    /// Fixed page width; `None` follows the viewport.
    pub page_width: Option<Pt>,
    pub max_table_depth: usize,
    /// Upper bound for page growth and content measurement.
    pub width_limit: Pt,
    pub clip_limit: Pt,
    pub wrap_loop_limit: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            margins: Margins::default(),
            page_width: None,
            max_table_depth: DEFAULT_MAX_TABLE_DEPTH,
            width_limit: Pt::from_i32(DEFAULT_WIDTH_LIMIT),
            clip_limit: Pt::from_i32(DEFAULT_CLIP_LIMIT),
            wrap_loop_limit: DEFAULT_WRAP_LOOP_LIMIT,
        }
    }
}

/// Everything one layout pass produces for a document.
#[derive(Debug, Clone, Default)]
pub struct LayoutOutput {
    pub segments: Vec<Segment>,
    pub clips: Vec<Clip>,
    pub tabs: Vec<Tab>,
    pub links: Vec<LinkArea>,
    pub widgets: Vec<WidgetPlacement>,
    pub warnings: Vec<LayoutWarning>,
    pub page_width: Pt,
    pub page_height: Pt,
}

impl LayoutOutput {
    pub fn segments_of(&self, owner: StreamOwner) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |segment| segment.owner == owner)
    }

    pub fn page_size(&self) -> Size {
        Size::new(self.page_width, self.page_height)
    }
}

/// Lays out `stream` for a viewport of `view_width` and returns the geometry.
///
/// A pass that widens a list marker indent runs once more so that earlier
/// items pick up the wider indent.
pub fn layout_stream(
    stream: &mut Stream,
    fonts: &FontCache,
    config: &LayoutConfig,
    view_width: Pt,
    debug: Option<DebugLogger>,
) -> LayoutOutput {
    let requested = config
        .page_width
        .unwrap_or(view_width)
        .max(Pt::from_i32(MIN_PAGE_WIDTH))
        .min(config.width_limit);
    let mut engine = LayoutEngine::new(fonts, config, Diagnostics::with_debug(debug.clone()));
    let mut extent = engine.layout_root(stream, requested);
    if engine.repass {
        log::debug!("list marker outgrew its indent; laying out again");
        engine = LayoutEngine::new(fonts, config, Diagnostics::repeating(debug.clone()));
        extent = engine.layout_root(stream, requested);
    }
    let output = engine.finish(extent, requested);
    if let Some(debug) = &debug {
        debug.log_event(
            "layout.pass",
            json!({
                "segments": output.segments.len(),
                "clips": output.clips.len(),
                "warnings": output.warnings.len(),
                "page_width": output.page_width.to_f32(),
                "page_height": output.page_height.to_f32(),
            }),
        );
    }
    output
}

/// The font, size and alignment in effect at a point of the stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StyleFrame {
    pub(crate) font: usize,
    pub(crate) size: Pt,
    pub(crate) align: HAlign,
    pub(crate) valign: VAlign,
}

impl StyleFrame {
    pub(crate) fn base(fonts: &FontCache) -> Self {
        let entry = fonts.entry(0);
        Self {
            font: 0,
            size: Pt::from_i32(entry.size),
            align: entry.align,
            valign: VAlign::Bottom,
        }
    }
}

/// Bounds of everything a section placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SectionExtent {
    pub(crate) right: Pt,
    pub(crate) bottom: Pt,
    pub(crate) width: Pt,
    pub(crate) height: Pt,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Line {
    pub(crate) start: Position,
    pub(crate) x: Pt,
    /// Right edge of the last content placed on the line.
    pub(crate) right: Pt,
    pub(crate) ascent: Pt,
    pub(crate) descent: Pt,
    pub(crate) height: Pt,
    pub(crate) content: bool,
}

impl Line {
    fn new(start: Position, x: Pt) -> Self {
        Self {
            start,
            x,
            right: x,
            ascent: Pt::ZERO,
            descent: Pt::ZERO,
            height: Pt::ZERO,
            content: false,
        }
    }

    fn full_height(&self) -> Pt {
        self.height.max(self.ascent + self.descent)
    }
}

#[derive(Debug, Clone, Copy)]
struct ParagraphFrame {
    index: usize,
    prev_indent: Pt,
    pushed_font: bool,
    list_item: bool,
    leading: f32,
    trim: bool,
    y: Pt,
}

#[derive(Debug, Clone, Copy)]
struct ListFrame {
    uid: Uid,
    prev_indent: Pt,
    item_indent: Pt,
    v_spacing: f32,
    kind: ListKind,
    start: i32,
    item_num: i32,
    widened: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenLink {
    uid: Uid,
    x: Pt,
    start: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LineEnd {
    Wrap,
    Newline,
    /// Paragraph boundary; the gap is this many line heights.
    Paragraph(f32),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct InlineExtent {
    pub(crate) ascent: Pt,
    pub(crate) descent: Pt,
    pub(crate) height: Pt,
}

impl InlineExtent {
    fn text(metrics: &FontMetrics) -> Self {
        Self {
            ascent: metrics.ascent,
            descent: metrics.descent,
            height: metrics.line_spacing,
        }
    }
}

/// Cursor and open-style state for one stream being laid out into an area.
pub(crate) struct Section {
    pub(crate) owner: StreamOwner,
    pub(crate) edit: bool,
    left: Pt,
    pub(crate) edge: Pt,
    top: Pt,
    indent: Pt,
    pub(crate) cursor_x: Pt,
    pub(crate) cursor_y: Pt,
    pub(crate) line: Line,
    pub(crate) last_bottom: Pt,
    pub(crate) has_content: bool,
    pub(crate) max_right: Pt,
    pub(crate) max_bottom: Pt,
    pub(crate) start_clips: usize,
    first_segment: usize,
    base: StyleFrame,
    styles: Vec<StyleFrame>,
    paragraphs: Vec<ParagraphFrame>,
    lists: Vec<ListFrame>,
    link: Option<OpenLink>,
    indexes: Vec<(i32, bool)>,
}

impl Section {
    fn new(
        owner: StreamOwner,
        area: Rect,
        base: StyleFrame,
        edit: bool,
        start_clips: usize,
        first_segment: usize,
    ) -> Self {
        Self {
            owner,
            edit,
            left: area.x,
            edge: area.right(),
            top: area.y,
            indent: Pt::ZERO,
            cursor_x: area.x,
            cursor_y: area.y,
            line: Line::new(Position::start(), area.x),
            last_bottom: area.y,
            has_content: false,
            max_right: area.x,
            max_bottom: area.y,
            start_clips,
            first_segment,
            base,
            styles: Vec::new(),
            paragraphs: Vec::new(),
            lists: Vec::new(),
            link: None,
            indexes: Vec::new(),
        }
    }

    pub(crate) fn frame(&self) -> StyleFrame {
        self.styles.last().copied().unwrap_or(self.base)
    }

    pub(crate) fn line_left(&self) -> Pt {
        self.left + self.indent
    }

    pub(crate) fn restart_line(&mut self, start: Position) {
        self.cursor_x = self.line_left();
        self.line = Line::new(start, self.cursor_x);
        if let Some(link) = self.link.as_mut() {
            link.x = self.cursor_x;
            link.start = start;
        }
    }
}

pub(crate) struct LayoutEngine<'a> {
    pub(crate) fonts: &'a FontCache,
    pub(crate) config: &'a LayoutConfig,
    pub(crate) out: LayoutOutput,
    pub(crate) diagnostics: Diagnostics,
    /// Table nesting level of the section being laid out.
    pub(crate) depth: usize,
    repass: bool,
}

impl<'a> LayoutEngine<'a> {
    pub(crate) fn new(fonts: &'a FontCache, config: &'a LayoutConfig, diagnostics: Diagnostics) -> Self {
        Self {
            fonts,
            config,
            out: LayoutOutput::default(),
            diagnostics,
            depth: 0,
            repass: false,
        }
    }

    fn layout_root(&mut self, stream: &mut Stream, page_width: Pt) -> SectionExtent {
        let margins = self.config.margins;
        let width = (page_width - margins.horizontal()).max(Pt::from_i32(1));
        let area = Rect::new(margins.left, margins.top, width, Pt::ZERO);
        let base = StyleFrame::base(self.fonts);
        self.layout_section(stream, StreamOwner::Root, area, base, false)
    }

    fn finish(self, extent: SectionExtent, requested: Pt) -> LayoutOutput {
        let margins = self.config.margins;
        let mut out = self.out;
        out.page_width = requested
            .max(extent.right + margins.right)
            .min(self.config.width_limit);
        out.page_height = extent.bottom + margins.bottom;
        out.warnings = self.diagnostics.into_warnings();
        log::trace!(
            "layout: {} segments, page {}x{}",
            out.segments.len(),
            out.page_width,
            out.page_height
        );
        out
    }

    pub(crate) fn length_ctx(&self, frame: StyleFrame, reference: Pt) -> LengthContext {
        let metrics = self.metrics(frame);
        LengthContext::new(reference, frame.size, metrics.line_spacing, metrics.height)
    }

    pub(crate) fn metrics(&self, frame: StyleFrame) -> FontMetrics {
        self.fonts.entry(frame.font).metrics
    }

    /// Lays out every entity of `stream` into `area`, whose height is open.
    pub(crate) fn layout_section(
        &mut self,
        stream: &mut Stream,
        owner: StreamOwner,
        area: Rect,
        base: StyleFrame,
        edit: bool,
    ) -> SectionExtent {
        let mut sec = Section::new(
            owner,
            area,
            base,
            edit,
            self.out.clips.len(),
            self.out.segments.len(),
        );
        let mut index = 0;
        while index < stream.len() {
            index = self.layout_entry(&mut sec, stream, index);
        }
        self.close_section(&mut sec, stream);
        let bottom = sec.max_bottom.max(sec.last_bottom);
        SectionExtent {
            right: sec.max_right,
            bottom,
            width: (sec.max_right - area.x).max(Pt::ZERO),
            height: (bottom - area.y).max(Pt::ZERO),
        }
    }

    /// Dispatches one entity and returns the index to continue from.
    fn layout_entry(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) -> usize {
        let Some(entry) = stream.entry(index) else {
            return index + 1;
        };
        if !stream.store().contains(entry.uid) {
            self.diagnostics.warn(LayoutWarning::DanglingReference(entry.uid));
            return index + 1;
        }
        match entry.kind {
            EntityKind::Text => self.layout_text(sec, stream, index),
            EntityKind::Advance => self.layout_advance(sec, stream, index),
            EntityKind::Font => self.push_font(sec, stream, index),
            EntityKind::FontEnd => {
                if sec.styles.pop().is_none() {
                    self.unmatched(EntityKind::FontEnd, index);
                }
            }
            EntityKind::Paragraph => self.start_paragraph(sec, stream, index),
            EntityKind::ParagraphEnd => self.end_paragraph(sec, stream, index),
            EntityKind::List => self.start_list(sec, stream, index),
            EntityKind::ListEnd => match sec.lists.pop() {
                Some(list) => {
                    sec.indent = list.prev_indent;
                    if !sec.line.content {
                        sec.restart_line(sec.line.start);
                    }
                    self.write_list(stream, list);
                }
                None => self.unmatched(EntityKind::ListEnd, index),
            },
            EntityKind::Link => self.open_link(sec, stream, index),
            EntityKind::LinkEnd => match sec.link.take() {
                Some(link) => self.push_link_area(sec, link, Position::at(index, 0)),
                None => self.unmatched(EntityKind::LinkEnd, index),
            },
            EntityKind::Index => return self.start_index(sec, stream, index),
            EntityKind::IndexEnd => self.end_index(sec, stream, index),
            EntityKind::Table => return self.layout_table(sec, stream, index),
            EntityKind::TableEnd | EntityKind::RowEnd => self.unmatched(entry.kind, index),
            EntityKind::Row | EntityKind::Cell => {
                self.diagnostics.warn(LayoutWarning::StrayEntity {
                    kind: entry.kind,
                    index,
                });
            }
            EntityKind::Button
            | EntityKind::Checkbox
            | EntityKind::Combobox
            | EntityKind::Input
            | EntityKind::Image => self.layout_widget(sec, stream, index),
            EntityKind::Xml | EntityKind::Use => {}
        }
        index + 1
    }

    fn unmatched(&mut self, kind: EntityKind, index: usize) {
        self.diagnostics.warn(LayoutWarning::UnmatchedEnd { kind, index });
    }

    /// Ends the last line and reports anything still open.
    fn close_section(&mut self, sec: &mut Section, stream: &mut Stream) {
        let end = stream.end();
        self.break_line(sec, stream, end, end, LineEnd::Wrap);
        if sec.link.take().is_some() {
            self.diagnostics.warn(LayoutWarning::Unclosed {
                kind: EntityKind::Link,
            });
        }
        for paragraph in std::mem::take(&mut sec.paragraphs) {
            self.diagnostics.warn(LayoutWarning::Unclosed {
                kind: EntityKind::Paragraph,
            });
            if let Ok(payload) = stream.payload_at_mut::<Paragraph>(paragraph.index) {
                payload.height = sec.cursor_y - paragraph.y;
            }
        }
        while let Some(list) = sec.lists.pop() {
            self.diagnostics.warn(LayoutWarning::Unclosed {
                kind: EntityKind::List,
            });
            self.write_list(stream, list);
        }
        for _ in sec.indexes.drain(..) {
            self.diagnostics.warn(LayoutWarning::Unclosed {
                kind: EntityKind::Index,
            });
        }
        for _ in sec.styles.drain(..) {
            self.diagnostics.warn(LayoutWarning::Unclosed {
                kind: EntityKind::Font,
            });
        }
    }

    // Text

    fn layout_text(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let next_segment = self.out.segments.len();
        let (text, formatted) = match stream.payload_at_mut::<TextRun>(index) {
            Ok(run) => {
                run.segment = Some(next_segment);
                (run.text.clone(), run.formatted)
            }
            Err(err) => {
                log::warn!("text at {index}: {err}");
                return;
            }
        };
        let trim = sec.paragraphs.last().is_some_and(|paragraph| paragraph.trim);
        let frame = sec.frame();
        let metrics = self.metrics(frame);
        for token in tokenize(&text, formatted) {
            match token {
                Token::Word(range) => {
                    let width = self.fonts.measure(frame.font, &text[range.clone()]);
                    let start = Position::at(index, range.start);
                    let x = self.place_inline(sec, stream, width, InlineExtent::text(&metrics), start);
                    self.advance_cursor(sec, x + width);
                }
                Token::Space(range) if formatted => {
                    if trim && !sec.line.content {
                        continue;
                    }
                    let width: Pt = text[range]
                        .chars()
                        .map(|ch| match ch {
                            '\t' => metrics.space_width * 4,
                            '\r' => Pt::ZERO,
                            _ => metrics.space_width,
                        })
                        .sum();
                    sec.cursor_x += width;
                }
                Token::Space(_) => {
                    if sec.line.content {
                        sec.cursor_x += metrics.space_width;
                    }
                }
                Token::Newline(at) => {
                    self.break_line(
                        sec,
                        stream,
                        Position::at(index, at),
                        Position::at(index, at + 1),
                        LineEnd::Newline,
                    );
                }
            }
        }
    }

    pub(crate) fn advance_cursor(&mut self, sec: &mut Section, right: Pt) {
        sec.cursor_x = right;
        sec.line.right = sec.line.right.max(right);
        sec.max_right = sec.max_right.max(right);
    }

    /// Finds room for an inline box of `width` starting at `start`, wrapping
    /// the line and stepping around opaque clips as needed. Returns the x of
    /// the box and records its extent on the line.
    fn place_inline(
        &mut self,
        sec: &mut Section,
        stream: &Stream,
        width: Pt,
        extent: InlineExtent,
        start: Position,
    ) -> Pt {
        let mut loops = 0usize;
        loop {
            let band = sec.line.full_height().max(extent.height);
            let blocked = self
                .blocking_clip(sec, sec.cursor_x, width, sec.cursor_y, band)
                .map(|clip| clip.right);
            if let Some(right) = blocked {
                if sec.line.content {
                    self.split_line(sec, stream, start, start, right);
                } else {
                    sec.cursor_x = right;
                    sec.line.x = right;
                    sec.line.right = right;
                }
            } else if sec.cursor_x + width > sec.edge && sec.line.content {
                self.break_line(sec, stream, start, start, LineEnd::Wrap);
            } else if sec.cursor_x + width > sec.edge && sec.cursor_x > sec.line_left() {
                // Pushed along by a clip with no room left: drop below it.
                if let Some(bottom) = self.clip_floor(sec, sec.cursor_y, band) {
                    sec.cursor_y = bottom;
                }
                sec.restart_line(sec.line.start);
            } else {
                break;
            }
            loops += 1;
            if loops >= self.config.wrap_loop_limit {
                self.diagnostics.warn(LayoutWarning::WrapLoop {
                    index: start.index.max(0) as usize,
                });
                break;
            }
        }
        let line = &mut sec.line;
        line.ascent = line.ascent.max(extent.ascent);
        line.descent = line.descent.max(extent.descent);
        line.height = line.height.max(extent.height);
        line.content = true;
        sec.cursor_x
    }

    /// First opaque clip of this section overlapping the given box.
    fn blocking_clip(&self, sec: &Section, x: Pt, width: Pt, y: Pt, height: Pt) -> Option<&Clip> {
        self.out.clips[sec.start_clips..]
            .iter()
            .find(|clip| clip.blocks(x, width, y, height))
    }

    /// Nearest bottom among opaque clips crossing the band `[y, y + height)`.
    fn clip_floor(&self, sec: &Section, y: Pt, height: Pt) -> Option<Pt> {
        self.out.clips[sec.start_clips..]
            .iter()
            .filter(|clip| !clip.transparent && clip.top < y + height && clip.bottom > y)
            .map(|clip| clip.bottom)
            .min()
    }

    /// Right edge available to the current line: the wrap edge, or the left
    /// side of an opaque clip beyond the line's content.
    fn align_edge(&self, sec: &Section) -> Pt {
        let band = sec.line.full_height().max(Pt::from_i32(1));
        self.out.clips[sec.start_clips..]
            .iter()
            .filter(|clip| {
                !clip.transparent
                    && clip.top < sec.cursor_y + band
                    && clip.bottom > sec.cursor_y
                    && clip.left >= sec.line.right
            })
            .map(|clip| clip.left)
            .fold(sec.edge, Pt::min)
    }

    // Lines and segments

    /// Emits the segment `[line.start, stop)` for the current line.
    pub(crate) fn emit_segment(&mut self, sec: &Section, stream: &Stream, stop: Position) {
        let start = sec.line.start;
        if stop <= start {
            return;
        }
        let scan = scan_range(stream, start, stop);
        let frame = sec.frame();
        let height = if sec.line.content {
            sec.line.full_height()
        } else if scan.text {
            self.metrics(frame).line_spacing
        } else {
            Pt::ZERO
        };
        let align_edge = self.align_edge(sec);
        let segment = Segment {
            start,
            stop,
            trim_stop: trim_stop(stream, start, stop),
            area: Rect::new(
                sec.line.x,
                sec.cursor_y,
                (sec.line.right - sec.line.x).max(Pt::ZERO),
                height,
            ),
            descent: sec.line.descent,
            align_width: (align_edge - sec.line.x).max(Pt::ZERO),
            align: frame.align,
            owner: sec.owner,
            edit: sec.edit,
            allow_merge: scan.allow_merge,
        };
        if self.out.segments.len() > sec.first_segment {
            if let Some(previous) = self.out.segments.last_mut() {
                if previous.allow_merge
                    && segment.allow_merge
                    && previous.owner == segment.owner
                    && previous.stop == segment.start
                {
                    previous.stop = segment.stop;
                    previous.trim_stop = segment.trim_stop;
                    return;
                }
            }
        }
        self.out.segments.push(segment);
    }

    /// Closes the current line at `stop` and starts the next one at
    /// `restart`.
    pub(crate) fn break_line(
        &mut self,
        sec: &mut Section,
        stream: &Stream,
        stop: Position,
        restart: Position,
        end: LineEnd,
    ) {
        self.emit_segment(sec, stream, stop);
        if let Some(link) = sec.link {
            self.push_link_area(sec, link, stop);
        }
        let spacing = self.metrics(sec.frame()).line_spacing;
        let content = sec.line.content;
        let line_height = sec.line.full_height();
        match end {
            LineEnd::Wrap => {
                if content {
                    sec.cursor_y += line_height;
                    sec.last_bottom = sec.cursor_y;
                }
            }
            LineEnd::Newline => {
                sec.cursor_y += if content { line_height } else { spacing };
                sec.last_bottom = sec.cursor_y;
            }
            LineEnd::Paragraph(ratio) => {
                let bottom = if content {
                    sec.cursor_y + line_height
                } else {
                    sec.last_bottom
                };
                sec.last_bottom = bottom;
                sec.cursor_y = sec.cursor_y.max(bottom + spacing * ratio);
            }
        }
        if content {
            sec.has_content = true;
        }
        sec.max_bottom = sec.max_bottom.max(sec.last_bottom);
        sec.restart_line(restart);
    }

    /// Ends the current segment without ending the line; the next segment
    /// starts at `restart` with its left edge at `x`.
    pub(crate) fn split_line(
        &mut self,
        sec: &mut Section,
        stream: &Stream,
        stop: Position,
        restart: Position,
        x: Pt,
    ) {
        self.emit_segment(sec, stream, stop);
        if let Some(link) = sec.link {
            self.push_link_area(sec, link, stop);
        }
        sec.line.start = restart;
        sec.cursor_x = x;
        sec.line.x = x;
        sec.line.right = x;
        if let Some(link) = sec.link.as_mut() {
            link.x = x;
            link.start = restart;
        }
    }

    fn layout_advance(&mut self, sec: &mut Section, stream: &Stream, index: usize) {
        let Ok(advance) = stream.payload_at::<Advance>(index) else {
            return;
        };
        let ctx = self.length_ctx(sec.frame(), sec.edge - sec.left);
        sec.cursor_x += advance.x.resolve(&ctx);
        sec.cursor_y += advance.y.resolve(&ctx);
    }

    fn push_font(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let parent = sec.frame();
        let frame = match stream.payload_at_mut::<FontStyle>(index) {
            Ok(style) => self.resolve_frame(style, parent),
            Err(err) => {
                log::warn!("font at {index}: {err}");
                parent
            }
        };
        sec.styles.push(frame);
    }

    fn resolve_frame(&mut self, style: &mut FontStyle, parent: StyleFrame) -> StyleFrame {
        let font = style.layout_font(self.fonts, parent.size, &mut self.diagnostics);
        StyleFrame {
            font,
            size: Pt::from_i32(self.fonts.entry(font).size),
            align: style.align,
            valign: style.valign,
        }
    }

    // Paragraphs and lists

    fn start_paragraph(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let at = Position::at(index, 0);
        let Ok(paragraph) = stream.payload_at::<Paragraph>(index) else {
            return;
        };
        let (leading, list_item, trim, indent, value) = (
            paragraph.leading,
            paragraph.list_item,
            paragraph.trim,
            paragraph.indent,
            paragraph.value.clone(),
        );
        if sec.line.content || sec.has_content {
            self.break_line(sec, stream, at, at, LineEnd::Paragraph(leading));
        }

        let parent = sec.frame();
        let mut pushed_font = false;
        if let Ok(paragraph) = stream.payload_at_mut::<Paragraph>(index) {
            if let Some(style) = paragraph.font.as_mut() {
                let frame = self.resolve_frame(style, parent);
                sec.styles.push(frame);
                pushed_font = true;
            }
        }

        let frame = sec.frame();
        let ctx = self.length_ctx(frame, sec.edge - sec.left);
        let block_indent = sec.indent;
        let mut item_indent = Pt::ZERO;
        let mut marker = String::new();
        if list_item {
            if let Some(list) = sec.lists.last_mut() {
                list.item_num += 1;
                marker = if !value.is_empty() {
                    value
                } else if list.kind == ListKind::Ordered {
                    format!("{}.", list.start + list.item_num - 1)
                } else {
                    String::new()
                };
                if !marker.is_empty() {
                    let needed = self.fonts.measure(frame.font, &marker) + Pt::from_i32(MARKER_GAP);
                    if needed > list.item_indent {
                        list.item_indent = needed;
                        list.widened = true;
                        self.repass = true;
                    }
                }
                item_indent = list.item_indent;
            }
        }

        sec.paragraphs.push(ParagraphFrame {
            index,
            prev_indent: sec.indent,
            pushed_font,
            list_item,
            leading,
            trim,
            y: sec.cursor_y,
        });
        sec.indent = block_indent + item_indent + indent.resolve(&ctx);
        if !sec.line.content {
            sec.restart_line(sec.line.start);
        }
        if let Ok(paragraph) = stream.payload_at_mut::<Paragraph>(index) {
            paragraph.x = sec.left + block_indent;
            paragraph.y = sec.cursor_y;
            paragraph.block_indent = block_indent;
            paragraph.item_indent = item_indent;
            paragraph.marker = marker;
        }
    }

    fn end_paragraph(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let Some(frame) = sec.paragraphs.pop() else {
            self.unmatched(EntityKind::ParagraphEnd, index);
            return;
        };
        let ratio = match sec.lists.last() {
            Some(list) if frame.list_item => list.v_spacing,
            _ => frame.leading,
        };
        self.break_line(
            sec,
            stream,
            Position::at(index, 0),
            Position::at(index + 1, 0),
            LineEnd::Paragraph(ratio),
        );
        if frame.pushed_font {
            sec.styles.pop();
        }
        sec.indent = frame.prev_indent;
        sec.restart_line(sec.line.start);
        if let Ok(paragraph) = stream.payload_at_mut::<Paragraph>(frame.index) {
            paragraph.height = sec.last_bottom - frame.y;
        }
    }

    fn start_list(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let Some(entry) = stream.entry(index) else {
            return;
        };
        let ctx = self.length_ctx(sec.frame(), sec.edge - sec.left);
        let Ok(list) = stream.payload_at_mut::<List>(index) else {
            return;
        };
        list.item_num = 0;
        list.repass = false;
        let block_indent = list.block_indent.resolve(&ctx);
        sec.lists.push(ListFrame {
            uid: entry.uid,
            prev_indent: sec.indent,
            item_indent: list.item_indent.resolve(&ctx),
            v_spacing: list.v_spacing,
            kind: list.kind,
            start: list.start,
            item_num: 0,
            widened: false,
        });
        sec.indent += block_indent;
        if !sec.line.content {
            sec.restart_line(sec.line.start);
        }
    }

    /// Stores the item count and any widened indent back on the list.
    fn write_list(&mut self, stream: &mut Stream, frame: ListFrame) {
        let Ok(list) = stream.store_mut().lookup_as_mut::<List>(frame.uid) else {
            return;
        };
        list.item_num = frame.item_num;
        if frame.widened {
            list.item_indent = Length::Px(frame.item_indent);
            list.repass = true;
        }
    }

    // Links and index markers

    fn open_link(&mut self, sec: &mut Section, stream: &Stream, index: usize) {
        let Some(entry) = stream.entry(index) else {
            return;
        };
        if stream.payload_at::<Link>(index).is_err() {
            return;
        }
        if let Some(previous) = sec.link.take() {
            self.push_link_area(sec, previous, Position::at(index, 0));
        }
        sec.link = Some(OpenLink {
            uid: entry.uid,
            x: sec.cursor_x,
            start: Position::at(index, 0),
        });
        self.out.tabs.push(Tab {
            reference: TabRef::Link(entry.uid),
            active: true,
        });
    }

    /// Records the part of `link` on the current line, up to `stop`.
    fn push_link_area(&mut self, sec: &Section, link: OpenLink, stop: Position) {
        let right = sec.line.right;
        if right <= link.x {
            return;
        }
        let height = if sec.line.content {
            sec.line.full_height()
        } else {
            self.metrics(sec.frame()).line_spacing
        };
        self.out.links.push(LinkArea {
            link: link.uid,
            area: Rect::new(link.x, sec.cursor_y, right - link.x, height),
            start: link.start,
            stop,
            owner: sec.owner,
        });
    }

    fn start_index(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) -> usize {
        let parent_visible = sec.indexes.iter().all(|&(_, shown)| shown);
        let y = sec.cursor_y;
        let (id, shown) = match stream.payload_at_mut::<IndexStart>(index) {
            Ok(marker) => {
                marker.y = y;
                marker.parent_visible = parent_visible;
                (marker.id, marker.is_shown())
            }
            Err(err) => {
                log::warn!("index at {index}: {err}");
                return index + 1;
            }
        };
        if shown {
            sec.indexes.push((id, true));
            return index + 1;
        }
        match stream.find_matching_end(index) {
            Some(end) => {
                let x = sec.cursor_x;
                self.split_line(sec, stream, Position::at(index, 0), Position::at(end, 0), x);
                sec.indexes.push((id, false));
                end
            }
            None => {
                self.diagnostics.warn(LayoutWarning::Unclosed {
                    kind: EntityKind::Index,
                });
                stream.len()
            }
        }
    }

    fn end_index(&mut self, sec: &mut Section, stream: &Stream, index: usize) {
        let Ok(end) = stream.payload_at::<IndexEnd>(index) else {
            return;
        };
        match sec.indexes.iter().rposition(|&(id, _)| id == end.id) {
            Some(open) => sec.indexes.truncate(open),
            None => self.unmatched(EntityKind::IndexEnd, index),
        }
    }

    // Embedded controls

    fn layout_widget(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) {
        let Some(entry) = stream.entry(index) else {
            return;
        };
        let frame = sec.frame();
        let ctx = self.length_ctx(frame, sec.edge - sec.left);
        let (full_width, full_height, align, name) = {
            let Ok(entity) = stream.entity_at_mut(index) else {
                return;
            };
            let data = entity.data_mut();
            let (auto_width, auto_height) = self.auto_widget_size(data, frame, &ctx, self.depth);
            let label_width = data
                .widget()
                .filter(|widget| !widget.label.is_empty())
                .map(|widget| self.fonts.measure(frame.font, &widget.label) + widget.label_pad.resolve(&ctx))
                .unwrap_or(Pt::ZERO);
            let is_image = matches!(data, EntityData::Image(_));
            let Some(widget) = data.widget_mut() else {
                return;
            };
            widget.final_width = widget.width.resolve_or(&ctx, auto_width);
            widget.final_height = widget.height.resolve_or(&ctx, auto_height);
            if is_image && auto_width.is_positive() {
                // Keep the source aspect when only one side is given.
                if !widget.width.is_auto() && widget.height.is_auto() {
                    widget.final_height = auto_height * (widget.final_width.to_f32() / auto_width.to_f32());
                } else if widget.width.is_auto() && !widget.height.is_auto() && auto_height.is_positive() {
                    widget.final_width = auto_width * (widget.final_height.to_f32() / auto_height.to_f32());
                }
            }
            widget.final_pad = widget.pad.resolve(&ctx);
            widget.label_width = label_width;
            if let EntityData::Button(button) = &mut *data {
                let pad = button.inner_padding.resolve(&ctx);
                let width = (button.widget.final_width - pad.horizontal()).max(Pt::ZERO);
                let mut face = std::mem::take(&mut button.stream);
                let height = self.measure_height(&mut face, StreamOwner::Entity(entry.uid), width, frame);
                button.stream = face;
                button.widget.final_height = button.widget.final_height.max(height + pad.vertical());
            }
            let Some(widget) = data.widget() else {
                return;
            };
            (widget.full_width(), widget.full_height(), widget.align, widget.name.clone())
        };

        let (x, y) = match align {
            Some(align) => {
                let (x, y) = self.find_slot(sec, full_width, full_height, align, index);
                let clip = Clip::new(
                    Rect::new(x, y, full_width, full_height),
                    index,
                    false,
                    if name.is_empty() { entry.kind.name().to_string() } else { name },
                    self.config.clip_limit,
                    &mut self.diagnostics,
                );
                self.out.clips.push(clip);
                sec.max_right = sec.max_right.max(x + full_width);
                sec.max_bottom = sec.max_bottom.max(y + full_height);
                (x, y)
            }
            None => {
                let extent = InlineExtent {
                    ascent: full_height,
                    descent: Pt::ZERO,
                    height: full_height,
                };
                let x = self.place_inline(sec, stream, full_width, extent, Position::at(index, 0));
                self.advance_cursor(sec, x + full_width);
                (x, sec.cursor_y)
            }
        };

        let button_area = {
            let Ok(entity) = stream.entity_at_mut(index) else {
                return;
            };
            let data = entity.data_mut();
            let inner = match data {
                EntityData::Button(button) => Some(button.inner_padding.resolve(&ctx)),
                _ => None,
            };
            let Some(widget) = data.widget_mut() else {
                return;
            };
            widget.x = x;
            widget.y = y;
            inner.map(|pad| {
                let body = widget.body_rect();
                Rect::new(
                    body.x + pad.left,
                    body.y + pad.top,
                    (body.width - pad.horizontal()).max(Pt::ZERO),
                    Pt::ZERO,
                )
            })
        };
        if let Some(area) = button_area {
            self.layout_button_face(stream, index, entry.uid, area, frame);
        }

        if let Some(widget) = stream.entity_at(index).ok().and_then(|entity| entity.data().widget()) {
            self.out.widgets.push(WidgetPlacement {
                uid: entry.uid,
                kind: entry.kind,
                rect: widget.body_rect(),
                padding: widget.final_pad,
                label: widget.label_rect(),
                owner: sec.owner,
            });
        }
        self.out.tabs.push(Tab {
            reference: TabRef::Vector(entry.uid),
            active: true,
        });
    }

    /// Lays out a button's own content inside its body. The body was sized
    /// to the face before placement.
    fn layout_button_face(&mut self, stream: &mut Stream, index: usize, uid: Uid, area: Rect, frame: StyleFrame) {
        let Ok(button) = stream.payload_at_mut::<Button>(index) else {
            return;
        };
        let mut face = std::mem::take(&mut button.stream);
        self.depth += 1;
        self.layout_section(&mut face, StreamOwner::Entity(uid), area, frame, false);
        self.depth -= 1;
        if let Ok(button) = stream.payload_at_mut::<Button>(index) {
            button.stream = face;
        }
    }

    /// Height `stream` takes in a box `width` wide. Nothing it places stays
    /// in the output and its warnings are dropped.
    pub(crate) fn measure_height(
        &mut self,
        stream: &mut Stream,
        owner: StreamOwner,
        width: Pt,
        frame: StyleFrame,
    ) -> Pt {
        let marks = (
            self.out.segments.len(),
            self.out.clips.len(),
            self.out.tabs.len(),
            self.out.links.len(),
            self.out.widgets.len(),
        );
        let diagnostics = std::mem::replace(&mut self.diagnostics, Diagnostics::quiet());
        self.depth += 1;
        let area = Rect::new(Pt::ZERO, Pt::ZERO, width, Pt::ZERO);
        let extent = self.layout_section(stream, owner, area, frame, false);
        self.depth -= 1;
        self.diagnostics = diagnostics;
        self.out.segments.truncate(marks.0);
        self.out.clips.truncate(marks.1);
        self.out.tabs.truncate(marks.2);
        self.out.links.truncate(marks.3);
        self.out.widgets.truncate(marks.4);
        extent.height
    }

    /// Size a control takes when its width or height is left unset.
    pub(crate) fn auto_widget_size(
        &self,
        data: &EntityData,
        frame: StyleFrame,
        ctx: &LengthContext,
        depth: usize,
    ) -> (Pt, Pt) {
        let Some(widget) = data.widget() else {
            return (Pt::ZERO, Pt::ZERO);
        };
        let def = widget.def_size.resolve_or(ctx, frame.size);
        match data {
            EntityData::Input(_) => (def * 10, def),
            EntityData::Combobox(combo) => {
                let widest = combo
                    .widest_label()
                    .map(|label| self.fonts.measure(frame.font, label))
                    .unwrap_or(Pt::ZERO);
                (widest + def, def)
            }
            EntityData::Image(image) => match image.intrinsic_size() {
                Ok(Some(size)) => (size.width, size.height),
                Ok(None) => (def, def),
                Err(err) => {
                    log::warn!("image {:?}: {err}", widget.name);
                    (def, def)
                }
            },
            EntityData::Button(button) => {
                let pad = button.inner_padding.resolve(ctx);
                let content = self.content_widths(&button.stream, frame, depth);
                (
                    content.max + pad.horizontal(),
                    self.metrics(frame).line_spacing + pad.vertical(),
                )
            }
            _ => (def, def),
        }
    }

    /// Position for a floating box: aligned within the line's bounds and
    /// moved down past any opaque clip it would overlap.
    pub(crate) fn find_slot(&mut self, sec: &Section, width: Pt, height: Pt, align: HAlign, index: usize) -> (Pt, Pt) {
        let left = sec.line_left();
        let x = match align {
            HAlign::Left => left,
            HAlign::Right => (sec.edge - width).max(left),
            HAlign::Center => (left + (sec.edge - left - width) / 2).max(left),
        };
        let mut y = sec.cursor_y;
        for _ in 0..self.config.wrap_loop_limit {
            let rect = Rect::new(x, y, width.max(Pt::from_milli_i64(1)), height.max(Pt::from_milli_i64(1)));
            let below = self.out.clips[sec.start_clips..]
                .iter()
                .filter(|clip| !clip.transparent && clip.rect().intersects(&rect))
                .map(|clip| clip.bottom)
                .min();
            match below {
                Some(bottom) => y = bottom,
                None => return (x, y),
            }
        }
        self.diagnostics.warn(LayoutWarning::WrapLoop { index });
        (x, y)
    }
}

/// Pieces of a text run as the line breaker sees them. Ranges are byte
/// offsets into the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Word(Range<usize>),
    Space(Range<usize>),
    Newline(usize),
}

/// Splits `text` into words and whitespace. Formatted text reports each
/// `\n` on its own; otherwise line feeds are ordinary whitespace.
pub(crate) fn tokenize(text: &str, formatted: bool) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word: Option<usize> = None;
    let mut space: Option<usize> = None;
    for (offset, ch) in text.char_indices() {
        if formatted && ch == '\n' {
            if let Some(start) = word.take() {
                tokens.push(Token::Word(start..offset));
            }
            if let Some(start) = space.take() {
                tokens.push(Token::Space(start..offset));
            }
            tokens.push(Token::Newline(offset));
        } else if ch.is_whitespace() {
            if let Some(start) = word.take() {
                tokens.push(Token::Word(start..offset));
            }
            space.get_or_insert(offset);
        } else {
            if let Some(start) = space.take() {
                tokens.push(Token::Space(start..offset));
            }
            word.get_or_insert(offset);
        }
    }
    if let Some(start) = word {
        tokens.push(Token::Word(start..text.len()));
    }
    if let Some(start) = space {
        tokens.push(Token::Space(start..text.len()));
    }
    tokens
}

#[derive(Debug, Clone, Copy)]
struct RangeScan {
    text: bool,
    allow_merge: bool,
}

/// Classifies the content of `[start, stop)`. Segments holding only
/// lightweight controls may merge with their neighbours.
fn scan_range(stream: &Stream, start: Position, stop: Position) -> RangeScan {
    let mut scan = RangeScan {
        text: false,
        allow_merge: true,
    };
    let (Ok(first), Ok(last)) = (start.entity_index(), stop.entity_index()) else {
        return scan;
    };
    for index in first..=last.min(stream.len().saturating_sub(1)) {
        let Some(entry) = stream.entry(index) else {
            break;
        };
        if index == last && stop.offset == 0 {
            break;
        }
        match entry.kind {
            EntityKind::Text => {
                let from = if index == first { start.offset } else { 0 };
                let has_text = stream.text_at(index).is_some_and(|text| {
                    let to = if index == last { stop.offset } else { text.len() };
                    from < to.min(text.len())
                });
                if has_text {
                    scan.text = true;
                    scan.allow_merge = false;
                }
            }
            EntityKind::Table | EntityKind::TableEnd | EntityKind::Font => scan.allow_merge = false,
            kind if kind.is_widget() => scan.allow_merge = false,
            _ => {}
        }
    }
    scan
}

/// `stop` moved back over trailing whitespace, never before `start`.
pub(crate) fn trim_stop(stream: &Stream, start: Position, stop: Position) -> Position {
    let mut result = stop;
    let mut cursor = stop;
    while cursor > start {
        let Ok(index) = cursor.entity_index() else {
            break;
        };
        if cursor.offset == 0 {
            if index == 0 {
                break;
            }
            match stream.text_at(index - 1) {
                Some(text) => cursor = Position::at(index - 1, text.len()),
                None => break,
            }
            continue;
        }
        let Some(previous) = stream
            .text_at(index)
            .and_then(|text| text.get(..cursor.offset))
            .and_then(|head| head.chars().next_back())
        else {
            break;
        };
        if !previous.is_whitespace() {
            break;
        }
        cursor = Position::at(index, cursor.offset - previous.len_utf8());
        result = cursor;
    }
    result.max(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;
    use crate::length::Length;
    use crate::stream::StreamBuilder;
    use crate::table::{Cell, Row, Table};
    use crate::widget::{Checkbox, WidgetMgr};

    fn fonts() -> FontCache {
        FontCache::new(FontRegistry::new(), "Noto Sans", "Regular", 10)
    }

    fn config(width: i32) -> LayoutConfig {
        LayoutConfig {
            page_width: Some(Pt::from_i32(width)),
            ..LayoutConfig::default()
        }
    }

    fn run(stream: &mut Stream, width: i32) -> LayoutOutput {
        layout_stream(stream, &fonts(), &config(width), Pt::from_i32(width), None)
    }

    #[test]
    fn tokenizer_separates_words_and_space() {
        assert_eq!(
            tokenize("ab  c", false),
            vec![Token::Word(0..2), Token::Space(2..4), Token::Word(4..5)]
        );
        assert_eq!(
            tokenize("a\nb", true),
            vec![Token::Word(0..1), Token::Newline(1), Token::Word(2..3)]
        );
        assert_eq!(
            tokenize("a\nb", false),
            vec![Token::Word(0..1), Token::Space(1..2), Token::Word(2..3)]
        );
    }

    #[test]
    fn words_wrap_at_the_edge() {
        // Each word is 30 wide at 10px; two fit on a 70 wide line.
        let mut builder = StreamBuilder::new();
        builder.text("aaaaa bbbbb ccccc");
        let mut stream = builder.finish();
        let out = run(&mut stream, 70);
        assert_eq!(out.segments.len(), 2);
        let first = &out.segments[0];
        assert_eq!(first.start, Position::new(0, 0));
        assert_eq!(first.stop, Position::new(0, 12));
        assert_eq!(first.trim_stop, Position::new(0, 11));
        assert_eq!(first.area.width, Pt::from_i32(66));
        assert_eq!(first.align_width, Pt::from_i32(70));
        let second = &out.segments[1];
        assert_eq!(second.area.y, first.area.bottom());
        assert_eq!(second.area.width, Pt::from_i32(30));
    }

    #[test]
    fn formatted_text_breaks_on_newlines_and_keeps_spaces() {
        let mut builder = StreamBuilder::new();
        builder.formatted("a  b\n\nc");
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[0].area.width, Pt::from_i32(24));
        // Two line feeds: one ends the line, the second adds an empty line.
        assert_eq!(out.segments[1].area.y, Pt::from_i32(24));
    }

    #[test]
    fn paragraph_gap_takes_the_larger_leading() {
        let mut builder = StreamBuilder::new();
        builder
            .paragraph(Paragraph::default())
            .text("one")
            .paragraph_end()
            .paragraph(Paragraph {
                leading: 2.0,
                ..Paragraph::default()
            })
            .text("two")
            .paragraph_end();
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let lines: Vec<&Segment> = out.segments.iter().filter(|s| s.area.height.is_positive()).collect();
        assert_eq!(lines.len(), 2);
        // Line spacing is 12: the first line ends at 12 and the gap is
        // max(1, 2) line heights rather than their sum.
        assert_eq!(lines[0].area.y, Pt::ZERO);
        assert_eq!(lines[1].area.y, Pt::from_i32(36));
    }

    #[test]
    fn ordered_list_numbers_items_and_indents() {
        let mut builder = StreamBuilder::new();
        builder
            .list(crate::entity::List::ordered())
            .paragraph(Paragraph::list_item())
            .text("first")
            .paragraph_end()
            .paragraph(Paragraph::list_item())
            .text("second")
            .paragraph_end()
            .list_end();
        let mut stream = builder.finish();
        run(&mut stream, 400);
        let second = stream.payload_at::<Paragraph>(4).expect("paragraph");
        assert_eq!(second.marker, "2.");
        // One line height of block indent; the item indent grows from one
        // line height to fit "1." (12) plus the marker gap.
        assert_eq!(second.block_indent, Pt::from_i32(12));
        assert_eq!(second.item_indent, Pt::from_i32(22));
        assert_eq!(stream.payload_at::<crate::entity::List>(0).expect("list").item_num, 2);
    }

    #[test]
    fn wide_markers_widen_the_list_and_lay_out_again() {
        let mut builder = StreamBuilder::new();
        let mut list = crate::entity::List::ordered();
        list.start = 1000;
        builder
            .list(list)
            .paragraph(Paragraph::list_item())
            .text("item")
            .paragraph_end()
            .list_end();
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let list = stream.payload_at::<crate::entity::List>(0).expect("list");
        // "1000." is 30 wide, plus the marker gap.
        assert_eq!(list.item_indent, Length::Px(Pt::from_i32(40)));
        let text = out.segments.iter().find(|s| s.area.width.is_positive()).expect("text line");
        assert_eq!(text.area.x, Pt::from_i32(52));
    }

    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn second_pass_still_reports_to_the_debug_log() {
        let mut builder = StreamBuilder::new();
        let mut list = crate::entity::List::ordered();
        list.start = 1000;
        builder
            .list(list)
            .paragraph(Paragraph::list_item())
            .text("item")
            .paragraph_end()
            .list_end()
            .font_end()
            .table(Table::new())
            .row(Row::default())
            .cell(Cell::new(1), |inner| {
                inner.text("cell");
            })
            .row_end()
            .table_end();
        let mut stream = builder.finish();
        let buf = SharedBuf::default();
        let debug = DebugLogger::from_writer(buf.clone());
        let out = layout_stream(&mut stream, &fonts(), &config(400), Pt::from_i32(400), Some(debug.clone()));
        debug.flush();
        assert_eq!(out.warnings.len(), 1);

        let text = String::from_utf8(buf.0.lock().expect("buffer").clone()).expect("utf8");
        let kinds: Vec<String> = text
            .lines()
            .map(|line| {
                let event: serde_json::Value = serde_json::from_str(line).expect("json line");
                event["type"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        let count = |kind: &str| kinds.iter().filter(|k| k.as_str() == kind).count();
        // One table event per pass; the warning is reported once.
        assert_eq!(count("layout.table"), 2);
        assert_eq!(count("layout.warning"), 1);
        assert_eq!(count("layout.pass"), 1);
    }

    #[test]
    fn hidden_index_content_is_skipped() {
        let mut builder = StreamBuilder::new();
        builder.text("before ").index("secret", 1).text("hidden").index_end(1).text("after");
        let mut stream = builder.finish();
        stream.payload_at_mut::<IndexStart>(1).expect("index").visible = false;
        let out = run(&mut stream, 400);
        let covered: Vec<(Position, Position)> = out.segments.iter().map(|s| (s.start, s.stop)).collect();
        assert!(covered.iter().all(|(start, stop)| !(*start <= Position::new(2, 0) && *stop > Position::new(2, 0))));
        let width: Pt = out.segments.iter().map(|s| s.area.width).sum();
        // "before" and "after" at 6 per character; the space stays as a gap.
        assert_eq!(width, Pt::from_i32(66));
    }

    #[test]
    fn nested_index_visibility_is_the_and_of_its_parents() {
        let mut builder = StreamBuilder::new();
        builder.index("outer", 1).index("inner", 2).text("x").index_end(2).index_end(1);
        let mut stream = builder.finish();
        run(&mut stream, 400);
        assert!(stream.payload_at::<IndexStart>(1).expect("inner").parent_visible);
    }

    #[test]
    fn links_split_into_one_area_per_line() {
        let mut builder = StreamBuilder::new();
        builder
            .link(Link::href("https://example.org"))
            .text("aaaaa bbbbb ccccc")
            .link_end();
        let mut stream = builder.finish();
        let out = run(&mut stream, 70);
        assert_eq!(out.links.len(), 2);
        assert_eq!(out.links[0].area.y, Pt::ZERO);
        assert_eq!(out.links[1].area.y, Pt::from_i32(12));
        assert_eq!(out.tabs.len(), 1);
    }

    #[test]
    fn structural_errors_become_warnings() {
        let mut builder = StreamBuilder::new();
        builder
            .text("a")
            .table_end()
            .push(Row::default())
            .font_end()
            .paragraph(Paragraph::default())
            .text("b");
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        assert!(out.warnings.contains(&LayoutWarning::UnmatchedEnd {
            kind: EntityKind::TableEnd,
            index: 1
        }));
        assert!(out.warnings.contains(&LayoutWarning::StrayEntity {
            kind: EntityKind::Row,
            index: 2
        }));
        assert!(out.warnings.contains(&LayoutWarning::Unclosed {
            kind: EntityKind::Paragraph
        }));
        assert!(out.segments.iter().any(|s| s.stop == stream.end()));
    }

    #[test]
    fn floating_checkbox_pushes_text_aside() {
        let mut widget = WidgetMgr::named("agree");
        widget.width = Length::px(20.0);
        widget.height = Length::px(20.0);
        widget.align = Some(HAlign::Left);
        let mut builder = StreamBuilder::new();
        builder.push(Checkbox::new(widget)).text("text");
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        assert_eq!(out.clips.len(), 1);
        assert_eq!(out.widgets.len(), 1);
        assert_eq!(out.widgets[0].rect, Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(20), Pt::from_i32(20)));
        let text = out.segments.iter().find(|s| s.area.width.is_positive()).expect("text");
        assert_eq!(text.area.x, Pt::from_i32(20));
    }

    #[test]
    fn inline_checkbox_sits_in_the_line() {
        let mut builder = StreamBuilder::new();
        builder.text("ok").push(Checkbox::new(WidgetMgr::named("box")));
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let placed = &out.widgets[0];
        // One em at 10px, right after "ok".
        assert_eq!(placed.rect.x, Pt::from_i32(12));
        assert_eq!(placed.rect.width, Pt::from_i32(10));
        assert_eq!(out.tabs[0].reference, TabRef::Vector(placed.uid));
    }

    #[test]
    fn tall_button_faces_size_the_button_before_placement() {
        let mut builder = StreamBuilder::new();
        builder
            .button(Button::new(WidgetMgr::named("go")), |face| {
                face.formatted("a\nb\nc");
            })
            .formatted("\nnext line");
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let button = &out.widgets[0];
        // Three face lines of 12 plus 2.5 inner padding above and below.
        assert_eq!(button.rect.height, Pt::from_i32(41));
        let face = StreamOwner::Entity(button.uid);
        assert_eq!(out.segments_of(face).count(), 3);
        let next = out
            .segments_of(StreamOwner::Root)
            .find(|segment| segment.start == Position::new(1, 1))
            .expect("next line");
        assert!(next.area.y >= button.rect.y + button.rect.height);
        assert_eq!(out.tabs.len(), 1);
    }

    #[test]
    fn overlong_words_grow_the_page() {
        let mut builder = StreamBuilder::new();
        builder.text("abcdefghijklmnopqrstuvwxyz");
        let mut stream = builder.finish();
        let out = run(&mut stream, 60);
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.page_width, Pt::from_i32(156));
    }

    #[test]
    fn text_runs_point_back_at_their_segment() {
        let mut builder = StreamBuilder::new();
        builder
            .paragraph(Paragraph::default())
            .text("one")
            .paragraph_end()
            .paragraph(Paragraph::default())
            .text("two")
            .paragraph_end();
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let second = stream.payload_at::<TextRun>(4).expect("text").segment.expect("segment");
        assert_eq!(out.segments[second].start, Position::new(3, 0));
    }

    #[test]
    fn cells_lay_out_in_their_own_streams() {
        let mut builder = StreamBuilder::new();
        builder
            .table(Table::new())
            .row(Row::default())
            .cell(Cell::new(1), |inner| {
                inner.text("cell");
            })
            .row_end()
            .table_end();
        let mut stream = builder.finish();
        let out = run(&mut stream, 400);
        let uid = stream.entry(2).expect("cell").uid;
        assert_eq!(out.segments_of(StreamOwner::Entity(uid)).count(), 1);
    }
}

mod debug;
mod diagnostics;
mod document;
mod entity;
mod error;
mod font;
mod font_cache;
mod layout;
mod length;
mod position;
mod scroll;
mod segment;
mod store;
mod stream;
mod style;
mod table;
mod table_layout;
mod types;
mod widget;

pub use debug::DebugLogger;
pub use diagnostics::{Diagnostics, LayoutWarning};
pub use document::Document;
pub use entity::{
    Advance, Entity, EntityData, EntityKind, EntityPayload, IndexEnd, IndexStart, Link, LinkKind, List, ListKind,
    Paragraph, TextRun, Uid, UseSymbol, XmlObject, name_hash,
};
pub use error::{DocFlowError, Result};
pub use font::FontRegistry;
pub use font_cache::{FontCache, FontEntry, FontMetrics};
pub use layout::{
    DEFAULT_MAX_TABLE_DEPTH, DEFAULT_WIDTH_LIMIT, DEFAULT_WRAP_LOOP_LIMIT, LayoutConfig, LayoutOutput,
    MAX_PAGE_WIDTH, MIN_PAGE_WIDTH, layout_stream,
};
pub use length::{Edges, Length, LengthContext, Padding};
pub use position::{Position, StreamEdit};
pub use scroll::{Axis, ScrollBar, ScrollConfig, ScrollManager, Slider};
pub use segment::{Clip, DEFAULT_CLIP_LIMIT, LinkArea, Segment, StreamOwner, Tab, TabRef, WidgetPlacement};
pub use store::EntityStore;
pub use stream::{Stream, StreamBuilder, StreamEntry};
pub use style::{
    DEFAULT_FONT_FACE, DEFAULT_FONT_FILL, DEFAULT_FONT_SIZE, DEFAULT_FONT_STYLE, FontOptions, FontStyle, HAlign,
    VAlign,
};
pub use table::{Cell, CellBorder, MAX_SPAN, Row, Table, TableColumn};
pub use types::{Margins, Pt, Rect, Size};
pub use widget::{
    Button, Checkbox, Combobox, DisposalPolicy, ImageWidget, Input, LabelPosition, MenuItem, Resource, UiHandle,
    UiHost, Widget, WidgetMgr,
};

use std::path::PathBuf;
use std::sync::Arc;

/// The long-lived layout service: one font cache shared by every document it
/// lays out.
pub struct DocFlow {
    fonts: Arc<FontCache>,
    config: LayoutConfig,
    scroll: ScrollConfig,
    debug: Option<DebugLogger>,
}

#[derive(Clone)]
pub struct DocFlowBuilder {
    config: LayoutConfig,
    scroll: ScrollConfig,
    font_face: String,
    font_style: String,
    font_size: i32,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(Vec<u8>, Option<String>)>,
    synthetic_faces: Vec<(String, String, f32)>,
    debug_path: Option<PathBuf>,
}

impl DocFlow {
    pub fn builder() -> DocFlowBuilder {
        DocFlowBuilder::new()
    }

    pub fn font_cache(&self) -> &Arc<FontCache> {
        &self.fonts
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn new_document(&self, stream: Stream) -> Document {
        Document::with_scroll(stream, self.scroll)
    }

    /// Lays out one document for a viewport and updates its scroll geometry.
    pub fn layout<'d>(&self, document: &'d mut Document, viewport: Size) -> &'d LayoutOutput {
        if let Some(debug) = &self.debug {
            debug.increment("documents", 1);
        }
        document.layout_with(&self.fonts, &self.config, viewport, self.debug.clone())
    }

    /// Lays documents out in parallel. Each layout stays on one thread; only
    /// the font cache is shared.
    pub fn layout_many(&self, documents: &mut [Document], viewport: Size) {
        use rayon::prelude::*;

        documents.par_iter_mut().for_each(|document| {
            self.layout(document, viewport);
        });
        log::debug!("laid out {} documents", documents.len());
        self.emit_debug_summary("layout_many");
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = &self.debug {
            logger.emit_summary(context);
            logger.flush();
        }
    }
}

impl Default for DocFlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocFlowBuilder {
    pub fn new() -> Self {
        Self {
            config: LayoutConfig::default(),
            scroll: ScrollConfig::default(),
            font_face: DEFAULT_FONT_FACE.to_string(),
            font_style: DEFAULT_FONT_STYLE.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            synthetic_faces: Vec::new(),
            debug_path: None,
        }
    }

    pub fn page_width(mut self, width: Pt) -> Self {
        self.config.page_width = Some(width);
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.config.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.config.margins = Margins::all(value);
        self
    }

    pub fn default_font(mut self, face: impl Into<String>, style: impl Into<String>, size: i32) -> Self {
        self.font_face = face.into();
        self.font_style = style.into();
        self.font_size = size;
        self
    }

    pub fn max_table_depth(mut self, depth: usize) -> Self {
        self.config.max_table_depth = depth;
        self
    }

    pub fn width_limit(mut self, limit: Pt) -> Self {
        self.config.width_limit = limit;
        self
    }

    pub fn clip_limit(mut self, limit: Pt) -> Self {
        self.config.clip_limit = limit;
        self
    }

    pub fn wrap_loop_limit(mut self, limit: usize) -> Self {
        self.config.wrap_loop_limit = limit;
        self
    }

    pub fn min_slider_length(mut self, length: Pt) -> Self {
        self.scroll.min_slider_length = length;
        self
    }

    pub fn scrollbar_inset(mut self, inset: Pt) -> Self {
        self.scroll.inset = inset;
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, data: Vec<u8>, name: Option<&str>) -> Self {
        self.font_bytes.push((data, name.map(str::to_string)));
        self
    }

    /// Registers a face with a fixed advance of `advance_ratio` em per
    /// character, for hosts without font files.
    pub fn synthetic_face(mut self, face: impl Into<String>, style: impl Into<String>, advance_ratio: f32) -> Self {
        self.synthetic_faces.push((face.into(), style.into(), advance_ratio));
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    fn validate(&self) -> Result<()> {
        let min_page = Pt::from_i32(MIN_PAGE_WIDTH);
        if self.config.max_table_depth < 1 {
            return Err(DocFlowError::InvalidConfiguration(
                "max_table_depth must be at least 1".to_string(),
            ));
        }
        if self.config.width_limit < min_page {
            return Err(DocFlowError::InvalidConfiguration(format!(
                "width_limit must be at least {MIN_PAGE_WIDTH}"
            )));
        }
        if !self.config.clip_limit.is_positive() {
            return Err(DocFlowError::InvalidConfiguration(
                "clip_limit must be positive".to_string(),
            ));
        }
        if self.font_size <= 0 {
            return Err(DocFlowError::InvalidConfiguration(format!(
                "default font size must be positive, got {}",
                self.font_size
            )));
        }
        if let Some(width) = self.config.page_width {
            if width < min_page || width > Pt::from_i32(MAX_PAGE_WIDTH) {
                return Err(DocFlowError::InvalidConfiguration(format!(
                    "page_width {width} outside {MIN_PAGE_WIDTH}..={MAX_PAGE_WIDTH}"
                )));
            }
        }
        if self
            .synthetic_faces
            .iter()
            .any(|(_, _, ratio)| !ratio.is_finite() || *ratio <= 0.0)
        {
            return Err(DocFlowError::InvalidConfiguration(
                "synthetic advance ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(self) -> Result<DocFlow> {
        self.validate()?;
        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir)?;
        }
        for file in &self.font_files {
            registry.register_file(file)?;
        }
        for (data, name) in self.font_bytes {
            registry.register_bytes(data, name.as_deref())?;
        }
        for (face, style, ratio) in &self.synthetic_faces {
            registry.register_synthetic(face, style, *ratio);
        }
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        log::debug!(
            "docflow ready: {} font faces, default {} {} {}px",
            registry.len(),
            self.font_face,
            self.font_style,
            self.font_size
        );
        let fonts = FontCache::new(registry, &self.font_face, &self.font_style, self.font_size);
        Ok(DocFlow {
            fonts: Arc::new(fonts),
            config: self.config,
            scroll: self.scroll,
            debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(width: i32) -> DocFlow {
        DocFlow::builder()
            .default_font("Noto Sans", "Regular", 10)
            .page_width(Pt::from_i32(width))
            .build()
            .expect("valid configuration")
    }

    fn viewport() -> Size {
        Size::new(Pt::from_i32(400), Pt::from_i32(300))
    }

    fn nested_tables(builder: &mut StreamBuilder, levels: usize) {
        builder.table(Table::new()).row(Row::default()).cell(Cell::new(levels as u32), |inner| {
            if levels > 1 {
                nested_tables(inner, levels - 1);
            } else {
                inner.text("deep");
            }
        });
        builder.row_end().table_end();
    }

    #[test]
    fn hello_world_fills_an_exact_page() {
        let _ = env_logger::builder().is_test(true).try_init();
        let flow = flow(66);
        let mut builder = StreamBuilder::new();
        builder
            .font(FontStyle::new("Noto Sans", "Regular", 10))
            .text("Hello World")
            .font_end();
        let mut document = flow.new_document(builder.finish());
        let out = flow.layout(&mut document, viewport());
        assert_eq!(out.segments.len(), 1);
        let segment = &out.segments[0];
        assert_eq!(segment.area.width, Pt::from_i32(66));
        assert_eq!(segment.align_width, segment.area.width);
        assert!(out.warnings.is_empty());
        assert!(!document.needs_layout());
    }

    #[test]
    fn unpreset_columns_take_their_content_width() {
        let flow = flow(400);
        let table = Table::new().with_columns(vec![TableColumn::fixed(50.0), TableColumn::default()]);
        let mut builder = StreamBuilder::new();
        builder
            .table(table)
            .row(Row::default())
            .cell(Cell::new(1), |inner| {
                inner.text("ab");
            })
            .cell(Cell::new(2), |inner| {
                inner.text("abcdefghijklmnopqrst");
            })
            .row_end()
            .table_end();
        let mut document = flow.new_document(builder.finish());
        flow.layout(&mut document, viewport());
        let table = document.stream().payload_at::<Table>(0).expect("table");
        let widths: Vec<Pt> = table.columns.iter().map(|column| column.width).collect();
        assert_eq!(widths, vec![Pt::from_i32(50), Pt::from_i32(120)]);
        assert_eq!(table.width, Pt::from_i32(170));
    }

    #[test]
    fn deep_nesting_is_cut_once_and_layout_continues() {
        let flow = flow(400);
        let mut builder = StreamBuilder::new();
        nested_tables(&mut builder, DEFAULT_MAX_TABLE_DEPTH + 1);
        builder.text("after");
        let mut document = flow.new_document(builder.finish());
        let after = document.stream().len() - 1;
        let out = flow.layout(&mut document, viewport());
        let cut: Vec<&LayoutWarning> = out
            .warnings
            .iter()
            .filter(|warning| matches!(warning, LayoutWarning::TableDepthExceeded { .. }))
            .collect();
        assert_eq!(
            cut,
            vec![&LayoutWarning::TableDepthExceeded {
                depth: DEFAULT_MAX_TABLE_DEPTH + 1,
                index: 0
            }]
        );
        assert!(
            out.segments_of(StreamOwner::Root)
                .any(|segment| segment.start.index as usize == after)
        );
    }

    #[test]
    fn oversized_clips_collapse_with_a_warning() {
        let flow = DocFlow::builder()
            .default_font("Noto Sans", "Regular", 10)
            .clip_limit(Pt::from_i32(5))
            .build()
            .expect("valid configuration");
        let mut widget = WidgetMgr::named("box");
        widget.align = Some(HAlign::Left);
        let mut builder = StreamBuilder::new();
        builder.push(Checkbox::new(widget)).text("x");
        let mut document = flow.new_document(builder.finish());
        let out = flow.layout(&mut document, viewport());
        assert!(
            out.warnings
                .iter()
                .any(|warning| matches!(warning, LayoutWarning::OversizedClip { .. }))
        );
        assert!(out.clips.iter().all(|clip| clip.width() == Pt::ZERO));
    }

    #[test]
    fn right_aligned_lines_offset_by_spare_width() {
        let flow = flow(100);
        let mut builder = StreamBuilder::new();
        builder
            .font(FontStyle::new("Noto Sans", "Regular", 10).with_align(HAlign::Right))
            .formatted("ab\n")
            .font_end();
        let mut document = flow.new_document(builder.finish());
        let out = flow.layout(&mut document, viewport());
        let segment = out.segments.first().expect("segment");
        assert_eq!(segment.align, HAlign::Right);
        assert_eq!(segment.x(segment.area.x, segment.align), Pt::from_i32(88));
    }

    #[test]
    fn layout_many_matches_sequential_layout() {
        let flow = flow(70);
        let texts = ["Hello World", "one two three four", "x"];
        let mut documents: Vec<Document> = texts
            .iter()
            .map(|text| {
                let mut builder = StreamBuilder::new();
                builder.text(text);
                flow.new_document(builder.finish())
            })
            .collect();
        flow.layout_many(&mut documents, viewport());
        for (text, document) in texts.iter().zip(&documents) {
            let mut builder = StreamBuilder::new();
            builder.text(text);
            let mut single = flow.new_document(builder.finish());
            let expected = flow.layout(&mut single, viewport()).segments.clone();
            assert_eq!(document.layout().segments, expected);
        }
        assert_eq!(documents[1].layout().segments.len(), 2);
    }

    #[test]
    fn layout_binds_the_scroll_manager() {
        let flow = flow(400);
        let mut builder = StreamBuilder::new();
        builder.formatted(&"line\n".repeat(40));
        let mut document = flow.new_document(builder.finish());
        flow.layout(&mut document, Size::new(Pt::from_i32(400), Pt::from_i32(120)));
        assert!(document.scroll().is_bound());
        assert!(document.scroll().vbar().is_visible());
        assert!(!document.scroll().hbar().is_visible());
    }

    #[test]
    fn builder_rejects_invalid_settings() {
        let invalid = [
            DocFlow::builder().max_table_depth(0),
            DocFlow::builder().width_limit(Pt::from_i32(10)),
            DocFlow::builder().clip_limit(Pt::ZERO),
            DocFlow::builder().default_font("Noto Sans", "Regular", 0),
            DocFlow::builder().page_width(Pt::from_i32(40_000)),
            DocFlow::builder().synthetic_face("Mono", "Regular", 0.0),
        ];
        for builder in invalid {
            assert!(matches!(builder.build(), Err(DocFlowError::InvalidConfiguration(_))));
        }
        assert!(DocFlow::builder().build().is_ok());
    }

    #[test]
    fn synthetic_faces_resolve_by_name() {
        let flow = DocFlow::builder()
            .synthetic_face("Mono", "Bold", 0.5)
            .build()
            .expect("valid configuration");
        let fonts = flow.font_cache();
        let index = fonts.resolve("Mono", "Bold", 20).expect("registered face");
        assert_eq!(fonts.measure(index, "ab"), Pt::from_i32(20));
    }
}

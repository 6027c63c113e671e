use crate::debug::DebugLogger;
use crate::entity::{EntityKind, IndexEnd, IndexStart, name_hash};
use crate::error::Result;
use crate::font_cache::FontCache;
use crate::layout::{LayoutConfig, LayoutOutput, layout_stream};
use crate::position::{Position, StreamEdit};
use crate::scroll::{ScrollConfig, ScrollManager};
use crate::segment::{LinkArea, Segment, StreamOwner, TabRef, WidgetPlacement};
use crate::stream::Stream;
use crate::types::{Pt, Size};
use crate::widget::{DisposalPolicy, Resource, UiHandle, UiHost};

/// A stream together with its last layout, edit positions, scroll state and
/// the foreign objects it must release.
#[derive(Debug, Clone)]
pub struct Document {
    stream: Stream,
    layout: LayoutOutput,
    pub cursor: Position,
    pub select_start: Position,
    pub select_end: Position,
    resources: Vec<Resource>,
    /// How objects named by entities are released on clear.
    pub object_policy: DisposalPolicy,
    scroll: ScrollManager,
    focus: Option<TabRef>,
    needs_layout: bool,
}

impl Document {
    pub fn new(stream: Stream) -> Self {
        Self::with_scroll(stream, ScrollConfig::default())
    }

    pub fn with_scroll(stream: Stream, scroll: ScrollConfig) -> Self {
        Self {
            stream,
            layout: LayoutOutput::default(),
            cursor: Position::start(),
            select_start: Position::invalid(),
            select_end: Position::invalid(),
            resources: Vec::new(),
            object_policy: DisposalPolicy::Deferred,
            scroll: ScrollManager::new(scroll),
            focus: None,
            needs_layout: true,
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Direct access for structural changes; the next layout recomputes
    /// everything.
    pub fn stream_mut(&mut self) -> &mut Stream {
        self.needs_layout = true;
        &mut self.stream
    }

    pub fn layout(&self) -> &LayoutOutput {
        &self.layout
    }

    pub fn needs_layout(&self) -> bool {
        self.needs_layout
    }

    pub fn scroll(&self) -> &ScrollManager {
        &self.scroll
    }

    pub fn scroll_mut(&mut self) -> &mut ScrollManager {
        &mut self.scroll
    }

    /// Lays the stream out for a viewport of `view` and resizes the scroll
    /// page to match.
    pub fn layout_with(
        &mut self,
        fonts: &FontCache,
        config: &LayoutConfig,
        view: Size,
        debug: Option<DebugLogger>,
    ) -> &LayoutOutput {
        self.layout = layout_stream(&mut self.stream, fonts, config, view.width, debug);
        self.needs_layout = false;
        let page = self.layout.page_size();
        if self.scroll.is_bound() {
            self.scroll.on_view_resized(view.width, view.height);
            self.scroll.on_page_resized(page.width, page.height);
        } else {
            self.scroll.bind(page, view);
        }
        &self.layout
    }

    fn apply_edit(&mut self, edit: &StreamEdit) {
        for position in [&mut self.cursor, &mut self.select_start, &mut self.select_end] {
            position.apply_edit(edit);
        }
        self.stream.mark_tables_dirty();
        self.needs_layout = true;
    }

    pub fn insert_text(&mut self, pos: Position, text: &str) -> Result<()> {
        let edit = self.stream.insert_text(pos, text)?;
        self.apply_edit(&edit);
        Ok(())
    }

    pub fn erase_char(&mut self, pos: Position) -> Result<()> {
        let edit = self.stream.erase_char(pos)?;
        self.apply_edit(&edit);
        Ok(())
    }

    /// The innermost segment under a point; cell content wins over the table
    /// that holds it.
    pub fn segment_at(&self, x: Pt, y: Pt) -> Option<&Segment> {
        self.layout
            .segments
            .iter()
            .rev()
            .find(|segment| segment.contains_point(x, y))
    }

    pub fn link_at(&self, x: Pt, y: Pt) -> Option<&LinkArea> {
        self.layout.links.iter().find(|link| link.area.contains(x, y))
    }

    pub fn widget_at(&self, x: Pt, y: Pt) -> Option<&WidgetPlacement> {
        self.layout
            .widgets
            .iter()
            .rev()
            .find(|widget| widget.rect.contains(x, y))
    }

    /// The root-stream character position nearest to a point, by line and
    /// then by the middle of each character.
    pub fn position_at(&self, fonts: &FontCache, x: Pt, y: Pt) -> Option<Position> {
        let segment = self
            .layout
            .segments_of(StreamOwner::Root)
            .find(|segment| {
                segment.area.height.is_positive() && y >= segment.area.y && y < segment.area.bottom()
            })?;
        let mut cursor = segment.x(segment.area.x, segment.align);
        let mut pos = segment.start;
        while pos < segment.trim_stop {
            let index = pos.entity_index().ok()?;
            match self.stream.text_at(index) {
                Some(text) => {
                    let ch = text.get(pos.offset..).and_then(|rest| rest.chars().next());
                    let Some(ch) = ch else {
                        pos.next_entity();
                        continue;
                    };
                    let font = self
                        .stream
                        .font_at(index)
                        .and_then(|style| style.font_index())
                        .unwrap_or(0);
                    let width = fonts.measure(font, ch.encode_utf8(&mut [0; 4]));
                    if x < cursor + width / 2 {
                        return Some(pos);
                    }
                    cursor += width;
                    if !pos.advance_char(&self.stream).ok()? {
                        break;
                    }
                }
                None => {
                    let inline = self
                        .stream
                        .entity_at(index)
                        .ok()
                        .and_then(|entity| entity.data().widget())
                        .filter(|widget| !widget.is_floating());
                    if let Some(widget) = inline {
                        cursor += widget.full_width();
                    }
                    pos.next_entity();
                }
            }
        }
        Some(segment.trim_stop)
    }

    /// Vertical position recorded for the index named `name` (case
    /// insensitive).
    pub fn index_y(&self, name: &str) -> Option<Pt> {
        let hash = name_hash(name);
        self.stream.entries().iter().find_map(|entry| {
            let marker = self.stream.store().lookup_as::<IndexStart>(entry.uid).ok()?;
            (marker.name_hash == hash && marker.name.eq_ignore_ascii_case(name)).then_some(marker.y)
        })
    }

    /// Scrolls so the index named `name` starts at the top of the view,
    /// unless it is already inside it. Returns whether the index exists.
    pub fn show_index(&mut self, name: &str) -> bool {
        let Some(y) = self.index_y(name) else {
            return false;
        };
        let (_, top) = self.scroll.scroll_position();
        if y < top || y >= top + self.scroll.view().height {
            self.scroll.scroll_by(Pt::ZERO, top - y);
        }
        true
    }

    pub fn focused_tab(&self) -> Option<TabRef> {
        self.focus
    }

    /// Moves keyboard focus to the next (or previous) active tab stop,
    /// wrapping at either end.
    pub fn advance_tab(&mut self, forward: bool) -> Option<TabRef> {
        let stops: Vec<TabRef> = self
            .layout
            .tabs
            .iter()
            .filter(|tab| tab.active)
            .map(|tab| tab.reference)
            .collect();
        let count = stops.len();
        if count == 0 {
            self.focus = None;
            return None;
        }
        let current = self
            .focus
            .and_then(|focus| stops.iter().position(|stop| *stop == focus));
        let next = match (current, forward) {
            (Some(at), true) => (at + 1) % count,
            (Some(at), false) => (at + count - 1) % count,
            (None, true) => 0,
            (None, false) => count - 1,
        };
        self.focus = Some(stops[next]);
        self.focus
    }

    /// Shows or hides every index named `name` and recomputes which nested
    /// indexes are visible. Returns whether any index matched.
    pub fn set_index_visible(&mut self, name: &str, visible: bool) -> bool {
        let hash = name_hash(name);
        let mut found = false;
        for entity in self.stream.store_mut().iter_mut() {
            if let Some(marker) = entity.payload_mut::<IndexStart>() {
                if marker.name_hash == hash && marker.name.eq_ignore_ascii_case(name) {
                    marker.visible = visible;
                    found = true;
                }
            }
        }
        if found {
            self.propagate_index_visibility();
            self.needs_layout = true;
        }
        found
    }

    fn propagate_index_visibility(&mut self) {
        let mut open: Vec<(i32, bool)> = Vec::new();
        for index in 0..self.stream.len() {
            let Some(entry) = self.stream.entry(index) else {
                break;
            };
            match entry.kind {
                EntityKind::Index => {
                    let parent_visible = open.iter().all(|&(_, shown)| shown);
                    if let Ok(marker) = self.stream.payload_at_mut::<IndexStart>(index) {
                        marker.parent_visible = parent_visible;
                        open.push((marker.id, marker.is_shown()));
                    }
                }
                EntityKind::IndexEnd => {
                    let id = self.stream.payload_at::<IndexEnd>(index).map(|end| end.id);
                    if let Ok(id) = id {
                        if let Some(at) = open.iter().rposition(|&(open_id, _)| open_id == id) {
                            open.truncate(at);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Text between the selection ends, in document order.
    pub fn selected_text(&self) -> Result<String> {
        if !self.select_start.is_valid() || !self.select_end.is_valid() {
            return Ok(String::new());
        }
        let (start, stop) = if self.select_start <= self.select_end {
            (self.select_start, self.select_end)
        } else {
            (self.select_end, self.select_start)
        };
        self.stream.text_in(start, stop)
    }

    pub fn add_resource(&mut self, handle: UiHandle, policy: DisposalPolicy) {
        self.resources.push(Resource::new(handle, policy));
    }

    /// The stream that `owner` refers to: the root or a cell or button
    /// sub-stream.
    pub fn find_stream(&self, owner: StreamOwner) -> Option<&Stream> {
        match owner {
            StreamOwner::Root => Some(&self.stream),
            StreamOwner::Entity(uid) => self.stream.find_sub_stream(uid),
        }
    }

    /// Drops all content. Registered resources and objects named by entities
    /// go back to `host`; every position is invalidated.
    pub fn clear(&mut self, host: &dyn UiHost, terminating: bool) {
        let mut handles = Vec::new();
        self.stream.collect_ui_handles(&mut handles);
        let released = self.resources.len() + handles.len();
        for resource in self.resources.drain(..) {
            resource.release(host, terminating);
        }
        for handle in handles {
            Resource::new(handle, self.object_policy).release(host, terminating);
        }
        self.stream.clear();
        self.layout = LayoutOutput::default();
        self.cursor.reset();
        self.select_start.reset();
        self.select_end.reset();
        self.focus = None;
        self.needs_layout = true;
        log::debug!("document cleared; {released} foreign objects released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Link, TextRun, XmlObject};
    use crate::font::FontRegistry;
    use crate::stream::StreamBuilder;
    use crate::table::{Cell, Row, Table};
    use crate::widget::{Checkbox, WidgetMgr};
    use std::cell::RefCell;

    fn fonts() -> FontCache {
        FontCache::new(FontRegistry::new(), "Noto Sans", "Regular", 10)
    }

    fn laid_out(stream: Stream) -> Document {
        let mut document = Document::new(stream);
        document.layout_with(
            &fonts(),
            &LayoutConfig::default(),
            Size::new(Pt::from_i32(400), Pt::from_i32(300)),
            None,
        );
        document
    }

    #[derive(Default)]
    struct Host {
        freed: RefCell<Vec<UiHandle>>,
        posted: RefCell<Vec<UiHandle>>,
    }

    impl UiHost for Host {
        fn free(&self, handle: UiHandle) {
            self.freed.borrow_mut().push(handle);
        }

        fn post_free(&self, handle: UiHandle) {
            self.posted.borrow_mut().push(handle);
        }
    }

    #[test]
    fn edits_move_the_cursor_and_dirty_tables() {
        let mut builder = StreamBuilder::new();
        builder.text("Hello World").table(Table::new()).table_end();
        let mut document = laid_out(builder.finish());
        assert!(!document.stream().payload_at::<Table>(1).expect("table").compute_columns);

        document.cursor = Position::new(0, 6);
        document.insert_text(Position::new(0, 5), ",").expect("insert");
        assert_eq!(document.cursor, Position::new(0, 7));
        assert_eq!(document.stream().text_at(0), Some("Hello, World"));
        assert!(document.stream().payload_at::<Table>(1).expect("table").compute_columns);
        assert!(document.needs_layout());

        document.erase_char(Position::new(0, 0)).expect("erase");
        assert_eq!(document.cursor, Position::new(0, 6));
    }

    #[test]
    fn hit_tests_find_links_and_widgets() {
        let mut builder = StreamBuilder::new();
        builder
            .link(Link::href("https://example.org"))
            .text("link")
            .link_end()
            .text(" ")
            .push(Checkbox::new(WidgetMgr::named("box")));
        let document = laid_out(builder.finish());
        let link = document.link_at(Pt::from_i32(5), Pt::from_i32(5)).expect("link");
        assert_eq!(Some(link.link), document.stream().entry(0).map(|e| e.uid));
        assert!(document.link_at(Pt::from_i32(100), Pt::from_i32(5)).is_none());
        let widget = document.widget_at(Pt::from_i32(35), Pt::from_i32(5)).expect("checkbox");
        assert_eq!(widget.kind, EntityKind::Checkbox);
        assert!(document.segment_at(Pt::from_i32(5), Pt::from_i32(5)).is_some());
    }

    #[test]
    fn points_map_to_character_positions() {
        let mut builder = StreamBuilder::new();
        builder.text("Hello World");
        let document = laid_out(builder.finish());
        let fonts = fonts();
        // Characters are 6 wide; the space spans 30..36 and "W" 36..42.
        assert_eq!(document.position_at(&fonts, Pt::from_i32(31), Pt::from_i32(4)), Some(Position::new(0, 5)));
        assert_eq!(document.position_at(&fonts, Pt::from_i32(40), Pt::from_i32(4)), Some(Position::new(0, 7)));
        let line_end = document.layout().segments[0].trim_stop;
        assert_eq!(document.position_at(&fonts, Pt::from_i32(300), Pt::from_i32(4)), Some(line_end));
        assert_eq!(document.position_at(&fonts, Pt::from_i32(5), Pt::from_i32(200)), None);
    }

    #[test]
    fn hiding_an_index_hides_its_children() {
        let mut builder = StreamBuilder::new();
        builder
            .text("top")
            .index("Outer", 1)
            .index("inner", 2)
            .text("x")
            .index_end(2)
            .index_end(1);
        let mut document = laid_out(builder.finish());
        assert!(document.set_index_visible("OUTER", false));
        let inner = document.stream().payload_at::<IndexStart>(2).expect("inner");
        assert!(inner.visible);
        assert!(!inner.parent_visible);
        assert!(!document.set_index_visible("missing", false));

        document.set_index_visible("outer", true);
        assert!(document.stream().payload_at::<IndexStart>(2).expect("inner").parent_visible);
        assert_eq!(document.index_y("Inner"), Some(Pt::ZERO));
    }

    #[test]
    fn showing_an_index_scrolls_it_to_the_top() {
        let mut builder = StreamBuilder::new();
        builder
            .formatted(&"\n".repeat(30))
            .index("Target", 1)
            .text("here")
            .index_end(1)
            .formatted(&"\n".repeat(30));
        let mut document = laid_out(builder.finish());
        let y = document.index_y("target").expect("index");
        assert!(y > Pt::from_i32(300));

        assert!(document.show_index("TARGET"));
        assert_eq!(document.scroll().scroll_position().1, y);
        assert!(document.show_index("target"));
        assert_eq!(document.scroll().scroll_position().1, y);
        assert!(!document.show_index("missing"));
    }

    #[test]
    fn tab_focus_cycles_through_active_stops() {
        let mut builder = StreamBuilder::new();
        builder
            .link(Link::href("a"))
            .text("a")
            .link_end()
            .text(" ")
            .push(Checkbox::new(WidgetMgr::named("box")));
        let mut document = laid_out(builder.finish());
        let link = TabRef::Link(document.stream().entry(0).expect("link").uid);
        let checkbox = TabRef::Vector(document.stream().entry(4).expect("checkbox").uid);

        assert_eq!(document.advance_tab(true), Some(link));
        assert_eq!(document.advance_tab(true), Some(checkbox));
        assert_eq!(document.advance_tab(true), Some(link));
        assert_eq!(document.advance_tab(false), Some(checkbox));

        document.layout.tabs[0].active = false;
        assert_eq!(document.advance_tab(true), Some(checkbox));
        assert_eq!(document.focused_tab(), Some(checkbox));
        document.clear(&Host::default(), false);
        assert_eq!(document.focused_tab(), None);
        assert_eq!(document.advance_tab(true), None);
    }

    #[test]
    fn relayout_widens_the_scroll_page_with_the_content() {
        let mut builder = StreamBuilder::new();
        builder.text("short");
        let mut document = laid_out(builder.finish());
        assert!(!document.scroll().hbar().is_visible());

        document
            .insert_text(Position::new(0, 5), &"W".repeat(150))
            .expect("insert");
        let view = Size::new(Pt::from_i32(400), Pt::from_i32(300));
        let page = document
            .layout_with(&fonts(), &LayoutConfig::default(), view, None)
            .page_size();
        assert!(page.width > Pt::from_i32(400));
        assert_eq!(document.scroll().page().width, page.width);
        assert!(document.scroll().hbar().is_visible());
    }

    #[test]
    fn selection_reads_text_in_order() {
        let mut builder = StreamBuilder::new();
        builder.text("abc").push(Link::href("x")).text("def");
        let mut document = Document::new(builder.finish());
        document.select_start = Position::new(2, 2);
        document.select_end = Position::new(0, 1);
        assert_eq!(document.selected_text().expect("text"), "bcde");
    }

    #[test]
    fn cell_owners_resolve_to_their_streams() {
        let mut builder = StreamBuilder::new();
        builder
            .table(Table::new())
            .row(Row::default())
            .cell(Cell::new(9), |inner| {
                inner.text("inside");
            })
            .row_end()
            .table_end();
        let document = laid_out(builder.finish());
        let segment = document
            .segment_at(Pt::from_i32(5), Pt::from_i32(5))
            .expect("cell segment");
        let stream = document.find_stream(segment.owner).expect("sub-stream");
        assert_eq!(stream.payload_at::<TextRun>(0).map(|run| run.text.as_str()).ok(), Some("inside"));
    }

    #[test]
    fn clearing_releases_objects_and_invalidates_positions() {
        let mut widget = WidgetMgr::named("box");
        widget.viewport = Some(UiHandle(7));
        let mut builder = StreamBuilder::new();
        builder
            .text("x")
            .push(Checkbox::new(widget))
            .push(XmlObject {
                object: Some(UiHandle(8)),
                owned: true,
            })
            .push(XmlObject {
                object: Some(UiHandle(9)),
                owned: false,
            });
        let mut document = Document::new(builder.finish());
        document.add_resource(UiHandle(1), DisposalPolicy::Immediate);
        document.add_resource(UiHandle(2), DisposalPolicy::Never);
        document.select_start = Position::new(0, 0);

        let host = Host::default();
        document.clear(&host, false);
        assert_eq!(*host.freed.borrow(), vec![UiHandle(1)]);
        let mut posted = host.posted.borrow().clone();
        posted.sort_by_key(|handle| handle.0);
        assert_eq!(posted, vec![UiHandle(7), UiHandle(8)]);
        assert!(document.stream().is_empty());
        assert!(!document.cursor.is_valid());
        assert!(!document.select_start.is_valid());
        assert!(document.selected_text().expect("empty").is_empty());
    }
}

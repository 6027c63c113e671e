use crate::entity::{
    Advance, Entity, EntityData, EntityKind, EntityPayload, FontEnd, IndexEnd, IndexStart, Link,
    LinkEnd, List, ListEnd, Paragraph, ParagraphEnd, RowEnd, TableEnd, TextRun, Uid,
};
use crate::error::{DocFlowError, Result};
use crate::length::Length;
use crate::position::{Position, StreamEdit};
use crate::store::EntityStore;
use crate::style::FontStyle;
use crate::table::{Cell, Row, Table};
use crate::widget::{Button, UiHandle};

/// One step of document order: which entity, and what kind it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEntry {
    pub kind: EntityKind,
    pub uid: Uid,
}

/// Document order over an entity store. The stream owns its store; cells and
/// buttons own nested streams of their own.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: Vec<StreamEntry>,
    store: EntityStore,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<StreamEntry> {
        self.entries.get(index).copied()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn end(&self) -> Position {
        Position::at(self.entries.len(), 0)
    }

    fn entry_at(&self, index: usize) -> Result<StreamEntry> {
        self.entry(index)
            .ok_or(DocFlowError::InvalidPosition(Position::at(index, 0)))
    }

    pub fn entity_at(&self, index: usize) -> Result<&Entity> {
        let entry = self.entry_at(index)?;
        self.store.lookup(entry.uid)
    }

    pub fn entity_at_mut(&mut self, index: usize) -> Result<&mut Entity> {
        let entry = self.entry_at(index)?;
        self.store.lookup_mut(entry.uid)
    }

    pub fn payload_at<T: EntityPayload>(&self, index: usize) -> Result<&T> {
        let entry = self.entry_at(index)?;
        self.store.lookup_as::<T>(entry.uid)
    }

    pub fn payload_at_mut<T: EntityPayload>(&mut self, index: usize) -> Result<&mut T> {
        let entry = self.entry_at(index)?;
        self.store.lookup_as_mut::<T>(entry.uid)
    }

    /// Text of the entity at `index`, if it is a text run.
    pub fn text_at(&self, index: usize) -> Option<&str> {
        let entry = self.entry(index)?;
        if entry.kind != EntityKind::Text {
            return None;
        }
        self.store
            .get(entry.uid)?
            .payload::<TextRun>()
            .map(|run| run.text.as_str())
    }

    pub fn push(&mut self, data: impl Into<EntityData>) -> Uid {
        self.push_entity(Entity::new(data))
    }

    pub fn push_entity(&mut self, entity: Entity) -> Uid {
        let kind = entity.kind();
        let uid = self.store.insert(entity);
        self.entries.push(StreamEntry { kind, uid });
        uid
    }

    /// Inserts an entity at `pos`. A position inside a text run splits it and
    /// the new entity goes between the halves.
    pub fn insert(&mut self, pos: Position, data: impl Into<EntityData>) -> Result<(Uid, StreamEdit)> {
        let index = pos.entity_index()?;
        if index > self.entries.len() {
            return Err(DocFlowError::InvalidPosition(pos));
        }
        let entity = Entity::new(data);
        if pos.offset == 0 {
            let uid = self.insert_entity_at(index, entity);
            return Ok((uid, StreamEdit::EntityInserted { index, split: None }));
        }

        let uid = self.entry_at(index)?.uid;
        let run = self
            .store
            .lookup_mut(uid)?
            .payload_mut::<TextRun>()
            .ok_or(DocFlowError::NotText(pos))?;
        if !run.text.is_char_boundary(pos.offset) {
            return Err(DocFlowError::InvalidPosition(pos));
        }
        if pos.offset == run.text.len() {
            let uid = self.insert_entity_at(index + 1, entity);
            return Ok((
                uid,
                StreamEdit::EntityInserted {
                    index: index + 1,
                    split: None,
                },
            ));
        }
        let tail = TextRun {
            text: run.text.split_off(pos.offset),
            formatted: run.formatted,
            segment: None,
        };
        let uid = self.insert_entity_at(index + 1, entity);
        self.insert_entity_at(index + 2, Entity::new(tail));
        Ok((
            uid,
            StreamEdit::EntityInserted {
                index: index + 1,
                split: Some(pos.offset),
            },
        ))
    }

    fn insert_entity_at(&mut self, index: usize, entity: Entity) -> Uid {
        let kind = entity.kind();
        let uid = self.store.insert(entity);
        self.entries.insert(index, StreamEntry { kind, uid });
        uid
    }

    /// Inserts `text` at `pos`: into the addressed run, onto the end of a run
    /// just before `pos`, or as a new run.
    pub fn insert_text(&mut self, pos: Position, text: &str) -> Result<StreamEdit> {
        let index = pos.entity_index()?;
        if index > self.entries.len() {
            return Err(DocFlowError::InvalidPosition(pos));
        }
        if self.text_at(index).is_some() {
            let run = self.payload_at_mut::<TextRun>(index)?;
            if pos.offset > run.text.len() || !run.text.is_char_boundary(pos.offset) {
                return Err(DocFlowError::InvalidPosition(pos));
            }
            run.text.insert_str(pos.offset, text);
            return Ok(StreamEdit::TextInserted {
                index,
                offset: pos.offset,
                len: text.len(),
            });
        }
        if pos.offset != 0 {
            return Err(DocFlowError::NotText(pos));
        }
        if index > 0 && self.text_at(index - 1).is_some() {
            let run = self.payload_at_mut::<TextRun>(index - 1)?;
            let offset = run.text.len();
            run.text.push_str(text);
            return Ok(StreamEdit::TextInserted {
                index: index - 1,
                offset,
                len: text.len(),
            });
        }
        self.insert_entity_at(index, Entity::new(TextRun::new(text)));
        Ok(StreamEdit::EntityInserted { index, split: None })
    }

    /// Removes the character at `pos`.
    pub fn erase_char(&mut self, pos: Position) -> Result<StreamEdit> {
        let index = pos.entity_index()?;
        if self.text_at(index).is_none() {
            return Err(DocFlowError::NotText(pos));
        }
        let run = self.payload_at_mut::<TextRun>(index)?;
        let ch = run
            .text
            .get(pos.offset..)
            .and_then(|rest| rest.chars().next())
            .ok_or(DocFlowError::InvalidPosition(pos))?;
        let len = ch.len_utf8();
        run.text.replace_range(pos.offset..pos.offset + len, "");
        Ok(StreamEdit::TextErased {
            index,
            offset: pos.offset,
            len,
        })
    }

    pub fn remove(&mut self, index: usize) -> Result<(Entity, StreamEdit)> {
        let entry = self.entry_at(index)?;
        let entity = self
            .store
            .remove(entry.uid)
            .ok_or(DocFlowError::EntityNotFound(entry.uid))?;
        self.entries.remove(index);
        Ok((entity, StreamEdit::EntityRemoved { index }))
    }

    pub fn char_at(&self, pos: Position) -> Result<Option<char>> {
        let index = pos.entity_index()?;
        if index >= self.entries.len() {
            return Err(DocFlowError::InvalidPosition(pos));
        }
        match self.text_at(index) {
            Some(text) => Ok(text.get(pos.offset..).and_then(|rest| rest.chars().next())),
            None => Ok(None),
        }
    }

    /// Index of the end marker closing the opener at `index`, honouring
    /// nesting. Index markers pair by id.
    pub fn find_matching_end(&self, index: usize) -> Option<usize> {
        let opener = self.entry(index)?;
        let closing = opener.kind.closing()?;
        if opener.kind == EntityKind::Index {
            let id = self.store.lookup_as::<IndexStart>(opener.uid).ok()?.id;
            return (index + 1..self.entries.len()).find(|&i| {
                self.entries[i].kind == EntityKind::IndexEnd
                    && self
                        .store
                        .lookup_as::<IndexEnd>(self.entries[i].uid)
                        .is_ok_and(|end| end.id == id)
            });
        }
        let mut depth = 0usize;
        for (i, entry) in self.entries.iter().enumerate().skip(index + 1) {
            if entry.kind == opener.kind {
                depth += 1;
            } else if entry.kind == closing {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
        }
        None
    }

    pub fn find_cell(&self, cell_id: u32) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.kind == EntityKind::Cell
                && self
                    .store
                    .lookup_as::<Cell>(entry.uid)
                    .is_ok_and(|cell| cell.cell_id == cell_id)
        })
    }

    pub fn find_edit_cell(&self, edit_def: &str) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.kind == EntityKind::Cell
                && self
                    .store
                    .lookup_as::<Cell>(entry.uid)
                    .is_ok_and(|cell| cell.edit_def.as_deref() == Some(edit_def))
        })
    }

    /// Concatenated text between two positions of this stream.
    pub fn text_in(&self, start: Position, stop: Position) -> Result<String> {
        let first = start.entity_index()?;
        let last = stop.entity_index()?;
        let mut out = String::new();
        for index in first..=last.min(self.entries.len().saturating_sub(1)) {
            let Some(text) = self.text_at(index) else {
                continue;
            };
            let from = if index == first { start.offset } else { 0 };
            let to = if index == last { stop.offset } else { text.len() };
            if from >= to {
                continue;
            }
            let piece = text
                .get(from..to.min(text.len()))
                .ok_or(DocFlowError::InvalidPosition(start))?;
            out.push_str(piece);
        }
        Ok(out)
    }

    /// The font style in effect at `index`, found by walking back over
    /// balanced font markers.
    pub fn font_at(&self, index: usize) -> Option<&FontStyle> {
        let mut depth = 0usize;
        for i in (0..index.min(self.entries.len())).rev() {
            match self.entries[i].kind {
                EntityKind::FontEnd => depth += 1,
                EntityKind::Font if depth > 0 => depth -= 1,
                EntityKind::Font => {
                    return self.store.lookup_as::<FontStyle>(self.entries[i].uid).ok();
                }
                _ => {}
            }
        }
        None
    }

    /// Foreign UI objects named anywhere in this stream or its sub-streams.
    pub(crate) fn collect_ui_handles(&self, out: &mut Vec<UiHandle>) {
        for entity in self.store.iter() {
            out.extend(entity.ui_handles());
            match entity.data() {
                EntityData::Cell(cell) => cell.stream.collect_ui_handles(out),
                EntityData::Button(button) => button.stream.collect_ui_handles(out),
                _ => {}
            }
        }
    }

    /// Flags every table, nested ones included, for column recomputation.
    pub fn mark_tables_dirty(&mut self) {
        for entity in self.store.iter_mut() {
            match entity.data_mut() {
                EntityData::Table(table) => table.mark_dirty(),
                EntityData::Cell(cell) => cell.stream.mark_tables_dirty(),
                EntityData::Button(button) => button.stream.mark_tables_dirty(),
                _ => {}
            }
        }
    }

    /// Finds the sub-stream owned by the cell or button `owner`, searching
    /// nested streams depth first.
    pub fn find_sub_stream(&self, owner: Uid) -> Option<&Stream> {
        for entity in self.store.iter() {
            let nested = match entity.data() {
                EntityData::Cell(cell) => &cell.stream,
                EntityData::Button(button) => &button.stream,
                _ => continue,
            };
            if entity.uid() == owner {
                return Some(nested);
            }
            if let Some(found) = nested.find_sub_stream(owner) {
                return Some(found);
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.store.clear();
    }
}

/// Appends entities in document order; the construction side of a stream.
#[derive(Debug, Default)]
pub struct StreamBuilder {
    stream: Stream,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: impl Into<EntityData>) -> &mut Self {
        self.stream.push(data);
        self
    }

    /// Appends and returns the new entity's uid.
    pub fn append(&mut self, data: impl Into<EntityData>) -> Uid {
        self.stream.push(data)
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.push(TextRun::new(text))
    }

    pub fn formatted(&mut self, text: &str) -> &mut Self {
        self.push(TextRun::formatted(text))
    }

    pub fn advance(&mut self, x: Length, y: Length) -> &mut Self {
        self.push(Advance { x, y })
    }

    pub fn font(&mut self, style: FontStyle) -> &mut Self {
        self.push(style)
    }

    pub fn font_end(&mut self) -> &mut Self {
        self.push(FontEnd)
    }

    pub fn paragraph(&mut self, paragraph: Paragraph) -> &mut Self {
        self.push(paragraph)
    }

    pub fn paragraph_end(&mut self) -> &mut Self {
        self.push(ParagraphEnd)
    }

    pub fn list(&mut self, list: List) -> &mut Self {
        self.push(list)
    }

    pub fn list_end(&mut self) -> &mut Self {
        self.push(ListEnd)
    }

    pub fn link(&mut self, link: Link) -> &mut Self {
        self.push(link)
    }

    pub fn link_end(&mut self) -> &mut Self {
        self.push(LinkEnd)
    }

    pub fn index(&mut self, name: &str, id: i32) -> &mut Self {
        self.push(IndexStart::new(name, id))
    }

    pub fn index_end(&mut self, id: i32) -> &mut Self {
        self.push(IndexEnd { id })
    }

    pub fn table(&mut self, table: Table) -> &mut Self {
        self.push(table)
    }

    pub fn table_end(&mut self) -> &mut Self {
        self.push(TableEnd)
    }

    pub fn row(&mut self, row: Row) -> &mut Self {
        self.push(row)
    }

    pub fn row_end(&mut self) -> &mut Self {
        self.push(RowEnd)
    }

    /// Appends a cell whose content is built by `build`.
    pub fn cell(&mut self, mut cell: Cell, build: impl FnOnce(&mut StreamBuilder)) -> &mut Self {
        let mut inner = StreamBuilder::new();
        build(&mut inner);
        cell.stream = inner.finish();
        self.push(cell)
    }

    pub fn cell_stream(&mut self, mut cell: Cell, stream: Stream) -> &mut Self {
        cell.stream = stream;
        self.push(cell)
    }

    pub fn button(&mut self, mut button: Button, build: impl FnOnce(&mut StreamBuilder)) -> &mut Self {
        let mut inner = StreamBuilder::new();
        build(&mut inner);
        button.stream = inner.finish();
        self.push(button)
    }

    pub fn finish(self) -> Stream {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stream {
        let mut builder = StreamBuilder::new();
        builder
            .font(FontStyle::default())
            .text("Hello World")
            .font_end();
        builder.finish()
    }

    #[test]
    fn insert_inside_text_splits_the_run() {
        let mut stream = sample();
        let (uid, edit) = stream
            .insert(Position::new(1, 5), Link::href("x"))
            .expect("insert");
        assert_eq!(stream.len(), 5);
        assert_eq!(stream.text_at(1), Some("Hello"));
        assert_eq!(stream.entry(2).map(|e| e.uid), Some(uid));
        assert_eq!(stream.text_at(3), Some(" World"));
        assert_eq!(
            edit,
            StreamEdit::EntityInserted {
                index: 2,
                split: Some(5)
            }
        );

        let mut cursor = Position::new(1, 7);
        cursor.apply_edit(&edit);
        assert_eq!(stream.char_at(cursor).expect("valid"), Some('o'));
    }

    #[test]
    fn text_insert_and_erase_report_edits() {
        let mut stream = sample();
        let edit = stream
            .insert_text(Position::new(1, 5), ",")
            .expect("insert text");
        assert_eq!(stream.text_at(1), Some("Hello, World"));
        assert_eq!(
            edit,
            StreamEdit::TextInserted {
                index: 1,
                offset: 5,
                len: 1
            }
        );
        stream.erase_char(Position::new(1, 0)).expect("erase");
        assert_eq!(stream.text_at(1), Some("ello, World"));
        assert!(matches!(
            stream.erase_char(Position::new(0, 0)),
            Err(DocFlowError::NotText(_))
        ));
    }

    #[test]
    fn text_at_a_control_boundary_extends_the_previous_run() {
        let mut stream = sample();
        let edit = stream.insert_text(Position::new(2, 0), "!").expect("insert");
        assert_eq!(stream.text_at(1), Some("Hello World!"));
        assert!(matches!(edit, StreamEdit::TextInserted { index: 1, .. }));
        let edit = stream.insert_text(Position::new(0, 0), ">").expect("insert");
        assert_eq!(edit, StreamEdit::EntityInserted { index: 0, split: None });
        assert_eq!(stream.text_at(0), Some(">"));
    }

    #[test]
    fn matching_ends_respect_nesting_and_ids() {
        let mut builder = StreamBuilder::new();
        builder
            .font(FontStyle::default())
            .font(FontStyle::default())
            .font_end()
            .font_end()
            .index("a", 7)
            .index("b", 8)
            .index_end(7)
            .index_end(8);
        let stream = builder.finish();
        assert_eq!(stream.find_matching_end(0), Some(3));
        assert_eq!(stream.find_matching_end(1), Some(2));
        assert_eq!(stream.find_matching_end(4), Some(6));
        assert_eq!(stream.find_matching_end(5), Some(7));
        assert_eq!(stream.find_matching_end(2), None);
    }

    #[test]
    fn text_between_positions_skips_controls() {
        let mut builder = StreamBuilder::new();
        builder
            .text("abc")
            .font(FontStyle::default())
            .text("def")
            .font_end();
        let stream = builder.finish();
        let text = stream
            .text_in(Position::new(0, 1), Position::new(2, 2))
            .expect("valid");
        assert_eq!(text, "bcde");
    }

    #[test]
    fn font_lookup_skips_closed_styles() {
        let mut builder = StreamBuilder::new();
        builder
            .font(FontStyle::new("Outer", "Regular", 10))
            .font(FontStyle::new("Inner", "Regular", 10))
            .font_end()
            .text("x");
        let stream = builder.finish();
        assert_eq!(stream.font_at(4).map(|f| f.face.as_str()), Some("Outer"));
        assert_eq!(stream.font_at(0), None);
    }

    #[test]
    fn finds_cells_and_their_streams() {
        let mut builder = StreamBuilder::new();
        builder
            .table(Table::new())
            .row(Row::default())
            .cell(Cell::new(3).with_edit_def("notes"), |inner| {
                inner.text("inside");
            })
            .row_end()
            .table_end();
        let stream = builder.finish();
        let index = stream.find_cell(3).expect("cell");
        assert_eq!(stream.find_edit_cell("notes"), Some(index));
        let uid = stream.entry(index).expect("entry").uid;
        let nested = stream.find_sub_stream(uid).expect("sub-stream");
        assert_eq!(nested.text_at(0), Some("inside"));
    }
}

use crate::error::{DocFlowError, Result};
use crate::stream::Stream;
use std::fmt;

/// A place in a stream: the entity index plus a byte offset inside it.
///
/// Offsets are only meaningful for text entities; every other entity is
/// addressed at offset 0. Positions order by index, then offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub index: i32,
    pub offset: usize,
}

/// A mutation applied to a stream, described so outstanding positions can
/// follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEdit {
    TextInserted {
        index: usize,
        offset: usize,
        len: usize,
    },
    TextErased {
        index: usize,
        offset: usize,
        len: usize,
    },
    /// An entity now lives at `index`. With `split`, the text that was at
    /// `index - 1` was cut at that byte offset and its tail moved to
    /// `index + 1`.
    EntityInserted { index: usize, split: Option<usize> },
    EntityRemoved { index: usize },
}

impl Default for Position {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Position {
    pub const fn new(index: i32, offset: usize) -> Self {
        Self { index, offset }
    }

    pub const fn start() -> Self {
        Self::new(0, 0)
    }

    pub const fn invalid() -> Self {
        Self::new(-1, 0)
    }

    pub(crate) fn at(index: usize, offset: usize) -> Self {
        Self::new(i32::try_from(index).unwrap_or(i32::MAX), offset)
    }

    pub fn reset(&mut self) {
        *self = Self::invalid();
    }

    pub fn is_valid(&self) -> bool {
        self.index >= 0
    }

    /// The entity index, or an error for an invalidated position.
    pub fn entity_index(&self) -> Result<usize> {
        usize::try_from(self.index).map_err(|_| DocFlowError::InvalidPosition(*self))
    }

    pub fn next_entity(&mut self) {
        if self.is_valid() {
            self.index += 1;
            self.offset = 0;
        }
    }

    /// Steps to the start of the previous entity; stepping before the first
    /// entity invalidates the position.
    pub fn prev_entity(&mut self) {
        self.offset = 0;
        self.index -= 1;
        if self.index < 0 {
            self.reset();
        }
    }

    /// Moves forward one character. Returns `false` at the end of the stream.
    pub fn advance_char(&mut self, stream: &Stream) -> Result<bool> {
        let index = self.entity_index()?;
        if index >= stream.len() {
            return Ok(false);
        }
        if let Some(text) = stream.text_at(index) {
            let rest = text
                .get(self.offset..)
                .ok_or(DocFlowError::InvalidPosition(*self))?;
            if let Some(ch) = rest.chars().next() {
                self.offset += ch.len_utf8();
                if self.offset < text.len() {
                    return Ok(true);
                }
            }
        }
        self.next_entity();
        Ok(true)
    }

    /// Moves back one character, crossing into the previous entity when at
    /// offset 0. Returns `false` (and invalidates) when stepping before the
    /// first entity.
    pub fn retreat_char(&mut self, stream: &Stream) -> Result<bool> {
        let index = self.entity_index()?;
        if self.offset > 0 {
            let text = stream.text_at(index).ok_or(DocFlowError::NotText(*self))?;
            let head = text
                .get(..self.offset)
                .ok_or(DocFlowError::InvalidPosition(*self))?;
            self.offset = head.char_indices().next_back().map(|(i, _)| i).unwrap_or(0);
            return Ok(true);
        }
        if index == 0 {
            self.reset();
            return Ok(false);
        }
        self.prev_entity();
        if let Some(text) = stream.text_at(index - 1) {
            self.offset = text.char_indices().next_back().map(|(i, _)| i).unwrap_or(0);
        }
        Ok(true)
    }

    /// Adjusts this position for a mutation made elsewhere in the stream.
    pub fn apply_edit(&mut self, edit: &StreamEdit) {
        let Ok(current) = self.entity_index() else {
            return;
        };
        match *edit {
            StreamEdit::TextInserted { index, offset, len } => {
                if current == index && self.offset >= offset {
                    self.offset += len;
                }
            }
            StreamEdit::TextErased { index, offset, len } => {
                if current == index {
                    if self.offset >= offset + len {
                        self.offset -= len;
                    } else if self.offset > offset {
                        self.offset = offset;
                    }
                }
            }
            StreamEdit::EntityInserted { index, split: None } => {
                if current >= index {
                    self.index += 1;
                }
            }
            StreamEdit::EntityInserted {
                index,
                split: Some(split),
            } => {
                if current + 1 == index && self.offset > split {
                    self.index += 2;
                    self.offset -= split;
                } else if current >= index {
                    self.index += 2;
                }
            }
            StreamEdit::EntityRemoved { index } => {
                if current > index {
                    self.index -= 1;
                } else if current == index {
                    self.offset = 0;
                }
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.index, self.offset)
        } else {
            f.write_str("invalid")
        }
    }
}

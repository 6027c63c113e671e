use crate::length::Length;
use crate::style::FontStyle;
use crate::table::{Cell, Row, Table};
use crate::types::Pt;
use crate::widget::{Button, Checkbox, Combobox, ImageWidget, Input, UiHandle, Widget, WidgetMgr};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_UID: AtomicU32 = AtomicU32::new(1);

/// Process-unique entity identifier. Zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u32);

impl Uid {
    pub(crate) fn next() -> Uid {
        Uid(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Implemented by every entity payload so the store can narrow an entity to
/// its concrete kind.
pub trait EntityPayload: Sized {
    const KIND: EntityKind;
    fn narrow(data: &EntityData) -> Option<&Self>;
    fn narrow_mut(data: &mut EntityData) -> Option<&mut Self>;
}

macro_rules! entity_kinds {
    ($($kind:ident => $payload:ty),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EntityKind {
            $($kind),+
        }

        #[derive(Debug, Clone)]
        pub enum EntityData {
            $($kind($payload)),+
        }

        impl EntityData {
            pub fn kind(&self) -> EntityKind {
                match self {
                    $(EntityData::$kind(_) => EntityKind::$kind),+
                }
            }
        }

        impl EntityKind {
            pub fn name(self) -> &'static str {
                match self {
                    $(EntityKind::$kind => stringify!($kind)),+
                }
            }
        }

        $(
            impl From<$payload> for EntityData {
                fn from(value: $payload) -> Self {
                    EntityData::$kind(value)
                }
            }

            impl EntityPayload for $payload {
                const KIND: EntityKind = EntityKind::$kind;

                fn narrow(data: &EntityData) -> Option<&Self> {
                    match data {
                        EntityData::$kind(value) => Some(value),
                        _ => None,
                    }
                }

                fn narrow_mut(data: &mut EntityData) -> Option<&mut Self> {
                    match data {
                        EntityData::$kind(value) => Some(value),
                        _ => None,
                    }
                }
            }
        )+
    };
}

entity_kinds! {
    Text => TextRun,
    Advance => Advance,
    Table => Table,
    TableEnd => TableEnd,
    Row => Row,
    RowEnd => RowEnd,
    Paragraph => Paragraph,
    ParagraphEnd => ParagraphEnd,
    Cell => Cell,
    Link => Link,
    LinkEnd => LinkEnd,
    List => List,
    ListEnd => ListEnd,
    Index => IndexStart,
    IndexEnd => IndexEnd,
    Font => FontStyle,
    FontEnd => FontEnd,
    Xml => XmlObject,
    Image => ImageWidget,
    Use => UseSymbol,
    Button => Button,
    Checkbox => Checkbox,
    Combobox => Combobox,
    Input => Input,
}

impl EntityKind {
    pub fn is_end(self) -> bool {
        self.opening().is_some()
    }

    /// The kind an end marker closes.
    pub fn opening(self) -> Option<EntityKind> {
        match self {
            EntityKind::TableEnd => Some(EntityKind::Table),
            EntityKind::RowEnd => Some(EntityKind::Row),
            EntityKind::ParagraphEnd => Some(EntityKind::Paragraph),
            EntityKind::LinkEnd => Some(EntityKind::Link),
            EntityKind::ListEnd => Some(EntityKind::List),
            EntityKind::IndexEnd => Some(EntityKind::Index),
            EntityKind::FontEnd => Some(EntityKind::Font),
            _ => None,
        }
    }

    pub fn closing(self) -> Option<EntityKind> {
        match self {
            EntityKind::Table => Some(EntityKind::TableEnd),
            EntityKind::Row => Some(EntityKind::RowEnd),
            EntityKind::Paragraph => Some(EntityKind::ParagraphEnd),
            EntityKind::Link => Some(EntityKind::LinkEnd),
            EntityKind::List => Some(EntityKind::ListEnd),
            EntityKind::Index => Some(EntityKind::IndexEnd),
            EntityKind::Font => Some(EntityKind::FontEnd),
            _ => None,
        }
    }

    pub fn is_widget(self) -> bool {
        matches!(
            self,
            EntityKind::Button
                | EntityKind::Checkbox
                | EntityKind::Combobox
                | EntityKind::Input
                | EntityKind::Image
        )
    }
}

impl EntityData {
    /// Shared geometry of an embedded control.
    pub fn widget(&self) -> Option<&WidgetMgr> {
        match self {
            EntityData::Button(button) => Some(button.widget()),
            EntityData::Checkbox(checkbox) => Some(checkbox.widget()),
            EntityData::Combobox(combo) => Some(combo.widget()),
            EntityData::Input(input) => Some(input.widget()),
            EntityData::Image(image) => Some(image.widget()),
            _ => None,
        }
    }

    pub fn widget_mut(&mut self) -> Option<&mut WidgetMgr> {
        match self {
            EntityData::Button(button) => Some(button.widget_mut()),
            EntityData::Checkbox(checkbox) => Some(checkbox.widget_mut()),
            EntityData::Combobox(combo) => Some(combo.widget_mut()),
            EntityData::Input(input) => Some(input.widget_mut()),
            EntityData::Image(image) => Some(image.widget_mut()),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    uid: Uid,
    data: EntityData,
}

impl Entity {
    pub fn new(data: impl Into<EntityData>) -> Self {
        Self {
            uid: Uid::next(),
            data: data.into(),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut EntityData {
        &mut self.data
    }

    pub fn payload<T: EntityPayload>(&self) -> Option<&T> {
        T::narrow(&self.data)
    }

    pub fn payload_mut<T: EntityPayload>(&mut self) -> Option<&mut T> {
        T::narrow_mut(&mut self.data)
    }

    /// Foreign UI objects named by this entity, for disposal on clear.
    pub(crate) fn ui_handles(&self) -> Vec<UiHandle> {
        match &self.data {
            EntityData::Xml(xml) if xml.owned => xml.object.into_iter().collect(),
            data => data
                .widget()
                .and_then(|widget| widget.viewport)
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Preformatted: spaces are kept and `\n` breaks the line.
    pub formatted: bool,
    /// First segment produced for this run by the last layout pass.
    pub segment: Option<usize>,
}

impl TextRun {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            formatted: false,
            segment: None,
        }
    }

    pub fn formatted(text: impl Into<String>) -> Self {
        Self {
            formatted: true,
            ..Self::new(text)
        }
    }
}

/// Moves the cursor without producing content.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Advance {
    pub x: Length,
    pub y: Length,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub font: Option<FontStyle>,
    /// List marker text as written.
    pub value: String,
    /// Marker laid out for a list item: `value`, or the generated number.
    pub marker: String,
    pub x: Pt,
    pub y: Pt,
    pub height: Pt,
    pub block_indent: Pt,
    pub item_indent: Pt,
    pub indent: Length,
    pub line_height: Length,
    /// Minimum gap before and after the paragraph, in line heights.
    pub leading: f32,
    pub list_item: bool,
    pub trim: bool,
}

impl Default for Paragraph {
    fn default() -> Self {
        Self {
            font: None,
            value: String::new(),
            marker: String::new(),
            x: Pt::ZERO,
            y: Pt::ZERO,
            height: Pt::ZERO,
            block_indent: Pt::ZERO,
            item_indent: Pt::ZERO,
            indent: Length::Auto,
            line_height: Length::TrueLineHeight(1.0),
            leading: 1.0,
            list_item: false,
            trim: false,
        }
    }
}

impl Paragraph {
    pub fn list_item() -> Self {
        Self {
            list_item: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParagraphEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListKind {
    Ordered,
    #[default]
    Bullet,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub kind: ListKind,
    pub fill: String,
    pub start: i32,
    pub item_indent: Length,
    pub block_indent: Length,
    /// Gap between items, in line heights.
    pub v_spacing: f32,
    pub item_num: i32,
    /// Set when a marker outgrew the item indent during the last pass.
    pub repass: bool,
}

impl Default for List {
    fn default() -> Self {
        Self {
            kind: ListKind::Bullet,
            fill: "rgb(0,0,0)".to_string(),
            start: 1,
            item_indent: Length::LineHeight(1.0),
            block_indent: Length::LineHeight(1.0),
            v_spacing: 0.5,
            item_num: 0,
            repass: false,
        }
    }
}

impl List {
    pub fn ordered() -> Self {
        Self {
            kind: ListKind::Ordered,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStart {
    pub name: String,
    pub name_hash: u32,
    pub id: i32,
    pub y: Pt,
    pub visible: bool,
    pub parent_visible: bool,
}

impl IndexStart {
    pub fn new(name: impl Into<String>, id: i32) -> Self {
        let name = name.into();
        Self {
            name_hash: name_hash(&name),
            name,
            id,
            y: Pt::ZERO,
            visible: true,
            parent_visible: true,
        }
    }

    pub fn is_shown(&self) -> bool {
        self.visible && self.parent_visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEnd {
    pub id: i32,
}

/// FNV-1a over the lowercased name, so lookups ignore case.
pub fn name_hash(name: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= byte.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkKind {
    #[default]
    Href,
    Function,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub kind: LinkKind,
    pub target: String,
    pub hint: String,
    pub args: Vec<(String, String)>,
    pub fill: String,
}

impl Link {
    pub fn href(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn function(target: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Function,
            target: target.into(),
            ..Self::default()
        }
    }
}

/// Reference to a foreign object hosted by the surface system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XmlObject {
    pub object: Option<UiHandle>,
    pub owned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UseSymbol {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_unique() {
        let a = Entity::new(TextRun::new("a"));
        let b = Entity::new(TextRun::new("a"));
        assert_ne!(a.uid(), b.uid());
        assert!(a.uid().get() > 0);
    }

    #[test]
    fn narrowing_checks_kind() {
        let entity = Entity::new(List::ordered());
        assert_eq!(entity.kind(), EntityKind::List);
        assert!(entity.payload::<List>().is_some());
        assert!(entity.payload::<TextRun>().is_none());
    }

    #[test]
    fn end_markers_pair_with_their_openers() {
        assert_eq!(EntityKind::TableEnd.opening(), Some(EntityKind::Table));
        assert_eq!(EntityKind::Font.closing(), Some(EntityKind::FontEnd));
        assert!(EntityKind::IndexEnd.is_end());
        assert!(!EntityKind::Cell.is_end());
        assert_eq!(EntityKind::Combobox.name(), "Combobox");
    }

    #[test]
    fn name_hash_ignores_case() {
        assert_eq!(name_hash("Intro"), name_hash("INTRO"));
        assert_ne!(name_hash("intro"), name_hash("outro"));
    }
}

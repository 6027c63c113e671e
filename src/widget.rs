use crate::error::Result;
use crate::length::{Edges, Length, Padding};
use crate::stream::Stream;
use crate::style::HAlign;
use crate::types::{Pt, Rect, Size};
use image::GenericImageView;

/// Non-owning reference to an object owned by the surface system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UiHandle(pub u64);

/// How a foreign object is released when the document lets go of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisposalPolicy {
    #[default]
    Immediate,
    /// Released by message once the host returns to its event loop.
    Deferred,
    Never,
}

/// The surface system's side of object disposal.
pub trait UiHost {
    fn free(&self, handle: UiHandle);
    fn post_free(&self, handle: UiHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub handle: UiHandle,
    pub policy: DisposalPolicy,
}

impl Resource {
    pub fn new(handle: UiHandle, policy: DisposalPolicy) -> Self {
        Self { handle, policy }
    }

    /// Deferred resources are freed directly while the host is terminating,
    /// since no message would be delivered.
    pub fn release(self, host: &dyn UiHost, terminating: bool) {
        match self.policy {
            DisposalPolicy::Immediate => host.free(self.handle),
            DisposalPolicy::Deferred if terminating => host.free(self.handle),
            DisposalPolicy::Deferred => host.post_free(self.handle),
            DisposalPolicy::Never => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelPosition {
    #[default]
    Before,
    After,
}

/// Geometry shared by every embedded control. Layout writes the `final_*`
/// fields and `x`/`y`; the control only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetMgr {
    pub name: String,
    pub label: String,
    pub fill: String,
    pub alt_fill: String,
    pub font_fill: String,
    pub viewport: Option<UiHandle>,
    pub pad: Padding,
    pub final_pad: Edges,
    pub width: Length,
    pub height: Length,
    /// Size used for any dimension left unset.
    pub def_size: Length,
    pub final_width: Pt,
    pub final_height: Pt,
    pub label_width: Pt,
    pub label_pad: Length,
    pub x: Pt,
    pub y: Pt,
    /// Set for floating controls, which reserve space beside the text flow.
    pub align: Option<HAlign>,
    pub alt_state: bool,
    pub align_to_text: bool,
    pub label_pos: LabelPosition,
}

impl Default for WidgetMgr {
    fn default() -> Self {
        Self {
            name: String::new(),
            label: String::new(),
            fill: "rgb(255,255,255)".to_string(),
            alt_fill: String::new(),
            font_fill: "rgb(0,0,0)".to_string(),
            viewport: None,
            pad: Padding::zero(),
            final_pad: Edges::default(),
            width: Length::Auto,
            height: Length::Auto,
            def_size: Length::Em(1.0),
            final_width: Pt::ZERO,
            final_height: Pt::ZERO,
            label_width: Pt::ZERO,
            label_pad: Length::Em(0.5),
            x: Pt::ZERO,
            y: Pt::ZERO,
            align: None,
            alt_state: false,
            align_to_text: false,
            label_pos: LabelPosition::Before,
        }
    }
}

impl WidgetMgr {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_floating(&self) -> bool {
        self.align.is_some()
    }

    pub fn full_height(&self) -> Pt {
        self.final_height + self.final_pad.top + self.final_pad.bottom
    }

    /// Control, padding and label together.
    pub fn full_width(&self) -> Pt {
        self.final_width + self.final_pad.left + self.final_pad.right + self.label_width
    }

    /// Rectangle of the control itself, inside padding and beside the label.
    pub fn body_rect(&self) -> Rect {
        let label_shift = match self.label_pos {
            LabelPosition::Before => self.label_width,
            LabelPosition::After => Pt::ZERO,
        };
        Rect::new(
            self.x + self.final_pad.left + label_shift,
            self.y + self.final_pad.top,
            self.final_width,
            self.final_height,
        )
    }

    pub fn label_rect(&self) -> Option<Rect> {
        if self.label.is_empty() {
            return None;
        }
        let x = match self.label_pos {
            LabelPosition::Before => self.x,
            LabelPosition::After => self.x + self.full_width() - self.label_width,
        };
        Some(Rect::new(x, self.y, self.label_width, self.full_height()))
    }
}

/// Access to the shared geometry of an embedded control.
pub trait Widget {
    fn widget(&self) -> &WidgetMgr;
    fn widget_mut(&mut self) -> &mut WidgetMgr;
}

macro_rules! impl_widget {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Widget for $ty {
                fn widget(&self) -> &WidgetMgr {
                    &self.widget
                }

                fn widget_mut(&mut self) -> &mut WidgetMgr {
                    &mut self.widget
                }
            }
        )+
    };
}

impl_widget!(Button, Checkbox, Combobox, Input, ImageWidget);

#[derive(Debug, Clone)]
pub struct Button {
    pub widget: WidgetMgr,
    pub inner_padding: Padding,
    /// Button face content, laid out like a cell.
    pub stream: Stream,
}

impl Button {
    pub fn new(widget: WidgetMgr) -> Self {
        Self {
            widget,
            inner_padding: Padding::all(Length::Em(0.25)),
            stream: Stream::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checkbox {
    pub widget: WidgetMgr,
    pub checked: bool,
    pub processed: bool,
}

impl Checkbox {
    pub fn new(widget: WidgetMgr) -> Self {
        Self {
            widget,
            checked: false,
            processed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Combobox {
    pub widget: WidgetMgr,
    pub items: Vec<MenuItem>,
    pub style: String,
    pub value: String,
}

impl Combobox {
    pub fn new(widget: WidgetMgr, items: Vec<MenuItem>) -> Self {
        Self {
            widget,
            items,
            style: String::new(),
            value: String::new(),
        }
    }

    /// The longest item label, which sizes an auto-width box.
    pub fn widest_label(&self) -> Option<&str> {
        self.items
            .iter()
            .map(|item| item.label.as_str())
            .max_by_key(|label| label.chars().count())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub widget: WidgetMgr,
    pub value: String,
    /// Password entry: content is masked.
    pub secret: bool,
}

impl Input {
    pub fn new(widget: WidgetMgr) -> Self {
        Self {
            widget,
            value: String::new(),
            secret: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageWidget {
    pub widget: WidgetMgr,
    /// Encoded image bytes; only the header is needed for sizing.
    pub source: Option<Vec<u8>>,
}

impl ImageWidget {
    pub fn new(widget: WidgetMgr, source: Option<Vec<u8>>) -> Self {
        Self { widget, source }
    }

    /// Pixel dimensions of the encoded source, if any.
    pub fn intrinsic_size(&self) -> Result<Option<Size>> {
        let Some(bytes) = &self.source else {
            return Ok(None);
        };
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = decoded.dimensions();
        Ok(Some(Size::new(
            Pt::from_i32(width as i32),
            Pt::from_i32(height as i32),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;

    #[derive(Default)]
    struct RecordingHost {
        freed: RefCell<Vec<UiHandle>>,
        posted: RefCell<Vec<UiHandle>>,
    }

    impl UiHost for RecordingHost {
        fn free(&self, handle: UiHandle) {
            self.freed.borrow_mut().push(handle);
        }

        fn post_free(&self, handle: UiHandle) {
            self.posted.borrow_mut().push(handle);
        }
    }

    #[test]
    fn full_height_includes_vertical_padding() {
        let mut widget = WidgetMgr::named("ok");
        widget.final_height = Pt::from_i32(20);
        widget.final_pad = Edges {
            top: Pt::from_i32(3),
            right: Pt::ZERO,
            bottom: Pt::from_i32(4),
            left: Pt::ZERO,
        };
        assert_eq!(widget.full_height(), Pt::from_i32(27));
    }

    #[test]
    fn label_position_moves_the_body() {
        let mut widget = WidgetMgr::named("agree");
        widget.label = "Agree".to_string();
        widget.label_width = Pt::from_i32(40);
        widget.final_width = Pt::from_i32(12);
        widget.final_height = Pt::from_i32(12);
        widget.x = Pt::from_i32(100);
        assert_eq!(widget.body_rect().x, Pt::from_i32(140));
        widget.label_pos = LabelPosition::After;
        assert_eq!(widget.body_rect().x, Pt::from_i32(100));
        assert_eq!(widget.label_rect().map(|r| r.x), Some(Pt::from_i32(112)));
    }

    #[test]
    fn disposal_follows_policy() {
        let host = RecordingHost::default();
        Resource::new(UiHandle(1), DisposalPolicy::Immediate).release(&host, false);
        Resource::new(UiHandle(2), DisposalPolicy::Deferred).release(&host, false);
        Resource::new(UiHandle(3), DisposalPolicy::Deferred).release(&host, true);
        Resource::new(UiHandle(4), DisposalPolicy::Never).release(&host, false);
        assert_eq!(*host.freed.borrow(), vec![UiHandle(1), UiHandle(3)]);
        assert_eq!(*host.posted.borrow(), vec![UiHandle(2)]);
    }

    #[test]
    fn image_size_comes_from_the_source() {
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image::RgbaImage::new(3, 2))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .expect("encode png");
        let image = ImageWidget::new(WidgetMgr::default(), Some(bytes.into_inner()));
        let size = image.intrinsic_size().expect("decodes").expect("has source");
        assert_eq!(size, Size::from_f32(3.0, 2.0));

        let broken = ImageWidget::new(WidgetMgr::default(), Some(vec![1, 2, 3]));
        assert!(broken.intrinsic_size().is_err());
    }

    #[test]
    fn combobox_reports_widest_label() {
        let combo = Combobox::new(
            WidgetMgr::default(),
            vec![
                MenuItem {
                    label: "One".into(),
                    value: "1".into(),
                },
                MenuItem {
                    label: "Three".into(),
                    value: "3".into(),
                },
            ],
        );
        assert_eq!(combo.widest_label(), Some("Three"));
    }
}

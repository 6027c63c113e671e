use crate::types::{Pt, Size};

pub const DEFAULT_MIN_SLIDER_LENGTH: i32 = 12;
/// Gap between the view edge and the slider track, on both ends.
pub const DEFAULT_SCROLLBAR_INSET: i32 = 7;
const WHEEL_STEP: f32 = 0.06;
const PAGE_STEP: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Slider {
    pub offset: Pt,
    pub length: Pt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    pub min_slider_length: Pt,
    pub inset: Pt,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            min_slider_length: Pt::from_i32(DEFAULT_MIN_SLIDER_LENGTH),
            inset: Pt::from_i32(DEFAULT_SCROLLBAR_INSET),
        }
    }
}

/// One scrollbar. A bar whose page fits in the view is hidden but keeps its
/// state, ready to show again on the next resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollBar {
    axis: Axis,
    slider: Slider,
    /// Length of the track the slider moves in.
    host: Pt,
    visible: bool,
}

impl ScrollBar {
    fn new(axis: Axis) -> Self {
        Self {
            axis,
            slider: Slider::default(),
            host: Pt::ZERO,
            visible: false,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn host_length(&self) -> Pt {
        self.host
    }

    /// Slider geometry, or `None` while the bar is hidden.
    pub fn slider(&self) -> Option<Slider> {
        self.visible.then_some(self.slider)
    }

    fn update(&mut self, view: Pt, page: Pt, position: Pt, config: &ScrollConfig) {
        self.host = (view - config.inset * 2).max(Pt::ZERO);
        if page <= view || !self.host.is_positive() {
            self.visible = false;
            return;
        }
        let ratio = view.to_f32() / page.to_f32();
        let length = (self.host * ratio).max(config.min_slider_length).min(self.host);
        let travel = page - view;
        let offset = if position >= travel {
            self.host - length
        } else {
            (self.host - length) * (position.to_f32() / travel.to_f32())
        };
        self.slider = Slider {
            offset: offset.max(Pt::ZERO),
            length,
        };
        self.visible = true;
    }
}

/// Keeps a page region scrolled inside a view region and derives the slider
/// geometry of both scrollbars.
///
/// The page offset is zero or negative on each axis: `-offset` is the scroll
/// position.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollManager {
    config: ScrollConfig,
    page: Size,
    offset_x: Pt,
    offset_y: Pt,
    view: Size,
    bound: bool,
    /// In fixed mode the page keeps its own width; otherwise it widens to the
    /// view.
    fixed_mode: bool,
    min_width: Pt,
    vbar: ScrollBar,
    hbar: ScrollBar,
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new(ScrollConfig::default())
    }
}

impl ScrollManager {
    pub fn new(config: ScrollConfig) -> Self {
        Self {
            config,
            page: Size::default(),
            offset_x: Pt::ZERO,
            offset_y: Pt::ZERO,
            view: Size::default(),
            bound: false,
            fixed_mode: false,
            min_width: Pt::ZERO,
            vbar: ScrollBar::new(Axis::Vertical),
            hbar: ScrollBar::new(Axis::Horizontal),
        }
    }

    pub fn bind(&mut self, page: Size, view: Size) {
        self.page = page;
        self.view = view;
        self.offset_x = Pt::ZERO;
        self.offset_y = Pt::ZERO;
        self.bound = true;
        self.follow_view();
        self.recalc();
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn page(&self) -> Size {
        self.page
    }

    pub fn view(&self) -> Size {
        self.view
    }

    pub fn on_view_resized(&mut self, width: Pt, height: Pt) {
        self.view = Size::new(width, height);
        self.follow_view();
        self.recalc();
    }

    /// The page keeps the given size; only the offsets and sliders follow.
    pub fn on_page_resized(&mut self, width: Pt, height: Pt) {
        self.page = Size::new(width, height);
        self.clamp_offsets();
        self.recalc();
    }

    /// Page keeps `width` regardless of the view.
    pub fn fix_page_size(&mut self, width: Pt, height: Pt) {
        self.fixed_mode = true;
        self.page = Size::new(width, height);
        self.follow_view();
        self.recalc();
    }

    /// Page width follows the view but never drops below `min`. A `nominal`
    /// width at least as wide as the view is kept as is.
    pub fn dynamic_page_size(&mut self, nominal: Pt, min: Pt, height: Pt) {
        self.fixed_mode = false;
        self.min_width = min;
        let nominal = nominal.max(min);
        let width = if nominal >= self.view.width {
            nominal
        } else {
            self.view.width
        };
        self.page = Size::new(width, height);
        self.clamp_offsets();
        self.recalc();
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_mode
    }

    /// Moves the page by `(dx, dy)`; positive values reveal content above and
    /// to the left. Returns whether anything moved.
    pub fn scroll_by(&mut self, dx: Pt, dy: Pt) -> bool {
        let x = clamp_offset(self.offset_x + dx, self.page.width, self.view.width);
        let y = clamp_offset(self.offset_y + dy, self.page.height, self.view.height);
        if x == self.offset_x && y == self.offset_y {
            return false;
        }
        self.offset_x = x;
        self.offset_y = y;
        self.recalc();
        true
    }

    /// Wheel notches scroll by a share of the overflow, capped at one view.
    pub fn wheel(&mut self, delta: f32) -> bool {
        let overflow = self.page.height - self.view.height;
        if !overflow.is_positive() {
            return false;
        }
        let length = overflow.min(self.view.height);
        self.scroll_by(Pt::ZERO, length * (-delta * WHEEL_STEP))
    }

    /// Scrolls most of a view height, as for a click on the track.
    pub fn page_step(&mut self, forward: bool) -> bool {
        let step = self.view.height * PAGE_STEP;
        self.scroll_by(Pt::ZERO, if forward { -step } else { step })
    }

    /// Places the page to match a slider dragged to `offset` along `axis`.
    pub fn drag_slider(&mut self, axis: Axis, offset: Pt) -> bool {
        let (bar, page, view) = match axis {
            Axis::Vertical => (&self.vbar, self.page.height, self.view.height),
            Axis::Horizontal => (&self.hbar, self.page.width, self.view.width),
        };
        let Some(slider) = bar.slider() else {
            return false;
        };
        let travel = bar.host - slider.length;
        if !travel.is_positive() {
            return false;
        }
        let offset = offset.max(Pt::ZERO).min(travel);
        let share = offset.to_f32() / travel.to_f32();
        let target = -Pt::from_i32(((page - view).to_f32() * share).trunc() as i32);
        let (dx, dy) = match axis {
            Axis::Vertical => (Pt::ZERO, target - self.offset_y),
            Axis::Horizontal => (target - self.offset_x, Pt::ZERO),
        };
        self.scroll_by(dx, dy)
    }

    /// Distance scrolled from the top-left of the page.
    pub fn scroll_position(&self) -> (Pt, Pt) {
        (-self.offset_x, -self.offset_y)
    }

    pub fn vbar(&self) -> &ScrollBar {
        &self.vbar
    }

    pub fn hbar(&self) -> &ScrollBar {
        &self.hbar
    }

    /// In dynamic mode with a minimum width, the page takes the wider of the
    /// view and that minimum.
    fn follow_view(&mut self) {
        if !self.fixed_mode && self.bound && self.min_width.is_positive() {
            if self.view.width > self.min_width {
                self.page.width = self.view.width;
                self.offset_x = Pt::ZERO;
            } else {
                self.page.width = self.min_width;
            }
        }
        self.clamp_offsets();
    }

    fn clamp_offsets(&mut self) {
        self.offset_x = clamp_offset(self.offset_x, self.page.width, self.view.width);
        self.offset_y = clamp_offset(self.offset_y, self.page.height, self.view.height);
    }

    fn recalc(&mut self) {
        let (x, y) = self.scroll_position();
        self.vbar.update(self.view.height, self.page.height, y, &self.config);
        self.hbar.update(self.view.width, self.page.width, x, &self.config);
        log::trace!(
            "scroll: page {}x{} view {}x{} at {},{}",
            self.page.width,
            self.page.height,
            self.view.width,
            self.view.height,
            x,
            y
        );
    }
}

/// Keeps the page edge from leaving a gap inside the view.
fn clamp_offset(offset: Pt, page: Pt, view: Pt) -> Pt {
    let lowest = (view - page).min(Pt::ZERO);
    offset.min(Pt::ZERO).max(lowest)
}

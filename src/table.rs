use crate::length::{Length, Padding};
use crate::stream::Stream;
use crate::style::HAlign;
use crate::types::Pt;

/// Largest column or row span a cell may claim; larger spans are cut to it.
pub const MAX_SPAN: usize = 1000;

/// Column model. A preset is either absolute (`preset_width` in layout units)
/// or relative (`preset_width` as a fraction of the table width).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableColumn {
    pub preset_width: f32,
    pub preset_width_is_relative: bool,
    /// Widest natural content found in this column.
    pub min_width: Pt,
    pub width: Pt,
}

impl TableColumn {
    pub fn fixed(width: f32) -> Self {
        Self {
            preset_width: width,
            ..Self::default()
        }
    }

    pub fn relative(fraction: f32) -> Self {
        Self {
            preset_width: fraction,
            preset_width_is_relative: true,
            ..Self::default()
        }
    }

    pub fn has_preset(&self) -> bool {
        self.preset_width > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<TableColumn>,
    pub fill: String,
    pub stroke: String,
    pub stroke_width: Length,
    pub cell_padding: Padding,
    pub cell_h_spacing: Length,
    pub cell_v_spacing: Length,
    pub min_width: Length,
    pub min_height: Length,
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
    /// Horizontal alignment; when set the table floats and text wraps around
    /// it.
    pub align: Option<HAlign>,
    /// Adjacent cells share borders; no spacing between them.
    pub collapsed: bool,
    /// Dirty flag: column widths are recomputed only while this is set.
    pub compute_columns: bool,
    pub cells_expanded: bool,
    pub rows: usize,
    pub(crate) computed_for: Option<Pt>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            fill: String::new(),
            stroke: String::new(),
            stroke_width: Length::Px(Pt::ZERO),
            cell_padding: Padding::zero(),
            cell_h_spacing: Length::Px(Pt::ZERO),
            cell_v_spacing: Length::Px(Pt::ZERO),
            min_width: Length::Auto,
            min_height: Length::Auto,
            x: Pt::ZERO,
            y: Pt::ZERO,
            width: Pt::ZERO,
            height: Pt::ZERO,
            align: None,
            collapsed: false,
            compute_columns: true,
            cells_expanded: false,
            rows: 0,
            computed_for: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<TableColumn>) -> Self {
        self.columns = columns;
        self.mark_dirty();
        self
    }

    pub fn with_min_width(mut self, min_width: Length) -> Self {
        self.min_width = min_width;
        self.mark_dirty();
        self
    }

    pub fn floating(mut self, align: HAlign) -> Self {
        self.align = Some(align);
        self
    }

    pub fn is_floating(&self) -> bool {
        self.align.is_some()
    }

    pub fn mark_dirty(&mut self) {
        self.compute_columns = true;
    }

    pub(crate) fn ensure_columns(&mut self, count: usize) {
        if self.columns.len() < count {
            self.columns.resize(count, TableColumn::default());
            self.mark_dirty();
        }
    }

    /// Resolves column widths from presets and content minimums.
    ///
    /// A no-op unless the table is dirty, so repeated passes leave the widths
    /// untouched. Returns whether a recomputation happened.
    pub fn compute_columns(&mut self) -> bool {
        if !self.compute_columns {
            return false;
        }
        self.compute_columns = false;
        self.cells_expanded = false;
        let table_width = self.width;
        for column in &mut self.columns {
            let preset = if column.preset_width_is_relative {
                table_width * column.preset_width
            } else if column.has_preset() {
                Pt::from_f32(column.preset_width)
            } else {
                Pt::ZERO
            };
            column.width = preset.max(column.min_width);
        }
        true
    }

    pub fn columns_width(&self) -> Pt {
        self.columns.iter().map(|column| column.width).sum()
    }

    /// Horizontal space taken by spacing between and around the columns.
    pub(crate) fn spacing_total(&self, h_spacing: Pt) -> Pt {
        if self.collapsed || self.columns.is_empty() {
            Pt::ZERO
        } else {
            h_spacing * (self.columns.len() as i32 + 1)
        }
    }

    /// Widens columns toward their preferred widths within `target`. When the
    /// room falls short, each column gets a share proportional to what it
    /// lacks.
    pub(crate) fn grow_to_preferred(&mut self, preferred: &[Pt], target: Pt) {
        let spare = (target - self.columns_width()).to_milli_i64();
        if spare <= 0 {
            return;
        }
        let lacking: Vec<i64> = self
            .columns
            .iter()
            .zip(preferred)
            .map(|(column, pref)| (*pref - column.width).to_milli_i64().max(0))
            .collect();
        let total: i64 = lacking.iter().sum();
        if total == 0 {
            return;
        }
        let mut granted: Vec<i64> = if total <= spare {
            lacking.clone()
        } else {
            lacking
                .iter()
                .map(|&need| (i128::from(need) * i128::from(spare) / i128::from(total)) as i64)
                .collect()
        };
        let mut remainder = spare.min(total) - granted.iter().sum::<i64>();
        for (grant, need) in granted.iter_mut().zip(&lacking) {
            if remainder == 0 {
                break;
            }
            if *grant < *need {
                *grant += 1;
                remainder -= 1;
            }
        }
        for (column, grant) in self.columns.iter_mut().zip(granted) {
            column.width = Pt::from_milli_i64(column.width.to_milli_i64() + grant);
        }
    }

    /// Grows the columns to fill `target` (the space between the outer
    /// spacing). Spare width goes to columns without a preset, or to every
    /// column when all are preset.
    pub(crate) fn expand_columns(&mut self, target: Pt) {
        let current = self.columns_width();
        if target <= current || self.columns.is_empty() {
            return;
        }
        let open: Vec<usize> = {
            let unfixed: Vec<usize> = (0..self.columns.len())
                .filter(|&i| !self.columns[i].has_preset())
                .collect();
            if unfixed.is_empty() {
                (0..self.columns.len()).collect()
            } else {
                unfixed
            }
        };
        let mut milli: Vec<i64> = self.columns.iter().map(|c| c.width.to_milli_i64()).collect();
        let spare = (target - current).to_milli_i64();
        distribute_evenly(&mut milli, &open, spare);
        for (column, value) in self.columns.iter_mut().zip(milli) {
            column.width = Pt::from_milli_i64(value);
        }
        self.cells_expanded = true;
    }
}

/// Widens `out[start..start + span]` until together they reach `required`.
/// Values are milli-units; the deficit is spread evenly, remainder first.
pub(crate) fn ensure_span_requirement(out: &mut [i64], start: usize, span: usize, required: i64) {
    if required <= 0 || start >= out.len() {
        return;
    }
    let end = start.saturating_add(span).min(out.len());
    if end - start == 1 {
        out[start] = out[start].max(required);
        return;
    }
    let current: i64 = out[start..end].iter().sum();
    if current >= required {
        return;
    }
    let slots: Vec<usize> = (start..end).collect();
    distribute_evenly(out, &slots, required - current);
}

fn distribute_evenly(out: &mut [i64], slots: &[usize], amount: i64) {
    if slots.is_empty() || amount <= 0 {
        return;
    }
    let count = slots.len() as i64;
    let base = amount / count;
    let mut remainder = amount - base * count;
    for &slot in slots {
        out[slot] += base;
        if remainder > 0 {
            out[slot] += 1;
            remainder -= 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub y: Pt,
    pub row_height: Pt,
    pub min_height: Length,
    pub stroke: String,
    pub fill: String,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            y: Pt::ZERO,
            row_height: Pt::ZERO,
            min_height: Length::Auto,
            stroke: String::new(),
            fill: String::new(),
        }
    }
}

/// Which sides of a cell draw a border.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CellBorder(u8);

impl CellBorder {
    pub const NONE: CellBorder = CellBorder(0);
    pub const TOP: CellBorder = CellBorder(0x01);
    pub const BOTTOM: CellBorder = CellBorder(0x02);
    pub const LEFT: CellBorder = CellBorder(0x04);
    pub const RIGHT: CellBorder = CellBorder(0x08);
    pub const ALL: CellBorder = CellBorder(0x0f);

    pub fn contains(self, other: CellBorder) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CellBorder {
    type Output = CellBorder;
    fn bitor(self, rhs: CellBorder) -> CellBorder {
        CellBorder(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub cell_id: u32,
    pub column: usize,
    pub col_span: usize,
    pub row_span: usize,
    pub border: CellBorder,
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
    pub stroke_width: Length,
    pub stroke: String,
    pub fill: String,
    /// Names the edit definition that makes this cell's content editable.
    pub edit_def: Option<String>,
    pub args: Vec<(String, String)>,
    pub modified: bool,
    pub stream: Stream,
}

impl PartialEq for Cell {
    /// Identity and geometry only; nested content is not compared.
    fn eq(&self, other: &Self) -> bool {
        self.cell_id == other.cell_id
            && self.column == other.column
            && self.col_span == other.col_span
            && self.row_span == other.row_span
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
    }
}

impl Cell {
    pub fn new(cell_id: u32) -> Self {
        Self {
            cell_id,
            column: 0,
            col_span: 1,
            row_span: 1,
            border: CellBorder::NONE,
            x: Pt::ZERO,
            y: Pt::ZERO,
            width: Pt::ZERO,
            height: Pt::ZERO,
            stroke_width: Length::Px(Pt::ZERO),
            stroke: String::new(),
            fill: String::new(),
            edit_def: None,
            args: Vec::new(),
            modified: false,
            stream: Stream::new(),
        }
    }

    pub fn with_span(mut self, col_span: usize, row_span: usize) -> Self {
        self.col_span = col_span.clamp(1, MAX_SPAN);
        self.row_span = row_span.clamp(1, MAX_SPAN);
        self
    }

    pub fn with_edit_def(mut self, edit_def: impl Into<String>) -> Self {
        self.edit_def = Some(edit_def.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_columns_is_idempotent_until_dirty() {
        let mut table = Table::new().with_columns(vec![
            TableColumn::fixed(50.0),
            TableColumn::relative(0.25),
            TableColumn::default(),
        ]);
        table.width = Pt::from_i32(400);
        table.columns[2].min_width = Pt::from_i32(120);
        table.columns[0].min_width = Pt::from_i32(80);

        assert!(table.compute_columns());
        let first: Vec<Pt> = table.columns.iter().map(|c| c.width).collect();
        assert_eq!(first, vec![Pt::from_i32(80), Pt::from_i32(100), Pt::from_i32(120)]);

        table.columns[2].min_width = Pt::from_i32(500);
        assert!(!table.compute_columns());
        let second: Vec<Pt> = table.columns.iter().map(|c| c.width).collect();
        assert_eq!(first, second);

        table.mark_dirty();
        assert!(table.compute_columns());
        assert_eq!(table.columns[2].width, Pt::from_i32(500));
    }

    #[test]
    fn span_requirement_spreads_the_deficit() {
        let mut widths = vec![10_000, 20_000, 0];
        ensure_span_requirement(&mut widths, 0, 3, 40_001);
        assert_eq!(widths.iter().sum::<i64>(), 40_001);
        assert_eq!(widths, vec![13_334, 23_334, 3_333]);

        let mut single = vec![5_000];
        ensure_span_requirement(&mut single, 0, 1, 3_000);
        assert_eq!(single, vec![5_000]);
    }

    #[test]
    fn expansion_prefers_unpreset_columns() {
        let mut table =
            Table::new().with_columns(vec![TableColumn::fixed(50.0), TableColumn::default()]);
        table.columns[1].min_width = Pt::from_i32(20);
        table.compute_columns();
        table.expand_columns(Pt::from_i32(200));
        assert_eq!(table.columns[0].width, Pt::from_i32(50));
        assert_eq!(table.columns[1].width, Pt::from_i32(150));
        assert!(table.cells_expanded);
    }

    #[test]
    fn border_flags_combine() {
        let border = CellBorder::TOP | CellBorder::LEFT;
        assert!(border.contains(CellBorder::TOP));
        assert!(!border.contains(CellBorder::BOTTOM));
        assert!(CellBorder::ALL.contains(border));
        assert!(CellBorder::NONE.is_empty());
    }
}

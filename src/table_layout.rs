use crate::diagnostics::LayoutWarning;
use crate::entity::{Advance, EntityKind, IndexStart, Paragraph, TextRun};
use crate::layout::{LayoutEngine, LineEnd, Section, StyleFrame, Token, tokenize};
use crate::length::{Edges, LengthContext};
use crate::position::Position;
use crate::segment::{Clip, Segment, StreamOwner};
use crate::stream::Stream;
use crate::style::{FontStyle, HAlign};
use crate::table::{Cell, MAX_SPAN, Row, Table, ensure_span_requirement};
use crate::types::{Pt, Rect};
use serde_json::json;

/// Narrowest and natural widths of a piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ContentWidths {
    /// Widest unbreakable item.
    pub(crate) min: Pt,
    /// Widest line with no wrapping at all.
    pub(crate) max: Pt,
}

impl ContentWidths {
    fn include(&mut self, other: ContentWidths) {
        self.min = self.min.max(other.min);
        self.max = self.max.max(other.max);
    }

    fn capped(self, limit: Pt) -> Self {
        Self {
            min: self.min.min(limit),
            max: self.max.min(limit),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GridRow {
    index: usize,
}

#[derive(Debug, Clone, Copy)]
struct GridCell {
    index: usize,
    row: usize,
    column: usize,
    col_span: usize,
    row_span: usize,
}

/// Rows and cells of one table with every cell assigned a column.
#[derive(Debug, Default)]
struct Grid {
    rows: Vec<GridRow>,
    cells: Vec<GridCell>,
    columns: usize,
}

/// Walks the entries between a table and its end marker. Cells take the
/// first column not covered by a row span from above.
fn gather_grid(stream: &Stream, start: usize, end: usize) -> (Grid, Vec<LayoutWarning>) {
    let mut grid = Grid::default();
    let mut issues = Vec::new();
    let mut occupied: Vec<Vec<bool>> = Vec::new();
    let mut in_row = false;
    let mut index = start + 1;
    while index < end {
        let Some(entry) = stream.entry(index) else {
            break;
        };
        match entry.kind {
            EntityKind::Row => {
                if in_row {
                    issues.push(LayoutWarning::Unclosed {
                        kind: EntityKind::Row,
                    });
                }
                grid.rows.push(GridRow { index });
                in_row = true;
            }
            EntityKind::RowEnd => {
                if !in_row {
                    issues.push(LayoutWarning::UnmatchedEnd {
                        kind: EntityKind::RowEnd,
                        index,
                    });
                }
                in_row = false;
            }
            EntityKind::Cell if in_row => {
                if let Ok(cell) = stream.payload_at::<Cell>(index) {
                    let row = grid.rows.len() - 1;
                    let col_span = cell.col_span.clamp(1, MAX_SPAN);
                    let row_span = cell.row_span.clamp(1, MAX_SPAN);
                    if occupied.len() < row + row_span {
                        occupied.resize_with(row + row_span, Vec::new);
                    }
                    let mut column = 0;
                    while occupied[row]
                        .iter()
                        .skip(column)
                        .take(col_span)
                        .any(|&taken| taken)
                    {
                        column += 1;
                    }
                    for taken in &mut occupied[row..row + row_span] {
                        if taken.len() < column + col_span {
                            taken.resize(column + col_span, false);
                        }
                        taken[column..column + col_span].fill(true);
                    }
                    grid.columns = grid.columns.max(column + col_span);
                    grid.cells.push(GridCell {
                        index,
                        row,
                        column,
                        col_span,
                        row_span,
                    });
                }
            }
            EntityKind::Table => {
                issues.push(LayoutWarning::StrayEntity {
                    kind: EntityKind::Table,
                    index,
                });
                if let Some(close) = stream.find_matching_end(index) {
                    index = close;
                }
            }
            kind => issues.push(LayoutWarning::StrayEntity { kind, index }),
        }
        index += 1;
    }
    if in_row {
        issues.push(LayoutWarning::Unclosed {
            kind: EntityKind::Row,
        });
    }
    (grid, issues)
}

/// Padding and spacing every cell of a table shares.
#[derive(Debug, Clone, Copy)]
struct CellBox {
    pad: Edges,
    h_spacing: Pt,
    v_spacing: Pt,
}

impl CellBox {
    fn of(table: &Table, ctx: &LengthContext) -> Self {
        let (h_spacing, v_spacing) = if table.collapsed {
            (Pt::ZERO, Pt::ZERO)
        } else {
            (
                table.cell_h_spacing.resolve(ctx),
                table.cell_v_spacing.resolve(ctx),
            )
        };
        Self {
            pad: table.cell_padding.resolve(ctx),
            h_spacing,
            v_spacing,
        }
    }

    /// Spacing around and between `columns` columns.
    fn outer(&self, columns: usize) -> Pt {
        if columns == 0 {
            Pt::ZERO
        } else {
            self.h_spacing * (columns as i32 + 1)
        }
    }
}

/// Per-column minimum and preferred widths.
#[derive(Debug, Clone, Default)]
struct ColumnNeeds {
    min: Vec<Pt>,
    pref: Vec<Pt>,
}

impl LayoutEngine<'_> {
    /// Measures `stream` without laying it out. `depth` is the table nesting
    /// of the stream itself; tables nested past the limit count as empty.
    pub(crate) fn content_widths(&self, stream: &Stream, frame: StyleFrame, depth: usize) -> ContentWidths {
        let mut widths = ContentWidths::default();
        let mut line = Pt::ZERO;
        let mut styles = vec![frame];
        let mut paragraph_fonts: Vec<bool> = Vec::new();
        let mut index = 0;
        while index < stream.len() {
            let Some(entry) = stream.entry(index) else {
                break;
            };
            let current = styles.last().copied().unwrap_or(frame);
            match entry.kind {
                EntityKind::Text => {
                    if let Ok(run) = stream.payload_at::<TextRun>(index) {
                        let metrics = self.metrics(current);
                        for token in tokenize(&run.text, run.formatted) {
                            match token {
                                Token::Word(range) => {
                                    let width = self.fonts.measure(current.font, &run.text[range]);
                                    widths.min = widths.min.max(width);
                                    line += width;
                                }
                                Token::Space(range) if run.formatted => {
                                    line += metrics.space_width * run.text[range].chars().count() as i32;
                                }
                                Token::Space(_) => {
                                    if line.is_positive() {
                                        line += metrics.space_width;
                                    }
                                }
                                Token::Newline(_) => {
                                    widths.max = widths.max.max(line);
                                    line = Pt::ZERO;
                                }
                            }
                        }
                    }
                }
                EntityKind::Font => {
                    let next = stream
                        .payload_at::<FontStyle>(index)
                        .map(|style| self.peek_frame(style, current))
                        .unwrap_or(current);
                    styles.push(next);
                }
                EntityKind::FontEnd => {
                    if styles.len() > 1 {
                        styles.pop();
                    }
                }
                EntityKind::Paragraph => {
                    widths.max = widths.max.max(line);
                    line = Pt::ZERO;
                    let font = stream
                        .payload_at::<Paragraph>(index)
                        .ok()
                        .and_then(|paragraph| paragraph.font.as_ref());
                    paragraph_fonts.push(font.is_some());
                    if let Some(style) = font {
                        styles.push(self.peek_frame(style, current));
                    }
                }
                EntityKind::ParagraphEnd => {
                    widths.max = widths.max.max(line);
                    line = Pt::ZERO;
                    if paragraph_fonts.pop() == Some(true) && styles.len() > 1 {
                        styles.pop();
                    }
                }
                EntityKind::List | EntityKind::ListEnd => {
                    widths.max = widths.max.max(line);
                    line = Pt::ZERO;
                }
                EntityKind::Advance => {
                    if let Ok(advance) = stream.payload_at::<Advance>(index) {
                        let ctx = self.length_ctx(current, self.config.width_limit);
                        line += advance.x.resolve(&ctx).max(Pt::ZERO);
                    }
                }
                EntityKind::Index => {
                    let hidden = stream
                        .payload_at::<IndexStart>(index)
                        .is_ok_and(|marker| !marker.visible);
                    if hidden {
                        index = stream.find_matching_end(index).unwrap_or(stream.len());
                    }
                }
                EntityKind::Table => {
                    widths.max = widths.max.max(line);
                    line = Pt::ZERO;
                    let end = stream.find_matching_end(index).unwrap_or(stream.len());
                    if depth < self.config.max_table_depth {
                        widths.include(self.table_widths(stream, index, end, current, depth + 1));
                    }
                    index = end;
                }
                kind if kind.is_widget() => {
                    let ctx = self.length_ctx(current, self.config.width_limit);
                    if let Ok(entity) = stream.entity_at(index) {
                        let data = entity.data();
                        if let Some(widget) = data.widget() {
                            let (auto_width, _) = self.auto_widget_size(data, current, &ctx, depth);
                            let label = if widget.label.is_empty() {
                                Pt::ZERO
                            } else {
                                self.fonts.measure(current.font, &widget.label) + widget.label_pad.resolve(&ctx)
                            };
                            let width = widget.width.resolve_or(&ctx, auto_width)
                                + widget.pad.resolve(&ctx).horizontal()
                                + label;
                            if widget.is_floating() {
                                widths.include(ContentWidths {
                                    min: width,
                                    max: width,
                                });
                            } else {
                                widths.min = widths.min.max(width);
                                line += width;
                            }
                        }
                    }
                }
                _ => {}
            }
            index += 1;
        }
        widths.max = widths.max.max(line);
        widths.capped(self.config.width_limit)
    }

    /// The frame a font marker would open, resolved without touching the
    /// stored style.
    fn peek_frame(&self, style: &FontStyle, parent: StyleFrame) -> StyleFrame {
        let size = style.pixel_size_for(parent.size);
        let font = style
            .font_index()
            .filter(|&index| self.fonts.get(index).is_some_and(|entry| entry.size == size))
            .unwrap_or_else(|| self.fonts.resolve(&style.face, &style.style, size).unwrap_or(0));
        StyleFrame {
            font,
            size: Pt::from_i32(self.fonts.entry(font).size),
            align: style.align,
            valign: style.valign,
        }
    }

    fn column_needs(
        &self,
        stream: &Stream,
        grid: &Grid,
        columns: usize,
        cell_box: CellBox,
        frame: StyleFrame,
        depth: usize,
    ) -> ColumnNeeds {
        let mut min = vec![0i64; columns];
        let mut pref = vec![0i64; columns];
        let mut order: Vec<&GridCell> = grid.cells.iter().collect();
        order.sort_by_key(|cell| cell.col_span);
        for cell in order {
            let Ok(payload) = stream.payload_at::<Cell>(cell.index) else {
                continue;
            };
            let content = self.content_widths(&payload.stream, frame, depth);
            let extra = cell_box.pad.horizontal() - cell_box.h_spacing * (cell.col_span as i32 - 1);
            ensure_span_requirement(&mut min, cell.column, cell.col_span, (content.min + extra).to_milli_i64());
            ensure_span_requirement(&mut pref, cell.column, cell.col_span, (content.max + extra).to_milli_i64());
        }
        ColumnNeeds {
            min: min.into_iter().map(Pt::from_milli_i64).collect(),
            pref: pref.into_iter().map(Pt::from_milli_i64).collect(),
        }
    }

    /// Narrowest and natural widths of the table at `index`.
    fn table_widths(&self, stream: &Stream, index: usize, end: usize, frame: StyleFrame, depth: usize) -> ContentWidths {
        let Ok(table) = stream.payload_at::<Table>(index) else {
            return ContentWidths::default();
        };
        let ctx = self.length_ctx(frame, self.config.width_limit);
        let cell_box = CellBox::of(table, &ctx);
        let (grid, _) = gather_grid(stream, index, end);
        let columns = grid.columns.max(table.columns.len());
        let needs = self.column_needs(stream, &grid, columns, cell_box, frame, depth);
        let spacing = cell_box.outer(columns);
        let mut widths = ContentWidths {
            min: spacing,
            max: spacing,
        };
        for column in 0..columns {
            let preset = table
                .columns
                .get(column)
                .filter(|column| column.has_preset() && !column.preset_width_is_relative)
                .map(|column| Pt::from_f32(column.preset_width))
                .unwrap_or(Pt::ZERO);
            widths.min += needs.min[column].max(preset);
            widths.max += needs.pref[column].max(needs.min[column]).max(preset);
        }
        if !table.min_width.is_auto() && !table.min_width.is_relative() {
            let fixed = table.min_width.resolve(&ctx);
            widths.min = widths.min.max(fixed);
            widths.max = widths.max.max(fixed);
        }
        widths
    }

    /// Lays out the table at `index` with its rows and cells and returns the
    /// index after its end marker.
    pub(crate) fn layout_table(&mut self, sec: &mut Section, stream: &mut Stream, index: usize) -> usize {
        let depth = self.depth + 1;
        let end = match stream.find_matching_end(index) {
            Some(end) => end,
            None => {
                self.diagnostics.warn(LayoutWarning::Unclosed {
                    kind: EntityKind::Table,
                });
                stream.len()
            }
        };
        let next = (end + 1).min(stream.len());
        let at = Position::at(index, 0);
        let after = Position::at(next, 0);
        if depth > self.config.max_table_depth {
            self.diagnostics.warn(LayoutWarning::TableDepthExceeded { depth, index });
            let x = sec.cursor_x;
            self.split_line(sec, stream, at, after, x);
            return next;
        }

        let frame = sec.frame();
        let avail = (sec.edge - sec.line_left()).max(Pt::ZERO);
        let ctx = self.length_ctx(frame, avail);
        let (grid, issues) = gather_grid(stream, index, end);
        for issue in issues {
            self.diagnostics.warn(issue);
        }
        let Ok(table) = stream.payload_at::<Table>(index) else {
            return next;
        };
        let cell_box = CellBox::of(table, &ctx);
        let align = table.align;
        let min_height = table.min_height.resolve(&ctx);
        let columns = grid.columns.max(table.columns.len());
        let needs = self.column_needs(stream, &grid, columns, cell_box, frame, depth);

        let (width, widths) = {
            let Ok(table) = stream.payload_at_mut::<Table>(index) else {
                return next;
            };
            table.ensure_columns(columns);
            if table.computed_for != Some(avail) {
                table.mark_dirty();
                table.computed_for = Some(avail);
            }
            let spacing = table.spacing_total(cell_box.h_spacing);
            let auto = table.min_width.is_auto();
            let target = table.min_width.resolve(&ctx);
            if table.compute_columns {
                for (column, min) in table.columns.iter_mut().zip(&needs.min) {
                    column.min_width = *min;
                }
                table.width = if auto { avail } else { target };
                table.compute_columns();
                let goal = if auto {
                    let natural: Pt = table
                        .columns
                        .iter()
                        .zip(&needs.pref)
                        .map(|(column, pref)| column.width.max(*pref))
                        .sum();
                    natural.min(avail - spacing)
                } else {
                    target - spacing
                };
                table.grow_to_preferred(&needs.pref, goal);
                table.expand_columns(goal);
            }
            table.width = table.columns_width() + spacing;
            table.rows = grid.rows.len();
            let widths: Vec<Pt> = table.columns.iter().map(|column| column.width).collect();
            (table.width, widths)
        };

        let (x, y) = match align {
            Some(align) => {
                let slot = self.find_slot(sec, width, Pt::ZERO, align, index);
                let cursor = sec.cursor_x;
                self.split_line(sec, stream, at, after, cursor);
                slot
            }
            None => {
                self.break_line(sec, stream, at, at, LineEnd::Wrap);
                (sec.line_left(), sec.cursor_y)
            }
        };
        let placeholder = self.out.segments.len();
        self.out.segments.push(Segment {
            start: at,
            stop: after,
            trim_stop: after,
            area: Rect::new(x, y, width, Pt::ZERO),
            descent: Pt::ZERO,
            align_width: width,
            align: HAlign::Left,
            owner: sec.owner,
            edit: sec.edit,
            allow_merge: false,
        });

        let height = self.layout_rows(stream, &grid, &widths, cell_box, Rect::new(x, y, width, Pt::ZERO), frame, depth);
        let height = height.max(min_height);
        if let Ok(table) = stream.payload_at_mut::<Table>(index) {
            table.x = x;
            table.y = y;
            table.height = height;
        }
        self.out.segments[placeholder].area.height = height;

        let floating = align.is_some();
        let clip = Clip::new(
            Rect::new(x, y, width, height),
            index,
            !floating,
            "table",
            self.config.clip_limit,
            &mut self.diagnostics,
        );
        self.out.clips.push(clip);
        sec.max_right = sec.max_right.max(x + width);
        sec.max_bottom = sec.max_bottom.max(y + height);
        if !floating {
            sec.cursor_y = y + height;
            sec.last_bottom = sec.cursor_y;
            sec.has_content = true;
            sec.restart_line(after);
        }
        if let Some(debug) = self.diagnostics.debug() {
            debug.log_event(
                "layout.table",
                json!({
                    "index": index,
                    "depth": depth,
                    "columns": widths.len(),
                    "rows": grid.rows.len(),
                    "width": width.to_f32(),
                    "height": height.to_f32(),
                    "floating": floating,
                }),
            );
        }
        next
    }

    /// Places every row and cell below `area.y`; returns the table height.
    #[allow(clippy::too_many_arguments)]
    fn layout_rows(
        &mut self,
        stream: &mut Stream,
        grid: &Grid,
        widths: &[Pt],
        cell_box: CellBox,
        area: Rect,
        frame: StyleFrame,
        depth: usize,
    ) -> Pt {
        let ctx = self.length_ctx(frame, area.width);
        let mut row_tops = Vec::with_capacity(grid.rows.len());
        let mut row_heights: Vec<Pt> = Vec::with_capacity(grid.rows.len());
        let mut content_heights = vec![Pt::ZERO; grid.cells.len()];
        let mut y = area.y + cell_box.v_spacing;
        let last_row = grid.rows.len().saturating_sub(1);

        for (row_number, row) in grid.rows.iter().enumerate() {
            let mut height = stream
                .payload_at::<Row>(row.index)
                .map(|row| row.min_height.resolve(&ctx))
                .unwrap_or(Pt::ZERO);
            for (slot, cell) in grid.cells.iter().enumerate().filter(|(_, cell)| cell.row == row_number) {
                let (cell_x, cell_width) = column_span(widths, cell, cell_box.h_spacing, area.x);
                content_heights[slot] = self.layout_cell(stream, cell, Rect::new(cell_x, y, cell_width, Pt::ZERO), cell_box, frame, depth);
                if cell.row_span == 1 {
                    height = height.max(content_heights[slot]);
                }
            }
            row_tops.push(y);
            row_heights.push(height);
            // Spanning cells that end on this row take any shortfall here.
            for (slot, cell) in grid.cells.iter().enumerate() {
                if cell.row_span > 1 && (cell.row + cell.row_span - 1).min(last_row) == row_number {
                    let covered: Pt = row_heights[cell.row..=row_number].iter().copied().sum::<Pt>()
                        + cell_box.v_spacing * (row_number - cell.row) as i32;
                    let shortfall = content_heights[slot] - covered;
                    if shortfall.is_positive() {
                        row_heights[row_number] += shortfall;
                    }
                }
            }
            y += row_heights[row_number] + cell_box.v_spacing;
        }

        for (row, (&top, &height)) in grid.rows.iter().zip(row_tops.iter().zip(&row_heights)) {
            if let Ok(payload) = stream.payload_at_mut::<Row>(row.index) {
                payload.y = top;
                payload.row_height = height;
            }
        }
        for cell in &grid.cells {
            let last = (cell.row + cell.row_span - 1).min(last_row);
            let height = row_heights[cell.row..=last].iter().copied().sum::<Pt>()
                + cell_box.v_spacing * (last - cell.row) as i32;
            let (cell_x, cell_width) = column_span(widths, cell, cell_box.h_spacing, area.x);
            if let Ok(payload) = stream.payload_at_mut::<Cell>(cell.index) {
                payload.column = cell.column;
                payload.x = cell_x;
                payload.y = row_tops[cell.row];
                payload.width = cell_width;
                payload.height = height;
            }
        }
        if grid.rows.is_empty() {
            Pt::ZERO
        } else {
            y - area.y
        }
    }

    /// Lays out one cell's stream inside its padding; returns the height the
    /// cell needs.
    fn layout_cell(
        &mut self,
        stream: &mut Stream,
        cell: &GridCell,
        area: Rect,
        cell_box: CellBox,
        frame: StyleFrame,
        depth: usize,
    ) -> Pt {
        let Some(entry) = stream.entry(cell.index) else {
            return Pt::ZERO;
        };
        let Ok(payload) = stream.payload_at_mut::<Cell>(cell.index) else {
            return Pt::ZERO;
        };
        let mut inner = std::mem::take(&mut payload.stream);
        let edit = payload.edit_def.is_some();
        let pad = cell_box.pad;
        let content = Rect::new(
            area.x + pad.left,
            area.y + pad.top,
            (area.width - pad.horizontal()).max(Pt::ZERO),
            Pt::ZERO,
        );
        let outer_depth = self.depth;
        self.depth = depth;
        let extent = self.layout_section(&mut inner, StreamOwner::Entity(entry.uid), content, frame, edit);
        self.depth = outer_depth;
        if let Ok(payload) = stream.payload_at_mut::<Cell>(cell.index) {
            payload.stream = inner;
        }
        extent.height + pad.vertical()
    }
}

/// Left edge and width of the columns a cell spans.
fn column_span(widths: &[Pt], cell: &GridCell, h_spacing: Pt, left: Pt) -> (Pt, Pt) {
    let end = (cell.column + cell.col_span).min(widths.len());
    let start = cell.column.min(end);
    let x = left + h_spacing * (start as i32 + 1) + widths[..start].iter().copied().sum::<Pt>();
    let width = widths[start..end].iter().copied().sum::<Pt>() + h_spacing * (end - start).saturating_sub(1) as i32;
    (x, width)
}

//! Normalized table grid and its builder.
//!
//! Rows are resolved independently (optionally on a rayon pool). Table-level
//! aggregates are reduced from per-row partial results after every row task
//! has finished. The resulting [`GridTable`] is immutable.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::span::{resolve_row, update_column_width};
use crate::spec::{Result, SpecGridBuildOptions, SpecRawRow, SpecRawTable, StyleMap};
use crate::style::StyleCascade;
use crate::util::calculate_worker_limit;

/// One placed cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    row_idx: usize,
    col_idx: usize,
    row_span: usize,
    col_span: usize,
    is_header: bool,
    content: String,
    style: Arc<StyleMap>,
}

impl GridCell {
    /// Zero-based row index.
    pub fn row_idx(&self) -> usize {
        self.row_idx
    }

    /// Resolved zero-based column index.
    pub fn col_idx(&self) -> usize {
        self.col_idx
    }

    /// Extra rows covered below this cell (0 = none).
    pub fn row_span(&self) -> usize {
        self.row_span
    }

    /// Extra columns covered right of this cell (0 = none).
    pub fn col_span(&self) -> usize {
        self.col_span
    }

    /// Declared as header cell.
    pub fn is_header(&self) -> bool {
        self.is_header
    }

    /// Text content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Fully cascaded style.
    pub fn style(&self) -> &Arc<StyleMap> {
        &self.style
    }
}

/// One row of placed cells, ordered by resolved column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
    row_idx: usize,
    cells: Vec<GridCell>,
    style: Arc<StyleMap>,
    col_last: Option<usize>,
}

impl GridRow {
    /// Zero-based row index.
    pub fn row_idx(&self) -> usize {
        self.row_idx
    }

    /// Cells in resolved-column order.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Row-level cascaded style.
    pub fn style(&self) -> &Arc<StyleMap> {
        &self.style
    }

    /// Rightmost occupied column including span extension.
    pub fn col_last(&self) -> Option<usize> {
        self.col_last
    }
}

/// Normalized table, read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTable {
    name: Option<String>,
    rows: Vec<GridRow>,
    style: Arc<StyleMap>,
    col_last: Option<usize>,
    row_last: Option<usize>,
    widths_by_col: BTreeMap<usize, usize>,
}

impl GridTable {
    /// Table name, if declared.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Rows in order.
    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// Table-level style (cascade root).
    pub fn style(&self) -> &Arc<StyleMap> {
        &self.style
    }

    /// Rightmost occupied column over all rows.
    pub fn col_last(&self) -> Option<usize> {
        self.col_last
    }

    /// Lowest occupied row including row-span extension.
    pub fn row_last(&self) -> Option<usize> {
        self.row_last
    }

    /// Output column count (`col_last + 1`, 0 when empty).
    pub fn n_cols(&self) -> usize {
        self.col_last.map_or(0, |n| n + 1)
    }

    /// Maximum content width of `col` in width units.
    pub fn width_of(&self, col: usize) -> Option<usize> {
        self.widths_by_col.get(&col).copied()
    }

    /// Maximum content width per column.
    pub fn widths(&self) -> &BTreeMap<usize, usize> {
        &self.widths_by_col
    }
}

struct SpecRowPartial {
    row: GridRow,
    row_last: Option<usize>,
    widths_by_col: BTreeMap<usize, usize>,
}

/// Build the grid of every table in order, sharing one cascade cache.
pub fn build_grid_tables(
    tables: &[SpecRawTable],
    cascade: &StyleCascade,
    options: &SpecGridBuildOptions,
) -> Result<Vec<GridTable>> {
    tables
        .iter()
        .map(|table| build_grid_table(table, cascade, options))
        .collect()
}

/// Resolve spans, cascade styles and aggregate widths for one table.
pub fn build_grid_table(
    table: &SpecRawTable,
    cascade: &StyleCascade,
    options: &SpecGridBuildOptions,
) -> Result<GridTable> {
    let style_table = Arc::new(table.style.clone());
    // Group styles are shared by many rows; resolve them before fanning out.
    let l_styles_group = table
        .row_groups
        .iter()
        .map(|style_group| cascade.resolve(&style_table, style_group))
        .collect::<Result<Vec<_>>>()?;

    let resolve_one = |(n_idx_row, raw_row): (usize, &SpecRawRow)| {
        let style_parent = match raw_row.group {
            Some(n_group) => l_styles_group.get(n_group).unwrap_or_else(|| {
                log::warn!("Row {n_idx_row} references unknown row group {n_group}.");
                &style_table
            }),
            None => &style_table,
        };
        build_grid_row(n_idx_row, raw_row, style_parent, cascade)
    };

    let n_workers_max = calculate_worker_limit(options.num_workers_max);
    let l_partials = if n_workers_max <= 1 || table.rows.len() < 2 {
        table
            .rows
            .iter()
            .enumerate()
            .map(resolve_one)
            .collect::<Result<Vec<_>>>()?
    } else {
        match ThreadPoolBuilder::new().num_threads(n_workers_max).build() {
            Ok(thread_pool) => thread_pool.install(|| {
                table
                    .rows
                    .par_iter()
                    .enumerate()
                    .map(resolve_one)
                    .collect::<Result<Vec<_>>>()
            })?,
            Err(err) => {
                log::warn!(
                    "Failed to initialize thread pool (workers={n_workers_max}); fallback to serial row parsing ({err})."
                );
                table
                    .rows
                    .iter()
                    .enumerate()
                    .map(resolve_one)
                    .collect::<Result<Vec<_>>>()?
            }
        }
    };

    let mut col_last: Option<usize> = None;
    let mut row_last: Option<usize> = None;
    let mut widths_by_col = BTreeMap::new();
    let mut rows = Vec::with_capacity(l_partials.len());
    for partial in l_partials {
        col_last = col_last.max(partial.row.col_last);
        row_last = row_last.max(partial.row_last);
        for (n_col, n_width) in partial.widths_by_col {
            update_column_width(&mut widths_by_col, n_col, n_width);
        }
        rows.push(partial.row);
    }

    log::debug!(
        "Built grid: rows={} cols={} cascade={:?}",
        rows.len(),
        col_last.map_or(0, |n| n + 1),
        cascade.stats()
    );

    Ok(GridTable {
        name: table.name.clone(),
        rows,
        style: style_table,
        col_last,
        row_last,
        widths_by_col,
    })
}

fn build_grid_row(
    row_idx: usize,
    raw_row: &SpecRawRow,
    style_parent: &Arc<StyleMap>,
    cascade: &StyleCascade,
) -> Result<SpecRowPartial> {
    let style_row = cascade.resolve(style_parent, &raw_row.style)?;
    let spec_resolved = resolve_row(&raw_row.cells);

    let mut cells = Vec::with_capacity(raw_row.cells.len());
    let mut row_last = None;
    for (n_idx_decl, raw_cell) in raw_row.cells.iter().enumerate() {
        let row_span = spec_resolved.row_spans[n_idx_decl];
        row_last = row_last.max(Some(row_idx + row_span));
        cells.push(GridCell {
            row_idx,
            col_idx: spec_resolved.cols[n_idx_decl],
            row_span,
            col_span: spec_resolved.col_spans[n_idx_decl],
            is_header: raw_cell.is_header,
            content: raw_cell.content.clone(),
            style: cascade.resolve(&style_row, &raw_cell.style)?,
        });
    }

    Ok(SpecRowPartial {
        row: GridRow {
            row_idx,
            cells,
            style: style_row,
            col_last: spec_resolved.col_last,
        },
        row_last: row_last.or(Some(row_idx)),
        widths_by_col: spec_resolved.widths_by_col,
    })
}

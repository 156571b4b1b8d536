//! Span resolution: grid coordinates of declared cells within one row.
//!
//! A merged cell is declared once but occupies `span` grid columns, so every
//! later cell on the same row shifts right by the accumulated extension.
//! Vertical carry-over from earlier rows is not tracked here; rows stay
//! independent so they can be resolved in parallel.

use std::collections::BTreeMap;

use unicode_width::UnicodeWidthChar;

use crate::spec::SpecRawCell;

/// Resolved coordinates of one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecResolvedRow {
    /// Resolved column per declared cell, in declaration order.
    pub cols: Vec<usize>,
    /// Row-span extension per declared cell (0 = none).
    pub row_spans: Vec<usize>,
    /// Column-span extension per declared cell (0 = none).
    pub col_spans: Vec<usize>,
    /// Rightmost occupied column, `None` for an empty row.
    pub col_last: Option<usize>,
    /// Running maximum content width per resolved column.
    pub widths_by_col: BTreeMap<usize, usize>,
}

/// Parse a declared span count into its extension (`count - 1`).
///
/// Anything that is not an integer greater than 1 yields 0.
pub fn parse_span_extension(raw: &str) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(n_count) if n_count > 1 => n_count - 1,
        _ => 0,
    }
}

/// Resolve grid columns, span extensions, last column and widths for one row.
pub fn resolve_row(cells: &[SpecRawCell]) -> SpecResolvedRow {
    let mut spec_resolved = SpecResolvedRow {
        cols: Vec::with_capacity(cells.len()),
        row_spans: Vec::with_capacity(cells.len()),
        col_spans: Vec::with_capacity(cells.len()),
        ..Default::default()
    };

    let mut n_shift = 0usize;
    for (n_idx_decl, cell) in cells.iter().enumerate() {
        let n_col = n_idx_decl + n_shift;
        let n_col_ext = parse_span_extension(&cell.col_span);
        let n_row_ext = parse_span_extension(&cell.row_span);

        spec_resolved.cols.push(n_col);
        spec_resolved.col_spans.push(n_col_ext);
        spec_resolved.row_spans.push(n_row_ext);
        spec_resolved.col_last = Some(n_col + n_col_ext);

        update_column_width(
            &mut spec_resolved.widths_by_col,
            n_col,
            estimate_text_width(&cell.content),
        );

        n_shift += n_col_ext;
    }

    spec_resolved
}

/// Raise the running maximum of `col` to `width` if it is wider.
pub fn update_column_width(widths_by_col: &mut BTreeMap<usize, usize>, col: usize, width: usize) {
    let n_width_current = widths_by_col.entry(col).or_insert(0);
    if width > *n_width_current {
        *n_width_current = width;
    }
}

/// Estimate displayed width units of `text`.
///
/// Double-width characters (CJK ideographs, fullwidth forms) count two units,
/// others one. Multi-line text is as wide as its widest line.
pub fn estimate_text_width(text: &str) -> usize {
    text.lines()
        .map(|line| {
            line.chars()
                .map(|chr| match chr.width() {
                    Some(n) if n >= 2 => 2,
                    Some(0) => 0,
                    _ => 1,
                })
                .sum::<usize>()
        })
        .max()
        .unwrap_or(0)
}

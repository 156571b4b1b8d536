//! Streaming row emitter: grid tables and record feeds into a [`SheetSink`].
//!
//! Rows reach the sink strictly in ascending order, one at a time. Styles are
//! translated through a per-job [`StyleRegistry`]; declared spans become merged
//! ranges when the memory mode allows it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::OverflowStringCache;
use crate::conf::{N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX};
use crate::format::StyleRegistry;
use crate::grid::GridTable;
use crate::sink::{SheetSink, SpecSinkCell};
use crate::spec::{
    EnumCellValue, EnumEmitMemoryMode, Result, SpecColumnValue, SpecColumnWidthPolicy,
    SpecEmitOptions, SpecExportReport, SpecSheetReport, StyleMap, TableExportError,
};
use crate::util::{
    SheetNameRegistry, cast_col_num, cast_row_num, convert_cell_value, convert_text_value,
    create_sheet_identifier,
};

/// Everything an emitter hands back once the workbook is finalized.
pub struct SpecEmitOutcome<S> {
    /// The sink, after `finalize`.
    pub sink: S,
    /// Sheets, warnings and style count.
    pub report: SpecExportReport,
    /// Every emitted text value in emission order, when retention was enabled.
    pub retained: Option<OverflowStringCache>,
}

/// Sheet-level width of a column `n_units` wide.
pub fn calculate_column_width(n_units: usize, policy: &SpecColumnWidthPolicy) -> f64 {
    let n_width = n_units as f64 * policy.width_unit_factor + policy.width_cell_padding;
    f64::min(policy.width_cell_max, f64::max(policy.width_cell_min, n_width))
}

/// Reject option values the emitter cannot work with.
pub fn validate_emit_options(options: &SpecEmitOptions) -> Result<()> {
    let policy = &options.width_policy;
    if !(policy.width_unit_factor.is_finite() && policy.width_unit_factor >= 0.0) {
        return Err(TableExportError::InvalidOption(
            "width_unit_factor must be finite and >= 0.".to_string(),
        ));
    }
    if !(policy.width_cell_min.is_finite()
        && policy.width_cell_max.is_finite()
        && policy.width_cell_padding.is_finite())
    {
        return Err(TableExportError::InvalidOption(
            "column width bounds must be finite.".to_string(),
        ));
    }
    if policy.width_cell_min < 0.0 || policy.width_cell_max < policy.width_cell_min {
        return Err(TableExportError::InvalidOption(
            "width_cell_min/width_cell_max must satisfy 0 <= min <= max.".to_string(),
        ));
    }
    if options.n_styles_max == 0 {
        return Err(TableExportError::InvalidOption(
            "n_styles_max must be >= 1.".to_string(),
        ));
    }
    if options.n_rows_sheet_max == 0 || options.n_rows_sheet_max > N_NROWS_EXCEL_MAX {
        return Err(TableExportError::InvalidOption(format!(
            "n_rows_sheet_max must be in 1..={N_NROWS_EXCEL_MAX}."
        )));
    }
    if options.queue_depth == 0 || options.n_records_chunk == 0 {
        return Err(TableExportError::InvalidOption(
            "queue_depth and n_records_chunk must be >= 1.".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumSheetFeed {
    Grid,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecMergeRange {
    row_first: usize,
    col_first: usize,
    row_last: usize,
    col_last: usize,
}

impl SpecMergeRange {
    fn overlaps(&self, other: &SpecMergeRange) -> bool {
        self.row_first <= other.row_last
            && other.row_first <= self.row_last
            && self.col_first <= other.col_last
            && other.col_first <= self.col_last
    }

    fn covers(&self, row: usize, col: usize) -> bool {
        (self.row_first..=self.row_last).contains(&row)
            && (self.col_first..=self.col_last).contains(&col)
    }

    fn extension(&self) -> (usize, usize) {
        (
            self.row_last - self.row_first,
            self.col_last - self.col_first,
        )
    }
}

#[derive(Debug)]
struct SheetState {
    name_base: String,
    sheet_name: String,
    n_part: usize,
    feed: EnumSheetFeed,
    row_next: usize,
    n_row_offset: usize,
    n_rows: usize,
    n_cols: usize,
    dict_widths: BTreeMap<usize, f64>,
}

struct SpecEmitCell<'a> {
    col: usize,
    value: EnumCellValue,
    style: &'a Arc<StyleMap>,
    is_header: bool,
    row_span: usize,
    col_span: usize,
}

/// Single-threaded writer front of one export job.
pub struct StreamingRowEmitter<S: SheetSink> {
    sink: S,
    options: SpecEmitOptions,
    registry: StyleRegistry,
    names: SheetNameRegistry,
    report: SpecExportReport,
    cache_retained: Option<OverflowStringCache>,
    n_count_retained: usize,
    sheet: Option<SheetState>,
}

impl<S: SheetSink> StreamingRowEmitter<S> {
    /// Emitter using the CSS style translator.
    pub fn new(sink: S, options: SpecEmitOptions) -> Result<Self> {
        let registry = StyleRegistry::new(options.n_styles_max);
        Self::with_registry(sink, options, registry)
    }

    /// Emitter using a caller-built style registry.
    pub fn with_registry(sink: S, options: SpecEmitOptions, registry: StyleRegistry) -> Result<Self> {
        validate_emit_options(&options)?;
        let cache_retained = match &options.retain_strings {
            Some(options_cache) => Some(OverflowStringCache::new(options_cache)?),
            None => None,
        };
        Ok(Self {
            sink,
            options,
            registry,
            names: SheetNameRegistry::default(),
            report: SpecExportReport::default(),
            cache_retained,
            n_count_retained: 0,
            sheet: None,
        })
    }

    /// Report so far.
    pub fn report(&self) -> &SpecExportReport {
        &self.report
    }

    /// Underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Options in effect.
    pub fn options(&self) -> &SpecEmitOptions {
        &self.options
    }

    /// Write `table` as one sheet and return the sheet name actually used.
    ///
    /// The name is `sheet_name`, else the table name, else `Sheet<n>`. Column
    /// widths come from the table's per-column maximum width. The table must
    /// fit in `n_rows_sheet_max` rows; grid tables never roll over.
    pub fn emit_table(&mut self, table: &GridTable, sheet_name: Option<&str>) -> Result<String> {
        if self.sheet.is_some() {
            return Err(TableExportError::InvalidState(
                "cannot emit a table while another sheet is open".to_string(),
            ));
        }
        if let Some(n_row_last) = table.row_last()
            && n_row_last >= self.options.n_rows_sheet_max
        {
            return Err(TableExportError::IndexOverflow(format!(
                "table needs {} rows, the sheet allows {}",
                n_row_last + 1,
                self.options.n_rows_sheet_max
            )));
        }
        if table.n_cols() > N_NCOLS_EXCEL_MAX {
            return Err(TableExportError::IndexOverflow(format!(
                "table needs {} columns, Excel allows {N_NCOLS_EXCEL_MAX}",
                table.n_cols()
            )));
        }

        let c_name = sheet_name
            .or(table.name())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("Sheet{}", self.report.sheets.len() + 1));
        let dict_widths = table
            .widths()
            .iter()
            .map(|(&n_col, &n_units)| {
                (
                    n_col,
                    calculate_column_width(n_units, &self.options.width_policy),
                )
            })
            .collect();
        let c_sheet_name = self.open_sheet(&c_name, 1, EnumSheetFeed::Grid, dict_widths)?;
        let l_spans = plan_table_merges(table, &self.options, &c_sheet_name, &mut self.report);

        let if_infer_numbers = self.options.if_infer_numbers;
        for (row, l_row_spans) in table.rows().iter().zip(&l_spans) {
            let l_cells = row
                .cells()
                .iter()
                .zip(l_row_spans)
                .map(|(cell, &(n_row_span, n_col_span))| SpecEmitCell {
                    col: cell.col_idx(),
                    value: convert_text_value(cell.content(), if_infer_numbers),
                    style: cell.style(),
                    is_header: cell.is_header(),
                    row_span: n_row_span,
                    col_span: n_col_span,
                })
                .collect();
            self.emit_row(row.row_idx(), l_cells)?;
        }

        self.end_sheet()?;
        Ok(c_sheet_name)
    }

    /// Open a record-fed sheet with caller-supplied `(column, width)` pairs.
    pub fn start_sheet(&mut self, name: &str, widths: &[(usize, f64)]) -> Result<String> {
        if self.sheet.is_some() {
            return Err(TableExportError::InvalidState(
                "a sheet is already open".to_string(),
            ));
        }
        self.open_sheet(name, 1, EnumSheetFeed::Append, widths.iter().copied().collect())
    }

    /// Append `record` as the next row of the open record-fed sheet.
    pub fn append_record(&mut self, record: &[SpecColumnValue]) -> Result<()> {
        let state = self.sheet_append()?;
        let n_row = state.n_row_offset + state.row_next;
        self.append_record_at(n_row, record)
    }

    /// Append `record` at logical row `row`; rows must strictly ascend.
    ///
    /// Columns are laid out by ascending `order`. When the sheet reaches its
    /// row cap the feed continues on `<name>_2`, `<name>_3`, ...
    pub fn append_record_at(&mut self, row: usize, record: &[SpecColumnValue]) -> Result<()> {
        let state = self.sheet_append()?;
        let n_row_expected = state.n_row_offset + state.row_next;
        if row < n_row_expected {
            return Err(TableExportError::RowOutOfOrder {
                expected: n_row_expected,
                found: row,
            });
        }
        if row - state.n_row_offset >= self.options.n_rows_sheet_max {
            self.roll_over_sheet(row)?;
        }
        let n_row_offset = self.sheet_append()?.n_row_offset;

        let mut l_values: Vec<&SpecColumnValue> = record.iter().collect();
        l_values.sort_by_key(|value| value.order);
        let if_infer_numbers = self.options.if_infer_numbers;
        let l_cells = l_values
            .into_iter()
            .enumerate()
            .map(|(n_col, value)| SpecEmitCell {
                col: n_col,
                value: convert_cell_value(&value.value, if_infer_numbers),
                style: &value.style,
                is_header: false,
                row_span: 0,
                col_span: 0,
            })
            .collect();
        self.emit_row(row - n_row_offset, l_cells)
    }

    /// Close the open sheet and record it in the report.
    pub fn end_sheet(&mut self) -> Result<()> {
        let state = self
            .sheet
            .take()
            .ok_or_else(|| TableExportError::InvalidState("no open sheet".to_string()))?;
        self.sink.end_sheet()?;
        log::info!(
            "Finished sheet '{}': rows={} cols={}",
            state.sheet_name,
            state.n_rows,
            state.n_cols
        );
        self.report.sheets.push(SpecSheetReport {
            sheet_name: state.sheet_name,
            n_rows: state.n_rows,
            n_cols: state.n_cols,
        });
        Ok(())
    }

    /// Close any open sheet, finalize the sink and hand back the results.
    pub fn finish(mut self) -> Result<SpecEmitOutcome<S>> {
        if self.sheet.is_some() {
            self.end_sheet()?;
        }
        self.sink.finalize()?;
        if let Some(cache) = &self.cache_retained {
            cache.finish()?;
        }
        self.report.n_styles_distinct = self.registry.len();
        log::info!(
            "Export finished: sheets={} styles={} warnings={}",
            self.report.sheets.len(),
            self.report.n_styles_distinct,
            self.report.warnings.len()
        );
        Ok(SpecEmitOutcome {
            sink: self.sink,
            report: self.report,
            retained: self.cache_retained,
        })
    }

    fn sheet_append(&self) -> Result<&SheetState> {
        match &self.sheet {
            Some(state) if state.feed == EnumSheetFeed::Append => Ok(state),
            Some(_) => Err(TableExportError::InvalidState(
                "open sheet is fed from a grid table".to_string(),
            )),
            None => Err(TableExportError::InvalidState(
                "no open sheet; call start_sheet() first".to_string(),
            )),
        }
    }

    fn open_sheet(
        &mut self,
        name_base: &str,
        n_part: usize,
        feed: EnumSheetFeed,
        dict_widths: BTreeMap<usize, f64>,
    ) -> Result<String> {
        let c_name = if n_part > 1 {
            create_sheet_identifier(name_base, n_part)
        } else {
            name_base.to_string()
        };
        let c_sheet_name = self.names.derive_unique_sheet_name(&c_name);
        self.sink.start_sheet(&c_sheet_name)?;
        log::info!("Started sheet '{c_sheet_name}'");
        self.sheet = Some(SheetState {
            name_base: name_base.to_string(),
            sheet_name: c_sheet_name.clone(),
            n_part,
            feed,
            row_next: 0,
            n_row_offset: 0,
            n_rows: 0,
            n_cols: 0,
            dict_widths,
        });
        Ok(c_sheet_name)
    }

    fn roll_over_sheet(&mut self, row: usize) -> Result<()> {
        let state = self
            .sheet
            .as_ref()
            .ok_or_else(|| TableExportError::InvalidState("no open sheet".to_string()))?;
        let c_name_base = state.name_base.clone();
        let c_sheet_name_old = state.sheet_name.clone();
        let n_part = state.n_part + 1;
        let dict_widths = state.dict_widths.clone();

        self.end_sheet()?;
        let c_sheet_name = self.open_sheet(&c_name_base, n_part, EnumSheetFeed::Append, dict_widths)?;
        if let Some(state) = self.sheet.as_mut() {
            state.n_row_offset = row;
        }
        self.report.warn(format!(
            "Sheet '{c_sheet_name_old}' reached {} rows; continuing on '{c_sheet_name}'.",
            self.options.n_rows_sheet_max
        ));
        Ok(())
    }

    fn emit_row(&mut self, row: usize, l_cells: Vec<SpecEmitCell<'_>>) -> Result<()> {
        let state = self
            .sheet
            .as_mut()
            .ok_or_else(|| TableExportError::InvalidState("no open sheet".to_string()))?;
        if row < state.row_next {
            return Err(TableExportError::RowOutOfOrder {
                expected: state.row_next,
                found: row,
            });
        }
        cast_row_num(row)?;

        self.sink.start_row(row)?;
        for cell in l_cells {
            cast_col_num(cell.col)?;
            let n_style_id = self.registry.resolve(cell.style, cell.is_header)?;
            let format = self.registry.format(n_style_id).ok_or_else(|| {
                TableExportError::InvalidState(format!("style id {n_style_id} not registered"))
            })?;

            if let (Some(cache), EnumCellValue::String(text)) = (&self.cache_retained, &cell.value) {
                cache.put(self.n_count_retained, text.as_str())?;
                self.n_count_retained += 1;
            }

            self.sink.write_cell(&SpecSinkCell {
                row,
                col: cell.col,
                value: &cell.value,
                style_id: n_style_id,
                format,
                row_span: cell.row_span,
                col_span: cell.col_span,
                width_hint: state.dict_widths.get(&cell.col).copied(),
            })?;
            state.n_cols = state.n_cols.max(cell.col + cell.col_span + 1);
        }
        self.sink.end_row(row)?;

        state.row_next = row + 1;
        state.n_rows += 1;
        Ok(())
    }
}

/// Merged extension `(rows, cols)` rendered for every cell of `table`.
///
/// Merges are written together with their anchor cell, so they are settled
/// for the whole table before the first row goes out:
/// - with merging disabled every cell is written unmerged;
/// - in windowed mode row spans are flattened to the anchor row;
/// - a cell anchored inside an earlier vertical merge cuts that merge short
///   so it ends on the row above;
/// - a merge overlapping an earlier one is dropped.
///
/// Every change to a declared span is reported as a warning.
fn plan_table_merges(
    table: &GridTable,
    options: &SpecEmitOptions,
    sheet_name: &str,
    report: &mut SpecExportReport,
) -> Vec<Vec<(usize, usize)>> {
    let mut l_spans: Vec<Vec<(usize, usize)>> = table
        .rows()
        .iter()
        .map(|row| vec![(0, 0); row.cells().len()])
        .collect();
    if !options.if_merge_spans {
        return l_spans;
    }

    // (row position, cell position, range) of every accepted merge
    let mut l_merges: Vec<(usize, usize, SpecMergeRange)> = Vec::new();
    let mut l_idx_active: Vec<usize> = Vec::new();

    for (n_pos_row, row) in table.rows().iter().enumerate() {
        let n_row = row.row_idx();
        l_idx_active.retain(|&n_idx| l_merges[n_idx].2.row_last >= n_row);

        for (n_pos_cell, cell) in row.cells().iter().enumerate() {
            let n_col = cell.col_idx();
            for &n_idx in &l_idx_active {
                let merge = &mut l_merges[n_idx].2;
                if merge.row_first < n_row && merge.covers(n_row, n_col) {
                    report.warn(format!(
                        "Sheet '{sheet_name}' cell ({n_row}, {n_col}) lies inside the merged range anchored at ({}, {}); merge shortened to end at row {}.",
                        merge.row_first,
                        merge.col_first,
                        n_row - 1
                    ));
                    merge.row_last = n_row - 1;
                }
            }

            let mut n_row_span = cell.row_span();
            if n_row_span > 0 && options.rule_memory == EnumEmitMemoryMode::Windowed {
                report.warn(format!(
                    "Sheet '{sheet_name}' cell ({n_row}, {n_col}): row span of {} flattened to one row in windowed mode.",
                    n_row_span + 1
                ));
                n_row_span = 0;
            }
            if n_row_span == 0 && cell.col_span() == 0 {
                continue;
            }

            let merge = SpecMergeRange {
                row_first: n_row,
                col_first: n_col,
                row_last: n_row + n_row_span,
                col_last: n_col + cell.col_span(),
            };
            if l_idx_active
                .iter()
                .any(|&n_idx| l_merges[n_idx].2.overlaps(&merge))
            {
                report.warn(format!(
                    "Sheet '{sheet_name}' cell ({n_row}, {n_col}): merged range overlaps an earlier merge; written unmerged."
                ));
                continue;
            }
            l_idx_active.push(l_merges.len());
            l_merges.push((n_pos_row, n_pos_cell, merge));
        }
    }

    for (n_pos_row, n_pos_cell, merge) in l_merges {
        l_spans[n_pos_row][n_pos_cell] = merge.extension();
    }
    l_spans
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::grid::build_grid_table;
    use crate::sink::{EnumSinkEvent, FailingSheetSink, RecordingSheetSink, XlsxSheetSink};
    use crate::spec::{
        SpecGridBuildOptions, SpecOverflowCacheOptions, SpecRawCell, SpecRawRow, SpecRawTable,
    };
    use crate::style::{StyleCascade, derive_style_map};

    fn grid_of(rows: Vec<SpecRawRow>, name: Option<&str>) -> GridTable {
        let table = SpecRawTable {
            name: name.map(ToString::to_string),
            rows,
            ..Default::default()
        };
        build_grid_table(&table, &StyleCascade::new(), &SpecGridBuildOptions::default())
            .expect("build grid")
    }

    fn emitter_with(options: SpecEmitOptions) -> StreamingRowEmitter<RecordingSheetSink> {
        StreamingRowEmitter::new(RecordingSheetSink::new(), options).expect("emitter")
    }

    fn record(values: &[(usize, &str)]) -> Vec<SpecColumnValue> {
        values
            .iter()
            .map(|(n_order, c_text)| {
                SpecColumnValue::new(*n_order, EnumCellValue::String((*c_text).to_string()))
            })
            .collect()
    }

    fn cell_spans(sink: &RecordingSheetSink) -> Vec<(usize, usize, (usize, usize))> {
        sink.events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::Cell { row, col, span, .. } => Some((*row, *col, *span)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_emit_table_calls_sink_in_order() {
        let grid = grid_of(
            vec![
                SpecRawRow::new(vec![SpecRawCell::header("Name"), SpecRawCell::header("Qty")]),
                SpecRawRow::new(vec![SpecRawCell::new("apple"), SpecRawCell::new("")]),
            ],
            Some("Fruit"),
        );
        let mut emitter = emitter_with(SpecEmitOptions::default());
        let c_sheet_name = emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(c_sheet_name, "Fruit");
        let l_kinds: Vec<String> = outcome
            .sink
            .events
            .iter()
            .map(|event| match event {
                EnumSinkEvent::StartSheet(name) => format!("sheet:{name}"),
                EnumSinkEvent::StartRow(row) => format!("row:{row}"),
                EnumSinkEvent::Cell { row, col, .. } => format!("cell:{row},{col}"),
                EnumSinkEvent::EndRow(row) => format!("/row:{row}"),
                EnumSinkEvent::EndSheet => "/sheet".to_string(),
                EnumSinkEvent::Finalize => "finalize".to_string(),
            })
            .collect();
        assert_eq!(
            l_kinds,
            vec![
                "sheet:Fruit",
                "row:0",
                "cell:0,0",
                "cell:0,1",
                "/row:0",
                "row:1",
                "cell:1,0",
                "cell:1,1",
                "/row:1",
                "/sheet",
                "finalize",
            ]
        );
        assert_eq!(outcome.sink.cells()[3].2, EnumCellValue::None);
        assert_eq!(
            outcome.report.sheets,
            vec![SpecSheetReport {
                sheet_name: "Fruit".to_string(),
                n_rows: 2,
                n_cols: 2,
            }]
        );
        // header and body formats differ
        assert_eq!(outcome.report.n_styles_distinct, 2);
    }

    #[test]
    fn test_emit_table_passes_scaled_width_hints() {
        let grid = grid_of(
            vec![SpecRawRow::new(vec![
                SpecRawCell::new("x".repeat(20)),
                SpecRawCell::new("y"),
                SpecRawCell::new("z".repeat(200)),
            ])],
            None,
        );
        let options = SpecEmitOptions {
            width_policy: SpecColumnWidthPolicy {
                width_unit_factor: 1.5,
                width_cell_min: 8.0,
                width_cell_max: 60.0,
                width_cell_padding: 2.0,
            },
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        let l_hints: Vec<Option<f64>> = outcome
            .sink
            .events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::Cell { width_hint, .. } => Some(*width_hint),
                _ => None,
            })
            .collect();
        assert_eq!(l_hints, vec![Some(32.0), Some(8.0), Some(60.0)]);
        assert_eq!(outcome.report.sheets[0].sheet_name, "Sheet1");
    }

    #[test]
    fn test_spans_render_as_merges_in_memory_mode() {
        let grid = grid_of(
            vec![
                SpecRawRow::new(vec![
                    SpecRawCell::new("wide").with_col_span("2"),
                    SpecRawCell::new("tall").with_row_span("2"),
                ]),
                SpecRawRow::new(vec![SpecRawCell::new("a"), SpecRawCell::new("b")]),
            ],
            None,
        );
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(
            cell_spans(&outcome.sink),
            vec![(0, 0, (0, 1)), (0, 2, (1, 0)), (1, 0, (0, 0)), (1, 1, (0, 0))]
        );
        assert!(outcome.report.warnings.is_empty());
        assert_eq!(outcome.report.sheets[0].n_cols, 3);
    }

    #[test]
    fn test_windowed_mode_flattens_row_spans_with_warning() {
        let grid = grid_of(
            vec![SpecRawRow::new(vec![SpecRawCell::new("block")
                .with_row_span("3")
                .with_col_span("2")])],
            None,
        );
        let options = SpecEmitOptions {
            rule_memory: EnumEmitMemoryMode::Windowed,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(cell_spans(&outcome.sink), vec![(0, 0, (0, 1))]);
        assert_eq!(outcome.report.warnings.len(), 1);
        assert!(outcome.report.warnings[0].contains("windowed"));
    }

    #[test]
    fn test_cell_inside_vertical_merge_cuts_it_short() {
        let grid = grid_of(
            vec![
                SpecRawRow::new(vec![
                    SpecRawCell::new("x").with_row_span("2"),
                    SpecRawCell::new("y"),
                ]),
                SpecRawRow::new(vec![SpecRawCell::new("z")]),
            ],
            None,
        );
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(
            cell_spans(&outcome.sink),
            vec![(0, 0, (0, 0)), (0, 1, (0, 0)), (1, 0, (0, 0))]
        );
        assert_eq!(outcome.report.warnings.len(), 1);
        assert!(outcome.report.warnings[0].contains("cell (1, 0) lies inside"));
    }

    #[test]
    fn test_cut_keeps_rows_above_the_covered_cell() {
        let grid = grid_of(
            vec![
                SpecRawRow::new(vec![
                    SpecRawCell::new("tall").with_row_span("4").with_col_span("2"),
                ]),
                SpecRawRow::new(vec![]),
                SpecRawRow::new(vec![SpecRawCell::new("a"), SpecRawCell::new("b")]),
            ],
            None,
        );
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        // "b" at column 1 is also covered, but the merge already ends above it
        assert_eq!(
            cell_spans(&outcome.sink),
            vec![(0, 0, (1, 1)), (2, 0, (0, 0)), (2, 1, (0, 0))]
        );
        assert_eq!(outcome.report.warnings.len(), 1);
    }

    #[test]
    fn test_merge_overlapping_earlier_merge_is_dropped_with_warning() {
        let grid = grid_of(
            vec![
                SpecRawRow::new(vec![
                    SpecRawCell::new("x"),
                    SpecRawCell::new("tall").with_row_span("2"),
                ]),
                SpecRawRow::new(vec![SpecRawCell::new("wide").with_col_span("2")]),
            ],
            None,
        );
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(
            cell_spans(&outcome.sink),
            vec![(0, 0, (0, 0)), (0, 1, (1, 0)), (1, 0, (0, 0))]
        );
        assert_eq!(outcome.report.warnings.len(), 1);
        assert!(outcome.report.warnings[0].contains("overlaps"));
    }

    #[test]
    fn test_merging_can_be_disabled() {
        let grid = grid_of(
            vec![SpecRawRow::new(vec![SpecRawCell::new("wide").with_col_span("3")])],
            None,
        );
        let options = SpecEmitOptions {
            if_merge_spans: false,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");
        assert_eq!(cell_spans(&outcome.sink), vec![(0, 0, (0, 0))]);
    }

    #[test]
    fn test_append_records_orders_columns_and_applies_widths() {
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter
            .start_sheet("Records", &[(1, 20.0)])
            .expect("start sheet");
        emitter
            .append_record(&record(&[(5, "second"), (1, "first")]))
            .expect("append");
        emitter
            .append_record(&record(&[(1, "third"), (5, "fourth")]))
            .expect("append");
        let outcome = emitter.finish().expect("finish");

        assert_eq!(
            outcome.sink.cells(),
            vec![
                (0, 0, EnumCellValue::String("first".to_string())),
                (0, 1, EnumCellValue::String("second".to_string())),
                (1, 0, EnumCellValue::String("third".to_string())),
                (1, 1, EnumCellValue::String("fourth".to_string())),
            ]
        );
        let l_hints: Vec<Option<f64>> = outcome
            .sink
            .events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::Cell { width_hint, .. } => Some(*width_hint),
                _ => None,
            })
            .collect();
        assert_eq!(l_hints, vec![None, Some(20.0), None, Some(20.0)]);
    }

    #[test]
    fn test_rows_must_strictly_ascend() {
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.start_sheet("S", &[]).expect("start sheet");
        emitter
            .append_record_at(5, &record(&[(0, "a")]))
            .expect("append");
        assert!(matches!(
            emitter.append_record_at(5, &record(&[(0, "b")])),
            Err(TableExportError::RowOutOfOrder {
                expected: 6,
                found: 5
            })
        ));
        emitter
            .append_record(&record(&[(0, "c")]))
            .expect("append after gap");
        let outcome = emitter.finish().expect("finish");
        let l_rows: Vec<usize> = outcome.sink.cells().iter().map(|cell| cell.0).collect();
        assert_eq!(l_rows, vec![5, 6]);
    }

    #[test]
    fn test_append_rolls_over_at_row_cap() {
        let options = SpecEmitOptions {
            n_rows_sheet_max: 2,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.start_sheet("Data", &[]).expect("start sheet");
        for n_idx in 0..5 {
            let c_text = format!("r{n_idx}");
            emitter
                .append_record(&record(&[(0, c_text.as_str())]))
                .expect("append");
        }
        let outcome = emitter.finish().expect("finish");

        assert_eq!(
            outcome.sink.sheet_names(),
            vec!["Data".to_string(), "Data_2".to_string(), "Data_3".to_string()]
        );
        let l_rows: Vec<usize> = outcome.report.sheets.iter().map(|sheet| sheet.n_rows).collect();
        assert_eq!(l_rows, vec![2, 2, 1]);
        assert_eq!(outcome.report.warnings.len(), 2);
        let l_sheet_rows: Vec<usize> = outcome.sink.cells().iter().map(|cell| cell.0).collect();
        assert_eq!(l_sheet_rows, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_grid_table_taller_than_row_cap_is_rejected() {
        let grid = grid_of(
            (0..3)
                .map(|n_idx| SpecRawRow::new(vec![SpecRawCell::new(format!("r{n_idx}"))]))
                .collect(),
            Some("Tall"),
        );
        let options = SpecEmitOptions {
            n_rows_sheet_max: 2,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        assert!(matches!(
            emitter.emit_table(&grid, None),
            Err(TableExportError::IndexOverflow(_))
        ));
        assert!(emitter.sink().events.is_empty());
    }

    #[test]
    fn test_writer_failure_propagates_and_stops_rows() {
        let grid = grid_of(
            (0..6)
                .map(|n_idx| SpecRawRow::new(vec![SpecRawCell::new(format!("r{n_idx}"))]))
                .collect(),
            None,
        );
        let sink = FailingSheetSink::new(3);
        let mut emitter = StreamingRowEmitter::new(sink, SpecEmitOptions::default()).expect("emitter");

        assert!(matches!(
            emitter.emit_table(&grid, None),
            Err(TableExportError::Writer(_))
        ));
        let l_rows_started: Vec<usize> = emitter
            .sink()
            .recorder
            .events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::StartRow(row) => Some(*row),
                _ => None,
            })
            .collect();
        assert_eq!(l_rows_started, vec![0, 1, 2, 3]);
        assert_eq!(emitter.sink().recorder.cells().len(), 3);
    }

    #[test]
    fn test_xlsx_save_failure_surfaces_from_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("out.xlsx");
        let sink = XlsxSheetSink::new(&path, EnumEmitMemoryMode::InMemory);
        let mut emitter = StreamingRowEmitter::new(sink, SpecEmitOptions::default()).expect("emitter");
        let grid = grid_of(vec![SpecRawRow::new(vec![SpecRawCell::new("v")])], None);
        emitter.emit_table(&grid, None).expect("emit");

        assert!(matches!(emitter.finish(), Err(TableExportError::Writer(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_append_without_open_sheet_is_invalid() {
        let mut emitter = emitter_with(SpecEmitOptions::default());
        assert!(matches!(
            emitter.append_record(&record(&[(0, "x")])),
            Err(TableExportError::InvalidState(_))
        ));
    }

    #[test]
    fn test_duplicate_sheet_names_are_uniqued() {
        let grid = grid_of(vec![SpecRawRow::new(vec![SpecRawCell::new("v")])], Some("T"));
        let mut emitter = emitter_with(SpecEmitOptions::default());
        assert_eq!(emitter.emit_table(&grid, None).expect("emit"), "T");
        assert_eq!(emitter.emit_table(&grid, None).expect("emit"), "T__2");
        assert_eq!(emitter.emit_table(&grid, Some("a/b")).expect("emit"), "a_b");
    }

    #[test]
    fn test_numeric_inference_is_opt_in() {
        let grid = grid_of(vec![SpecRawRow::new(vec![SpecRawCell::new("42.5")])], None);

        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");
        assert_eq!(
            outcome.sink.cells()[0].2,
            EnumCellValue::String("42.5".to_string())
        );

        let options = SpecEmitOptions {
            if_infer_numbers: true,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.emit_table(&grid, None).expect("emit");
        let outcome = emitter.finish().expect("finish");
        assert_eq!(outcome.sink.cells()[0].2, EnumCellValue::Number(42.5));
    }

    #[test]
    fn test_style_limit_is_signaled() {
        let grid = grid_of(
            vec![SpecRawRow::new(vec![
                SpecRawCell::new("a").with_style("color", "red"),
                SpecRawCell::new("b").with_style("color", "blue"),
            ])],
            None,
        );
        let options = SpecEmitOptions {
            n_styles_max: 1,
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        assert!(matches!(
            emitter.emit_table(&grid, None),
            Err(TableExportError::StyleLimitExceeded { limit: 1 })
        ));
    }

    #[test]
    fn test_retained_strings_read_back_in_emission_order() {
        let options = SpecEmitOptions {
            retain_strings: Some(SpecOverflowCacheOptions {
                size_page: 2,
                n_pages_resident_max: 1,
                dir_temp: None,
            }),
            ..Default::default()
        };
        let mut emitter = emitter_with(options);
        emitter.start_sheet("S", &[]).expect("start sheet");
        for n_idx in 0..4 {
            let c_text = format!("text\n{n_idx}");
            let mut l_values = record(&[(0, c_text.as_str())]);
            l_values.push(SpecColumnValue::new(1, EnumCellValue::Number(n_idx as f64)));
            emitter.append_record(&l_values).expect("append");
        }
        let outcome = emitter.finish().expect("finish");
        let cache = outcome.retained.expect("retained cache");

        assert_eq!(cache.len().expect("len"), 4);
        for n_idx in 0..4 {
            assert_eq!(cache.get(n_idx).expect("get"), format!("text\n{n_idx}"));
        }
    }

    #[test]
    fn test_record_styles_reach_the_sink() {
        let mut emitter = emitter_with(SpecEmitOptions::default());
        emitter.start_sheet("S", &[]).expect("start sheet");
        let mut value = SpecColumnValue::new(0, EnumCellValue::String("x".to_string()));
        value.style = Arc::new(derive_style_map([("font-style", "italic")]));
        emitter.append_record(&[value]).expect("append");
        let outcome = emitter.finish().expect("finish");

        let fmt = outcome.sink.formats.values().next().expect("one format");
        assert_eq!(fmt.italic, Some(true));
    }

    #[test]
    fn test_invalid_width_policy_is_rejected() {
        let options = SpecEmitOptions {
            width_policy: SpecColumnWidthPolicy {
                width_cell_min: 10.0,
                width_cell_max: 5.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            StreamingRowEmitter::new(RecordingSheetSink::new(), options),
            Err(TableExportError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_calculate_column_width_clamps() {
        let policy = SpecColumnWidthPolicy::default();
        assert_eq!(calculate_column_width(0, &policy), 8.0);
        assert_eq!(calculate_column_width(10, &policy), 12.0);
        assert_eq!(calculate_column_width(500, &policy), 60.0);
    }
}

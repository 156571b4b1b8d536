//! Spreadsheet-writer interface and its `rust_xlsxwriter` implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, FormatUnderline, Workbook, Worksheet};

use crate::spec::{EnumCellValue, EnumEmitMemoryMode, Result, SpecCellFormat, TableExportError};
use crate::util::{cast_col_num, cast_row_num};

/// One cell handed to a [`SheetSink`].
#[derive(Debug, Clone, Copy)]
pub struct SpecSinkCell<'a> {
    /// Sheet row.
    pub row: usize,
    /// Sheet column.
    pub col: usize,
    /// Value to write.
    pub value: &'a EnumCellValue,
    /// Registry id of `format`; equal ids mean equal formats.
    pub style_id: usize,
    /// Concrete format.
    pub format: &'a SpecCellFormat,
    /// Extra rows covered by a merged range anchored here.
    pub row_span: usize,
    /// Extra columns covered by a merged range anchored here.
    pub col_span: usize,
    /// Final width of the cell's column, if known.
    pub width_hint: Option<f64>,
}

/// Ordered sheet output.
///
/// Calls arrive as `start_sheet`, then per row `start_row`, `write_cell`*,
/// `end_row`, then `end_sheet`, repeated per sheet, and one `finalize`.
pub trait SheetSink {
    /// Open a new sheet named `name` (already unique in the workbook).
    fn start_sheet(&mut self, name: &str) -> Result<()>;
    /// Begin sheet row `row`.
    fn start_row(&mut self, row: usize) -> Result<()>;
    /// Write one cell of the current row.
    fn write_cell(&mut self, cell: &SpecSinkCell<'_>) -> Result<()>;
    /// Close sheet row `row`.
    fn end_row(&mut self, row: usize) -> Result<()>;
    /// Close the current sheet.
    fn end_sheet(&mut self) -> Result<()>;
    /// Flush the workbook. Called once, after the last sheet.
    fn finalize(&mut self) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////
// #region XlsxSink

/// [`SheetSink`] writing an `.xlsx` workbook.
///
/// In [`EnumEmitMemoryMode::Windowed`] each sheet uses the writer's
/// constant-memory mode: a finished row is flushed to its temp file and can no
/// longer be changed.
pub struct XlsxSheetSink {
    path_file_out: PathBuf,
    workbook: Workbook,
    rule_memory: EnumEmitMemoryMode,
    n_idx_sheet: Option<usize>,
    n_sheets: usize,
    dict_formats: AHashMap<usize, Format>,
    dict_widths: BTreeMap<usize, f64>,
    if_closed: bool,
}

impl XlsxSheetSink {
    /// Sink bound to `path_file_out`; nothing is written before `finalize`.
    pub fn new(path_file_out: impl Into<PathBuf>, rule_memory: EnumEmitMemoryMode) -> Self {
        Self {
            path_file_out: path_file_out.into(),
            workbook: Workbook::new(),
            rule_memory,
            n_idx_sheet: None,
            n_sheets: 0,
            dict_formats: AHashMap::new(),
            dict_widths: BTreeMap::new(),
            if_closed: false,
        }
    }

    /// Output path.
    pub fn file_out(&self) -> &Path {
        &self.path_file_out
    }

    fn worksheet(&mut self) -> Result<&mut Worksheet> {
        let n_idx = self
            .n_idx_sheet
            .ok_or_else(|| TableExportError::InvalidState("no open sheet".to_string()))?;
        Ok(self.workbook.worksheet_from_index(n_idx)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.if_closed {
            return Err(TableExportError::InvalidState(
                "workbook already finalized".to_string(),
            ));
        }
        Ok(())
    }
}

impl SheetSink for XlsxSheetSink {
    fn start_sheet(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let worksheet = match self.rule_memory {
            EnumEmitMemoryMode::InMemory => self.workbook.add_worksheet(),
            EnumEmitMemoryMode::Windowed => self.workbook.add_worksheet_with_constant_memory(),
        };
        worksheet.set_name(name)?;
        self.n_idx_sheet = Some(self.n_sheets);
        self.n_sheets += 1;
        self.dict_widths.clear();
        Ok(())
    }

    fn start_row(&mut self, _row: usize) -> Result<()> {
        self.ensure_open()?;
        if self.n_idx_sheet.is_none() {
            return Err(TableExportError::InvalidState("no open sheet".to_string()));
        }
        Ok(())
    }

    fn write_cell(&mut self, cell: &SpecSinkCell<'_>) -> Result<()> {
        self.ensure_open()?;
        if let Some(n_width) = cell.width_hint {
            let n_width_current = self.dict_widths.entry(cell.col).or_insert(n_width);
            if n_width > *n_width_current {
                *n_width_current = n_width;
            }
        }

        let format = self
            .dict_formats
            .entry(cell.style_id)
            .or_insert_with(|| derive_rust_xlsx_format(cell.format))
            .clone();
        let worksheet = self.worksheet()?;

        if cell.row_span > 0 || cell.col_span > 0 {
            let c_anchor = match cell.value {
                EnumCellValue::String(val) => val.as_str(),
                _ => "",
            };
            worksheet.merge_range(
                cast_row_num(cell.row)?,
                cast_col_num(cell.col)?,
                cast_row_num(cell.row + cell.row_span)?,
                cast_col_num(cell.col + cell.col_span)?,
                c_anchor,
                &format,
            )?;
            if let EnumCellValue::Number(_) = cell.value {
                write_cell_with_format(worksheet, cell.row, cell.col, cell.value, &format)?;
            }
            return Ok(());
        }

        write_cell_with_format(worksheet, cell.row, cell.col, cell.value, &format)
    }

    fn end_row(&mut self, _row: usize) -> Result<()> {
        Ok(())
    }

    fn end_sheet(&mut self) -> Result<()> {
        self.ensure_open()?;
        let dict_widths = std::mem::take(&mut self.dict_widths);
        let worksheet = self.worksheet()?;
        for (n_col, n_width) in dict_widths {
            worksheet.set_column_width(cast_col_num(n_col)?, n_width)?;
        }
        self.n_idx_sheet = None;
        Ok(())
    }

    /// Save the workbook. Idempotent.
    fn finalize(&mut self) -> Result<()> {
        if self.if_closed {
            return Ok(());
        }
        self.workbook.save(&self.path_file_out)?;
        self.if_closed = true;
        log::info!(
            "Saved workbook {} ({} sheets)",
            self.path_file_out.display(),
            self.n_sheets
        );
        Ok(())
    }
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: &Format,
) -> Result<()> {
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;
    match value {
        EnumCellValue::None => {
            worksheet.write_blank(n_row, n_col, format)?;
        }
        EnumCellValue::String(val) => {
            worksheet.write_string_with_format(n_row, n_col, val, format)?;
        }
        EnumCellValue::Number(val) => {
            worksheet.write_number_with_format(n_row, n_col, *val, format)?;
        }
    }
    Ok(())
}

/// Build the `rust_xlsxwriter` format of `spec`.
pub fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }
    if spec.underline.unwrap_or(false) {
        format = format.set_underline(FormatUnderline::Single);
    }

    for val in [&spec.align, &spec.valign].into_iter().flatten() {
        if let Some(align) = derive_format_align(val) {
            format = format.set_align(align);
        }
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }

    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }
    if let Some(val) = spec.top {
        format = format.set_border_top(derive_format_border(val));
    }
    if let Some(val) = spec.bottom {
        format = format.set_border_bottom(derive_format_border(val));
    }
    if let Some(val) = spec.left {
        format = format.set_border_left(derive_format_border(val));
    }
    if let Some(val) = spec.right {
        format = format.set_border_right(derive_format_border(val));
    }

    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

/// Map an xlsx border index (0..=13) to its style. Unknown indices mean none.
pub fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

/// Map an alignment keyword to its horizontal or vertical alignment.
pub fn derive_format_align(align: &str) -> Option<FormatAlign> {
    match align.trim().to_ascii_lowercase().as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        "vjustify" | "vertical_justify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" | "vertical_distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RecordingSink

/// One call observed by [`RecordingSheetSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnumSinkEvent {
    /// `start_sheet(name)`.
    StartSheet(String),
    /// `start_row(row)`.
    StartRow(usize),
    /// `write_cell(..)`.
    Cell {
        /// Sheet row.
        row: usize,
        /// Sheet column.
        col: usize,
        /// Written value.
        value: EnumCellValue,
        /// Registry style id.
        style_id: usize,
        /// Merged extension `(rows, cols)`.
        span: (usize, usize),
        /// Column width hint.
        width_hint: Option<f64>,
    },
    /// `end_row(row)`.
    EndRow(usize),
    /// `end_sheet()`.
    EndSheet,
    /// `finalize()`.
    Finalize,
}

/// In-memory [`SheetSink`] that records every call, for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingSheetSink {
    /// Calls in arrival order.
    pub events: Vec<EnumSinkEvent>,
    /// Formats seen per style id.
    pub formats: BTreeMap<usize, SpecCellFormat>,
}

impl RecordingSheetSink {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(row, col, value)` triples, in arrival order.
    pub fn cells(&self) -> Vec<(usize, usize, EnumCellValue)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::Cell {
                    row, col, value, ..
                } => Some((*row, *col, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Names passed to `start_sheet`, in order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                EnumSinkEvent::StartSheet(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SheetSink for RecordingSheetSink {
    fn start_sheet(&mut self, name: &str) -> Result<()> {
        self.events.push(EnumSinkEvent::StartSheet(name.to_string()));
        Ok(())
    }

    fn start_row(&mut self, row: usize) -> Result<()> {
        self.events.push(EnumSinkEvent::StartRow(row));
        Ok(())
    }

    fn write_cell(&mut self, cell: &SpecSinkCell<'_>) -> Result<()> {
        self.formats
            .entry(cell.style_id)
            .or_insert_with(|| cell.format.clone());
        self.events.push(EnumSinkEvent::Cell {
            row: cell.row,
            col: cell.col,
            value: cell.value.clone(),
            style_id: cell.style_id,
            span: (cell.row_span, cell.col_span),
            width_hint: cell.width_hint,
        });
        Ok(())
    }

    fn end_row(&mut self, row: usize) -> Result<()> {
        self.events.push(EnumSinkEvent::EndRow(row));
        Ok(())
    }

    fn end_sheet(&mut self) -> Result<()> {
        self.events.push(EnumSinkEvent::EndSheet);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.events.push(EnumSinkEvent::Finalize);
        Ok(())
    }
}

/// [`RecordingSheetSink`] whose `write_cell` fails with an I/O error on one row.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct FailingSheetSink {
    pub(crate) recorder: RecordingSheetSink,
    row_fail: usize,
}

#[cfg(test)]
impl FailingSheetSink {
    pub(crate) fn new(row_fail: usize) -> Self {
        Self {
            recorder: RecordingSheetSink::new(),
            row_fail,
        }
    }
}

#[cfg(test)]
impl SheetSink for FailingSheetSink {
    fn start_sheet(&mut self, name: &str) -> Result<()> {
        self.recorder.start_sheet(name)
    }

    fn start_row(&mut self, row: usize) -> Result<()> {
        self.recorder.start_row(row)
    }

    fn write_cell(&mut self, cell: &SpecSinkCell<'_>) -> Result<()> {
        if cell.row == self.row_fail {
            return Err(TableExportError::Writer(rust_xlsxwriter::XlsxError::IoError(
                std::io::Error::other("disk full"),
            )));
        }
        self.recorder.write_cell(cell)
    }

    fn end_row(&mut self, row: usize) -> Result<()> {
        self.recorder.end_row(row)
    }

    fn end_sheet(&mut self) -> Result<()> {
        self.recorder.end_sheet()
    }

    fn finalize(&mut self) -> Result<()> {
        self.recorder.finalize()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sink_cell<'a>(
        row: usize,
        col: usize,
        value: &'a EnumCellValue,
        format: &'a SpecCellFormat,
    ) -> SpecSinkCell<'a> {
        SpecSinkCell {
            row,
            col,
            value,
            style_id: 0,
            format,
            row_span: 0,
            col_span: 0,
            width_hint: Some(12.0),
        }
    }

    #[test]
    fn test_derive_format_border_maps_known_indices() {
        assert_eq!(derive_format_border(1), FormatBorder::Thin);
        assert_eq!(derive_format_border(6), FormatBorder::Double);
        assert_eq!(derive_format_border(13), FormatBorder::SlantDashDot);
        assert_eq!(derive_format_border(0), FormatBorder::None);
        assert_eq!(derive_format_border(99), FormatBorder::None);
    }

    #[test]
    fn test_derive_format_align_accepts_vertical_aliases() {
        assert_eq!(derive_format_align(" Center "), Some(FormatAlign::Center));
        assert_eq!(
            derive_format_align("vertical_center"),
            Some(FormatAlign::VerticalCenter)
        );
        assert_eq!(derive_format_align("middle"), None);
    }

    #[test]
    fn test_xlsx_sink_writes_workbook_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.xlsx");
        let fmt = SpecCellFormat {
            bold: Some(true),
            border: Some(1),
            ..Default::default()
        };
        let value_text = EnumCellValue::String("merged".to_string());
        let value_num = EnumCellValue::Number(3.5);
        let value_none = EnumCellValue::None;

        let mut sink = XlsxSheetSink::new(&path, EnumEmitMemoryMode::InMemory);
        sink.start_sheet("Data").expect("start sheet");
        sink.start_row(0).expect("start row");
        let mut cell = sink_cell(0, 0, &value_text, &fmt);
        cell.col_span = 1;
        sink.write_cell(&cell).expect("merged cell");
        sink.write_cell(&sink_cell(0, 2, &value_num, &fmt))
            .expect("number cell");
        sink.end_row(0).expect("end row");
        sink.start_row(1).expect("start row");
        sink.write_cell(&sink_cell(1, 0, &value_none, &fmt))
            .expect("blank cell");
        sink.end_row(1).expect("end row");
        sink.end_sheet().expect("end sheet");
        sink.finalize().expect("finalize");
        sink.finalize().expect("finalize twice");

        let n_size = std::fs::metadata(&path).expect("metadata").len();
        assert!(n_size > 0);
        assert!(matches!(
            sink.start_sheet("Late"),
            Err(TableExportError::InvalidState(_))
        ));
    }

    #[test]
    fn test_xlsx_sink_windowed_mode_writes_workbook_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("windowed.xlsx");
        let fmt = SpecCellFormat::default();

        let mut sink = XlsxSheetSink::new(&path, EnumEmitMemoryMode::Windowed);
        sink.start_sheet("Stream").expect("start sheet");
        for n_row in 0..50 {
            let value = EnumCellValue::String(format!("row {n_row}"));
            sink.start_row(n_row).expect("start row");
            sink.write_cell(&sink_cell(n_row, 0, &value, &fmt))
                .expect("cell");
            sink.end_row(n_row).expect("end row");
        }
        sink.end_sheet().expect("end sheet");
        sink.finalize().expect("finalize");
        assert!(path.exists());
    }

    #[test]
    fn test_xlsx_sink_rejects_cell_without_sheet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = XlsxSheetSink::new(dir.path().join("x.xlsx"), EnumEmitMemoryMode::InMemory);
        let fmt = SpecCellFormat::default();
        let value = EnumCellValue::None;
        assert!(matches!(
            sink.write_cell(&sink_cell(0, 0, &value, &fmt)),
            Err(TableExportError::InvalidState(_))
        ));
    }

    #[test]
    fn test_recording_sink_keeps_call_order() {
        let fmt = SpecCellFormat::default();
        let value = EnumCellValue::String("a".to_string());
        let mut sink = RecordingSheetSink::new();
        sink.start_sheet("S").expect("start");
        sink.start_row(0).expect("row");
        sink.write_cell(&sink_cell(0, 1, &value, &fmt)).expect("cell");
        sink.end_row(0).expect("row");
        sink.end_sheet().expect("end");
        sink.finalize().expect("finalize");

        assert_eq!(sink.sheet_names(), vec!["S".to_string()]);
        assert_eq!(sink.cells(), vec![(0, 1, value.clone())]);
        assert_eq!(sink.events.len(), 6);
        assert_eq!(sink.events.last(), Some(&EnumSinkEvent::Finalize));
    }
}

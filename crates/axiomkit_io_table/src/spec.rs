//! Shared table export specification models.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::conf::{
    N_NROWS_EXCEL_MAX, N_PAGES_CACHE_RESIDENT_MAX, N_QUEUE_DEPTH_DEFAULT, N_RECORDS_CHUNK_DEFAULT,
    N_SIZE_CACHE_PAGE, N_STYLES_EXCEL_MAX,
};

/// CSS-like property name to opaque value. Absent key means "use default".
pub type StyleMap = BTreeMap<String, String>;

////////////////////////////////////////////////////////////////////////////////
// #region RawInputSpecification

/// One cell as declared by the markup collaborator, before span resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecRawCell {
    /// Declared as a header cell (`<th>`).
    pub is_header: bool,
    /// Declared row span, verbatim (may be empty or malformed).
    pub row_span: String,
    /// Declared column span, verbatim (may be empty or malformed).
    pub col_span: String,
    /// Text content.
    pub content: String,
    /// Cell-level style declarations.
    pub style: StyleMap,
}

impl SpecRawCell {
    /// Plain data cell with `content` and no spans.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Plain header cell with `content` and no spans.
    pub fn header(content: impl Into<String>) -> Self {
        Self {
            is_header: true,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the declared column span text.
    pub fn with_col_span(mut self, col_span: impl Into<String>) -> Self {
        self.col_span = col_span.into();
        self
    }

    /// Set the declared row span text.
    pub fn with_row_span(mut self, row_span: impl Into<String>) -> Self {
        self.row_span = row_span.into();
        self
    }

    /// Add one style declaration.
    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(key.into(), value.into());
        self
    }
}

/// One row as declared by the markup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecRawRow {
    /// Cells in source order.
    pub cells: Vec<SpecRawCell>,
    /// Row-level style declarations.
    pub style: StyleMap,
    /// Index into [`SpecRawTable::row_groups`], if the row sits in a group.
    pub group: Option<usize>,
}

impl SpecRawRow {
    /// Ungrouped row with no row-level style.
    pub fn new(cells: Vec<SpecRawCell>) -> Self {
        Self {
            cells,
            ..Default::default()
        }
    }

    /// Attach the row to row group `group`.
    pub fn in_group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }

    /// Add one row-level style declaration.
    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(key.into(), value.into());
        self
    }
}

/// One table as declared by the markup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecRawTable {
    /// Optional table name (used as sheet name when present).
    pub name: Option<String>,
    /// Table-level style declarations (cascade root).
    pub style: StyleMap,
    /// Row-group style declarations (`thead`/`tbody`/`tfoot`).
    pub row_groups: Vec<StyleMap>,
    /// Rows in source order.
    pub rows: Vec<SpecRawRow>,
}

/// One column value of a record in record-to-row mode.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecColumnValue {
    /// Column ordering key; columns are laid out by ascending order.
    pub order: usize,
    /// Already-extracted value.
    pub value: EnumCellValue,
    /// Already-resolved style.
    pub style: Arc<StyleMap>,
}

impl SpecColumnValue {
    /// Unstyled column value.
    pub fn new(order: usize, value: EnumCellValue) -> Self {
        Self {
            order,
            value,
            style: Arc::new(StyleMap::new()),
        }
    }
}

/// Normalized cell value during conversion/write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Concrete cell format handed to the spreadsheet writer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,
    /// Underline style.
    pub underline: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Top border override.
    pub top: Option<i64>,
    /// Bottom border override.
    pub bottom: Option<i64>,
    /// Left border override.
    pub left: Option<i64>,
    /// Right border override.
    pub right: Option<i64>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            underline: other.underline.or(self.underline),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            top: other.top.or(self.top),
            bottom: other.bottom.or(self.bottom),
            left: other.left.or(self.left),
            right: other.right.or(self.right),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

/// Grid build options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecGridBuildOptions {
    /// Maximum worker threads for row parsing; `None` picks from CPU count.
    pub num_workers_max: Option<usize>,
}

/// Overflow string cache options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecOverflowCacheOptions {
    /// Entries per page (unit of spill and reload).
    pub size_page: usize,
    /// Pages kept resident before least-recently-used eviction.
    pub n_pages_resident_max: usize,
    /// Parent directory for the segment directory; system temp when `None`.
    pub dir_temp: Option<PathBuf>,
}

impl Default for SpecOverflowCacheOptions {
    fn default() -> Self {
        Self {
            size_page: N_SIZE_CACHE_PAGE,
            n_pages_resident_max: N_PAGES_CACHE_RESIDENT_MAX,
            dir_temp: None,
        }
    }
}

/// Column width conversion from content width units to sheet width.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecColumnWidthPolicy {
    /// Multiplier from width units to sheet width.
    pub width_unit_factor: f64,
    /// Minimum final width.
    pub width_cell_min: f64,
    /// Maximum final width.
    pub width_cell_max: f64,
    /// Width padding added after scaling.
    pub width_cell_padding: f64,
}

impl Default for SpecColumnWidthPolicy {
    fn default() -> Self {
        Self {
            width_unit_factor: 1.0,
            width_cell_min: 8.0,
            width_cell_max: 60.0,
            width_cell_padding: 2.0,
        }
    }
}

/// Row retention strategy of the output sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumEmitMemoryMode {
    /// Keep the whole sheet in memory until the workbook is saved.
    #[default]
    InMemory,
    /// Flush each finished row to the writer's temp storage.
    Windowed,
}

/// Emitter options.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecEmitOptions {
    /// Row retention strategy.
    pub rule_memory: EnumEmitMemoryMode,
    /// Column width conversion.
    pub width_policy: SpecColumnWidthPolicy,
    /// Render declared spans as merged ranges.
    pub if_merge_spans: bool,
    /// Write numeric-looking text as numbers.
    pub if_infer_numbers: bool,
    /// Distinct style objects allowed before failing.
    pub n_styles_max: usize,
    /// Rows per sheet before append mode rolls over to a new sheet.
    pub n_rows_sheet_max: usize,
    /// Retain every emitted text value for read-back.
    pub retain_strings: Option<SpecOverflowCacheOptions>,
    /// Mapped batches buffered between producer and emitter.
    pub queue_depth: usize,
    /// Records per parallel mapping batch.
    pub n_records_chunk: usize,
}

impl Default for SpecEmitOptions {
    fn default() -> Self {
        Self {
            rule_memory: EnumEmitMemoryMode::InMemory,
            width_policy: SpecColumnWidthPolicy::default(),
            if_merge_spans: true,
            if_infer_numbers: false,
            n_styles_max: N_STYLES_EXCEL_MAX,
            n_rows_sheet_max: N_NROWS_EXCEL_MAX,
            retain_strings: None,
            queue_depth: N_QUEUE_DEPTH_DEFAULT,
            n_records_chunk: N_RECORDS_CHUNK_DEFAULT,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// One emitted sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetReport {
    /// Actual unique sheet name in workbook.
    pub sheet_name: String,
    /// Rows emitted.
    pub n_rows: usize,
    /// Columns occupied.
    pub n_cols: usize,
}

/// Per-export report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecExportReport {
    /// Sheets produced.
    pub sheets: Vec<SpecSheetReport>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
    /// Distinct style objects created.
    pub n_styles_distinct: usize,
}

impl SpecExportReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        log::warn!("{}", msg.as_ref());
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Result alias for table export operations.
pub type Result<T> = std::result::Result<T, TableExportError>;

/// Fatal export failures. Any of these aborts the current export job.
#[derive(Debug, Error)]
pub enum TableExportError {
    /// Secondary storage read/write failed.
    #[error("overflow segment I/O failed at {}: {source}", .path.display())]
    SegmentIo {
        /// Segment file or directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Segment file content does not match the page it should hold.
    #[error("overflow segment {} is corrupt: expected {expected} entries, found {found}", .path.display())]
    SegmentCorrupt {
        /// Segment file.
        path: PathBuf,
        /// Entries expected.
        expected: usize,
        /// Entries found.
        found: usize,
    },
    /// A page was requested that was never written to a segment.
    #[error("overflow page {page} was never finalized")]
    PageNotFinalized {
        /// Page number.
        page: usize,
    },
    /// Index lies inside a known page but was never `put`.
    #[error("overflow cache entry {index} was never stored")]
    EntryMissing {
        /// Logical index.
        index: usize,
    },
    /// `put` into a page that was already spilled.
    #[error("overflow cache entry {index} belongs to an already spilled page")]
    SegmentImmutable {
        /// Logical index.
        index: usize,
    },
    /// `put` after `finish`.
    #[error("overflow cache is finished; no more entries accepted")]
    CacheFinished,
    /// Spreadsheet writer failure.
    #[error("xlsx write error: {0}")]
    Writer(#[from] rust_xlsxwriter::XlsxError),
    /// Too many distinct style objects for the target format.
    #[error("distinct style limit exceeded: at most {limit} styles per workbook")]
    StyleLimitExceeded {
        /// Configured cap.
        limit: usize,
    },
    /// Row emitted out of strict ascending order.
    #[error("row emitted out of order: expected >= {expected}, got {found}")]
    RowOutOfOrder {
        /// Smallest acceptable row index.
        expected: usize,
        /// Row index received.
        found: usize,
    },
    /// Call sequence violated (e.g. writing a cell outside a row).
    #[error("invalid emitter state: {0}")]
    InvalidState(String),
    /// Invalid option value.
    #[error("invalid option: {0}")]
    InvalidOption(String),
    /// Row/column index does not fit the target format.
    #[error("index overflow: {0}")]
    IndexOverflow(String),
    /// DataFrame access failed.
    #[error("dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
    /// A shared lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

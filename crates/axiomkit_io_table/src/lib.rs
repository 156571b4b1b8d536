//! `axiomkit_io_table` v1:
//! Table layout normalization and bounded-memory streaming export to XLSX.
//!
//! Architecture follows the `axiomkit_io_*` crates:
//! - `conf`     : constants and default presets
//! - `spec`     : specs/models/options, report and error types
//! - `util`     : pure helper functions
//! - `span`     : span resolution and content width
//! - `style`    : style cascade with memoization
//! - `grid`     : normalized table grid and its parallel builder
//! - `lru`      : arena LRU over page handles
//! - `cache`    : overflow string cache with disk spillover
//! - `format`   : style translation and style registry
//! - `sink`     : spreadsheet-writer interface and XLSX sink
//! - `emitter`  : streaming row emitter
//! - `pipeline` : parallel production, sequential emission, export helpers
//! - `html`     : HTML table adapter
//! - `feed`     : DataFrame/IPC record feed
pub mod cache;
pub mod conf;
pub mod emitter;
pub mod feed;
pub mod format;
pub mod grid;
pub mod html;
pub mod lru;
pub mod pipeline;
pub mod sink;
pub mod span;
pub mod spec;
pub mod style;
pub mod util;

pub use cache::OverflowStringCache;
pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_SIZE_CACHE_PAGE,
    N_STYLES_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
pub use emitter::{SpecEmitOutcome, StreamingRowEmitter, calculate_column_width};
pub use feed::{derive_dataframe_from_ipc_bytes, derive_records_from_dataframe};
pub use format::{CssStyleTranslator, StyleRegistry, StyleTranslator};
pub use grid::{GridCell, GridRow, GridTable, build_grid_table, build_grid_tables};
pub use html::parse_html_tables;
pub use lru::PageLru;
pub use pipeline::{
    emit_records_parallel, export_dataframe_to_xlsx, export_html_to_xlsx, export_tables_to_xlsx,
};
pub use sink::{EnumSinkEvent, RecordingSheetSink, SheetSink, SpecSinkCell, XlsxSheetSink};
pub use span::{SpecResolvedRow, estimate_text_width, parse_span_extension, resolve_row};
pub use spec::{
    EnumCellValue, EnumEmitMemoryMode, Result, SpecCellFormat, SpecColumnValue,
    SpecColumnWidthPolicy, SpecEmitOptions, SpecExportReport, SpecGridBuildOptions,
    SpecOverflowCacheOptions, SpecRawCell, SpecRawRow, SpecRawTable, SpecSheetReport, StyleMap,
    TableExportError,
};
pub use style::{SpecCascadeStats, StyleCascade, cascade_style, parse_inline_style};
pub use util::{SheetNameRegistry, sanitize_sheet_name};

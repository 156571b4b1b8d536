//! Table export constants and default preset factories.

use crate::spec::{
    SpecCellFormat, SpecColumnWidthPolicy, SpecEmitOptions, SpecGridBuildOptions,
    SpecOverflowCacheOptions,
};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];
/// Distinct cell style objects allowed per workbook.
pub const N_STYLES_EXCEL_MAX: usize = 64_000;

/// Entries per overflow cache page.
pub const N_SIZE_CACHE_PAGE: usize = 1_000;
/// Pages kept resident by the overflow cache before LRU eviction.
pub const N_PAGES_CACHE_RESIDENT_MAX: usize = 8;
/// Record separator used in spilled segment files.
pub const CHR_SEGMENT_RECORD_SEP: char = '\n';
/// Line written for a slot that was never `put`.
pub const C_SEGMENT_ABSENT_SLOT: &str = "\\x";

/// Records per parallel mapping batch in the append pipeline.
pub const N_RECORDS_CHUNK_DEFAULT: usize = 2_000;
/// Mapped batches buffered between producer and emitter.
pub const N_QUEUE_DEPTH_DEFAULT: usize = 4;

/// Points per CSS pixel.
pub const N_PT_PER_PX: f64 = 0.75;

/// Build the base format every body cell starts from.
pub fn derive_default_text_format() -> SpecCellFormat {
    SpecCellFormat {
        font_name: Some("Times New Roman".to_string()),
        font_size: Some(11),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    }
}

/// Build the base format every header cell starts from.
pub fn derive_default_header_format() -> SpecCellFormat {
    derive_default_text_format().with_(SpecCellFormat {
        bold: Some(true),
        align: Some("center".to_string()),
        ..Default::default()
    })
}

/// Build default grid build options.
pub fn derive_default_grid_build_options() -> SpecGridBuildOptions {
    SpecGridBuildOptions::default()
}

/// Build default overflow cache options.
pub fn derive_default_overflow_cache_options() -> SpecOverflowCacheOptions {
    SpecOverflowCacheOptions::default()
}

/// Build default column width policy.
pub fn derive_default_column_width_policy() -> SpecColumnWidthPolicy {
    SpecColumnWidthPolicy::default()
}

/// Build default emit options.
pub fn derive_default_emit_options() -> SpecEmitOptions {
    SpecEmitOptions::default()
}

//! Stateless helper utilities shared by the grid builder and emitter.

use std::collections::BTreeSet;

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL};
use crate::spec::{EnumCellValue, Result, TableExportError};

////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Turn cell text into a value, optionally promoting finite numeric text.
pub fn convert_text_value(text: &str, if_infer_numbers: bool) -> EnumCellValue {
    if text.is_empty() {
        return EnumCellValue::None;
    }
    if if_infer_numbers {
        let c_trimmed = text.trim();
        if let Ok(n_value) = c_trimmed.parse::<f64>()
            && n_value.is_finite()
            && !c_trimmed.is_empty()
        {
            return EnumCellValue::Number(n_value);
        }
    }
    EnumCellValue::String(text.to_string())
}

/// Promote numeric-looking strings in an already extracted value.
pub fn convert_cell_value(value: &EnumCellValue, if_infer_numbers: bool) -> EnumCellValue {
    match value {
        EnumCellValue::String(s) => convert_text_value(s, if_infer_numbers),
        EnumCellValue::Number(n) if !n.is_finite() => EnumCellValue::String(n.to_string()),
        other => other.clone(),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region IndexCasting

/// Checked conversion to the writer's row index type.
pub fn cast_row_num(value: usize) -> Result<u32> {
    if value >= N_NROWS_EXCEL_MAX {
        return Err(TableExportError::IndexOverflow(format!(
            "row index {value} exceeds Excel limit {N_NROWS_EXCEL_MAX}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| TableExportError::IndexOverflow(format!("row index overflow: {value}")))
}

/// Checked conversion to the writer's column index type.
pub fn cast_col_num(value: usize) -> Result<u16> {
    if value >= N_NCOLS_EXCEL_MAX {
        return Err(TableExportError::IndexOverflow(format!(
            "column index {value} exceeds Excel limit {N_NCOLS_EXCEL_MAX}"
        )));
    }
    u16::try_from(value)
        .map_err(|_| TableExportError::IndexOverflow(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Workers

/// Resolve worker thread count from an optional cap.
pub fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu),
        None => n_cpu.clamp(1, 8),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().trim_matches('\'').to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Create suffixed sheet name (`base_1`, `base_2`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, part_idx_1based: usize) -> String {
    let c_sheet_name_suffix = format!("_{part_idx_1based}");
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name
        .chars()
        .take(usize::max(1, n_len_base_name_max))
        .collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

/// Names already used in one workbook. Excel compares sheet names case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct SheetNameRegistry {
    set_names_lower: BTreeSet<String>,
}

impl SheetNameRegistry {
    /// Sanitize `name` and make it unique within this workbook.
    pub fn derive_unique_sheet_name(&mut self, name: &str) -> String {
        let c_name = sanitize_sheet_name(name, "_");
        if self.set_names_lower.insert(c_name.to_lowercase()) {
            return c_name;
        }

        let base_name: String = c_name
            .chars()
            .take(usize::max(1, N_LEN_EXCEL_SHEET_NAME_MAX - 3))
            .collect();

        let mut n_idx = 2usize;
        loop {
            let candidate: String = format!("{base_name}__{n_idx}")
                .chars()
                .take(N_LEN_EXCEL_SHEET_NAME_MAX)
                .collect();
            if self.set_names_lower.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n_idx += 1;
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

//! Record feed from Polars frames.
//!
//! A frame becomes one header record (column names) followed by one record
//! per row; column order is the frame's column order.

use std::io::Cursor;
use std::sync::Arc;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};

use crate::spec::{EnumCellValue, Result, SpecColumnValue, StyleMap};
use crate::style::derive_style_map;

/// Style of the header record.
pub fn derive_header_style() -> Arc<StyleMap> {
    Arc::new(derive_style_map([
        ("font-weight", "bold"),
        ("text-align", "center"),
        ("border-bottom", "1px solid"),
    ]))
}

/// Column names of `df` as one record.
pub fn derive_header_record(df: &DataFrame) -> Vec<SpecColumnValue> {
    let style = derive_header_style();
    df.get_column_names_str()
        .into_iter()
        .enumerate()
        .map(|(n_idx, c_name)| SpecColumnValue {
            order: n_idx,
            value: EnumCellValue::String(c_name.to_string()),
            style: Arc::clone(&style),
        })
        .collect()
}

/// Row `row_idx` of `df` as one record.
pub fn derive_record_from_row(df: &DataFrame, row_idx: usize) -> Result<Vec<SpecColumnValue>> {
    let style = Arc::new(StyleMap::new());
    df.get_columns()
        .iter()
        .enumerate()
        .map(|(n_idx, col)| -> Result<SpecColumnValue> {
            Ok(SpecColumnValue {
                order: n_idx,
                value: derive_cell_value_from_any_value(col.get(row_idx)?),
                style: Arc::clone(&style),
            })
        })
        .collect()
}

/// Header record followed by every row of `df`.
pub fn derive_records_from_dataframe(df: &DataFrame) -> Result<Vec<Vec<SpecColumnValue>>> {
    let mut l_records = Vec::with_capacity(df.height() + 1);
    l_records.push(derive_header_record(df));
    for n_idx_row in 0..df.height() {
        l_records.push(derive_record_from_row(df, n_idx_row)?);
    }
    Ok(l_records)
}

/// Read a frame from Polars IPC bytes.
pub fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame> {
    Ok(IpcReader::new(Cursor::new(v_ipc_df)).finish()?)
}

/// Normalize one frame value.
pub fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => {
            EnumCellValue::String(if val { "True" } else { "False" }.to_string())
        }
        AnyValue::UInt8(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int8(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int16(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float32(val) if val.is_finite() => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) if val.is_finite() => EnumCellValue::Number(val),
        AnyValue::Float32(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Float64(val) => EnumCellValue::String(val.to_string()),
        _ => EnumCellValue::String(value.to_string()),
    }
}

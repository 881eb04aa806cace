//! Normalization of provider result pages into [`ResultSet`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::core::errors::QueryError;
use crate::core::types::{CellValue, ColumnMetadata, ResultSet};
use crate::core::warehouse::{RawColumn, RawField, RawStatementResult};

pub fn transform(raw: RawStatementResult) -> Result<ResultSet, QueryError> {
    let column_metadata: Vec<ColumnMetadata> = raw
        .column_metadata
        .unwrap_or_default()
        .into_iter()
        .map(column)
        .collect();
    let width = column_metadata.len();

    let raw_records = raw.records.unwrap_or_default();
    let mut records = Vec::with_capacity(raw_records.len());
    for (row_idx, raw_row) in raw_records.into_iter().enumerate() {
        if raw_row.len() != width {
            return Err(QueryError::Transform(format!(
                "row {} has {} cells but {} columns were described",
                row_idx,
                raw_row.len(),
                width
            )));
        }
        let row = raw_row
            .into_iter()
            .enumerate()
            .map(|(col_idx, field)| {
                cell(field).map_err(|reason| {
                    QueryError::Transform(format!("row {} column {}: {}", row_idx, col_idx, reason))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        records.push(row);
    }

    let total_num_rows = match raw.total_num_rows {
        Some(n) if n >= 0 => n as u64,
        _ => records.len() as u64,
    };

    Ok(ResultSet {
        column_metadata,
        records,
        total_num_rows,
    })
}

fn column(raw: RawColumn) -> ColumnMetadata {
    ColumnMetadata {
        name: raw.name.or(raw.label).unwrap_or_default(),
        type_name: raw.type_name.unwrap_or_default(),
    }
}

fn cell(field: Option<RawField>) -> Result<CellValue, String> {
    let Some(field) = field else {
        return Ok(CellValue::Null);
    };
    let populated = [
        field.boolean_value.is_some(),
        field.long_value.is_some(),
        field.double_value.is_some(),
        field.string_value.is_some(),
        field.blob_value.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if populated > 1 {
        return Err(format!("{} value fields populated", populated));
    }
    if field.is_null == Some(true) {
        if populated > 0 {
            return Err("null marker alongside a value".to_string());
        }
        return Ok(CellValue::Null);
    }

    let value = if let Some(v) = field.boolean_value {
        CellValue::Bool(v)
    } else if let Some(v) = field.long_value {
        CellValue::Long(v)
    } else if let Some(v) = field.double_value {
        CellValue::Double(v)
    } else if let Some(v) = field.string_value {
        CellValue::String(v)
    } else if let Some(v) = field.blob_value {
        CellValue::Blob(
            STANDARD
                .decode(v.as_bytes())
                .map_err(|e| format!("invalid base64 blob: {}", e))?,
        )
    } else {
        CellValue::Null
    };
    Ok(value)
}

//! Columnar output tables.
//!
//! Column types are inferred from the cells: booleans, integers, floats and strings map to
//! their Arrow counterparts, integers mixed with floats widen to floats, and anything else
//! (nested objects, arrays, mixed kinds, all-null) is stored as text. Every column is nullable.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use tracing::{error, info};

use crate::checkpoint::temp_path;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Mixed,
}

impl CellKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => CellKind::Null,
            Value::Bool(_) => CellKind::Bool,
            Value::Number(n) if n.is_i64() => CellKind::Int,
            Value::Number(_) => CellKind::Float,
            Value::String(_) => CellKind::Str,
            Value::Array(_) | Value::Object(_) => CellKind::Mixed,
        }
    }

    fn merge(self, other: Self) -> Self {
        use CellKind::*;
        match (self, other) {
            (Null, k) | (k, Null) => k,
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            _ => Mixed,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            CellKind::Bool => DataType::Boolean,
            CellKind::Int => DataType::Int64,
            CellKind::Float => DataType::Float64,
            CellKind::Null | CellKind::Str | CellKind::Mixed => DataType::Utf8,
        }
    }
}

fn cell(row: &[Value], index: usize) -> &Value {
    row.get(index).unwrap_or(&Value::Null)
}

fn column_kind(rows: &[Vec<Value>], index: usize) -> CellKind {
    rows.iter()
        .map(|row| CellKind::of(cell(row, index)))
        .fold(CellKind::Null, CellKind::merge)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn build_column(rows: &[Vec<Value>], index: usize, data_type: &DataType) -> ArrayRef {
    let cells = rows.iter().map(|row| cell(row, index));
    match data_type {
        DataType::Boolean => Arc::new(cells.map(Value::as_bool).collect::<BooleanArray>()),
        DataType::Int64 => Arc::new(cells.map(Value::as_i64).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(cells.map(Value::as_f64).collect::<Float64Array>()),
        _ => Arc::new(cells.map(as_text).collect::<StringArray>()),
    }
}

/// Build a single batch from row-major cells. Rows shorter than `columns` are padded with
/// nulls.
pub fn record_batch(rows: &[Vec<Value>], columns: &[String]) -> Result<RecordBatch> {
    if columns.is_empty() {
        return Err(AppError::Input("table has no columns".to_string()));
    }

    let fields: Vec<Field> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| Field::new(name, column_kind(rows, i).data_type(), true))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let arrays: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| build_column(rows, i, field.data_type()))
        .collect();
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Write the table and return the number of rows written.
pub fn write_table(rows: &[Vec<Value>], columns: &[String], path: &Path) -> Result<usize> {
    let batch = record_batch(rows, columns)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let written = write_batch(&batch, &tmp).and_then(|n| {
        fs::rename(&tmp, path)?;
        Ok(n)
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_batch(batch: &RecordBatch, path: &Path) -> Result<usize> {
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(batch.num_rows())
}

/// Write the table, logging the outcome. Returns `false` on any failure.
pub fn save_table(rows: &[Vec<Value>], columns: &[String], path: &Path) -> bool {
    match write_table(rows, columns, path) {
        Ok(n) => {
            info!(rows = n, columns = columns.len(), "Saved {n} rows to {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to save table to {}: {e}", path.display());
            false
        }
    }
}

//! Conversion of BigQuery JSON rows into an Arrow table.
//!
//! BigQuery returns every scalar as a JSON string. Numeric, boolean and
//! timestamp columns are parsed into native Arrow types; everything else
//! (dates, numerics, bytes, geography) stays text. Nested `RECORD` and
//! `REPEATED` values are kept as their JSON text.

use crate::api::{FieldSchema, TableRow, TableSchema};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use costgate_core::WarehouseError;
use serde_json::Value;
use std::sync::Arc;

const UTC: &str = "UTC";

enum ColumnBuilder {
    Int64(Int64Builder),
    Float64(Float64Builder),
    Boolean(BooleanBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Utf8(StringBuilder),
}

impl ColumnBuilder {
    fn for_field(field: &FieldSchema, capacity: usize) -> Self {
        if field.is_repeated() {
            return Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16));
        }
        match field.field_type.as_str() {
            "INTEGER" | "INT64" => Self::Int64(Int64Builder::with_capacity(capacity)),
            "FLOAT" | "FLOAT64" => Self::Float64(Float64Builder::with_capacity(capacity)),
            "BOOLEAN" | "BOOL" => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            "TIMESTAMP" => Self::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone(UTC),
            ),
            _ => Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Boolean(_) => DataType::Boolean,
            Self::Timestamp(_) => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    fn append(&mut self, column: &str, value: &Value) -> Result<(), WarehouseError> {
        if value.is_null() {
            match self {
                Self::Int64(b) => b.append_null(),
                Self::Float64(b) => b.append_null(),
                Self::Boolean(b) => b.append_null(),
                Self::Timestamp(b) => b.append_null(),
                Self::Utf8(b) => b.append_null(),
            }
            return Ok(());
        }

        match self {
            Self::Int64(b) => b.append_value(parse_scalar(column, value)?),
            Self::Float64(b) => b.append_value(parse_scalar(column, value)?),
            Self::Boolean(b) => b.append_value(parse_scalar(column, value)?),
            Self::Timestamp(b) => {
                let seconds: f64 = parse_scalar(column, value)?;
                b.append_value((seconds * 1_000_000.0).round() as i64);
            }
            Self::Utf8(b) => match value {
                Value::String(s) => b.append_value(s),
                other => b.append_value(other.to_string()),
            },
        }
        Ok(())
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Int64(mut b) => Arc::new(b.finish()),
            Self::Float64(mut b) => Arc::new(b.finish()),
            Self::Boolean(mut b) => Arc::new(b.finish()),
            Self::Timestamp(mut b) => Arc::new(b.finish()),
            Self::Utf8(mut b) => Arc::new(b.finish()),
        }
    }
}

fn parse_scalar<T: std::str::FromStr>(column: &str, value: &Value) -> Result<T, WarehouseError> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.parse().map_err(|_| {
        WarehouseError::Decode(format!("column `{column}`: cannot parse value `{text}`"))
    })
}

/// Build one table from a schema and the rows of every fetched page.
///
/// A statement without a result schema (DDL, DML) yields a table with no
/// columns and no rows.
pub fn rows_to_batch(
    schema: Option<&TableSchema>,
    rows: &[TableRow],
) -> Result<RecordBatch, WarehouseError> {
    let Some(schema) = schema.filter(|s| !s.fields.is_empty()) else {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    };

    let mut builders: Vec<ColumnBuilder> = schema
        .fields
        .iter()
        .map(|f| ColumnBuilder::for_field(f, rows.len()))
        .collect();

    for (index, row) in rows.iter().enumerate() {
        if row.f.len() != schema.fields.len() {
            return Err(WarehouseError::Decode(format!(
                "row {index} has {} cells but the schema has {} fields",
                row.f.len(),
                schema.fields.len()
            )));
        }
        for ((builder, field), cell) in builders.iter_mut().zip(&schema.fields).zip(&row.f) {
            builder.append(&field.name, &cell.v)?;
        }
    }

    let fields: Vec<Field> = schema
        .fields
        .iter()
        .zip(&builders)
        .map(|(f, b)| Field::new(&f.name, b.data_type(), true))
        .collect();
    let columns: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .map_err(|e| WarehouseError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use serde_json::json;

    fn schema(value: Value) -> TableSchema {
        serde_json::from_value(value).unwrap()
    }

    fn rows(value: Value) -> Vec<TableRow> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scalar_types() {
        let schema = schema(json!({"fields": [
            {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
            {"name": "score", "type": "FLOAT"},
            {"name": "active", "type": "BOOLEAN"},
            {"name": "seen_at", "type": "TIMESTAMP"},
            {"name": "day", "type": "DATE"},
        ]}));
        let rows = rows(json!([
            {"f": [{"v": "1"}, {"v": "0.5"}, {"v": "true"}, {"v": "1.7040672E9"}, {"v": "2024-01-01"}]},
            {"f": [{"v": "2"}, {"v": null}, {"v": "false"}, {"v": null}, {"v": null}]},
        ]));

        let batch = rows_to_batch(Some(&schema), &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 5);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 1);
        assert_eq!(ids.value(1), 2);

        let scores = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(scores.value(0), 0.5);
        assert!(scores.is_null(1));

        let active = batch.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(active.value(0));
        assert!(!active.value(1));

        let seen = batch
            .column(3)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(seen.value(0), 1_704_067_200_000_000);
        assert!(seen.is_null(1));

        let days = batch.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(days.value(0), "2024-01-01");
    }

    #[test]
    fn test_nested_values_become_json_text() {
        let schema = schema(json!({"fields": [
            {"name": "tags", "type": "STRING", "mode": "REPEATED"},
            {"name": "address", "type": "RECORD"},
        ]}));
        let rows = rows(json!([
            {"f": [{"v": [{"v": "a"}, {"v": "b"}]}, {"v": {"f": [{"v": "Rome"}]}}]},
        ]));

        let batch = rows_to_batch(Some(&schema), &rows).unwrap();
        let tags = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(tags.value(0), r#"[{"v":"a"},{"v":"b"}]"#);
        let address = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(address.value(0), r#"{"f":[{"v":"Rome"}]}"#);
    }

    #[test]
    fn test_no_schema_yields_empty_table() {
        let batch = rows_to_batch(None, &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn test_unparseable_integer() {
        let schema = schema(json!({"fields": [{"name": "id", "type": "INTEGER"}]}));
        let rows = rows(json!([{"f": [{"v": "twelve"}]}]));

        let err = rows_to_batch(Some(&schema), &rows).unwrap_err();
        assert!(err.to_string().contains("column `id`"));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let schema = schema(json!({"fields": [
            {"name": "a", "type": "STRING"},
            {"name": "b", "type": "STRING"},
        ]}));
        let rows = rows(json!([{"f": [{"v": "only one"}]}]));

        assert!(matches!(
            rows_to_batch(Some(&schema), &rows),
            Err(WarehouseError::Decode(_))
        ));
    }
}

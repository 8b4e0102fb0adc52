//! Binary tabular formats: Parquet (via Arrow) and spreadsheets.

use crate::models::{Cell, Column};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::io::{Cursor, Seek, SeekFrom, Write};
use tracing::debug;

/// Parse Parquet bytes into columns.
///
/// The Parquet reader needs a seekable file, so the bytes are staged in a
/// temporary file that is removed when the function returns.
pub(crate) fn parse_parquet(bytes: &[u8]) -> Result<Vec<Column>, String> {
    let mut file = tempfile::tempfile().map_err(|e| format!("failed to stage Parquet data: {}", e))?;
    file.write_all(bytes)
        .and_then(|_| file.seek(SeekFrom::Start(0)).map(|_| ()))
        .map_err(|e| format!("failed to stage Parquet data: {}", e))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| format!("failed to parse Parquet file: {}", e))?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder
        .build()
        .map_err(|e| format!("failed to create Parquet reader: {}", e))?;

    let mut columns: Vec<Column> = names.into_iter().map(|n| Column::new(n, Vec::new())).collect();
    for batch in reader {
        let batch = batch.map_err(|e| format!("failed to read record batch: {}", e))?;
        debug!("Read Parquet batch with {} rows", batch.num_rows());
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            column.values.extend(array_cells(array)?);
        }
    }

    Ok(columns)
}

fn array_cells(array: &ArrayRef) -> Result<Vec<Cell>, String> {
    let mut cells = Vec::with_capacity(array.len());
    for row in 0..array.len() {
        if array.is_null(row) {
            cells.push(Cell::Missing);
            continue;
        }
        let cell = match array.data_type() {
            DataType::Boolean => Cell::Bool(array.as_boolean().value(row)),
            DataType::Int8 => number(array.as_primitive::<Int8Type>().value(row) as f64),
            DataType::Int16 => number(array.as_primitive::<Int16Type>().value(row) as f64),
            DataType::Int32 => number(array.as_primitive::<Int32Type>().value(row) as f64),
            DataType::Int64 => number(array.as_primitive::<Int64Type>().value(row) as f64),
            DataType::UInt8 => number(array.as_primitive::<UInt8Type>().value(row) as f64),
            DataType::UInt16 => number(array.as_primitive::<UInt16Type>().value(row) as f64),
            DataType::UInt32 => number(array.as_primitive::<UInt32Type>().value(row) as f64),
            DataType::UInt64 => number(array.as_primitive::<UInt64Type>().value(row) as f64),
            DataType::Float32 => number(array.as_primitive::<Float32Type>().value(row) as f64),
            DataType::Float64 => number(array.as_primitive::<Float64Type>().value(row)),
            DataType::Utf8 => Cell::parse(array.as_string::<i32>().value(row)),
            DataType::LargeUtf8 => Cell::parse(array.as_string::<i64>().value(row)),
            _ => Cell::Text(
                arrow::util::display::array_value_to_string(array.as_ref(), row)
                    .map_err(|e| format!("unsupported Parquet value: {}", e))?,
            ),
        };
        cells.push(cell);
    }
    Ok(cells)
}

fn number(value: f64) -> Cell {
    if value.is_finite() {
        Cell::Number(value)
    } else {
        Cell::Missing
    }
}

/// Parse the first sheet of a workbook; its first row is the header.
pub(crate) fn parse_excel(bytes: &[u8]) -> Result<Vec<Column>, String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| format!("failed to open workbook: {}", e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no sheets".to_string())?
        .map_err(|e| format!("failed to read first sheet: {}", e))?;

    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| "first sheet is empty".to_string())?;
    let mut columns: Vec<Column> = header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let name = cell.to_string();
            let name = if name.trim().is_empty() {
                format!("column_{}", i + 1)
            } else {
                name.trim().to_string()
            };
            Column::new(name, Vec::new())
        })
        .collect();

    for row in rows {
        for (column, cell) in columns.iter_mut().zip(row) {
            column.values.push(sheet_cell(cell));
        }
    }

    Ok(columns)
}

fn sheet_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Missing,
        Data::Int(value) => number(*value as f64),
        Data::Float(value) => number(*value),
        Data::Bool(flag) => Cell::Bool(*flag),
        Data::String(text) => Cell::parse(text),
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Float64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn test_parquet_roundtrip_into_cells() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("treated", DataType::Boolean, false),
            Field::new("outcome", DataType::Float64, true),
            Field::new("segment", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(BooleanArray::from(vec![true, false, true])),
                Arc::new(Float64Array::from(vec![Some(1.5), None, Some(2.5)])),
                Arc::new(StringArray::from(vec!["A", "B", "A"])),
            ],
        )
        .unwrap();

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let columns = parse_parquet(&buffer).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].values[0], Cell::Bool(true));
        assert_eq!(columns[1].values[1], Cell::Missing);
        assert_eq!(columns[2].values[2], Cell::Text("A".to_string()));
    }

    #[test]
    fn test_parquet_garbage_is_an_error() {
        assert!(parse_parquet(b"PAR1 not really").is_err());
    }

    #[test]
    fn test_excel_garbage_is_an_error() {
        assert!(parse_excel(b"PK\x03\x04 not a workbook").is_err());
    }

    #[test]
    fn test_sheet_cell_mapping() {
        assert_eq!(sheet_cell(&Data::Int(3)), Cell::Number(3.0));
        assert_eq!(sheet_cell(&Data::Empty), Cell::Missing);
        assert_eq!(sheet_cell(&Data::String("NA".into())), Cell::Missing);
        assert_eq!(sheet_cell(&Data::Bool(false)), Cell::Bool(false));
    }
}

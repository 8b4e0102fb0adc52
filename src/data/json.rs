//! JSON and JSON Lines parsing.

use crate::models::{Cell, Column};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Parse a JSON document in records, columns or index orientation.
pub(crate) fn parse_json(text: &str) -> Result<Vec<Column>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;

    match value {
        Value::Array(items) => {
            let records = items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| "array elements must be objects".to_string())
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(from_records(records))
        }
        Value::Object(map) => {
            if map.is_empty() {
                return Err("empty JSON object".to_string());
            }
            if map.values().all(Value::is_array) {
                from_column_arrays(&map)
            } else if map.values().all(Value::is_object) {
                Ok(from_records(
                    map.values().filter_map(Value::as_object).collect(),
                ))
            } else {
                Err("unsupported JSON structure: expected records, columns or index orientation"
                    .to_string())
            }
        }
        _ => Err("unsupported JSON structure: top level must be an array or object".to_string()),
    }
}

/// Parse newline-delimited JSON records.
pub(crate) fn parse_json_lines(text: &str) -> Result<Vec<Column>, String> {
    let values = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Value>(line)
                .map_err(|e| format!("invalid JSON on line {}: {}", index + 1, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let records = values
        .iter()
        .map(|v| {
            v.as_object()
                .ok_or_else(|| "each line must be a JSON object".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(from_records(records))
}

fn from_records(records: Vec<&Map<String, Value>>) -> Vec<Column> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut columns: Vec<Column> = Vec::new();

    for record in &records {
        for key in record.keys() {
            if !index.contains_key(key.as_str()) {
                index.insert(key.as_str(), columns.len());
                columns.push(Column::new(key.clone(), Vec::with_capacity(records.len())));
            }
        }
    }

    for record in &records {
        for column in columns.iter_mut() {
            let cell = record.get(&column.name).map(to_cell).unwrap_or(Cell::Missing);
            column.values.push(cell);
        }
    }

    columns
}

fn from_column_arrays(map: &Map<String, Value>) -> Result<Vec<Column>, String> {
    let mut columns = Vec::with_capacity(map.len());
    let mut expected: Option<(String, usize)> = None;

    for (name, value) in map {
        let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
        match &expected {
            Some((first, len)) if *len != items.len() => {
                return Err(format!(
                    "column `{}` has {} values but `{}` has {}",
                    name,
                    items.len(),
                    first,
                    len
                ));
            }
            None => expected = Some((name.clone(), items.len())),
            _ => {}
        }
        columns.push(Column::new(name.clone(), items.iter().map(to_cell).collect()));
    }

    Ok(columns)
}

fn to_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Missing,
        Value::Bool(flag) => Cell::Bool(*flag),
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Cell::Number)
            .unwrap_or(Cell::Missing),
        Value::String(s) => Cell::parse(s),
        other => Cell::Text(other.to_string()),
    }
}

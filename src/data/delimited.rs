//! Delimited text parsing (CSV, TSV, pipe- or semicolon-separated).

use crate::models::{Cell, Column};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// Delimiters considered by auto-detection, in tie-break order.
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Text encodings the loader can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    /// Parse loose spellings such as `UTF-8`, `latin-1` or `iso-8859-1`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" | "cp1252" | "windows-1252" => {
                Some(Encoding::Latin1)
            }
            _ => None,
        }
    }
}

/// Loading parameters suggested for a file the default parser rejected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadHints {
    pub delimiter: Option<char>,
    /// Lines to skip before the header (or first data row).
    pub skip_rows: usize,
    pub has_header: bool,
    pub encoding: Option<Encoding>,
}

impl LoadHints {
    pub(crate) fn to_options(&self) -> DelimitedOptions {
        DelimitedOptions {
            delimiter: self
                .delimiter
                .filter(char::is_ascii)
                .map(|c| c as u8),
            skip_rows: self.skip_rows,
            has_header: self.has_header,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DelimitedOptions {
    /// Fixed delimiter; `None` auto-detects.
    pub delimiter: Option<u8>,
    pub skip_rows: usize,
    pub has_header: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            skip_rows: 0,
            has_header: true,
        }
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1. A leading BOM is dropped.
pub(crate) fn decode(bytes: &[u8], encoding: Option<Encoding>) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match encoding {
        Some(Encoding::Latin1) => latin1(bytes),
        Some(Encoding::Utf8) => String::from_utf8_lossy(bytes).into_owned(),
        None => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!("Input is not valid UTF-8 ({}), decoding as Latin-1", e);
                latin1(bytes)
            }
        },
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Parse delimited text into columns.
pub(crate) fn parse(text: &str, options: &DelimitedOptions) -> Result<Vec<Column>, String> {
    let body: Vec<&str> = text
        .lines()
        .skip(options.skip_rows)
        .filter(|line| !line.trim().is_empty())
        .collect();
    if body.is_empty() {
        return Err("no lines to parse".to_string());
    }
    let body = body.join("\n");

    if let Some(delimiter) = options.delimiter {
        return parse_with(&body, delimiter, options.has_header);
    }

    let first_line = body.lines().next().unwrap_or_default();
    let mut ranked: Vec<(u8, usize)> = CANDIDATE_DELIMITERS
        .iter()
        .map(|&d| (d, first_line.bytes().filter(|&b| b == d).count()))
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    if ranked.is_empty() {
        return parse_with(&body, b',', options.has_header);
    }

    let mut last_error = String::new();
    for (delimiter, _) in ranked {
        match parse_with(&body, delimiter, options.has_header) {
            Ok(columns) if columns.len() >= 2 => return Ok(columns),
            Ok(_) => last_error = format!("delimiter {:?} produced a single column", delimiter as char),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn parse_with(text: &str, delimiter: u8, has_header: bool) -> Result<Vec<Column>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let first = match records.next() {
        Some(record) => record.map_err(|e| format!("malformed row: {}", e))?,
        None => return Err("no rows".to_string()),
    };

    let width = first.len();
    let (names, mut rows): (Vec<String>, Vec<Vec<Cell>>) = if has_header {
        (unique_names(first.iter()), Vec::new())
    } else {
        let names = (1..=width).map(|i| format!("column_{}", i)).collect();
        (names, vec![first.iter().map(Cell::parse).collect()])
    };

    for (index, record) in records.enumerate() {
        let record = record.map_err(|e| {
            format!(
                "inconsistent column count near data row {}: {}",
                index + 1,
                e
            )
        })?;
        rows.push(record.iter().map(Cell::parse).collect());
    }

    let mut columns: Vec<Column> = names
        .into_iter()
        .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
        .collect();
    for row in rows {
        for (column, cell) in columns.iter_mut().zip(row) {
            column.values.push(cell);
        }
    }

    Ok(columns)
}

/// Fill blank header names and de-duplicate repeated ones.
fn unique_names<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for (index, name) in raw.enumerate() {
        let base = if name.trim().is_empty() {
            format!("column_{}", index + 1)
        } else {
            name.trim().to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        names.push(candidate);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_semicolon() {
        let columns = parse("a;b;c\n1;2;3\n4;5;6\n", &DelimitedOptions::default()).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].values, vec![Cell::Number(3.0), Cell::Number(6.0)]);
    }

    #[test]
    fn test_detects_pipe_over_comma_in_values() {
        let text = "name|note\nx|a, b and c\ny|d\n";
        let columns = parse(text, &DelimitedOptions::default()).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].values[0], Cell::Text("a, b and c".to_string()));
    }

    #[test]
    fn test_inconsistent_rows_fail() {
        let err = parse_with("a,b\n1,2\n3\n", b',', true).unwrap_err();
        assert!(err.contains("inconsistent column count"));
    }

    #[test]
    fn test_quoted_fields() {
        let columns = parse(
            "group,comment\n\"A\",\"said \"\"hi\"\", left\"\n",
            &DelimitedOptions::default(),
        )
        .unwrap();
        assert_eq!(
            columns[1].values[0],
            Cell::Text("said \"hi\", left".to_string())
        );
    }

    #[test]
    fn test_headerless() {
        let options = DelimitedOptions {
            has_header: false,
            ..Default::default()
        };
        let columns = parse("0,1.5\n1,2.5\n", &options).unwrap();
        assert_eq!(columns[0].name, "column_1");
        assert_eq!(columns[0].len(), 2);
    }

    #[test]
    fn test_unique_names() {
        let names = unique_names(["score", "", "score"].into_iter());
        assert_eq!(names, vec!["score", "column_2", "score_2"]);
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = b"caf\xe9,y\nx,1\n";
        let text = decode(bytes, None);
        assert!(text.starts_with("café"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let text = decode(b"\xEF\xBB\xBFa,b\n", None);
        assert_eq!(text, "a,b\n");
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(Encoding::from_label("ISO-8859-1"), Some(Encoding::Latin1));
        assert_eq!(Encoding::from_label("utf_8"), Some(Encoding::Utf8));
        assert_eq!(Encoding::from_label("ebcdic"), None);
    }
}

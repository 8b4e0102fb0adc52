//! Data loading for experiment tables.
//!
//! Parses CSV/TSV/delimited text, JSON, JSON Lines, Parquet and Excel input
//! into an [`ExperimentTable`]. The declared format is tried first, then the
//! format implied by the file extension, then a content sniff.

mod columnar;
mod delimited;
mod json;

pub use delimited::{Encoding, LoadHints};

use crate::error::AnalysisError;
use crate::models::{Column, ExperimentTable};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Supported tabular input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma-separated values (delimiter still auto-detected)
    Csv,
    /// Tab-separated values
    Tsv,
    /// Plain text with an auto-detected delimiter
    Delimited,
    /// Array of records, object of columns, or object of records
    Json,
    /// One JSON record per line
    Jsonl,
    /// Apache Parquet
    Parquet,
    /// Excel / OpenDocument spreadsheet (first sheet)
    Excel,
}

impl DataFormat {
    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "tsv" | "tab" => Some(DataFormat::Tsv),
            "txt" | "dat" => Some(DataFormat::Delimited),
            "json" => Some(DataFormat::Json),
            "jsonl" | "ndjson" => Some(DataFormat::Jsonl),
            "parquet" | "pq" => Some(DataFormat::Parquet),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(DataFormat::Excel),
            _ => None,
        }
    }

    /// Guess the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"PAR1") {
            return DataFormat::Parquet;
        }
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            return DataFormat::Excel;
        }
        let first = bytes
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace() && *b != 0xEF && *b != 0xBB && *b != 0xBF);
        match first {
            Some(b'[') => DataFormat::Json,
            Some(b'{') => {
                let text = String::from_utf8_lossy(bytes);
                let non_empty_lines = text.lines().filter(|l| !l.trim().is_empty()).count();
                let starts_record = text
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .all(|l| l.trim_start().starts_with('{'));
                if non_empty_lines > 1 && starts_record {
                    DataFormat::Jsonl
                } else {
                    DataFormat::Json
                }
            }
            _ => DataFormat::Delimited,
        }
    }

    /// Whether the format is text that the delimited parser could retry.
    pub fn is_text(&self) -> bool {
        !matches!(self, DataFormat::Parquet | DataFormat::Excel)
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFormat::Csv => write!(f, "csv"),
            DataFormat::Tsv => write!(f, "tsv"),
            DataFormat::Delimited => write!(f, "delimited"),
            DataFormat::Json => write!(f, "json"),
            DataFormat::Jsonl => write!(f, "jsonl"),
            DataFormat::Parquet => write!(f, "parquet"),
            DataFormat::Excel => write!(f, "excel"),
        }
    }
}

/// Raw input bytes plus what is known about them.
#[derive(Debug, Clone)]
pub struct DataSource {
    /// File name (or any label); its extension drives format inference.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Declared format, tried before anything else.
    pub format_hint: Option<DataFormat>,
}

impl DataSource {
    /// Wrap in-memory bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            format_hint: None,
        }
    }

    /// Read a file from disk.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, bytes))
    }

    /// Set the declared format.
    pub fn with_format_hint(mut self, hint: Option<DataFormat>) -> Self {
        self.format_hint = hint;
        self
    }

    /// Format implied by the name's extension.
    pub fn extension_format(&self) -> Option<DataFormat> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(DataFormat::from_extension)
    }

    /// Ordered, de-duplicated list of formats to attempt.
    pub fn candidate_formats(&self) -> Vec<DataFormat> {
        let mut formats = Vec::new();
        for format in [
            self.format_hint,
            self.extension_format(),
            Some(DataFormat::sniff(&self.bytes)),
        ]
        .into_iter()
        .flatten()
        {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        formats
    }

    /// Whether a hint-guided delimited retry makes sense for this input.
    pub fn is_text(&self) -> bool {
        DataFormat::sniff(&self.bytes).is_text()
    }

    /// The first `max_lines` lines, decoded leniently, for prompts.
    pub fn text_sample(&self, max_lines: usize) -> String {
        let text = delimited::decode(&self.bytes, None);
        text.lines().take(max_lines).collect::<Vec<_>>().join("\n")
    }
}

/// Parse a data source into an [`ExperimentTable`].
pub fn load(source: &DataSource) -> Result<ExperimentTable, AnalysisError> {
    if source.bytes.is_empty() {
        return Err(AnalysisError::data_load(format!("{} is empty", source.name)));
    }

    let mut attempted = Vec::new();
    let mut reasons = Vec::new();

    for format in source.candidate_formats() {
        attempted.push(format.to_string());
        debug!("Trying to parse {} as {}", source.name, format);

        let parsed = parse_as(source, format).and_then(|columns| {
            ExperimentTable::new(columns).map_err(|e| match e {
                AnalysisError::DataLoad { reason, .. } => reason,
                other => other.to_string(),
            })
        });

        match parsed {
            Ok(table) => {
                info!(
                    "Loaded {} as {}: {} rows x {} columns",
                    source.name,
                    format,
                    table.n_rows(),
                    table.columns().len()
                );
                return Ok(table);
            }
            Err(reason) => {
                debug!("Parsing {} as {} failed: {}", source.name, format, reason);
                reasons.push(format!("{}: {}", format, reason));
            }
        }
    }

    Err(AnalysisError::DataLoad {
        attempted,
        reason: reasons.join("; "),
    })
}

/// Parse a text source as delimited data using externally supplied hints.
pub fn load_with_hints(
    source: &DataSource,
    hints: &LoadHints,
) -> Result<ExperimentTable, AnalysisError> {
    let attempted = vec!["delimited (with loading hints)".to_string()];
    let text = delimited::decode(&source.bytes, hints.encoding);
    let columns = delimited::parse(&text, &hints.to_options()).map_err(|reason| {
        AnalysisError::DataLoad {
            attempted: attempted.clone(),
            reason,
        }
    })?;
    ExperimentTable::new(columns).map_err(|e| AnalysisError::DataLoad {
        attempted,
        reason: match e {
            AnalysisError::DataLoad { reason, .. } => reason,
            other => other.to_string(),
        },
    })
}

fn parse_as(source: &DataSource, format: DataFormat) -> Result<Vec<Column>, String> {
    match format {
        DataFormat::Csv | DataFormat::Delimited => {
            let text = delimited::decode(&source.bytes, None);
            delimited::parse(&text, &delimited::DelimitedOptions::default())
        }
        DataFormat::Tsv => {
            let text = delimited::decode(&source.bytes, None);
            delimited::parse(
                &text,
                &delimited::DelimitedOptions {
                    delimiter: Some(b'\t'),
                    ..Default::default()
                },
            )
        }
        DataFormat::Json => json::parse_json(&delimited::decode(&source.bytes, None)),
        DataFormat::Jsonl => json::parse_json_lines(&delimited::decode(&source.bytes, None)),
        DataFormat::Parquet => columnar::parse_parquet(&source.bytes),
        DataFormat::Excel => columnar::parse_excel(&source.bytes),
    }
}

//! Input directory discovery.
//!
//! An input directory holds one data file and, usually, one free-text file
//! describing the experiment. Only the top level of the directory is
//! searched.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions recognized as experiment data.
pub const DATA_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "txt", "dat", "json", "jsonl", "ndjson", "parquet", "pq", "xlsx", "xls", "xlsm",
    "ods",
];

/// Extensions recognized as context documents.
pub const CONTEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Context file stems, in order of preference.
const CONTEXT_NAMES: &[&str] = &["context", "readme", "description", "experiment", "info"];

/// Data file stems, in order of preference, when several data files exist.
const DATA_NAMES: &[&str] = &["data", "dataset", "experiment", "results"];

/// Files picked out of an input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInput {
    pub data_file: PathBuf,
    pub context_file: Option<PathBuf>,
}

/// Find the data file and context file in `dir`.
pub fn discover(dir: &Path) -> Result<DiscoveredInput> {
    if !dir.is_dir() {
        bail!("Input directory not found: {}", dir.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    debug!("Found {} files in {}", files.len(), dir.display());

    let context_file = pick_context(&files);

    let mut data_files: Vec<&PathBuf> = files
        .iter()
        .filter(|path| Some(*path) != context_file.as_ref())
        .filter(|path| has_extension(path, DATA_EXTENSIONS))
        .collect();
    // Plain text is only data when nothing better is present.
    if data_files.iter().any(|path| !has_extension(path, &["txt"])) {
        data_files.retain(|path| !has_extension(path, &["txt"]));
    }

    let data_file = match data_files.as_slice() {
        [] => bail!("No data file found in {}", dir.display()),
        [only] => (*only).clone(),
        several => {
            let chosen = DATA_NAMES
                .iter()
                .find_map(|name| several.iter().find(|path| stem_is(path, name)))
                .unwrap_or(&several[0]);
            warn!(
                "{} data files in {}, using {}",
                several.len(),
                dir.display(),
                chosen.display()
            );
            (*chosen).clone()
        }
    };

    match &context_file {
        Some(path) => info!("Context file: {}", path.display()),
        None => warn!("No context file found in {}", dir.display()),
    }
    info!("Data file: {}", data_file.display());

    Ok(DiscoveredInput {
        data_file,
        context_file,
    })
}

/// Read a context file; a missing file yields an empty context.
pub fn read_context(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file: {}", path.display())),
        None => Ok(String::new()),
    }
}

fn pick_context(files: &[PathBuf]) -> Option<PathBuf> {
    let candidates: Vec<&PathBuf> = files
        .iter()
        .filter(|path| has_extension(path, CONTEXT_EXTENSIONS))
        .collect();

    CONTEXT_NAMES
        .iter()
        .find_map(|name| candidates.iter().find(|path| stem_is(path, name)))
        .or_else(|| candidates.iter().find(|path| has_extension(path, &["md"])))
        .map(|path| (*path).clone())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn stem_is(path: &Path, name: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

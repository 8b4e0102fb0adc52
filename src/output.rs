//! Versioned result directories.
//!
//! Every saved run lands in `<output_dir>/<stem>_<version>/`, where `stem`
//! is the data file's stem and `version` is one more than the highest
//! version already present for that stem.

use crate::pipeline::RunSuccess;
use crate::report::generate_json_report;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Python packages needed by the generated analysis script.
const SCRIPT_REQUIREMENTS: &str = "pandas>=2.0.0\nnumpy>=1.24.0\nscipy>=1.10.0\nstatsmodels>=0.14.0\npyarrow>=12.0.0\nopenpyxl>=3.1.0\n";

/// Where a run was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRun {
    pub dir: PathBuf,
    pub version: u32,
}

/// Next free version number for `stem` inside `output_dir`.
pub fn next_version(output_dir: &Path, stem: &str) -> Result<u32> {
    if !output_dir.exists() {
        return Ok(1);
    }

    let prefix = format!("{}_", stem);
    let mut highest = 0;
    let entries = fs::read_dir(output_dir)
        .with_context(|| format!("Failed to list output directory: {}", output_dir.display()))?;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(version) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            highest = highest.max(version);
        }
    }
    Ok(highest + 1)
}

/// Write all artifacts of a successful run.
///
/// `data_file` is copied into `data_source/` when given.
pub fn save_run(output_dir: &Path, data_file: Option<&Path>, run: &RunSuccess) -> Result<SavedRun> {
    let stem = Path::new(&run.metadata.data_source)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "analysis".to_string());
    let version = next_version(output_dir, &stem)?;
    let dir = output_dir.join(format!("{}_{}", stem, version));
    debug!("Saving run to {}", dir.display());

    write_file(&dir.join("report").join("analysis_report.md"), &run.report)?;
    let results = generate_json_report(&run.results).context("Failed to serialize results")?;
    write_file(&dir.join("report").join("results.json"), &results)?;

    if let Some(code) = &run.code {
        write_file(&dir.join("code").join("analysis.py"), code)?;
        write_file(&dir.join("code").join("requirements.txt"), SCRIPT_REQUIREMENTS)?;
    }

    if let Some(source) = data_file {
        let file_name = source
            .file_name()
            .with_context(|| format!("Data file has no name: {}", source.display()))?;
        let target = dir.join("data_source").join(file_name);
        create_parent(&target)?;
        fs::copy(source, &target)
            .with_context(|| format!("Failed to copy data file to {}", target.display()))?;
    }

    let plan = &run.results.plan;
    let metadata = json!({
        "result_version": version,
        "data_file": run.metadata.data_source,
        "data_shape": {
            "rows": run.metadata.data_rows,
            "columns": run.metadata.data_columns,
        },
        "experiment_type": plan.experiment_type,
        "variables": {
            "treatment": plan.treatment_column,
            "treatment_value": plan.treatment_value,
            "control_value": plan.control_value,
            "outcome": plan.outcome_column,
            "covariates": plan.covariate_columns,
        },
        "analysis_summary": {
            "mode_used": run.mode_used,
            "sample_size": run.sample_size,
            "treatment_effect": run.treatment_effect,
            "p_value": run.p_value,
            "statistically_significant": run.statistically_significant,
        },
        "run": run.metadata,
    });
    let metadata = serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    write_file(&dir.join("metadata.json"), &metadata)?;

    info!("Results saved to {}", dir.display());
    Ok(SavedRun { dir, version })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    create_parent(path)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::data::DataSource;
    use crate::llm::testing::ScriptedModel;
    use crate::models::Mode;
    use crate::pipeline::{Orchestrator, RunResult};
    use crate::stats::fixtures::trial_csv;
    use tempfile::TempDir;

    fn create_test_run() -> RunSuccess {
        let orchestrator = Orchestrator::<ScriptedModel>::new(Settings::default(), None);
        let source = DataSource::from_bytes("trial.csv", trial_csv("treatment", "0", "1").into_bytes());
        match tokio_test::block_on(orchestrator.run(&source, "Email test.", Mode::Traditional)) {
            RunResult::Success(success) => *success,
            RunResult::Error(failure) => panic!("run failed: {:?}", failure),
        }
    }

    #[test]
    fn test_next_version() {
        let dir = TempDir::new().unwrap();
        assert_eq!(next_version(&dir.path().join("missing"), "trial").unwrap(), 1);

        fs::create_dir(dir.path().join("trial_1")).unwrap();
        fs::create_dir(dir.path().join("trial_4")).unwrap();
        fs::create_dir(dir.path().join("trial_x")).unwrap();
        fs::create_dir(dir.path().join("other_9")).unwrap();
        fs::write(dir.path().join("trial_7"), "not a dir").unwrap();
        assert_eq!(next_version(dir.path(), "trial").unwrap(), 5);
    }

    #[test]
    fn test_save_run_layout() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("trial.csv");
        fs::write(&data, trial_csv("treatment", "0", "1")).unwrap();
        let run = create_test_run();

        let out = dir.path().join("results");
        let saved = save_run(&out, Some(&data), &run).unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.dir, out.join("trial_1"));

        for file in [
            "report/analysis_report.md",
            "report/results.json",
            "code/analysis.py",
            "code/requirements.txt",
            "data_source/trial.csv",
            "metadata.json",
        ] {
            assert!(saved.dir.join(file).is_file(), "missing {}", file);
        }

        let metadata: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(saved.dir.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(metadata["result_version"], 1);
        assert_eq!(metadata["variables"]["treatment"], "treatment");
        assert_eq!(metadata["analysis_summary"]["sample_size"], 200);
        assert_eq!(metadata["analysis_summary"]["mode_used"], "traditional");

        let second = save_run(&out, None, &run).unwrap();
        assert_eq!(second.version, 2);
        assert!(!second.dir.join("data_source").exists());
    }

    #[test]
    fn test_save_without_script() {
        let dir = TempDir::new().unwrap();
        let mut run = create_test_run();
        run.code = None;
        let saved = save_run(dir.path(), None, &run).unwrap();
        assert!(!saved.dir.join("code").exists());
        assert!(saved.dir.join("report/results.json").is_file());
    }
}

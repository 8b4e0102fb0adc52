//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and merging flags over the configuration file.

use clap::Parser;
use std::path::PathBuf;
use trialscope::config::Config;
use trialscope::data::DataFormat;
use trialscope::models::Mode;

/// TrialScope - analyze A/B tests and randomized controlled trials
///
/// Finds the treatment, outcome and covariate columns in an experiment
/// table, runs difference-in-means, Welch t, Mann-Whitney, regression and
/// balance checks, and writes a Markdown report plus a reproducible script.
///
/// Examples:
///   trialscope --input-dir ./experiment_01
///   trialscope --data trial.csv --context context.txt --mode traditional
///   trialscope --data trial.parquet --context-text "Users randomized to A or B" --json
///   trialscope --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding one data file and a context file
    #[arg(
        short,
        long,
        value_name = "DIR",
        conflicts_with = "data",
        required_unless_present_any = ["data", "init_config"]
    )]
    pub input_dir: Option<PathBuf>,

    /// Data file to analyze (csv, tsv, txt, json, jsonl, parquet, xlsx)
    #[arg(short, long, value_name = "FILE")]
    pub data: Option<PathBuf>,

    /// Text file describing the experiment
    #[arg(short, long, value_name = "FILE", conflicts_with = "context_text")]
    pub context: Option<PathBuf>,

    /// Experiment description given inline
    #[arg(long, value_name = "TEXT")]
    pub context_text: Option<String>,

    /// Parse the data file as this format first
    #[arg(long, value_name = "FORMAT")]
    pub format_hint: Option<DataFormat>,

    /// Analysis mode
    ///
    /// auto uses the language model when an API key is configured.
    /// Overrides the config file setting.
    #[arg(long, value_name = "MODE")]
    pub mode: Option<Mode>,

    /// Directory that receives versioned result folders
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print the run result as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Do not write any result files
    #[arg(long)]
    pub no_save: bool,

    /// Do not generate the reproducible analysis script
    #[arg(long)]
    pub no_script: bool,

    /// API key for the hosted language model
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Language model to use
    #[arg(short, long, env = "TRIALSCOPE_MODEL")]
    pub model: Option<String>,

    /// Language model request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Sampling temperature for the language model (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Rows of data shown to the language model
    #[arg(long, value_name = "ROWS")]
    pub sample_rows: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .trialscope.toml in the current directory
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .trialscope.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match (&self.input_dir, &self.data) {
            (None, None) => return Err("Either --input-dir or --data is required".to_string()),
            (Some(_), Some(_)) => {
                return Err("Cannot use both --input-dir and --data".to_string())
            }
            _ => {}
        }

        if let Some(ref dir) = self.input_dir {
            if !dir.is_dir() {
                return Err(format!("Input directory does not exist: {}", dir.display()));
            }
            if self.context.is_some() || self.context_text.is_some() {
                return Err("--context and --context-text cannot be used with --input-dir".to_string());
            }
        }

        if let Some(ref data) = self.data {
            if !data.is_file() {
                return Err(format!("Data file does not exist: {}", data.display()));
            }
        }

        if let Some(ref context) = self.context {
            if !context.is_file() {
                return Err(format!("Context file does not exist: {}", context.display()));
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.sample_rows == Some(0) {
            return Err("Sample rows must be at least 1".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Overlay command-line flags on a loaded configuration.
    pub fn merge_into(&self, config: &mut Config) {
        if let Some(ref key) = self.api_key {
            config.llm.api_key = Some(key.clone());
        }
        if let Some(ref model) = self.model {
            config.llm.model = model.clone();
        }
        if let Some(timeout) = self.timeout {
            config.llm.timeout_seconds = timeout;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }
        if let Some(rows) = self.sample_rows {
            config.llm.sample_rows = rows;
        }
        if let Some(mode) = self.mode {
            config.analysis.mode = mode;
        }
        if let Some(ref dir) = self.output_dir {
            config.general.output_dir = dir.display().to_string();
        }
        if self.no_script {
            config.report.include_script = false;
        }
        if self.verbose {
            config.general.verbose = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            input_dir: None,
            data: Some(PathBuf::from("Cargo.toml")),
            context: None,
            context_text: None,
            format_hint: None,
            mode: None,
            output_dir: None,
            json: false,
            no_save: false,
            no_script: false,
            api_key: None,
            model: None,
            timeout: None,
            temperature: None,
            sample_rows: None,
            config: None,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_input() {
        let mut args = make_args();
        args.data = None;
        assert!(args.validate().is_err());

        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_files() {
        let mut args = make_args();
        args.data = Some(PathBuf::from("no/such/file.csv"));
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.context = Some(PathBuf::from("no/such/context.txt"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.temperature = Some(3.0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.sample_rows = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_merge_into_config() {
        let mut args = make_args();
        args.api_key = Some("key".to_string());
        args.model = Some("gemini-1.5-flash".to_string());
        args.mode = Some(Mode::Traditional);
        args.timeout = Some(30);
        args.no_script = true;

        let mut config = Config::default();
        args.merge_into(&mut config);
        assert!(config.llm.has_credential());
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.llm.timeout_seconds, 30);
        assert_eq!(config.analysis.mode, Mode::Traditional);
        assert!(!config.report.include_script);
        assert_eq!(config.general.output_dir, "results");
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "trialscope",
            "--data",
            "trial.csv",
            "--context-text",
            "Randomized",
            "--mode",
            "llm",
            "--format-hint",
            "tsv",
        ])
        .unwrap();
        assert_eq!(args.mode, Some(Mode::Llm));
        assert_eq!(args.format_hint, Some(DataFormat::Tsv));
        assert_eq!(args.context_text.as_deref(), Some("Randomized"));
    }
}

//! Configuration file handling.
//!
//! This module handles loading `.trialscope.toml` files and freezing the
//! merged configuration into the [`Settings`] handed to the orchestrator.

use crate::models::Mode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".trialscope.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Heuristic variable identification settings.
    #[serde(default)]
    pub identification: IdentificationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory that receives versioned result folders.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> String {
    "results".to_string()
}

/// Hosted language model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the generateContent API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key. Usually supplied through `GEMINI_API_KEY` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Rows of data shown to the model when identifying variables.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

impl LlmConfig {
    /// Whether a non-empty credential is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            sample_rows: default_sample_rows(),
        }
    }
}

fn default_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

fn default_sample_rows() -> usize {
    100
}

/// Analysis settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Default analysis mode.
    #[serde(default)]
    pub mode: Mode,
}

/// Keyword lists used by the heuristic identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationConfig {
    /// Column-name keywords for the treatment indicator, in priority order.
    #[serde(default = "default_treatment_keywords")]
    pub treatment_keywords: Vec<String>,

    /// Column-name keywords for the outcome, in priority order.
    #[serde(default = "default_outcome_keywords")]
    pub outcome_keywords: Vec<String>,

    /// Arm labels that mark the treatment side.
    #[serde(default = "default_positive_labels")]
    pub positive_labels: Vec<String>,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            treatment_keywords: default_treatment_keywords(),
            outcome_keywords: default_outcome_keywords(),
            positive_labels: default_positive_labels(),
        }
    }
}

fn default_treatment_keywords() -> Vec<String> {
    vec!["treatment", "group", "condition", "arm", "assigned"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_outcome_keywords() -> Vec<String> {
    vec!["outcome", "result", "score", "value", "metric"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_positive_labels() -> Vec<String> {
    vec!["1", "true", "treatment"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Emit the reproducible analysis script.
    #[serde(default = "default_true")]
    pub include_script: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_script: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Immutable settings snapshot passed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub llm: LlmConfig,
    pub identification: IdentificationConfig,
    pub include_script: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Freeze the analysis-relevant parts into a [`Settings`] value.
    pub fn settings(&self) -> Settings {
        Settings {
            llm: self.llm.clone(),
            identification: self.identification.clone(),
            include_script: self.report.include_script,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gemini-1.5-pro");
        assert_eq!(config.llm.sample_rows, 100);
        assert_eq!(config.analysis.mode, Mode::Auto);
        assert!(config
            .identification
            .treatment_keywords
            .contains(&"assigned".to_string()));
        assert!(!config.llm.has_credential());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output_dir = "out"
verbose = true

[llm]
model = "gemini-1.5-flash"
temperature = 0.2
api_key = "secret"

[analysis]
mode = "traditional"

[identification]
treatment_keywords = ["variant"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output_dir, "out");
        assert!(config.general.verbose);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.timeout_seconds, 120);
        assert!(config.llm.has_credential());
        assert_eq!(config.analysis.mode, Mode::Traditional);
        assert_eq!(config.identification.treatment_keywords, vec!["variant"]);
        assert_eq!(config.identification.outcome_keywords.len(), 5);
    }

    #[test]
    fn test_blank_key_is_not_a_credential() {
        let config = LlmConfig {
            api_key: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!config.has_credential());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[llm]"));
        assert!(toml_str.contains("[identification]"));
        assert!(!toml_str.contains("api_key"));
    }

    #[test]
    fn test_settings_snapshot() {
        let mut config = Config::default();
        config.report.include_script = false;
        let settings = config.settings();
        assert!(!settings.include_script);
        assert_eq!(settings.llm, config.llm);
    }
}

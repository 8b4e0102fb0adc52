//! Error and warning types for the analysis pipeline.
//!
//! Only [`AnalysisError::DataLoad`], [`AnalysisError::VariableIdentification`]
//! and [`AnalysisError::InsufficientData`] ever reach the caller of a run.
//! LLM failures are absorbed by the fallbacks in `identify`, `report` and
//! `pipeline`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failures produced by the analysis core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// The input could not be parsed under any attempted format.
    #[error("failed to load data (tried: {}): {reason}", attempted.join(", "))]
    DataLoad {
        attempted: Vec<String>,
        reason: String,
    },

    /// No plausible treatment/outcome columns were found.
    #[error("could not identify experiment variables: {0}")]
    VariableIdentification(String),

    /// One of the arms has fewer than two usable observations.
    #[error(
        "insufficient data: need at least 2 observations per arm \
         (treatment: {n_treatment}, control: {n_control})"
    )]
    InsufficientData { n_treatment: usize, n_control: usize },

    /// The language model was missing, timed out, or answered with garbage.
    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),
}

impl AnalysisError {
    /// Shorthand for a load failure that was not tied to a specific format.
    pub fn data_load(reason: impl Into<String>) -> Self {
        AnalysisError::DataLoad {
            attempted: Vec::new(),
            reason: reason.into(),
        }
    }

    /// Returns the machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::DataLoad { .. } => ErrorKind::DataLoadError,
            AnalysisError::VariableIdentification(_) => ErrorKind::VariableIdentificationError,
            AnalysisError::InsufficientData { .. } => ErrorKind::InsufficientDataError,
            AnalysisError::LlmUnavailable(_) => ErrorKind::LlmUnavailableError,
        }
    }
}

/// Error kinds as they appear in a failed `RunResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataLoadError,
    VariableIdentificationError,
    InsufficientDataError,
    LlmUnavailableError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DataLoadError => write!(f, "DataLoadError"),
            ErrorKind::VariableIdentificationError => write!(f, "VariableIdentificationError"),
            ErrorKind::InsufficientDataError => write!(f, "InsufficientDataError"),
            ErrorKind::LlmUnavailableError => write!(f, "LLMUnavailableError"),
        }
    }
}

/// Non-fatal conditions surfaced in the results and the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// The multiple regression design matrix was rank deficient and was omitted.
    RegressionRankDeficiency { reason: String },
    /// A covariate differs significantly between arms.
    CovariateImbalance { covariate: String, p_value: Option<f64> },
    /// The outcome has zero variance, so standardized quantities are undefined.
    ZeroVarianceOutcome,
    /// Rows were dropped because their arm or outcome could not be used.
    ExcludedRows {
        unidentified_arm: usize,
        missing_outcome: usize,
    },
    /// An LLM-backed step degraded to its deterministic equivalent.
    LlmDegraded { step: String, reason: String },
}

impl fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisWarning::RegressionRankDeficiency { reason } => {
                write!(f, "Multiple regression omitted (rank deficient design): {}", reason)
            }
            AnalysisWarning::CovariateImbalance { covariate, p_value } => match p_value {
                Some(p) => write!(f, "Covariate `{}` is imbalanced between arms (p = {:.4})", covariate, p),
                None => write!(f, "Covariate `{}` is imbalanced between arms", covariate),
            },
            AnalysisWarning::ZeroVarianceOutcome => {
                write!(f, "Outcome has zero variance within arms; effect size undefined due to zero variance")
            }
            AnalysisWarning::ExcludedRows {
                unidentified_arm,
                missing_outcome,
            } => write!(
                f,
                "Excluded {} row(s) with an unrecognized arm and {} row(s) with a missing outcome",
                unidentified_arm, missing_outcome
            ),
            AnalysisWarning::LlmDegraded { step, reason } => {
                write!(f, "LLM {} unavailable, used deterministic fallback: {}", step, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = AnalysisError::InsufficientData {
            n_treatment: 2,
            n_control: 0,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientDataError);
        assert!(err.to_string().contains("control: 0"));

        let err = AnalysisError::DataLoad {
            attempted: vec!["csv".to_string(), "json".to_string()],
            reason: "bad".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::DataLoadError);
        assert!(err.to_string().contains("tried: csv, json"));
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::VariableIdentificationError).unwrap();
        assert_eq!(json, "\"variable_identification_error\"");
    }

    #[test]
    fn test_zero_variance_warning_text() {
        let text = AnalysisWarning::ZeroVarianceOutcome.to_string();
        assert!(text.contains("effect size undefined due to zero variance"));
    }
}

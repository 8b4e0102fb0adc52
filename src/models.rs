//! Data models for the experiment analyzer.
//!
//! This module contains the core data structures shared by the loader,
//! the variable identifiers, the statistical engine and the report builder.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Raw cell spellings that are treated as missing values.
const MISSING_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "."];

/// A single scalar value in the experiment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Infer a typed cell from raw delimited text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return Cell::Missing;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Cell::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Cell::Bool(false);
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => Cell::Number(value),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    /// Returns true if the cell holds no value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Numeric view of the cell. Booleans map to 1/0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(value) if value.is_finite() => Some(*value),
            Cell::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Canonical label of the cell, used to match arm values.
    pub fn label(&self) -> Option<String> {
        match self {
            Cell::Missing => None,
            Cell::Bool(flag) => Some(flag.to_string()),
            Cell::Number(value) => Some(format_number(*value)),
            Cell::Text(text) => Some(normalize_label(text)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => write!(f, "NA"),
            Cell::Bool(flag) => write!(f, "{}", flag),
            Cell::Number(value) => write!(f, "{}", format_number(*value)),
            Cell::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Canonical spelling for a numeric label: `1.0` and `1` are the same arm.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Normalize a raw arm label so that `"1"`, `1`, `1.0` and `"TRUE"`/`true`
/// compare equal.
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return trimmed.to_ascii_lowercase();
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => format_number(value),
        _ => trimmed.to_string(),
    }
}

/// Value type of a column, judged over its non-missing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Text,
    Empty,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Boolean => write!(f, "boolean"),
            ColumnKind::Text => write!(f, "text"),
            ColumnKind::Empty => write!(f, "empty"),
        }
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    /// Creates a column from a name and its cells.
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of cells in the column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the column has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Classify the column by the cells it holds.
    pub fn kind(&self) -> ColumnKind {
        let mut saw_number = false;
        let mut saw_bool = false;
        for cell in &self.values {
            match cell {
                Cell::Missing => {}
                Cell::Number(_) => saw_number = true,
                Cell::Bool(_) => saw_bool = true,
                Cell::Text(_) => return ColumnKind::Text,
            }
        }
        match (saw_number, saw_bool) {
            (true, _) => ColumnKind::Numeric,
            (false, true) => ColumnKind::Boolean,
            (false, false) => ColumnKind::Empty,
        }
    }

    /// Numeric or boolean columns can serve as outcomes and regressors.
    pub fn is_numeric(&self) -> bool {
        matches!(self.kind(), ColumnKind::Numeric | ColumnKind::Boolean)
    }

    /// True when every non-missing value is a whole number.
    pub fn is_integer_valued(&self) -> bool {
        self.is_numeric()
            && self
                .values
                .iter()
                .filter_map(Cell::as_f64)
                .all(|value| value.fract() == 0.0)
    }

    /// Distinct non-missing labels in first-seen order.
    pub fn distinct_labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut labels = Vec::new();
        for label in self.values.iter().filter_map(Cell::label) {
            if seen.insert(label.clone()) {
                labels.push(label);
            }
        }
        labels
    }

    /// Number of missing cells.
    pub fn n_missing(&self) -> usize {
        self.values.iter().filter(|cell| cell.is_missing()).count()
    }

    /// Non-missing numeric values.
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values.iter().filter_map(Cell::as_f64).collect()
    }
}

/// The parsed experiment data: named columns of equal length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentTable {
    columns: Vec<Column>,
    n_rows: usize,
}

impl ExperimentTable {
    /// Build a table, enforcing the load-time invariants.
    pub fn new(columns: Vec<Column>) -> Result<Self, AnalysisError> {
        let first = columns
            .first()
            .ok_or_else(|| AnalysisError::data_load("no columns were parsed"))?;
        let n_rows = first.len();

        if let Some(bad) = columns.iter().find(|c| c.len() != n_rows) {
            return Err(AnalysisError::data_load(format!(
                "column `{}` has {} values but `{}` has {}",
                bad.name,
                bad.len(),
                first.name,
                n_rows
            )));
        }

        if n_rows == 0 {
            return Err(AnalysisError::data_load("table has no rows"));
        }

        let mut names = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !names.insert(c.name.as_str())) {
            return Err(AnalysisError::data_load(format!(
                "duplicate column name `{}`",
                dup.name
            )));
        }

        if !columns.iter().any(Column::is_numeric) {
            return Err(AnalysisError::data_load("no candidate outcome column"));
        }

        Ok(Self { columns, n_rows })
    }

    /// Number of rows (the sample size N).
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// All columns in input order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in input order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Render the first `limit` rows as delimited text for prompts.
    pub fn preview(&self, limit: usize) -> String {
        let mut out = self.column_names().join(",");
        out.push('\n');
        for row in 0..self.n_rows.min(limit) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| c.values[row].to_string())
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

/// How an [`AnalysisPlan`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentificationMethod {
    Heuristic,
    Llm,
}

impl fmt::Display for IdentificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentificationMethod::Heuristic => write!(f, "keyword/heuristic scan"),
            IdentificationMethod::Llm => write!(f, "language model"),
        }
    }
}

/// Which columns play which role in the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub treatment_column: String,
    /// Canonical label of the treatment arm.
    pub treatment_value: String,
    /// Canonical label of the control arm.
    pub control_value: String,
    pub outcome_column: String,
    pub covariate_columns: Vec<String>,
    pub experiment_type: String,
    pub method: IdentificationMethod,
    /// Human-readable audit trail of how the columns were chosen.
    #[serde(default)]
    pub rationale: Vec<String>,
}

impl AnalysisPlan {
    /// Check the plan against the table it will be applied to.
    pub fn validate(&self, table: &ExperimentTable) -> Result<(), AnalysisError> {
        for name in [&self.treatment_column, &self.outcome_column]
            .into_iter()
            .chain(self.covariate_columns.iter())
        {
            if table.column(name).is_none() {
                return Err(AnalysisError::VariableIdentification(format!(
                    "column `{}` does not exist",
                    name
                )));
            }
        }
        if self.treatment_column == self.outcome_column {
            return Err(AnalysisError::VariableIdentification(
                "treatment and outcome must be different columns".to_string(),
            ));
        }
        if self
            .covariate_columns
            .iter()
            .any(|c| *c == self.treatment_column || *c == self.outcome_column)
        {
            return Err(AnalysisError::VariableIdentification(
                "covariates must not include the treatment or outcome column".to_string(),
            ));
        }
        if normalize_label(&self.treatment_value) == normalize_label(&self.control_value) {
            return Err(AnalysisError::VariableIdentification(
                "treatment and control values must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Analysis mode requested by the caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// LLM mode when a credential is configured, traditional otherwise
    #[default]
    Auto,
    /// Language-model identification and narrative
    Llm,
    /// Keyword heuristics and template report only
    Traditional,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Auto => write!(f, "auto"),
            Mode::Llm => write!(f, "llm"),
            Mode::Traditional => write!(f, "traditional"),
        }
    }
}

/// Row accounting for one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub n_total: usize,
    pub n_treatment: usize,
    pub n_control: usize,
    /// Rows whose treatment value matched neither arm.
    pub n_excluded: usize,
    /// Rows in an arm whose outcome was missing or non-numeric.
    pub n_missing_outcome: usize,
}

/// Mean and spread of one arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub n: usize,
    pub mean: f64,
    pub std_dev: f64,
}

/// How the confidence interval half-width was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMethod {
    /// 1.96 standard errors.
    Normal,
    /// Welch t critical value (either arm below 30 observations).
    WelchT,
}

/// A two-sided 95% interval around the ATE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub critical_value: f64,
    pub method: CiMethod,
}

/// Welch two-sample t-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: Option<f64>,
}

/// Mann-Whitney U test for the treatment arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitneyResult {
    pub u_statistic: f64,
    pub p_value: Option<f64>,
}

/// Conventional bands for |d|.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
    Undefined,
}

impl EffectMagnitude {
    /// Band for a Cohen's d value.
    pub fn from_cohens_d(d: Option<f64>) -> Self {
        match d.map(f64::abs) {
            None => EffectMagnitude::Undefined,
            Some(d) if d < 0.2 => EffectMagnitude::Negligible,
            Some(d) if d < 0.5 => EffectMagnitude::Small,
            Some(d) if d < 0.8 => EffectMagnitude::Medium,
            Some(_) => EffectMagnitude::Large,
        }
    }
}

impl fmt::Display for EffectMagnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectMagnitude::Negligible => write!(f, "negligible"),
            EffectMagnitude::Small => write!(f, "small"),
            EffectMagnitude::Medium => write!(f, "medium"),
            EffectMagnitude::Large => write!(f, "large"),
            EffectMagnitude::Undefined => write!(f, "undefined"),
        }
    }
}

/// Standardized effect size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    pub cohens_d: Option<f64>,
    pub pooled_std: f64,
    pub interpretation: EffectMagnitude,
}

/// Difference-in-means estimate and its tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEffectResult {
    pub treatment: GroupStats,
    pub control: GroupStats,
    /// Average treatment effect: mean(treatment) - mean(control).
    pub ate: f64,
    pub standard_error: f64,
    /// Absent when the standard error is zero.
    pub confidence_interval: Option<ConfidenceInterval>,
    pub t_test: TTestResult,
    pub mann_whitney: MannWhitneyResult,
    pub effect_size: EffectSize,
    pub statistically_significant: bool,
}

/// OLS of outcome on the treatment indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRegression {
    pub intercept: f64,
    pub treatment_coefficient: f64,
    pub treatment_std_error: Option<f64>,
    pub r_squared: Option<f64>,
    pub n_observations: usize,
}

/// A named regression coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCoefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: Option<f64>,
}

/// OLS of outcome on treatment plus covariates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleRegression {
    pub intercept: f64,
    pub treatment_coefficient: f64,
    pub treatment_std_error: Option<f64>,
    pub r_squared: Option<f64>,
    pub n_observations: usize,
    pub covariates: Vec<String>,
    pub covariate_coefficients: Vec<NamedCoefficient>,
}

/// Regression models fitted for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub simple: SimpleRegression,
    /// Absent when there are no covariates or the design is rank deficient.
    pub multiple: Option<MultipleRegression>,
}

/// Outcome of a covariate balance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    Balanced,
    Imbalanced,
    NotTested,
}

impl fmt::Display for BalanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceStatus::Balanced => write!(f, "balanced"),
            BalanceStatus::Imbalanced => write!(f, "imbalanced"),
            BalanceStatus::NotTested => write!(f, "not tested"),
        }
    }
}

/// Balance of one covariate across arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateBalance {
    pub covariate: String,
    pub status: BalanceStatus,
    pub treatment_mean: Option<f64>,
    pub control_mean: Option<f64>,
    pub difference: Option<f64>,
    pub t_statistic: Option<f64>,
    pub p_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Counts over all balance checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub n_tested: usize,
    pub n_balanced: usize,
    pub n_not_tested: usize,
}

/// Per-covariate balance checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub covariates: Vec<CovariateBalance>,
    pub summary: BalanceSummary,
}

impl BalanceResult {
    /// Covariates flagged as imbalanced.
    pub fn imbalanced(&self) -> impl Iterator<Item = &CovariateBalance> {
        self.covariates
            .iter()
            .filter(|c| c.status == BalanceStatus::Imbalanced)
    }
}

//! Deterministic trial data shared by the engine and pipeline tests.

use crate::models::{AnalysisPlan, Cell, Column, ExperimentTable, IdentificationMethod};

/// Standardized spread: maps 0..100 onto roughly mean 0, sd 1.
fn q(k: usize) -> f64 {
    (k as f64 - 49.5) / 29.0
}

/// 100 control outcomes around 50 and 100 treatment outcomes around 58.9,
/// both with sd close to 5. Each arm is a permutation of the same grid, so
/// the arm means are exact.
pub(crate) fn two_arm_outcomes() -> (Vec<f64>, Vec<f64>) {
    let control = (0..100).map(|i| 50.0 + 5.0 * q((i * 37) % 100)).collect();
    let treatment = (0..100).map(|i| 58.9 + 5.0 * q((i * 53) % 100)).collect();
    (control, treatment)
}

/// Interleave two arms into `arm_column,outcome` CSV text.
pub(crate) fn trial_csv(arm_column: &str, control_label: &str, treatment_label: &str) -> String {
    let (control, treatment) = two_arm_outcomes();
    let mut csv = format!("{},outcome\n", arm_column);
    for (c, t) in control.iter().zip(&treatment) {
        csv.push_str(&format!("{},{}\n", control_label, c));
        csv.push_str(&format!("{},{}\n", treatment_label, t));
    }
    csv
}

/// A table with one arm column and one outcome column.
pub(crate) fn arm_table(arm_labels: &[&str], outcomes: &[f64]) -> ExperimentTable {
    ExperimentTable::new(vec![
        Column::new("arm", arm_labels.iter().map(|l| Cell::parse(l)).collect()),
        Column::new("outcome", outcomes.iter().map(|v| Cell::Number(*v)).collect()),
    ])
    .expect("valid test table")
}

/// Plan comparing `treatment` against `control` on column `arm`.
pub(crate) fn arm_plan(treatment: &str, control: &str, covariates: &[&str]) -> AnalysisPlan {
    AnalysisPlan {
        treatment_column: "arm".to_string(),
        treatment_value: treatment.to_string(),
        control_value: control.to_string(),
        outcome_column: "outcome".to_string(),
        covariate_columns: covariates.iter().map(|c| c.to_string()).collect(),
        experiment_type: "RCT".to_string(),
        method: IdentificationMethod::Heuristic,
        rationale: Vec::new(),
    }
}

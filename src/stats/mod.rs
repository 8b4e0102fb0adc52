//! Statistical engine.
//!
//! Given a table and a plan, partitions rows into arms and computes the
//! treatment effect, its tests, the regressions and covariate balance.
//! Everything here is deterministic and free of I/O.

mod balance;
mod descriptive;
mod hypothesis;
mod regression;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::error::{AnalysisError, AnalysisWarning};
use crate::models::{
    normalize_label, AnalysisPlan, Column, ExperimentTable, MultipleRegression, NamedCoefficient,
    RegressionResult, SampleSummary, TreatmentEffectResult, BalanceResult,
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Everything the engine computes for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalResults {
    pub sample: SampleSummary,
    pub treatment_effect: TreatmentEffectResult,
    pub regression: RegressionResult,
    pub balance: BalanceResult,
    pub warnings: Vec<AnalysisWarning>,
}

/// Run the full analysis of `table` under `plan`.
pub fn analyze(
    table: &ExperimentTable,
    plan: &AnalysisPlan,
) -> Result<StatisticalResults, AnalysisError> {
    plan.validate(table)?;

    let treatment_column = column(table, &plan.treatment_column)?;
    let outcome_column = column(table, &plan.outcome_column)?;
    let covariates = plan
        .covariate_columns
        .iter()
        .map(|name| column(table, name))
        .collect::<Result<Vec<_>, _>>()?;

    let treatment_label = normalize_label(&plan.treatment_value);
    let control_label = normalize_label(&plan.control_value);

    // Arm of every row: Some(true) treatment, Some(false) control.
    let arms: Vec<Option<bool>> = treatment_column
        .values
        .iter()
        .map(|cell| match cell.label() {
            Some(label) if label == treatment_label => Some(true),
            Some(label) if label == control_label => Some(false),
            _ => None,
        })
        .collect();

    let mut treatment = Vec::new();
    let mut control = Vec::new();
    let mut n_excluded = 0;
    let mut n_missing_outcome = 0;
    for (arm, cell) in arms.iter().zip(&outcome_column.values) {
        match (arm, cell.as_f64()) {
            (None, _) => n_excluded += 1,
            (Some(_), None) => n_missing_outcome += 1,
            (Some(true), Some(y)) => treatment.push(y),
            (Some(false), Some(y)) => control.push(y),
        }
    }

    if treatment.len() < 2 || control.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            n_treatment: treatment.len(),
            n_control: control.len(),
        });
    }

    let sample = SampleSummary {
        n_total: table.n_rows(),
        n_treatment: treatment.len(),
        n_control: control.len(),
        n_excluded,
        n_missing_outcome,
    };

    let mut warnings = Vec::new();
    if n_excluded > 0 || n_missing_outcome > 0 {
        warn!(
            "Excluded {} row(s) with an unrecognized arm and {} with a missing outcome",
            n_excluded, n_missing_outcome
        );
        warnings.push(AnalysisWarning::ExcludedRows {
            unidentified_arm: n_excluded,
            missing_outcome: n_missing_outcome,
        });
    }

    let treatment_effect = hypothesis::treatment_effect(&treatment, &control);
    if treatment_effect.effect_size.cohens_d.is_none() {
        warn!("Outcome `{}` has zero variance within arms", outcome_column.name);
        warnings.push(AnalysisWarning::ZeroVarianceOutcome);
    }

    let balance = balance::check(&covariates, &arms);
    for covariate in balance.imbalanced() {
        warn!("Covariate `{}` is imbalanced between arms", covariate.covariate);
        warnings.push(AnalysisWarning::CovariateImbalance {
            covariate: covariate.covariate.clone(),
            p_value: covariate.p_value,
        });
    }

    let multiple = if covariates.is_empty() {
        None
    } else {
        match multiple_regression(&covariates, &arms, outcome_column) {
            Ok(fit) => Some(fit),
            Err(reason) => {
                warn!("Skipping multiple regression: {}", reason);
                warnings.push(AnalysisWarning::RegressionRankDeficiency { reason });
                None
            }
        }
    };
    let regression = RegressionResult {
        simple: regression::simple(&treatment, &control),
        multiple,
    };

    info!(
        "Analysis complete: n={} ({} treatment, {} control), ATE={:.4}, p={:?}",
        sample.n_total,
        sample.n_treatment,
        sample.n_control,
        treatment_effect.ate,
        treatment_effect.t_test.p_value
    );

    Ok(StatisticalResults {
        sample,
        treatment_effect,
        regression,
        balance,
        warnings,
    })
}

fn column<'t>(table: &'t ExperimentTable, name: &str) -> Result<&'t Column, AnalysisError> {
    table.column(name).ok_or_else(|| {
        AnalysisError::VariableIdentification(format!("column `{}` does not exist", name))
    })
}

/// One regressor block contributed by a covariate.
enum Regressor<'t> {
    Numeric(&'t Column),
    /// One-hot levels, reference level dropped.
    Categorical(&'t Column, Vec<String>),
}

/// Outcome on treatment plus covariates, over complete cases.
fn multiple_regression(
    covariates: &[&Column],
    arms: &[Option<bool>],
    outcome: &Column,
) -> Result<MultipleRegression, String> {
    let complete: Vec<usize> = (0..arms.len())
        .filter(|&row| {
            arms[row].is_some()
                && outcome.values[row].as_f64().is_some()
                && covariates.iter().all(|c| {
                    if c.is_numeric() {
                        c.values[row].as_f64().is_some()
                    } else {
                        !c.values[row].is_missing()
                    }
                })
        })
        .collect();

    let mut regressors = Vec::new();
    let mut names = Vec::new();
    for column in covariates {
        if column.is_numeric() {
            names.push(column.name.clone());
            regressors.push(Regressor::Numeric(column));
        } else {
            let mut levels: Vec<String> = complete
                .iter()
                .filter_map(|&row| column.values[row].label())
                .collect();
            levels.sort();
            levels.dedup();
            let kept: Vec<String> = levels.into_iter().skip(1).collect();
            names.extend(kept.iter().map(|level| format!("{}[{}]", column.name, level)));
            regressors.push(Regressor::Categorical(column, kept));
        }
    }

    let p = 2 + names.len();
    let mut data = Vec::with_capacity(complete.len() * p);
    let mut y = Vec::with_capacity(complete.len());
    for &row in &complete {
        data.push(1.0);
        data.push(if arms[row] == Some(true) { 1.0 } else { 0.0 });
        for regressor in &regressors {
            match regressor {
                Regressor::Numeric(column) => {
                    data.push(column.values[row].as_f64().unwrap_or_default());
                }
                Regressor::Categorical(column, levels) => {
                    let label = column.values[row].label();
                    for level in levels {
                        data.push(if label.as_deref() == Some(level.as_str()) {
                            1.0
                        } else {
                            0.0
                        });
                    }
                }
            }
        }
        y.push(outcome.values[row].as_f64().unwrap_or_default());
    }

    let x = DMatrix::from_row_slice(complete.len(), p, &data);
    let fit = regression::ols(&x, &DVector::from_vec(y))?;

    Ok(MultipleRegression {
        intercept: fit.coefficients[0],
        treatment_coefficient: fit.coefficients[1],
        treatment_std_error: fit.std_errors[1],
        r_squared: fit.r_squared,
        n_observations: fit.n_observations,
        covariates: covariates.iter().map(|c| c.name.clone()).collect(),
        covariate_coefficients: names
            .into_iter()
            .enumerate()
            .map(|(i, name)| NamedCoefficient {
                name,
                estimate: fit.coefficients[i + 2],
                std_error: fit.std_errors[i + 2],
            })
            .collect(),
    })
}

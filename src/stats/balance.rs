//! Covariate balance between arms.

use super::descriptive::mean;
use super::hypothesis::{welch, ALPHA};
use crate::models::{BalanceResult, BalanceStatus, BalanceSummary, Column, CovariateBalance};
use tracing::debug;

/// Welch test of each numeric covariate's mean across arms.
///
/// `arms[i]` is `Some(true)` for treatment rows, `Some(false)` for control
/// rows and `None` for excluded rows.
pub(crate) fn check(covariates: &[&Column], arms: &[Option<bool>]) -> BalanceResult {
    let covariates: Vec<CovariateBalance> = covariates
        .iter()
        .map(|column| check_one(column, arms))
        .collect();

    let summary = BalanceSummary {
        n_tested: covariates
            .iter()
            .filter(|c| c.status != BalanceStatus::NotTested)
            .count(),
        n_balanced: covariates
            .iter()
            .filter(|c| c.status == BalanceStatus::Balanced)
            .count(),
        n_not_tested: covariates
            .iter()
            .filter(|c| c.status == BalanceStatus::NotTested)
            .count(),
    };

    BalanceResult {
        covariates,
        summary,
    }
}

fn check_one(column: &Column, arms: &[Option<bool>]) -> CovariateBalance {
    if !column.is_numeric() {
        return not_tested(column, format!("{} covariate", column.kind()));
    }

    let mut treatment = Vec::new();
    let mut control = Vec::new();
    for (cell, arm) in column.values.iter().zip(arms) {
        match (arm, cell.as_f64()) {
            (Some(true), Some(v)) => treatment.push(v),
            (Some(false), Some(v)) => control.push(v),
            _ => {}
        }
    }

    if treatment.len() < 2 || control.len() < 2 {
        return not_tested(column, "fewer than 2 observed values in an arm".to_string());
    }

    let test = welch(&treatment, &control);
    let status = match test.p_value {
        Some(p) if p > ALPHA => BalanceStatus::Balanced,
        Some(_) => BalanceStatus::Imbalanced,
        // Constant within each arm: balanced only if the constants agree.
        None if test.difference == 0.0 => BalanceStatus::Balanced,
        None => BalanceStatus::Imbalanced,
    };
    debug!(
        "Balance of `{}`: diff={:.4}, p={:?} -> {}",
        column.name, test.difference, test.p_value, status
    );

    CovariateBalance {
        covariate: column.name.clone(),
        status,
        treatment_mean: Some(mean(&treatment)),
        control_mean: Some(mean(&control)),
        difference: Some(test.difference),
        t_statistic: test.t_statistic,
        p_value: test.p_value,
        note: test
            .p_value
            .is_none()
            .then(|| "zero variance within arms".to_string()),
    }
}

fn not_tested(column: &Column, note: String) -> CovariateBalance {
    CovariateBalance {
        covariate: column.name.clone(),
        status: BalanceStatus::NotTested,
        treatment_mean: None,
        control_mean: None,
        difference: None,
        t_statistic: None,
        p_value: None,
        note: Some(note),
    }
}

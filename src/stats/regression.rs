//! Ordinary least squares for the treatment regressions.

use super::descriptive::{mean, sum_of_squares};
use crate::models::SimpleRegression;
use nalgebra::{DMatrix, DVector};

/// Outcome on a 1/0 treatment indicator, in closed form.
///
/// The slope equals the difference in means and the intercept the control
/// mean. Both slices must hold at least two values.
pub(crate) fn simple(treatment: &[f64], control: &[f64]) -> SimpleRegression {
    let n1 = treatment.len() as f64;
    let n0 = control.len() as f64;
    let n = n1 + n0;

    let intercept = mean(control);
    let slope = mean(treatment) - intercept;

    let residual_ss = sum_of_squares(treatment) + sum_of_squares(control);
    let all: Vec<f64> = treatment.iter().chain(control).copied().collect();
    let total_ss = sum_of_squares(&all);

    let std_error = (residual_ss / (n - 2.0) * (1.0 / n1 + 1.0 / n0)).sqrt();
    let r_squared = (total_ss > 0.0).then(|| 1.0 - residual_ss / total_ss);

    SimpleRegression {
        intercept,
        treatment_coefficient: slope,
        treatment_std_error: std_error.is_finite().then_some(std_error),
        r_squared,
        n_observations: all.len(),
    }
}

/// Coefficients and fit statistics of a general OLS model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<Option<f64>>,
    pub r_squared: Option<f64>,
    pub n_observations: usize,
}

/// Fit `y = X b` by SVD. The design must include its own intercept column.
///
/// Fails when there are no residual degrees of freedom or `X` is rank
/// deficient.
pub(crate) fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, String> {
    let (n, p) = x.shape();
    if n <= p {
        return Err(format!(
            "{} complete observations for {} parameters",
            n, p
        ));
    }

    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let tolerance = max_sv * n.max(p) as f64 * f64::EPSILON;
    let rank = svd
        .singular_values
        .iter()
        .filter(|s| **s > tolerance)
        .count();
    if rank < p {
        return Err(format!("design matrix has rank {} but {} columns", rank, p));
    }

    let beta = svd.solve(y, tolerance).map_err(|e| e.to_string())?;
    let v_t = svd
        .v_t
        .as_ref()
        .ok_or_else(|| "SVD did not produce right singular vectors".to_string())?;

    let residuals = y - x * &beta;
    let residual_ss = residuals.dot(&residuals);
    let y_mean = y.mean();
    let total_ss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let sigma2 = residual_ss / (n - p) as f64;

    // (X'X)^-1 = V diag(1/s^2) V'
    let inv_s2 = DMatrix::from_diagonal(&svd.singular_values.map(|s| 1.0 / (s * s)));
    let covariance = v_t.transpose() * inv_s2 * v_t;

    let std_errors = (0..p)
        .map(|j| {
            let se = (sigma2 * covariance[(j, j)]).sqrt();
            se.is_finite().then_some(se)
        })
        .collect();

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        r_squared: (total_ss > 0.0).then(|| 1.0 - residual_ss / total_ss),
        n_observations: n,
    })
}

//! Two-sample tests: Welch's t-test, Mann-Whitney U and Cohen's d.

use super::descriptive::{group_stats, mean, variance};
use crate::models::{
    CiMethod, ConfidenceInterval, EffectMagnitude, EffectSize, MannWhitneyResult, TTestResult,
    TreatmentEffectResult,
};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Significance threshold for every reported test.
pub(crate) const ALPHA: f64 = 0.05;

/// Arms smaller than this use a t critical value for the CI.
const SMALL_SAMPLE: usize = 30;

const NORMAL_CRITICAL: f64 = 1.96;

/// Welch comparison of two samples' means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Welch {
    /// mean(a) - mean(b)
    pub difference: f64,
    pub standard_error: f64,
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: Option<f64>,
}

/// Welch's unequal-variance t-test of mean(a) - mean(b).
///
/// Statistic, degrees of freedom and p-value are `None` when the
/// standard error is zero.
pub(crate) fn welch(a: &[f64], b: &[f64]) -> Welch {
    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let difference = mean(a) - mean(b);

    let se1 = variance(a) / n1;
    let se2 = variance(b) / n2;
    let standard_error = (se1 + se2).sqrt();

    if !(standard_error > 0.0) {
        return Welch {
            difference,
            standard_error: 0.0,
            t_statistic: None,
            degrees_of_freedom: None,
            p_value: None,
        };
    }

    let t = difference / standard_error;

    // Welch-Satterthwaite degrees of freedom
    let denominator = se1.powi(2) / (n1 - 1.0) + se2.powi(2) / (n2 - 1.0);
    let df = (se1 + se2).powi(2) / denominator;

    let p_value = StudentsT::new(0.0, 1.0, df)
        .ok()
        .map(|dist| (2.0 * dist.cdf(-t.abs())).min(1.0));

    Welch {
        difference,
        standard_error,
        t_statistic: Some(t),
        degrees_of_freedom: Some(df),
        p_value,
    }
}

/// Two-sided 95% interval around `welch.difference`.
fn confidence_interval(welch: &Welch, n1: usize, n2: usize) -> Option<ConfidenceInterval> {
    if !(welch.standard_error > 0.0) {
        return None;
    }

    let (critical_value, method) = if n1 < SMALL_SAMPLE || n2 < SMALL_SAMPLE {
        let df = welch.degrees_of_freedom?;
        let dist = StudentsT::new(0.0, 1.0, df).ok()?;
        (dist.inverse_cdf(1.0 - ALPHA / 2.0), CiMethod::WelchT)
    } else {
        (NORMAL_CRITICAL, CiMethod::Normal)
    };

    let half_width = critical_value * welch.standard_error;
    Some(ConfidenceInterval {
        lower: welch.difference - half_width,
        upper: welch.difference + half_width,
        critical_value,
        method,
    })
}

/// Mann-Whitney U for sample `a`, normal approximation with tie and
/// continuity corrections.
pub(crate) fn mann_whitney(a: &[f64], b: &[f64]) -> MannWhitneyResult {
    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let n = n1 + n2;

    let mut pooled: Vec<(f64, bool)> = a
        .iter()
        .map(|v| (*v, true))
        .chain(b.iter().map(|v| (*v, false)))
        .collect();
    pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

    let mut rank_sum_a = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < pooled.len() {
        let mut j = i;
        while j + 1 < pooled.len() && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }
        // Ranks are 1-based; tied values share the average rank.
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied = (j - i + 1) as f64;
        tie_term += tied.powi(3) - tied;
        rank_sum_a += pooled[i..=j].iter().filter(|(_, in_a)| *in_a).count() as f64 * average_rank;
        i = j + 1;
    }

    let u_statistic = rank_sum_a - n1 * (n1 + 1.0) / 2.0;
    let mu = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

    let p_value = if variance > 0.0 {
        let z = ((u_statistic - mu).abs() - 0.5).max(0.0) / variance.sqrt();
        Normal::new(0.0, 1.0)
            .ok()
            .map(|dist| (2.0 * (1.0 - dist.cdf(z))).min(1.0))
    } else {
        None
    };

    MannWhitneyResult {
        u_statistic,
        p_value,
    }
}

/// Cohen's d with the pooled standard deviation.
pub(crate) fn effect_size(a: &[f64], b: &[f64]) -> EffectSize {
    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let pooled_variance =
        ((n1 - 1.0) * variance(a) + (n2 - 1.0) * variance(b)) / (n1 + n2 - 2.0);
    let pooled_std = pooled_variance.sqrt();

    let cohens_d = if pooled_std > 0.0 {
        Some((mean(a) - mean(b)) / pooled_std)
    } else {
        None
    };

    EffectSize {
        cohens_d,
        pooled_std,
        interpretation: EffectMagnitude::from_cohens_d(cohens_d),
    }
}

/// Full difference-in-means analysis of treatment vs control outcomes.
///
/// Both slices must hold at least two values.
pub(crate) fn treatment_effect(treatment: &[f64], control: &[f64]) -> TreatmentEffectResult {
    let test = welch(treatment, control);
    let confidence_interval = confidence_interval(&test, treatment.len(), control.len());

    TreatmentEffectResult {
        treatment: group_stats(treatment),
        control: group_stats(control),
        ate: test.difference,
        standard_error: test.standard_error,
        confidence_interval,
        t_test: TTestResult {
            t_statistic: test.t_statistic,
            degrees_of_freedom: test.degrees_of_freedom,
            p_value: test.p_value,
        },
        mann_whitney: mann_whitney(treatment, control),
        effect_size: effect_size(treatment, control),
        statistically_significant: test.p_value.map_or(false, |p| p < ALPHA),
    }
}

//! Markdown report generation.
//!
//! This module renders the analysis results as a Markdown report and
//! produces the deterministic interpretation used by the template renderer.

use super::{AnalysisResults, Renderer};
use crate::models::{
    AnalysisPlan, BalanceResult, CiMethod, RegressionResult,
    SampleSummary, TreatmentEffectResult,
};
use crate::stats::StatisticalResults;

/// Sample size per arm below which the report adds a small-sample caution.
const SMALL_ARM: usize = 30;

/// Outcome constant within each arm while the arm means differ.
fn arms_perfectly_separated(effect: &TreatmentEffectResult) -> bool {
    effect.t_test.p_value.is_none() && effect.ate != 0.0
}

/// Generate the complete Markdown report.
pub fn render_markdown(results: &AnalysisResults, interpretation: &str, renderer: Renderer) -> String {
    let mut output = String::new();

    output.push_str("# Experiment Analysis Report\n\n");

    output.push_str(&generate_summary_section(results));
    output.push_str(&generate_overview_section(results));
    output.push_str(&generate_identification_section(&results.plan));
    output.push_str(&generate_findings_section(&results.plan, &results.statistics));
    output.push_str(&generate_balance_section(&results.statistics.balance));
    output.push_str(&generate_effect_size_section(&results.statistics.treatment_effect));
    output.push_str(&generate_interpretation_section(interpretation, renderer));
    output.push_str(&generate_recommendations_section(&recommendations(results)));
    output.push_str(&generate_warnings_section(&results.statistics));
    output.push_str(&generate_footer());

    output
}

/// One-sentence verdict on the treatment effect.
pub fn conclusion(results: &AnalysisResults) -> String {
    let effect = &results.statistics.treatment_effect;
    let outcome = &results.plan.outcome_column;

    match effect.t_test.p_value {
        None if arms_perfectly_separated(effect) => format!(
            "The treatment {} `{}` by {} for every unit: the outcome is constant within each arm, \
             so the arms are perfectly separated (t-test undefined, Mann-Whitney p {}).",
            if effect.ate >= 0.0 { "increased" } else { "decreased" },
            outcome,
            fmt_num(effect.ate.abs()),
            fmt_p_relation(effect.mann_whitney.p_value)
        ),
        None => format!(
            "No treatment effect could be assessed on `{}`: the outcome has zero variance (ATE = {}).",
            outcome,
            fmt_num(effect.ate)
        ),
        Some(_) if effect.statistically_significant => format!(
            "The treatment {} `{}` by {} (p {}), a statistically significant {} effect.",
            if effect.ate >= 0.0 { "increased" } else { "decreased" },
            outcome,
            fmt_num(effect.ate.abs()),
            fmt_p_relation(effect.t_test.p_value),
            effect.effect_size.interpretation
        ),
        Some(_) => format!(
            "No statistically significant effect of the treatment on `{}` (ATE = {}, p {}).",
            outcome,
            fmt_num(effect.ate),
            fmt_p_relation(effect.t_test.p_value)
        ),
    }
}

/// Deterministic interpretation paragraph used by the template renderer.
pub fn template_interpretation(results: &AnalysisResults) -> String {
    let plan = &results.plan;
    let stats = &results.statistics;
    let effect = &stats.treatment_effect;
    let mut paragraphs = Vec::new();

    let Some(p) = effect.t_test.p_value else {
        if arms_perfectly_separated(effect) {
            paragraphs.push(format!(
                "Every unit in the treatment arm (`{}` = {}) has `{}` = {} and every unit in the \
                 control arm (`{}` = {}) has {}, so the arms are perfectly separated by a \
                 difference of {}.",
                plan.treatment_column,
                plan.treatment_value,
                plan.outcome_column,
                fmt_num(effect.treatment.mean),
                plan.treatment_column,
                plan.control_value,
                fmt_num(effect.control.mean),
                fmt_num(effect.ate)
            ));
            paragraphs.push(format!(
                "The t-test and Cohen's d are undefined because the within-arm variance is zero \
                 (effect size undefined due to zero variance). The rank-based Mann-Whitney test \
                 does apply and gives p {}.",
                fmt_p_relation(effect.mann_whitney.p_value)
            ));
            return paragraphs.join("\n\n");
        }
        paragraphs.push(format!(
            "Every unit in both arms has the same value of `{}`, so there is no variation to \
             compare. The difference in means is {} and no significance test can be \
             computed (effect size undefined due to zero variance).",
            plan.outcome_column,
            fmt_num(effect.ate)
        ));
        return paragraphs.join("\n\n");
    };

    let mut opening = format!(
        "Units in the treatment arm (`{}` = {}) averaged {} on `{}` versus {} in the control \
         arm (`{}` = {}), a difference of {}",
        plan.treatment_column,
        plan.treatment_value,
        fmt_num(effect.treatment.mean),
        plan.outcome_column,
        fmt_num(effect.control.mean),
        plan.treatment_column,
        plan.control_value,
        fmt_num(effect.ate)
    );
    if let Some(ci) = &effect.confidence_interval {
        opening.push_str(&format!(
            " (95% CI [{}, {}])",
            fmt_num(ci.lower),
            fmt_num(ci.upper)
        ));
    }
    opening.push('.');
    paragraphs.push(opening);

    if effect.statistically_significant {
        paragraphs.push(format!(
            "With p {}, the difference is statistically significant at the 5% level. \
             The standardized effect is {} (Cohen's d = {}).",
            fmt_p_relation(Some(p)),
            effect.effect_size.interpretation,
            fmt_opt(effect.effect_size.cohens_d)
        ));
    } else {
        paragraphs.push(format!(
            "With p {}, the difference is not statistically significant at the 5% level; \
             the data are consistent with no effect of the treatment. The standardized \
             effect is {} (Cohen's d = {}).",
            fmt_p_relation(Some(p)),
            effect.effect_size.interpretation,
            fmt_opt(effect.effect_size.cohens_d)
        ));
    }

    if let Some(mw_p) = effect.mann_whitney.p_value {
        let agrees = (mw_p < 0.05) == effect.statistically_significant;
        paragraphs.push(if agrees {
            format!(
                "The rank-based Mann-Whitney test agrees (p {}), so the conclusion does not \
                 hinge on the outcome being normally distributed.",
                fmt_p_relation(Some(mw_p))
            )
        } else {
            format!(
                "The rank-based Mann-Whitney test disagrees (p {}); outliers or skew in \
                 `{}` may be driving the t-test result.",
                fmt_p_relation(Some(mw_p)),
                plan.outcome_column
            )
        });
    }

    if let Some(multiple) = &stats.regression.multiple {
        paragraphs.push(format!(
            "Adjusting for {} the estimated effect is {}, compared with {} unadjusted.",
            multiple
                .covariates
                .iter()
                .map(|c| format!("`{}`", c))
                .collect::<Vec<_>>()
                .join(", "),
            fmt_num(multiple.treatment_coefficient),
            fmt_num(stats.regression.simple.treatment_coefficient)
        ));
    }

    let imbalanced: Vec<String> = stats
        .balance
        .imbalanced()
        .map(|c| format!("`{}`", c.covariate))
        .collect();
    if !imbalanced.is_empty() {
        paragraphs.push(format!(
            "Randomization may not have balanced {}; treat the estimate with caution.",
            imbalanced.join(", ")
        ));
    }

    paragraphs.join("\n\n")
}

/// Compact plain-text digest of the numbers, handed to the model when it
/// writes the interpretation.
pub fn findings_summary(results: &AnalysisResults) -> String {
    let stats = &results.statistics;
    let effect = &stats.treatment_effect;
    let mut lines = Vec::new();

    lines.push(format!(
        "Sample: {} rows; treatment n = {}, control n = {}, excluded = {}, missing outcome = {}",
        stats.sample.n_total,
        stats.sample.n_treatment,
        stats.sample.n_control,
        stats.sample.n_excluded,
        stats.sample.n_missing_outcome
    ));
    lines.push(format!(
        "Treatment mean = {} (sd {}); control mean = {} (sd {})",
        fmt_num(effect.treatment.mean),
        fmt_num(effect.treatment.std_dev),
        fmt_num(effect.control.mean),
        fmt_num(effect.control.std_dev)
    ));
    lines.push(format!(
        "ATE = {}, SE = {}, 95% CI = {}",
        fmt_num(effect.ate),
        fmt_num(effect.standard_error),
        fmt_ci(effect)
    ));
    lines.push(format!(
        "Welch t = {}, df = {}, p = {}; significant at 0.05: {}",
        fmt_opt(effect.t_test.t_statistic),
        fmt_opt(effect.t_test.degrees_of_freedom),
        fmt_p(effect.t_test.p_value),
        effect.statistically_significant
    ));
    lines.push(format!(
        "Mann-Whitney U = {}, p = {}",
        fmt_num(effect.mann_whitney.u_statistic),
        fmt_p(effect.mann_whitney.p_value)
    ));
    lines.push(format!(
        "Cohen's d = {} ({})",
        fmt_opt(effect.effect_size.cohens_d),
        effect.effect_size.interpretation
    ));
    if let Some(multiple) = &stats.regression.multiple {
        lines.push(format!(
            "Covariate-adjusted treatment coefficient = {} (SE {})",
            fmt_num(multiple.treatment_coefficient),
            fmt_opt(multiple.treatment_std_error)
        ));
    }
    for covariate in &stats.balance.covariates {
        lines.push(format!(
            "Balance of {}: {} (p = {})",
            covariate.covariate,
            covariate.status,
            fmt_p(covariate.p_value)
        ));
    }
    for warning in &stats.warnings {
        lines.push(format!("Warning: {}", warning));
    }

    lines
        .into_iter()
        .map(|line| format!("- {}\n", line))
        .collect()
}

/// Generate a JSON rendering of the structured results.
pub fn generate_json_report(results: &AnalysisResults) -> serde_json::Result<String> {
    serde_json::to_string_pretty(results)
}

/// Generate the executive summary section.
fn generate_summary_section(results: &AnalysisResults) -> String {
    let effect = &results.statistics.treatment_effect;
    let sample = &results.statistics.sample;
    let mut section = String::new();

    section.push_str("## Executive Summary\n\n");
    section.push_str(&results.conclusion);
    section.push_str("\n\n");

    section.push_str("| Metric | Value |\n");
    section.push_str("|:---|:---|\n");
    section.push_str(&format!("| Average treatment effect | {} |\n", fmt_num(effect.ate)));
    section.push_str(&format!("| 95% confidence interval | {} |\n", fmt_ci(effect)));
    section.push_str(&format!("| p-value (Welch t-test) | {} |\n", fmt_p(effect.t_test.p_value)));
    section.push_str(&format!(
        "| Statistically significant (α = 0.05) | {} |\n",
        if effect.statistically_significant { "yes" } else { "no" }
    ));
    section.push_str(&format!(
        "| Sample size | {} ({} treatment, {} control) |\n",
        sample.n_total, sample.n_treatment, sample.n_control
    ));
    section.push_str(&format!(
        "| Effect size | {} |\n\n",
        effect.effect_size.interpretation
    ));

    section
}

/// Generate the experiment overview section.
fn generate_overview_section(results: &AnalysisResults) -> String {
    let mut section = String::new();

    section.push_str("## Experiment Overview\n\n");
    if results.experiment_context.is_empty() {
        section.push_str("_No experiment description was provided._\n\n");
    } else {
        for line in results.experiment_context.lines() {
            section.push_str(&format!("> {}\n", line));
        }
        section.push('\n');
    }
    section.push_str(&format!(
        "- **Experiment type:** {}\n\n",
        results.plan.experiment_type
    ));

    section
}

/// Generate the variable identification section.
fn generate_identification_section(plan: &AnalysisPlan) -> String {
    let mut section = String::new();

    section.push_str("## Variable Identification\n\n");
    section.push_str("| Role | Column | Detail |\n");
    section.push_str("|:---|:---|:---|\n");
    section.push_str(&format!(
        "| Treatment | `{}` | `{}` = treatment, `{}` = control |\n",
        plan.treatment_column, plan.treatment_value, plan.control_value
    ));
    section.push_str(&format!("| Outcome | `{}` | |\n", plan.outcome_column));
    if plan.covariate_columns.is_empty() {
        section.push_str("| Covariates | none | |\n");
    }
    for covariate in &plan.covariate_columns {
        section.push_str(&format!("| Covariate | `{}` | |\n", covariate));
    }
    section.push_str(&format!("\n**Identified by:** {}\n\n", plan.method));

    if !plan.rationale.is_empty() {
        for note in &plan.rationale {
            section.push_str(&format!("- {}\n", note));
        }
        section.push('\n');
    }

    section
}

/// Generate the statistical findings section.
fn generate_findings_section(plan: &AnalysisPlan, stats: &StatisticalResults) -> String {
    let mut section = String::new();

    section.push_str("## Statistical Findings\n\n");
    section.push_str(&generate_effect_table(&stats.treatment_effect));
    section.push_str(&generate_sample_notes(&stats.sample));
    section.push_str(&generate_tests_table(&stats.treatment_effect));
    section.push_str(&generate_regression_block(plan, &stats.regression));

    section
}

fn generate_effect_table(effect: &TreatmentEffectResult) -> String {
    let mut block = String::new();

    block.push_str("### Treatment Effect\n\n");
    block.push_str("| Arm | N | Mean | Std. Dev. |\n");
    block.push_str("|:---|---:|---:|---:|\n");
    block.push_str(&format!(
        "| Treatment | {} | {} | {} |\n",
        effect.treatment.n,
        fmt_num(effect.treatment.mean),
        fmt_num(effect.treatment.std_dev)
    ));
    block.push_str(&format!(
        "| Control | {} | {} | {} |\n\n",
        effect.control.n,
        fmt_num(effect.control.mean),
        fmt_num(effect.control.std_dev)
    ));

    block.push_str(&format!("- **ATE:** {}\n", fmt_num(effect.ate)));
    block.push_str(&format!("- **Standard error:** {}\n", fmt_num(effect.standard_error)));
    match &effect.confidence_interval {
        Some(ci) => block.push_str(&format!(
            "- **95% CI:** [{}, {}] ({} critical value {:.4})\n",
            fmt_num(ci.lower),
            fmt_num(ci.upper),
            match ci.method {
                CiMethod::Normal => "normal",
                CiMethod::WelchT => "Welch t",
            },
            ci.critical_value
        )),
        None => block.push_str("- **95% CI:** undefined (standard error is zero)\n"),
    }
    block.push('\n');

    block
}

fn generate_sample_notes(sample: &SampleSummary) -> String {
    if sample.n_excluded == 0 && sample.n_missing_outcome == 0 {
        return String::new();
    }

    let mut block = String::new();
    block.push_str(&format!(
        "*{} of {} rows were excluded: {} with an unrecognized arm value, {} with a missing \
         or non-numeric outcome.*\n\n",
        sample.n_excluded + sample.n_missing_outcome,
        sample.n_total,
        sample.n_excluded,
        sample.n_missing_outcome
    ));
    block
}

fn generate_tests_table(effect: &TreatmentEffectResult) -> String {
    let mut block = String::new();

    block.push_str("### Hypothesis Tests\n\n");
    block.push_str("| Test | Statistic | p-value |\n");
    block.push_str("|:---|---:|---:|\n");
    block.push_str(&format!(
        "| Welch t-test (df = {}) | t = {} | {} |\n",
        fmt_opt(effect.t_test.degrees_of_freedom),
        fmt_opt(effect.t_test.t_statistic),
        fmt_p(effect.t_test.p_value)
    ));
    block.push_str(&format!(
        "| Mann-Whitney U | U = {} | {} |\n\n",
        fmt_num(effect.mann_whitney.u_statistic),
        fmt_p(effect.mann_whitney.p_value)
    ));

    block
}

fn generate_regression_block(plan: &AnalysisPlan, regression: &RegressionResult) -> String {
    let mut block = String::new();
    let simple = &regression.simple;

    block.push_str("### Regression\n\n");
    block.push_str(&format!(
        "**Simple:** `{}` ~ treatment indicator (n = {})\n\n",
        plan.outcome_column, simple.n_observations
    ));
    block.push_str("| Term | Estimate | Std. Error |\n");
    block.push_str("|:---|---:|---:|\n");
    block.push_str(&format!("| Intercept | {} | |\n", fmt_num(simple.intercept)));
    block.push_str(&format!(
        "| Treatment | {} | {} |\n\n",
        fmt_num(simple.treatment_coefficient),
        fmt_opt(simple.treatment_std_error)
    ));
    block.push_str(&format!("R² = {}\n\n", fmt_opt(simple.r_squared)));

    match &regression.multiple {
        Some(multiple) => {
            block.push_str(&format!(
                "**Multiple:** `{}` ~ treatment + covariates (n = {} complete cases)\n\n",
                plan.outcome_column, multiple.n_observations
            ));
            block.push_str("| Term | Estimate | Std. Error |\n");
            block.push_str("|:---|---:|---:|\n");
            block.push_str(&format!("| Intercept | {} | |\n", fmt_num(multiple.intercept)));
            block.push_str(&format!(
                "| Treatment | {} | {} |\n",
                fmt_num(multiple.treatment_coefficient),
                fmt_opt(multiple.treatment_std_error)
            ));
            for coefficient in &multiple.covariate_coefficients {
                block.push_str(&format!(
                    "| `{}` | {} | {} |\n",
                    coefficient.name,
                    fmt_num(coefficient.estimate),
                    fmt_opt(coefficient.std_error)
                ));
            }
            block.push_str(&format!("\nR² = {}\n\n", fmt_opt(multiple.r_squared)));
        }
        None if plan.covariate_columns.is_empty() => {
            block.push_str("No covariates were identified, so no adjusted model was fitted.\n\n");
        }
        None => {
            block.push_str(
                "The covariate-adjusted model was omitted because its design matrix is rank \
                 deficient (see Warnings).\n\n",
            );
        }
    }

    block
}

/// Generate the covariate balance section.
fn generate_balance_section(balance: &BalanceResult) -> String {
    let mut section = String::new();

    section.push_str("## Covariate Balance\n\n");
    if balance.covariates.is_empty() {
        section.push_str("No covariates were analyzed.\n\n");
        return section;
    }

    section.push_str("| Covariate | Treatment mean | Control mean | Difference | p-value | Status |\n");
    section.push_str("|:---|---:|---:|---:|---:|:---|\n");
    for covariate in &balance.covariates {
        let status = match &covariate.note {
            Some(note) => format!("{} ({})", covariate.status, note),
            None => covariate.status.to_string(),
        };
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} | {} |\n",
            covariate.covariate,
            fmt_opt(covariate.treatment_mean),
            fmt_opt(covariate.control_mean),
            fmt_opt(covariate.difference),
            fmt_p(covariate.p_value),
            status
        ));
    }
    section.push_str(&format!(
        "\n{} of {} tested covariates are balanced; {} not tested.\n\n",
        balance.summary.n_balanced, balance.summary.n_tested, balance.summary.n_not_tested
    ));

    if balance.imbalanced().next().is_some() {
        section.push_str(
            "> **Caution:** at least one covariate is imbalanced between arms. The treatment \
             effect is still reported, but it may be confounded.\n\n",
        );
    }

    section
}

/// Generate the effect size section.
fn generate_effect_size_section(effect: &TreatmentEffectResult) -> String {
    let effect_size = &effect.effect_size;
    let mut section = String::new();

    section.push_str("## Effect Size\n\n");
    match effect_size.cohens_d {
        Some(d) => {
            section.push_str(&format!(
                "Cohen's d = {} (pooled standard deviation {}), a **{}** effect.\n\n",
                fmt_num(d),
                fmt_num(effect_size.pooled_std),
                effect_size.interpretation
            ));
            section.push_str(
                "Bands: |d| < 0.2 negligible, 0.2-0.5 small, 0.5-0.8 medium, 0.8 and above large.\n\n",
            );
        }
        None if arms_perfectly_separated(effect) => {
            section.push_str(
                "Cohen's d is not reported: effect size undefined due to zero variance \
                 within arms (the pooled standard deviation is 0 while the arm means differ).\n\n",
            );
        }
        None => {
            section.push_str(
                "Cohen's d is not reported: effect size undefined due to zero variance \
                 (the pooled standard deviation is 0).\n\n",
            );
        }
    }

    section
}

/// Generate the interpretation section.
fn generate_interpretation_section(interpretation: &str, renderer: Renderer) -> String {
    let mut section = String::new();

    section.push_str("## Interpretation\n\n");
    section.push_str(interpretation.trim());
    section.push_str("\n\n");
    if renderer == Renderer::Llm {
        section.push_str("*This interpretation was written by a language model from the figures above.*\n\n");
    }

    section
}

/// Generate the recommendations section.
fn generate_recommendations_section(recommendations: &[String]) -> String {
    let mut section = String::new();

    section.push_str("## Recommendations & Limitations\n\n");
    for (i, rec) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    section.push('\n');

    section
}

/// Generate the warnings section.
fn generate_warnings_section(stats: &StatisticalResults) -> String {
    let mut section = String::new();

    section.push_str("## Warnings\n\n");
    if stats.warnings.is_empty() {
        section.push_str("None.\n\n");
        return section;
    }
    for warning in &stats.warnings {
        section.push_str(&format!("- {}\n", warning));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by trialscope {}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn recommendations(results: &AnalysisResults) -> Vec<String> {
    let stats = &results.statistics;
    let effect = &stats.treatment_effect;
    let mut recs = Vec::new();

    match effect.t_test.p_value {
        None if arms_perfectly_separated(effect) => recs.push(
            "The outcome takes a single value in each arm. Confirm it is not derived from the \
             treatment assignment itself; genuine outcomes rarely separate the arms perfectly."
                .to_string(),
        ),
        None => recs.push(
            "Check that the outcome column was recorded correctly; a constant outcome cannot \
             show a treatment effect."
                .to_string(),
        ),
        Some(_) if effect.statistically_significant => recs.push(format!(
            "The effect is statistically significant. Judge whether a {} effect of {} on `{}` \
             is practically meaningful before acting on it.",
            effect.effect_size.interpretation,
            fmt_num(effect.ate),
            results.plan.outcome_column
        )),
        Some(_) => recs.push(
            "The effect is not statistically significant. A larger sample would be needed to \
             detect an effect of this size, if one exists."
                .to_string(),
        ),
    }

    if effect.treatment.n < SMALL_ARM || effect.control.n < SMALL_ARM {
        recs.push(format!(
            "At least one arm has fewer than {} observations; estimates are imprecise and the \
             confidence interval uses the t distribution.",
            SMALL_ARM
        ));
    }
    if stats.balance.imbalanced().next().is_some() {
        recs.push(
            "Some covariates are imbalanced. Review the randomization procedure and prefer the \
             covariate-adjusted estimate where available."
                .to_string(),
        );
    }
    if stats.sample.n_excluded + stats.sample.n_missing_outcome > 0 {
        recs.push(
            "Some rows were excluded. If exclusion is related to treatment, the estimate may be \
             biased."
                .to_string(),
        );
    }
    recs.push(
        "These results assume random assignment to arms and independent observations; they \
         are not causal otherwise."
            .to_string(),
    );
    recs.push(
        "Only one outcome was tested at α = 0.05. If several outcomes are compared, adjust \
         for multiple testing."
            .to_string(),
    );

    recs
}

fn fmt_num(value: f64) -> String {
    format!("{:.4}", value)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(fmt_num).unwrap_or_else(|| "undefined".to_string())
}

fn fmt_p(p: Option<f64>) -> String {
    match p {
        None => "undefined".to_string(),
        Some(p) if p < 0.001 => "< 0.001".to_string(),
        Some(p) => format!("{:.4}", p),
    }
}

/// p-value phrased for running text: `< 0.001` or `= 0.0123`.
fn fmt_p_relation(p: Option<f64>) -> String {
    match p {
        Some(p) if p < 0.001 => "< 0.001".to_string(),
        other => format!("= {}", fmt_p(other)),
    }
}

fn fmt_ci(effect: &TreatmentEffectResult) -> String {
    match &effect.confidence_interval {
        Some(ci) => format!("[{}, {}]", fmt_num(ci.lower), fmt_num(ci.upper)),
        None => "undefined".to_string(),
    }
}

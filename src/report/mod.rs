//! Report building.
//!
//! Turns a plan and its statistics into a Markdown report, a structured
//! results object and a reproducible analysis script. The template renderer
//! is always available; the model-backed renderer only authors the
//! interpretation and falls back to the template text on any failure.

mod generator;
mod script;

pub use generator::{
    conclusion, findings_summary, generate_json_report, render_markdown, template_interpretation,
};
pub use script::generate_python_script;

use crate::error::AnalysisWarning;
use crate::llm::{LanguageModel, LlmAdvisor};
use crate::models::{AnalysisPlan, EffectMagnitude};
use crate::stats::StatisticalResults;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Which renderer wrote the interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    Template,
    Llm,
}

impl fmt::Display for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Renderer::Template => write!(f, "template"),
            Renderer::Llm => write!(f, "llm"),
        }
    }
}

/// Machine-readable counterpart of the Markdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub experiment_context: String,
    pub plan: AnalysisPlan,
    #[serde(flatten)]
    pub statistics: StatisticalResults,
    pub effect_interpretation: EffectMagnitude,
    pub conclusion: String,
}

impl AnalysisResults {
    pub fn new(context: &str, plan: AnalysisPlan, statistics: StatisticalResults) -> Self {
        let mut results = Self {
            experiment_context: context.trim().to_string(),
            effect_interpretation: statistics.treatment_effect.effect_size.interpretation,
            plan,
            statistics,
            conclusion: String::new(),
        };
        results.conclusion = conclusion(&results);
        results
    }
}

/// Final output of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub markdown: String,
    pub results: AnalysisResults,
    /// Reproducible analysis script, when enabled.
    pub script: Option<String>,
    pub renderer: Renderer,
}

/// Build a report with the template renderer only.
pub fn build(
    context: &str,
    plan: AnalysisPlan,
    statistics: StatisticalResults,
    include_script: bool,
) -> Report {
    let results = AnalysisResults::new(context, plan, statistics);
    let interpretation = template_interpretation(&results);
    assemble(results, interpretation, Renderer::Template, include_script)
}

/// Build a report whose interpretation is written by the model.
///
/// Never fails: if the model gives no usable answer the template
/// interpretation is used and an [`AnalysisWarning::LlmDegraded`] is recorded.
pub async fn build_with_narrative<M: LanguageModel>(
    context: &str,
    plan: AnalysisPlan,
    statistics: StatisticalResults,
    include_script: bool,
    advisor: &LlmAdvisor<'_, M>,
) -> Report {
    let mut results = AnalysisResults::new(context, plan, statistics);
    let findings = findings_summary(&results);

    match advisor
        .render_narrative(&results.experiment_context, &results.plan, &findings)
        .await
    {
        Some(narrative) => {
            info!("Interpretation written by {}", advisor.model_name());
            assemble(results, narrative, Renderer::Llm, include_script)
        }
        None => {
            warn!("Model interpretation unavailable, using the template interpretation");
            results.statistics.warnings.push(AnalysisWarning::LlmDegraded {
                step: "report".to_string(),
                reason: "no usable interpretation from the model".to_string(),
            });
            let interpretation = template_interpretation(&results);
            assemble(results, interpretation, Renderer::Template, include_script)
        }
    }
}

fn assemble(
    results: AnalysisResults,
    interpretation: String,
    renderer: Renderer,
    include_script: bool,
) -> Report {
    let markdown = render_markdown(&results, &interpretation, renderer);
    let script = include_script.then(|| generate_python_script(&results.plan));
    Report {
        markdown,
        results,
        script,
        renderer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::NARRATIVE_TASK;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::LlmError;
    use crate::stats::analyze;
    use crate::stats::fixtures::{arm_plan, arm_table};

    fn inputs() -> (AnalysisPlan, StatisticalResults) {
        let table = arm_table(
            &["1", "0", "1", "0", "1", "0"],
            &[5.0, 3.0, 6.0, 2.5, 5.5, 3.5],
        );
        let plan = arm_plan("1", "0", &[]);
        let statistics = analyze(&table, &plan).unwrap();
        (plan, statistics)
    }

    #[test]
    fn test_template_build() {
        let (plan, statistics) = inputs();
        let report = build("  Pilot study.  ", plan, statistics, true);
        assert_eq!(report.renderer, Renderer::Template);
        assert_eq!(report.results.experiment_context, "Pilot study.");
        assert!(report.markdown.contains("## Interpretation"));
        assert!(report.script.as_deref().unwrap().contains("import pandas"));
        assert!(report.results.conclusion.contains("statistically significant"));
    }

    #[test]
    fn test_script_can_be_disabled() {
        let (plan, statistics) = inputs();
        assert!(build("", plan, statistics, false).script.is_none());
    }

    #[test]
    fn test_narrative_from_model() {
        let (plan, statistics) = inputs();
        let model = ScriptedModel::new().on(NARRATIVE_TASK, Ok("Treatment clearly helped.".to_string()));
        let advisor = LlmAdvisor::new(&model, 100);
        let report = tokio_test::block_on(build_with_narrative("", plan, statistics, true, &advisor));
        assert_eq!(report.renderer, Renderer::Llm);
        assert!(report.markdown.contains("Treatment clearly helped."));
        assert!(report.results.statistics.warnings.is_empty());
    }

    #[test]
    fn test_narrative_failure_falls_back_to_template() {
        let (plan, statistics) = inputs();
        let model = ScriptedModel::new().on(NARRATIVE_TASK, Err(LlmError::Timeout(1)));
        let advisor = LlmAdvisor::new(&model, 100);
        let report = tokio_test::block_on(build_with_narrative("", plan, statistics, true, &advisor));
        assert_eq!(report.renderer, Renderer::Template);
        assert!(report.markdown.contains("## Interpretation"));
        assert!(report
            .results
            .statistics
            .warnings
            .iter()
            .any(|w| matches!(w, AnalysisWarning::LlmDegraded { step, .. } if step == "report")));
        assert!(report.markdown.contains("deterministic fallback"));
    }

    #[test]
    fn test_results_json_is_flat() {
        let (plan, statistics) = inputs();
        let report = build("", plan, statistics, false);
        let json = serde_json::to_value(&report.results).unwrap();
        assert!(json.get("treatment_effect").is_some());
        assert!(json.get("balance").is_some());
        assert_eq!(json["plan"]["treatment_column"], "arm");
        assert_eq!(json["effect_interpretation"], "large");
    }
}

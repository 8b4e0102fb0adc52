//! Orchestrator: Loader -> Identifier -> Engine -> Report Builder.
//!
//! A run never panics and never returns a half-filled success: the caller
//! gets either a complete [`RunSuccess`] or a [`RunFailure`] with a kind and
//! a reason.

use crate::config::Settings;
use crate::data::{self, DataSource};
use crate::error::{AnalysisError, AnalysisWarning, ErrorKind};
use crate::identify::{HeuristicIdentifier, LlmIdentifier, VariableIdentifier, WithFallback};
use crate::llm::{LanguageModel, LlmAdvisor};
use crate::models::{ExperimentTable, IdentificationMethod, Mode};
use crate::report::{self, AnalysisResults, Renderer, Report};
use crate::stats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

/// Lines of raw input shown to the model when asking for loading hints.
const LOAD_SAMPLE_LINES: usize = 20;

/// Outcome of one run, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunResult {
    Success(Box<RunSuccess>),
    Error(RunFailure),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success(_))
    }

    /// The successful run, if any.
    pub fn success(&self) -> Option<&RunSuccess> {
        match self {
            RunResult::Success(success) => Some(success),
            RunResult::Error(_) => None,
        }
    }
}

/// A completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSuccess {
    pub mode_used: Mode,
    pub sample_size: usize,
    pub treatment_effect: f64,
    pub p_value: Option<f64>,
    pub statistically_significant: bool,
    pub results: AnalysisResults,
    /// Rendered Markdown report.
    pub report: String,
    /// Reproducible analysis script.
    pub code: Option<String>,
    pub metadata: RunMetadata,
}

/// A run that ended in a terminal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub mode_used: Mode,
    pub kind: ErrorKind,
    pub message: String,
}

/// Bookkeeping about a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub timestamp: DateTime<Utc>,
    pub data_source: String,
    pub data_rows: usize,
    pub data_columns: usize,
    pub mode_requested: Mode,
    pub identification: IdentificationMethod,
    pub renderer: Renderer,
    /// Language model consulted, if any.
    pub model: Option<String>,
    pub duration_seconds: f64,
    pub version: String,
}

/// Sequences one analysis run. Holds only immutable settings and an
/// optional model; independent runs share nothing.
pub struct Orchestrator<M> {
    settings: Settings,
    model: Option<M>,
}

impl<M: LanguageModel> Orchestrator<M> {
    pub fn new(settings: Settings, model: Option<M>) -> Self {
        Self { settings, model }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The mode a request for `requested` will run in.
    pub fn resolve_mode(&self, requested: Mode) -> Mode {
        match requested {
            Mode::Auto if self.settings.llm.has_credential() && self.model.is_some() => Mode::Llm,
            Mode::Auto => Mode::Traditional,
            other => other,
        }
    }

    /// Analyze `source` described by `context`.
    pub async fn run(&self, source: &DataSource, context: &str, requested: Mode) -> RunResult {
        let started = Instant::now();
        let mode = self.resolve_mode(requested);
        info!("Analyzing {} in {} mode", source.name, mode);

        if mode == Mode::Llm && self.model.is_none() {
            warn!("LLM mode requested but no language model is configured");
        }

        let table = match self.load(source, mode).await {
            Ok(table) => table,
            Err(e) => return failure(mode, e),
        };

        let (mode_used, report) = match self.analyze(&table, context, mode).await {
            Ok(done) => done,
            Err(e) => return failure(mode, e),
        };

        let effect = &report.results.statistics.treatment_effect;
        let (ate, p_value, significant) =
            (effect.ate, effect.t_test.p_value, effect.statistically_significant);
        let metadata = RunMetadata {
            timestamp: Utc::now(),
            data_source: source.name.clone(),
            data_rows: table.n_rows(),
            data_columns: table.columns().len(),
            mode_requested: requested,
            identification: report.results.plan.method,
            renderer: report.renderer,
            model: match (mode_used, &self.model) {
                (Mode::Llm, Some(model)) => Some(model.name().to_string()),
                _ => None,
            },
            duration_seconds: started.elapsed().as_secs_f64(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        info!(
            "Run finished in {:.2}s: ATE = {:.4}, significant = {}",
            metadata.duration_seconds, ate, significant
        );

        RunResult::Success(Box::new(RunSuccess {
            mode_used,
            sample_size: report.results.statistics.sample.n_total,
            treatment_effect: ate,
            p_value,
            statistically_significant: significant,
            results: report.results,
            report: report.markdown,
            code: report.script,
            metadata,
        }))
    }

    fn advisor<'a>(&self, model: &'a M) -> LlmAdvisor<'a, M> {
        LlmAdvisor::new(model, self.settings.llm.sample_rows)
    }

    /// Load the table; in LLM mode a rejected text file gets one retry with
    /// model-suggested parameters.
    async fn load(&self, source: &DataSource, mode: Mode) -> Result<ExperimentTable, AnalysisError> {
        let err = match data::load(source) {
            Ok(table) => return Ok(table),
            Err(e) => e,
        };

        let model = match (&self.model, mode) {
            (Some(model), Mode::Llm) if source.is_text() && !source.bytes.is_empty() => model,
            _ => return Err(err),
        };

        warn!("Default loading failed ({}), asking {} for loading parameters", err, model.name());
        let sample = source.text_sample(LOAD_SAMPLE_LINES);
        let Some(hints) = self
            .advisor(model)
            .suggest_load_hints(&sample, &err.to_string())
            .await
        else {
            return Err(err);
        };

        info!("Retrying {} with loading hints {:?}", source.name, hints);
        data::load_with_hints(source, &hints).map_err(|retry| merge_load_errors(err, retry))
    }

    /// Identify, analyze and report. In LLM mode any failure re-runs the
    /// whole analysis in traditional mode.
    async fn analyze(
        &self,
        table: &ExperimentTable,
        context: &str,
        mode: Mode,
    ) -> Result<(Mode, Report), AnalysisError> {
        if mode != Mode::Llm {
            return self.analyze_traditional(table, context, None).map(|r| (Mode::Traditional, r));
        }

        match self.analyze_with_model(table, context).await {
            Ok(report) => Ok((Mode::Llm, report)),
            Err(e) => {
                warn!("LLM-mode analysis failed ({}), re-running in traditional mode", e);
                self.analyze_traditional(table, context, Some(e.to_string()))
                    .map(|r| (Mode::Traditional, r))
            }
        }
    }

    async fn analyze_with_model(
        &self,
        table: &ExperimentTable,
        context: &str,
    ) -> Result<Report, AnalysisError> {
        let model = self.model.as_ref().ok_or_else(|| {
            AnalysisError::LlmUnavailable("no language model is configured".to_string())
        })?;

        let identifier = WithFallback::new(
            LlmIdentifier::new(self.advisor(model)),
            HeuristicIdentifier::new(self.settings.identification.clone()),
        );
        let plan = identifier.identify(table, context).await?;

        let mut statistics = stats::analyze(table, &plan)?;
        if plan.method == IdentificationMethod::Heuristic {
            statistics.warnings.push(AnalysisWarning::LlmDegraded {
                step: "identification".to_string(),
                reason: "the model did not provide a usable plan".to_string(),
            });
        }

        Ok(report::build_with_narrative(
            context,
            plan,
            statistics,
            self.settings.include_script,
            &self.advisor(model),
        )
        .await)
    }

    fn analyze_traditional(
        &self,
        table: &ExperimentTable,
        context: &str,
        degraded_from: Option<String>,
    ) -> Result<Report, AnalysisError> {
        let plan = HeuristicIdentifier::new(self.settings.identification.clone()).plan(table)?;
        let mut statistics = stats::analyze(table, &plan)?;
        if let Some(reason) = degraded_from {
            statistics.warnings.push(AnalysisWarning::LlmDegraded {
                step: "analysis".to_string(),
                reason,
            });
        }
        Ok(report::build(context, plan, statistics, self.settings.include_script))
    }
}

fn failure(mode_used: Mode, e: AnalysisError) -> RunResult {
    error!("Run failed: {}", e);
    RunResult::Error(RunFailure {
        mode_used,
        kind: e.kind(),
        message: e.to_string(),
    })
}

/// Combine the default-load failure with the hinted retry failure.
fn merge_load_errors(first: AnalysisError, retry: AnalysisError) -> AnalysisError {
    match (first, retry) {
        (
            AnalysisError::DataLoad { mut attempted, .. },
            AnalysisError::DataLoad {
                attempted: retried,
                reason,
            },
        ) => {
            attempted.extend(retried);
            AnalysisError::DataLoad { attempted, reason }
        }
        (_, retry) => retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::prompts::{LOAD_HINTS_TASK, NARRATIVE_TASK, PLAN_TASK};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::LlmError;
    use crate::stats::fixtures::trial_csv;
    use tokio_test::block_on;

    fn settings(with_key: bool) -> Settings {
        let mut config = Config::default();
        if with_key {
            config.llm.api_key = Some("test-key".to_string());
        }
        config.settings()
    }

    fn traditional() -> Orchestrator<ScriptedModel> {
        Orchestrator::new(settings(false), None)
    }

    fn csv(name: &str, text: String) -> DataSource {
        DataSource::from_bytes(name, text.into_bytes())
    }

    fn expect_success(result: RunResult) -> RunSuccess {
        match result {
            RunResult::Success(success) => *success,
            RunResult::Error(failure) => panic!("run failed: {:?}", failure),
        }
    }

    #[test]
    fn test_scenario_known_effect_heuristic() {
        let source = csv("trial.csv", trial_csv("treatment", "0", "1"));
        let success = expect_success(block_on(traditional().run(&source, "", Mode::Traditional)));

        assert_eq!(success.mode_used, Mode::Traditional);
        assert_eq!(success.sample_size, 200);
        assert!((success.treatment_effect - 8.9).abs() < 1e-9);
        assert!(success.p_value.unwrap() < 0.001);
        assert!(success.statistically_significant);
        assert_eq!(success.results.plan.treatment_column, "treatment");
        assert_eq!(success.metadata.renderer, Renderer::Template);
        assert_eq!(success.metadata.model, None);
        assert!(success.code.is_some());
    }

    #[test]
    fn test_scenario_llm_identifies_renamed_segment() {
        let plan_reply = r#"```json
{"treatment_column": "user_segment", "treatment_value": "B", "control_value": "A",
 "outcome_column": "outcome", "covariate_columns": [], "experiment_type": "A/B test",
 "reasoning": "Context says A is control and B is treatment."}
```"#;
        let model = ScriptedModel::new()
            .on(PLAN_TASK, Ok(plan_reply.to_string()))
            .on(NARRATIVE_TASK, Ok("Segment B outperformed segment A.".to_string()));
        let orchestrator = Orchestrator::new(settings(true), Some(model));
        let source = csv("segments.csv", trial_csv("user_segment", "A", "B"));
        let context = "Users were randomly assigned to segment A (control) or B (treatment).";

        let success = expect_success(block_on(orchestrator.run(&source, context, Mode::Llm)));
        let plan = &success.results.plan;
        assert_eq!(success.mode_used, Mode::Llm);
        assert_eq!(plan.method, IdentificationMethod::Llm);
        assert_eq!(plan.treatment_column, "user_segment");
        assert_eq!(plan.treatment_value, "B");
        assert_eq!(plan.control_value, "A");
        assert_eq!(plan.experiment_type, "A/B test");
        assert!((success.treatment_effect - 8.9).abs() < 1e-9);
        assert!(success.p_value.unwrap() < 0.001);
        assert_eq!(success.sample_size, 200);
        assert_eq!(success.metadata.renderer, Renderer::Llm);
        assert_eq!(success.metadata.model.as_deref(), Some("scripted"));
        assert!(success.report.contains("Segment B outperformed segment A."));
    }

    #[test]
    fn test_scenario_collinear_covariate() {
        let mut text = String::from("treatment,outcome,dose\n");
        for i in 0..20 {
            let t = i % 2;
            text.push_str(&format!("{},{},{}\n", t, 10.0 + 3.0 * t as f64 + (i % 5) as f64, 2 * t));
        }
        let success = expect_success(block_on(traditional().run(
            &csv("dose.csv", text),
            "",
            Mode::Traditional,
        )));

        assert_eq!(success.results.plan.covariate_columns, vec!["dose"]);
        assert!(success.results.statistics.regression.multiple.is_none());
        assert!(success
            .results
            .statistics
            .warnings
            .iter()
            .any(|w| matches!(w, AnalysisWarning::RegressionRankDeficiency { .. })));
        assert!(success.report.contains("rank deficient"));
    }

    #[test]
    fn test_scenario_zero_variance_outcome() {
        let mut text = String::from("treatment,outcome\n");
        for i in 0..10 {
            text.push_str(&format!("{},5\n", i % 2));
        }
        let success = expect_success(block_on(traditional().run(
            &csv("flat.csv", text),
            "",
            Mode::Traditional,
        )));

        assert_eq!(success.treatment_effect, 0.0);
        assert_eq!(success.results.statistics.treatment_effect.effect_size.cohens_d, None);
        assert!(!success.statistically_significant);
        assert!(success.report.contains("effect size undefined due to zero variance"));
        let json = serde_json::to_string(&RunResult::Success(Box::new(success))).unwrap();
        assert!(!json.contains("NaN"));
    }

    #[test]
    fn test_constant_within_arms_is_perfect_separation() {
        let mut text = String::from("treatment,outcome\n");
        for i in 0..40 {
            text.push_str(&format!("{},{}\n", i % 2, if i % 2 == 1 { 8 } else { 5 }));
        }
        let success = expect_success(block_on(traditional().run(
            &csv("separated.csv", text),
            "",
            Mode::Traditional,
        )));

        let effect = &success.results.statistics.treatment_effect;
        assert_eq!(success.treatment_effect, 3.0);
        assert_eq!(success.p_value, None);
        assert_eq!(effect.effect_size.cohens_d, None);
        assert!(effect.mann_whitney.p_value.unwrap() < 0.001);

        assert!(success.results.conclusion.contains("perfectly separated"));
        assert!(!success.results.conclusion.contains("could be assessed"));
        assert!(success.report.contains("within-arm variance is zero"));
        assert!(success.report.contains("Mann-Whitney test does apply and gives p < 0.001"));
        assert!(!success.report.contains("Every unit in both arms"));
        assert!(!success.report.contains("the outcome has zero variance (ATE"));
    }

    #[test]
    fn test_llm_failures_degrade_to_deterministic_steps() {
        let model = ScriptedModel::new()
            .on(PLAN_TASK, Err(LlmError::Timeout(120)))
            .on(NARRATIVE_TASK, Ok("   ".to_string()));
        let orchestrator = Orchestrator::new(settings(true), Some(model));
        let source = csv("trial.csv", trial_csv("treatment", "0", "1"));

        let success = expect_success(block_on(orchestrator.run(&source, "", Mode::Auto)));
        assert_eq!(success.mode_used, Mode::Llm);
        assert_eq!(success.results.plan.method, IdentificationMethod::Heuristic);
        assert_eq!(success.metadata.renderer, Renderer::Template);

        let steps: Vec<&str> = success
            .results
            .statistics
            .warnings
            .iter()
            .filter_map(|w| match w {
                AnalysisWarning::LlmDegraded { step, .. } => Some(step.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec!["identification", "report"]);
        assert!(success.results.plan.rationale[0].contains("unavailable"));
    }

    #[test]
    fn test_engine_failure_reruns_in_traditional_mode() {
        let mut text = String::from("treatment,site,outcome\n");
        for i in 0..12 {
            let site = if i == 0 { "y" } else { "x" };
            text.push_str(&format!("{},{},{}\n", i % 2, site, 20 + (i % 2) * 4 + i % 3));
        }
        let plan_reply = r#"{"treatment_column": "site", "treatment_value": "y",
            "control_value": "x", "outcome_column": "outcome"}"#;
        let model = ScriptedModel::new()
            .on(PLAN_TASK, Ok(plan_reply.to_string()))
            .on(NARRATIVE_TASK, Ok("unused".to_string()));
        let orchestrator = Orchestrator::new(settings(true), Some(model));

        let success = expect_success(block_on(orchestrator.run(
            &csv("sites.csv", text),
            "",
            Mode::Llm,
        )));
        assert_eq!(success.mode_used, Mode::Traditional);
        assert_eq!(success.results.plan.treatment_column, "treatment");
        assert!(success.results.statistics.warnings.iter().any(|w| matches!(
            w,
            AnalysisWarning::LlmDegraded { step, reason } if step == "analysis" && reason.contains("insufficient data")
        )));
        assert_eq!(success.metadata.model, None);
    }

    #[test]
    fn test_auto_mode_without_credential_is_traditional() {
        let model = ScriptedModel::new();
        let orchestrator = Orchestrator::new(settings(false), Some(model));
        assert_eq!(orchestrator.resolve_mode(Mode::Auto), Mode::Traditional);

        let orchestrator = Orchestrator::<ScriptedModel>::new(settings(true), None);
        assert_eq!(orchestrator.resolve_mode(Mode::Auto), Mode::Traditional);
        assert_eq!(orchestrator.resolve_mode(Mode::Llm), Mode::Llm);
    }

    #[test]
    fn test_forced_llm_without_model_falls_back() {
        let orchestrator = Orchestrator::<ScriptedModel>::new(settings(false), None);
        let source = csv("trial.csv", trial_csv("treatment", "0", "1"));
        let success = expect_success(block_on(orchestrator.run(&source, "", Mode::Llm)));
        assert_eq!(success.mode_used, Mode::Traditional);
        assert!((success.treatment_effect - 8.9).abs() < 1e-9);
    }

    #[test]
    fn test_load_hints_retry() {
        let mut text = String::from("Exported by survey tool\nversion 2\narm;score\n");
        for i in 0..10 {
            text.push_str(&format!("{};{}\n", i % 2, 3 + (i % 2) * 2 + i % 3));
        }
        let hints = r#"{"delimiter": ";", "skip_rows": 2, "has_header": true, "encoding": "utf-8"}"#;
        let model = ScriptedModel::new()
            .on(LOAD_HINTS_TASK, Ok(hints.to_string()))
            .on(PLAN_TASK, Err(LlmError::EmptyResponse))
            .on(NARRATIVE_TASK, Err(LlmError::EmptyResponse));
        let orchestrator = Orchestrator::new(settings(true), Some(model));

        let source = csv("export.csv", text.clone());
        let success = expect_success(block_on(orchestrator.run(&source, "", Mode::Llm)));
        assert_eq!(success.sample_size, 10);
        assert_eq!(success.results.plan.treatment_column, "arm");

        // Traditional mode never asks the model.
        let failed = block_on(traditional().run(&csv("export.csv", text), "", Mode::Traditional));
        match failed {
            RunResult::Error(failure) => assert_eq!(failure.kind, ErrorKind::DataLoadError),
            RunResult::Success(_) => panic!("preamble should not parse without hints"),
        }
    }

    #[test]
    fn test_failed_hint_retry_lists_all_attempts() {
        let model = ScriptedModel::new().on(
            LOAD_HINTS_TASK,
            Ok(r#"{"delimiter": "|", "skip_rows": 0}"#.to_string()),
        );
        let orchestrator = Orchestrator::new(settings(true), Some(model));
        let source = csv("notes.csv", "just some words\nand more words\n".to_string());

        match block_on(orchestrator.run(&source, "", Mode::Llm)) {
            RunResult::Error(failure) => {
                assert_eq!(failure.kind, ErrorKind::DataLoadError);
                assert!(failure.message.contains("csv"));
                assert!(failure.message.contains("with loading hints"));
            }
            RunResult::Success(_) => panic!("garbage input should not load"),
        }
    }

    #[test]
    fn test_insufficient_data_is_terminal() {
        // The only control row has no outcome: two treatment rows against zero control rows.
        let text = "treatment,outcome\n1,3.0\n1,4.0\n0,\n".to_string();
        let result = block_on(traditional().run(&csv("tiny.csv", text), "", Mode::Traditional));
        match &result {
            RunResult::Error(failure) => {
                assert_eq!(failure.mode_used, Mode::Traditional);
                assert_eq!(failure.kind, ErrorKind::InsufficientDataError);
                assert!(failure.message.contains("treatment: 2, control: 0"));
            }
            RunResult::Success(_) => panic!("single-arm data must fail"),
        }
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("results").is_none());
    }

    #[test]
    fn test_run_result_json_shape() {
        let source = csv("trial.csv", trial_csv("treatment", "0", "1"));
        let result = block_on(traditional().run(&source, "", Mode::Auto));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["mode_used"], "traditional");
        assert_eq!(json["sample_size"], 200);
        assert_eq!(json["statistically_significant"], true);
        assert_eq!(json["metadata"]["mode_requested"], "auto");
        assert!(json["results"]["treatment_effect"]["ate"].is_number());
    }

    #[test]
    fn test_semicolon_fixture_with_context() {
        let source = DataSource::from_bytes(
            "semicolon_trial.csv",
            include_bytes!("../fixtures/semicolon_trial.csv").to_vec(),
        );
        let context = include_str!("../fixtures/context.txt");
        let success = expect_success(block_on(traditional().run(&source, context, Mode::Auto)));

        let plan = &success.results.plan;
        assert_eq!(plan.treatment_column, "arm");
        assert_eq!(plan.treatment_value, "treatment");
        assert_eq!(plan.control_value, "control");
        assert_eq!(plan.outcome_column, "score");
        assert_eq!(plan.covariate_columns, vec!["age", "region"]);
        assert_eq!(success.sample_size, 12);
        assert!((success.treatment_effect - 10.6).abs() < 1e-6);
        assert!(success.report.contains("coaching program"));
    }
}

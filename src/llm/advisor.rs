//! Adapter between the pipeline and a [`LanguageModel`].
//!
//! Every method returns `None` on any failure: transport errors, timeouts,
//! replies that are not JSON, or JSON missing required fields. Callers treat
//! `None` as the signal to use their deterministic fallback.

use super::prompts::{self, ANALYST_SYSTEM_PROMPT, WRITER_SYSTEM_PROMPT};
use super::LanguageModel;
use crate::data::{Encoding, LoadHints};
use crate::models::{normalize_label, AnalysisPlan, ExperimentTable};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

/// Variable roles as proposed by the model, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanProposal {
    pub treatment_column: String,
    #[serde(deserialize_with = "label")]
    pub treatment_value: String,
    #[serde(deserialize_with = "label")]
    pub control_value: String,
    pub outcome_column: String,
    #[serde(default)]
    pub covariate_columns: Vec<String>,
    #[serde(default)]
    pub experiment_type: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Accept arm values written as strings, numbers or booleans.
fn label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(normalize_label(&s)),
        Value::Number(n) => Ok(normalize_label(&n.to_string())),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "arm value must be a scalar, got {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RawLoadHints {
    #[serde(default)]
    delimiter: Option<String>,
    #[serde(default)]
    skip_rows: Option<usize>,
    #[serde(default)]
    has_header: Option<bool>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Narrow, failure-absorbing view of a language model.
pub struct LlmAdvisor<'a, M> {
    model: &'a M,
    sample_rows: usize,
}

impl<'a, M: LanguageModel> LlmAdvisor<'a, M> {
    pub fn new(model: &'a M, sample_rows: usize) -> Self {
        Self { model, sample_rows }
    }

    /// Name of the underlying model.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Ask the model which columns play which role.
    pub async fn propose_plan(
        &self,
        table: &ExperimentTable,
        context: &str,
    ) -> Option<PlanProposal> {
        let prompt = prompts::plan_prompt(table, context, self.sample_rows);
        let reply = self.ask("variable identification", ANALYST_SYSTEM_PROMPT, &prompt).await?;
        parse_json_reply::<PlanProposal>("variable identification", &reply)
    }

    /// Ask the model to interpret computed findings in prose.
    pub async fn render_narrative(
        &self,
        context: &str,
        plan: &AnalysisPlan,
        findings: &str,
    ) -> Option<String> {
        let prompt = prompts::narrative_prompt(context, plan, findings);
        let reply = self.ask("interpretation", WRITER_SYSTEM_PROMPT, &prompt).await?;
        let text = strip_fences(&reply).trim().to_string();
        if text.is_empty() {
            warn!("Language model returned an empty interpretation");
            return None;
        }
        Some(text)
    }

    /// Ask the model how to parse a file the default parser rejected.
    pub async fn suggest_load_hints(&self, sample: &str, failure: &str) -> Option<LoadHints> {
        let prompt = prompts::load_hints_prompt(sample, failure);
        let reply = self.ask("load hints", ANALYST_SYSTEM_PROMPT, &prompt).await?;
        let raw = parse_json_reply::<RawLoadHints>("load hints", &reply)?;

        let delimiter = match raw.delimiter.as_deref() {
            None => None,
            Some(d) => match parse_delimiter(d) {
                Some(c) => Some(c),
                None => {
                    warn!("Ignoring unusable delimiter suggestion {:?}", d);
                    None
                }
            },
        };

        Some(LoadHints {
            delimiter,
            skip_rows: raw.skip_rows.unwrap_or(0),
            has_header: raw.has_header.unwrap_or(true),
            encoding: raw.encoding.as_deref().and_then(Encoding::from_label),
        })
    }

    async fn ask(&self, step: &str, system: &str, prompt: &str) -> Option<String> {
        debug!("Requesting {} from {}", step, self.model.name());
        match self.model.complete(system, prompt).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!("Language model {} request failed: {}", step, e);
                None
            }
        }
    }
}

fn parse_json_reply<T: for<'de> Deserialize<'de>>(step: &str, reply: &str) -> Option<T> {
    let Some(json) = extract_json(reply) else {
        warn!("Language model {} reply contained no JSON object", step);
        return None;
    };
    match serde_json::from_str::<T>(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Language model {} reply did not match the expected shape: {}", step, e);
            None
        }
    }
}

/// Locate the JSON object in a reply that may be wrapped in prose or fences.
pub(crate) fn extract_json(reply: &str) -> Option<&str> {
    let body = strip_fences(reply);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
}

fn parse_delimiter(raw: &str) -> Option<char> {
    match raw.trim_matches(|c| c == '"' || c == '\'') {
        "\\t" | "tab" | "\t" => Some('\t'),
        "space" | " " => Some(' '),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Some(c),
                _ => None,
            }
        }
    }
}

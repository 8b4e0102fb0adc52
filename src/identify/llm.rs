//! Model-backed variable identification.

use super::VariableIdentifier;
use crate::error::AnalysisError;
use crate::llm::{LanguageModel, LlmAdvisor, PlanProposal};
use crate::models::{AnalysisPlan, ExperimentTable, IdentificationMethod};
use tracing::{info, warn};

/// Asks a language model for the plan and validates it against the table.
///
/// Any failure is reported as [`AnalysisError::LlmUnavailable`] so that a
/// [`super::WithFallback`] wrapper can take over.
pub struct LlmIdentifier<'a, M> {
    advisor: LlmAdvisor<'a, M>,
}

impl<'a, M: LanguageModel> LlmIdentifier<'a, M> {
    pub fn new(advisor: LlmAdvisor<'a, M>) -> Self {
        Self { advisor }
    }
}

impl<M: LanguageModel> VariableIdentifier for LlmIdentifier<'_, M> {
    fn label(&self) -> &'static str {
        "language model"
    }

    async fn identify(
        &self,
        table: &ExperimentTable,
        context: &str,
    ) -> Result<AnalysisPlan, AnalysisError> {
        let proposal = self
            .advisor
            .propose_plan(table, context)
            .await
            .ok_or_else(|| {
                AnalysisError::LlmUnavailable("no usable plan in the model reply".to_string())
            })?;

        let plan = validate_proposal(table, proposal, self.advisor.model_name())
            .map_err(|reason| {
                warn!("Rejected language model plan: {}", reason);
                AnalysisError::LlmUnavailable(format!("rejected plan: {}", reason))
            })?;

        info!(
            "Language model identification: treatment={} ({} vs {}), outcome={}, {} covariate(s)",
            plan.treatment_column,
            plan.treatment_value,
            plan.control_value,
            plan.outcome_column,
            plan.covariate_columns.len()
        );
        Ok(plan)
    }
}

/// Turn a proposal into a plan, or explain why it can't be used.
fn validate_proposal(
    table: &ExperimentTable,
    proposal: PlanProposal,
    model_name: &str,
) -> Result<AnalysisPlan, String> {
    let treatment = table
        .column(&proposal.treatment_column)
        .ok_or_else(|| format!("treatment column `{}` does not exist", proposal.treatment_column))?;
    let outcome = table
        .column(&proposal.outcome_column)
        .ok_or_else(|| format!("outcome column `{}` does not exist", proposal.outcome_column))?;

    if treatment.name == outcome.name {
        return Err("treatment and outcome are the same column".to_string());
    }
    if !outcome.is_numeric() {
        return Err(format!("outcome column `{}` is not numeric", outcome.name));
    }

    // Arm values must occur in the data; match case-insensitively and keep
    // the spelling found in the table.
    let labels = treatment.distinct_labels();
    let find = |value: &str| {
        labels
            .iter()
            .find(|l| l.as_str() == value)
            .or_else(|| labels.iter().find(|l| l.eq_ignore_ascii_case(value)))
            .cloned()
    };
    let treatment_value = find(&proposal.treatment_value).ok_or_else(|| {
        format!(
            "treatment value `{}` does not occur in `{}`",
            proposal.treatment_value, treatment.name
        )
    })?;
    let control_value = find(&proposal.control_value).ok_or_else(|| {
        format!(
            "control value `{}` does not occur in `{}`",
            proposal.control_value, treatment.name
        )
    })?;
    if treatment_value == control_value {
        return Err("treatment and control values are identical".to_string());
    }

    let mut rationale = vec![format!(
        "Variables proposed by language model `{}` and checked against the data.",
        model_name
    )];
    if let Some(reasoning) = proposal.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
        rationale.push(format!("Model reasoning: {}", reasoning.trim()));
    }

    let mut covariate_columns: Vec<String> = Vec::new();
    for name in proposal.covariate_columns {
        if name == treatment.name || name == outcome.name {
            warn!("Dropping covariate `{}`: it is the treatment or outcome column", name);
            rationale.push(format!("Dropped proposed covariate `{}` (treatment or outcome column).", name));
        } else if table.column(&name).is_none() {
            warn!("Dropping covariate `{}`: no such column", name);
            rationale.push(format!("Dropped proposed covariate `{}` (no such column).", name));
        } else if !covariate_columns.contains(&name) {
            covariate_columns.push(name);
        }
    }

    Ok(AnalysisPlan {
        treatment_column: treatment.name.clone(),
        treatment_value,
        control_value,
        outcome_column: outcome.name.clone(),
        covariate_columns,
        experiment_type: proposal
            .experiment_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "RCT".to_string()),
        method: IdentificationMethod::Llm,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::PLAN_TASK;
    use crate::llm::testing::ScriptedModel;
    use crate::models::{Cell, Column};

    fn table() -> ExperimentTable {
        ExperimentTable::new(vec![
            Column::new(
                "user_segment",
                ["A", "B", "A", "B"].iter().map(|s| Cell::Text(s.to_string())).collect(),
            ),
            Column::new(
                "age",
                [30.0, 41.0, 30.0, 52.0].iter().map(|v| Cell::Number(*v)).collect(),
            ),
            Column::new(
                "spend",
                [1.0, 2.5, 1.5, 3.0].iter().map(|v| Cell::Number(*v)).collect(),
            ),
        ])
        .unwrap()
    }

    fn identify(reply: &str) -> Result<AnalysisPlan, AnalysisError> {
        let model = ScriptedModel::new().on(PLAN_TASK, Ok(reply.to_string()));
        let identifier = LlmIdentifier::new(LlmAdvisor::new(&model, 100));
        tokio_test::block_on(identifier.identify(&table(), "segment B got the new page"))
    }

    #[test]
    fn test_valid_plan() {
        let plan = identify(
            r#"{"treatment_column": "user_segment", "treatment_value": "b", "control_value": "A",
                "outcome_column": "spend", "covariate_columns": ["age", "age", "spend", "ghost"],
                "reasoning": "context says B is treatment"}"#,
        )
        .unwrap();
        assert_eq!(plan.method, IdentificationMethod::Llm);
        assert_eq!(plan.treatment_value, "B");
        assert_eq!(plan.control_value, "A");
        assert_eq!(plan.covariate_columns, vec!["age"]);
        assert_eq!(plan.experiment_type, "RCT");
        assert!(plan.rationale.iter().any(|r| r.contains("`ghost`")));
        assert!(plan.rationale.iter().any(|r| r.contains("context says B")));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = identify(
            r#"{"treatment_column": "arm", "treatment_value": "B", "control_value": "A",
                "outcome_column": "spend"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::LlmUnavailable(ref m) if m.contains("`arm`")));
    }

    #[test]
    fn test_non_numeric_outcome_rejected() {
        let err = identify(
            r#"{"treatment_column": "age", "treatment_value": "30", "control_value": "41",
                "outcome_column": "user_segment"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn test_unseen_arm_value_rejected() {
        let err = identify(
            r#"{"treatment_column": "user_segment", "treatment_value": "C", "control_value": "A",
                "outcome_column": "spend"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("`C`"));
    }

    #[test]
    fn test_garbage_reply() {
        let err = identify("I think the treatment is probably the segment column.").unwrap_err();
        assert!(matches!(err, AnalysisError::LlmUnavailable(_)));
    }
}

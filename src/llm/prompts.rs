//! Prompt templates for the three model-assisted steps.

use crate::models::{AnalysisPlan, ColumnKind, ExperimentTable};

/// Header line of the variable identification prompt.
pub const PLAN_TASK: &str = "TASK: IDENTIFY EXPERIMENT VARIABLES";

/// Header line of the interpretation prompt.
pub const NARRATIVE_TASK: &str = "TASK: INTERPRET EXPERIMENT RESULTS";

/// Header line of the loading-parameters prompt.
pub const LOAD_HINTS_TASK: &str = "TASK: SUGGEST LOADING PARAMETERS";

pub const ANALYST_SYSTEM_PROMPT: &str = r#"You are a careful statistician who analyzes randomized controlled trials and A/B tests.
Answer only with what is asked. When asked for JSON, output a single JSON object and nothing else."#;

pub const WRITER_SYSTEM_PROMPT: &str = r#"You are a statistician writing for a non-technical audience.
Explain results plainly, never invent numbers, and state uncertainty honestly.
Do not use headings; write two to four short paragraphs of Markdown prose."#;

/// Prompt asking the model to map columns to experiment roles.
pub fn plan_prompt(table: &ExperimentTable, context: &str, sample_rows: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str(PLAN_TASK);
    prompt.push_str("\n\n");

    prompt.push_str("## Experiment context\n\n");
    if context.trim().is_empty() {
        prompt.push_str("(no context provided)\n\n");
    } else {
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("## Columns ({} rows)\n\n", table.n_rows()));
    for column in table.columns() {
        let kind = column.kind();
        let distinct = column.distinct_labels();
        prompt.push_str(&format!(
            "- `{}`: {}, {} distinct, {} missing",
            column.name,
            kind,
            distinct.len(),
            column.n_missing()
        ));
        match kind {
            ColumnKind::Numeric | ColumnKind::Boolean => {
                let values = column.numeric_values();
                if !values.is_empty() {
                    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    prompt.push_str(&format!(
                        ", min {:.4}, mean {:.4}, max {:.4}",
                        min, mean, max
                    ));
                }
            }
            _ => {}
        }
        if distinct.len() <= 10 {
            prompt.push_str(&format!(", values: {}", distinct.join(" | ")));
        }
        prompt.push('\n');
    }

    let shown = sample_rows.min(table.n_rows());
    prompt.push_str(&format!("\n## Sample ({} of {} rows)\n\n```\n", shown, table.n_rows()));
    prompt.push_str(&table.preview(shown));
    prompt.push_str("```\n\n");

    prompt.push_str("## Instructions\n\n");
    prompt.push_str("Identify the treatment indicator, the two arm values, the outcome and the covariates.\n");
    prompt.push_str("Use the column names exactly as listed and arm values exactly as they appear in the data.\n");
    prompt.push_str("Exclude identifier columns from the covariates.\n");
    prompt.push_str("Respond with a single JSON object of this shape:\n");
    prompt.push_str(
        r#"{"treatment_column": "...", "treatment_value": "...", "control_value": "...", "outcome_column": "...", "covariate_columns": ["..."], "experiment_type": "RCT", "reasoning": "one sentence"}"#,
    );
    prompt.push('\n');
    prompt
}

/// Prompt asking the model to interpret computed results.
pub fn narrative_prompt(context: &str, plan: &AnalysisPlan, findings: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(NARRATIVE_TASK);
    prompt.push_str("\n\n");

    prompt.push_str("## Experiment context\n\n");
    prompt.push_str(if context.trim().is_empty() {
        "(no context provided)"
    } else {
        context.trim()
    });
    prompt.push_str("\n\n");

    prompt.push_str("## Variables\n\n");
    prompt.push_str(&format!(
        "- Treatment: `{}` (`{}` = treatment, `{}` = control)\n",
        plan.treatment_column, plan.treatment_value, plan.control_value
    ));
    prompt.push_str(&format!("- Outcome: `{}`\n", plan.outcome_column));
    if !plan.covariate_columns.is_empty() {
        prompt.push_str(&format!(
            "- Covariates: {}\n",
            plan.covariate_columns.join(", ")
        ));
    }

    prompt.push_str("\n## Computed results\n\n");
    prompt.push_str(findings);
    prompt.push_str("\n\n## Instructions\n\n");
    prompt.push_str("Interpret these results for a decision maker: what the effect means in practice, ");
    prompt.push_str("how confident we can be, and any caveats raised by the balance checks or warnings. ");
    prompt.push_str("Use only the numbers given above.\n");
    prompt
}

/// Prompt asking for parameters to re-parse a file the default parser rejected.
pub fn load_hints_prompt(sample: &str, failure: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(LOAD_HINTS_TASK);
    prompt.push_str("\n\n");
    prompt.push_str("A tabular data file could not be parsed.\n\n");
    prompt.push_str(&format!("## Parser error\n\n{}\n\n", failure));
    prompt.push_str("## First lines of the file\n\n```\n");
    prompt.push_str(sample);
    prompt.push_str("\n```\n\n");
    prompt.push_str("## Instructions\n\n");
    prompt.push_str("Suggest how to read it. `skip_rows` counts lines before the header row.\n");
    prompt.push_str("Respond with a single JSON object of this shape:\n");
    prompt.push_str(
        r#"{"delimiter": ",", "skip_rows": 0, "has_header": true, "encoding": "utf-8"}"#,
    );
    prompt.push('\n');
    prompt
}

//! Keyword and cardinality based variable identification.

use super::VariableIdentifier;
use crate::config::IdentificationConfig;
use crate::error::AnalysisError;
use crate::models::{AnalysisPlan, Column, ColumnKind, ExperimentTable, IdentificationMethod};
use tracing::{debug, info};

/// Arm encodings preferred by the cardinality scan, in tie-break order.
const PREFERRED_ENCODINGS: [[&str; 2]; 3] =
    [["0", "1"], ["false", "true"], ["control", "treatment"]];

/// Deterministic identifier driven by column names and value cardinality.
#[derive(Debug, Clone, Default)]
pub struct HeuristicIdentifier {
    config: IdentificationConfig,
}

impl HeuristicIdentifier {
    pub fn new(config: IdentificationConfig) -> Self {
        Self { config }
    }

    /// Build a plan without any external calls.
    pub fn plan(&self, table: &ExperimentTable) -> Result<AnalysisPlan, AnalysisError> {
        let n_rows = table.n_rows();
        let columns = table.columns();
        let mut rationale = Vec::new();

        let by_name_treatment = self.treatment_by_name(columns, n_rows);
        let by_name_outcome = self.outcome_by_name(
            columns,
            by_name_treatment.map(|(c, _)| c.name.as_str()),
        );

        let treatment = match by_name_treatment {
            Some((column, keyword)) => {
                rationale.push(format!(
                    "Treatment column `{}` matched the name keyword `{}` and has exactly two values.",
                    column.name, keyword
                ));
                Some(column)
            }
            None => {
                let outcome_name = by_name_outcome.map(|(c, _)| c.name.as_str());
                let found = binary_scan(columns, n_rows, outcome_name);
                if let Some(column) = found {
                    rationale.push(format!(
                        "No column name matched a treatment keyword; `{}` is the first two-valued column{}.",
                        column.name,
                        if has_preferred_encoding(column) {
                            " with an indicator-style encoding"
                        } else {
                            ""
                        }
                    ));
                }
                found
            }
        };

        let outcome = match by_name_outcome {
            Some((column, keyword)) => {
                rationale.push(format!(
                    "Outcome column `{}` matched the name keyword `{}` and is numeric.",
                    column.name, keyword
                ));
                Some(column)
            }
            None => {
                let treatment_name = treatment.map(|c| c.name.as_str());
                let found = columns.iter().find(|c| {
                    Some(c.name.as_str()) != treatment_name
                        && c.is_numeric()
                        && !is_id_like(c, n_rows)
                        && c.distinct_labels().len() > 2
                });
                if let Some(column) = found {
                    rationale.push(format!(
                        "No column name matched an outcome keyword; `{}` is the first numeric column with more than two values.",
                        column.name
                    ));
                }
                found
            }
        };

        let (treatment, outcome) = match (treatment, outcome) {
            (Some(t), Some(o)) => (t, o),
            (None, _) => {
                return Err(AnalysisError::VariableIdentification(
                    "no column with exactly two distinct values to use as the treatment indicator"
                        .to_string(),
                ))
            }
            (_, None) => {
                return Err(AnalysisError::VariableIdentification(
                    "no numeric column to use as the outcome".to_string(),
                ))
            }
        };

        let (treatment_value, control_value, reason) = self.assign_arms(treatment)?;
        rationale.push(format!(
            "`{}` is the treatment arm and `{}` the control arm ({}).",
            treatment_value, control_value, reason
        ));

        let mut covariate_columns = Vec::new();
        for column in columns {
            if column.name == treatment.name || column.name == outcome.name {
                continue;
            }
            if is_id_like(column, n_rows) {
                rationale.push(format!(
                    "Excluded `{}` from the analysis as an identifier column.",
                    column.name
                ));
                continue;
            }
            if column.kind() == ColumnKind::Empty {
                rationale.push(format!(
                    "Excluded `{}` from the analysis because it has no values.",
                    column.name
                ));
                continue;
            }
            covariate_columns.push(column.name.clone());
        }
        if !covariate_columns.is_empty() {
            rationale.push(format!(
                "Remaining columns used as covariates: {}.",
                covariate_columns
                    .iter()
                    .map(|c| format!("`{}`", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        info!(
            "Heuristic identification: treatment={} ({} vs {}), outcome={}, {} covariate(s)",
            treatment.name,
            treatment_value,
            control_value,
            outcome.name,
            covariate_columns.len()
        );

        Ok(AnalysisPlan {
            treatment_column: treatment.name.clone(),
            treatment_value,
            control_value,
            outcome_column: outcome.name.clone(),
            covariate_columns,
            experiment_type: "RCT".to_string(),
            method: IdentificationMethod::Heuristic,
            rationale,
        })
    }

    fn treatment_by_name<'t>(
        &self,
        columns: &'t [Column],
        n_rows: usize,
    ) -> Option<(&'t Column, &str)> {
        for keyword in &self.config.treatment_keywords {
            let keyword_lower = keyword.to_lowercase();
            for column in columns {
                if column.name.to_lowercase().contains(&keyword_lower)
                    && column.distinct_labels().len() == 2
                    && !is_id_like(column, n_rows)
                {
                    debug!("Treatment keyword `{}` matched `{}`", keyword, column.name);
                    return Some((column, keyword.as_str()));
                }
            }
        }
        None
    }

    fn outcome_by_name<'t>(
        &self,
        columns: &'t [Column],
        treatment: Option<&str>,
    ) -> Option<(&'t Column, &str)> {
        for keyword in &self.config.outcome_keywords {
            let keyword_lower = keyword.to_lowercase();
            for column in columns {
                if Some(column.name.as_str()) != treatment
                    && column.name.to_lowercase().contains(&keyword_lower)
                    && column.is_numeric()
                    && !has_id_token(&column.name)
                {
                    debug!("Outcome keyword `{}` matched `{}`", keyword, column.name);
                    return Some((column, keyword.as_str()));
                }
            }
        }
        None
    }

    /// Decide which of the two labels is the treatment arm.
    fn assign_arms(&self, column: &Column) -> Result<(String, String, &'static str), AnalysisError> {
        let labels = column.distinct_labels();
        let [first, second] = labels.as_slice() else {
            return Err(AnalysisError::VariableIdentification(format!(
                "treatment column `{}` has {} distinct values, expected 2",
                column.name,
                labels.len()
            )));
        };

        let is_positive = |label: &str| {
            self.config
                .positive_labels
                .iter()
                .any(|p| p.eq_ignore_ascii_case(label))
        };
        match (is_positive(first), is_positive(second)) {
            (true, false) => return Ok((first.clone(), second.clone(), "matches a positive label")),
            (false, true) => return Ok((second.clone(), first.clone(), "matches a positive label")),
            _ => {}
        }

        let larger_first = match (first.parse::<f64>(), second.parse::<f64>()) {
            (Ok(a), Ok(b)) => a > b,
            _ => first > second,
        };
        if larger_first {
            Ok((first.clone(), second.clone(), "larger value"))
        } else {
            Ok((second.clone(), first.clone(), "larger value"))
        }
    }
}

impl VariableIdentifier for HeuristicIdentifier {
    fn label(&self) -> &'static str {
        "heuristic"
    }

    async fn identify(
        &self,
        table: &ExperimentTable,
        _context: &str,
    ) -> Result<AnalysisPlan, AnalysisError> {
        self.plan(table)
    }
}

/// First non-identifier column with exactly two values, preferring
/// indicator-style encodings.
fn binary_scan<'t>(
    columns: &'t [Column],
    n_rows: usize,
    exclude: Option<&str>,
) -> Option<&'t Column> {
    let candidates: Vec<&Column> = columns
        .iter()
        .filter(|c| Some(c.name.as_str()) != exclude)
        .filter(|c| !is_id_like(c, n_rows))
        .filter(|c| c.distinct_labels().len() == 2)
        .collect();

    for encoding in PREFERRED_ENCODINGS {
        if let Some(column) = candidates.iter().find(|c| matches_encoding(c, encoding)) {
            return Some(column);
        }
    }
    candidates.first().copied()
}

fn matches_encoding(column: &Column, encoding: [&str; 2]) -> bool {
    let mut labels: Vec<String> = column
        .distinct_labels()
        .iter()
        .map(|l| l.to_lowercase())
        .collect();
    labels.sort();
    labels == encoding
}

fn has_preferred_encoding(column: &Column) -> bool {
    PREFERRED_ENCODINGS
        .iter()
        .any(|encoding| matches_encoding(column, *encoding))
}

/// Identifier columns: an `id` name token, or a text / whole-number column
/// whose values are all distinct.
pub(crate) fn is_id_like(column: &Column, n_rows: usize) -> bool {
    if has_id_token(&column.name) {
        return true;
    }
    let unique_per_row = n_rows > 2 && column.distinct_labels().len() == n_rows;
    unique_per_row && (column.kind() == ColumnKind::Text || column.is_integer_valued())
}

fn has_id_token(name: &str) -> bool {
    name_tokens(name).iter().any(|t| t == "id")
}

/// Split a column name on non-alphanumerics and lower-to-upper case changes.
fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current).to_lowercase());
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current).to_lowercase());
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current.to_lowercase());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn nums(values: &[f64]) -> Vec<Cell> {
        values.iter().map(|v| Cell::Number(*v)).collect()
    }

    fn texts(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::Text(v.to_string())).collect()
    }

    fn plan(columns: Vec<Column>) -> Result<AnalysisPlan, AnalysisError> {
        HeuristicIdentifier::default().plan(&ExperimentTable::new(columns).unwrap())
    }

    #[test]
    fn test_name_tokens() {
        assert_eq!(name_tokens("participant_id"), vec!["participant", "id"]);
        assert_eq!(name_tokens("userId"), vec!["user", "id"]);
        assert_eq!(name_tokens("ID"), vec!["id"]);
        assert_eq!(name_tokens("valid flag"), vec!["valid", "flag"]);
    }

    #[test]
    fn test_keyword_match() {
        let plan = plan(vec![
            Column::new("user_id", nums(&[1.0, 2.0, 3.0, 4.0])),
            Column::new("age", nums(&[30.0, 40.0, 30.0, 50.0])),
            Column::new("treatment", nums(&[0.0, 1.0, 0.0, 1.0])),
            Column::new("outcome", nums(&[1.0, 2.0, 1.5, 2.5])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_column, "treatment");
        assert_eq!(plan.treatment_value, "1");
        assert_eq!(plan.control_value, "0");
        assert_eq!(plan.outcome_column, "outcome");
        assert_eq!(plan.covariate_columns, vec!["age"]);
        assert_eq!(plan.experiment_type, "RCT");
        assert!(plan.rationale.iter().any(|r| r.contains("`user_id`")));
    }

    #[test]
    fn test_keyword_priority_order() {
        // `treatment` outranks `group` even though `group` comes first.
        let plan = plan(vec![
            Column::new("group", texts(&["x", "y", "x", "y"])),
            Column::new("treatment_arm", texts(&["control", "treatment", "treatment", "control"])),
            Column::new("score", nums(&[1.0, 2.0, 3.0, 4.5])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_column, "treatment_arm");
        assert_eq!(plan.treatment_value, "treatment");
        assert_eq!(plan.control_value, "control");
        assert_eq!(plan.covariate_columns, vec!["group"]);
    }

    #[test]
    fn test_keyword_treatment_requires_two_values() {
        let plan = plan(vec![
            Column::new("group", texts(&["a", "b", "c", "a"])),
            Column::new("flag", nums(&[0.0, 1.0, 1.0, 0.0])),
            Column::new("y", nums(&[1.0, 2.0, 3.0, 4.5])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_column, "flag");
        assert_eq!(plan.outcome_column, "y");
    }

    #[test]
    fn test_binary_scan_prefers_indicator_encodings() {
        let plan = plan(vec![
            Column::new("region", texts(&["north", "south", "north", "south"])),
            Column::new("variant", vec![Cell::Bool(true), Cell::Bool(false), Cell::Bool(true), Cell::Bool(false)]),
            Column::new("revenue", nums(&[10.0, 12.5, 9.0, 14.0])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_column, "variant");
        assert_eq!(plan.treatment_value, "true");
        assert_eq!(plan.outcome_column, "revenue");
        assert_eq!(plan.covariate_columns, vec!["region"]);
    }

    #[test]
    fn test_larger_label_is_treatment() {
        let plan = plan(vec![
            Column::new("segment", texts(&["A", "B", "B", "A"])),
            Column::new("y", nums(&[1.0, 2.0, 3.0, 4.5])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_value, "B");
        assert_eq!(plan.control_value, "A");
    }

    #[test]
    fn test_numeric_labels_compare_numerically() {
        let plan = plan(vec![
            Column::new("dose", nums(&[10.0, 9.0, 10.0, 9.0])),
            Column::new("y", nums(&[1.0, 2.0, 3.0, 4.5])),
        ])
        .unwrap();
        assert_eq!(plan.treatment_value, "10");
    }

    #[test]
    fn test_no_treatment_candidate() {
        let err = plan(vec![
            Column::new("a", nums(&[1.0, 2.0, 3.0])),
            Column::new("b", nums(&[1.5, 2.5, 3.5])),
        ])
        .unwrap_err();
        assert!(matches!(err, AnalysisError::VariableIdentification(_)));
    }

    #[test]
    fn test_no_outcome_candidate() {
        let err = plan(vec![
            Column::new("treatment", nums(&[0.0, 1.0, 0.0])),
            Column::new("label", texts(&["x", "y", "x"])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("outcome"));
    }

    #[test]
    fn test_custom_keywords() {
        let identifier = HeuristicIdentifier::new(IdentificationConfig {
            treatment_keywords: vec!["variant".to_string()],
            ..Default::default()
        });
        let table = ExperimentTable::new(vec![
            Column::new("is_mobile", nums(&[0.0, 1.0, 1.0, 0.0])),
            Column::new("variant", texts(&["old", "new", "old", "new"])),
            Column::new("clicks", nums(&[3.0, 5.0, 3.0, 7.0])),
        ])
        .unwrap();
        let plan = identifier.plan(&table).unwrap();
        assert_eq!(plan.treatment_column, "variant");
        assert_eq!(plan.outcome_column, "clicks");
        assert_eq!(plan.covariate_columns, vec!["is_mobile"]);
    }

    #[test]
    fn test_unique_text_column_is_id_like() {
        let column = Column::new("email", texts(&["a@x", "b@x", "c@x"]));
        assert!(is_id_like(&column, 3));
        let column = Column::new("height", nums(&[1.5, 1.6, 1.7]));
        assert!(!is_id_like(&column, 3));
    }
}

//! Variable identification: deciding which columns are the treatment
//! indicator, the outcome and the covariates.

mod heuristic;
mod llm;

pub use heuristic::HeuristicIdentifier;
pub use llm::LlmIdentifier;

use crate::error::AnalysisError;
use crate::models::{AnalysisPlan, ExperimentTable};
use tracing::warn;

/// Produces an [`AnalysisPlan`] for a table and its free-text context.
#[allow(async_fn_in_trait)]
pub trait VariableIdentifier {
    /// Short label used in logs and rationale entries.
    fn label(&self) -> &'static str;

    async fn identify(
        &self,
        table: &ExperimentTable,
        context: &str,
    ) -> Result<AnalysisPlan, AnalysisError>;
}

/// Runs `primary`, and `fallback` if the primary fails for any reason.
pub struct WithFallback<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> WithFallback<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: VariableIdentifier, F: VariableIdentifier> VariableIdentifier for WithFallback<P, F> {
    fn label(&self) -> &'static str {
        self.primary.label()
    }

    async fn identify(
        &self,
        table: &ExperimentTable,
        context: &str,
    ) -> Result<AnalysisPlan, AnalysisError> {
        match self.primary.identify(table, context).await {
            Ok(plan) => Ok(plan),
            Err(e) => {
                warn!(
                    "{} identification failed ({}), falling back to {}",
                    self.primary.label(),
                    e,
                    self.fallback.label()
                );
                let mut plan = self.fallback.identify(table, context).await?;
                plan.rationale.insert(
                    0,
                    format!(
                        "{} identification was unavailable ({}); used {} instead.",
                        self.primary.label(),
                        e,
                        self.fallback.label()
                    ),
                );
                Ok(plan)
            }
        }
    }
}

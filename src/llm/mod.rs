//! Hosted language model access.
//!
//! The rest of the crate talks to the model only through [`LanguageModel`]
//! and the [`LlmAdvisor`] adapter, which turns every failure into `None`.

mod advisor;
mod client;
pub mod prompts;

pub use advisor::{LlmAdvisor, PlanProposal};
pub use client::GeminiClient;

use thiserror::Error;

/// Transport-level failures talking to the model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    #[error("no API key configured")]
    MissingCredential,

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to {0}")]
    Connect(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// A text-completion capability.
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    /// Model identifier, recorded in run metadata.
    fn name(&self) -> &str;

    /// Send one system instruction plus one user prompt, return the reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Offline stand-in for a hosted model.

    use super::{LanguageModel, LlmError};
    use std::sync::Mutex;

    /// Replays canned replies keyed by a marker found in the prompt.
    #[derive(Debug, Default)]
    pub struct ScriptedModel {
        replies: Vec<(&'static str, Result<String, LlmError>)>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer prompts containing `marker` with `reply`.
        pub fn on(mut self, marker: &'static str, reply: Result<String, LlmError>) -> Self {
            self.replies.push((marker, reply));
            self
        }

        /// Prompts received so far.
        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
        }

        /// Number of prompts containing `marker`.
        pub fn calls_to(&self, marker: &str) -> usize {
            self.prompts().iter().filter(|p| p.contains(marker)).count()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.replies
                .iter()
                .find(|(marker, _)| prompt.contains(marker))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| Err(LlmError::Connect("no scripted reply".to_string())))
        }
    }
}

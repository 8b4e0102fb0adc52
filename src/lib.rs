//! TrialScope - analysis of A/B tests and randomized controlled trials.
//!
//! Loads a table of experiment data, works out which columns hold the
//! treatment, the outcome and the covariates (by keyword heuristics or with a
//! hosted language model), runs the standard two-arm statistics and renders a
//! Markdown report with a structured results object and a reproducible
//! Python script.
//!
//! ```no_run
//! use trialscope::config::Settings;
//! use trialscope::data::DataSource;
//! use trialscope::llm::GeminiClient;
//! use trialscope::models::Mode;
//! use trialscope::pipeline::Orchestrator;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let source = DataSource::from_path("trial.csv".as_ref())?;
//! let orchestrator = Orchestrator::<GeminiClient>::new(Settings::default(), None);
//! let result = orchestrator.run(&source, "Email reminder test", Mode::Traditional).await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod identify;
pub mod input;
pub mod llm;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod stats;

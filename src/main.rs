//! TrialScope - experiment analysis from the command line
//!
//! Loads an experiment table and its description, runs the analysis
//! pipeline and saves the report, results and reproducible script.
//!
//! Exit codes:
//!   0 - Analysis succeeded
//!   1 - Analysis failed (load, identification, insufficient data) or runtime error

mod cli;

use anyhow::{Context, Result};
use cli::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trialscope::config::{Config, CONFIG_FILE_NAME};
use trialscope::data::DataSource;
use trialscope::input;
use trialscope::llm::GeminiClient;
use trialscope::output;
use trialscope::pipeline::{Orchestrator, RunResult, RunSuccess};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("TrialScope v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .trialscope.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Set GEMINI_API_KEY (or --api-key) to enable LLM mode.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` wins when set.
fn init_logging(args: &Args) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the analysis workflow. Returns the exit code.
async fn run_analysis(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    args.merge_into(&mut config);

    // Step 1: Locate inputs
    let (data_path, context) = resolve_inputs(&args)?;
    let source = DataSource::from_path(&data_path)?.with_format_hint(args.format_hint);
    let interactive = !args.quiet && !args.json;

    if interactive {
        println!("📂 Data: {}", data_path.display());
        println!("   Context: {} characters", context.trim().len());
    }

    // Step 2: Set up the language model, if configured
    let model = if config.llm.has_credential() {
        match GeminiClient::new(config.llm.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Language model unavailable: {}", e);
                None
            }
        }
    } else {
        debug!("No API key configured");
        None
    };

    let orchestrator = Orchestrator::new(config.settings(), model);
    let mode = orchestrator.resolve_mode(config.analysis.mode);
    if interactive {
        println!("🤖 Mode: {} (requested {})", mode, config.analysis.mode);
        if mode == trialscope::models::Mode::Llm {
            println!("   Model: {}", config.llm.model);
            println!("   Timeout: {}s", config.llm.timeout_seconds);
        }
    }

    // Step 3: Run the pipeline
    let spinner = interactive.then(|| {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Analyzing experiment...");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let result = orchestrator
        .run(&source, &context, config.analysis.mode)
        .await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    // Step 4: Report
    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize run result")?;
        println!("{}", json);
    }

    match &result {
        RunResult::Success(success) => {
            if !args.json && !args.quiet {
                print_summary(success);
            }
            if !args.no_save {
                let saved = output::save_run(
                    Path::new(&config.general.output_dir),
                    Some(&data_path),
                    success,
                )?;
                if interactive {
                    println!(
                        "\n✅ Analysis complete! Results saved to: {} (version {})",
                        saved.dir.display(),
                        saved.version
                    );
                }
            } else if interactive {
                println!("\n✅ Analysis complete! (--no-save: nothing written)");
            }
            Ok(0)
        }
        RunResult::Error(failure) => {
            if !args.json {
                eprintln!("\n❌ {}: {}", failure.kind, failure.message);
            }
            Ok(1)
        }
    }
}

/// Work out the data file and the context text from the arguments.
fn resolve_inputs(args: &Args) -> Result<(PathBuf, String)> {
    if let Some(ref dir) = args.input_dir {
        let found = input::discover(dir)?;
        let context = input::read_context(found.context_file.as_deref())?;
        return Ok((found.data_file, context));
    }

    let data = args
        .data
        .clone()
        .context("Either --input-dir or --data is required")?;
    let context = match &args.context_text {
        Some(text) => text.clone(),
        None => input::read_context(args.context.as_deref())?,
    };
    if context.trim().is_empty() {
        warn!("No experiment context given; identification relies on column names only");
    }
    Ok((data, context))
}

fn print_summary(run: &RunSuccess) {
    let plan = &run.results.plan;
    let effect = &run.results.statistics.treatment_effect;

    println!("\n📊 Analysis Summary:");
    println!(
        "   Treatment: {} ({} vs {})",
        plan.treatment_column, plan.treatment_value, plan.control_value
    );
    println!("   Outcome: {}", plan.outcome_column);
    if !plan.covariate_columns.is_empty() {
        println!("   Covariates: {}", plan.covariate_columns.join(", "));
    }
    println!("   Identified by: {}", plan.method);
    println!(
        "   Sample size: {} ({} treatment, {} control)",
        run.sample_size, effect.treatment.n, effect.control.n
    );
    println!("   Treatment effect: {:.4}", run.treatment_effect);
    match run.p_value {
        Some(p) => println!("   p-value: {:.6}", p),
        None => println!("   p-value: undefined (zero variance)"),
    }
    println!(
        "   Statistically significant: {}",
        if run.statistically_significant { "yes" } else { "no" }
    );
    println!("   Effect size: {}", run.results.effect_interpretation);
    for warning in &run.results.statistics.warnings {
        println!("   ⚠️  {}", warning);
    }
    println!("   Duration: {:.1}s", run.metadata.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

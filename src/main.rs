mod types;
mod indicators;
mod config;
mod error;
mod feedback;
mod learning;
mod ml;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{load_config, LearnerConfig, TrainingProfile};
use error::PipelineError;
use feedback::OutcomeUpdate;
use learning::{ContinuousLearner, CsvCandleSource, ImprovementReport};
use types::{NewSignal, SignalClass, SignalOutcome, TimeFrame};

#[derive(Parser)]
#[command(name = "signal-learner")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Feedback-driven ensemble learner for SELL/HOLD/BUY signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "learner.toml")]
    config: PathBuf,

    /// Training profile (standard, fast)
    #[arg(short, long, default_value = "standard")]
    profile: TrainingProfile,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain a fresh ensemble on all candles plus signal feedback
    Train {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
        /// Market data CSV (defaults to {data_dir}/{symbol}_{timeframe}.csv)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// Update the stored model with the most recent candles
    Incremental {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// Compare early and recent signal outcomes
    Evaluate {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
    },
    /// Generate a signal from the latest candles
    Predict {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Log the signal to the feedback store
        #[arg(long)]
        record: bool,
    },
    /// Log an emitted signal
    Record {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
        /// SELL, HOLD or BUY
        #[arg(long)]
        signal: SignalClass,
        #[arg(long, default_value = "0")]
        confidence: f64,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        entry: Option<Decimal>,
        #[arg(long)]
        stop_loss: Option<Decimal>,
        #[arg(long)]
        take_profit: Option<Decimal>,
    },
    /// Close a logged signal with its outcome
    Update {
        #[arg(long)]
        id: String,
        /// SUCCESS, FAILURE, STOPPED_OUT or TOOK_PROFIT
        #[arg(long)]
        outcome: SignalOutcome,
        #[arg(long)]
        exit_price: Decimal,
        #[arg(long, allow_hyphen_values = true)]
        profit_loss: f64,
    },
    /// Performance statistics of logged signals
    Stats {
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(short = 'f', long)]
        timeframe: Option<String>,
        #[arg(long)]
        days: Option<i64>,
    },
    /// Export closed signals of a pair as training CSV
    Export {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Model and feedback summary for a pair
    Status {
        #[arg(short, long)]
        symbol: String,
        #[arg(short = 'f', long, default_value = "1h")]
        timeframe: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Signal Learner v0.1.0");

    let mut config = load_config(Some(&cli.config))?;
    cli.profile.apply(&mut config);
    config
        .validate()
        .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join(", ")))?;
    info!("Profile: {} - {}", cli.profile.name(), cli.profile.description());

    if let Err(e) = run(cli.command, config) {
        match exit_code(&e) {
            Some(code) => {
                error!("{}", e);
                std::process::exit(code);
            }
            None => return Err(e),
        }
    }
    Ok(())
}

/// Distinct exit codes for failures a script can act on: 2 when commands
/// ran out of order, 3 when the pair needs more market history
fn exit_code(err: &anyhow::Error) -> Option<i32> {
    let err = err.downcast_ref::<PipelineError>()?;
    if err.is_usage_error() {
        Some(2)
    } else if err.needs_more_data() {
        Some(3)
    } else {
        None
    }
}

fn run(command: Commands, config: LearnerConfig) -> Result<()> {
    match command {
        Commands::Train { symbol, timeframe, data } => {
            check_timeframe(&timeframe);
            let learner = learner(config, data.as_deref());
            let metadata = learner.retrain_with_feedback(&symbol, &timeframe)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Incremental { symbol, timeframe, data } => {
            if let Some(tf) = check_timeframe(&timeframe) {
                let per_day = tf.candles_per_days(1).max(1);
                info!(
                    "Incremental window: {} candles (~{} days)",
                    config.learning.incremental_rows,
                    config.learning.incremental_rows / per_day
                );
            }
            let learner = learner(config, data.as_deref());
            let metadata = learner.incremental_update(&symbol, &timeframe)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Evaluate { symbol, timeframe } => {
            let learner = learner(config, None);
            let report = learner.evaluate_improvement(&symbol, &timeframe)?;
            if let ImprovementReport::InsufficientData { available, required } = &report {
                println!(
                    "Need at least {} closed signals to evaluate ({} available)",
                    required, available
                );
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Predict { symbol, timeframe, data, record } => {
            let learner = learner(config, data.as_deref());
            let signal = if record {
                let (signal, id) = learner.emit_signal(&symbol, &timeframe)?;
                if let Some(id) = id {
                    info!("Logged signal {}", id);
                }
                signal
            } else {
                learner.predict_latest(&symbol, &timeframe)?
            };
            println!("\n=== {} {} ===", symbol, timeframe);
            println!("Signal: {}", signal.signal);
            println!("Confidence: {:.1}%", signal.confidence);
            println!("Analysis: {}", signal.rationale);
        }
        Commands::Record {
            symbol,
            timeframe,
            signal,
            confidence,
            id,
            entry,
            stop_loss,
            take_profit,
        } => {
            let learner = learner(config, None);
            let mut new_signal = NewSignal::new(&symbol, &timeframe, signal, confidence);
            if let Some(id) = id {
                new_signal = new_signal.with_id(&id);
            }
            new_signal.entry_price = entry;
            new_signal.stop_loss = stop_loss;
            new_signal.take_profit = take_profit;
            let signal_id = learner.feedback_store().record(new_signal)?;
            println!("{}", signal_id);
        }
        Commands::Update { id, outcome, exit_price, profit_loss } => {
            let learner = learner(config, None);
            match learner
                .feedback_store()
                .update_outcome_best_effort(&id, outcome, exit_price, profit_loss)
            {
                Some(OutcomeUpdate::Updated) => {
                    println!("Updated {}: {} ({:+.2}%)", id, outcome, profit_loss)
                }
                Some(OutcomeUpdate::NotFound) => println!("Signal not found: {}", id),
                Some(OutcomeUpdate::AlreadyClosed) => println!("Signal {} is already closed", id),
                None => println!("Update of {} skipped, see log", id),
            }
        }
        Commands::Stats { symbol, timeframe, days } => {
            let days = days.or(Some(config.feedback.stats_days));
            let learner = learner(config, None);
            let stats = learner
                .feedback_store()
                .performance_stats(symbol.as_deref(), timeframe.as_deref(), days)?;
            println!("\n=== Performance Stats ===");
            println!("{}", stats);
        }
        Commands::Export { symbol, timeframe, output } => {
            let min_samples = config.feedback.min_samples;
            let learner = learner(config, None);
            match learner
                .feedback_store()
                .export_training_data(&symbol, &timeframe, min_samples, output.as_deref())?
            {
                Some(path) => println!("Exported feedback data to {}", path.display()),
                None => println!("Not enough closed signals for {} {}", symbol, timeframe),
            }
        }
        Commands::Status { symbol, timeframe } => {
            let learner = learner(config, None);
            let status = learner.status(&symbol, &timeframe)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if status.needs_retrain {
                warn!("Success rate below threshold, retraining recommended");
            }
        }
    }
    Ok(())
}

fn learner(config: LearnerConfig, data: Option<&Path>) -> ContinuousLearner<CsvCandleSource> {
    let mut source = CsvCandleSource::new(config.learning.data_dir.clone());
    if let Some(path) = data {
        source = source.with_file(path);
    }
    ContinuousLearner::new(config, source)
}

fn check_timeframe(timeframe: &str) -> Option<TimeFrame> {
    let parsed = TimeFrame::parse(timeframe);
    if parsed.is_none() {
        warn!("Unrecognized timeframe '{}', using it as a plain label", timeframe);
    }
    parsed
}

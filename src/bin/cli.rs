//! Listing Watcher CLI
//!
//! Local execution entry point, meant to be triggered by a scheduler.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use listing_watcher::{
    error::{AppError, Result},
    models::{Config, RunMode},
    pipeline::{RunOutcome, RunReport, Runner},
    services::{CardExtractor, DryRunSink, HttpFetcher, NotifierSink, TelegramSink},
    storage::{LedgerStore, LocalStorage},
    utils::http,
};

/// Listing Watcher - new listing notifications for saved searches
#[derive(Parser, Debug)]
#[command(
    name = "listing-watcher",
    version,
    about = "Watches listing feeds and announces new items"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Chat bot token
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Destination chat identifier
    #[arg(long, env = "CHAT_ID")]
    chat_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check feeds and notify about new listings
    Run {
        /// Process every enabled topic instead of the one waiting longest
        #[arg(long, conflicts_with = "topic")]
        all: bool,

        /// Process only this topic
        #[arg(long)]
        topic: Option<String>,

        /// Log notifications instead of sending them
        #[arg(long)]
        test: bool,

        /// Override the per-run notification cap
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Validate the configuration file
    Validate,

    /// Show per-topic run history and stored listing counts
    Status,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command. `Ok(false)` means some topic run failed.
async fn execute(cli: Cli) -> Result<bool> {
    log::info!("Listing watcher starting...");

    let mut config = Config::load_or_default(&cli.config);
    if let Some(token) = cli.api_token {
        config.notifier.api_token = Some(token);
    }
    if let Some(chat_id) = cli.chat_id {
        config.notifier.chat_id = chat_id;
    }
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run {
            all,
            topic,
            test,
            max_results,
        } => {
            if all {
                config.mode = RunMode::FanOut;
            }
            if test {
                config.notifier.dry_run = true;
            }
            if let Some(cap) = max_results {
                config.max_results_per_run = cap;
            }
            config.validate()?;
            run(&config, topic.as_deref()).await
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            CardExtractor::new(&config.extractor)?;
            log::info!("✓ Config OK ({} projects)", config.projects.len());
            if config.notifier.is_dry_run() {
                log::warn!("No bot token configured; runs will not send notifications");
            }

            log::info!("All validations passed!");
            Ok(true)
        }

        Command::Status => {
            status(&config).await?;
            Ok(true)
        }
    }
}

async fn run(config: &Config, topic: Option<&str>) -> Result<bool> {
    let storage = LocalStorage::from_config(&config.paths);
    let fetcher = HttpFetcher::new(&config.fetcher)?;
    let extractor = CardExtractor::new(&config.extractor)?;

    let sink: Box<dyn NotifierSink> = if config.notifier.is_dry_run() {
        log::info!("Dry run: notifications are logged only");
        Box::new(DryRunSink)
    } else {
        let token = config.notifier.api_token.clone().unwrap_or_default();
        Box::new(TelegramSink::new(
            http::create_api_client()?,
            &config.notifier.api_base,
            token,
        ))
    };

    let runner = Runner::new(
        config,
        &fetcher,
        &extractor,
        &storage,
        &storage,
        &*sink,
    );

    let reports = match topic {
        Some(topic) => {
            let target = config
                .projects
                .iter()
                .find(|p| p.topic == topic)
                .ok_or_else(|| AppError::config(format!("Unknown topic \"{topic}\"")))?;
            vec![runner.run_topic(target).await?]
        }
        None => runner.run().await?,
    };

    for report in &reports {
        log_report(report);
    }
    log::info!("Done!");

    Ok(reports.iter().all(RunReport::succeeded))
}

fn log_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed {
            found,
            change,
            dispatch,
        } => log::info!(
            "\"{}\": {} found, {} new, {} shown, {} delivered, {} stored",
            report.topic,
            found,
            dispatch.total,
            dispatch.shown,
            dispatch.delivered,
            change.added
        ),
        RunOutcome::Failed { stage, error } => {
            log::error!("\"{}\": failed at {}: {}", report.topic, stage, error)
        }
    }
}

async fn status(config: &Config) -> Result<()> {
    let storage = LocalStorage::from_config(&config.paths);
    let ledger = storage.load_ledger().await?;

    log::info!("Data directory: {}", storage.root_dir().display());
    for project in &config.projects {
        let seen = storage
            .peek(&project.topic)
            .await?
            .map(|state| state.len().to_string())
            .unwrap_or_else(|| "no state".to_string());
        let last_run = ledger
            .entry(&project.topic)
            .map(|entry| {
                format!(
                    "{} ({})",
                    entry.last_execution.to_rfc3339(),
                    if entry.success { "ok" } else { "failed" }
                )
            })
            .unwrap_or_else(|| "never".to_string());

        log::info!(
            "{}{}: last run {}, {} seen",
            project.topic,
            if project.disabled { " [disabled]" } else { "" },
            last_run,
            seen
        );
    }
    Ok(())
}

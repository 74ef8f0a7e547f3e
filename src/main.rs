use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use batchr::cache::FsContextCache;
use batchr::classify::RuleClassifier;
use batchr::config::Config;
use batchr::daemon::StopReason;
use batchr::scheduler::{BatchManager, Collaborators};
use batchr::service::HttpSubmissionService;
use batchr::source::TsvWorkSource;
use batchr::storage::BatchStore;

mod cli;

use cli::Cli;
use cli::commands::Commands;

/// Exit status after a forced stop
const FORCED_EXIT_CODE: i32 = 130;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("batchr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_manager(config: &Config, dry_run: bool) -> Result<Arc<BatchManager>> {
    let mut manager_config = config.manager_config();
    if dry_run {
        manager_config = manager_config.with_dry_run(true);
    }
    if config.sources.is_empty() {
        log::warn!("No sources configured; nothing will be scheduled");
    }

    let mut source = TsvWorkSource::new(config.source_paths());
    if let Some(dir) = &config.context.context_dir {
        source = source.with_context_dir(dir);
    }
    let service = HttpSubmissionService::from_config(&config.service, manager_config.request_timeout)
        .context("Failed to create submission service")?;

    let collab = Collaborators {
        source: Arc::new(source),
        service: Arc::new(service),
        cache: Arc::new(FsContextCache::new(&config.context.cache_dir)),
        classifier: Arc::new(RuleClassifier::new()),
    };
    let store = BatchStore::new(&config.storage.state_dir, &config.instance);

    Ok(BatchManager::new(manager_config, config.source_specs(), collab, store).into_shared())
}

/// Each SIGINT or SIGTERM advances the shutdown state one step.
fn spawn_signal_handler(manager: Arc<BatchManager>) {
    tokio::spawn(async move {
        loop {
            if wait_for_signal().await.is_err() {
                log::error!("Signal handler failed; stop requests will not be delivered");
                return;
            }
            let state = manager.request_stop();
            println!("{} {}", "Stop requested:".yellow(), state);
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn handle_run(config: &Config, dry_run: bool, once: bool) -> Result<()> {
    let manager = build_manager(config, dry_run)?;
    spawn_signal_handler(manager.clone());

    if once {
        println!("{}", "Running a single scan pass...".cyan());
    } else {
        println!("{}", "Scheduler running, Ctrl-C to stop...".cyan());
    }

    let result = if once {
        manager.clone().run_once().await
    } else {
        manager.clone().run().await
    };
    let reason = result.context("Scheduler failed")?;

    let status = manager.status();
    println!(
        "{} {:?} ({} submitted, {} completed, {} failed, {} timed out, {} rows written, {} outstanding)",
        "Stopped:".green(),
        reason,
        status.stats.batches_submitted,
        status.stats.batches_completed,
        status.stats.batches_failed,
        status.stats.batches_timed_out,
        status.stats.rows_written,
        status.running_batch_count
    );

    if reason == StopReason::Forced {
        std::process::exit(FORCED_EXIT_CODE);
    }
    Ok(())
}

async fn handle_recover(config: &Config, dry_run: bool) -> Result<()> {
    let manager = build_manager(config, dry_run)?;
    let report = manager.recover().await.context("Recovery failed")?;
    println!(
        "{} {} resumed, {} completed, {} discarded",
        "Recovered:".green(),
        report.resumed,
        report.completed,
        report.discarded
    );
    Ok(())
}

fn handle_status(config: &Config) -> Result<()> {
    let store = BatchStore::new(&config.storage.state_dir, &config.instance);
    let snapshot = store.load().context("Failed to load batch snapshot")?;

    println!("{} {}", "Snapshot:".cyan(), store.path().display());
    if snapshot.is_empty() {
        println!("{}", "No outstanding batches".green());
        return Ok(());
    }

    println!(
        "{} {} outstanding (saved {})",
        "Batches:".cyan(),
        snapshot.len(),
        snapshot.saved_at.format("%Y-%m-%d %H:%M:%S")
    );
    let now = chrono::Utc::now();
    for batch in snapshot.batches.values() {
        let age = batch.elapsed(now);
        let age_text = format!("{}m", age.as_secs() / 60);
        let age_text = if batch.is_timed_out(now, config.manager_config().batch_timeout) {
            age_text.red()
        } else {
            age_text.normal()
        };
        println!(
            "  {} {} {} items, {:?}, age {}",
            batch.handle.as_str().bold(),
            batch.source_id.yellow(),
            batch.items.len(),
            batch.kind,
            age_text
        );
    }
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let dry_run = cli.command.is_dry_run() || config.debug.dry_run;
    if dry_run && cli.command != Commands::Status {
        println!("{}", "Dry run: results will be logged, not written".yellow());
    }

    match &cli.command {
        Commands::Run { .. } => handle_run(config, dry_run, false).await,
        Commands::Once { .. } => handle_run(config, dry_run, true).await,
        Commands::Recover { .. } => handle_recover(config, dry_run).await,
        Commands::Status => handle_status(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use repowatch::config::Config;
use repowatch::daemon::{SchedulerActor, SchedulerDeps, SchedulerHandle, TickReport};
use repowatch::domain::{BatchProgress, BatchStartResponse, BatchTarget, RepoMetrics, Repository};
use repowatch::provider::{AnthropicAnalyzer, GithubClient, MockAnalysisProvider, MockMetricsProvider};
use repowatch::scheduler::TierClassifier;
use repowatch::store::{MemoryStore, RepoStore, SqliteStore};

mod cli;

use cli::Cli;
use cli::commands::{BatchCommands, Commands};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repowatch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("repowatch.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Sample data for --dry-run
async fn dry_run_deps() -> Result<SchedulerDeps> {
    let store = Arc::new(MemoryStore::new());
    let samples = [
        (1, "tokio-rs", "tokio", 28_000, Some(120)),
        (2, "rust-lang", "rust", 101_000, Some(400)),
        (3, "someone", "side-project", 40, None),
        (4, "serde-rs", "serde", 9_500, Some(20)),
    ];

    let mut metrics = MockMetricsProvider::new();
    for (id, owner, name, stars, gained) in samples {
        store.upsert_repository(&Repository::new(id, owner, name)).await?;
        metrics = metrics.with_metrics(
            id,
            RepoMetrics {
                stars,
                forks: stars / 10,
                open_issues: stars / 100,
                stars_gained_7d: gained,
                description: Some(format!("{}/{} (sample)", owner, name)),
                ..Default::default()
            },
        );
    }

    Ok(SchedulerDeps {
        store,
        metrics: Arc::new(metrics),
        analysis: Arc::new(MockAnalysisProvider::new()),
    })
}

fn live_deps(config: &Config) -> Result<SchedulerDeps> {
    let store = SqliteStore::open_at(&config.storage.db_path)
        .with_context(|| format!("Failed to open store at {}", config.storage.db_path.display()))?;
    let github = GithubClient::new(config.providers.github.clone()).context("Failed to create GitHub client")?;
    if !github.has_token() {
        log::warn!(
            "{} is not set, GitHub requests are unauthenticated",
            config.providers.github.token_env
        );
    }
    let analyzer = AnthropicAnalyzer::new(config.providers.analysis.clone())
        .context("Failed to create analysis client (use --dry-run to run without one)")?;

    Ok(SchedulerDeps {
        store: Arc::new(store),
        metrics: Arc::new(github),
        analysis: Arc::new(analyzer),
    })
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    if let Commands::Classify {
        stars,
        velocity,
        engagement,
    } = &cli.command
    {
        return handle_classify_command(*stars, *velocity, *engagement, config);
    }

    let deps = if cli.dry_run {
        println!("{}", "Dry run: in-memory store with sample repositories".yellow());
        dry_run_deps().await?
    } else {
        live_deps(config)?
    };
    let store = deps.store.clone();
    let handle = SchedulerActor::spawn(config, deps);

    let result = match &cli.command {
        Commands::Daemon => handle_daemon_command(&handle, config).await,
        Commands::Tick => handle_tick_command(&handle).await,
        Commands::Batch { command } => handle_batch_command(&handle, store.as_ref(), command).await,
        Commands::Stats => handle_stats_command(&handle).await,
        Commands::Classify { .. } => Ok(()),
    };

    if !handle.is_closed() {
        handle.shutdown().await?;
    }
    result
}

async fn handle_daemon_command(handle: &SchedulerHandle, config: &Config) -> Result<()> {
    let interval = config.scheduler.tick_interval();
    println!(
        "{} {} (tick every {}s, Ctrl-C to stop)",
        "Running scheduler:".cyan(),
        handle.name(),
        interval.as_secs()
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal.cancel();
        }
    });

    handle.run_until_cancelled(interval, shutdown).await?;
    println!("{}", "Scheduler stopped".cyan());
    Ok(())
}

async fn handle_tick_command(handle: &SchedulerHandle) -> Result<()> {
    handle.init().await?;
    let report = handle.tick().await?;
    print_tick_report(&report);
    if let Some(batch_id) = &report.batch_started {
        print_continue_hint(batch_id);
    }
    Ok(())
}

async fn handle_batch_command(
    handle: &SchedulerHandle,
    store: &dyn RepoStore,
    command: &BatchCommands,
) -> Result<()> {
    match command {
        BatchCommands::Start { target, force, wait } => {
            let response = handle.batch_start(*target, *force).await?;
            print_start_response(*target, &response);
            if let Some(batch_id) = &response.batch_id {
                if *wait {
                    let progress = wait_for_batch(handle, batch_id).await?;
                    print_progress(&progress);
                } else {
                    print_continue_hint(batch_id);
                }
            }
        }
        BatchCommands::Status { id } => {
            // Another process may own the job; read the persisted state
            let Some(job) = store.get_batch_job(id).await? else {
                bail!("Batch not found: {}", id);
            };
            print_progress(&job.progress(&[]));
        }
        BatchCommands::Stop { id } => {
            handle.init().await?;
            let progress = handle.batch_stop(id).await?;
            print_progress(&progress);
        }
    }
    Ok(())
}

async fn wait_for_batch(handle: &SchedulerHandle, batch_id: &str) -> Result<BatchProgress> {
    let mut last = usize::MAX;
    loop {
        let progress = handle.batch_status(batch_id).await?;
        if progress.processed != last {
            last = progress.processed;
            println!(
                "  {} {}/{} ({} ok, {} failed)",
                "progress".dimmed(),
                progress.processed,
                progress.total,
                progress.success_count,
                progress.failed_count
            );
        }
        if progress.status.is_terminal() {
            return Ok(progress);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn handle_stats_command(handle: &SchedulerHandle) -> Result<()> {
    let stats = handle.stats().await?;
    println!("{} {}", "Scheduler:".cyan(), stats.actor);
    println!(
        "  tiers: {} tier1, {} tier2, {} tier3 ({} total)",
        stats.tiers.tier1,
        stats.tiers.tier2,
        stats.tiers.tier3,
        stats.tiers.total()
    );
    for channel in &stats.channels {
        println!(
            "  {:<16} {}/{} tokens, full in {}ms",
            channel.channel, channel.available, channel.max, channel.next_reset_eta_ms
        );
    }
    if let Some(batch) = &stats.batch {
        print_progress(batch);
    }
    Ok(())
}

fn handle_classify_command(stars: u64, velocity: f64, engagement: f64, config: &Config) -> Result<()> {
    let classifier = TierClassifier::new(config.tiers.clone(), config.cadence.normal.clone());
    let classification = classifier.classify(stars, velocity, engagement);
    println!(
        "{} {} (priority {:.2})",
        "Classified:".green(),
        classification.tier,
        classification.scan_priority
    );
    Ok(())
}

fn print_tick_report(report: &TickReport) {
    println!("{}", "Tick complete".green());
    println!(
        "  discovered {}, refreshed {} ({} failed), classified {}",
        report.discovered, report.refreshed, report.refresh_failures, report.classified
    );
    if let Some(batch_id) = &report.resumed {
        println!("  resumed {}", batch_id);
    }
    if let Some(next) = report.next_tick_at {
        println!("  next tick at {}", next.to_rfc3339());
    }
}

fn print_start_response(target: BatchTarget, response: &BatchStartResponse) {
    match &response.batch_id {
        Some(batch_id) => println!(
            "{} {} ({} queued of {} due, {} needing analysis)",
            "Started:".green(),
            batch_id,
            response.queued,
            response.total_repos,
            response.needing_analysis
        ),
        None => println!(
            "{} nothing queued for {} ({})",
            "Skipped:".yellow(),
            target,
            response.reason.as_deref().unwrap_or("no candidates")
        ),
    }
    for repo in &response.repositories {
        let tier = repo.tier.map_or_else(|| "trending".to_string(), |t| t.to_string());
        println!("  {:<40} {:<9} {:.2}", repo.name, tier, repo.priority);
    }
}

/// The actor stops with this process; a persisted job only advances under the daemon
fn print_continue_hint(batch_id: &str) {
    println!(
        "  {} continues under `repowatch daemon` or `repowatch batch status {}`",
        batch_id.green(),
        batch_id
    );
}

fn print_progress(progress: &BatchProgress) {
    let status = if progress.status.is_terminal() {
        progress.status.to_string().green()
    } else {
        progress.status.to_string().yellow()
    };
    println!(
        "{} {} {} {}/{} ({} ok, {} failed)",
        "Batch:".cyan(),
        progress.batch_id,
        status,
        progress.processed,
        progress.total,
        progress.success_count,
        progress.failed_count
    );
    if let Some(reason) = &progress.reason {
        println!("  reason: {}", reason);
    }
    if !progress.current_chunk.is_empty() {
        println!("  in flight: {}", progress.current_chunk.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

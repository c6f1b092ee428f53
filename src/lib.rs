mod cli;
pub mod clock;
pub mod db;
pub mod detection;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod pairing;
pub mod runs;
pub mod settings;
mod utils;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cli::{BatchOpts, Cli, Command, InitConfigOpts, LiveOpts, PairOpts, ShowRunOpts, SummaryOpts};
use clock::{Clock, SystemClock};
use db::{Database, ResultRepository, RunStats, RunStatus};
use detection::build_detector;
use events::{EventSink, LogEventSink};
use ingest::{collect_classified_images, plan_batch, ImageSource, IngestController};
use metrics::ProcessMonitor;
use pairing::PairingEngine;
use runs::{CsvExporter, RunOrchestrator, RunOwner};
use settings::{Settings, SettingsStore};

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let store = SettingsStore::new(cli.config.clone())?;

    if let Command::InitConfig(opts) = &cli.command {
        return init_config(&store, opts, &cli);
    }

    let mut settings = store.settings()?;
    apply_global_opts(&mut settings, &cli);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(dispatch(cli.command, settings))
}

async fn dispatch(command: Command, mut settings: Settings) -> Result<()> {
    match command {
        Command::Batch(opts) => {
            apply_batch_opts(&mut settings, &opts);
            settings.validate()?;
            batch(settings, opts.dry_run).await
        }
        Command::Live(opts) => {
            apply_live_opts(&mut settings, &opts);
            settings.validate()?;
            live(settings).await
        }
        Command::Pair(opts) => {
            apply_pair_opts(&mut settings, &opts);
            settings.validate()?;
            pair(settings, opts.once).await
        }
        Command::Summary(SummaryOpts { hours, recent }) => {
            settings.validate()?;
            summary(settings, hours, recent).await
        }
        Command::ShowRun(ShowRunOpts { run_id }) => show_run(settings, &run_id).await,
        Command::InitConfig(_) => Ok(()),
    }
}

/// Writes the effective settings, with `--db` and the CSV flags folded in.
fn init_config(store: &SettingsStore, opts: &InitConfigOpts, cli: &Cli) -> Result<()> {
    if store.path().exists() && !opts.force {
        bail!(
            "{} already exists, pass --force to overwrite",
            store.path().display()
        );
    }
    store.update(|settings| apply_global_opts(settings, cli))?;
    println!("wrote {}", store.path().display());
    Ok(())
}

fn apply_global_opts(settings: &mut Settings, cli: &Cli) {
    if let Some(db_path) = &cli.db {
        settings.database.path = db_path.clone();
    }
    if let Some(path) = &cli.results_csv {
        settings.export.results_csv = Some(path.clone());
    }
    if let Some(path) = &cli.runs_csv {
        settings.export.runs_csv = Some(path.clone());
    }
}

fn apply_batch_opts(settings: &mut Settings, opts: &BatchOpts) {
    if let Some(dir) = &opts.data_dir {
        settings.batch.data_dir = dir.clone();
    }
    if opts.max_items.is_some() {
        settings.batch.max_items = opts.max_items;
    }
    if opts.no_shuffle {
        settings.batch.randomize = false;
    }
    if !opts.classifications.is_empty() {
        settings.batch.classifications = opts.classifications.clone();
    }
}

fn apply_live_opts(settings: &mut Settings, opts: &LiveOpts) {
    if let Some(dir) = &opts.dir_x {
        settings.ingest.dir_x = dir.clone();
    }
    if let Some(dir) = &opts.dir_y {
        settings.ingest.dir_y = dir.clone();
    }
    if let Some(ms) = opts.poll_interval_ms {
        settings.ingest.poll_interval_ms = ms;
    }
}

fn apply_pair_opts(settings: &mut Settings, opts: &PairOpts) {
    if let Some(secs) = opts.interval {
        settings.pairing.interval_secs = secs;
    }
}

async fn open_database(settings: &Settings) -> Result<Database> {
    let path = &settings.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let database = Database::open(path.clone())?;
    database.create_schema().await?;
    Ok(database)
}

/// Closes runs left `running` by a process that has died. Runs whose owner is still
/// alive, or runs on another host, are left alone.
async fn recover_unfinished_runs(database: &Database, clock: &dyn Clock) -> Result<usize> {
    let mut recovered = 0;
    for run in database.get_unfinished_runs().await? {
        let owner = RunOwner::from_config(run.config.as_ref());
        if owner.as_ref().is_some_and(|owner| !owner.is_dead()) {
            log::debug!("run {} is still owned by a live process", run.run_id);
            continue;
        }

        log::warn!("Recovered unfinished run {}; marking as failed", run.run_id);
        database
            .update_run_completion(
                &run.run_id,
                &RunStats::default(),
                RunStatus::Failed,
                Some("interrupted before completion"),
                clock.now(),
            )
            .await?;
        recovered += 1;
    }
    Ok(recovered)
}

fn cancel_on_ctrl_c(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, stopping after the current item");
            cancel_token.cancel();
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn orchestrator_for(settings: &Settings, database: Database) -> Result<RunOrchestrator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    match recover_unfinished_runs(&database, clock.as_ref()).await {
        Ok(0) => {}
        Ok(count) => log::info!("closed {count} interrupted run(s)"),
        Err(err) => log::error!("failed to recover unfinished runs: {err:?}"),
    }

    let orchestrator = RunOrchestrator::new(
        build_detector(&settings.detector)?,
        Arc::new(database),
        Arc::new(ProcessMonitor::new()),
        clock,
        Arc::new(LogEventSink),
    );
    Ok(match CsvExporter::from_settings(&settings.export) {
        Some(exporter) => orchestrator.with_exporter(exporter),
        None => orchestrator,
    })
}

async fn batch(settings: Settings, dry_run: bool) -> Result<()> {
    let catalog = collect_classified_images(
        &settings.batch.data_dir,
        &settings.batch.classifications,
        &settings.ingest.extensions,
    )?;
    let found = catalog.len();
    let items = plan_batch(
        catalog,
        settings.batch.randomize,
        settings.batch.max_items,
        &mut rand::thread_rng(),
    );
    log::info!(
        "{} of {} images selected from {}",
        items.len(),
        found,
        settings.batch.data_dir.display()
    );

    if dry_run {
        return print_json(&items);
    }
    if items.is_empty() {
        bail!("no images found under {}", settings.batch.data_dir.display());
    }

    let database = open_database(&settings).await?;
    let orchestrator = orchestrator_for(&settings, database).await?;
    let cancel_token = CancellationToken::new();
    cancel_on_ctrl_c(cancel_token.clone());

    let config = json!({
        "dataDir": settings.batch.data_dir,
        "items": items.len(),
        "randomize": settings.batch.randomize,
        "maxItems": settings.batch.max_items,
        "classifications": settings.batch.classifications,
    });
    let summary = orchestrator
        .run_batch(items, settings.batch.item_pause(), config, cancel_token)
        .await;
    print_json(&summary)
}

async fn live(settings: Settings) -> Result<()> {
    let database = open_database(&settings).await?;
    let orchestrator = Arc::new(orchestrator_for(&settings, database).await?);
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let source = ImageSource::new(
        settings.ingest.dir_x.clone(),
        settings.ingest.dir_y.clone(),
        &settings.ingest.extensions,
        events,
    )?;

    let config = json!({
        "dirX": settings.ingest.dir_x,
        "dirY": settings.ingest.dir_y,
        "pollIntervalMs": settings.ingest.poll_interval_ms,
        "extensions": settings.ingest.extensions,
    });

    let mut controller = IngestController::new();
    let cancel_token = controller.start_live(
        orchestrator,
        source,
        settings.ingest.poll_interval(),
        config,
    )?;
    cancel_on_ctrl_c(cancel_token);

    match controller.wait().await? {
        Some(summary) => print_json(&summary),
        None => Ok(()),
    }
}

fn pairing_engine(settings: &Settings, database: Database) -> PairingEngine {
    let repository: Arc<dyn ResultRepository> = Arc::new(database);
    PairingEngine::new(
        repository,
        Arc::new(SystemClock),
        Arc::new(LogEventSink),
        settings.pairing.clone(),
    )
}

async fn pair(settings: Settings, once: bool) -> Result<()> {
    let database = open_database(&settings).await?;
    let engine = pairing_engine(&settings, database);

    if once {
        let stats = engine.run_once().await?;
        return print_json(&stats);
    }

    let config = engine.config();
    log::info!(
        "pairing every {}s, window {}s, threshold {}",
        config.interval_secs,
        config.max_time_diff_secs,
        config.confidence_threshold
    );
    let cancel_token = CancellationToken::new();
    cancel_on_ctrl_c(cancel_token.clone());
    engine.run_continuous(cancel_token).await;
    Ok(())
}

async fn summary(settings: Settings, hours: u32, recent: usize) -> Result<()> {
    let database = open_database(&settings).await?;
    let engine = pairing_engine(&settings, database.clone());

    match engine.recent_summary(hours).await? {
        Some(summary) => print_json(&summary)?,
        None => println!("no estimates in the last {hours} hour(s)"),
    }

    if recent > 0 {
        print_json(&database.list_recent_estimates(recent).await?)?;
    }
    Ok(())
}

async fn show_run(settings: Settings, run_id: &str) -> Result<()> {
    let database = open_database(&settings).await?;
    let Some(run) = database.get_run(run_id).await? else {
        bail!("no run with id {run_id}");
    };

    let report = json!({
        "run": run,
        "results": database.get_results_for_run(run_id).await?,
        "observations": database.get_observations_for_run(run_id).await?,
    });
    print_json(&report)
}

//! Standings server: keeps the KBO league table cached for the web layer.
//!
//! Single-binary Tokio application that:
//! 1. Scrapes the standings page in the background (at most one scrape at a time)
//! 2. Serves reads from the in-memory cache without ever waiting on a scrape
//! 3. Publishes the cached table as a JSON snapshot file
//! 4. Logs a heartbeat with cache and refresh statistics

mod config;
mod snapshot;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use tracing::{error, info, warn};

use refresh::{RefreshCoordinator, RefreshOutcome};
use snapshot::SnapshotWriter;
use standings_source::NaverStandingsClient;

/// KBO standings cache server
#[derive(Parser)]
#[command(name = "standings-server", about = "Cached KBO standings scraper")]
struct Cli {
    /// Scrape once, print the JSON snapshot to stdout, then exit.
    #[arg(long)]
    once: bool,

    /// Config file (missing file means defaults + environment).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type Coordinator = RefreshCoordinator<NaverStandingsClient>;

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "standings_server=info,standings_source=info,refresh=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Standings source: {}", cfg.source.url);
    info!(
        "Cache: ttl={}m, page_ready_timeout={}s, snapshot={}",
        cfg.cache.ttl_minutes,
        cfg.source.page_ready_timeout_secs,
        cfg.server.snapshot_path.display()
    );

    let client = match NaverStandingsClient::new(&cfg.source) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build standings client: {}", e);
            std::process::exit(1);
        }
    };

    let coordinator = match RefreshCoordinator::new(client, cfg.cache.ttl()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build refresh coordinator: {}", e);
            std::process::exit(1);
        }
    };

    // ── One-shot mode ────────────────────────────────────────────────
    if cli.once {
        std::process::exit(run_once(&coordinator).await);
    }

    // ── Start ────────────────────────────────────────────────────────
    coordinator.start();

    let writer = SnapshotWriter::new(cfg.server.snapshot_path.clone());
    let poll_interval = Duration::from_secs(cfg.server.poll_interval_secs);

    // Task 1: Snapshot publisher (a cache reader like any web handler).
    let pub_coordinator = coordinator.clone();
    let publish_handle = tokio::spawn(async move {
        run_publisher(pub_coordinator, writer, poll_interval).await;
    });

    // Task 2: Heartbeat
    let hb_coordinator = coordinator.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            log_heartbeat(&hb_coordinator);
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("Standings server is running. Press Ctrl+C to stop.");

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        r = publish_handle => {
            error!("Publisher task exited: {:?}", r);
            "publisher_task_exit"
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
            "heartbeat_task_exit"
        }
    };

    info!("Standings server shut down ({}).", shutdown_reason);
}

// ── Task implementations ────────────────────────────────────────────

async fn run_once(coordinator: &Coordinator) -> i32 {
    info!("Running single standings refresh...");
    let outcome = coordinator.refresh_now().await;

    match outcome {
        RefreshOutcome::Updated { teams, .. } => {
            info!("Fetched {} teams", teams);
            match serde_json::to_string_pretty(&coordinator.snapshot()) {
                Ok(json) => {
                    println!("{}", json);
                    0
                }
                Err(e) => {
                    error!("Failed to encode snapshot: {}", e);
                    1
                }
            }
        }
        RefreshOutcome::Empty => {
            error!("Standings page had no team rows");
            1
        }
        RefreshOutcome::Failed(e) => {
            error!("Standings refresh failed: {}", e);
            1
        }
        RefreshOutcome::Skipped => {
            error!("Refresh already in flight");
            1
        }
    }
}

async fn run_publisher(coordinator: Coordinator, writer: SnapshotWriter, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut published_generation = 0u64;

    loop {
        interval.tick().await;

        // Reading is what drives refreshes: a stale entry triggers one here.
        let Some(entry) = coordinator.entry() else {
            info!("Standings not available yet; waiting for first refresh");
            continue;
        };
        if entry.generation == published_generation {
            continue;
        }

        match writer.write(&entry.to_snapshot()) {
            Ok(()) => {
                published_generation = entry.generation;
                info!(
                    "Published {} teams to {} (fetched {})",
                    entry.dataset.len(),
                    writer.path().display(),
                    entry.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
            }
            Err(e) => warn!("Snapshot write failed: {}", e),
        }
    }
}

fn log_heartbeat(coordinator: &Coordinator) {
    let stats = coordinator.stats();
    let age = coordinator
        .last_updated_at()
        .map(|at| format!("{}s", (Utc::now() - at).num_seconds()))
        .unwrap_or_else(|| "never".into());

    info!(
        "HEARTBEAT: teams={} age={} stale={} refreshing={} started={} updated={} empty={} failed={} coalesced={}",
        coordinator.get_data().len(),
        age,
        coordinator.is_stale(),
        coordinator.is_refreshing(),
        stats.started,
        stats.updated,
        stats.empty,
        stats.failed,
        stats.coalesced
    );
    if let Some(err) = &stats.last_error {
        warn!("Last refresh error: {}", err);
    }
}

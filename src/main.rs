//! fleetmon - Fleet Metrics Collector Core
//!
//! This is the composition root that wires the registry, the paged store
//! and the fleet-refresh loop together.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use anyhow::Context;
use chrono::Utc;
use fleetmon::adapters::outbound::StaticFleetSource;
use fleetmon::config::load_config;
use fleetmon::domain::ports::{ConnectorRegistry, FleetSource, NamedConnector};
use fleetmon::infrastructure::lifecycle::{listen_for_signals, Lifecycle};
use fleetmon::registry::{ApplicationListBuilder, ApplicationStatuses};
use fleetmon::store::{PageQueue, Store};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    tracing::info!(
        "starting fleetmon apps={} pages={}x{}B refresh={}s",
        cfg.apps_path,
        cfg.page_count,
        cfg.page_bytes,
        cfg.fleet_refresh_secs
    );

    // ===== COMPOSITION ROOT =====

    // 1. Application definitions from the config file. The built-in
    //    connector tags cover the drivers compiled into this binary.
    let connectors =
        ConnectorRegistry::with_connectors([NamedConnector::new("tcp"), NamedConnector::new("http")]);

    let file = File::open(&cfg.apps_path)
        .with_context(|| format!("opening application config {}", cfg.apps_path))?;
    let mut builder = ApplicationListBuilder::new();
    builder
        .read_config(BufReader::new(file), &connectors)
        .with_context(|| format!("reading application config {}", cfg.apps_path))?;
    let app_list = builder.build();
    tracing::info!("loaded {} application definitions", app_list.len());

    // 2. The page pool and the registry over an empty store.
    let queue = Arc::new(PageQueue::new(cfg.page_count, cfg.page_bytes));
    let statuses = Arc::new(ApplicationStatuses::new(
        app_list,
        Store::new(queue.clone()),
    ));

    // 3. Fleet source: the static host list. Production deployments swap
    //    in an oracle-backed FleetSource here.
    let fleet: Arc<dyn FleetSource> = Arc::new(StaticFleetSource::from_hosts(&cfg.hosts));

    let lifecycle = Lifecycle::new();

    // 4. Fleet-refresh loop. Each reconciliation pass holds a cycle guard
    //    so shutdown waits for an active-set rewrite in progress.
    {
        let statuses = statuses.clone();
        let lifecycle = lifecycle.clone();
        let refresh = Duration::from_secs(cfg.fleet_refresh_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            let mut shutdown_rx = lifecycle.on_shutdown();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                let _cycle = lifecycle.begin_cycle();
                match fleet.machines().await {
                    Ok(machines) => {
                        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                        statuses.mark_hosts_active_exclusively(now, &machines);
                    }
                    Err(e) => tracing::warn!("fleet source error: {e:#}"),
                }
            }
        });
    }

    // 5. Periodic pool pressure report.
    {
        let lifecycle = lifecycle.clone();
        let statuses = statuses.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            let mut shutdown_rx = lifecycle.on_shutdown();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                let (active, _) = statuses.active_endpoint_ids();
                tracing::debug!(
                    active_endpoints = active.len(),
                    page_grants = queue.allocations(),
                    evicted_samples = queue.evicted_samples(),
                    "pool status"
                );
            }
        });
    }

    // 6. Run until a shutdown signal arrives, then drain in-flight cycles.
    listen_for_signals(lifecycle.clone()).await;
    if lifecycle.drain(Duration::from_secs(10)).await {
        tracing::info!("fleetmon stopped");
    } else {
        tracing::warn!("fleetmon stopped before all cycles finished");
    }
    Ok(())
}

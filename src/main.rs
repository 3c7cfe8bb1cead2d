use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use roombook::clock::SystemClock;
use roombook::config::Config;
use roombook::manager::{ManagerConfig, ReservationManager};
use roombook::model::{Principal, ReservationFilter};
use roombook::notify::NotifyHub;
use roombook::registry::RoomRegistry;
use roombook::store::ReservationStore;
use roombook::sweeper::{Sweeper, run_compactor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let registry = Arc::new(RoomRegistry::with_rooms(config.rooms.clone())?);
    let store = Arc::new(ReservationStore::open(config.wal_path())?);
    let clock = Arc::new(SystemClock);
    let hub = Arc::new(NotifyHub::new());
    let manager = ReservationManager::new(
        store.clone(),
        registry.clone(),
        clock.clone(),
        hub.clone(),
        ManagerConfig {
            min_duration_ms: config.min_duration_ms,
            ..ManagerConfig::default()
        },
    );

    let known = manager
        .list_reservations(&Principal::admin("system"), &ReservationFilter::All)
        .await?;
    let active = known.iter().filter(|r| r.is_active()).count();
    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", registry.list().len());
    info!("  reservations: {} ({active} active)", known.len());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(store.clone(), clock, hub.clone(), config.sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));
    let compactor_handle = tokio::spawn(run_compactor(
        store,
        config.compact_threshold,
        Duration::from_secs(30),
        shutdown.clone(),
    ));
    let prune_shutdown = shutdown.clone();
    let prune_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = prune_shutdown.cancelled() => return,
                _ = ticker.tick() => hub.prune(),
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    shutdown.cancel();
    for handle in [sweeper_handle, compactor_handle, prune_handle] {
        if let Err(e) = handle.await {
            tracing::error!("background task failed: {e}");
        }
    }

    info!("roombook stopped");
    Ok(())
}

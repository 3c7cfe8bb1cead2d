use std::net::SocketAddr;

// ── Reservation lifecycle ───────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: admission attempts refused. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "roombook_reservations_rejected_total";

/// Counter: reservations moved to Canceled.
pub const RESERVATIONS_CANCELED_TOTAL: &str = "roombook_reservations_canceled_total";

/// Counter: reservations moved to Completed by the sweeper.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "roombook_reservations_completed_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Histogram: duration of one sweep cycle in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "roombook_sweep_duration_seconds";

/// Counter: sweep cycles abandoned because of an error.
pub const SWEEP_FAILURES_TOTAL: &str = "roombook_sweep_failures_total";

/// Counter: log compactions run.
pub const COMPACTIONS_TOTAL: &str = "roombook_compactions_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: appointments committed. Labels: status (confirmed, blocked).
pub const APPOINTMENTS_CREATED_TOTAL: &str = "chairtime_appointments_created_total";

/// Counter: bookings rejected for overlapping an existing commitment.
pub const BOOKING_CONFLICTS_TOTAL: &str = "chairtime_booking_conflicts_total";

/// Counter: status transitions applied. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "chairtime_status_changes_total";

/// Counter: slot availability queries.
pub const SLOT_QUERIES_TOTAL: &str = "chairtime_slot_queries_total";

/// Histogram: slot query latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "chairtime_slot_query_duration_seconds";

/// Counter: slot reads that fell back to an empty day after a store failure.
pub const DEGRADED_READS_TOTAL: &str = "chairtime_degraded_reads_total";

// ── HTTP and storage ────────────────────────────────────────────

/// Counter: HTTP requests handled. Labels: route.
pub const HTTP_REQUESTS_TOTAL: &str = "chairtime_http_requests_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

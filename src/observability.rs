use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "spotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "spotbook_query_duration_seconds";

/// Counter: booking proposals refused by policy. Labels: command, kind.
pub const BOOKING_REJECTIONS_TOTAL: &str = "spotbook_booking_rejections_total";

/// Counter: booking writes committed. Labels: op.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "spotbook_bookings_committed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "spotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "spotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "spotbook_connections_rejected_total";

/// Counter: sessions whose user name is not a valid actor id.
pub const AUTH_FAILURES_TOTAL: &str = "spotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSpot { .. } => "insert_spot",
        Command::DeleteSpot { .. } => "delete_spot",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectSpots => "select_spots",
        Command::SelectSpotBookings { .. } => "select_spot_bookings",
        Command::SelectOwnBookings => "select_own_bookings",
    }
}

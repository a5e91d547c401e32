use std::net::SocketAddr;

use crate::wire::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "innkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "innkeep_request_duration_seconds";

/// Counter: bookings refused by the conditional commit after a clean provisional check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Gauge: number of loaded property stores.
pub const PROPERTIES_ACTIVE: &str = "innkeep_properties_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::CheckAvailability { .. } => "check_availability",
        Command::QuotePrice { .. } => "quote_price",
        Command::CheckAvailabilityAndQuote { .. } => "check_availability_and_quote",
        Command::Book { .. } => "book",
        Command::Reschedule { .. } => "reschedule",
        Command::SetStatus { .. } => "set_status",
        Command::ListReservations { .. } => "list_reservations",
        Command::UpsertResource { .. } => "upsert_resource",
        Command::ListResources => "list_resources",
        Command::AddMaintenance { .. } => "add_maintenance",
        Command::RemoveMaintenance { .. } => "remove_maintenance",
        Command::UpsertRule { .. } => "upsert_rule",
        Command::RemoveRule { .. } => "remove_rule",
    }
}

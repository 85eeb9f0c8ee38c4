use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentdesk_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentdesk_query_duration_seconds";

/// Counter: create/update attempts rejected for overlapping an existing booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "rentdesk_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentdesk_connections_rejected_total";

/// Gauge: bookings currently in the store.
pub const BOOKINGS_ACTIVE: &str = "rentdesk_bookings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentdesk_wal_flush_batch_size";

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
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings => "select_bookings",
        Command::SelectResourceBookings { .. } => "select_resource_bookings",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let cmds = [
            Command::InsertBooking {
                resource_id: 1,
                renter_id: 1,
                start: 0,
                end: 1,
            },
            Command::UpdateBooking {
                id: 1,
                resource_id: 1,
                renter_id: 1,
                start: 0,
                end: 1,
            },
            Command::DeleteBooking { id: 1 },
            Command::SelectBooking { id: 1 },
            Command::SelectBookings,
            Command::SelectResourceBookings { resource_id: 1 },
        ];
        let mut labels: Vec<&str> = cmds.iter().map(command_label).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), cmds.len());
    }
}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "campd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "campd_query_duration_seconds";

/// Counter: admission decisions. Labels: outcome (admitted/rejected).
pub const ADMISSIONS_TOTAL: &str = "campd_admissions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "campd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "campd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "campd_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "campd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCampsite { .. } => "insert_campsite",
        Command::UpdateCampsite { .. } => "update_campsite",
        Command::DeactivateCampsite { .. } => "deactivate_campsite",
        Command::InsertEquipment { .. } => "insert_equipment",
        Command::UpdateEquipment { .. } => "update_equipment",
        Command::DeactivateEquipment { .. } => "deactivate_equipment",
        Command::InsertBooking { .. } => "insert_booking",
        Command::ReplaceEquipment { .. } => "replace_equipment",
        Command::SetStatus { .. } => "set_status",
        Command::AttachPaymentProof { .. } => "attach_payment_proof",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectEquipmentAvailability { .. } => "select_equipment_availability",
        Command::SelectCampsites => "select_campsites",
        Command::SelectEquipment => "select_equipment",
        Command::SelectBookings { .. } => "select_bookings",
        Command::Listen { .. } => "listen",
    }
}

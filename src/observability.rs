use std::net::SocketAddr;

use crate::backend::BackendOp;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: capacity requests. Labels: outcome (hit, joined, miss).
pub const CACHE_REQUESTS_TOTAL: &str = "loadwise_cache_requests_total";

/// Counter: fetch results dropped because their window was invalidated in flight.
pub const STALE_FETCHES_DISCARDED_TOTAL: &str = "loadwise_stale_fetches_discarded_total";

/// Counter: backend calls. Labels: op, status.
pub const BACKEND_CALLS_TOTAL: &str = "loadwise_backend_calls_total";

/// Histogram: backend call latency in seconds. Labels: op.
pub const BACKEND_CALL_DURATION_SECONDS: &str = "loadwise_backend_call_duration_seconds";

/// Counter: field edits submitted.
pub const EDITS_SUBMITTED_TOTAL: &str = "loadwise_edits_submitted_total";

/// Counter: field edits superseded before their write went out.
pub const EDITS_COALESCED_TOTAL: &str = "loadwise_edits_coalesced_total";

/// Counter: debounced edits written. Labels: status.
pub const EDITS_PERSISTED_TOTAL: &str = "loadwise_edits_persisted_total";

/// Histogram: targets per committed fill.
pub const FILL_TARGETS: &str = "loadwise_fill_targets";

/// Counter: settled drags. Labels: outcome (committed, reverted).
pub const DRAGS_TOTAL: &str = "loadwise_drags_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: debounced edits waiting for their timer.
pub const PENDING_EDITS: &str = "loadwise_pending_edits";

/// Gauge: entities with a cached or loading capacity window.
pub const CACHED_WINDOWS: &str = "loadwise_cached_windows";

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

/// Install a `fmt` subscriber for embedders that have none. Returns false if one is already set.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt().try_init().is_ok()
}

/// Map a backend operation to a short label for metrics.
pub fn op_label(op: BackendOp) -> &'static str {
    match op {
        BackendOp::FetchAllocations => "fetch_allocations",
        BackendOp::UpdateItem => "update_item",
        BackendOp::BatchUpdateItems => "batch_update_items",
        BackendOp::CreateItem => "create_item",
        BackendOp::DeleteItem => "delete_item",
    }
}

/// Time a backend call and record its outcome.
pub async fn timed<T, E, F>(op: BackendOp, call: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = call.await;
    let label = op_label(op);
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(BACKEND_CALLS_TOTAL, "op" => label, "status" => status).increment(1);
    metrics::histogram!(BACKEND_CALL_DURATION_SECONDS, "op" => label)
        .record(start.elapsed().as_secs_f64());
    result
}

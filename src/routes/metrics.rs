use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe application metrics.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("tasks_created_total", "Tasks accepted and queued");
    metrics::describe_counter!(
        "tasks_updated_total",
        "Webhook status updates applied, by new status"
    );
    metrics::describe_gauge!("task_status_records", "Records held by the task status store");
    metrics::describe_counter!(
        "task_status_records_evicted_total",
        "Task records removed after their TTL elapsed"
    );
    metrics::describe_counter!(
        "auth_tokens_verified_total",
        "Bearer tokens accepted, by kind (admin or jwt)"
    );
    metrics::describe_counter!(
        "auth_tokens_rejected_total",
        "Bearer tokens rejected, by reason"
    );
    metrics::describe_counter!("jwks_cache_hits_total", "Key sets served from cache");
    metrics::describe_counter!(
        "jwks_cache_misses_total",
        "Key sets fetched from the remote endpoint"
    );

    Ok(handle)
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

/// Wraps one AI provider call with `event=ai_request` / `event=ai_response` timing lines.
pub async fn log_ai_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "avatar.timing",
        "event=ai_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let (status, detail) = match &result {
        Ok(_) => ("success", String::new()),
        Err(err) => ("error", err.to_string()),
    };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "avatar.timing",
        "event=ai_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} detail={:?} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        detail,
        metadata_text
    );

    result
}

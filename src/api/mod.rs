pub mod auth;
pub mod avatar;
pub mod error;
pub mod tryon;
pub mod uploads;
pub mod validate;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::storage::StorageError;

const MAX_BODY_BYTES: usize = 15 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/avatar",
            get(avatar::get_avatar)
                .post(avatar::create_avatar)
                .put(avatar::update_avatar)
                .delete(avatar::delete_avatar),
        )
        .route("/api/avatar/validate", post(validate::validate_photo))
        .route("/api/tryon", post(tryon::generate_try_on))
        .route("/api/uploads", post(uploads::save_images))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .db
        .health_check()
        .await
        .map_err(StorageError::from)?;
    Ok(Json(json!({ "ok": true })))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Avatar service listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

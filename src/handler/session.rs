use std::sync::Arc;

use audio_bus::{pipeline::OutputFormat, registry::Registry, session::SessionStatus};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::handler::ApiJsonResult;

pub fn session_router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_sessions))
        .route("/play", post(play))
        .route("/stop/{id}", post(stop))
        .route("/pause/{id}", post(pause))
        .route("/resume/{id}", post(resume))
        .route("/status/{id}", get(status))
        .with_state(registry)
}

#[derive(Serialize, Deserialize)]
struct PlayRequest {
    id: String,
    url: String,
    #[serde(default)]
    format: Option<OutputFormat>,
}

async fn index() -> &'static str {
    "session route!"
}

async fn list_sessions(State(registry): State<Arc<Registry>>) -> Json<Vec<String>> {
    Json(registry.ids().await)
}

async fn play(
    State(registry): State<Arc<Registry>>,
    Json(request): Json<PlayRequest>,
) -> ApiJsonResult<String> {
    if request.id.is_empty() {
        return Err(anyhow::anyhow!("id is required").into());
    }
    if request.url.is_empty() {
        return Err(anyhow::anyhow!("url is required").into());
    }

    registry
        .start_playback(&request.id, &request.url, request.format.unwrap_or_default())
        .await;
    Ok(Json("success".to_string()))
}

async fn stop(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiJsonResult<String> {
    registry.stop(&id).await?;
    Ok(Json("success".to_string()))
}

async fn pause(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiJsonResult<String> {
    registry.pause(&id).await?;
    Ok(Json("success".to_string()))
}

async fn resume(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiJsonResult<String> {
    registry.resume(&id).await?;
    Ok(Json("success".to_string()))
}

async fn status(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiJsonResult<SessionStatus> {
    Ok(Json(registry.status(&id).await?))
}

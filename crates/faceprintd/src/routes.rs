use crate::error::ApiError;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    routing::{get, post},
    Json, Router,
};
use faceprint_core::{EmbedResponse, FaceEmbedder};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    embedder: Arc<FaceEmbedder>,
}

pub fn router(embedder: Arc<FaceEmbedder>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/embed", post(embed))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { embedder })
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn embed(State(state): State<AppState>, request: Request) -> Result<Json<EmbedResponse>, ApiError> {
    let bytes = read_upload(request, &state).await?;
    let embedder = Arc::clone(&state.embedder);

    let response = tokio::task::spawn_blocking(move || embedder.embed_bytes(&bytes))
        .await
        .map_err(|e| ApiError::internal(format!("embedding task failed: {e}")))??;

    Ok(Json(response))
}

/// The image is either the whole body or the first multipart field with data.
async fn read_upload(request: Request, state: &AppState) -> Result<Bytes, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        return Bytes::from_request(request, state)
            .await
            .map_err(|rejection| ApiError::new(rejection.status(), "BAD_BODY", rejection.body_text()));
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| ApiError::bad_request("BAD_MULTIPART", rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("BAD_MULTIPART", e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request("BAD_MULTIPART", e.to_string()))?;
        if !data.is_empty() {
            tracing::debug!(field = %name, bytes = data.len(), "using multipart field");
            return Ok(data);
        }
    }

    Ok(Bytes::new())
}

//! The request-scoped dispatch path: validate, generate an id, submit,
//! await, translate the outcome into a response.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use ostinato_core::domain::{Outcome, QueueName, RetryPolicy, TaskKind, WorkSubmission};
use ostinato_core::ports::{Dispatcher, IdGenerator};

/// Tempo used when the request leaves `bpm` out.
pub const DEFAULT_BPM: u32 = 120;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub ids: Arc<dyn IdGenerator>,
    pub queue: QueueName,
    pub retry: RetryPolicy,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/prompt", post(submit_prompt))
        .with_state(state)
}

/// Body of `POST /api/prompt`. Everything is optional at the serde layer
/// so presence can be validated explicitly with a useful message.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    prompt: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    bpm: Option<u32>,
}

async fn submit_prompt(State(state): State<AppState>, Json(req): Json<PromptRequest>) -> Response {
    // Invalid requests submit nothing; no id is generated for them either.
    let Some(prompt) = req.prompt else {
        return (StatusCode::BAD_REQUEST, "missing required field: prompt").into_response();
    };
    let Some(kind) = req.kind else {
        return (StatusCode::BAD_REQUEST, "missing required field: type").into_response();
    };
    let bpm = req.bpm.unwrap_or(DEFAULT_BPM);

    let id = state.ids.generate();
    let submission = WorkSubmission::new(
        id,
        TaskKind::new(kind),
        state.queue.clone(),
        vec![serde_json::json!(prompt), serde_json::json!(bpm)],
    )
    .with_retry(state.retry);

    info!(%id, kind = %submission.kind, bpm, "submitting generation request");
    let handle = match state.dispatcher.submit(submission).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(%id, error = %e, "submission failed");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Cooperative wait: other requests keep being accepted and served while
    // this one sits on its handle.
    match handle.outcome().await {
        Ok(Outcome::Success { result }) => (StatusCode::OK, Json(result)).into_response(),
        Ok(Outcome::Failure { reason }) => {
            warn!(%id, %reason, "generation failed");
            (StatusCode::BAD_REQUEST, reason).into_response()
        }
        Err(e) => {
            warn!(%id, error = %e, "engine session ended mid-await");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

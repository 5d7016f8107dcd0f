//! The HTTP surface: `GET /` (liveness) and `POST /github` (webhook
//! intake). Routes are thin: signature verification, JSON parsing, and
//! event routing all live in `dockyard-core`/`dockyard-github`; this
//! module's job is mapping the result onto the wire contract from the
//! spec's External Interfaces section.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dockyard_core::correlation::CorrelationId;
use dockyard_core::dispatch::{EventDispatcher, WebhookInterpreter};
use dockyard_core::error::DockyardError;
use dockyard_github::GithubInterpreter;
use log::{error, info};
use serde::Serialize;

const IDENTIFIER: &str = "dockyard-build";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<EventDispatcher>,
    pub interpreter: Arc<GithubInterpreter>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(index)).route("/github", post(github_webhook)).with_state(state)
}

async fn index() -> impl IntoResponse {
    let correlation = CorrelationId::new();
    info!("[{}] GET /", correlation);
    (StatusCode::OK, IDENTIFIER)
}

/// Structured error envelope posted back to the webhook caller. The
/// shape intentionally varies by error kind, per the spec's External
/// Interfaces contract: a parse failure carries a fixed message and an
/// empty JSON-path, while every other error carries a grep-able
/// correlation tag instead of the error text itself (the error text may
/// contain details about the caller's own payload).
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_traceback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<Vec<serde_json::Value>>,
}

impl ErrorEnvelope {
    fn json_parsability() -> Self {
        ErrorEnvelope {
            error_type: "json parsability",
            error_message: Some("expected json"),
            error_traceback: None,
            path: Some(Vec::new()),
        }
    }

    fn signature_mismatch(correlation: &CorrelationId) -> Self {
        ErrorEnvelope {
            error_type: "SignatureError",
            error_message: None,
            error_traceback: Some(signature_traceback(correlation)),
            path: None,
        }
    }

    fn from_error(err: &DockyardError, correlation: &CorrelationId) -> Self {
        ErrorEnvelope {
            error_type: err.class_name(),
            error_message: None,
            error_traceback: Some(err.trace_tag(correlation)),
            path: None,
        }
    }
}

fn signature_traceback(correlation: &CorrelationId) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(b"webhook signature mismatch");
    hasher.update(correlation.as_str());
    format!("{:x}", hasher.finalize())
}

async fn github_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation = CorrelationId::new();

    let signature = headers.get("X-Hub-Signature").and_then(|v| v.to_str().ok());
    if !state.interpreter.verify_signature(signature, &body) {
        error!("[{}] webhook signature mismatch", correlation);
        return (StatusCode::BAD_REQUEST, Json(ErrorEnvelope::signature_mismatch(&correlation))).into_response();
    }

    let Some(event_type) = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, Json(ErrorEnvelope::json_parsability())).into_response();
    };

    let events = match state.interpreter.interpret(event_type, &body) {
        Ok(events) => events,
        Err(DockyardError::ClientInput(message)) => {
            info!("[{}] unparsable webhook body: {}", correlation, message);
            return (StatusCode::BAD_REQUEST, Json(ErrorEnvelope::json_parsability())).into_response();
        }
        Err(err) => {
            error!("[{}] {} ({})", correlation, err, err.trace_tag(&correlation));
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorEnvelope::from_error(&err, &correlation)))
                .into_response();
        }
    };

    for event in events {
        if let Err(err) = state.dispatcher.dispatch(event, correlation.clone()) {
            error!("[{}] {} ({})", correlation, err, err.trace_tag(&correlation));
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorEnvelope::from_error(&err, &correlation)))
                .into_response();
        }
    }

    (StatusCode::OK, Json(serde_json::json!({}))).into_response()
}

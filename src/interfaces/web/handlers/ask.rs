use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::super::AppState;
use crate::core::errors::QueryError;
use crate::core::types::ConversationTurn;

#[derive(Deserialize)]
pub struct AskRequest {
    message: String,
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

type JsonReply = (StatusCode, Json<serde_json::Value>);

fn bad_request(msg: &str) -> JsonReply {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "success": false, "error": msg })),
    )
}

fn failure(err: &QueryError) -> JsonReply {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "phase": err.phase().as_str(),
            "transient": err.is_transient(),
        })),
    )
}

fn to_json<T: serde::Serialize>(value: &T) -> JsonReply {
    match serde_json::to_value(value) {
        Ok(json) => (StatusCode::OK, Json(json)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

/// Run `work` on its own task under a token scoped to this request.
///
/// Axum drops the handler future when the client disconnects. The guard then
/// cancels the token, and the detached task still gets to cancel any
/// statement it left running on the warehouse.
async fn run_detached<F, Fut, T>(state: &AppState, work: F) -> Result<T, JsonReply>
where
    F: FnOnce(AppState, CancellationToken) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    tokio::spawn(work(state.clone(), cancel))
        .await
        .map_err(|e| {
            warn!("Request task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": "request task failed" })),
            )
        })
}

/// Classify the message and answer it the way its intent calls for.
pub async fn ask_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> JsonReply {
    if payload.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    info!("Ask: {} history turn(s)", payload.history.len());
    let outcome = run_detached(&state, move |state, cancel| async move {
        state
            .router
            .respond_with_cancel(&payload.message, &state.schema, &payload.history, &cancel)
            .await
    })
    .await;
    match outcome {
        Ok(Ok(response)) => to_json(&response),
        Ok(Err(e)) => {
            warn!("Ask failed: {}", e);
            failure(&e)
        }
        Err(reply) => reply,
    }
}

/// Run the query pipeline directly. Pipeline failures are reported inside
/// the envelope, so this always answers 200 for a well-formed request.
pub async fn query_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> JsonReply {
    if payload.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    let outcome = run_detached(&state, move |state, cancel| async move {
        state
            .router
            .pipeline()
            .orchestrate_with_cancel(&payload.message, &state.schema, &payload.history, &cancel)
            .await
    })
    .await;
    match outcome {
        Ok(envelope) => to_json(&envelope),
        Err(reply) => reply,
    }
}

pub async fn classify_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> JsonReply {
    if payload.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    let outcome = run_detached(&state, move |state, cancel| async move {
        state
            .router
            .classifier()
            .classify_with_cancel(&payload.message, &payload.history, &cancel)
            .await
    })
    .await;
    match outcome {
        Ok(Ok(intent)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "intent": intent.as_str() })),
        ),
        Ok(Err(e)) => failure(&e),
        Err(reply) => reply,
    }
}

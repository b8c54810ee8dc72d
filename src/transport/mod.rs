//! Transport layer: the single live endpoint.
//!
//! One path serves three roles, selected per request:
//! - GET with websocket upgrade headers → full-duplex WebSocket;
//! - GET without upgrade → Server-Sent-Events fallback (patches only;
//!   callbacks must use the POST path);
//! - POST with a `[callbackId, ...args]` JSON body → one-shot callback
//!   delivery for clients without a persistent connection.
//!
//! The `id` query parameter carries the context token issued during the
//! initial render.

pub mod frame;
mod sse;
mod ws;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::warn;

use crate::context::{ContextId, DispatchError};
use crate::directory::ContextDirectory;
use crate::engine::LiveConfig;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct TransportState {
    directory: Arc<ContextDirectory>,
    config: LiveConfig,
}

/// Query parameters of every live request.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    id: String,
}

/// Build the router for the live endpoint.
pub(crate) fn router(directory: Arc<ContextDirectory>, config: LiveConfig) -> Router {
    let endpoint = config.endpoint.clone();
    Router::new()
        .route(&endpoint, get(connect).post(deliver_callback))
        .with_state(TransportState { directory, config })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET: open the persistent connection for a rendered context.
async fn connect(
    State(state): State<TransportState>,
    Query(params): Query<ConnectParams>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let id = ContextId::from(params.id.as_str());
    let Some(context) = state.directory.lookup(&id) else {
        return not_found();
    };
    match upgrade {
        Some(upgrade) => ws::serve(upgrade, state.directory.clone(), context),
        None => sse::serve(state.directory.clone(), context, state.config.keep_alive),
    }
}

/// POST: deliver a one-shot callback invocation.
async fn deliver_callback(
    State(state): State<TransportState>,
    Query(params): Query<ConnectParams>,
    body: Bytes,
) -> Response {
    let id = ContextId::from(params.id.as_str());
    let Some(context) = state.directory.lookup(&id) else {
        return not_found();
    };
    let frame = match frame::parse_callback_body(&body) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(context = %id, %error, "malformed callback body");
            return (StatusCode::BAD_REQUEST, "malformed callback body").into_response();
        }
    };
    match context.dispatch_callback(frame.callback, &frame.args) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(DispatchError::UnknownCallback(_) | DispatchError::ContextClosed) => not_found(),
        // Already logged by the context; the delivery itself succeeded.
        Err(DispatchError::CallbackFailed { .. }) => StatusCode::OK.into_response(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "context or callback not found").into_response()
}

//! Server-Sent-Events transport: the half-duplex fallback.
//!
//! Outbound batches are wrapped as server-push `data:` events. Inbound
//! callback invocations cannot ride this connection; clients use the POST
//! path instead.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::frame;
use crate::context::{AttachError, LiveContext};
use crate::directory::ContextDirectory;

/// Tears the context down when axum drops the event stream, which is the
/// only disconnect signal a half-duplex connection gives us.
struct DisconnectGuard {
    directory: Arc<ContextDirectory>,
    context: Arc<LiveContext>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        debug!(context = %self.context.id(), "sse stream dropped");
        self.directory.close_context(self.context.id());
    }
}

pub(super) fn serve(
    directory: Arc<ContextDirectory>,
    context: Arc<LiveContext>,
    keep_alive: Duration,
) -> Response {
    let rx = match context.attach() {
        Ok(rx) => rx,
        Err(error) => {
            warn!(context = %context.id(), %error, "sse attach rejected");
            let status = match error {
                AttachError::Closed => StatusCode::NOT_FOUND,
                AttachError::AlreadyConnected => StatusCode::CONFLICT,
            };
            return (status, "context not available").into_response();
        }
    };

    let guard = DisconnectGuard { directory, context };
    let stream = UnboundedReceiverStream::new(rx).filter_map(move |batch| {
        // The guard lives exactly as long as the stream.
        let _held = &guard;
        let event = match frame::encode_patch_batch(&batch) {
            Ok(text) => Some(Ok::<Event, Infallible>(Event::default().data(text))),
            Err(error) => {
                warn!(%error, "failed to encode patch batch");
                None
            }
        };
        futures::future::ready(event)
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(keep_alive))
        .into_response()
}

//! WebSocket transport: raw duplex frames over the persistent connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::frame;
use crate::context::{DispatchError, LiveContext};
use crate::directory::ContextDirectory;

pub(super) fn serve(
    upgrade: WebSocketUpgrade,
    directory: Arc<ContextDirectory>,
    context: Arc<LiveContext>,
) -> Response {
    upgrade.on_upgrade(move |socket| run(socket, directory, context))
}

async fn run(socket: WebSocket, directory: Arc<ContextDirectory>, context: Arc<LiveContext>) {
    let mut rx = match context.attach() {
        Ok(rx) => rx,
        Err(error) => {
            warn!(context = %context.id(), %error, "websocket attach rejected");
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    // Single writer: every patch batch for this context flows through here,
    // in the order the registry emitted it.
    let writer = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let text = match frame::encode_patch_batch(&batch) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "failed to encode patch batch");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(raw)) => handle_frame(&context, &raw),
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary, ping and pong are not part of the protocol.
            Ok(_) => {}
        }
    }

    debug!(context = %context.id(), "websocket disconnected");
    directory.close_context(context.id());
    writer.abort();
}

/// Decode and dispatch one inbound frame. A bad frame is logged and
/// ignored; it never tears the connection down.
fn handle_frame(context: &Arc<LiveContext>, raw: &str) {
    match frame::parse_callback_frame(raw) {
        Ok(frame) => match context.dispatch_callback(frame.callback, &frame.args) {
            Ok(()) | Err(DispatchError::CallbackFailed { .. }) => {}
            Err(error) => warn!(context = %context.id(), %error, "callback dispatch rejected"),
        },
        Err(error) => warn!(context = %context.id(), %error, "malformed inbound frame"),
    }
}

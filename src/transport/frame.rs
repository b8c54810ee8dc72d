//! Wire frames: inbound callback invocations and outbound patch batches.
//!
//! Line-oriented transports encode a callback invocation as
//! `"<id>:<json-array-of-args>"`, with a bare id meaning zero arguments.
//! The HTTP POST fallback carries `[callbackId, ...args]` as its JSON body.
//! Outbound traffic is one JSON-encoded batch of patch records per message.

use serde_json::Value;

use crate::patch::Patch;
use crate::registry::CallbackId;

// ---------------------------------------------------------------------------
// CallbackFrame
// ---------------------------------------------------------------------------

/// A decoded inbound callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackFrame {
    pub callback: CallbackId,
    pub args: Vec<Value>,
}

/// A frame that could not be decoded. The offending message is ignored;
/// the connection survives.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("invalid callback id: {0:?}")]
    InvalidId(String),
    #[error("invalid callback arguments: {0}")]
    InvalidArgs(String),
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse a line-oriented frame: `"<id>:<json-array>"` or a bare `"<id>"`.
pub fn parse_callback_frame(raw: &str) -> Result<CallbackFrame, FrameError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FrameError::Empty);
    }
    let (id_part, args_part) = match raw.split_once(':') {
        Some((id, rest)) => (id, Some(rest)),
        None => (raw, None),
    };
    let id: u64 = id_part
        .trim()
        .parse()
        .map_err(|_| FrameError::InvalidId(id_part.to_owned()))?;
    let args = match args_part.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(json) => parse_args(json)?,
    };
    Ok(CallbackFrame {
        callback: CallbackId::from_raw(id),
        args,
    })
}

/// Parse a POST fallback body: `[callbackId, ...args]`.
pub fn parse_callback_body(body: &[u8]) -> Result<CallbackFrame, FrameError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| FrameError::InvalidArgs(e.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(FrameError::InvalidArgs("expected a JSON array".to_owned()));
    };
    if items.is_empty() {
        return Err(FrameError::Empty);
    }
    let head = items.remove(0);
    let id = head
        .as_u64()
        .ok_or_else(|| FrameError::InvalidId(head.to_string()))?;
    Ok(CallbackFrame {
        callback: CallbackId::from_raw(id),
        args: items,
    })
}

fn parse_args(json: &str) -> Result<Vec<Value>, FrameError> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(FrameError::InvalidArgs(format!(
            "expected a JSON array, got {other}"
        ))),
        Err(e) => Err(FrameError::InvalidArgs(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize one outbound patch batch as a single JSON message.
pub fn encode_patch_batch(batch: &[Patch]) -> Result<String, serde_json::Error> {
    serde_json::to_string(batch)
}

// ===========================================================================
// Tests
// ===========================================================================

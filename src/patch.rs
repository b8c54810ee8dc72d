//! Patch model: one wire-level UI delta.
//!
//! A [`Patch`] names a target component, an application mode, and a payload.
//! Patches are transient — they are built per emitted source value, batched,
//! serialized as JSON, and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ComponentId;

// ---------------------------------------------------------------------------
// PatchMode
// ---------------------------------------------------------------------------

/// How the client applies an update patch to the target fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchMode {
    /// Swap the target's rendered content.
    Replace,
    /// Insert after the existing content without removing it.
    Append,
    /// Insert before the existing content without removing it.
    Prepend,
    /// Patch an attribute on the parent DOM node rather than replacing
    /// content. A component in this mode never becomes a deletion target;
    /// deletions are redirected to its parent's id.
    ParentAttribute,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Payload carried by an update patch.
///
/// The encoding is an explicit tag on the wire, never inferred from the
/// runtime shape of the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "kebab-case")]
pub enum Payload {
    /// Rendered textual output, applied as markup.
    Markup(String),
    /// A raw data value for a client-side reactive binding to interpret.
    Structured(Value),
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// One incremental UI update sent to the client.
///
/// Deletion is a distinct patch kind carrying only the target id: the
/// client removes the rendered content and releases any resources bound
/// to the component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Patch {
    /// Apply `payload` to `target_id` according to `mode`.
    #[serde(rename_all = "camelCase")]
    Update {
        target_id: ComponentId,
        mode: PatchMode,
        payload: Payload,
    },
    /// Remove the rendered content of `target_id` client-side.
    #[serde(rename_all = "camelCase")]
    Delete { target_id: ComponentId },
}

impl Patch {
    /// Build an update patch.
    pub fn update(target_id: ComponentId, mode: PatchMode, payload: Payload) -> Self {
        Self::Update {
            target_id,
            mode,
            payload,
        }
    }

    /// Build a deletion patch.
    pub fn delete(target_id: ComponentId) -> Self {
        Self::Delete { target_id }
    }

    /// The component this patch targets.
    pub fn target_id(&self) -> ComponentId {
        match self {
            Self::Update { target_id, .. } | Self::Delete { target_id } => *target_id,
        }
    }

    /// Whether this is a deletion patch.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

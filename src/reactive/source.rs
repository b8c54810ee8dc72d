//! The reactive source contract consumed by the component registry.
//!
//! A source pushes [`Emission`]s at a single installed listener. The registry
//! subscribes exactly one listener per sourced component and closes the
//! source when the component is torn down.

use std::sync::Arc;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// One event delivered by a [`Source`] to its listener.
///
/// Removal is an explicit variant rather than a magic sentinel value, so
/// every consumer is forced to handle it.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// A new value: the owning component re-renders.
    Update(Value),
    /// Nothing changed. A valid no-op signal, not an error.
    Unchanged,
    /// The owning component's UI should be deleted and its resources
    /// released.
    Remove,
}

impl Emission {
    /// Whether this emission is the removal signal.
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Listener installed by a subscriber; invoked once per emission.
pub type Listener = Arc<dyn Fn(Emission) + Send + Sync>;

/// Push-based producer of a value-over-time stream.
///
/// Contract:
/// - at most one listener is active at a time; `subscribe` replaces any
///   previously installed listener;
/// - emissions produced while no listener is installed are dropped;
/// - after `close`, no further emissions are delivered;
/// - `close` and `unsubscribe` are idempotent.
pub trait Source: Send + Sync {
    /// Install `listener` and begin delivering emissions to it.
    fn subscribe(&self, listener: Listener);

    /// Drop the installed listener. Emissions are discarded until a new
    /// listener is installed.
    fn unsubscribe(&self);

    /// Permanently stop the stream and release producer-side resources.
    fn close(&self);
}

// ===========================================================================
// Tests
// ===========================================================================

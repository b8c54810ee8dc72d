//! Context directory: the process-wide index of live contexts.
//!
//! The directory is the only cross-session shared state in the engine. It is
//! an explicitly owned service — constructed once per server process by the
//! [`LiveEngine`](crate::engine::LiveEngine), handed to the transport code,
//! torn down on server stop — not an implicit singleton.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::context::{ContextId, LiveContext, Status};

// ---------------------------------------------------------------------------
// ContextDirectory
// ---------------------------------------------------------------------------

/// Process-wide mapping of context id → live context.
///
/// Safe under concurrent publishes, lookups, and removals from arbitrary
/// session tasks. Also hosts the connect-timeout sweep that reclaims
/// contexts no client ever connected to.
pub struct ContextDirectory {
    contexts: Mutex<HashMap<ContextId, Arc<LiveContext>>>,
}

impl ContextDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a context, making it reachable by transports.
    ///
    /// Ids are generated tokens, so a collision means a stale entry was
    /// left behind; the displaced context is closed.
    pub fn publish(&self, context: Arc<LiveContext>) {
        let displaced = self.lock().insert(context.id().clone(), context);
        if let Some(displaced) = displaced {
            warn!(context = %displaced.id(), "publish displaced an existing entry");
            displaced.close();
        }
    }

    /// Look up a context by id.
    pub fn lookup(&self, id: &ContextId) -> Option<Arc<LiveContext>> {
        self.lock().get(id).cloned()
    }

    /// Remove a context without closing it.
    pub fn remove(&self, id: &ContextId) -> Option<Arc<LiveContext>> {
        self.lock().remove(id)
    }

    /// Remove a context and tear it down. No-op when the id is unknown;
    /// safe to call from racing cleanup paths.
    pub fn close_context(&self, id: &ContextId) {
        if let Some(context) = self.remove(id) {
            context.close();
        }
    }

    /// Number of published contexts.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the directory holds no contexts.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Reclaim every context whose connect deadline has passed, plus any
    /// entry that was closed behind the directory's back. Returns the
    /// number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let victims: Vec<Arc<LiveContext>> = {
            let mut contexts = self.lock();
            let ids: Vec<ContextId> = contexts
                .values()
                .filter(|ctx| ctx.is_connect_overdue(now) || ctx.status() == Status::Closed)
                .map(|ctx| ctx.id().clone())
                .collect();
            ids.iter().filter_map(|id| contexts.remove(id)).collect()
        };
        let swept = victims.len();
        for context in victims {
            debug!(context = %context.id(), "sweeping unconnected context");
            context.close();
        }
        swept
    }

    /// Close and remove every context. Used on server shutdown.
    pub fn close_all(&self) {
        let contexts: Vec<Arc<LiveContext>> = {
            let mut map = self.lock();
            map.drain().map(|(_, ctx)| ctx).collect()
        };
        for context in contexts {
            context.close();
        }
    }

    /// Spawn the periodic sweep task. The task holds a weak handle, so
    /// dropping the directory ends it; the returned handle allows an
    /// explicit abort on shutdown.
    pub(crate) fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(directory) = weak.upgrade() else {
                    break;
                };
                directory.sweep(Instant::now());
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContextId, Arc<LiveContext>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ContextDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDirectory")
            .field("contexts", &self.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

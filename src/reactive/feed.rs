//! `ValueFeed`: a clonable, thread-safe [`Source`] implementation.
//!
//! Application code holds one clone and pushes values as its state changes;
//! the registry holds another clone as the component's owning source. All
//! clones share the same listener slot and closed flag.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::source::{Emission, Listener, Source};

// ---------------------------------------------------------------------------
// ValueFeed
// ---------------------------------------------------------------------------

/// A hand-driven reactive source.
///
/// `push` delivers [`Emission::Update`], `remove` delivers
/// [`Emission::Remove`]. Emissions made while unsubscribed or after `close`
/// are silently dropped.
#[derive(Clone)]
pub struct ValueFeed {
    inner: Arc<Mutex<FeedState>>,
}

struct FeedState {
    listener: Option<Listener>,
    closed: bool,
}

impl ValueFeed {
    /// Create a feed with no listener installed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedState {
                listener: None,
                closed: false,
            })),
        }
    }

    /// Emit a new value to the listener, if one is installed.
    pub fn push(&self, value: Value) {
        self.emit(Emission::Update(value));
    }

    /// Emit the no-op "nothing changed" signal.
    pub fn touch(&self) {
        self.emit(Emission::Unchanged);
    }

    /// Emit the removal signal. The feed stays usable; the subscriber is
    /// expected to close it as part of teardown.
    pub fn remove(&self) {
        self.emit(Emission::Remove);
    }

    /// Whether `close` has been called on any clone of this feed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether a listener is currently installed.
    pub fn is_subscribed(&self) -> bool {
        self.lock().listener.is_some()
    }

    fn emit(&self, emission: Emission) {
        // Take a clone of the listener out of the lock before invoking it,
        // so a listener that re-enters the feed cannot deadlock.
        let listener = {
            let state = self.lock();
            if state.closed {
                None
            } else {
                state.listener.clone()
            }
        };
        if let Some(listener) = listener {
            listener(emission);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ValueFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValueFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ValueFeed")
            .field("subscribed", &state.listener.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Source for ValueFeed {
    fn subscribe(&self, listener: Listener) {
        let mut state = self.lock();
        if !state.closed {
            state.listener = Some(listener);
        }
    }

    fn unsubscribe(&self) {
        self.lock().listener = None;
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.listener = None;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Collects emissions into a shared log and returns (listener, log).
    fn recording_listener() -> (Listener, Arc<StdMutex<Vec<Emission>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_c = log.clone();
        let listener: Listener = Arc::new(move |e| log_c.lock().unwrap().push(e));
        (listener, log)
    }

    #[test]
    fn push_delivers_to_listener() {
        let feed = ValueFeed::new();
        let (listener, log) = recording_listener();
        feed.subscribe(listener);

        feed.push(json!(1));
        feed.push(json!(2));
        assert_eq!(
            *log.lock().unwrap(),
            vec![Emission::Update(json!(1)), Emission::Update(json!(2))]
        );
    }

    #[test]
    fn push_without_listener_is_dropped() {
        let feed = ValueFeed::new();
        feed.push(json!(1)); // no listener — nothing to observe, must not panic

        let (listener, log) = recording_listener();
        feed.subscribe(listener);
        feed.push(json!(2));
        assert_eq!(*log.lock().unwrap(), vec![Emission::Update(json!(2))]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let feed = ValueFeed::new();
        let (listener, log) = recording_listener();
        feed.subscribe(listener);
        feed.push(json!(1));

        feed.unsubscribe();
        feed.push(json!(2));
        assert_eq!(*log.lock().unwrap(), vec![Emission::Update(json!(1))]);
        assert!(!feed.is_subscribed());
    }

    #[test]
    fn close_drops_listener_and_blocks_resubscribe() {
        let feed = ValueFeed::new();
        let (listener, log) = recording_listener();
        feed.subscribe(listener.clone());

        feed.close();
        assert!(feed.is_closed());
        feed.push(json!(1));
        assert!(log.lock().unwrap().is_empty());

        // A closed feed refuses new listeners.
        feed.subscribe(listener);
        feed.push(json!(2));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let feed = ValueFeed::new();
        feed.close();
        feed.close();
        assert!(feed.is_closed());
    }

    #[test]
    fn clones_share_state() {
        let feed = ValueFeed::new();
        let clone = feed.clone();
        let (listener, log) = recording_listener();
        clone.subscribe(listener);

        feed.remove();
        assert_eq!(*log.lock().unwrap(), vec![Emission::Remove]);

        feed.close();
        assert!(clone.is_closed());
    }

    #[test]
    fn touch_emits_unchanged() {
        let feed = ValueFeed::new();
        let (listener, log) = recording_listener();
        feed.subscribe(listener);
        feed.touch();
        assert_eq!(*log.lock().unwrap(), vec![Emission::Unchanged]);
    }

    #[test]
    fn listener_may_reenter_the_feed() {
        // A listener that pushes back into the feed must not deadlock.
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let count = Arc::new(StdMutex::new(0u32));
        let count_c = count.clone();
        let listener: Listener = Arc::new(move |e| {
            let mut n = count_c.lock().unwrap();
            *n += 1;
            if *n == 1 {
                drop(n);
                let _ = e;
                feed_c.unsubscribe(); // re-entrant call
            }
        });
        feed.subscribe(listener);
        feed.push(json!(1));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}

//! Live context: one browser session's live view.
//!
//! A [`LiveContext`] composes the component registry with a patch sink and
//! the session lifecycle. It is created at render start, published into the
//! [`ContextDirectory`](crate::directory::ContextDirectory) when the render
//! registered at least one sourced component, connected when a transport
//! attaches, and closed on disconnect, explicit teardown, or connect
//! timeout.
//!
//! Locking model: one state mutex guards the whole per-context table so
//! structural updates are atomic, and one update gate serializes source
//! emissions so patches reach the wire in processing order. Foreign code —
//! render functions, callbacks, `Source::close` — always runs outside the
//! state mutex.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::patch::{Patch, PatchMode, Payload};
use crate::reactive::{Emission, Listener};
use crate::registry::{
    BoxError, CallbackId, Component, ComponentId, ComponentRegistry, Renderer,
};

// ---------------------------------------------------------------------------
// ContextId
// ---------------------------------------------------------------------------

/// Opaque unique token identifying one live context.
///
/// Handed to the client as part of the initial render; the client passes it
/// back as the `id` query parameter when opening its transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for ContextId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Rendered, waiting for a transport to attach.
    NotConnected,
    /// A transport is attached and delivering patches.
    Connected,
    /// Torn down. Terminal.
    Closed,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A top-level render failure. The output stream is closed cleanly and the
/// context is never published.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("top-level render failed: {0}")]
    Failed(BoxError),
}

/// Callback dispatch outcome, distinguishing "not found" from "invocation
/// failed". The latter is logged and non-fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown callback id {0}")]
    UnknownCallback(CallbackId),
    #[error("context is closed")]
    ContextClosed,
    #[error("callback {id} failed: {reason}")]
    CallbackFailed { id: CallbackId, reason: BoxError },
}

/// Why a transport could not attach to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("context is closed")]
    Closed,
    #[error("context already has a transport attached")]
    AlreadyConnected,
}

// ---------------------------------------------------------------------------
// Patch sink
// ---------------------------------------------------------------------------

/// Where outbound patch batches go.
///
/// Emissions arriving before the transport connects are processed normally
/// and their batches buffered in order; the first attach flushes the buffer
/// into the channel before any live patch.
enum PatchSink {
    Buffered(Vec<Vec<Patch>>),
    Attached(mpsc::UnboundedSender<Vec<Patch>>),
    Closed,
}

impl PatchSink {
    fn deliver(&mut self, batch: Vec<Patch>) {
        match self {
            Self::Buffered(batches) => batches.push(batch),
            Self::Attached(tx) => {
                // The receiver half may already be gone mid-disconnect;
                // the close path reclaims everything.
                let _ = tx.send(batch);
            }
            Self::Closed => {}
        }
    }
}

// ---------------------------------------------------------------------------
// LiveContext
// ---------------------------------------------------------------------------

struct ContextState {
    status: Status,
    registry: ComponentRegistry,
    sink: PatchSink,
    deadline: Option<Instant>,
}

/// Server-side session object tracking one client's reactive UI state and
/// its transport.
pub struct LiveContext {
    id: ContextId,
    connect_timeout: Duration,
    /// Handle to the owning `Arc`, used to mint scopes and listeners.
    weak_self: Weak<LiveContext>,
    state: Mutex<ContextState>,
    /// Serializes source-emission processing so per-context patch order
    /// matches processing order. Never held while invoking callbacks.
    gate: Mutex<()>,
}

impl LiveContext {
    pub(crate) fn new(connect_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: ContextId::generate(),
            connect_timeout,
            weak_self: weak.clone(),
            state: Mutex::new(ContextState {
                status: Status::NotConnected,
                registry: ComponentRegistry::new(),
                sink: PatchSink::Buffered(Vec::new()),
                deadline: None,
            }),
            gate: Mutex::new(()),
        })
    }

    /// A scope whose current parent is `parent`. The context outlives every
    /// call path reaching here, so the upgrade always succeeds.
    fn scope(&self, parent: Option<ComponentId>) -> Scope {
        Scope {
            ctx: self.weak_self.upgrade().expect("context is alive"),
            parent,
        }
    }

    /// The context's opaque token.
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        self.lock_state().status
    }

    /// Number of live component entries.
    pub fn component_count(&self) -> usize {
        self.lock_state().registry.component_count()
    }

    /// Number of live callback entries.
    pub fn callback_count(&self) -> usize {
        self.lock_state().registry.callback_count()
    }

    /// Whether any registered component owns a reactive source.
    pub fn has_sourced_components(&self) -> bool {
        self.lock_state().registry.has_sourced_components()
    }

    // ── Render ───────────────────────────────────────────────────────

    /// Run `f` with a root [`Scope`] bound to this context, streaming markup
    /// into `out`.
    ///
    /// A failure is caught and logged; the stream ends cleanly and the
    /// caller must not publish the context.
    pub(crate) fn render<F>(&self, out: &mut dyn fmt::Write, f: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Scope, &mut dyn fmt::Write) -> Result<(), BoxError>,
    {
        let mut scope = self.scope(None);
        match f(&mut scope, out) {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(context = %self.id, %error, "top-level render failed");
                Err(RenderError::Failed(error))
            }
        }
    }

    // ── Source dispatch ──────────────────────────────────────────────

    /// Entry point for every subscribed source emission.
    pub(crate) fn handle_emission(&self, id: ComponentId, emission: Emission) {
        let _gate = self.lock_gate();
        match emission {
            Emission::Unchanged => {}
            Emission::Remove => self.remove_component(id),
            Emission::Update(value) => self.apply_update(id, &value),
        }
    }

    /// Emit a deletion patch for `id` and tear its subtree down. A second
    /// removal of the same id is a no-op.
    fn remove_component(&self, id: ComponentId) {
        let teardown = {
            let mut state = self.lock_state();
            if state.status == Status::Closed || !state.registry.contains(id) {
                return;
            }
            let target = state.registry.deletion_target(id);
            let teardown = state.registry.remove_subtree(id);
            if let Some(target) = target {
                state.sink.deliver(vec![Patch::delete(target)]);
            }
            teardown
        };
        if let Some(teardown) = teardown {
            debug!(
                context = %self.id,
                component = %id,
                components = teardown.component_count(),
                callbacks = teardown.callback_count(),
                "component removed"
            );
            teardown.release_sources();
        }
    }

    /// Re-render `id` from an emitted value and deliver the resulting batch.
    fn apply_update(&self, id: ComponentId, value: &Value) {
        // Snapshot what we need, tearing down stale children first under
        // replace mode so no orphaned subscription survives the re-render.
        let (renderer, mode, did_update, teardown) = {
            let mut state = self.lock_state();
            if state.status == Status::Closed {
                return;
            }
            let Some(entry) = state.registry.entry(id) else {
                trace!(context = %self.id, component = %id, "emission for a removed component");
                return;
            };
            let renderer = entry.renderer.clone();
            let mode = entry.mode;
            let did_update = entry.did_update.clone();
            let teardown = if mode == PatchMode::Replace {
                state.registry.clear_children(id)
            } else {
                Default::default()
            };
            (renderer, mode, did_update, teardown)
        };
        teardown.release_sources();

        // Render outside the state lock: nested registrations made by the
        // render function re-enter through the scope.
        let payload = match renderer {
            Renderer::Structured => Payload::Structured(value.clone()),
            Renderer::Markup(render) => {
                let mut scope = self.scope(Some(id));
                match render(&mut scope, value) {
                    Ok(markup) => Payload::Markup(markup),
                    Err(error) => {
                        warn!(
                            context = %self.id,
                            component = %id,
                            %error,
                            "component render failed; skipping update"
                        );
                        return;
                    }
                }
            }
        };

        let mut batch = vec![Patch::update(id, mode, payload)];
        if let Some(hook) = did_update {
            if let Some(extra) = hook(value) {
                batch.push(extra);
            }
        }

        let mut state = self.lock_state();
        // The component may have been torn down while rendering.
        if state.status == Status::Closed || !state.registry.contains(id) {
            return;
        }
        trace!(context = %self.id, component = %id, patches = batch.len(), "delivering batch");
        state.sink.deliver(batch);
    }

    // ── Callback dispatch ────────────────────────────────────────────

    /// Look up and invoke a registered callback.
    ///
    /// The callback runs outside every lock: it may mutate application
    /// state that re-enters the engine through a source emission.
    pub fn dispatch_callback(&self, id: CallbackId, args: &[Value]) -> Result<(), DispatchError> {
        let callback = {
            let state = self.lock_state();
            if state.status == Status::Closed {
                return Err(DispatchError::ContextClosed);
            }
            state.registry.callback(id)
        };
        let Some(callback) = callback else {
            return Err(DispatchError::UnknownCallback(id));
        };
        if let Err(reason) = callback(args) {
            warn!(context = %self.id, callback = %id, %reason, "callback failed");
            return Err(DispatchError::CallbackFailed { id, reason });
        }
        Ok(())
    }

    // ── Transport lifecycle ──────────────────────────────────────────

    /// Attach a transport, transitioning not-connected → connected exactly
    /// once. Buffered batches flush into the returned channel in emission
    /// order before any live patch.
    pub(crate) fn attach(&self) -> Result<mpsc::UnboundedReceiver<Vec<Patch>>, AttachError> {
        let mut state = self.lock_state();
        match state.status {
            Status::Closed => Err(AttachError::Closed),
            Status::Connected => Err(AttachError::AlreadyConnected),
            Status::NotConnected => {
                let (tx, rx) = mpsc::unbounded_channel();
                if let PatchSink::Buffered(batches) =
                    std::mem::replace(&mut state.sink, PatchSink::Attached(tx.clone()))
                {
                    for batch in batches {
                        let _ = tx.send(batch);
                    }
                }
                state.status = Status::Connected;
                state.deadline = None;
                debug!(context = %self.id, "transport attached");
                Ok(rx)
            }
        }
    }

    /// Tear the context down: every source unsubscribed and closed, every
    /// callback dropped, the sink detached. Idempotent — timeout and
    /// disconnect may race to clean up the same context.
    pub fn close(&self) {
        let teardown = {
            let mut state = self.lock_state();
            if state.status == Status::Closed {
                return;
            }
            state.status = Status::Closed;
            state.sink = PatchSink::Closed;
            state.registry.drain_all()
        };
        debug!(
            context = %self.id,
            components = teardown.component_count(),
            callbacks = teardown.callback_count(),
            "context closed"
        );
        teardown.release_sources();
    }

    // ── Connect deadline ─────────────────────────────────────────────

    /// Start the connect-timeout clock. Called when the context is
    /// published after a successful render.
    pub(crate) fn arm_deadline(&self) {
        let mut state = self.lock_state();
        if state.status == Status::NotConnected {
            state.deadline = Some(Instant::now() + self.connect_timeout);
        }
    }

    /// Whether this context is still waiting for a transport past its
    /// deadline.
    pub(crate) fn is_connect_overdue(&self, now: Instant) -> bool {
        let state = self.lock_state();
        state.status == Status::NotConnected && state.deadline.is_some_and(|deadline| now >= deadline)
    }

    // ── Lock helpers ─────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveContext")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The registration handle passed to render code.
///
/// A scope carries the current parent component explicitly, so nested
/// registrations made during a render call attach as children of the
/// component being rendered — no ambient thread-local state involved.
pub struct Scope {
    ctx: Arc<LiveContext>,
    parent: Option<ComponentId>,
}

impl Scope {
    /// The context this scope registers into.
    pub fn context_id(&self) -> &ContextId {
        &self.ctx.id
    }

    /// The component nested registrations will attach to.
    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    /// A scope whose current parent is `parent`; registrations made through
    /// it become children of that component.
    pub fn nested(&self, parent: ComponentId) -> Scope {
        Scope {
            ctx: self.ctx.clone(),
            parent: Some(parent),
        }
    }

    /// Register a component under the current parent.
    ///
    /// When the component carries a source, the registry subscribes to it
    /// immediately; values emitted before the client connects are buffered
    /// and flushed on attach.
    pub fn component(&mut self, component: Component) -> ComponentId {
        let (id, source, closed) = {
            let mut state = self.ctx.lock_state();
            let closed = state.status == Status::Closed;
            let (id, source) = state.registry.insert_component(self.parent, component);
            (id, source, closed)
        };
        if let Some(source) = source {
            if closed {
                // The context died mid-render; never arm the subscription.
                source.close();
            } else {
                let weak = Arc::downgrade(&self.ctx);
                let listener: Listener = Arc::new(move |emission| {
                    if let Some(ctx) = weak.upgrade() {
                        ctx.handle_emission(id, emission);
                    }
                });
                source.subscribe(listener);
            }
        }
        id
    }

    /// Register a server-side callback owned by the current parent.
    pub fn callback<F>(&mut self, f: F) -> CallbackId
    where
        F: Fn(&[Value]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut state = self.ctx.lock_state();
        state.registry.insert_callback(self.parent, Arc::new(f))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ValueFeed;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fmt::Write;
    use std::sync::Mutex as StdMutex;

    fn ctx() -> Arc<LiveContext> {
        LiveContext::new(Duration::from_secs(30))
    }

    /// Render a page that registers a single sourced markup component and
    /// return (context, feed, component id).
    fn page_with_sourced_component() -> (Arc<LiveContext>, ValueFeed, ComponentId) {
        let ctx = ctx();
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let mut out = String::new();
        let id = StdMutex::new(None);
        ctx.render(&mut out, |scope, out| {
            let cid = scope.component(
                Component::markup(|_, v| Ok(format!("<span>{v}</span>"))).with_source(feed_c.clone()),
            );
            write!(out, "<div data-live=\"{cid}\"></div>")?;
            *id.lock().unwrap() = Some(cid);
            Ok(())
        })
        .unwrap();
        let id = id.lock().unwrap().take().unwrap();
        (ctx, feed, id)
    }

    // ── Render ───────────────────────────────────────────────────────

    #[test]
    fn render_streams_markup_to_the_sink() {
        let ctx = ctx();
        let mut out = String::new();
        ctx.render(&mut out, |_, out| {
            write!(out, "<h1>hello</h1>")?;
            Ok(())
        })
        .unwrap();
        assert!(out.contains("<h1>hello</h1>"));
    }

    #[test]
    fn first_component_id_is_one() {
        let (_, _, id) = page_with_sourced_component();
        assert_eq!(id, ComponentId::from_raw(1));
    }

    #[test]
    fn render_failure_is_reported() {
        let ctx = ctx();
        let mut out = String::new();
        let result = ctx.render(&mut out, |_, _| Err("boom".into()));
        assert!(matches!(result, Err(RenderError::Failed(_))));
    }

    #[test]
    fn ids_increase_across_components_and_callbacks() {
        let ctx = ctx();
        let mut out = String::new();
        ctx.render(&mut out, |scope, _| {
            let a = scope.component(Component::structured());
            let b = scope.component(Component::structured());
            assert!(b > a);
            let x = scope.callback(|_| Ok(()));
            let y = scope.callback(|_| Ok(()));
            assert!(y > x);
            Ok(())
        })
        .unwrap();
        assert_eq!(ctx.component_count(), 2);
        assert_eq!(ctx.callback_count(), 2);
    }

    // ── Emission → patch pipeline ────────────────────────────────────

    #[test]
    fn update_emission_produces_a_rendered_patch() {
        let (ctx, feed, id) = page_with_sourced_component();
        feed.push(json!(7));

        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(
            batch,
            vec![Patch::update(
                id,
                PatchMode::Replace,
                Payload::Markup("<span>7</span>".into())
            )]
        );
    }

    #[test]
    fn pre_connect_emissions_flush_in_order_on_attach() {
        let (ctx, feed, _) = page_with_sourced_component();
        feed.push(json!(1));
        feed.push(json!(2));
        feed.push(json!(3));

        let mut rx = ctx.attach().unwrap();
        let payloads: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|batch| match &batch[0] {
                Patch::Update {
                    payload: Payload::Markup(m),
                    ..
                } => m.clone(),
                other => panic!("unexpected patch {other:?}"),
            })
            .collect();
        assert_eq!(payloads, vec!["<span>1</span>", "<span>2</span>", "<span>3</span>"]);
    }

    #[test]
    fn unchanged_emission_is_a_no_op() {
        let (ctx, feed, _) = page_with_sourced_component();
        feed.touch();
        let mut rx = ctx.attach().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn structured_component_ships_the_raw_value() {
        let ctx = ctx();
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let mut out = String::new();
        let id = StdMutex::new(None);
        ctx.render(&mut out, |scope, _| {
            *id.lock().unwrap() = Some(scope.component(Component::structured().with_source(feed_c.clone())));
            Ok(())
        })
        .unwrap();
        let id = id.lock().unwrap().take().unwrap();

        feed.push(json!({ "score": 10 }));
        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(
            batch,
            vec![Patch::update(
                id,
                PatchMode::Replace,
                Payload::Structured(json!({ "score": 10 }))
            )]
        );
    }

    #[test]
    fn render_error_skips_the_update_and_keeps_the_session() {
        let ctx = ctx();
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let mut out = String::new();
        ctx.render(&mut out, |scope, _| {
            scope.component(
                Component::markup(|_, v| {
                    if v == &json!(0) {
                        Err("cannot render zero".into())
                    } else {
                        Ok(v.to_string())
                    }
                })
                .with_source(feed_c.clone()),
            );
            Ok(())
        })
        .unwrap();

        feed.push(json!(0)); // fails, suppressed
        feed.push(json!(5)); // succeeds

        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(
            &batch[0],
            Patch::Update { payload: Payload::Markup(m), .. } if m == "5"
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.component_count(), 1);
    }

    #[test]
    fn did_update_hook_contributes_a_secondary_patch() {
        let ctx = ctx();
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let mut out = String::new();
        let id = StdMutex::new(None);
        ctx.render(&mut out, |scope, _| {
            let cid = scope.component(
                Component::markup(|_, v| Ok(v.to_string()))
                    .with_source(feed_c.clone())
                    .with_did_update(move |v| {
                        Some(Patch::update(
                            ComponentId::from_raw(1),
                            PatchMode::ParentAttribute,
                            Payload::Structured(v.clone()),
                        ))
                    }),
            );
            *id.lock().unwrap() = Some(cid);
            Ok(())
        })
        .unwrap();

        feed.push(json!(3));
        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch[1], Patch::Update { mode: PatchMode::ParentAttribute, .. }));
    }

    // ── Removal ──────────────────────────────────────────────────────

    #[test]
    fn remove_emission_deletes_once_and_closes_the_source() {
        let (ctx, feed, id) = page_with_sourced_component();
        feed.remove();

        assert!(feed.is_closed());
        assert_eq!(ctx.component_count(), 0);

        // Driving the source again must change nothing.
        feed.push(json!(9));
        ctx.handle_emission(id, Emission::Remove);
        ctx.handle_emission(id, Emission::Update(json!(9)));

        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch, vec![Patch::delete(id)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn parent_attribute_deletion_redirects_to_parent() {
        let ctx = ctx();
        let feed = ValueFeed::new();
        let feed_c = feed.clone();
        let mut out = String::new();
        let ids = StdMutex::new(None);
        ctx.render(&mut out, |scope, _| {
            let parent = scope.component(Component::markup(|_, v| Ok(v.to_string())));
            let attr = scope.nested(parent).component(
                Component::structured()
                    .with_mode(PatchMode::ParentAttribute)
                    .with_source(feed_c.clone()),
            );
            *ids.lock().unwrap() = Some((parent, attr));
            Ok(())
        })
        .unwrap();
        let (parent, attr) = ids.lock().unwrap().take().unwrap();

        feed.remove();
        let mut rx = ctx.attach().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch, vec![Patch::delete(parent)]);
        assert_ne!(batch[0].target_id(), attr);
    }

    // ── Replace teardown ─────────────────────────────────────────────

    #[test]
    fn replace_tears_down_children_before_the_new_render() {
        let ctx = ctx();
        let parent_feed = ValueFeed::new();
        let parent_feed_c = parent_feed.clone();

        // Every parent render registers a fresh child with its own feed and
        // callback; the latest ones are stashed for inspection.
        let latest: Arc<StdMutex<Option<(ComponentId, ValueFeed, CallbackId)>>> =
            Arc::new(StdMutex::new(None));
        let latest_c = latest.clone();

        let mut out = String::new();
        ctx.render(&mut out, |scope, _| {
            scope.component(
                Component::markup(move |scope, v| {
                    let child_feed = ValueFeed::new();
                    let child = scope.component(
                        Component::markup(|_, v| Ok(v.to_string())).with_source(child_feed.clone()),
                    );
                    let cb = scope.callback(|_| Ok(()));
                    *latest_c.lock().unwrap() = Some((child, child_feed, cb));
                    Ok(format!("<div>{v}</div>"))
                })
                .with_source(parent_feed_c.clone()),
            );
            Ok(())
        })
        .unwrap();

        // First update: parent renders, child #1 appears.
        parent_feed.push(json!(1));
        let (old_child, old_feed, old_cb) = latest.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.component_count(), 2);
        assert_eq!(ctx.callback_count(), 1);

        // Second update: child #1 must be fully torn down, replaced by #2.
        parent_feed.push(json!(2));
        let (new_child, _, new_cb) = latest.lock().unwrap().clone().unwrap();
        assert!(old_feed.is_closed());
        assert!(new_child > old_child);
        assert!(new_cb > old_cb);
        assert_eq!(ctx.component_count(), 2);
        assert_eq!(ctx.callback_count(), 1);
        assert!(matches!(
            ctx.dispatch_callback(old_cb, &[]),
            Err(DispatchError::UnknownCallback(_))
        ));

        // A stray emission for the stale child yields no patch.
        ctx.handle_emission(old_child, Emission::Update(json!(99)));
        let mut rx = ctx.attach().unwrap();
        let mut targets = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            targets.extend(batch.iter().map(|p| p.target_id()));
        }
        assert!(!targets.contains(&old_child));
    }

    // ── Callback dispatch ────────────────────────────────────────────

    #[test]
    fn dispatch_unknown_callback_is_distinct_and_harmless() {
        let (ctx, _, _) = page_with_sourced_component();
        let before = (ctx.component_count(), ctx.callback_count());
        let result = ctx.dispatch_callback(CallbackId::from_raw(42), &[]);
        assert!(matches!(result, Err(DispatchError::UnknownCallback(_))));
        assert_eq!((ctx.component_count(), ctx.callback_count()), before);
    }

    #[test]
    fn callback_invocation_receives_args() {
        let ctx = ctx();
        let seen: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_c = seen.clone();
        let mut out = String::new();
        let cb = StdMutex::new(None);
        ctx.render(&mut out, |scope, _| {
            *cb.lock().unwrap() = Some(scope.callback(move |args| {
                seen_c.lock().unwrap().extend(args.iter().cloned());
                Ok(())
            }));
            Ok(())
        })
        .unwrap();
        let cb = cb.lock().unwrap().take().unwrap();

        ctx.dispatch_callback(cb, &[json!("north"), json!(2)]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!("north"), json!(2)]);
    }

    #[test]
    fn failing_callback_is_non_fatal() {
        let ctx = ctx();
        let mut out = String::new();
        let cb = StdMutex::new(None);
        ctx.render(&mut out, |scope, _| {
            *cb.lock().unwrap() = Some(scope.callback(|_| Err("busy".into())));
            Ok(())
        })
        .unwrap();
        let cb = cb.lock().unwrap().take().unwrap();

        let result = ctx.dispatch_callback(cb, &[]);
        assert!(matches!(result, Err(DispatchError::CallbackFailed { .. })));
        // Still registered, still dispatchable.
        assert_eq!(ctx.callback_count(), 1);
        assert_ne!(ctx.status(), Status::Closed);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[test]
    fn attach_transitions_to_connected_exactly_once() {
        let (ctx, _, _) = page_with_sourced_component();
        assert_eq!(ctx.status(), Status::NotConnected);
        let _rx = ctx.attach().unwrap();
        assert_eq!(ctx.status(), Status::Connected);
        assert_eq!(ctx.attach().unwrap_err(), AttachError::AlreadyConnected);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let (ctx, feed, _) = page_with_sourced_component();
        ctx.close();
        ctx.close();
        assert_eq!(ctx.status(), Status::Closed);
        assert!(feed.is_closed());
        assert_eq!(ctx.component_count(), 0);
        assert_eq!(ctx.attach().unwrap_err(), AttachError::Closed);
    }

    #[test]
    fn no_patch_is_delivered_after_close() {
        let (ctx, feed, id) = page_with_sourced_component();
        let mut rx = ctx.attach().unwrap();
        ctx.close();
        feed.push(json!(1));
        ctx.handle_emission(id, Emission::Update(json!(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_on_closed_context_is_rejected() {
        let (ctx, _, _) = page_with_sourced_component();
        ctx.close();
        assert!(matches!(
            ctx.dispatch_callback(CallbackId::from_raw(1), &[]),
            Err(DispatchError::ContextClosed)
        ));
    }

    // ── Connect deadline ─────────────────────────────────────────────

    #[test]
    fn deadline_is_armed_and_expires() {
        let (ctx, _, _) = page_with_sourced_component();
        ctx.arm_deadline();
        let now = Instant::now();
        assert!(!ctx.is_connect_overdue(now));
        assert!(ctx.is_connect_overdue(now + Duration::from_secs(31)));
    }

    #[test]
    fn connected_context_is_never_overdue() {
        let (ctx, _, _) = page_with_sourced_component();
        ctx.arm_deadline();
        let _rx = ctx.attach().unwrap();
        assert!(!ctx.is_connect_overdue(Instant::now() + Duration::from_secs(120)));
    }
}

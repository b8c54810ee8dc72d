//! Probe: programmatic interaction with a headless engine.
//!
//! The `Probe` wraps a [`LiveEngine`] with no transport attached and
//! provides methods to render a live page, connect a fake transport,
//! drain the patch batches the registry produced, and invoke callbacks
//! the way an inbound frame would.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::context::{DispatchError, LiveContext, RenderError, Scope};
use crate::engine::{LiveConfig, LiveEngine};
use crate::patch::Patch;
use crate::registry::{BoxError, CallbackId};

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// A headless engine driver for testing.
///
/// # Examples
///
/// ```ignore
/// let mut probe = Probe::new();
/// probe.render(|scope, out| {
///     let id = scope.component(Component::markup(|_, v| Ok(v.to_string())).with_source(feed.clone()));
///     write!(out, "<div data-live=\"{id}\"></div>")?;
///     Ok(())
/// })?;
/// probe.connect();
/// feed.push(json!(1));
/// assert_eq!(probe.take_batches().len(), 1);
/// ```
pub struct Probe {
    engine: LiveEngine,
    context: Option<Arc<LiveContext>>,
    patches: Option<mpsc::UnboundedReceiver<Vec<Patch>>>,
    html: String,
}

impl Probe {
    /// Create a probe with default engine configuration.
    pub fn new() -> Self {
        Self::with_config(LiveConfig::new())
    }

    /// Create a probe with a custom configuration.
    pub fn with_config(config: LiveConfig) -> Self {
        Self {
            engine: LiveEngine::new(config),
            context: None,
            patches: None,
            html: String::new(),
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &LiveEngine {
        &self.engine
    }

    /// Render a live page, storing its markup for [`Probe::html`].
    pub fn render<F>(&mut self, f: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Scope, &mut dyn std::fmt::Write) -> Result<(), BoxError>,
    {
        self.html.clear();
        self.context = self.engine.render_page(&mut self.html, f)?;
        Ok(())
    }

    /// The markup produced by the last render.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// The live context of the last render.
    ///
    /// Panics when the last render was static (or nothing was rendered) —
    /// a probe test that needs the context must register a sourced
    /// component.
    pub fn context(&self) -> &Arc<LiveContext> {
        self.context
            .as_ref()
            .expect("no live context; render a page with a sourced component first")
    }

    /// Whether the last render produced a live context.
    pub fn is_live(&self) -> bool {
        self.context.is_some()
    }

    /// Attach a fake transport, flushing any buffered patches into the
    /// probe's capture queue.
    pub fn connect(&mut self) {
        let rx = self
            .context()
            .attach()
            .expect("probe transport failed to attach");
        self.patches = Some(rx);
    }

    /// Drain every patch batch delivered since the last call.
    pub fn take_batches(&mut self) -> Vec<Vec<Patch>> {
        let Some(rx) = self.patches.as_mut() else {
            return Vec::new();
        };
        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        batches
    }

    /// Drain every individual patch, flattening batch boundaries.
    pub fn take_patches(&mut self) -> Vec<Patch> {
        self.take_batches().into_iter().flatten().collect()
    }

    /// Invoke a callback the way an inbound transport frame would.
    pub fn dispatch(&self, id: CallbackId, args: &[Value]) -> Result<(), DispatchError> {
        self.context().dispatch_callback(id, args)
    }

    /// Disconnect and tear the context down, as a transport close would.
    pub fn close(&mut self) {
        if let Some(context) = self.context.as_ref() {
            self.engine.directory().close_context(context.id());
        }
        self.patches = None;
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

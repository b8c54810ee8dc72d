//! Engine: configuration, page rendering, and server lifecycle.
//!
//! [`LiveEngine`] owns the [`ContextDirectory`] and ties together rendering,
//! the transport router, and the connect-timeout sweeper. One engine is
//! constructed per server process and torn down on server stop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::{LiveContext, RenderError, Scope};
use crate::directory::ContextDirectory;
use crate::registry::BoxError;
use crate::transport;

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Configuration for the live view engine.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Path of the single live endpoint (GET upgrade/SSE, POST callbacks).
    pub endpoint: String,
    /// How long a rendered context waits for a transport before reclaim.
    pub connect_timeout: Duration,
    /// How often the directory sweeps for overdue contexts.
    pub sweep_period: Duration,
    /// Keep-alive interval for SSE connections.
    pub keep_alive: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "/__live".to_owned(),
            connect_timeout: Duration::from_secs(30),
            sweep_period: Duration::from_secs(1),
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl LiveConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the live endpoint path (builder).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the connect timeout (builder).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the sweep period (builder).
    pub fn with_sweep_period(mut self, period: Duration) -> Self {
        self.sweep_period = period;
        self
    }

    /// Set the SSE keep-alive interval (builder).
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

// ---------------------------------------------------------------------------
// LiveEngine
// ---------------------------------------------------------------------------

/// The live view engine for one server process.
///
/// ```ignore
/// let engine = LiveEngine::new(LiveConfig::new());
/// let app = axum::Router::new()
///     .route("/", axum::routing::get(index))
///     .merge(engine.router());
/// engine.start_sweeper();
/// axum::serve(listener, app).await?;
/// ```
pub struct LiveEngine {
    config: LiveConfig,
    directory: Arc<ContextDirectory>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LiveEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            directory: Arc::new(ContextDirectory::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// The directory of live contexts.
    pub fn directory(&self) -> &Arc<ContextDirectory> {
        &self.directory
    }

    /// Render a live page into `out`.
    ///
    /// Creates a fresh context, runs `f` with its root scope, and streams
    /// the markup. A context that registered at least one sourced component
    /// is published and returned; a fully static page is torn down
    /// immediately and `None` is returned — there is nothing to keep alive.
    ///
    /// A top-level render failure closes the stream cleanly and leaves no
    /// directory entry.
    pub fn render_page<F>(
        &self,
        out: &mut dyn fmt::Write,
        f: F,
    ) -> Result<Option<Arc<LiveContext>>, RenderError>
    where
        F: FnOnce(&mut Scope, &mut dyn fmt::Write) -> Result<(), BoxError>,
    {
        let context = LiveContext::new(self.config.connect_timeout);
        match context.render(out, f) {
            Ok(()) => {
                if context.has_sourced_components() {
                    context.arm_deadline();
                    self.directory.publish(context.clone());
                    debug!(context = %context.id(), "live page published");
                    Ok(Some(context))
                } else {
                    context.close();
                    Ok(None)
                }
            }
            Err(error) => {
                context.close();
                Err(error)
            }
        }
    }

    /// Build the axum router exposing the live endpoint.
    pub fn router(&self) -> Router {
        transport::router(self.directory.clone(), self.config.clone())
    }

    /// Spawn the connect-timeout sweeper. Idempotent; requires a tokio
    /// runtime.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.lock_sweeper();
        if sweeper.is_none() {
            *sweeper = Some(self.directory.clone().spawn_sweeper(self.config.sweep_period));
            debug!(period = ?self.config.sweep_period, "sweeper started");
        }
    }

    /// Stop the sweeper and tear down every live context.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_sweeper().take() {
            handle.abort();
        }
        self.directory.close_all();
        debug!("engine shut down");
    }

    fn lock_sweeper(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LiveEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveEngine")
            .field("config", &self.config)
            .field("contexts", &self.directory.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

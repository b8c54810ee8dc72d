//! # driftview
//!
//! A server-driven live view engine: render a UI tree once on the server,
//! keep a per-session model of that tree, push incremental patches to the
//! browser whenever reactive data sources change, and route UI events back
//! to server-side callbacks.
//!
//! ## Core Systems
//!
//! - **[`reactive`]** — the [`Source`](reactive::Source) contract and the
//!   channel-style [`ValueFeed`](reactive::ValueFeed) implementation
//! - **[`patch`]** — wire-level UI deltas: replace/append/prepend,
//!   parent-attribute updates, deletions
//! - **[`registry`]** — per-session component tree, callback table, and
//!   recursive teardown
//! - **[`context`]** — one browser session's [`LiveContext`](context::LiveContext):
//!   status machine, render scope, source-to-patch pipeline
//! - **[`directory`]** — process-wide index of live contexts with the
//!   connect-timeout sweep
//! - **[`transport`]** — the single live endpoint: WebSocket, SSE fallback,
//!   HTTP POST callback fallback
//! - **[`engine`]** — [`LiveEngine`](engine::LiveEngine) tying everything
//!   together
//! - **[`testing`]** — headless [`Probe`](testing::Probe) for driving an
//!   engine without a socket
//!
//! ## Control Flow
//!
//! A render call creates a live context and runs the page function, which
//! registers components and their sources into the registry while streaming
//! the initial markup. The context is published into the directory and
//! waits (default 30 s) for the client to open its transport. From then on,
//! every source emission flows source → registry → patch → transport, and
//! every client event flows transport → callback → application state —
//! which the sources observe, closing the loop.

// Reactive inputs
pub mod reactive;

// Core systems
pub mod context;
pub mod patch;
pub mod registry;

// Process-wide services
pub mod directory;
pub mod engine;

// Wire
pub mod transport;

// Test support
pub mod testing;

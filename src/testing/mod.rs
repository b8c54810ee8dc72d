//! Headless testing framework.
//!
//! Use the [`Probe`] to drive a [`LiveEngine`](crate::engine::LiveEngine)
//! without a real socket: render pages, simulate the transport attach,
//! capture outbound patch batches, and dispatch callbacks directly.

pub mod probe;

pub use probe::Probe;

//! Reactive sources: push-based value producers driving live components.
//!
//! The engine only consumes the [`Source`] contract — application code owns
//! the producers. [`ValueFeed`] is the batteries-included implementation.
//!
//! - [`Source`] — subscribe/unsubscribe/close contract.
//! - [`Emission`] — tagged value-or-removal variant delivered to listeners.
//! - [`ValueFeed`] — clonable, thread-safe feed for pushing values by hand.

pub mod feed;
pub mod source;

pub use feed::ValueFeed;
pub use source::{Emission, Listener, Source};

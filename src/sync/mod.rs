//! Synchronization primitives used by the tree.
//!
//! - [`Signal`]: one-shot broadcast completion, observable by blocking wait
//!   or as a future

mod signal;

pub use signal::{Fired, Signal};

//! Core value types shared across the tree.

pub mod cancel;

pub use cancel::{CancelKind, CancelReason};

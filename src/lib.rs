//! ctxtree: hierarchical cancellation, deadlines and request-scoped values.
//!
//! # Overview
//!
//! A [`Context`] is an immutable node in a tree rooted at
//! [`Context::background`]. Each node carries three things to the work it is
//! handed to:
//!
//! - a completion signal that fires when the work should stop,
//! - an optional deadline after which it fires on its own,
//! - key/value pairs visible to the node and all of its descendants.
//!
//! Cancellation flows strictly downward. Cancelling a node fires every
//! cancellable descendant and never affects its ancestors or siblings.
//! Values flow the same way: a lookup sees the nearest definition on the path
//! to the root.
//!
//! ```
//! use ctxtree::{CancelKind, Context};
//! use std::time::Duration;
//!
//! #[derive(Debug, PartialEq)]
//! struct RequestId;
//!
//! let request = Context::background().with_value(RequestId, 7_u64)?;
//! let (ctx, cancel) = request.with_timeout(Duration::from_secs(30))?;
//! let (step, _step_cancel) = ctx.with_cancel();
//!
//! assert_eq!(step.value::<u64>(&RequestId), Some(&7));
//! assert!(step.deadline().is_some());
//!
//! cancel.cancel();
//! assert!(step.done().is_fired());
//! assert_eq!(step.err(), Some(CancelKind::ParentCancelled));
//! # Ok::<(), ctxtree::Error>(())
//! ```
//!
//! # Module Structure
//!
//! - [`cx`]: the context tree, cancel handles and value keys
//! - [`cancel`]: after-fire listeners
//! - [`sync`]: the one-shot completion [`Signal`]
//! - [`types`]: cancellation kinds and reasons
//! - [`config`]: process-wide settings for the deadline scheduler
//! - [`error`]: error types
//!
//! # Feature Flags
//!
//! - `tracing-integration`: structured events through `tracing`
//! - `config-file`: TOML configuration via `CTXTREE_CONFIG_FILE`
//! - `test-internals`: exposes `test_utils`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod config;
pub mod cx;
pub mod error;
pub mod sync;
pub(crate) mod time;
pub mod types;

mod tracing_compat;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use cancel::CancelListener;
pub use config::{init, ConfigError, TreeConfig};
pub use cx::{CancelGuard, CancelHandle, Context, ContextKey, ListenerHandle, NodeKind};
pub use error::{Error, Result};
pub use sync::{Fired, Signal};
pub use types::{CancelKind, CancelReason};

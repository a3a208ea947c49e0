//! Context tree API.
//!
//! - [`Context`]: immutable tree node carrying cancellation, deadline and values
//! - [`CancelHandle`]: fires the context it was created with
//! - [`CancelGuard`]: cancels on drop
//! - [`ListenerHandle`]: unregisters an `on_cancel` callback
//! - [`ContextKey`]: bound for value keys

mod context;
mod handle;
mod key;

pub use context::{Context, NodeKind};
pub use handle::{CancelGuard, CancelHandle, ListenerHandle};
pub use key::ContextKey;

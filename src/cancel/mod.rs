//! Cancellation controllers and after-fire listeners.
//!
//! A controller backs every cancellable context. Value-only contexts share
//! the controller of their nearest cancellable ancestor.

mod controller;

pub use controller::CancelListener;
pub(crate) use controller::Controller;

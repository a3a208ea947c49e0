//! Cancellation control handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::cancel::Controller;
use crate::types::CancelReason;

/// Cancels the context it was returned with.
///
/// Returned by `with_cancel`, `with_timeout` and `with_deadline`. Cloning is
/// cheap, and every clone may cancel concurrently from any thread: exactly
/// one call records the reason, the rest are no-ops.
///
/// Call [`cancel`](Self::cancel) on every exit path of the scope that
/// created the context, even when the work completed normally. Until then
/// the context stays registered with its parent and its deadline timer stays
/// armed. [`drop_guard`](Self::drop_guard) ties the call to a scope.
#[derive(Clone)]
pub struct CancelHandle {
    controller: Arc<Controller>,
}

impl CancelHandle {
    pub(crate) fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Cancels the context and all of its cancellable descendants.
    ///
    /// Returns true if this call fired the context (first caller wins).
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.controller.fire(CancelReason::explicit())
    }

    /// Like [`cancel`](Self::cancel), recording `message` in the reason.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel_with(&self, message: &'static str) -> bool {
        self.controller.fire(CancelReason::explicit_with(message))
    }

    /// Returns true once the context has fired, for any reason.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.controller.is_fired()
    }

    /// Converts the handle into a guard that cancels when dropped.
    #[must_use]
    pub fn drop_guard(self) -> CancelGuard {
        CancelGuard {
            handle: self,
            armed: true,
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("controller", &self.controller.id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels its context when dropped.
///
/// ```
/// use ctxtree::Context;
///
/// let root = Context::background();
/// let ctx = {
///     let (ctx, cancel) = root.with_cancel();
///     let _guard = cancel.drop_guard();
///     ctx
/// };
/// assert!(ctx.is_cancelled());
/// ```
#[derive(Debug)]
#[must_use = "dropping the guard cancels immediately"]
pub struct CancelGuard {
    handle: CancelHandle,
    armed: bool,
}

impl CancelGuard {
    /// Releases the guard without cancelling, returning the handle.
    pub fn disarm(mut self) -> CancelHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel();
        }
    }
}

/// Registration of a [`CancelListener`](crate::CancelListener).
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug)]
pub struct ListenerHandle {
    controller: Option<Weak<Controller>>,
    id: Option<u64>,
    claimed: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub(crate) fn new(
        controller: Option<Weak<Controller>>,
        id: Option<u64>,
        claimed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller,
            id,
            claimed,
        }
    }

    /// Unregisters the listener.
    ///
    /// Returns true if this call prevented the listener from running; false
    /// if it already ran, is running, or was removed before.
    #[allow(clippy::must_use_candidate)]
    pub fn remove(&self) -> bool {
        let stopped = !self.claimed.swap(true, Ordering::AcqRel);
        if let (Some(controller), Some(id)) = (
            self.controller.as_ref().and_then(Weak::upgrade),
            self.id,
        ) {
            controller.remove_listener(id);
        }
        stopped
    }
}

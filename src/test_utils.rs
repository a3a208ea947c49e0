//! Test utilities for ctxtree.
//!
//! Shared helpers for unit tests and, with the `test-internals` feature,
//! for downstream crates testing code built on contexts:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A listener that records every reason it observes
//! - Bounded waits that fail loudly instead of hanging
//!
//! # Example
//! ```ignore
//! use ctxtree::test_utils::{assert_cancelled_within, init_test_logging};
//! use ctxtree::Context;
//! use std::time::Duration;
//!
//! init_test_logging();
//! let (ctx, _cancel) = Context::background()
//!     .with_timeout(Duration::from_millis(10))
//!     .unwrap();
//! assert_cancelled_within(&ctx, Duration::from_secs(5));
//! ```

use parking_lot::Mutex;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::cx::Context;
use crate::types::{CancelKind, CancelReason};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Blocks until `ctx` fires, panicking after `limit`. Returns the kind.
pub fn assert_cancelled_within(ctx: &Context, limit: Duration) -> CancelKind {
    let fired = ctx.done().wait_timeout(limit);
    assert!(fired, "context {ctx} did not fire within {limit:?}");
    let kind = ctx
        .err()
        .unwrap_or_else(|| unreachable!("fired context {ctx} has no error"));
    tracing::debug!(context = %ctx, kind = %kind, "context fired");
    kind
}

/// Asserts that `ctx` stays pending for `window`.
pub fn assert_pending_for(ctx: &Context, window: Duration) {
    let fired = ctx.done().wait_timeout(window);
    assert!(!fired, "context {ctx} fired unexpectedly: {:?}", ctx.cause());
    assert_eq!(ctx.err(), None);
}

/// Cancellation listener that records every reason it is invoked with.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    seen: Arc<Mutex<Vec<CancelReason>>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a recording callback on `ctx`.
    pub fn attach(&self, ctx: &Context) -> crate::cx::ListenerHandle {
        let seen = Arc::clone(&self.seen);
        ctx.on_cancel(move |reason: &CancelReason| seen.lock().push(reason.clone()))
    }

    /// Kinds observed so far, in invocation order.
    #[must_use]
    pub fn kinds(&self) -> Vec<CancelKind> {
        self.seen.lock().iter().map(CancelReason::kind).collect()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_sees_propagated_reasons() {
        init_test_logging();
        crate::test_phase!("recorder");
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _child_cancel) = parent.with_cancel();
        let recorder = RecordingListener::new();
        recorder.attach(&parent);
        recorder.attach(&child);

        cancel.cancel();
        assert_eq!(
            recorder.kinds(),
            vec![CancelKind::ExplicitCancel, CancelKind::ParentCancelled]
        );
        assert_eq!(assert_cancelled_within(&child, Duration::ZERO), CancelKind::ParentCancelled);
        crate::test_complete!("recorder", listeners = recorder.count());
    }

    #[test]
    fn pending_context_passes_pending_check() {
        init_test_logging();
        let (ctx, _cancel) = Context::background().with_cancel();
        assert_pending_for(&ctx, Duration::from_millis(5));
    }
}

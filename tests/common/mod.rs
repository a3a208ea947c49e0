#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! #[macro_use]
//! mod common;
//! use common::*;
//! ```

use ctxtree::{CancelKind, Context};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::Once;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "CTXTREE_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor an existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED)
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
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

/// Why a counter worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterExit {
    /// The context fired; carries its terminal kind.
    Cancelled(CancelKind),
    /// The receiver was dropped.
    Disconnected,
}

/// A cooperative producer emitting 1, 2, 3, ... until its context fires.
pub struct Counter {
    /// Emitted values; closes when the worker returns.
    pub values: Receiver<u64>,
    handle: JoinHandle<CounterExit>,
}

impl Counter {
    /// Waits for the worker to return.
    pub fn join(self) -> CounterExit {
        drop(self.values);
        self.handle.join().expect("counter worker panicked")
    }

    /// Returns true once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns a counter that checks `ctx` between emissions and pauses
/// `interval` after each one.
///
/// Delivery is a rendezvous: a value is handed over only while the consumer
/// is receiving, and the worker keeps polling the context while it waits.
pub fn spawn_counter(ctx: Context, interval: Duration) -> Counter {
    let (tx, values) = mpsc::sync_channel::<u64>(0);
    let handle = thread::Builder::new()
        .name("ctxtree-test-counter".into())
        .spawn(move || {
            let done = ctx.done();
            let mut next = 1_u64;
            loop {
                if done.is_fired() {
                    break;
                }
                match tx.try_send(next) {
                    Ok(()) => {
                        tracing::trace!(value = next, "counter emitted");
                        next += 1;
                        if !interval.is_zero() && done.wait_timeout(interval) {
                            break;
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        if done.wait_timeout(Duration::from_micros(200)) {
                            break;
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => return CounterExit::Disconnected,
                }
            }
            let kind = ctx.err().expect("fired context reports a kind");
            tracing::debug!(kind = %kind, emitted = next - 1, "counter stopped");
            CounterExit::Cancelled(kind)
        })
        .expect("spawn counter worker");
    Counter { values, handle }
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

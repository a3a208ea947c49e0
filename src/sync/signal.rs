//! One-shot broadcast completion signal.
//!
//! A [`Signal`] starts pending and fires at most once. Every clone observes
//! the same state, and firing wakes every waiter: threads parked in
//! [`Signal::wait`] as well as tasks awaiting [`Signal::fired`].
//!
//! Only the crate can fire a signal. Consumers observe it; controllers own it.
//!
//! # Example
//!
//! ```
//! use ctxtree::Context;
//! use std::time::Duration;
//!
//! let (ctx, cancel) = Context::background().with_cancel();
//! let done = ctx.done();
//! assert!(!done.wait_timeout(Duration::from_millis(1)));
//!
//! cancel.cancel();
//! assert!(done.is_fired());
//! done.wait();
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Slab of async waiters; freed slots are reused so a long-lived signal
/// polled by many short-lived futures does not grow without bound.
#[derive(Debug, Default)]
struct WaiterSlab {
    entries: Vec<Option<Waker>>,
    free_slots: Vec<usize>,
}

impl WaiterSlab {
    fn insert(&mut self, waker: Waker) -> usize {
        if let Some(index) = self.free_slots.pop() {
            self.entries[index] = Some(waker);
            index
        } else {
            self.entries.push(Some(waker));
            self.entries.len() - 1
        }
    }

    fn remove(&mut self, index: usize) {
        if let Some(slot) = self.entries.get_mut(index) {
            if slot.take().is_some() {
                self.free_slots.push(index);
            }
        }
    }

    fn drain(&mut self) -> Vec<Waker> {
        self.free_slots.clear();
        self.entries.drain(..).flatten().collect()
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    fired: AtomicBool,
    waiters: Mutex<WaiterSlab>,
    condvar: Condvar,
}

/// One-shot, multi-observer completion primitive.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    /// Creates a pending signal.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner::default()),
        }
    }

    /// A shared signal that nothing can fire.
    ///
    /// Returned by `Context::done` for contexts without a controller.
    #[must_use]
    pub(crate) fn never() -> Self {
        static NEVER: OnceLock<Signal> = OnceLock::new();
        NEVER.get_or_init(Self::new).clone()
    }

    /// Fires the signal. Returns false if it had already fired.
    pub(crate) fn fire(&self) -> bool {
        let wakers = {
            let mut waiters = self.inner.waiters.lock();
            if self.inner.fired.swap(true, Ordering::AcqRel) {
                return false;
            }
            self.inner.condvar.notify_all();
            waiters.drain()
        };

        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Blocks the calling thread until the signal fires.
    ///
    /// Blocks forever on a signal that can never fire.
    pub fn wait(&self) {
        if self.is_fired() {
            return;
        }
        let mut waiters = self.inner.waiters.lock();
        while !self.is_fired() {
            self.inner.condvar.wait(&mut waiters);
        }
    }

    /// Blocks for at most `timeout`. Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => {
                self.wait();
                true
            }
        }
    }

    /// Blocks until `deadline`. Returns true if the signal fired.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        if self.is_fired() {
            return true;
        }
        let mut waiters = self.inner.waiters.lock();
        while !self.is_fired() {
            if self
                .inner
                .condvar
                .wait_until(&mut waiters, deadline)
                .timed_out()
            {
                return self.is_fired();
            }
        }
        true
    }

    /// Returns a future that resolves once the signal fires.
    ///
    /// The future owns a clone of the signal, so it can outlive `self`.
    #[must_use]
    pub fn fired(&self) -> Fired {
        Fired {
            signal: self.clone(),
            waiter_index: None,
        }
    }

    /// Returns true if both handles observe the same signal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of futures currently parked on this signal.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        let waiters = self.inner.waiters.lock();
        waiters.entries.iter().filter(|slot| slot.is_some()).count()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Future returned by [`Signal::fired`].
///
/// Dropping it before completion removes its waker from the signal.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Fired {
    signal: Signal,
    waiter_index: Option<usize>,
}

impl Future for Fired {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.is_fired() {
            self.waiter_index = None;
            return Poll::Ready(());
        }

        let signal = self.signal.clone();
        let mut waiters = signal.inner.waiters.lock();
        // `fire` flips the flag under this lock, so a pending result here
        // guarantees our waker is visible to it.
        if signal.is_fired() {
            drop(waiters);
            self.waiter_index = None;
            return Poll::Ready(());
        }

        match self.waiter_index {
            Some(index) => match waiters.entries.get_mut(index) {
                Some(slot) => *slot = Some(cx.waker().clone()),
                None => {
                    let index = waiters.insert(cx.waker().clone());
                    self.waiter_index = Some(index);
                }
            },
            None => {
                let index = waiters.insert(cx.waker().clone());
                self.waiter_index = Some(index);
            }
        }
        Poll::Pending
    }
}

impl Drop for Fired {
    fn drop(&mut self) {
        if let Some(index) = self.waiter_index.take() {
            if !self.signal.is_fired() {
                self.signal.inner.waiters.lock().remove(index);
            }
        }
    }
}

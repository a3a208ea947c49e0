//! Deadline scheduler: fires controllers whose deadline elapsed.
//!
//! One background thread per scheduler owns a min-heap of armed entries
//! ordered by deadline. The thread sleeps on a condvar until the earliest
//! deadline (or until a new, earlier entry is armed), then fires every
//! expired controller with `DeadlineExceeded`.
//!
//! Disarming only removes the entry from the `armed` index; its heap slot
//! is skipped when popped and reclaimed by periodic compaction, so a
//! controller cancelled long before its deadline costs nothing at expiry.
//!
//! Controllers are held weakly. A controller that is dropped without being
//! cancelled simply never fires.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use crate::cancel::Controller;
use crate::config::{self, TreeConfig};
use crate::error::Error;
use crate::tracing_compat::{debug, error, trace};
use crate::types::CancelReason;

/// Compaction runs once stale heap slots outnumber live entries by this much.
const COMPACTION_SLACK: usize = 64;

/// Opaque handle for an armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerHandle {
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    deadline: Instant,
    id: u64,
}

#[derive(Default)]
struct SchedulerState {
    queue: BinaryHeap<Reverse<QueueEntry>>,
    armed: HashMap<u64, Weak<Controller>>,
    next_id: u64,
    thread_started: bool,
    shutdown: bool,
}

impl SchedulerState {
    fn earliest(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse(entry)| entry.deadline)
    }

    fn pop_expired(&mut self, now: Instant) -> Vec<Weak<Controller>> {
        let mut expired = Vec::new();
        while self
            .queue
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now)
        {
            if let Some(Reverse(entry)) = self.queue.pop() {
                if let Some(controller) = self.armed.remove(&entry.id) {
                    expired.push(controller);
                }
            }
        }
        expired
    }

    fn compact(&mut self) {
        if self.queue.len() > self.armed.len() * 2 + COMPACTION_SLACK {
            let armed = &self.armed;
            self.queue.retain(|Reverse(entry)| armed.contains_key(&entry.id));
        }
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    condvar: Condvar,
    thread_name: String,
    stack_size: usize,
}

/// Timer service shared by every deadline controller that uses it.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub(crate) struct DeadlineScheduler {
    shared: Arc<Shared>,
}

impl DeadlineScheduler {
    /// Creates a scheduler. The thread starts on the first `arm`.
    pub(crate) fn new(config: &TreeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                condvar: Condvar::new(),
                thread_name: config.scheduler_thread_name.clone(),
                stack_size: config.scheduler_stack_size,
            }),
        }
    }

    /// Arms a deadline for `controller`.
    pub(crate) fn arm(
        &self,
        deadline: Instant,
        controller: Weak<Controller>,
    ) -> Result<TimerHandle, Error> {
        let mut state = self.shared.state.lock();
        if !state.thread_started {
            self.spawn_thread()?;
            state.thread_started = true;
        }

        let id = state.next_id;
        state.next_id += 1;
        let wake = state.earliest().map_or(true, |earliest| deadline < earliest);
        state.queue.push(Reverse(QueueEntry { deadline, id }));
        state.armed.insert(id, controller);
        drop(state);

        trace!(target: "ctxtree::time::scheduler", timer = id, "deadline armed");
        if wake {
            self.shared.condvar.notify_one();
        }
        Ok(TimerHandle { id })
    }

    /// Disarms a timer. Returns false if it already fired or was disarmed.
    pub(crate) fn disarm(&self, handle: TimerHandle) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.armed.remove(&handle.id).is_some();
        if removed {
            state.compact();
            trace!(
                target: "ctxtree::time::scheduler",
                timer = handle.id,
                "deadline disarmed"
            );
        }
        removed
    }

    /// Number of armed, not yet fired timers.
    pub(crate) fn armed_count(&self) -> usize {
        self.shared.state.lock().armed.len()
    }

    /// Stops the scheduler thread. Armed timers never fire afterwards.
    #[cfg(test)]
    pub(crate) fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.condvar.notify_all();
    }

    fn spawn_thread(&self) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        let mut builder = std::thread::Builder::new().name(self.shared.thread_name.clone());
        if self.shared.stack_size > 0 {
            builder = builder.stack_size(self.shared.stack_size);
        }
        builder
            .spawn(move || run(&shared))
            .map(drop)
            .map_err(|err| {
                error!(
                    target: "ctxtree::time::scheduler",
                    error = %err,
                    "failed to spawn deadline scheduler thread"
                );
                Error::SchedulerUnavailable {
                    source: Arc::new(err),
                }
            })
    }
}

fn run(shared: &Shared) {
    debug!(
        target: "ctxtree::time::scheduler",
        thread = %shared.thread_name,
        "deadline scheduler started"
    );
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }

        let expired = state.pop_expired(Instant::now());
        if !expired.is_empty() {
            // Firing re-enters `disarm`, so the lock must be released.
            MutexGuard::unlocked(&mut state, || fire_expired(expired));
            continue;
        }

        match state.earliest() {
            Some(deadline) => {
                shared.condvar.wait_until(&mut state, deadline);
            }
            None => shared.condvar.wait(&mut state),
        }
    }
    debug!(target: "ctxtree::time::scheduler", "deadline scheduler stopped");
}

fn fire_expired(expired: Vec<Weak<Controller>>) {
    for controller in expired.iter().filter_map(Weak::upgrade) {
        if controller.fire(CancelReason::deadline_exceeded()) {
            debug!(
                target: "ctxtree::time::scheduler",
                controller = controller.id(),
                "deadline exceeded"
            );
        }
    }
}

/// The process-wide scheduler, built from [`config::current`].
pub(crate) fn global() -> &'static DeadlineScheduler {
    static GLOBAL: OnceLock<DeadlineScheduler> = OnceLock::new();
    GLOBAL.get_or_init(|| DeadlineScheduler::new(config::current()))
}

//! Cancellation controller: the mutable heart of a cancellable node.
//!
//! A [`Controller`] owns the completion [`Signal`], the reason recorded when
//! it fires, the registry of directly dependent child controllers, the
//! after-fire listeners, and the optional deadline timer.
//!
//! Ownership is one-directional. A parent holds strong references to its
//! registered children until they fire; a child only holds a weak link back
//! to its parent. Firing removes the child from its parent's registry, so a
//! long-lived parent with many short-lived children stays bounded.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::error::Error;
use crate::sync::Signal;
use crate::time::{DeadlineScheduler, TimerHandle};
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelKind, CancelReason};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Cause recorded on a deadline controller whose timer could not be armed.
pub(crate) const SCHEDULER_UNAVAILABLE: CancelReason =
    CancelReason::explicit_with("deadline scheduler unavailable");

/// Callback run once when a context's controller fires.
pub trait CancelListener: Send + Sync {
    /// Called with the recorded reason, outside any controller lock.
    fn on_cancel(&self, reason: &CancelReason);
}

impl<F> CancelListener for F
where
    F: Fn(&CancelReason) + Send + Sync,
{
    fn on_cancel(&self, reason: &CancelReason) {
        self(reason);
    }
}

struct ListenerEntry {
    claimed: Arc<AtomicBool>,
    listener: Box<dyn CancelListener>,
}

struct ArmedTimer {
    scheduler: DeadlineScheduler,
    handle: TimerHandle,
}

#[derive(Default)]
struct ControllerState {
    reason: Option<CancelReason>,
    children: HashMap<u64, Arc<Controller>>,
    listeners: HashMap<u64, ListenerEntry>,
    next_listener_id: u64,
    timer: Option<ArmedTimer>,
}

pub(crate) struct Controller {
    id: u64,
    parent: Option<Weak<Controller>>,
    /// Effective deadline: the earlier of our own and the parent's.
    deadline: Option<Instant>,
    signal: Signal,
    state: Mutex<ControllerState>,
}

impl Controller {
    /// Creates a controller and links it under `parent`.
    ///
    /// If the parent already fired, the new controller fires immediately
    /// with `ParentCancelled` and is never registered.
    pub(crate) fn new(parent: Option<&Arc<Self>>, deadline: Option<Instant>) -> Arc<Self> {
        let controller = Arc::new(Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            parent: parent.map(Arc::downgrade),
            deadline,
            signal: Signal::new(),
            state: Mutex::new(ControllerState::default()),
        });

        if let Some(parent) = parent {
            let parent_reason = {
                let mut state = parent.state.lock();
                match &state.reason {
                    Some(reason) => Some(reason.clone()),
                    None => {
                        state
                            .children
                            .insert(controller.id, Arc::clone(&controller));
                        None
                    }
                }
            };

            match parent_reason {
                Some(reason) => {
                    controller.fire(CancelReason::parent_cancelled(&reason));
                }
                None => {
                    trace!(
                        target: "ctxtree::cancel",
                        controller = controller.id,
                        parent = parent.id,
                        "controller registered"
                    );
                }
            }
        }

        controller
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn signal(&self) -> &Signal {
        &self.signal
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        self.state.lock().reason.clone()
    }

    pub(crate) fn kind(&self) -> Option<CancelKind> {
        self.state.lock().reason.as_ref().map(CancelReason::kind)
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.signal.is_fired()
    }

    /// Number of children currently registered for propagation.
    pub(crate) fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }

    /// Fires this controller and, transitively, every registered child.
    ///
    /// Returns true if this call recorded the reason; a concurrent or later
    /// cause is discarded and returns false.
    ///
    /// Descendants are fired from an explicit worklist, so the depth of the
    /// subtree never reaches the call stack. A node's listeners still run
    /// before any of its children fire.
    pub(crate) fn fire(&self, reason: CancelReason) -> bool {
        let Some(children) = self.fire_one(&reason) else {
            return false;
        };
        let mut pending = propagate(children, &reason);
        while let Some((child, reason)) = pending.pop() {
            if let Some(grandchildren) = child.fire_one(&reason) {
                pending.extend(propagate(grandchildren, &reason));
            }
        }
        true
    }

    /// Fires this controller alone and hands back its registered children.
    ///
    /// Returns `None` if a reason was already recorded.
    fn fire_one(&self, reason: &CancelReason) -> Option<Vec<Arc<Self>>> {
        let (children, listeners, timer) = {
            let mut state = self.state.lock();
            if state.reason.is_some() {
                return None;
            }
            state.reason = Some(reason.clone());
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.listeners),
                state.timer.take(),
            )
        };

        debug!(
            target: "ctxtree::cancel",
            controller = self.id,
            kind = reason.kind().as_str(),
            children = children.len(),
            "controller fired"
        );

        self.signal.fire();

        if let Some(timer) = timer {
            timer.scheduler.disarm(timer.handle);
        }

        for entry in listeners.into_values() {
            if !entry.claimed.swap(true, Ordering::AcqRel) {
                entry.listener.on_cancel(reason);
            }
        }

        self.detach();
        Some(children.into_values().collect())
    }

    /// Removes this controller from its parent's registry.
    fn detach(&self) {
        let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        if parent.state.lock().children.remove(&self.id).is_some() {
            trace!(
                target: "ctxtree::cancel",
                controller = self.id,
                parent = parent.id,
                "controller deregistered"
            );
        }
    }

    /// Arms a timer that fires this controller with `DeadlineExceeded` at
    /// `deadline`. A no-op if the controller already fired.
    ///
    /// If the scheduler cannot take the timer, the controller fires with
    /// [`SCHEDULER_UNAVAILABLE`] and deregisters before the error returns.
    pub(crate) fn arm_deadline(
        self: &Arc<Self>,
        scheduler: &DeadlineScheduler,
        deadline: Instant,
    ) -> Result<(), Error> {
        if self.is_fired() {
            return Ok(());
        }
        let handle = match scheduler.arm(deadline, Arc::downgrade(self)) {
            Ok(handle) => handle,
            Err(err) => {
                self.fire(SCHEDULER_UNAVAILABLE);
                return Err(err);
            }
        };

        let mut state = self.state.lock();
        if state.reason.is_some() {
            // Fired between the check above and arming.
            drop(state);
            scheduler.disarm(handle);
        } else {
            state.timer = Some(ArmedTimer {
                scheduler: scheduler.clone(),
                handle,
            });
        }
        Ok(())
    }

    /// Registers `listener`; runs it right away if already fired.
    pub(crate) fn add_listener(
        &self,
        claimed: Arc<AtomicBool>,
        listener: Box<dyn CancelListener>,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        if let Some(reason) = state.reason.clone() {
            drop(state);
            if !claimed.swap(true, Ordering::AcqRel) {
                listener.on_cancel(&reason);
            }
            return None;
        }
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state
            .listeners
            .insert(id, ListenerEntry { claimed, listener });
        Some(id)
    }

    /// Drops a pending listener without running it.
    pub(crate) fn remove_listener(&self, id: u64) {
        self.state.lock().listeners.remove(&id);
    }
}

/// Pairs each child with the reason it inherits from `reason`.
fn propagate(
    children: Vec<Arc<Controller>>,
    reason: &CancelReason,
) -> Vec<(Arc<Controller>, CancelReason)> {
    if children.is_empty() {
        return Vec::new();
    }
    let inherited = CancelReason::parent_cancelled(reason);
    children
        .into_iter()
        .map(|child| (child, inherited.clone()))
        .collect()
}

impl Drop for Controller {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(timer) = state.timer.take() {
            timer.scheduler.disarm(timer.handle);
        }

        // Unlink the registered subtree one level at a time; a long chain of
        // pending children must not drop recursively.
        let mut orphans: Vec<Arc<Self>> = state.children.drain().map(|(_, c)| c).collect();
        while let Some(child) = orphans.pop() {
            if let Ok(mut child) = Arc::try_unwrap(child) {
                orphans.extend(child.state.get_mut().children.drain().map(|(_, c)| c));
            }
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("reason", &state.reason)
            .field("children", &state.children.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn root() -> Arc<Controller> {
        Controller::new(None, None)
    }

    #[test]
    fn fire_is_first_cause_wins() {
        let c = root();
        assert!(c.fire(CancelReason::deadline_exceeded()));
        assert!(!c.fire(CancelReason::explicit()));
        assert_eq!(c.kind(), Some(CancelKind::DeadlineExceeded));
        assert!(c.signal().is_fired());
    }

    #[test]
    fn children_register_and_deregister() {
        let parent = root();
        let a = Controller::new(Some(&parent), None);
        let b = Controller::new(Some(&parent), None);
        assert_eq!(parent.child_count(), 2);

        a.fire(CancelReason::explicit());
        assert_eq!(parent.child_count(), 1);
        assert!(!parent.is_fired());
        assert!(!b.is_fired());
    }

    #[test]
    fn propagation_reaches_grandchildren() {
        let top = root();
        let mid = Controller::new(Some(&top), None);
        let leaf = Controller::new(Some(&mid), None);

        top.fire(CancelReason::explicit_with("stop"));

        assert_eq!(mid.kind(), Some(CancelKind::ParentCancelled));
        assert_eq!(leaf.kind(), Some(CancelKind::ParentCancelled));
        let reason = leaf.reason().expect("leaf fired");
        assert_eq!(reason.chain().count(), 3);
        assert_eq!(reason.root_cause().message(), Some("stop"));
        assert_eq!(top.child_count(), 0);
        assert_eq!(mid.child_count(), 0);
    }

    #[test]
    fn child_of_fired_parent_fires_immediately() {
        let parent = root();
        parent.fire(CancelReason::explicit());
        let child = Controller::new(Some(&parent), None);
        assert_eq!(child.kind(), Some(CancelKind::ParentCancelled));
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn listeners_run_once_outside_lock() {
        let c = root();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let observed = Arc::clone(&c);
        c.add_listener(
            Arc::new(AtomicBool::new(false)),
            Box::new(move |reason: &CancelReason| {
                // Re-entering the controller must not deadlock.
                assert!(observed.is_fired());
                assert_eq!(reason.kind(), CancelKind::ExplicitCancel);
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        c.fire(CancelReason::explicit());
        c.fire(CancelReason::explicit());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_never_runs() {
        let c = root();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let id = c
            .add_listener(
                Arc::new(AtomicBool::new(false)),
                Box::new(move |_: &CancelReason| {
                    hits2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("pending controller registers listener");
        c.remove_listener(id);
        c.fire(CancelReason::explicit());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_fire_records_one_reason() {
        let c = root();
        let winners: usize = (0..8)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    let reason = if i % 2 == 0 {
                        CancelReason::explicit()
                    } else {
                        CancelReason::deadline_exceeded()
                    };
                    usize::from(c.fire(reason))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("fire thread panicked"))
            .sum();
        assert_eq!(winners, 1);
        assert!(c.kind().is_some());
    }

    #[test]
    fn registration_racing_parent_fire_never_misses() {
        for _ in 0..64 {
            let parent = root();
            let firer = {
                let parent = Arc::clone(&parent);
                thread::spawn(move || parent.fire(CancelReason::explicit()))
            };
            let children: Vec<_> = (0..16)
                .map(|_| Controller::new(Some(&parent), None))
                .collect();
            firer.join().expect("firer panicked");
            for child in children {
                assert_eq!(child.kind(), Some(CancelKind::ParentCancelled));
            }
            assert_eq!(parent.child_count(), 0);
        }
    }

    fn chain(depth: usize) -> (Arc<Controller>, Arc<Controller>) {
        let top = root();
        let mut leaf = Arc::clone(&top);
        for _ in 0..depth {
            leaf = Controller::new(Some(&leaf), None);
        }
        (top, leaf)
    }

    #[test]
    fn deep_chain_fires_without_recursion() {
        let (top, leaf) = chain(100_000);
        assert!(top.fire(CancelReason::explicit_with("stop")));
        assert!(leaf.is_fired());
        let reason = leaf.reason().expect("leaf fired");
        assert_eq!(reason.kind(), CancelKind::ParentCancelled);
        assert_eq!(reason.chain().count(), 100_001);
        assert_eq!(reason.root_cause().message(), Some("stop"));
        drop(top);
        drop(reason);
        drop(leaf);
    }

    #[test]
    fn deep_pending_chain_drops_without_recursion() {
        let (top, leaf) = chain(100_000);
        let weak_leaf = Arc::downgrade(&leaf);
        drop(leaf);
        // Only the registry keeps the leaf alive now.
        assert!(weak_leaf.upgrade().is_some());
        drop(top);
        assert!(weak_leaf.upgrade().is_none());
    }

    #[test]
    fn wide_fan_out_fires_every_child() {
        let parent = root();
        let children: Vec<_> = (0..1_000)
            .map(|_| Controller::new(Some(&parent), None))
            .collect();
        parent.fire(CancelReason::explicit());
        assert!(children
            .iter()
            .all(|c| c.kind() == Some(CancelKind::ParentCancelled)));
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn failed_arm_fires_with_scheduler_cause() {
        let broken = DeadlineScheduler::new(&crate::config::TreeConfig {
            scheduler_thread_name: "ctxtree-test-unspawnable".to_string(),
            scheduler_stack_size: usize::MAX / 2,
            ..crate::config::TreeConfig::default()
        });
        let parent = root();
        let c = Controller::new(Some(&parent), None);
        let deadline = Instant::now() + std::time::Duration::from_secs(60);

        let err = c.arm_deadline(&broken, deadline).unwrap_err();
        assert!(err.is_scheduler_unavailable());
        let reason = c.reason().expect("fired on arm failure");
        assert_eq!(reason, SCHEDULER_UNAVAILABLE);
        assert_eq!(reason.message(), Some("deadline scheduler unavailable"));
        assert_eq!(parent.child_count(), 0);
        assert_eq!(broken.armed_count(), 0);
    }

    #[test]
    fn parent_link_is_weak() {
        let parent = root();
        let weak_parent = Arc::downgrade(&parent);
        let child = Controller::new(Some(&parent), None);
        drop(parent);
        // The child holds only a weak link upward.
        assert!(weak_parent.upgrade().is_none());
        assert!(child.fire(CancelReason::explicit()));
    }
}

//! Deadline scheduling.
//!
//! Deadline contexts arm an entry on the process-wide scheduler thread; the
//! entry fires the context's controller with `DeadlineExceeded` unless the
//! controller fires for another reason first, in which case it is disarmed.
//! Already-elapsed deadlines never reach the scheduler: they fire
//! synchronously during construction.

mod scheduler;

pub(crate) use scheduler::{global, DeadlineScheduler, TimerHandle};

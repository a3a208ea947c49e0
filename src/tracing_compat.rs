//! Logging shim for the tree's structured events.
//!
//! With the `tracing-integration` feature the macros below are the ones from
//! the `tracing` crate. Without it they expand to nothing, so controllers and
//! the deadline scheduler pay no logging cost.
//!
//! ```toml
//! ctxtree = { version = "0.1", features = ["tracing-integration"] }
//! ```
//!
//! Events emitted by the crate:
//!
//! | target                     | level | event                                  |
//! |----------------------------|-------|----------------------------------------|
//! | `ctxtree::cancel`          | trace | controller registered / deregistered  |
//! | `ctxtree::cancel`          | debug | controller fired (with kind)          |
//! | `ctxtree::time::scheduler` | debug | scheduler thread started, timer fired |
//! | `ctxtree::time::scheduler` | trace | timer armed / disarmed                |
//! | `ctxtree::config`          | warn  | configuration fell back to defaults   |

#[cfg(feature = "tracing-integration")]
pub(crate) use tracing::{debug, error, trace, warn};

// The shims get distinct names and are re-exported by path. A bare
// `macro_rules! warn` would be ambiguous with the built-in `warn` attribute.
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! noop_event {
        ($($arg:tt)*) => {};
    }

    pub(crate) use noop_event as debug;
    pub(crate) use noop_event as error;
    pub(crate) use noop_event as trace;
    pub(crate) use noop_event as warn;
}

#[cfg(not(feature = "tracing-integration"))]
pub(crate) use noop::{debug, error, trace, warn};

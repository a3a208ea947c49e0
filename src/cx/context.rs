//! The context node and the tree builder.
//!
//! A [`Context`] is an immutable node. Every builder method returns a new
//! child node; nothing ever changes an existing one. Each node caches the
//! controller of its nearest cancellable ancestor, so building a child is
//! O(1) no matter how deep the tree is, and `done`/`err`/`deadline` never
//! walk the parent chain. Only [`Context::value`] walks upward.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::handle::{CancelHandle, ListenerHandle};
use super::key::{is_shared_key_type, key_type_name, ContextKey, StoredKey};
use crate::cancel::{CancelListener, Controller};
use crate::config;
use crate::error::{Error, Result};
use crate::sync::Signal;
use crate::time::{self, DeadlineScheduler};
use crate::types::{CancelKind, CancelReason};

/// Which builder operation produced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Root from [`Context::background`].
    Background,
    /// Root from [`Context::todo`].
    Todo,
    /// Node from [`Context::with_value`].
    Value,
    /// Node from [`Context::with_cancel`].
    Cancel,
    /// Node from [`Context::with_deadline`] or [`Context::with_timeout`].
    Deadline,
    /// Node from [`Context::without_cancel`].
    Detached,
}

impl NodeKind {
    /// Returns true for the two root kinds.
    #[must_use]
    pub const fn is_root(self) -> bool {
        matches!(self, Self::Background | Self::Todo)
    }
}

struct Entry {
    key: Box<dyn StoredKey>,
    value: Box<dyn Any + Send + Sync>,
    value_type: &'static str,
}

struct Node {
    kind: NodeKind,
    parent: Option<Context>,
    entry: Option<Entry>,
    /// Nearest controller, own or inherited.
    controller: Option<Arc<Controller>>,
}

impl Drop for Node {
    fn drop(&mut self) {
        // Unlink uniquely owned ancestors iteratively so dropping a long
        // value chain does not recurse once per node.
        let mut next = self.parent.take();
        while let Some(ctx) = next {
            next = match Arc::try_unwrap(ctx.node) {
                Ok(mut node) => node.parent.take(),
                Err(_) => None,
            };
        }
    }
}

/// A node of the context tree.
///
/// Cheap to clone (one `Arc`), `Send + Sync`, and immutable. Derive children
/// with the builder methods and pass them down to dependent work.
///
/// ```
/// use ctxtree::{CancelKind, Context};
///
/// #[derive(Debug, PartialEq)]
/// struct User;
///
/// let root = Context::background();
/// let (ctx, cancel) = root.with_cancel();
/// let ctx = ctx.with_value(User, "ada")?;
///
/// assert_eq!(ctx.value::<&str>(&User), Some(&"ada"));
/// assert_eq!(ctx.err(), None);
///
/// cancel.cancel();
/// assert_eq!(ctx.err(), Some(CancelKind::ExplicitCancel));
/// assert_eq!(root.err(), None);
/// # Ok::<(), ctxtree::Error>(())
/// ```
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    fn root(kind: NodeKind) -> Self {
        Self {
            node: Arc::new(Node {
                kind,
                parent: None,
                entry: None,
                controller: None,
            }),
        }
    }

    fn child(
        &self,
        kind: NodeKind,
        entry: Option<Entry>,
        controller: Option<Arc<Controller>>,
    ) -> Self {
        Self {
            node: Arc::new(Node {
                kind,
                parent: Some(self.clone()),
                entry,
                controller,
            }),
        }
    }

    /// An empty root: never cancelled, no deadline, no values.
    ///
    /// Create one per independent unit of work, such as an incoming request.
    #[must_use]
    pub fn background() -> Self {
        Self::root(NodeKind::Background)
    }

    /// An empty root for call sites whose proper context is not yet known.
    ///
    /// Behaves exactly like [`background`](Self::background).
    #[must_use]
    pub fn todo() -> Self {
        Self::root(NodeKind::Todo)
    }

    /// Derives a child carrying `(key, value)`.
    ///
    /// The child shares this node's cancellation; this node is unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `K` is built only from primitive and
    /// standard-library types, such as `&str`, an integer or `Vec<u8>`.
    /// Define a key type instead.
    pub fn with_value<K, V>(&self, key: K, value: V) -> Result<Self>
    where
        K: ContextKey,
        V: Any + Send + Sync,
    {
        if is_shared_key_type::<K>() {
            return Err(Error::InvalidKey {
                type_name: key_type_name::<K>(),
            });
        }
        let entry = Entry {
            key: Box::new(key),
            value: Box::new(value),
            value_type: type_name::<V>(),
        };
        Ok(self.child(
            NodeKind::Value,
            Some(entry),
            self.node.controller.clone(),
        ))
    }

    /// Derives a cancellable child.
    ///
    /// The child fires when the returned handle is invoked or when this
    /// node's cancellation propagates to it. If this node already fired, the
    /// child is returned already fired with [`CancelKind::ParentCancelled`].
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let controller = Controller::new(self.node.controller.as_ref(), self.deadline());
        let ctx = self.child(NodeKind::Cancel, None, Some(Arc::clone(&controller)));
        (ctx, CancelHandle::new(controller))
    }

    /// Derives a child that fires `timeout` from now.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDeadline`] if `now + timeout` overflows the clock, and
    /// the errors of [`with_deadline`](Self::with_deadline).
    pub fn with_timeout(&self, timeout: Duration) -> Result<(Self, CancelHandle)> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(Error::InvalidDeadline { timeout })?;
        self.with_deadline(deadline)
    }

    /// Derives a child that fires with [`CancelKind::DeadlineExceeded`] at
    /// `deadline`.
    ///
    /// A deadline that already passed fires the child before this returns.
    /// If this node's deadline is equal or earlier, the child reports that
    /// earlier deadline and relies on it.
    ///
    /// # Errors
    ///
    /// [`Error::SchedulerUnavailable`] if the scheduler thread could not be
    /// started. Nothing is left registered under this node in that case.
    pub fn with_deadline(&self, deadline: Instant) -> Result<(Self, CancelHandle)> {
        self.with_deadline_on(
            time::global(),
            config::current().skip_redundant_timers,
            deadline,
        )
    }

    pub(crate) fn with_deadline_on(
        &self,
        scheduler: &DeadlineScheduler,
        skip_redundant_timers: bool,
        deadline: Instant,
    ) -> Result<(Self, CancelHandle)> {
        let inherited = self.deadline().filter(|parent| *parent <= deadline);
        let effective = inherited.unwrap_or(deadline);

        let controller = Controller::new(self.node.controller.as_ref(), Some(effective));
        let ctx = self.child(NodeKind::Deadline, None, Some(Arc::clone(&controller)));

        if deadline <= Instant::now() {
            controller.fire(CancelReason::deadline_exceeded());
        } else if inherited.is_none() || !skip_redundant_timers {
            controller.arm_deadline(scheduler, deadline)?;
        }

        Ok((ctx, CancelHandle::new(controller)))
    }

    /// Derives a child that keeps this node's values but is never cancelled
    /// and has no deadline.
    #[must_use]
    pub fn without_cancel(&self) -> Self {
        self.child(NodeKind::Detached, None, None)
    }

    /// Looks up `key` in this node and its ancestors.
    ///
    /// The nearest definition wins. Returns `None` if no ancestor defines
    /// the key, or if the nearest definition does not hold a `V`.
    #[must_use]
    pub fn value<V: Any>(&self, key: &impl ContextKey) -> Option<&V> {
        let mut node: &Node = &self.node;
        loop {
            if let Some(entry) = &node.entry {
                if entry.key.matches(key) {
                    return entry.value.downcast_ref::<V>();
                }
            }
            node = node.parent.as_ref()?.node.as_ref();
        }
    }

    /// The completion signal of the nearest cancellable ancestor.
    ///
    /// For a context with no cancellable ancestor this signal never fires.
    #[must_use]
    pub fn done(&self) -> Signal {
        self.node
            .controller
            .as_ref()
            .map_or_else(Signal::never, |controller| controller.signal().clone())
    }

    /// `None` while pending, otherwise the recorded terminal cause.
    #[must_use]
    pub fn err(&self) -> Option<CancelKind> {
        self.node.controller.as_ref().and_then(|c| c.kind())
    }

    /// The full recorded reason, including any message and parent chain.
    #[must_use]
    pub fn cause(&self) -> Option<CancelReason> {
        self.node.controller.as_ref().and_then(|c| c.reason())
    }

    /// The deadline of the nearest deadline ancestor, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.node.controller.as_ref().and_then(|c| c.deadline())
    }

    /// Returns true once the context has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.node
            .controller
            .as_ref()
            .is_some_and(|c| c.is_fired())
    }

    /// Runs `listener` once, when this context fires.
    ///
    /// Runs it on the calling thread before returning if the context already
    /// fired. Under a context that can never fire, the listener never runs.
    /// Listeners run on the thread that fires the context and must not block.
    pub fn on_cancel(&self, listener: impl CancelListener + 'static) -> ListenerHandle {
        let claimed = Arc::new(AtomicBool::new(false));
        match &self.node.controller {
            Some(controller) => {
                let id = controller.add_listener(Arc::clone(&claimed), Box::new(listener));
                ListenerHandle::new(Some(Arc::downgrade(controller)), id, claimed)
            }
            None => ListenerHandle::new(None, None, claimed),
        }
    }

    /// Which builder operation produced this node.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.node.kind
    }

    /// The node this one was derived from; `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.node.parent.as_ref()
    }

    /// Number of cancellable children registered directly under this
    /// node's controller.
    #[must_use]
    pub fn registered_children(&self) -> usize {
        self.node
            .controller
            .as_ref()
            .map_or(0, |c| c.child_count())
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lineage = Vec::new();
        let mut cursor = Some(self);
        while let Some(ctx) = cursor {
            lineage.push(ctx);
            cursor = ctx.node.parent.as_ref();
        }
        for (i, ctx) in lineage.into_iter().rev().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            ctx.fmt_step(f)?;
        }
        Ok(())
    }
}

impl Context {
    /// Writes the constructor call that produced this node.
    fn fmt_step(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = &self.node;
        match node.kind {
            NodeKind::Background => f.write_str("background"),
            NodeKind::Todo => f.write_str("todo"),
            NodeKind::Value => match &node.entry {
                Some(entry) => write!(f, "with_value({:?}, {})", entry.key, entry.value_type),
                None => f.write_str("with_value"),
            },
            NodeKind::Cancel => f.write_str("with_cancel"),
            NodeKind::Deadline => {
                let remaining = self
                    .deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()));
                write!(f, "with_deadline({remaining:?})")
            }
            NodeKind::Detached => f.write_str("without_cancel"),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.node.kind)
            .field("err", &self.err())
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}

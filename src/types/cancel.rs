//! Cancellation reason and kind types.
//!
//! A controller records exactly one [`CancelReason`] when it fires. The
//! [`CancelKind`] is the terminal cause reported by `Context::err`; the full
//! reason additionally carries an optional static message and, for
//! propagated cancellation, the reason of the ancestor that fired first.

use core::fmt;
use std::sync::Arc;

/// The terminal cause of a fired context.
///
/// Implements [`std::error::Error`] so consumers can propagate it with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, thiserror::Error)]
pub enum CancelKind {
    /// A cancel handle for this context was invoked.
    #[error("context cancelled")]
    ExplicitCancel,
    /// The context's deadline elapsed before any other cause.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    /// An ancestor fired; this context never fired on its own.
    #[error("parent context cancelled")]
    ParentCancelled,
}

impl CancelKind {
    /// Returns true for deadline-driven cancellation.
    #[must_use]
    pub const fn is_deadline(self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Short lowercase label, used in structured log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitCancel => "explicit",
            Self::DeadlineExceeded => "deadline",
            Self::ParentCancelled => "parent",
        }
    }
}

/// The reason a controller fired.
///
/// Propagated reasons form a chain as long as the cancelled subtree is deep.
/// Drop, equality and formatting walk it iteratively.
#[derive(Clone)]
pub struct CancelReason {
    kind: CancelKind,
    message: Option<&'static str>,
    parent: Option<Arc<CancelReason>>,
}

impl CancelReason {
    /// Explicit cancellation without a message.
    #[must_use]
    pub const fn explicit() -> Self {
        Self {
            kind: CancelKind::ExplicitCancel,
            message: None,
            parent: None,
        }
    }

    /// Explicit cancellation carrying a caller-supplied message.
    #[must_use]
    pub const fn explicit_with(message: &'static str) -> Self {
        Self {
            kind: CancelKind::ExplicitCancel,
            message: Some(message),
            parent: None,
        }
    }

    /// Deadline expiry.
    #[must_use]
    pub const fn deadline_exceeded() -> Self {
        Self {
            kind: CancelKind::DeadlineExceeded,
            message: None,
            parent: None,
        }
    }

    /// Propagated cancellation, linked to the ancestor's reason.
    #[must_use]
    pub fn parent_cancelled(parent: &Self) -> Self {
        Self {
            kind: CancelKind::ParentCancelled,
            message: None,
            parent: Some(Arc::new(parent.clone())),
        }
    }

    /// Returns the kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the message attached by `CancelHandle::cancel_with`, if any.
    #[must_use]
    pub const fn message(&self) -> Option<&'static str> {
        self.message
    }

    /// Returns the reason of the ancestor this cancellation propagated from.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Iterates from this reason up to the originating cause.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |reason| reason.parent())
    }

    /// Returns the reason that started the cascade.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        self.chain().last().unwrap_or(self)
    }
}

impl PartialEq for CancelReason {
    fn eq(&self, other: &Self) -> bool {
        let (mut lhs, mut rhs) = (self.chain(), other.chain());
        loop {
            match (lhs.next(), rhs.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.kind == b.kind && a.message == b.message => {
                    if let (Some(pa), Some(pb)) = (&a.parent, &b.parent) {
                        if Arc::ptr_eq(pa, pb) {
                            return true;
                        }
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Eq for CancelReason {}

impl Drop for CancelReason {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(parent) = next {
            next = match Arc::try_unwrap(parent) {
                Ok(mut reason) => reason.parent.take(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelReason")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("depth", &(self.chain().count() - 1))
            .field("origin", &self.root_cause().kind)
            .finish()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut open = 0_usize;
        for (i, reason) in self.chain().enumerate() {
            if i > 0 {
                f.write_str(" (")?;
                open += 1;
            }
            write!(f, "{}", reason.kind)?;
            if let Some(msg) = reason.message {
                write!(f, ": {msg}")?;
            }
        }
        for _ in 0..open {
            f.write_str(")")?;
        }
        Ok(())
    }
}

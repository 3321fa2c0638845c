//! Cancellation and deadline propagation for blocking operations.
//!
//! Every I/O-bearing call in the bootstrap core accepts a [`Context`]. A
//! context may be cancelled explicitly or carry a deadline; children inherit
//! the cancellation of their ancestors and the earliest deadline in the chain.
//! Operations poll [`Context::check`] between blocking steps and size their
//! own timeouts with [`Context::bounded`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Reasons a context stops permitting further work.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline attached to the context has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// Cheaply cloneable cancellation and deadline token.
///
/// Clones share cancellation state. Use [`Context::child`] to derive a
/// context that can be cancelled without affecting its parent.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// Returns a root context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::from_parts(None, None)
    }

    fn from_parts(parent: Option<Self>, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
                parent,
            }),
        }
    }

    /// Derives a child that inherits this context's cancellation and deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::from_parts(Some(self.clone()), self.deadline())
    }

    /// Derives a child whose deadline is the earlier of `deadline` and the
    /// inherited one.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = self
            .deadline()
            .map_or(deadline, |inherited| inherited.min(deadline));
        Self::from_parts(Some(self.clone()), Some(effective))
    }

    /// Derives a child that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or_else(|| self.child(), |deadline| self.with_deadline(deadline))
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Reports whether this context or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.parent.as_ref().is_some_and(Self::is_cancelled)
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the time left before the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails when the context has been cancelled or its deadline has passed.
    ///
    /// Cancellation takes precedence over an expired deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Cancelled`] or [`ContextError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Clamps `budget` to the time remaining on this context.
    #[must_use]
    pub fn bounded(&self, budget: Duration) -> Duration {
        self.remaining()
            .map_or(budget, |remaining| remaining.min(budget))
    }

    /// Sleeps for `duration`, waking early when the context is done.
    ///
    /// # Errors
    ///
    /// Returns the context error that interrupted the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let started = Instant::now();
        loop {
            self.check()?;
            let elapsed = started.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            let slice = self.bounded(duration.saturating_sub(elapsed)).min(SLEEP_SLICE);
            if slice.is_zero() {
                self.check()?;
                return Ok(());
            }
            thread::sleep(slice);
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of one pending wait point
///
/// A fresh token is issued every time a primitive parks a task. Comparing
/// tokens tells whether a task is still parked at the same wait point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitToken(u64);

impl WaitToken {
    pub(crate) fn next() -> Self {
        static ID: AtomicU64 = AtomicU64::new(1);
        Self(ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WaitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wait#{}", self.0)
    }
}

/// A cancellable wait
///
/// Every primitive that suspends a [`Task`](crate::Task) hands the task one of these,
/// which knows how to force exactly that pending wait to resolve abnormally.
/// The task only keeps the most recent handle.
pub struct WaitHandle {
    token: WaitToken,
    cancel: Box<dyn FnOnce()>,
}

impl WaitHandle {
    /// Create a handle with the callback that unwinds the wait
    pub fn new<F: FnOnce() + 'static>(token: WaitToken, cancel: F) -> Self {
        Self {
            token,
            cancel: Box::new(cancel),
        }
    }

    /// The wait point this handle belongs to
    #[inline]
    pub fn token(&self) -> WaitToken {
        self.token
    }

    /// Force the pending wait to resolve abnormally
    pub fn cancel(self) {
        crate::trace!("cancelling {}", self.token);
        (self.cancel)()
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle").field("token", &self.token).finish_non_exhaustive()
    }
}

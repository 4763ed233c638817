use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::rt::{self, Frame, TaskState};
use crate::{UsageError, WaitToken};

/// Start a [`Task`]
///
/// The body runs immediately, on the current stack, until its first
/// suspension. It is resumed inline whenever what it waits on completes.
///
/// Every wait on a primitive from this crate is cancelable by default;
/// wrap a wait with [`uncancelable`] to opt it out.
pub fn spawn<T, F>(body: F) -> Task<T>
where
    T: 'static,
    F: Future<Output = crate::Result<T>> + 'static,
{
    let output = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&output);
    let frame = Frame::spawn(Box::pin(async move {
        let result = body.await;
        if let Err(e) = &result
            && Rc::strong_count(&slot) == 1
        {
            crate::warn!("detached task failed: {e:?}");
        }
        *slot.borrow_mut() = Some(result);
    }));
    Task { frame, output }
}

/// An eagerly running computation that can be cancelled while parked
///
/// A task is not awaitable. Its result is taken once with
/// [`take_result`](Self::take_result) after it finishes.
///
/// # Cancellation
/// While parked, the task remembers the wait it is parked at. [`cancel`](Self::cancel)
/// forces that wait to resolve abnormally (the notifier slot is removed, the
/// bridge is marked dead, a nested [`Deferred`](crate::Deferred) is handed
/// to the reaper), then releases the body without resuming it.
///
/// ```rust
/// # use pistonite_coro as coro;
/// let notifier = coro::Notifier::<u32>::new();
/// let listener = notifier.listener();
/// let task = coro::spawn(async move {
///     let x = listener.wait().await?;
///     coro::Ok(x)
/// });
/// assert_eq!(task.state(), coro::TaskState::ParkedCancelable);
/// task.cancel().unwrap();
/// assert!(task.is_cancelled());
/// assert_eq!(notifier.notify(1), 0);
/// assert!(task.take_result().is_none());
/// ```
///
/// # Dropping
/// Dropping a task that is not finished cancels it first. Dropping it while
/// its body is running on the stack is a bug in the embedding code and panics.
/// Use [`detach`](Self::detach) to let a task run with no handle.
pub struct Task<T> {
    frame: Rc<Frame>,
    output: Rc<RefCell<Option<crate::Result<T>>>>,
}

impl<T: 'static> Task<T> {
    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> TaskState {
        self.frame.state()
    }

    /// Whether the task completed, failed or was cancelled
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.frame.state() == TaskState::Finished
    }

    /// Whether the task was ended by [`cancel`](Self::cancel)
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.frame.is_cancelled()
    }

    /// Token of the wait point the task is parked at, if it is parked at
    /// a wait from this crate
    #[inline]
    pub fn pending_wait(&self) -> Option<WaitToken> {
        self.frame.pending_wait()
    }

    /// Cancel the wait the task is parked at
    ///
    /// - Parked at a cancelable wait: the wait is unwound and the task
    ///   becomes finished without its body being resumed.
    /// - Parked at an [`uncancelable`] wait: nothing happens, and `Ok` is
    ///   returned. The next wait is cancelable again.
    /// - Running (called from inside its own body) or already finished:
    ///   a [`UsageError`], and nothing is unwound.
    pub fn cancel(&self) -> Result<(), UsageError> {
        self.frame.cancel()
    }

    /// Take the result of a finished task
    ///
    /// Returns `None` if the task is still pending, was cancelled, or the
    /// result was already taken.
    pub fn take_result(&self) -> Option<crate::Result<T>> {
        self.output.borrow_mut().take()
    }

    /// Let the task run to completion with no handle
    ///
    /// The task can no longer be cancelled. A failure is logged, since
    /// nobody can take it.
    pub fn detach(self) {
        crate::reap::keep_alive(Rc::clone(&self.frame));
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.frame.is_kept_alive() {
            return;
        }
        match self.frame.state() {
            TaskState::Finished => {}
            TaskState::Running => {
                crate::panicand!(error!(
                    "frame#{}: task dropped while its body is running on the stack",
                    self.frame.id()
                ));
            }
            TaskState::ParkedCancelable => {
                let _ = self.frame.cancel();
            }
            TaskState::ParkedUncancelable => self.frame.discard(),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.frame.id())
            .field("state", &self.frame.state())
            .finish()
    }
}

/// Opt one wait point out of task cancellation
///
/// While a task is parked inside `future`, [`Task::cancel`] is a no-op.
pub fn uncancelable<F: Future>(future: F) -> Uncancelable<F> {
    Uncancelable {
        inner: Box::pin(future),
    }
}

/// Future returned by [`uncancelable`]
#[must_use = "futures do nothing unless awaited"]
pub struct Uncancelable<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Uncancelable<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let inner = self.inner.as_mut();
        rt::shielded(move || inner.poll(cx))
    }
}

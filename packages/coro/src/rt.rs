//! Inline resumption runtime
//!
//! There is no executor. A waker resolves to a frame through a thread-local,
//! generation-indexed registry and resumes it directly on the caller's stack.
//! Wakers only carry a [`Key`] and the owning thread id, so they satisfy the
//! `Send + Sync` contract of [`Waker`] without sharing any runtime state.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::ThreadId;

use crate::UsageError;
use crate::slot::{Key, Slots};
use crate::wait::{WaitHandle, WaitToken};

pub(crate) type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A frame that a waker can resume
pub(crate) trait Resume {
    fn resume(self: Rc<Self>);
}

thread_local! {
    static FRAMES: RefCell<Slots<Weak<dyn Resume>>> = const { RefCell::new(Slots::new()) };
    /// The task frame being polled right now, if any
    static CURRENT: RefCell<Option<Rc<Frame>>> = const { RefCell::new(None) };
}

/// Register a frame and return its key and a waker that resumes it
pub(crate) fn register(frame: Weak<dyn Resume>) -> (Key, Waker) {
    let key = FRAMES.with_borrow_mut(|frames| frames.insert(frame));
    let waker = Waker::from(Arc::new(FrameWaker {
        key,
        thread: std::thread::current().id(),
    }));
    (key, waker)
}

/// Remove a frame from the registry. Wakers pointing to it become no-ops.
pub(crate) fn unregister(key: Key) {
    // the registry may already be gone during thread teardown
    let _ = FRAMES.try_with(|frames| {
        let removed = frames.borrow_mut().remove(key);
        drop(removed);
    });
}

/// Whether the registry of this thread can still be used
pub(crate) fn available() -> bool {
    FRAMES.try_with(|_| ()).is_ok()
}

#[cfg(test)]
pub(crate) fn registered_frames() -> usize {
    FRAMES.with_borrow(|frames| frames.len())
}

struct FrameWaker {
    key: Key,
    thread: ThreadId,
}

impl Wake for FrameWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if std::thread::current().id() != self.thread {
            crate::warn!(
                "dropped a wake-up from a foreign thread: completions must be marshaled back to the driving thread"
            );
            return;
        }
        let target = FRAMES
            .try_with(|frames| frames.borrow().get(self.key).and_then(Weak::upgrade))
            .ok()
            .flatten();
        if let Some(target) = target {
            target.resume();
        }
    }
}

fn next_frame_id() -> u64 {
    static ID: AtomicU64 = AtomicU64::new(1);
    ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a [`Task`](crate::Task)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The body is executing on some call stack
    Running,
    /// Suspended at a wait point that can be cancelled
    ParkedCancelable,
    /// Suspended at a wait point that opted out of cancellation
    ParkedUncancelable,
    /// Completed, failed or cancelled
    Finished,
}

/// An eagerly driven, type-erased frame
///
/// Backs both [`Task`](crate::Task) and the orphan reaper.
pub(crate) struct Frame {
    id: u64,
    key: Cell<Option<Key>>,
    waker: Waker,
    body: RefCell<Option<LocalBoxFuture>>,
    state: Cell<TaskState>,
    /// woken while running, poll again before parking
    notified: Cell<bool>,
    cancelled: Cell<bool>,
    wait: RefCell<Option<WaitHandle>>,
    /// an `uncancelable` wrapper returned pending during the last poll
    parked_shielded: Cell<bool>,
    /// key into the reaper's keep-alive table when detached
    keep_alive: Cell<Option<Key>>,
}

impl Frame {
    /// Create a parked frame. It is not polled until resumed.
    pub fn new(body: LocalBoxFuture) -> Rc<Self> {
        let id = next_frame_id();
        let frame = Rc::new_cyclic(|weak: &Weak<Frame>| {
            let weak: Weak<dyn Resume> = weak.clone();
            let (key, waker) = register(weak);
            Frame {
                id,
                key: Cell::new(Some(key)),
                waker,
                body: RefCell::new(Some(body)),
                state: Cell::new(TaskState::ParkedCancelable),
                notified: Cell::new(false),
                cancelled: Cell::new(false),
                wait: RefCell::new(None),
                parked_shielded: Cell::new(false),
                keep_alive: Cell::new(None),
            }
        });
        crate::trace!("frame#{id}: created");
        frame
    }

    /// Create a frame and run it until its first suspension
    pub fn spawn(body: LocalBoxFuture) -> Rc<Self> {
        let frame = Self::new(body);
        Rc::clone(&frame).resume();
        frame
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub fn pending_wait(&self) -> Option<WaitToken> {
        match self.state.get() {
            TaskState::ParkedCancelable | TaskState::ParkedUncancelable => {
                self.wait.borrow().as_ref().map(WaitHandle::token)
            }
            _ => None,
        }
    }

    pub fn set_keep_alive(&self, key: Key) {
        self.keep_alive.set(Some(key));
    }

    #[inline]
    pub fn is_kept_alive(&self) -> bool {
        self.keep_alive.get().is_some()
    }

    /// Give up on a parked frame regardless of the wait it is parked at
    pub fn discard(&self) {
        crate::debug!("frame#{}: discarded while parked", self.id);
        self.state.set(TaskState::Finished);
        self.cancelled.set(true);
        self.release();
    }

    fn record(&self, handle: WaitHandle) {
        let previous = self.wait.replace(Some(handle));
        drop(previous);
    }

    /// Cancel the wait the frame is parked at and release the body
    pub fn cancel(&self) -> Result<(), UsageError> {
        match self.state.get() {
            TaskState::Running => Err(UsageError::Running),
            TaskState::Finished => Err(UsageError::Finished),
            TaskState::ParkedUncancelable => {
                crate::debug!("frame#{}: parked at an uncancelable wait, cancel ignored", self.id);
                Ok(())
            }
            TaskState::ParkedCancelable => {
                crate::debug!("frame#{}: cancelled", self.id);
                self.state.set(TaskState::Finished);
                self.cancelled.set(true);
                let handle = self.wait.take();
                if let Some(handle) = handle {
                    handle.cancel();
                }
                self.release();
                Ok(())
            }
        }
    }

    /// Drop the body and leave the registry. The state must not be `Running`.
    pub fn release(&self) {
        let stale = self.wait.take();
        drop(stale);
        let body = self.body.borrow_mut().take();
        drop(body);
        if let Some(key) = self.key.take() {
            unregister(key);
        }
        if let Some(key) = self.keep_alive.take() {
            crate::reap::release(key);
        }
    }

    fn finish(&self) {
        crate::trace!("frame#{}: finished", self.id);
        self.state.set(TaskState::Finished);
        self.release();
    }
}

impl Resume for Frame {
    fn resume(self: Rc<Self>) {
        match self.state.get() {
            TaskState::Running => {
                // a wait completed inline while we are still being polled
                self.notified.set(true);
                return;
            }
            TaskState::Finished => return,
            TaskState::ParkedCancelable | TaskState::ParkedUncancelable => {}
        }
        let mut cx = Context::from_waker(&self.waker);
        loop {
            self.state.set(TaskState::Running);
            self.notified.set(false);
            self.parked_shielded.set(false);
            let stale = self.wait.take();
            drop(stale);
            let poll = {
                let _enter = Enter::new(Some(Rc::clone(&self)));
                let mut body = self.body.borrow_mut();
                match body.as_mut() {
                    Some(body) => body.as_mut().poll(&mut cx),
                    None => Poll::Ready(()),
                }
            };
            if poll.is_ready() {
                self.finish();
                return;
            }
            if self.notified.get() {
                continue;
            }
            let parked = if self.parked_shielded.get() {
                TaskState::ParkedUncancelable
            } else {
                TaskState::ParkedCancelable
            };
            crate::trace!("frame#{}: parked ({parked:?})", self.id);
            self.state.set(parked);
            return;
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            unregister(key);
        }
    }
}

/// Swaps the current task frame for the duration of a poll
struct Enter {
    previous: Option<Rc<Frame>>,
}

impl Enter {
    fn new(frame: Option<Rc<Frame>>) -> Self {
        let previous = CURRENT.with(|current| current.replace(frame));
        Self { previous }
    }
}

impl Drop for Enter {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT.try_with(|current| current.replace(previous));
    }
}

/// Run `f` with no current task, so waits inside do not park the outer task
pub(crate) fn detached<R>(f: impl FnOnce() -> R) -> R {
    let _enter = Enter::new(None);
    f()
}

/// Poll with `f`, and if it is pending, park the current task as uncancelable.
///
/// Works for any future, including ones that never record a wait handle.
pub(crate) fn shielded<T>(f: impl FnOnce() -> Poll<T>) -> Poll<T> {
    let poll = f();
    if poll.is_pending() {
        CURRENT.with_borrow(|current| {
            if let Some(frame) = current {
                frame.parked_shielded.set(true);
            }
        });
    }
    poll
}

/// Record a pending wait into the task being polled, if there is one.
///
/// `cancel` must force exactly this wait to resolve abnormally.
/// Returns the token issued for the wait.
pub(crate) fn park<F: FnOnce() + 'static>(cancel: F) -> Option<WaitToken> {
    let frame = CURRENT.with_borrow(|current| current.clone())?;
    let token = WaitToken::next();
    crate::trace!("frame#{}: waiting at {token}", frame.id);
    frame.record(WaitHandle::new(token, cancel));
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_frame_leaves_registry() {
        let before = registered_frames();
        let frame = Frame::spawn(Box::pin(async {}));
        assert_eq!(frame.state(), TaskState::Finished);
        assert_eq!(registered_frames(), before);
    }

    #[test]
    fn wake_during_poll_polls_again() {
        let polls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&polls);
        let frame = Frame::spawn(Box::pin(std::future::poll_fn(move |cx| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Poll::Ready(())
        })));
        assert_eq!(polls.get(), 2);
        assert_eq!(frame.state(), TaskState::Finished);
    }

    #[test]
    fn parked_without_handle_can_be_cancelled() {
        let frame = Frame::spawn(Box::pin(std::future::pending::<()>()));
        assert_eq!(frame.state(), TaskState::ParkedCancelable);
        assert!(frame.pending_wait().is_none());
        let before = registered_frames();
        assert_eq!(frame.cancel(), Ok(()));
        assert_eq!(registered_frames(), before - 1);
        assert_eq!(frame.cancel(), Err(UsageError::Finished));
    }
}

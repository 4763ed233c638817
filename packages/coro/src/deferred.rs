use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::rt::{self, Resume};
use crate::slot::Key;

type Body<T> = Pin<Box<dyn Future<Output = crate::Result<T>>>>;

/// Create a [`Deferred`] from an `async` body
///
/// Shorthand for [`Deferred::new`].
#[inline]
pub fn defer<T, F>(body: F) -> Deferred<T>
where
    T: 'static,
    F: Future<Output = crate::Result<T>> + 'static,
{
    Deferred::new(body)
}

/// Lifecycle of a [`Deferred`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredState {
    /// The body has not been polled yet
    NotStarted,
    /// The body ran and is waiting on something
    Suspended,
    /// The result was handed to the consumer
    Completed,
}

/// A lazily started computation with a single consumer
///
/// The body does not run until the `Deferred` is awaited. The first poll runs
/// it inline up to its first suspension, and the awaiting frame becomes the
/// continuation that is resumed when the body completes.
///
/// ```rust
/// # use pistonite_coro as coro;
/// let answer = coro::defer(async { Ok(42) });
/// let task = coro::spawn(async move {
///     let value = answer.await?;
///     coro::Ok(value + 1)
/// });
/// assert_eq!(task.take_result().unwrap().unwrap(), 43);
/// ```
///
/// # Dropping
/// - Before it is awaited, the body is dropped without ever running.
/// - While the body is suspended, it is handed to the orphan reaper, which
///   keeps driving it to completion and discards the result. Whatever the
///   body is registered on unwinds normally instead of dangling.
///
/// # Polling after completion
/// The result is moved out to the consumer. Polling again panics.
#[must_use = "a Deferred does nothing unless awaited"]
pub struct Deferred<T: 'static> {
    frame: Option<Rc<DeferredFrame<T>>>,
}

enum Stage<T> {
    Pending { body: Body<T>, started: bool },
    Completed,
}

struct DeferredFrame<T> {
    key: Cell<Option<Key>>,
    /// wakes whoever is the continuation right now
    waker: Waker,
    stage: RefCell<Stage<T>>,
    continuation: RefCell<Option<Waker>>,
}

impl<T: 'static> Deferred<T> {
    /// Create a not-started `Deferred` from a body
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = crate::Result<T>> + 'static,
    {
        let frame = Rc::new_cyclic(|weak| {
            let weak: std::rc::Weak<dyn Resume> = std::rc::Weak::<DeferredFrame<T>>::clone(weak);
            let (key, waker) = rt::register(weak);
            DeferredFrame {
                key: Cell::new(Some(key)),
                waker,
                stage: RefCell::new(Stage::Pending {
                    body: Box::pin(body),
                    started: false,
                }),
                continuation: RefCell::new(None),
            }
        });
        Self { frame: Some(frame) }
    }

    /// A `Deferred` that completes with `value` as soon as it is awaited
    pub fn ready(value: T) -> Self {
        Self::new(async move { Ok(value) })
    }

    /// A `Deferred` that fails with `error` as soon as it is awaited
    pub fn failed(error: impl Into<crate::Error>) -> Self {
        let error = error.into();
        Self::new(async move { Err(error) })
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> DeferredState {
        let Some(frame) = &self.frame else {
            return DeferredState::Completed;
        };
        match &*frame.stage.borrow() {
            Stage::Pending { started: false, .. } => DeferredState::NotStarted,
            Stage::Pending { started: true, .. } => DeferredState::Suspended,
            Stage::Completed => DeferredState::Completed,
        }
    }

    /// Whether the result has already been retrieved
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.frame.is_none()
    }
}

impl<T: 'static> DeferredFrame<T> {
    fn poll_body(&self, cx: &mut Context<'_>) -> Poll<crate::Result<T>> {
        {
            let mut continuation = self.continuation.borrow_mut();
            let same = continuation
                .as_ref()
                .is_some_and(|waker| waker.will_wake(cx.waker()));
            if !same {
                *continuation = Some(cx.waker().clone());
            }
        }
        let mut stage = self.stage.borrow_mut();
        let Stage::Pending { body, started } = &mut *stage else {
            crate::panicand!(error!("`Deferred` polled after its result was retrieved"));
        };
        if !*started {
            *started = true;
        }
        let mut inner = Context::from_waker(&self.waker);
        // waits inside the body belong to the body, not to the task awaiting us
        let poll = rt::detached(|| body.as_mut().poll(&mut inner));
        if poll.is_ready() {
            *stage = Stage::Completed;
        }
        poll
    }
}

impl<T: 'static> Resume for DeferredFrame<T> {
    fn resume(self: Rc<Self>) {
        let continuation = self.continuation.borrow().clone();
        match continuation {
            Some(waker) => waker.wake(),
            None => crate::trace!("deferred resumed with no continuation"),
        }
    }
}

impl<T> Drop for DeferredFrame<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            rt::unregister(key);
        }
    }
}

impl<T: 'static> Future for Deferred<T> {
    type Output = crate::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(frame) = &this.frame else {
            crate::panicand!(error!("`Deferred` polled after its result was retrieved"));
        };
        match frame.poll_body(cx) {
            Poll::Ready(result) => {
                this.frame = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                let frame = Rc::downgrade(frame);
                rt::park(move || {
                    // stop resuming the cancelled task, dropping the handle
                    // afterwards hands the body to the reaper
                    if let Some(frame) = frame.upgrade() {
                        frame.continuation.take();
                    }
                });
                Poll::Pending
            }
        }
    }
}

impl<T: 'static> Drop for Deferred<T> {
    fn drop(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        let started = matches!(
            &*frame.stage.borrow(),
            Stage::Pending { started: true, .. }
        );
        if !started {
            crate::trace!("deferred dropped before it was started");
            return;
        }
        let redirect = Rc::clone(&frame);
        crate::reap::adopt(
            std::future::poll_fn(move |cx| frame.poll_body(cx).map_ok(|_| ())),
            move |waker| {
                *redirect.continuation.borrow_mut() = Some(waker.clone());
            },
        );
    }
}

impl<T: 'static> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::rt;

/// Adapt a callback-driven operation into a wait point
///
/// On first poll, `adapter` is called with a [`Completer`]. The adapter must
/// arrange for exactly one eventual call to [`Completer::complete`], which
/// resumes the waiting computation inline, from wherever it is called.
///
/// If `complete` is called synchronously inside the adapter, the bridge is
/// ready in the same poll and the caller never suspends.
///
/// ```rust
/// # use pistonite_coro as coro;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let pending = Rc::new(RefCell::new(None));
/// let task = coro::spawn({
///     let pending = Rc::clone(&pending);
///     async move {
///         let n: u32 = coro::bridge(move |done| *pending.borrow_mut() = Some(done)).await;
///         coro::Ok(n * 2)
///     }
/// });
/// assert!(!task.is_finished());
/// let done = pending.borrow_mut().take().unwrap();
/// done.complete(21);
/// assert_eq!(task.take_result().unwrap().unwrap(), 42);
/// ```
///
/// # Threads
/// [`Completer`] is not `Send`. Foreign threads have to marshal completion
/// back onto the thread that drives the computation (for example, through
/// a channel the driving loop drains).
#[inline]
pub fn bridge<T, F>(adapter: F) -> Bridge<T, F>
where
    F: FnOnce(Completer<T>),
{
    Bridge {
        adapter: Some(adapter),
        shared: None,
        done: false,
    }
}

/// Future returned by [`bridge`]
#[must_use = "futures do nothing unless awaited"]
pub struct Bridge<T, F> {
    adapter: Option<F>,
    shared: Option<Rc<Shared<T>>>,
    done: bool,
}

// the adapter is only ever moved out, never pinned
impl<T, F> Unpin for Bridge<T, F> {}

struct Shared<T> {
    value: RefCell<Option<T>>,
    waker: RefCell<Option<Waker>>,
    /// false once the waiting side is cancelled or dropped
    alive: Cell<bool>,
}

/// Write-once completion handle given to a [`bridge`] adapter
pub struct Completer<T> {
    shared: Rc<Shared<T>>,
    completed: bool,
}

impl<T> Completer<T> {
    /// Whether anyone is still waiting for the completion
    ///
    /// Becomes `false` when the waiting task is cancelled or the bridge is
    /// dropped. Completing a dead bridge is a no-op.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.get()
    }

    /// Deliver the value and resume the waiting computation inline
    pub fn complete(mut self, value: T) {
        self.completed = true;
        if !self.shared.alive.get() {
            crate::debug!("bridge completed after it was torn down, value dropped");
            return;
        }
        *self.shared.value.borrow_mut() = Some(value);
        let waker = self.shared.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.completed && self.shared.alive.get() {
            crate::warn!("bridge completer dropped without completing, the waiting computation stays parked");
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T: 'static, F> Bridge<T, F> {
    fn park(shared: &Rc<Shared<T>>) {
        let shared = Rc::downgrade(shared);
        rt::park(move || {
            if let Some(shared) = shared.upgrade() {
                shared.alive.set(false);
                shared.waker.borrow_mut().take();
            }
        });
    }
}

impl<T: 'static, F> Future for Bridge<T, F>
where
    F: FnOnce(Completer<T>),
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if this.done {
            crate::panicand!(error!("`Bridge` polled after completion"));
        }
        let shared = match &this.shared {
            Some(shared) => Rc::clone(shared),
            None => {
                let shared = Rc::new(Shared {
                    value: RefCell::new(None),
                    // no waker yet: an inline completion has nobody to resume
                    waker: RefCell::new(None),
                    alive: Cell::new(true),
                });
                this.shared = Some(Rc::clone(&shared));
                if let Some(adapter) = this.adapter.take() {
                    adapter(Completer {
                        shared: Rc::clone(&shared),
                        completed: false,
                    });
                }
                shared
            }
        };
        let value = shared.value.borrow_mut().take();
        if let Some(value) = value {
            this.done = true;
            this.shared = None;
            return Poll::Ready(value);
        }
        {
            let mut waker = shared.waker.borrow_mut();
            let same = waker.as_ref().is_some_and(|w| w.will_wake(cx.waker()));
            if !same {
                *waker = Some(cx.waker().clone());
            }
        }
        Self::park(&shared);
        Poll::Pending
    }
}

impl<T, F> Drop for Bridge<T, F> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.alive.set(false);
            shared.waker.borrow_mut().take();
        }
    }
}

use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// A suspension source in its plain three-step shape
///
/// Implement this for things that are not futures but can tell when they
/// are ready, remember who to wake, and hand out a result once. Wrap with
/// [`AnyAwait::from_awaitable`] to await it.
pub trait Awaitable {
    type Output;

    /// Whether [`extract`](Self::extract) can be called now
    fn is_ready(&self) -> bool;

    /// Remember `waker`, and wake it once ready
    fn register(&mut self, waker: &Waker);

    /// Take the result. Only called once, after `is_ready` returned `true`.
    fn extract(&mut self) -> Self::Output;
}

/// Type-erased, move-only wait point
///
/// Owns any suspension source with output `T` behind dynamic dispatch, so
/// heterogeneous sources can be stored in one collection or passed through
/// one interface. There is no `Clone`: exactly one owner can drive it.
///
/// ```rust
/// # use pistonite_coro as coro;
/// let notifier = coro::Notifier::<u32>::new();
/// let sources: Vec<coro::AnyAwait<u32>> = vec![
///     coro::AnyAwait::new(async { 1 }),
///     coro::AnyAwait::new({
///         let wait = notifier.wait();
///         async move { wait.await.unwrap_or_default() }
///     }),
/// ];
/// let task = coro::spawn(async move {
///     let mut sum = 0;
///     for source in sources {
///         sum += source.await;
///     }
///     coro::Ok(sum)
/// });
/// notifier.notify(41);
/// assert_eq!(task.take_result().unwrap().unwrap(), 42);
/// ```
#[must_use = "futures do nothing unless awaited"]
pub struct AnyAwait<T> {
    inner: Pin<Box<dyn Future<Output = T>>>,
}

impl<T> AnyAwait<T> {
    /// Erase a future
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// Erase an [`Awaitable`]
    pub fn from_awaitable<A>(awaitable: A) -> Self
    where
        A: Awaitable<Output = T> + 'static,
    {
        Self::new(FromAwaitable {
            inner: awaitable,
            done: false,
        })
    }
}

impl<T> Future for AnyAwait<T> {
    type Output = T;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for AnyAwait<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyAwait").finish_non_exhaustive()
    }
}

impl<T: 'static> From<crate::Deferred<T>> for AnyAwait<crate::Result<T>> {
    fn from(value: crate::Deferred<T>) -> Self {
        Self::new(value)
    }
}

impl<T: 'static> From<crate::Wait<T>> for AnyAwait<Result<T, crate::Abandoned>> {
    fn from(value: crate::Wait<T>) -> Self {
        Self::new(value)
    }
}

struct FromAwaitable<A> {
    inner: A,
    done: bool,
}

// `A` is only accessed through `&mut`, never pinned
impl<A> Unpin for FromAwaitable<A> {}

impl<A: Awaitable> Future for FromAwaitable<A> {
    type Output = A::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<A::Output> {
        let this = self.get_mut();
        if this.done {
            crate::panicand!(error!("`AnyAwait` polled after completion"));
        }
        if !this.inner.is_ready() {
            this.inner.register(cx.waker());
            // it may have become ready while registering
            if !this.inner.is_ready() {
                return Poll::Pending;
            }
        }
        this.done = true;
        Poll::Ready(this.inner.extract())
    }
}

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::rt;

/// Delivered to waiters of a [`Notifier`] that is dropped before it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::Error)]
#[display("the notifier was dropped before it fired")]
pub struct Abandoned;

/// A multi-waiter event source
///
/// Any number of waiters can [`wait`](Self::wait) on the notifier. A call
/// to [`notify`](Self::notify) resumes all of them, in the order they
/// registered, each with its own copy of the value.
///
/// The waiter list is swapped out before anyone is resumed, so waiters that
/// register while a firing is in progress are left for the next firing.
///
/// When the notifier is dropped, remaining waiters resolve to [`Abandoned`].
///
/// ```rust
/// # use pistonite_coro as coro;
/// let notifier = coro::Notifier::<String>::new();
/// let listener = notifier.listener();
/// let task = coro::spawn(async move {
///     let word = listener.wait().await?;
///     coro::Ok(word.to_uppercase())
/// });
/// assert_eq!(notifier.waiter_count(), 1);
/// notifier.notify("hello".to_string());
/// assert_eq!(task.take_result().unwrap().unwrap(), "HELLO");
/// ```
pub struct Notifier<T> {
    inner: Rc<RefCell<Waiters<T>>>,
}

/// A weak handle to wait on a [`Notifier`]
///
/// Cloning is cheap. A listener does not keep the notifier alive, so bodies
/// can hold one across waits without preventing the notifier from being
/// dropped (and its waiters abandoned).
pub struct Listener<T> {
    inner: Weak<RefCell<Waiters<T>>>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Waiters in registration order
///
/// A firing detaches the whole list and starts a new round, so a slot is
/// addressed by the round it registered in plus its own position. Removal
/// leaves a hole, and holes are compacted away once they outnumber the
/// live waiters.
struct Waiters<T> {
    round: u64,
    slots: Vec<Option<Rc<Slot<T>>>>,
    live: usize,
    closed: bool,
}

struct Slot<T> {
    /// position in `Waiters::slots`, kept current by compaction
    index: Cell<usize>,
    waker: RefCell<Option<Waker>>,
    delivery: RefCell<Delivery<T>>,
}

enum Delivery<T> {
    Pending,
    Fired(T),
    Abandoned,
    /// the waiting side went away
    Cancelled,
    Taken,
}

impl<T> Waiters<T> {
    const fn new() -> Self {
        Self {
            round: 0,
            slots: Vec::new(),
            live: 0,
            closed: false,
        }
    }

    /// Register a slot, returning the round it belongs to
    fn push(&mut self, slot: Rc<Slot<T>>) -> u64 {
        slot.index.set(self.slots.len());
        self.slots.push(Some(slot));
        self.live += 1;
        self.round
    }

    fn remove(&mut self, round: u64, slot: &Rc<Slot<T>>) -> bool {
        if round != self.round {
            return false;
        }
        let Some(entry) = self.slots.get_mut(slot.index.get()) else {
            return false;
        };
        if !entry.as_ref().is_some_and(|current| Rc::ptr_eq(current, slot)) {
            return false;
        }
        *entry = None;
        self.live -= 1;
        if self.live == 0 {
            // nothing left to keep in order, start fresh
            self.slots.clear();
            self.round += 1;
        } else if self.slots.len() > 2 * self.live {
            self.compact();
        }
        true
    }

    /// Drop the holes, keeping registration order
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        for (index, slot) in self.slots.iter().flatten().enumerate() {
            slot.index.set(index);
        }
    }

    /// Take every registered slot, in registration order
    fn detach(&mut self) -> Vec<Rc<Slot<T>>> {
        let slots = std::mem::take(&mut self.slots);
        self.round += 1;
        self.live = 0;
        slots.into_iter().flatten().collect()
    }
}

impl<T> Slot<T> {
    fn new(waker: &Waker) -> Self {
        Self {
            index: Cell::new(0),
            waker: RefCell::new(Some(waker.clone())),
            delivery: RefCell::new(Delivery::Pending),
        }
    }

    /// Resolve a pending slot and resume its waiter. Returns false if
    /// the slot was already resolved.
    fn resolve(&self, delivery: Delivery<T>) -> bool {
        {
            let mut current = self.delivery.borrow_mut();
            if !matches!(*current, Delivery::Pending) {
                return false;
            }
            *current = delivery;
        }
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Notifier<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Waiters::new())),
        }
    }

    /// Get a weak handle for waiting on this notifier
    pub fn listener(&self) -> Listener<T> {
        Listener {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Wait for the next firing
    pub fn wait(&self) -> Wait<T> {
        Wait::new(Rc::downgrade(&self.inner))
    }

    /// Number of waiters that will be resumed by the next firing
    pub fn waiter_count(&self) -> usize {
        self.inner.borrow().live
    }
}

impl<T: Clone> Notifier<T> {
    /// Resume every waiter registered so far with a copy of `value`.
    ///
    /// The last waiter receives `value` itself. Returns the number of
    /// waiters that were resumed.
    pub fn notify(&self, value: T) -> usize {
        let detached = self.inner.borrow_mut().detach();
        let count = detached.len();
        crate::trace!("notify: firing {count} waiter(s)");
        let mut value = Some(value);
        let mut resumed = 0;
        for (i, slot) in detached.into_iter().enumerate() {
            let next = if i + 1 == count {
                value.take()
            } else {
                value.clone()
            };
            let Some(next) = next else {
                break;
            };
            if slot.resolve(Delivery::Fired(next)) {
                resumed += 1;
            }
        }
        resumed
    }
}

impl Notifier<()> {
    /// Fire the no-payload notifier
    #[inline]
    pub fn signal(&self) -> usize {
        self.notify(())
    }
}

impl<T> Drop for Notifier<T> {
    fn drop(&mut self) {
        let detached = {
            let mut waiters = self.inner.borrow_mut();
            waiters.closed = true;
            waiters.detach()
        };
        if !detached.is_empty() {
            crate::debug!("notifier dropped with {} waiter(s), abandoning them", detached.len());
        }
        for slot in detached {
            slot.resolve(Delivery::Abandoned);
        }
    }
}

impl<T> std::fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

impl<T> Listener<T> {
    /// Wait for the next firing. Resolves to [`Abandoned`] right away
    /// if the notifier is already gone.
    pub fn wait(&self) -> Wait<T> {
        Wait::new(Weak::clone(&self.inner))
    }

    /// Whether the notifier was dropped
    pub fn is_closed(&self) -> bool {
        match self.inner.upgrade() {
            None => true,
            Some(inner) => inner.borrow().closed,
        }
    }
}

/// Future returned by [`Notifier::wait`] and [`Listener::wait`]
#[must_use = "futures do nothing unless awaited"]
pub struct Wait<T> {
    inner: Weak<RefCell<Waiters<T>>>,
    registered: Option<(u64, Rc<Slot<T>>)>,
    done: bool,
}

impl<T> Wait<T> {
    fn new(inner: Weak<RefCell<Waiters<T>>>) -> Self {
        Self {
            inner,
            registered: None,
            done: false,
        }
    }

    fn register(&mut self, cx: &mut Context<'_>) -> Poll<Result<T, Abandoned>>
    where
        T: 'static,
    {
        let Some(inner) = self.inner.upgrade() else {
            self.done = true;
            return Poll::Ready(Err(Abandoned));
        };
        let round = {
            let mut waiters = inner.borrow_mut();
            if waiters.closed {
                self.done = true;
                return Poll::Ready(Err(Abandoned));
            }
            let slot = Rc::new(Slot::new(cx.waker()));
            let round = waiters.push(Rc::clone(&slot));
            self.registered = Some((round, slot));
            round
        };
        if let Some((_, slot)) = &self.registered {
            self.park(round, slot);
        }
        Poll::Pending
    }

    fn park(&self, round: u64, slot: &Rc<Slot<T>>)
    where
        T: 'static,
    {
        let inner = Weak::clone(&self.inner);
        let slot = Rc::clone(slot);
        rt::park(move || {
            // mark first, so a firing that already detached us skips the slot
            *slot.delivery.borrow_mut() = Delivery::Cancelled;
            slot.waker.borrow_mut().take();
            if let Some(inner) = inner.upgrade() {
                inner.borrow_mut().remove(round, &slot);
            }
        });
    }
}

impl<T: 'static> Future for Wait<T> {
    type Output = Result<T, Abandoned>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            crate::panicand!(error!("notifier `Wait` polled after completion"));
        }
        let (round, slot) = match &this.registered {
            Some((round, slot)) => (*round, Rc::clone(slot)),
            None => return this.register(cx),
        };
        let delivery = {
            let mut delivery = slot.delivery.borrow_mut();
            match *delivery {
                Delivery::Pending => None,
                _ => Some(std::mem::replace(&mut *delivery, Delivery::Taken)),
            }
        };
        let Some(delivery) = delivery else {
            {
                let mut waker = slot.waker.borrow_mut();
                let same = waker.as_ref().is_some_and(|w| w.will_wake(cx.waker()));
                if !same {
                    *waker = Some(cx.waker().clone());
                }
            }
            this.park(round, &slot);
            return Poll::Pending;
        };
        this.done = true;
        this.registered = None;
        match delivery {
            Delivery::Fired(value) => Poll::Ready(Ok(value)),
            _ => Poll::Ready(Err(Abandoned)),
        }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        let Some((round, slot)) = self.registered.take() else {
            return;
        };
        {
            let mut delivery = slot.delivery.borrow_mut();
            if !matches!(*delivery, Delivery::Pending) {
                return;
            }
            *delivery = Delivery::Cancelled;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().remove(round, &slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Rc<Slot<u32>> {
        Rc::new(Slot::new(Waker::noop()))
    }

    #[test]
    fn detach_keeps_registration_order() {
        let mut waiters = Waiters::new();
        let a = slot();
        let b = slot();
        let c = slot();
        waiters.push(Rc::clone(&a));
        let round = waiters.push(Rc::clone(&b));
        waiters.push(Rc::clone(&c));
        assert!(waiters.remove(round, &b));
        let detached = waiters.detach();
        assert_eq!(detached.len(), 2);
        assert!(Rc::ptr_eq(&detached[0], &a));
        assert!(Rc::ptr_eq(&detached[1], &c));
        assert_eq!(waiters.live, 0);
    }

    #[test]
    fn slot_from_previous_round_is_rejected() {
        let mut waiters = Waiters::new();
        let old = slot();
        let r0 = waiters.push(Rc::clone(&old));
        let _ = waiters.detach();
        let new = slot();
        let r1 = waiters.push(Rc::clone(&new));
        assert_eq!(old.index.get(), new.index.get());
        assert_ne!(r0, r1);
        assert!(!waiters.remove(r0, &old));
        assert!(!waiters.remove(r1, &old));
        assert_eq!(waiters.live, 1);
        assert!(waiters.remove(r1, &new));
        assert_eq!(waiters.live, 0);
    }

    #[test]
    fn holes_are_compacted_in_order() {
        let mut waiters = Waiters::new();
        let slots = (0..8).map(|_| slot()).collect::<Vec<_>>();
        let round = slots
            .iter()
            .map(|s| waiters.push(Rc::clone(s)))
            .last()
            .unwrap_or_default();
        for s in &slots[..6] {
            assert!(waiters.remove(round, s));
        }
        assert_eq!(waiters.live, 2);
        assert!(waiters.slots.len() <= 2 * waiters.live);
        // survivors are still addressable after compaction
        assert!(waiters.remove(round, &slots[7]));
        let detached = waiters.detach();
        assert_eq!(detached.len(), 1);
        assert!(Rc::ptr_eq(&detached[0], &slots[6]));
    }

    #[test]
    fn cancelled_waiters_do_not_accumulate() {
        let notifier = Notifier::<u32>::new();
        let stays = {
            let listener = notifier.listener();
            crate::spawn(async move { crate::Ok(listener.wait().await?) })
        };
        for _ in 0..10_000 {
            let listener = notifier.listener();
            let task = crate::spawn(async move { crate::Ok(listener.wait().await?) });
            assert_eq!(task.cancel(), Ok(()));
        }
        assert_eq!(notifier.waiter_count(), 1);
        assert!(notifier.inner.borrow().slots.len() <= 2);
        assert_eq!(notifier.notify(4), 1);
        assert_eq!(stays.take_result().unwrap().unwrap(), 4);
    }

    #[test]
    fn resolve_only_once() {
        let s = slot();
        assert!(s.resolve(Delivery::Fired(1)));
        assert!(!s.resolve(Delivery::Fired(2)));
        assert!(!s.resolve(Delivery::Abandoned));
        assert!(matches!(*s.delivery.borrow(), Delivery::Fired(1)));
    }
}

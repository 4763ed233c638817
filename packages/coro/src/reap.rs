//! Orphan reaper
//!
//! Frames that lost their owner but still have work pending are parked in
//! a thread-local keep-alive table. A frame leaves the table when it
//! finishes, at which point it is dropped.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;

use crate::Abandoned;
use crate::rt::{Frame, Resume, TaskState};
use crate::slot::{Key, Slots};

thread_local! {
    static ORPHANS: RefCell<Slots<Rc<Frame>>> = const { RefCell::new(Slots::new()) };
}

/// Keep a frame alive until it finishes
pub(crate) fn keep_alive(frame: Rc<Frame>) {
    if frame.state() == TaskState::Finished {
        return;
    }
    crate::trace!("frame#{}: kept alive by the reaper", frame.id());
    let key = ORPHANS.with_borrow_mut(|orphans| orphans.insert(Rc::clone(&frame)));
    frame.set_keep_alive(key);
}

/// Called by a kept-alive frame when it finishes
pub(crate) fn release(key: Key) {
    let frame = ORPHANS
        .try_with(|orphans| orphans.borrow_mut().remove(key))
        .ok()
        .flatten();
    // dropped outside of the table borrow
    drop(frame);
}

/// Number of frames currently kept alive on this thread
pub fn orphan_count() -> usize {
    ORPHANS.try_with(|orphans| orphans.borrow().len()).unwrap_or_default()
}

/// Adopt an unfinished body whose owner is gone.
///
/// `redirect` is called with the reaper's waker, and must make the body's
/// future wake-ups reach the reaper instead of the old owner.
/// The result is discarded. Abandonment is the expected way for an orphan to
/// end when whatever it waited on is torn down, so it is not reported.
pub(crate) fn adopt<F, R>(body: F, redirect: R)
where
    F: Future<Output = crate::Result<()>> + 'static,
    R: FnOnce(&Waker),
{
    if !crate::rt::available() || ORPHANS.try_with(|_| ()).is_err() {
        // thread teardown, nothing can drive the orphan anymore
        return;
    }
    let reaper = Frame::new(Box::pin(async move {
        match body.await {
            Ok(()) => crate::trace!("orphan completed, result discarded"),
            Err(e) if e.is::<Abandoned>() => crate::trace!("orphan abandoned"),
            Err(e) => crate::debug!("orphan failed, error discarded: {e:?}"),
        }
    }));
    crate::debug!("frame#{}: adopted an orphaned deferred", reaper.id());
    redirect(reaper.waker());
    // a wake-up may have reached the old owner without a poll following it
    Rc::clone(&reaper).resume();
    keep_alive(reaper);
}

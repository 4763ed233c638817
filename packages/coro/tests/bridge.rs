use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::mpsc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use pistonite_coro as coro;

#[test]
fn synchronous_completion_does_not_suspend() {
    let calls = Rc::new(Cell::new(0));
    let task = {
        let calls = Rc::clone(&calls);
        coro::spawn(async move {
            let x: u32 = coro::bridge(move |done| {
                calls.set(calls.get() + 1);
                done.complete(7);
            })
            .await;
            coro::Ok(x)
        })
    };
    // resumed before `spawn` returned
    assert!(task.is_finished());
    assert_eq!(calls.get(), 1);
    assert_eq!(task.take_result().unwrap().unwrap(), 7);
}

#[test]
fn synchronous_completion_inside_deferred() {
    let mut deferred = coro::defer(async {
        let x = coro::bridge(|done| done.complete(3u8)).await;
        coro::Ok(x)
    });
    let mut cx = Context::from_waker(Waker::noop());
    match Pin::new(&mut deferred).poll(&mut cx) {
        Poll::Ready(Ok(3)) => {}
        other => panic!("unexpected poll result: {other:?}"),
    }
}

#[test]
fn completion_resumes_inline() {
    let pending = Rc::new(RefCell::new(None));
    let log = Rc::new(RefCell::new(Vec::new()));
    let task = {
        let pending = Rc::clone(&pending);
        let log = Rc::clone(&log);
        coro::spawn(async move {
            let word: &str = coro::bridge(move |done| *pending.borrow_mut() = Some(done)).await;
            log.borrow_mut().push(word);
            coro::Ok(())
        })
    };
    assert!(!task.is_finished());
    let done = pending.borrow_mut().take().unwrap();
    log.borrow_mut().push("before");
    done.complete("resumed");
    log.borrow_mut().push("after");
    assert_eq!(*log.borrow(), ["before", "resumed", "after"]);
    assert!(task.is_finished());
}

#[test]
fn completions_marshaled_from_worker_threads() {
    let (send, recv) = mpsc::channel::<(usize, u64)>();
    let pending: Rc<RefCell<BTreeMap<usize, coro::Completer<u64>>>> = Rc::default();
    let tasks = [30u64, 10, 20]
        .into_iter()
        .enumerate()
        .map(|(id, millis)| {
            let pending = Rc::clone(&pending);
            let send = send.clone();
            coro::spawn(async move {
                let slept = coro::bridge(move |done| {
                    pending.borrow_mut().insert(id, done);
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(millis));
                        let _ = send.send((id, millis));
                    });
                })
                .await;
                coro::Ok(slept)
            })
        })
        .collect::<Vec<_>>();
    drop(send);
    assert_eq!(pending.borrow().len(), 3);

    let mut order = Vec::new();
    while let Ok((id, millis)) = recv.recv() {
        let done = pending.borrow_mut().remove(&id);
        if let Some(done) = done {
            done.complete(millis);
            order.push(id);
        }
    }
    assert_eq!(order.len(), 3);
    for (task, expected) in tasks.iter().zip([30, 10, 20]) {
        assert_eq!(task.take_result().unwrap().unwrap(), expected);
    }
}

#[test]
fn dropped_completer_leaves_waiter_parked() {
    let task = coro::spawn(async {
        let x: u32 = coro::bridge(drop).await;
        coro::Ok(x)
    });
    assert_eq!(task.state(), coro::TaskState::ParkedCancelable);
    assert!(task.pending_wait().is_some());
    assert_eq!(task.cancel(), Ok(()));
}

#[test]
fn dropping_the_bridge_kills_the_completer() {
    let pending = Rc::new(RefCell::new(None));
    let mut bridge = {
        let pending = Rc::clone(&pending);
        coro::bridge(move |done| *pending.borrow_mut() = Some(done))
    };
    let mut cx = Context::from_waker(Waker::noop());
    assert!(Pin::new(&mut bridge).poll(&mut cx).is_pending());
    let done: coro::Completer<String> = pending.borrow_mut().take().unwrap();
    assert!(done.is_alive());
    drop(bridge);
    assert!(!done.is_alive());
    done.complete("nobody listens".to_string());
}

use std::cell::RefCell;
use std::rc::Rc;

use pistonite_coro as coro;

type Log = Rc<RefCell<Vec<String>>>;

fn waiter(name: &'static str, listener: coro::Listener<String>, log: &Log) -> coro::Task<()> {
    let log = Rc::clone(log);
    coro::spawn(async move {
        let value = listener.wait().await?;
        log.borrow_mut().push(format!("{name}:{value}"));
        coro::Ok(())
    })
}

#[test]
fn fires_in_registration_order() {
    let notifier = coro::Notifier::new();
    let log = Log::default();
    let w1 = waiter("W1", notifier.listener(), &log);
    let w2 = waiter("W2", notifier.listener(), &log);
    let w3 = waiter("W3", notifier.listener(), &log);
    assert_eq!(notifier.waiter_count(), 3);

    assert_eq!(notifier.notify("X".to_string()), 3);
    assert_eq!(*log.borrow(), ["W1:X", "W2:X", "W3:X"]);
    for task in [&w1, &w2, &w3] {
        assert!(task.is_finished());
        assert!(task.take_result().unwrap().is_ok());
    }

    assert_eq!(notifier.notify("Y".to_string()), 0);
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn waiter_registered_during_firing_waits_for_next_one() {
    let notifier = coro::Notifier::new();
    let log = Log::default();
    let repeater = {
        let listener = notifier.listener();
        let log = Rc::clone(&log);
        coro::spawn(async move {
            for _ in 0..2 {
                let value = listener.wait().await?;
                log.borrow_mut().push(format!("R:{value}"));
            }
            coro::Ok(())
        })
    };
    let once = waiter("W", notifier.listener(), &log);

    assert_eq!(notifier.notify("X".to_string()), 2);
    assert_eq!(*log.borrow(), ["R:X", "W:X"]);
    // the repeater registered again while it was being resumed
    assert_eq!(notifier.waiter_count(), 1);
    assert!(!repeater.is_finished());
    assert!(once.is_finished());

    assert_eq!(notifier.notify("Y".to_string()), 1);
    assert_eq!(*log.borrow(), ["R:X", "W:X", "R:Y"]);
    assert!(repeater.is_finished());
}

#[test]
fn nested_notify_only_reaches_new_waiters() {
    let notifier = Rc::new(coro::Notifier::new());
    let log = Log::default();
    let spawned = Rc::new(RefCell::new(Vec::new()));
    let first = {
        let notifier = Rc::clone(&notifier);
        let listener = notifier.listener();
        let log = Rc::clone(&log);
        let spawned = Rc::clone(&spawned);
        coro::spawn(async move {
            let value = listener.wait().await?;
            log.borrow_mut().push(format!("W1:{value}"));
            let late = waiter("W3", notifier.listener(), &log);
            spawned.borrow_mut().push(late);
            notifier.notify("nested".to_string());
            coro::Ok(())
        })
    };
    let second = waiter("W2", notifier.listener(), &log);

    assert_eq!(notifier.notify("X".to_string()), 2);
    assert_eq!(*log.borrow(), ["W1:X", "W3:nested", "W2:X"]);
    assert!(first.is_finished());
    assert!(second.is_finished());
    assert!(spawned.borrow().iter().all(coro::Task::is_finished));
}

#[test]
fn dropping_notifier_abandons_every_waiter() {
    let notifier = coro::Notifier::<u32>::new();
    let abandoned = Rc::new(RefCell::new(0));
    let tasks = (0..3)
        .map(|_| {
            let listener = notifier.listener();
            let abandoned = Rc::clone(&abandoned);
            coro::spawn(async move {
                match listener.wait().await {
                    Err(coro::Abandoned) => *abandoned.borrow_mut() += 1,
                    Ok(x) => coro::bail!("unexpected value {x}"),
                }
                coro::Ok(())
            })
        })
        .collect::<Vec<_>>();

    drop(notifier);
    assert_eq!(*abandoned.borrow(), 3);
    for task in tasks {
        assert!(task.is_finished());
        assert!(task.take_result().unwrap().is_ok());
    }
}

#[test]
fn abandonment_propagates_as_error() {
    let notifier = coro::Notifier::<u32>::new();
    let listener = notifier.listener();
    let task = coro::spawn(async move {
        let value = listener.wait().await?;
        coro::Ok(value)
    });
    assert!(!listener_closed(&notifier));
    drop(notifier);
    let error = task.take_result().unwrap().unwrap_err();
    assert!(error.downcast_ref::<coro::Abandoned>().is_some());
}

fn listener_closed<T>(notifier: &coro::Notifier<T>) -> bool {
    notifier.listener().is_closed()
}

#[test]
fn waiting_on_dropped_notifier_resolves_immediately() {
    let notifier = coro::Notifier::<u32>::new();
    let listener = notifier.listener();
    drop(notifier);
    assert!(listener.is_closed());
    let task = coro::spawn(async move { listener.wait().await.map_err(coro::Error::from) });
    assert!(task.is_finished());
    assert!(task.take_result().unwrap().is_err());
}

#[test]
fn signal_without_payload() {
    let signal = coro::Notifier::<()>::new();
    let listener = signal.listener();
    let count = Rc::new(RefCell::new(0));
    let task = {
        let count = Rc::clone(&count);
        coro::spawn(async move {
            loop {
                if listener.wait().await.is_err() {
                    return coro::Ok(());
                }
                *count.borrow_mut() += 1;
            }
        })
    };
    assert_eq!(signal.signal(), 1);
    assert_eq!(signal.signal(), 1);
    assert_eq!(*count.borrow(), 2);
    drop(signal);
    assert!(task.is_finished());
    assert!(task.take_result().unwrap().is_ok());
}

#[test]
fn dropping_a_pending_wait_removes_its_slot() {
    let notifier = coro::Notifier::<u32>::new();
    let task = {
        let listener = notifier.listener();
        coro::spawn(async move {
            let value = listener.wait().await?;
            coro::Ok(value)
        })
    };
    let other = {
        let listener = notifier.listener();
        coro::spawn(async move {
            let value = listener.wait().await?;
            coro::Ok(value)
        })
    };
    assert_eq!(notifier.waiter_count(), 2);
    drop(task);
    assert_eq!(notifier.waiter_count(), 1);
    assert_eq!(notifier.notify(9), 1);
    assert_eq!(other.take_result().unwrap().unwrap(), 9);
}

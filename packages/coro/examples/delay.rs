use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use pistonite_coro as coro;
use coro::Context as _;

#[derive(clap::Parser)]
struct Args {
    #[clap(flatten)]
    flags: coro::cli::Flags,
    /// Length of one tick, in milliseconds
    #[clap(short, long, default_value_t = 200)]
    tick: u64,
}
impl AsRef<coro::cli::Flags> for Args {
    fn as_ref(&self) -> &coro::cli::Flags {
        &self.flags
    }
}

/// Timers backed by worker threads
///
/// Each sleep starts a thread that reports back over a channel. The driving
/// loop receives the reports and completes the matching bridge on the
/// main thread.
struct Timers {
    send: mpsc::Sender<usize>,
    recv: mpsc::Receiver<usize>,
    pending: RefCell<BTreeMap<usize, coro::Completer<()>>>,
    next_id: Cell<usize>,
}

impl Timers {
    fn new() -> Self {
        let (send, recv) = mpsc::channel();
        Self {
            send,
            recv,
            pending: RefCell::default(),
            next_id: Cell::new(0),
        }
    }

    fn sleep(self: &Rc<Self>, duration: Duration) -> impl Future<Output = ()> + use<> {
        let timers = Rc::clone(self);
        coro::bridge(move |done| {
            let id = timers.next_id.get();
            timers.next_id.set(id + 1);
            timers.pending.borrow_mut().insert(id, done);
            let send = timers.send.clone();
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                let _ = send.send(id);
            });
        })
    }

    /// Complete timers as they fire, until none is pending
    fn run(&self) -> coro::Result<()> {
        while !self.pending.borrow().is_empty() {
            let id = coro::check!(self.recv.recv(), "timer threads disconnected")?;
            let done = self.pending.borrow_mut().remove(&id);
            let Some(done) = done else {
                continue;
            };
            if !done.is_alive() {
                coro::info!("timer {id} fired, but nobody is waiting anymore");
                continue;
            }
            coro::debug!("timer {id} fired");
            done.complete(());
        }
        Ok(())
    }
}

/// Run with cargo run --example delay --features cli
fn main() -> std::process::ExitCode {
    coro::cli::run(main_internal)
}

fn main_internal(args: Args) -> coro::Result<()> {
    let timers = Rc::new(Timers::new());
    let tick = Duration::from_millis(args.tick);

    let countdown = {
        let timers = Rc::clone(&timers);
        coro::spawn(async move {
            for i in (1..=3).rev() {
                coro::info!("countdown: {i}");
                timers.sleep(tick).await;
            }
            coro::info!("countdown: liftoff");
            coro::Ok(())
        })
    };

    let slow = {
        let timers = Rc::clone(&timers);
        coro::spawn(async move {
            coro::info!("slow: sleeping for 10 ticks");
            timers.sleep(tick * 10).await;
            coro::warn!("slow: woke up");
            coro::Ok(())
        })
    };

    let canceller = {
        let timers = Rc::clone(&timers);
        coro::spawn(async move {
            timers.sleep(tick * 2).await;
            coro::info!("canceller: cancelling the slow task at {:?}", slow.pending_wait());
            slow.cancel()?;
            coro::ensure!(slow.is_cancelled(), "slow task should be cancelled");
            coro::Ok(())
        })
    };

    let sum = {
        let timers = Rc::clone(&timers);
        let after = move |ticks: u32, value: u32| {
            let timers = Rc::clone(&timers);
            coro::defer(async move {
                timers.sleep(tick * ticks).await;
                coro::Ok(value)
            })
        };
        coro::spawn(async move {
            let a = after(1, 20);
            let b = after(4, 22);
            let total = a.await? + b.await?;
            coro::info!("sum: {total}");
            coro::Ok(total)
        })
    };

    timers.run()?;

    for (name, task) in [("countdown", &countdown), ("canceller", &canceller)] {
        let result = task
            .take_result()
            .with_context(|| format!("{name} did not finish"))?;
        coro::check!(result, "{name} failed")?;
    }
    let total = sum.take_result().context("sum did not finish")??;
    coro::ensure!(total == 42, "unexpected sum {total}");
    Ok(())
}

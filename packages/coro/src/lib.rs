//! Cooperative, single-threaded suspension primitives
//!
//! # General Principal
//! `coro` has no executor and no thread pool. Suspended computations are
//! ordinary Rust futures, and resuming one is a direct call: when something
//! a computation waits on completes, the computation continues immediately,
//! on the stack of whoever completed it. Everything is driven by whatever
//! completes the waits, usually a loop in the embedding application.
//!
//! Everything is exported directly by the crate and should be used as
//! `coro::xxx`.
//!
//! # Primitives
//! - [`Deferred`]: a lazily started body with a single consumer. Created
//!   with [`defer`]. Awaiting it starts the body; the result (or failure) is
//!   moved out to the awaiting computation. Dropping it while the body is
//!   suspended hands the body to the orphan reaper, which keeps it running
//!   so that whatever it is registered on unwinds normally.
//! - [`Notifier`]: many waiters, one value per firing, resumed in
//!   registration order. Dropping the notifier resolves the remaining
//!   waiters with [`Abandoned`].
//! - [`bridge`]: turns a callback-based operation into a wait point.
//!   The adapter gets a write-once [`Completer`].
//! - [`AnyAwait`]: a move-only, type-erased wait point.
//! - [`Task`]: an eagerly started body, created with [`spawn`]. While it is
//!   parked, [`Task::cancel`] unwinds the exact wait it is parked at.
//!
//! ```rust
//! # use pistonite_coro as coro;
//! let notifier = coro::Notifier::<String>::new();
//! let listener = notifier.listener();
//!
//! let shout = move || {
//!     let listener = listener.clone();
//!     coro::defer(async move {
//!         let word = listener.wait().await?;
//!         if word == "throw" {
//!             coro::bail!("asked to throw");
//!         }
//!         coro::Ok(word.to_uppercase())
//!     })
//! };
//!
//! let task = coro::spawn(async move {
//!     let mut words = vec![];
//!     loop {
//!         words.push(shout().await?);
//!         if words.len() == 2 {
//!             return coro::Ok(words);
//!         }
//!     }
//! });
//!
//! notifier.notify("hello".to_string());
//! assert!(!task.is_finished());
//! notifier.notify("world".to_string());
//! assert_eq!(task.take_result().unwrap().unwrap(), ["HELLO", "WORLD"]);
//! ```
//!
//! # Threads
//! Nothing in this crate is `Send`. Foreign threads (timers, blocking IO)
//! only enter through [`bridge`], and completions must be marshaled back
//! onto the thread that drives the computations. A wake-up that arrives from
//! another thread is logged and dropped.
//!
//! # `log` integration
//! The runtime logs through the [`log`](https://docs.rs/log) facade, which is
//! re-exported. Frame lifecycle is logged at `trace`, cancellation and orphan
//! adoption at `debug`. With the `print` feature, [`init_log`] installs a
//! stderr logger honoring `RUST_LOG`, and [`log_init`] is a shortcut for tests.

#![cfg_attr(any(docsrs, feature = "nightly"), feature(doc_auto_cfg))]

mod error_handling;
pub use error_handling::*;

mod slot;
mod rt;
pub use rt::TaskState;
mod reap;
pub use reap::orphan_count;

mod wait;
pub use wait::{WaitHandle, WaitToken};

mod deferred;
pub use deferred::{Deferred, DeferredState, defer};
mod notifier;
pub use notifier::{Abandoned, Listener, Notifier, Wait};
mod bridge;
pub use bridge::{Bridge, Completer, bridge};
mod erase;
pub use erase::{AnyAwait, Awaitable};
mod task;
pub use task::{Task, Uncancelable, spawn, uncancelable};

#[cfg(feature = "print")]
mod print;
#[cfg(feature = "print")]
pub use print::{PrintLevel, init_log, log_init};
#[cfg(feature = "cli")]
pub mod cli;

// re-exports from libraries
pub use log::{debug, error, info, trace, warn};

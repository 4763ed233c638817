pub use anyhow::{Context, Error, Ok, Result, anyhow as fmterr, bail, ensure};

/// Misuse of a [`Task`](crate::Task)
///
/// These are bugs in the embedding code, not conditions to recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::Error)]
pub enum UsageError {
    /// `cancel` was called while the task body is executing, for example
    /// from inside the body itself. A frame that is not parked cannot be
    /// unwound.
    #[display("cannot cancel a task while its body is running")]
    Running,
    /// `cancel` was called on a task that already finished
    #[display("cannot cancel a task that already finished")]
    Finished,
}

/// # Error Handling
/// Bodies of [`Deferred`](crate::Deferred) and [`Task`](crate::Task) return
/// `coro::Result<T>`, which is [`anyhow::Result`](https://docs.rs/anyhow).
/// A failure is captured when the body completes and is only re-raised to
/// the single consumer: the `.await` of the `Deferred`, or
/// [`Task::take_result`](crate::Task::take_result).
///
/// Typed leaf errors from this crate ([`Abandoned`](crate::Abandoned),
/// [`UsageError`]) convert into `coro::Error` with `?` and can be recovered
/// with `downcast_ref`.
///
/// `coro::check!` wraps `.with_context()`
/// ```rust
/// # use pistonite_coro as coro;
/// use coro::Context as _;
///
/// fn some_fallable_func() -> coro::Result<String> {
///     Ok("foo".to_string())
/// }
/// fn main() -> coro::Result<()> {
///     let input: i32 = 42;
///     let foo = coro::check!(some_fallable_func(), "failed: {input}")?;
///     assert_eq!(foo, "foo");
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! check {
    ($result:expr, $($args:tt)*) => {{
        { $result }.with_context(|| format!($($args)*))
    }};
}

/// Invoke a log macro, then panic with the same message
///
/// # Example
/// ```rust,no_run
/// # use pistonite_coro as coro;
/// coro::panicand!(error!("found {} errors", 3));
/// ```
#[macro_export]
macro_rules! panicand {
    ($mac:ident !( $($fmt_args:tt)* )) => {{
        let s = format!($($fmt_args)*);
        $crate::$mac!("{s}");
        panic!("{s}");
    }}
}

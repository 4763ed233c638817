//! CLI entry point for programs that drive coro primitives from `main`
use std::process::ExitCode;
use std::time::Instant;

use crate::PrintLevel;

/// Common flags, meant to be flattened into the program's arguments
///
/// ```rust,no_run
/// # use pistonite_coro as coro;
/// #[derive(clap::Parser)]
/// struct Args {
///     #[clap(flatten)]
///     flags: coro::cli::Flags,
/// }
/// impl AsRef<coro::cli::Flags> for Args {
///     fn as_ref(&self) -> &coro::cli::Flags {
///         &self.flags
///     }
/// }
/// fn main() -> std::process::ExitCode {
///     coro::cli::run(|_: Args| coro::Ok(()))
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, clap::Args)]
pub struct Flags {
    /// Verbose. More -v makes it more verbose (opposite of --quiet)
    #[clap(short = 'v', long, action(clap::ArgAction::Count))]
    verbose: u8,
    /// Quiet. More -q makes it more quiet (opposite of --verbose)
    #[clap(short = 'q', long, action(clap::ArgAction::Count))]
    quiet: u8,
}

impl AsRef<Flags> for Flags {
    fn as_ref(&self) -> &Flags {
        self
    }
}

impl Flags {
    /// The print level selected by `-v` and `-q`
    pub fn level(&self) -> PrintLevel {
        let level = self.verbose.clamp(0, 2) as i8 - self.quiet.clamp(0, 2) as i8;
        level.into()
    }

    /// Install the logger with the selected level
    pub fn apply(&self) {
        crate::init_log(self.level());
    }
}

/// Parse the arguments, apply the flags, and run `f`
///
/// A failure is logged with its chain and turned into a failing exit code.
pub fn run<T, F>(f: F) -> ExitCode
where
    T: clap::Parser + AsRef<Flags>,
    F: FnOnce(T) -> crate::Result<()>,
{
    let start = Instant::now();
    let args = T::parse();
    args.as_ref().apply();
    let result = f(args);
    handle_result(start, result)
}

fn handle_result(start: Instant, result: crate::Result<()>) -> ExitCode {
    let elapsed = start.elapsed().as_secs_f32();
    match result {
        Err(e) => {
            crate::debug!("finished in {elapsed:.2}s");
            crate::error!("fatal: {e:?}");
            ExitCode::FAILURE
        }
        Ok(()) => {
            crate::info!("finished in {elapsed:.2}s");
            ExitCode::SUCCESS
        }
    }
}

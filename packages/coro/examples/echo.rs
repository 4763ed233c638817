use std::io::BufRead as _;

use pistonite_coro as coro;
use coro::Context as _;

#[derive(clap::Parser)]
struct Args {
    #[clap(flatten)]
    flags: coro::cli::Flags,
}
impl AsRef<coro::cli::Flags> for Args {
    fn as_ref(&self) -> &coro::cli::Flags {
        &self.flags
    }
}

/// Echo words from stdin in upper case. Type `throw` to fail.
///
/// Run with cargo run --example echo --features cli
fn main() -> std::process::ExitCode {
    coro::cli::run(main_internal)
}

fn main_internal(_: Args) -> coro::Result<()> {
    let notifier = coro::Notifier::<String>::new();
    let listener = notifier.listener();

    let next_word = move || {
        let listener = listener.clone();
        coro::defer(async move { coro::Ok(listener.wait().await?) })
    };
    let shout = move || {
        let next_word = next_word.clone();
        coro::defer(async move {
            let word = next_word().await?;
            coro::ensure!(word != "throw", "asked to throw");
            coro::Ok(word.to_uppercase())
        })
    };

    let echo = coro::spawn(async move {
        loop {
            match shout().await {
                Ok(word) => println!("{word}"),
                // stdin is closed
                Err(e) if e.is::<coro::Abandoned>() => return coro::Ok(()),
                Err(e) => return Err(e),
            }
        }
    });

    for line in std::io::stdin().lock().lines() {
        let line = coro::check!(line, "failed to read stdin")?;
        for word in line.split_whitespace() {
            let count = notifier.notify(word.to_string());
            coro::debug!("notified {count} waiter(s) with '{word}'");
            if echo.is_finished() {
                return echo.take_result().unwrap_or(Ok(()));
            }
        }
    }
    drop(notifier);
    echo.take_result().unwrap_or(Ok(()))
}

use std::io::Write as _;
use std::sync::OnceLock;

static LOG_FILTER: OnceLock<env_filter::Filter> = OnceLock::new();
static LOG_LEVEL: OnceLock<log::LevelFilter> = OnceLock::new();

/// Print level settable with `-v` and `-q` flags
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PrintLevel {
    QuietQuiet,
    Quiet,
    #[default]
    Normal,
    Verbose,
    VerboseVerbose,
}
impl From<i8> for PrintLevel {
    fn from(value: i8) -> Self {
        match value {
            ..=-2 => Self::QuietQuiet,
            -1 => Self::Quiet,
            0 => Self::Normal,
            1 => Self::Verbose,
            2.. => Self::VerboseVerbose,
        }
    }
}
impl From<PrintLevel> for log::LevelFilter {
    fn from(value: PrintLevel) -> Self {
        match value {
            PrintLevel::QuietQuiet => log::LevelFilter::Off,
            PrintLevel::Quiet => log::LevelFilter::Error,
            PrintLevel::Normal => log::LevelFilter::Info,
            PrintLevel::Verbose => log::LevelFilter::Debug,
            PrintLevel::VerboseVerbose => log::LevelFilter::Trace,
        }
    }
}

/// Install a logger that prints to stderr
///
/// If `RUST_LOG` is set, it is parsed the same way as `env_logger` does,
/// and messages are filtered by it. Otherwise `level` decides.
/// Only the first call installs the logger.
pub fn init_log(level: PrintLevel) {
    let max_level = if let Ok(value) = std::env::var("RUST_LOG")
        && !value.is_empty()
    {
        let mut builder = env_filter::Builder::new();
        let filter = builder.parse(&value).build();
        let max_level = filter.filter();
        let _ = LOG_FILTER.set(filter);
        max_level
    } else {
        level.into()
    };
    let _ = LOG_LEVEL.set(level.into());

    struct LogImpl;
    impl log::Log for LogImpl {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            match LOG_FILTER.get() {
                Some(filter) => filter.enabled(metadata),
                None => metadata.level() <= LOG_LEVEL.get().copied().unwrap_or(log::LevelFilter::Info),
            }
        }

        fn log(&self, record: &log::Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let tag = match record.level() {
                log::Level::Error => "E",
                log::Level::Warn => "W",
                log::Level::Info => "I",
                log::Level::Debug => "D",
                log::Level::Trace => "T",
            };
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "[{tag}] {}", record.args());
        }

        fn flush(&self) {
            let _ = std::io::stderr().flush();
        }
    }

    if log::set_logger(&LogImpl).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Quickly initialize logging for tests, printing everything
#[inline]
pub fn log_init() {
    init_log(PrintLevel::VerboseVerbose)
}

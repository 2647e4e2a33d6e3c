//! Logger setup: env_logger filtering, routed through indicatif on a TTY

use indicatif::MultiProgress;

/// Crates whose logs follow `--debug`/`--quiet`; dependencies stay at `warn`
const OWN_CRATES: &[&str] = &[
    "propline",
    "propline_core",
    "propline_address",
    "propline_valuation",
];

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(quiet: bool, debug: bool) -> String {
    let level = match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    let mut filter = String::from("warn");
    for krate in OWN_CRATES {
        filter.push(',');
        filter.push_str(krate);
        filter.push('=');
        filter.push_str(level);
    }
    filter
}

fn label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

fn ansi(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    }
}

/// Prints log lines above the progress bars instead of through them
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.matches(record) {
            return;
        }
        let level = record.level();
        let line = format!("[{}{}\x1b[0m] {}", ansi(level), label(level), record.args());
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global logger.
///
/// With `multi` set (TTY), lines are colored and printed via the progress
/// bars; otherwise plain `[LEVEL] msg` lines go to stderr for log collectors.
pub fn init_logging(
    quiet: bool,
    debug: bool,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));
    let mut builder = env_logger::Builder::from_env(env);

    match multi {
        Some(multi) => {
            let logger = builder.build();
            let max_level = logger.filter();
            log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))?;
            log::set_max_level(max_level);
            Ok(())
        }
        None => builder
            .format(|buf, record| writeln!(buf, "[{}] {}", label(record.level()), record.args()))
            .try_init(),
    }
}

use once_cell::sync::OnceCell;
use slog::{o, Drain, Level, LevelFilter, Logger};

use std::sync::Mutex;

use crate::config::LogConfig;

static GLOBAL_LOGGER: OnceCell<Logger> = OnceCell::new();

/// Root logger. Falls back to a terminal logger at info level when
/// `init_logger` was never called.
pub fn logger() -> &'static Logger {
    GLOBAL_LOGGER.get_or_init(|| build_logger("term", Level::Info))
}

/// Install the root logger from config. Only the first call wins.
pub fn init_logger(cfg: &LogConfig) -> bool {
    let logger = build_logger(&cfg.format, parse_level(&cfg.level));
    GLOBAL_LOGGER.set(logger).is_ok()
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "warn" | "warning" => Level::Warning,
        "error" => Level::Error,
        "critical" => Level::Critical,
        _ => Level::Info,
    }
}

fn build_logger(format: &str, level: Level) -> Logger {
    if format.eq_ignore_ascii_case("json") {
        let drain = slog_json::Json::default(std::io::stderr()).fuse();
        let drain = LevelFilter::new(drain, level).fuse();
        let drain = Mutex::new(drain).fuse();
        Logger::root(drain, o!("app" => "duo_call"))
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = LevelFilter::new(drain, level).fuse();
        let drain = Mutex::new(drain).fuse();
        Logger::root(drain, o!())
    }
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        slog::info!($crate::utils::log::logger(), $($arg)+)
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        slog::debug!($crate::utils::log::logger(), $($arg)+)
    }
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        slog::error!($crate::utils::log::logger(), $($arg)+)
    }
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        slog::warn!($crate::utils::log::logger(), $($arg)+)
    }
}

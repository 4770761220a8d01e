//! Logger for the helper process
//!
//! Controlled by the PTYHOST_AGENT_DEBUG environment variable:
//! - 0 or unset: Warnings and errors
//! - 1: Errors only
//! - 2: Info level (requests, spawns, container changes)
//! - 3: Debug level (foreground polls, descriptor traffic)
//! - 4: Trace level (every message on the channel)
//!
//! Output goes to stderr, which the helper inherits from the application,
//! or to the file named by PTYHOST_AGENT_LOG when it is set.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

fn level_from_env() -> LevelFilter {
    match std::env::var("PTYHOST_AGENT_DEBUG") {
        Ok(val) => match val.trim().parse::<u8>() {
            Ok(1) => LevelFilter::Error,
            Ok(2) => LevelFilter::Info,
            Ok(3) => LevelFilter::Debug,
            Ok(4) => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        Err(_) => LevelFilter::Warn,
    }
}

enum Sink {
    Stderr,
    File(std::fs::File),
}

struct AgentLogger {
    level: LevelFilter,
    sink: Mutex<Sink>,
}

impl AgentLogger {
    fn new() -> Self {
        let level = level_from_env();
        let sink = std::env::var_os("PTYHOST_AGENT_LOG")
            .and_then(|path| {
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .ok()
            })
            .map(Sink::File)
            .unwrap_or(Sink::Stderr);
        Self {
            level,
            sink: Mutex::new(sink),
        }
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

impl Log for AgentLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] [{}] {}\n",
            chrono::Local::now().format("%H:%M:%S%.6f"),
            level_str(record.level()),
            record.target(),
            record.args()
        );
        let mut sink = self.sink.lock();
        // Logging must never take the helper down.
        let _ = match &mut *sink {
            Sink::Stderr => std::io::stderr().write_all(line.as_bytes()),
            Sink::File(file) => file.write_all(line.as_bytes()),
        };
    }

    fn flush(&self) {
        if let Sink::File(file) = &mut *self.sink.lock() {
            let _ = file.flush();
        }
    }
}

static LOGGER: OnceLock<AgentLogger> = OnceLock::new();

/// Install the helper logger as the `log` backend. Safe to call more than once.
pub fn init() {
    let logger = LOGGER.get_or_init(AgentLogger::new);
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}

//! Console output in the `[HH:MM:SS] LEVEL: message` log format.
//!
//! Tool output and status lines go to stdout through here; diagnostics from
//! the library go through `tracing` on stderr.

use std::io::Write;

use chrono::{Local, NaiveTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Render one log line.
pub fn format_line(time: NaiveTime, level: Level, message: &str) -> String {
    format!("[{}] {}: {}", time.format("%H:%M:%S"), level.as_str(), message)
}

/// Writes timestamped lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn emit(&self, level: Level, message: &str) {
        let line = format_line(Local::now().time(), level, message);
        let mut out = std::io::stdout().lock();
        // A closed stdout (e.g. `| head`) must not abort a running conversion.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    pub fn success(&self, message: &str) {
        self.emit(Level::Success, message);
    }

    pub fn warning(&self, message: &str) {
        self.emit(Level::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }
}

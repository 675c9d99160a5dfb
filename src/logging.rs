//! Pluggable diagnostic sink shared by the pool and the map

use std::{fmt, io::Write, sync::Arc};

use serde::{Deserialize, Serialize};

/// Severity attached to every diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Label used by the console sink
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    /// Matching level of the `log` facade
    pub fn level(&self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Callback signature for an externally supplied sink
pub type LogCallback = dyn Fn(Severity, &str) + Send + Sync;

/// Where diagnostics go
///
/// The default writes `-{LEVEL}- {message}` lines to standard output, which is
/// what a caller gets when it does not care about logging at all.
#[derive(Clone, Default)]
pub enum LogSink {
    /// `-{LEVEL}- {message}` on stdout
    #[default]
    Console,
    /// Forward to the `log` crate
    Facade,
    /// Hand every message to a caller-owned function
    Callback(Arc<LogCallback>),
}

impl LogSink {
    /// Wrap a closure as a sink
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Severity, &str) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Deliver one message
    pub fn emit(&self, severity: Severity, args: fmt::Arguments<'_>) {
        match self {
            LogSink::Console => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                // A closed stdout must not take the caller down with it
                let _ = writeln!(out, "-{}- {}", severity.label(), args);
            }
            LogSink::Facade => {
                log::log!(target: "shmmap", severity.level(), "{}", args);
            }
            LogSink::Callback(f) => {
                let message = fmt::format(args);
                f(severity, &message);
            }
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Severity::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Severity::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Severity::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Severity::Error, args);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSink::Console => f.write_str("LogSink::Console"),
            LogSink::Facade => f.write_str("LogSink::Facade"),
            LogSink::Callback(_) => f.write_str("LogSink::Callback(..)"),
        }
    }
}

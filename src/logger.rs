//! Leveled logging with colored module prefixes.
//!
//! This module provides:
//! - `log!` macro for informational output with a colored module prefix
//! - `debug!`, `warn!` and `error!` variants gated by the global level
//!
//! # Example
//!
//! ```ignore
//! log!("serve"; "registered {} pages", count);
//! warn!("scan"; "skipping unreadable directory {}", path.display());
//! ```

use owo_colors::OwoColorize;
use serde::Deserialize;
use std::{
    io::{Write, stderr},
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::utils::date::DateTimeUtc;

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(try_from = "String")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl LogLevel {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warning,
            3 => Self::Error,
            _ => Self::Critical,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!(
                "unknown log level `{other}` (expected DEBUG, INFO, WARNING, ERROR or CRITICAL)"
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

/// Global minimum level (set from `--log-level`)
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Set the minimum level globally
pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Current minimum level
pub fn level() -> LogLevel {
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Check if messages at `level` are emitted
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level >= self::level()
}

// ============================================================================
// Log Macros
// ============================================================================

/// Log an informational message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::enabled($crate::logger::LogLevel::Info) {
            $crate::logger::log($crate::logger::LogLevel::Info, $module, &format!($($arg)*))
        }
    }};
}

/// Log a debug message (only shown at `DEBUG` level)
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::enabled($crate::logger::LogLevel::Debug) {
            $crate::logger::log($crate::logger::LogLevel::Debug, $module, &format!($($arg)*))
        }
    }};
}

/// Log a recoverable problem
#[macro_export]
macro_rules! warn {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::enabled($crate::logger::LogLevel::Warning) {
            $crate::logger::log($crate::logger::LogLevel::Warning, $module, &format!($($arg)*))
        }
    }};
}

/// Log a failure
#[macro_export]
macro_rules! error {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::enabled($crate::logger::LogLevel::Error) {
            $crate::logger::log($crate::logger::LogLevel::Error, $module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Write one log line to stderr
#[inline]
pub fn log(level: LogLevel, module: &str, message: &str) {
    let timestamp = format!("[{}]", DateTimeUtc::now().clock());
    let prefix = colorize_prefix(level, module);

    let mut out = stderr().lock();
    writeln!(out, "{} {prefix} {message}", timestamp.dimmed()).ok();
    out.flush().ok();
}

/// Apply color to a module prefix based on level and module
#[inline]
fn colorize_prefix(level: LogLevel, module: &str) -> String {
    let prefix = format!("[{module}]");
    match level {
        LogLevel::Error | LogLevel::Critical => prefix.bright_red().bold().to_string(),
        LogLevel::Warning => prefix.yellow().bold().to_string(),
        LogLevel::Debug => prefix.dimmed().to_string(),
        LogLevel::Info => match module {
            "serve" | "http" => prefix.bright_blue().bold().to_string(),
            "announce" => prefix.bright_green().bold().to_string(),
            _ => prefix.bright_yellow().bold().to_string(),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

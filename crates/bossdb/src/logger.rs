//! Buffered application log written to one file per day.
//!
//! Each line looks like
//! `[2026-10-19 08:15:02] [Warning]: login failed {"user":"alice"}` and is
//! appended to `<dir>/<YYYY-MM-DD>.log` once the buffer fills, on
//! [`FileLogger::flush`], or when the logger is dropped. Every line is also
//! emitted as a `tracing` event under the `bossdb.log` target.

use crate::error::DbResult;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Alert,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Alert => "Alert",
            Level::Error => "Error",
            Level::Warning => "Warning",
            Level::Notice => "Notice",
            Level::Info => "Info",
            Level::Debug => "Debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[log]` section of the application config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: String,
    /// Lines held in memory before they are written out.
    pub buffer_lines: usize,
    /// Least severe level that is recorded.
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: "runtime/log".to_string(),
            buffer_lines: 100,
            level: Level::Debug,
        }
    }
}

#[derive(Debug)]
pub struct FileLogger {
    dir: PathBuf,
    buffer_lines: usize,
    level: Level,
    buffer: Mutex<Vec<(NaiveDate, String)>>,
}

impl FileLogger {
    /// Create the log directory if needed.
    pub fn new(config: &LogConfig) -> DbResult<Self> {
        let dir = PathBuf::from(config.dir.trim_end_matches('/'));
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            buffer_lines: config.buffer_lines.max(1),
            level: config.level,
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record `message` with optional structured `context`.
    ///
    /// `context` is appended as compact JSON unless it is null or an empty
    /// object/array. Write failures during an automatic flush are reported
    /// through `tracing`; call [`FileLogger::flush`] to observe them directly.
    pub fn log(&self, level: Level, message: &str, context: &serde_json::Value) {
        if level > self.level {
            return;
        }
        mirror(level, message, context);

        let now = Local::now();
        let line = format_line(&now.format("%Y-%m-%d %H:%M:%S").to_string(), level, message, context);

        let full = {
            let mut buffer = self.lock();
            buffer.push((now.date_naive(), line));
            buffer.len() >= self.buffer_lines
        };
        if full {
            if let Err(e) = self.flush() {
                tracing::error!(target: "bossdb.log", error = %e, "failed to write log file");
            }
        }
    }

    pub fn alert(&self, message: &str) {
        self.log(Level::Alert, message, &serde_json::Value::Null);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message, &serde_json::Value::Null);
    }

    pub fn warning(&self, message: &str) {
        self.log(Level::Warning, message, &serde_json::Value::Null);
    }

    pub fn notice(&self, message: &str) {
        self.log(Level::Notice, message, &serde_json::Value::Null);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message, &serde_json::Value::Null);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message, &serde_json::Value::Null);
    }

    /// Lines waiting to be written.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Append buffered lines to their daily files.
    pub fn flush(&self) -> DbResult<()> {
        let lines = std::mem::take(&mut *self.lock());
        if lines.is_empty() {
            return Ok(());
        }

        let mut by_day: BTreeMap<NaiveDate, String> = BTreeMap::new();
        for (day, line) in lines {
            let chunk = by_day.entry(day).or_default();
            chunk.push_str(&line);
            chunk.push('\n');
        }

        for (day, chunk) in by_day {
            let path = self.dir.join(format!("{}.log", day.format("%Y-%m-%d")));
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(chunk.as_bytes())?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(NaiveDate, String)>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(target: "bossdb.log", error = %e, "failed to write log file");
        }
    }
}

fn format_line(timestamp: &str, level: Level, message: &str, context: &serde_json::Value) -> String {
    let has_context = match context {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        _ => true,
    };
    if has_context {
        format!("[{timestamp}] [{level}]: {message} {context}")
    } else {
        format!("[{timestamp}] [{level}]: {message}")
    }
}

fn mirror(level: Level, message: &str, context: &serde_json::Value) {
    match level {
        Level::Alert | Level::Error => {
            tracing::error!(target: "bossdb.log", severity = level.as_str(), %context, "{message}")
        }
        Level::Warning => tracing::warn!(target: "bossdb.log", %context, "{message}"),
        Level::Notice | Level::Info => {
            tracing::info!(target: "bossdb.log", severity = level.as_str(), %context, "{message}")
        }
        Level::Debug => tracing::debug!(target: "bossdb.log", %context, "{message}"),
    }
}

use chrono::{DateTime, Utc};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ProfileError;

static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next sequence number for log entries emitted by this process
pub fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Structured log entry with context
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub level: String,
    pub component: String,
    pub operation: String,
    pub message: String,
    pub context: HashMap<String, serde_json::Value>,
    pub thread_id: String,
    pub process_id: u32,
}

impl LogEntry {
    pub fn new(level: Level, component: &str, operation: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            sequence: next_sequence(),
            level: level.to_string(),
            component: component.to_string(),
            operation: operation.to_string(),
            message: message.to_string(),
            context: HashMap::new(),
            thread_id: format!("{:?}", std::thread::current().id()),
            process_id: std::process::id(),
        }
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}

/// Component-tagged diagnostics for the profiling runtime.
///
/// Goes through the `log` facade so the host decides where (and whether) the
/// entries end up.
#[derive(Debug, Clone)]
pub struct ProfilerLogger {
    component: &'static str,
}

impl ProfilerLogger {
    pub const fn new(component: &'static str) -> Self {
        Self { component }
    }

    /// Log a soft error at a level matching how surprising it is.
    pub fn log_error(&self, operation: &str, error: &ProfileError) {
        let level = match error {
            ProfileError::CounterProgramming(_) => Level::Error,
            ProfileError::ReportIo { .. } | ProfileError::Serialization(_) => Level::Error,
            ProfileError::UnbalancedEnd { .. } | ProfileError::UnknownRegionKind(_) => Level::Warn,
            ProfileError::InvalidArgument(_) | ProfileError::InvalidLaneWidth(_) => Level::Warn,
            ProfileError::Configuration(_) => Level::Warn,
            ProfileError::MissingContext { .. } | ProfileError::NoActiveRegion { .. } => Level::Debug,
        };
        log::log!(
            target: self.component,
            level,
            "{} failed [{}]: {}",
            operation,
            error.error_code(),
            error
        );
    }

    pub fn log_warning(&self, operation: &str, message: &str) {
        log::warn!(target: self.component, "{}: {}", operation, message);
    }

    pub fn log_info(&self, operation: &str, message: &str) {
        log::info!(target: self.component, "{}: {}", operation, message);
    }

    pub fn log_debug(&self, operation: &str, message: &str) {
        log::debug!(target: self.component, "{}: {}", operation, message);
    }

    pub fn log_trace(&self, operation: &str, message: &str) {
        log::trace!(target: self.component, "{}: {}", operation, message);
    }
}

/// Logger that renders every record as one JSON line on stderr.
pub struct StructuredLogger {
    component: String,
    min_level: Level,
}

impl StructuredLogger {
    pub fn new(component: &str, min_level: Level) -> Self {
        Self {
            component: component.to_string(),
            min_level,
        }
    }

    fn entry_for(&self, record: &Record) -> LogEntry {
        let mut entry = LogEntry::new(
            record.level(),
            &self.component,
            record.target(),
            &record.args().to_string(),
        );

        if let Some(file) = record.file() {
            entry = entry.with_context("file", serde_json::Value::String(file.to_string()));
        }
        if let Some(line) = record.line() {
            entry = entry.with_context("line", serde_json::Value::Number(line.into()));
        }
        entry
    }
}

impl Log for StructuredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = self.entry_for(record).to_json();
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(out, "{}", line);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the structured logger. Fails if the host already set a logger, in
/// which case records flow to that one instead.
pub fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let min_level = level.to_level().unwrap_or(Level::Error);
    log::set_boxed_logger(Box::new(StructuredLogger::new("laneprof", min_level)))?;
    log::set_max_level(level);
    Ok(())
}

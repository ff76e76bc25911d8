//! Run logs and structured pipeline outcomes.
//!
//! Every pipeline threads a `RunLog` through its steps by `&mut` and hands it
//! back inside an `Outcome`, on the success path and the error path alike.
//! Recording an event also emits the matching `tracing` event so the same
//! progress shows up in the process log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a run log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Info => "",
            Self::Success => "✓ ",
            Self::Warn => "! ",
            Self::Error => "✗ ",
        }
    }
}

/// One human-readable step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    /// Render with the level marker, suitable for direct display.
    pub fn render(&self) -> String {
        if self.message.is_empty() {
            return String::new();
        }
        format!("{}{}", self.level.marker(), self.message)
    }
}

/// Ordered log of a single pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLog {
    events: Vec<LogEvent>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Success, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    /// Visual separator between groups of steps.
    pub fn blank(&mut self) {
        self.events.push(LogEvent {
            level: LogLevel::Info,
            message: String::new(),
        });
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(target: "shipyard::run", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "shipyard::run", "{}", message),
            LogLevel::Error => tracing::error!(target: "shipyard::run", "{}", message),
        }
        self.events.push(LogEvent { level, message });
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rendered lines in recording order.
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(LogEvent::render).collect()
    }

    /// Whether any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events.iter().any(|e| e.message.contains(needle))
    }

    pub fn has_level(&self, level: LogLevel) -> bool {
        self.events.iter().any(|e| e.level == level)
    }
}

/// Structured result of a pipeline run, suitable for direct display or JSON.
///
/// On failure the partial log is kept and `error` describes what stopped the run.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T: Serialize> {
    pub success: bool,
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: Option<T>,
    #[serde(skip)]
    pub log: RunLog,
}

impl<T: Serialize> Outcome<T> {
    pub fn ok(log: RunLog, details: T) -> Self {
        Self {
            success: true,
            run_id: Uuid::new_v4(),
            finished_at: Utc::now(),
            logs: log.lines(),
            error: None,
            details: Some(details),
            log,
        }
    }

    pub fn failed(mut log: RunLog, error: impl std::fmt::Display, details: Option<T>) -> Self {
        let error = error.to_string();
        log.error(error.clone());
        Self {
            success: false,
            run_id: Uuid::new_v4(),
            finished_at: Utc::now(),
            logs: log.lines(),
            error: Some(error),
            details,
            log,
        }
    }
}

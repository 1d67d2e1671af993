//! Mutable record of one processing run.
//!
//! Every change is published as a [`StateEvent`] snapshot on a broadcast
//! channel. A lagging or dropped receiver never affects the writer.

use chrono::{DateTime, Utc};
use research_shared::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Logs included in a snapshot.
pub const SNAPSHOT_LOG_LIMIT: usize = 50;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One timestamped narrative entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

/// Serializable view of the state, with the most recent logs only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: RunStatus,
    pub current_step: String,
    pub progress: u32,
    pub total_steps: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub results: Map<String, Value>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Progress,
    Log,
    Finished,
}

/// Published after every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub kind: EventKind,
    pub snapshot: StateSnapshot,
}

// ---------------------------------------------------------------------------
// ProcessingState
// ---------------------------------------------------------------------------

/// Single-writer run record. Status moves `idle -> running -> completed|error`
/// and a terminal state rejects every further change.
#[derive(Debug, Default)]
pub struct ProcessingState {
    status: RunStatus,
    current_step: String,
    progress: u32,
    total_steps: u32,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error_message: Option<String>,
    results: Map<String, Value>,
    logs: Vec<LogEntry>,
    events: Option<broadcast::Sender<StateEvent>>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State that publishes its changes on `events`.
    pub fn with_events(events: broadcast::Sender<StateEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Every entry, oldest first.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ResearchError::validation(format!(
                "processing state is {} and can no longer change",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        self.ensure_mutable()?;
        if self.status != RunStatus::Running {
            return Err(ResearchError::validation("processing state is not running"));
        }
        Ok(())
    }

    /// `idle -> running`.
    pub fn start(&mut self, total_steps: u32) -> Result<()> {
        if self.status != RunStatus::Idle {
            return Err(ResearchError::validation(format!(
                "cannot start a run from status {}",
                self.status
            )));
        }
        self.status = RunStatus::Running;
        self.total_steps = total_steps;
        self.start_time = Some(Utc::now());
        self.publish(EventKind::Started);
        Ok(())
    }

    pub fn update_progress(&mut self, step: impl Into<String>, progress: u32) -> Result<()> {
        self.ensure_running()?;
        self.current_step = step.into();
        self.progress = progress;
        info!(
            step = %self.current_step,
            progress,
            total_steps = self.total_steps,
            "progress update"
        );
        self.publish(EventKind::Progress);
        Ok(())
    }

    pub fn set_result(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_running()?;
        self.results.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Append a log entry and mirror it to `tracing` at the same level.
    pub fn add_log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        context: Map<String, Value>,
    ) -> Result<()> {
        self.ensure_mutable()?;
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(context = ?context, "{message}"),
            LogLevel::Info => info!(context = ?context, "{message}"),
            LogLevel::Warning => warn!(context = ?context, "{message}"),
            LogLevel::Error => error!(context = ?context, "{message}"),
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            context,
        });
        self.publish(EventKind::Log);
        Ok(())
    }

    /// `running -> completed`.
    pub fn complete(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.status = RunStatus::Completed;
        self.end_time = Some(Utc::now());
        self.publish(EventKind::Finished);
        Ok(())
    }

    /// `running -> error`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_running()?;
        self.status = RunStatus::Error;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
        self.publish(EventKind::Finished);
        Ok(())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let skip = self.logs.len().saturating_sub(SNAPSHOT_LOG_LIMIT);
        StateSnapshot {
            status: self.status,
            current_step: self.current_step.clone(),
            progress: self.progress,
            total_steps: self.total_steps,
            start_time: self.start_time,
            end_time: self.end_time,
            error_message: self.error_message.clone(),
            results: self.results.clone(),
            logs: self.logs[skip..].to_vec(),
        }
    }

    /// Snapshot as JSON, the transport shape for outside consumers.
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    fn publish(&self, kind: EventKind) {
        if let Some(events) = &self.events {
            if events.receiver_count() > 0 {
                // A send error only means every receiver is gone.
                let _ = events.send(StateEvent {
                    kind,
                    snapshot: self.snapshot(),
                });
            }
        }
    }
}

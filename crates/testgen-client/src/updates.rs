use crate::session::{ChatMessage, GenerationStatus, LogEntry};

/// Severity of a user-facing notice (rendered as a toast by the UI).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

/// A single observable change to the session, published in mutation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    StatusChanged(GenerationStatus),
    RunBound(u64),
    MessageAppended(ChatMessage),
    CodeReplaced(String),
    PlanReplaced(String),
    LogAppended(LogEntry),
    /// Logs and plan were cleared at the start of a new run.
    LogsCleared,
    Notice { level: NoticeLevel, message: String },
    /// The session was reset to defaults.
    Reset,
}

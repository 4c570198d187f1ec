use chrono::{DateTime, Utc};

/// Code artifact shown before any run has produced code.
pub const CODE_PLACEHOLDER: &str = "# Generated tests will appear here...";

/// Generation status of the active run, as seen by the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Processing,
    Success,
    Error,
    WaitingForInput,
    WaitingForApproval,
}

impl GenerationStatus {
    /// Maps a pipeline status string (case-insensitive) to a status.
    ///
    /// Intermediate pipeline phases (`analyzing`, `generating`, ...) return
    /// `None`.
    pub fn from_pipeline(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => Some(Self::Success),
            "FAILED" => Some(Self::Error),
            "WAITING_FOR_INPUT" => Some(Self::WaitingForInput),
            "WAITING_FOR_APPROVAL" => Some(Self::WaitingForApproval),
            _ => None,
        }
    }

    /// True while the pipeline waits for a human.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::WaitingForInput | Self::WaitingForApproval)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One transcript entry.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: uuid::Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Display class of a log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
    Success,
    Debug,
}

/// Keyword rules, checked in order; the first rule with a matching marker wins.
///
/// Matching is a plain case-sensitive substring test, so a test named
/// `test_FAILED_login` is classified as an error line.
const LOG_RULES: &[(&[&str], LogLevel)] = &[
    (&["Error:", "Execution Failed", "FAILED"], LogLevel::Error),
    (&["Success", "Valid"], LogLevel::Success),
    (&["Analyst", "Coder"], LogLevel::Debug),
];

impl LogLevel {
    /// Classifies a pipeline log line by keyword.
    pub fn classify(content: &str) -> Self {
        LOG_RULES
            .iter()
            .find(|(markers, _)| markers.iter().any(|m| content.contains(m)))
            .map_or(LogLevel::Info, |(_, level)| *level)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub id: uuid::Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4(),
            level: LogLevel::classify(&content),
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Client-side view of one run: status, transcript and artifacts.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunSession {
    pub run_id: Option<u64>,
    pub status: GenerationStatus,
    pub transcript: Vec<ChatMessage>,
    pub code: String,
    pub plan: String,
    pub logs: Vec<LogEntry>,
}

impl Default for RunSession {
    fn default() -> Self {
        Self {
            run_id: None,
            status: GenerationStatus::Idle,
            transcript: Vec::new(),
            code: CODE_PLACEHOLDER.to_string(),
            plan: String::new(),
            logs: Vec::new(),
        }
    }
}

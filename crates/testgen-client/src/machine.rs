use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::errors::TransportError;
use crate::event::StreamEvent;
use crate::session::{ChatMessage, GenerationStatus, LogEntry, RunSession};
use crate::updates::{NoticeLevel, SessionUpdate};

/// Assistant message appended when a run finishes normally.
pub const COMPLETION_MESSAGE: &str =
    "Test generation finished. The generated code is ready in the editor.";
/// Assistant message appended when the user rejects a plan.
pub const REJECTION_MESSAGE: &str =
    "Plan rejected. Tell me what should change and I will prepare a new one.";
/// Assistant message appended when a stream ends while still processing.
pub const STALLED_STREAM_MESSAGE: &str =
    "The connection closed before the run finished. Please try again.";
/// Temporary code artifact shown while an approved plan is being executed.
pub const APPROVAL_CODE_PLACEHOLDER: &str = "# Generating tests from the approved plan...";
/// Toast text published on normal completion.
pub const COMPLETION_NOTICE: &str = "Test generation complete";

/// Owns the `RunSession` and is the only place its status changes.
///
/// Every mutation is published as a `SessionUpdate`; publishing with no
/// subscribers is not an error.
pub struct RunStateMachine {
    session: RunSession,
    updates: broadcast::Sender<SessionUpdate>,
}

impl RunStateMachine {
    pub fn new(updates: broadcast::Sender<SessionUpdate>) -> Self {
        Self {
            session: RunSession::default(),
            updates,
        }
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn status(&self) -> GenerationStatus {
        self.session.status
    }

    pub fn run_id(&self) -> Option<u64> {
        self.session.run_id
    }

    /// Applies one pipeline event.
    pub fn apply(&mut self, event: StreamEvent) {
        debug!(run_id = ?self.session.run_id, kind = event.kind(), status = ?self.session.status, "applying stream event");
        match event {
            StreamEvent::Meta { run_id: Some(run_id) } => match self.session.run_id {
                None => {
                    info!(run_id, "run bound");
                    self.session.run_id = Some(run_id);
                    self.publish(SessionUpdate::RunBound(run_id));
                }
                Some(bound) if bound != run_id => {
                    debug!(bound, ignored = run_id, "run id already bound");
                }
                Some(_) => {}
            },
            StreamEvent::Meta { run_id: None } => {}
            StreamEvent::Log { content } => self.push_log(content),
            StreamEvent::Message { content } => self.push_message(ChatMessage::assistant(content)),
            StreamEvent::Code { content } => {
                self.session.code = content.clone();
                self.publish(SessionUpdate::CodeReplaced(content));
            }
            StreamEvent::Plan { content } => {
                self.session.plan = content.clone();
                self.publish(SessionUpdate::PlanReplaced(content));
            }
            StreamEvent::Status { content } => match GenerationStatus::from_pipeline(&content) {
                Some(status) => self.set_status(status),
                None => debug!(status = %content, "ignoring pipeline status"),
            },
            StreamEvent::Finish => {
                if self.session.status.is_waiting() {
                    debug!(status = ?self.session.status, "finish while waiting for a human, keeping status");
                    return;
                }
                self.set_status(GenerationStatus::Success);
                self.push_message(ChatMessage::assistant(COMPLETION_MESSAGE));
                self.notify(NoticeLevel::Success, COMPLETION_NOTICE);
            }
            StreamEvent::Error { content } => {
                self.set_status(GenerationStatus::Error);
                self.push_log(format!("Error: {content}"));
                self.push_message(ChatMessage::assistant(format!(
                    "An error occurred: {content}"
                )));
            }
            StreamEvent::Unknown => debug!("ignoring unknown stream event"),
        }
    }

    /// Records a user message and enters `processing`.
    ///
    /// Without a bound run this starts a fresh run: logs and plan are cleared,
    /// the transcript is kept.
    pub fn begin_message(&mut self, text: &str) {
        self.push_message(ChatMessage::user(text));
        if self.session.run_id.is_none() {
            self.session.logs.clear();
            self.session.plan.clear();
            self.publish(SessionUpdate::LogsCleared);
        }
        self.set_status(GenerationStatus::Processing);
    }

    /// Enters `processing` for an approved plan and swaps in a placeholder.
    pub fn begin_approval(&mut self) {
        self.set_status(GenerationStatus::Processing);
        self.session.code = APPROVAL_CODE_PLACEHOLDER.to_string();
        self.publish(SessionUpdate::CodeReplaced(APPROVAL_CODE_PLACEHOLDER.to_string()));
    }

    pub fn record_rejection(&mut self) {
        self.set_status(GenerationStatus::Idle);
        self.push_message(ChatMessage::assistant(REJECTION_MESSAGE));
    }

    pub fn record_transport_failure(&mut self, err: &TransportError) {
        self.set_status(GenerationStatus::Error);
        self.push_log(format!("Error: {err}"));
    }

    pub fn record_cancelled(&mut self) {
        self.set_status(GenerationStatus::Idle);
        self.push_log("Generation cancelled");
    }

    /// Stream ended. A run still `processing` never got a terminal event and
    /// is forced to `error`. Returns true when that happened.
    pub fn finish_stream(&mut self) -> bool {
        if self.session.status != GenerationStatus::Processing {
            return false;
        }
        info!(run_id = ?self.session.run_id, "stream ended without a terminal event");
        self.set_status(GenerationStatus::Error);
        self.push_message(ChatMessage::assistant(STALLED_STREAM_MESSAGE));
        true
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.publish(SessionUpdate::Notice {
            level,
            message: message.into(),
        });
    }

    /// Discards the session and starts over from defaults.
    pub fn reset(&mut self) {
        self.session = RunSession::default();
        self.publish(SessionUpdate::Reset);
    }

    fn set_status(&mut self, status: GenerationStatus) {
        if self.session.status == status {
            return;
        }
        debug!(from = ?self.session.status, to = ?status, "status transition");
        self.session.status = status;
        self.publish(SessionUpdate::StatusChanged(status));
    }

    fn push_message(&mut self, message: ChatMessage) {
        self.session.transcript.push(message.clone());
        self.publish(SessionUpdate::MessageAppended(message));
    }

    fn push_log(&mut self, content: impl Into<String>) {
        let entry = LogEntry::new(content);
        self.session.logs.push(entry.clone());
        self.publish(SessionUpdate::LogAppended(entry));
    }

    fn publish(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }
}

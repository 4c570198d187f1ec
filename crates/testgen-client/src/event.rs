use futures::StreamExt as _;
use futures::future;
use tracing::warn;

use crate::decoder::record_stream;
use crate::errors::{DecodeError, TransportError};
use crate::transport::ByteStream;

/// Prefix marking a data-bearing record.
pub const DATA_PREFIX: &str = "data: ";

/// One typed event emitted by the agent pipeline.
///
/// The wire shape is `{"type": "<kind>", "content": ..., "run_id": ...}`.
/// Kinds this client does not know deserialize to `Unknown` and are ignored
/// downstream.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Run metadata; the first one carrying a `run_id` binds the run.
    Meta {
        #[serde(default)]
        run_id: Option<u64>,
    },
    /// Pipeline log line.
    Log { content: String },
    /// Assistant chat message.
    Message { content: String },
    /// Full replacement of the generated test code.
    Code { content: String },
    /// Full replacement of the test plan.
    Plan { content: String },
    /// Pipeline status string such as `COMPLETED` or `waiting_for_approval`.
    Status { content: String },
    /// End of the processing phase.
    Finish,
    /// Application-level failure reported by the pipeline.
    Error {
        #[serde(default)]
        content: String,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Log { .. } => "log",
            Self::Message { .. } => "message",
            Self::Code { .. } => "code",
            Self::Plan { .. } => "plan",
            Self::Status { .. } => "status",
            Self::Finish => "finish",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Projects one complete record into an event.
///
/// Records without the `data: ` prefix and blank payloads yield `Ok(None)`.
pub fn parse_record(record: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let Some(payload) = record.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    if payload.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| DecodeError::Json {
            message: e.to_string(),
            payload: payload.to_string(),
        })
}

/// Decodes a response body into events.
///
/// Malformed records are logged and skipped; only transport failures end the
/// stream with an error.
pub fn event_stream(
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<StreamEvent, TransportError>> + Send {
    record_stream(bytes).filter_map(|record| {
        future::ready(match record {
            Err(err) => Some(Err(err)),
            Ok(record) => match parse_record(&record) {
                Ok(event) => event.map(Ok),
                Err(err) => {
                    warn!(error = %err, record = %record, "skipping malformed stream record");
                    None
                }
            },
        })
    })
}

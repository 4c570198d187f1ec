use crate::transport::Endpoint;

/// Errors raised while issuing a request or reading its streamed body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, timeout).
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: Endpoint, message: String },
    /// The backend answered with a non-2xx status.
    #[error("API error on {endpoint}: {status} {reason}")]
    Status {
        endpoint: Endpoint,
        status: u16,
        reason: String,
        body: String,
    },
    /// The response body stream broke after the request succeeded.
    #[error("stream read on {endpoint} failed: {message}")]
    Stream { endpoint: Endpoint, message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::Request {
            endpoint,
            message: message.into(),
        }
    }

    /// Creates a stream read error.
    pub fn stream(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::Stream {
            endpoint,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the backend produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request { .. } | Self::Stream { .. } => None,
        }
    }
}

/// A single record whose payload could not be projected into a `StreamEvent`.
///
/// Decode errors never abort a stream; the record is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid event payload: {message}")]
    Json { message: String, payload: String },
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Another `send_message`/`approve_plan` call is still in flight.
    #[error("session is busy with another request")]
    Busy,
    /// `approve_plan` was called before the backend assigned a run id.
    #[error("no active run to approve")]
    NoActiveRun,
    /// Request or stream failure.
    #[error(transparent)]
    Transport(TransportError),
    /// The in-flight request was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        ClientError::Transport(value)
    }
}

use std::fmt;
use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, TransportError};

/// Header carrying the client-held session identifier.
pub const SESSION_HEADER: &str = "X-Session-ID";

/// Streamed response body: byte chunks until `None` (end of stream).
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Backend resources used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Starts or continues a run.
    ChatMessage,
    /// Resolves a pending plan approval.
    ChatApprove,
}

impl Endpoint {
    /// Path relative to the API root.
    pub fn path(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat/message",
            Self::ChatApprove => "chat/approve",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A JSON `POST` to one of the backend endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub session_id: String,
    pub body: serde_json::Value,
}

/// Request/response seam between the orchestrator and the network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and hands back the response body as a chunk stream.
    ///
    /// Non-2xx responses fail before any chunk is produced.
    async fn open_stream(&self, request: ApiRequest) -> Result<ByteStream, TransportError>;

    /// Sends the request and discards the (2xx) response body.
    async fn post(&self, request: ApiRequest) -> Result<(), TransportError>;
}

/// `Transport` backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn send(&self, request: ApiRequest) -> Result<reqwest::Response, TransportError> {
        let endpoint = request.endpoint;
        let url = self.config.endpoint_url(endpoint.path());
        debug!(%endpoint, session_id = %request.session_id, %url, "sending request");

        let response = self
            .client
            .post(url)
            .header(SESSION_HEADER, &request.session_id)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| TransportError::request(endpoint, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                endpoint,
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: ApiRequest) -> Result<ByteStream, TransportError> {
        let endpoint = request.endpoint;
        let response = self.send(request).await?;
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| TransportError::stream(endpoint, e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn post(&self, request: ApiRequest) -> Result<(), TransportError> {
        let endpoint = request.endpoint;
        let response = self.send(request).await?;
        // Drain so the connection can be reused.
        response
            .bytes()
            .await
            .map_err(|e| TransportError::stream(endpoint, e.to_string()))?;
        Ok(())
    }
}

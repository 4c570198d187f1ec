use std::time::Duration;

use crate::errors::ClientError;

/// Default backend base URL (the API root, without a trailing slash).
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
/// Default model requested for new runs.
pub const DEFAULT_MODEL: &str = "Qwen/Qwen3-Coder-480B-A35B-Instruct";

/// Configuration for a `SessionOrchestrator` and its HTTP transport.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API root, for example `http://localhost:8000/api/v1`.
    pub base_url: String,
    /// Client-held session identifier sent as `X-Session-ID`.
    pub session_id: String,
    /// Model name sent with every `chat/message` request.
    pub model_name: String,
    /// Connect timeout for HTTP requests. Response streams themselves are unbounded.
    pub timeout: Duration,
    /// Capacity of the broadcast channel carrying `SessionUpdate`s.
    pub update_buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            update_buffer_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Creates a config with defaults for everything but the session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `TESTGEN_API_URL`, `TESTGEN_SESSION_ID` and
    /// `TESTGEN_MODEL`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Some(url) = non_empty_env("TESTGEN_API_URL") {
            config.base_url = url;
        }
        if let Some(session_id) = non_empty_env("TESTGEN_SESSION_ID") {
            config.session_id = session_id;
        }
        if let Some(model) = non_empty_env("TESTGEN_MODEL") {
            config.model_name = model;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the model name.
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Overrides the default connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the update channel capacity.
    pub fn update_buffer_capacity(mut self, capacity: usize) -> Self {
        self.update_buffer_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        if self.session_id.trim().is_empty() {
            return Err(ClientError::Config("session_id must not be empty".into()));
        }
        if self.model_name.trim().is_empty() {
            return Err(ClientError::Config("model_name must not be empty".into()));
        }
        if self.update_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "update_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

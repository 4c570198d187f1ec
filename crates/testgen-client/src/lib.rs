//! Streaming client for conversational test-generation runs.
//!
//! A run is started with a chat message and streams typed events back over a
//! single HTTP response. When the pipeline pauses for a human decision, the
//! same run is resumed with `approve_plan` on a second stream.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use testgen_client::prelude::*;
//! use tokio::sync::broadcast::error::RecvError;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let session = Arc::new(SessionOrchestrator::connect(ClientConfig::from_env()?)?);
//! let mut updates = session.subscribe();
//! let observer = Arc::clone(&session);
//! tokio::spawn(async move {
//!     loop {
//!         match updates.recv().await {
//!             Ok(update) => println!("{update:?}"),
//!             // Some updates were dropped; redraw from the full state.
//!             Err(RecvError::Lagged(_)) => println!("{:?}", observer.snapshot()),
//!             Err(RecvError::Closed) => break,
//!         }
//!     }
//! });
//!
//! if session.send_message("generate login test").await? == GenerationStatus::WaitingForApproval {
//!     session.approve_plan(Approval::approve()).await?;
//! }
//! println!("{}", session.snapshot().code);
//! # Ok(())
//! # }
//! ```

/// Client configuration.
pub mod config;
/// Chunk-to-record decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Wire events and record parsing.
pub mod event;
/// Run state transitions.
pub mod machine;
/// Tracing subscriber setup for binaries embedding the client.
pub mod observability;
/// `send_message` / `approve_plan` entry points.
pub mod orchestrator;
/// Common imports for typical usage.
pub mod prelude;
/// Session data model.
pub mod session;
/// HTTP request/stream seam.
pub mod transport;
/// Observable session updates.
pub mod updates;

pub use config::ClientConfig;
pub use decoder::FrameDecoder;
pub use errors::{ClientError, DecodeError, TransportError};
pub use event::{StreamEvent, parse_record};
pub use machine::RunStateMachine;
pub use observability::init_observability;
pub use orchestrator::{AbortHandle, Approval, SessionOrchestrator};
pub use session::{ChatMessage, GenerationStatus, LogEntry, LogLevel, Role, RunSession};
pub use transport::{ApiRequest, ByteStream, Endpoint, HttpTransport, Transport};
pub use updates::{NoticeLevel, SessionUpdate};

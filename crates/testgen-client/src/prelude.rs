//! Common imports for UI layers driving a session.
pub use crate::{
    AbortHandle, Approval, ClientConfig, ClientError, GenerationStatus, NoticeLevel, RunSession,
    SessionOrchestrator, SessionUpdate,
};

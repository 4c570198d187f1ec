use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{broadcast, watch};
use tracing::{Instrument as _, Span, info, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, TransportError};
use crate::event::event_stream;
use crate::machine::RunStateMachine;
use crate::observability::session_span;
use crate::session::{GenerationStatus, RunSession};
use crate::transport::{ApiRequest, Endpoint, HttpTransport, Transport};
use crate::updates::{NoticeLevel, SessionUpdate};

/// Notice published when `approve_plan` is called before a run id is known.
pub const NO_ACTIVE_RUN_NOTICE: &str = "There is no active run to approve";

const CLEAR_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Handle used to tear down whatever request is currently in flight.
///
/// Aborting with nothing in flight is a no-op; later calls are unaffected.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl AbortHandle {
    fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(0).0),
        }
    }

    /// Requests cancellation of the in-flight `send_message`/`approve_plan`.
    pub fn abort(&self) {
        self.tx.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// The user's decision on a pending plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Approval {
    pub approved: bool,
    /// Edited plan or rejection reason. Blank feedback is sent as `null`.
    pub feedback: Option<String>,
}

impl Approval {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: None,
        }
    }

    /// Approves with an edited plan.
    pub fn approve_with(feedback: impl Into<String>) -> Self {
        Self {
            approved: true,
            feedback: Some(feedback.into()),
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.into()),
        }
    }

    fn normalized_feedback(&self) -> Option<&str> {
        self.feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Entry point for the UI layer: drives runs and owns their state.
///
/// Calls are serialized per session: a `send_message` or `approve_plan` made
/// while another one is in flight fails with `ClientError::Busy`.
pub struct SessionOrchestrator {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    machine: Mutex<RunStateMachine>,
    updates: broadcast::Sender<SessionUpdate>,
    busy: tokio::sync::Mutex<()>,
    abort: AbortHandle,
    span: Span,
}

impl SessionOrchestrator {
    /// Creates an orchestrator over an explicit transport.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        config.validate()?;
        let (updates, _) = broadcast::channel(config.update_buffer_capacity);
        Ok(Self {
            span: session_span(&config.session_id, &config.model_name),
            transport,
            machine: Mutex::new(RunStateMachine::new(updates.clone())),
            updates,
            config,
            busy: tokio::sync::Mutex::new(()),
            abort: AbortHandle::new(),
        })
    }

    /// Creates an orchestrator talking HTTP to `config.base_url`.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config.clone())?;
        Self::new(config, Arc::new(transport))
    }

    /// Subscribes to session updates published from now on.
    ///
    /// The channel holds `update_buffer_capacity` updates. A receiver that
    /// falls further behind gets `RecvError::Lagged` once, loses the oldest
    /// updates, and then keeps receiving; treat `Lagged` as a cue to resync
    /// from [`snapshot`](Self::snapshot) instead of ending the loop.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> RunSession {
        self.with_machine(|m| m.session().clone())
    }

    pub fn status(&self) -> GenerationStatus {
        self.with_machine(|m| m.status())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Cancels the in-flight request, if any.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Starts a new run, or continues the bound one, with a user message.
    ///
    /// Resolves once the stream ends and returns the final status.
    pub async fn send_message(&self, text: &str) -> Result<GenerationStatus, ClientError> {
        self.run_message(text).instrument(self.span.clone()).await
    }

    /// Resolves a pending plan approval for the bound run.
    ///
    /// A rejection is a single plain request ending in `idle`; an approval
    /// resumes the run on a new stream.
    pub async fn approve_plan(&self, approval: Approval) -> Result<GenerationStatus, ClientError> {
        self.resolve_approval(approval)
            .instrument(self.span.clone())
            .await
    }

    /// Cancels in-flight work, waits for it to unwind, then resets the session.
    pub async fn clear(&self) {
        // A call may start between the abort and the lock; abort again until
        // the guard is ours.
        let _guard = loop {
            self.abort.abort();
            if let Ok(guard) = tokio::time::timeout(CLEAR_RETRY_INTERVAL, self.busy.lock()).await {
                break guard;
            }
        };
        self.with_machine(|m| m.reset());
        self.span.in_scope(|| info!("session cleared"));
    }

    async fn run_message(&self, text: &str) -> Result<GenerationStatus, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::Validation("message must not be empty".into()));
        }
        // Subscribe before taking the guard so a concurrent cancel is never missed.
        let mut abort_rx = self.abort.subscribe();
        let _guard = self.busy.try_lock().map_err(|_| ClientError::Busy)?;

        let run_id = self.with_machine(|m| {
            m.begin_message(text);
            m.run_id()
        });
        info!(?run_id, "sending chat message");

        let request = self.request(
            Endpoint::ChatMessage,
            serde_json::json!({
                "message": text,
                "model_name": self.config.model_name,
                "run_id": run_id,
            }),
        );
        self.drive_stream(request, &mut abort_rx).await
    }

    async fn resolve_approval(&self, approval: Approval) -> Result<GenerationStatus, ClientError> {
        let mut abort_rx = self.abort.subscribe();
        let _guard = self.busy.try_lock().map_err(|_| ClientError::Busy)?;
        let Some(run_id) = self.with_machine(|m| m.run_id()) else {
            warn!("approval requested without a bound run");
            self.with_machine(|m| m.notify(NoticeLevel::Error, NO_ACTIVE_RUN_NOTICE));
            return Err(ClientError::NoActiveRun);
        };
        info!(run_id, approved = approval.approved, "resolving plan approval");

        let request = self.request(
            Endpoint::ChatApprove,
            serde_json::json!({
                "run_id": run_id,
                "approved": approval.approved,
                "feedback": approval.normalized_feedback(),
            }),
        );

        if !approval.approved {
            return match until_aborted(&mut abort_rx, self.transport.post(request)).await {
                None => Err(self.cancelled()),
                Some(Err(err)) => Err(self.transport_failed(err)),
                Some(Ok(())) => Ok(self.with_machine(|m| {
                    m.record_rejection();
                    m.status()
                })),
            };
        }

        self.with_machine(|m| m.begin_approval());
        self.drive_stream(request, &mut abort_rx).await
    }

    async fn drive_stream(
        &self,
        request: ApiRequest,
        abort_rx: &mut watch::Receiver<u64>,
    ) -> Result<GenerationStatus, ClientError> {
        let endpoint = request.endpoint;
        let bytes = match until_aborted(abort_rx, self.transport.open_stream(request)).await {
            None => return Err(self.cancelled()),
            Some(Err(err)) => return Err(self.transport_failed(err)),
            Some(Ok(bytes)) => bytes,
        };

        let mut events = pin!(event_stream(bytes));
        loop {
            match until_aborted(abort_rx, events.next()).await {
                None => return Err(self.cancelled()),
                Some(None) => break,
                Some(Some(Ok(event))) => self.with_machine(move |m| m.apply(event)),
                Some(Some(Err(err))) => return Err(self.transport_failed(err)),
            }
        }

        let status = self.with_machine(|m| {
            m.finish_stream();
            m.status()
        });
        info!(%endpoint, ?status, "stream ended");
        Ok(status)
    }

    fn request(&self, endpoint: Endpoint, body: serde_json::Value) -> ApiRequest {
        ApiRequest {
            endpoint,
            session_id: self.config.session_id.clone(),
            body,
        }
    }

    fn transport_failed(&self, err: TransportError) -> ClientError {
        warn!(error = %err, "transport failure");
        self.with_machine(|m| m.record_transport_failure(&err));
        ClientError::Transport(err)
    }

    fn cancelled(&self) -> ClientError {
        info!("request cancelled");
        self.with_machine(|m| m.record_cancelled());
        ClientError::Cancelled
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut RunStateMachine) -> R) -> R {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut machine)
    }
}

/// Races `fut` against an abort; `None` means the abort won.
async fn until_aborted<F: Future>(abort_rx: &mut watch::Receiver<u64>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = abort_rx.changed() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{
        APPROVAL_CODE_PLACEHOLDER, COMPLETION_MESSAGE, REJECTION_MESSAGE, STALLED_STREAM_MESSAGE,
    };
    use crate::session::Role;
    use crate::transport::ByteStream;
    use futures::stream;
    use std::collections::VecDeque;
    use tokio::sync::broadcast::error::RecvError;

    enum Script {
        /// Body chunks, then end of stream.
        Chunks(Vec<String>),
        /// Body chunks, then the stream stays open forever.
        ChunksThenHang(Vec<String>),
        Fail(TransportError),
    }

    #[derive(Default)]
    struct FakeTransport {
        scripts: Mutex<VecDeque<Script>>,
        streamed: Mutex<Vec<ApiRequest>>,
        posted: Mutex<Vec<ApiRequest>>,
    }

    impl FakeTransport {
        fn with(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            })
        }

        fn streamed(&self) -> Vec<ApiRequest> {
            self.streamed.lock().expect("lock").clone()
        }

        fn posted(&self) -> Vec<ApiRequest> {
            self.posted.lock().expect("lock").clone()
        }
    }

    fn chunk_stream(chunks: Vec<String>) -> impl futures::Stream<Item = Result<bytes::Bytes, TransportError>> {
        stream::iter(chunks.into_iter().map(|c| Ok(bytes::Bytes::from(c))))
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn open_stream(&self, request: ApiRequest) -> Result<ByteStream, TransportError> {
            self.streamed.lock().expect("lock").push(request);
            let script = self
                .scripts
                .lock()
                .expect("lock")
                .pop_front()
                .expect("unexpected open_stream call");
            match script {
                Script::Chunks(chunks) => Ok(Box::pin(chunk_stream(chunks))),
                Script::ChunksThenHang(chunks) => {
                    Ok(Box::pin(chunk_stream(chunks).chain(stream::pending())))
                }
                Script::Fail(err) => Err(err),
            }
        }

        async fn post(&self, request: ApiRequest) -> Result<(), TransportError> {
            self.posted.lock().expect("lock").push(request);
            Ok(())
        }
    }

    fn record(payload: serde_json::Value) -> String {
        format!("data: {payload}\n\n")
    }

    fn body(payloads: Vec<serde_json::Value>) -> Vec<String> {
        vec![payloads.into_iter().map(record).collect::<String>()]
    }

    fn orchestrator(transport: Arc<FakeTransport>) -> Arc<SessionOrchestrator> {
        let config = ClientConfig::new("session-1").model_name("model-a");
        Arc::new(SessionOrchestrator::new(config, transport).expect("orchestrator"))
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<SessionUpdate>,
        pred: impl Fn(&SessionUpdate) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(update) if pred(&update) => return,
                    Ok(_) => {}
                    Err(err) => panic!("update channel failed: {err}"),
                }
            }
        })
        .await
        .expect("update arrived in time");
    }

    fn waiting_for_approval_run(run_id: u64) -> Script {
        Script::Chunks(body(vec![
            serde_json::json!({"type": "meta", "run_id": run_id}),
            serde_json::json!({"type": "plan", "content": "1. open login page"}),
            serde_json::json!({"type": "status", "content": "WAITING_FOR_APPROVAL"}),
            serde_json::json!({"type": "finish", "content": "waiting_for_approval"}),
        ]))
    }

    #[tokio::test]
    async fn completed_run_binds_id_and_keeps_code() {
        let transport = FakeTransport::with(vec![Script::Chunks(body(vec![
            serde_json::json!({"type": "meta", "run_id": 7}),
            serde_json::json!({"type": "log", "content": "Agent started"}),
            serde_json::json!({"type": "code", "content": "def test_x(): pass"}),
            serde_json::json!({"type": "status", "content": "COMPLETED"}),
            serde_json::json!({"type": "finish"}),
        ]))]);
        let orch = orchestrator(transport.clone());

        let status = orch.send_message("generate login test").await.expect("run");
        assert_eq!(status, GenerationStatus::Success);

        let session = orch.snapshot();
        assert_eq!(session.run_id, Some(7));
        assert_eq!(session.status, GenerationStatus::Success);
        assert_eq!(session.code, "def test_x(): pass");
        assert_eq!(session.logs.len(), 1);
        assert_eq!(session.transcript.len(), 2);
        assert_eq!(session.transcript[0].role, Role::User);
        assert_eq!(session.transcript[0].content, "generate login test");
        assert_eq!(session.transcript[1].content, COMPLETION_MESSAGE);

        let requests = transport.streamed();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].endpoint, Endpoint::ChatMessage);
        assert_eq!(requests[0].session_id, "session-1");
        assert_eq!(
            requests[0].body,
            serde_json::json!({"message": "generate login test", "model_name": "model-a", "run_id": null})
        );
    }

    #[tokio::test]
    async fn rejection_posts_once_and_returns_to_idle() {
        let transport = FakeTransport::with(vec![waiting_for_approval_run(7)]);
        let orch = orchestrator(transport.clone());
        let status = orch.send_message("generate login test").await.expect("run");
        assert_eq!(status, GenerationStatus::WaitingForApproval);
        let before = orch.snapshot().transcript.len();

        let status = orch
            .approve_plan(Approval::reject("too broad"))
            .await
            .expect("reject");
        assert_eq!(status, GenerationStatus::Idle);

        assert_eq!(transport.streamed().len(), 1, "no stream opened for rejection");
        let posted = transport.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].endpoint, Endpoint::ChatApprove);
        assert_eq!(
            posted[0].body,
            serde_json::json!({"run_id": 7, "approved": false, "feedback": "too broad"})
        );

        let session = orch.snapshot();
        assert_eq!(session.status, GenerationStatus::Idle);
        assert_eq!(session.transcript.len(), before + 1);
        let last = session.transcript.last().expect("message");
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, REJECTION_MESSAGE);
    }

    #[tokio::test]
    async fn approval_resumes_same_run_on_new_stream() {
        let transport = FakeTransport::with(vec![
            waiting_for_approval_run(7),
            Script::Chunks(body(vec![
                serde_json::json!({"type": "status", "content": "generating"}),
                serde_json::json!({"type": "plan", "content": "1. open login page\n2. submit"}),
                serde_json::json!({"type": "code", "content": "def test_login(): ..."}),
                serde_json::json!({"type": "status", "content": "COMPLETED"}),
                serde_json::json!({"type": "finish", "content": "done"}),
            ])),
        ]);
        let orch = orchestrator(transport.clone());
        orch.send_message("generate login test").await.expect("run");

        let mut updates = orch.subscribe();
        let status = orch.approve_plan(Approval::approve()).await.expect("approve");
        assert_eq!(status, GenerationStatus::Success);

        let first_two: Vec<_> = [updates.try_recv(), updates.try_recv()]
            .into_iter()
            .map(|u| u.expect("update"))
            .collect();
        assert_eq!(
            first_two,
            vec![
                SessionUpdate::StatusChanged(GenerationStatus::Processing),
                SessionUpdate::CodeReplaced(APPROVAL_CODE_PLACEHOLDER.into()),
            ]
        );

        let requests = transport.streamed();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].endpoint, Endpoint::ChatApprove);
        assert_eq!(
            requests[1].body,
            serde_json::json!({"run_id": 7, "approved": true, "feedback": null})
        );
        let session = orch.snapshot();
        assert_eq!(session.run_id, Some(7));
        assert_eq!(session.code, "def test_login(): ...");
        assert_eq!(session.plan, "1. open login page\n2. submit");
        assert!(transport.posted().is_empty());
    }

    #[tokio::test]
    async fn stream_ending_without_terminal_event_is_forced_to_error() {
        let transport = FakeTransport::with(vec![Script::Chunks(body(vec![
            serde_json::json!({"type": "meta", "run_id": 11}),
            serde_json::json!({"type": "log", "content": "Analyst: reading request"}),
            serde_json::json!({"type": "log", "content": "Coder: drafting"}),
        ]))]);
        let orch = orchestrator(transport);

        let status = orch.send_message("generate").await.expect("stream ends normally");
        assert_eq!(status, GenerationStatus::Error);
        let session = orch.snapshot();
        assert_eq!(session.logs.len(), 2);
        let assistant: Vec<_> = session
            .transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].content, STALLED_STREAM_MESSAGE);
    }

    #[tokio::test]
    async fn malformed_record_between_logs_is_skipped() {
        let chunks = vec![
            record(serde_json::json!({"type": "log", "content": "first"})),
            "data: {not valid}\n\n".to_string(),
            record(serde_json::json!({"type": "log", "content": "second"})),
            record(serde_json::json!({"type": "finish"})),
        ];
        let transport = FakeTransport::with(vec![Script::Chunks(chunks)]);
        let orch = orchestrator(transport);

        let status = orch.send_message("generate").await.expect("run");
        assert_eq!(status, GenerationStatus::Success);
        let logs: Vec<_> = orch
            .snapshot()
            .logs
            .into_iter()
            .map(|l| l.content)
            .collect();
        assert_eq!(logs, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn follow_up_message_reuses_run_id_and_keeps_logs() {
        let transport = FakeTransport::with(vec![
            Script::Chunks(body(vec![
                serde_json::json!({"type": "meta", "run_id": 5}),
                serde_json::json!({"type": "log", "content": "Agent started"}),
                serde_json::json!({"type": "message", "content": "Which page should I test?"}),
                serde_json::json!({"type": "status", "content": "waiting_for_input"}),
                serde_json::json!({"type": "finish"}),
            ])),
            Script::Chunks(body(vec![
                serde_json::json!({"type": "log", "content": "Coder: writing"}),
                serde_json::json!({"type": "finish"}),
            ])),
        ]);
        let orch = orchestrator(transport.clone());

        assert_eq!(
            orch.send_message("generate").await.expect("first"),
            GenerationStatus::WaitingForInput
        );
        assert_eq!(
            orch.send_message("the login page").await.expect("second"),
            GenerationStatus::Success
        );

        let requests = transport.streamed();
        assert_eq!(requests[1].body["run_id"], serde_json::json!(5));
        let session = orch.snapshot();
        assert_eq!(session.logs.len(), 2);
        assert_eq!(session.transcript.len(), 4);
    }

    #[tokio::test]
    async fn transport_failure_sets_error_and_logs() {
        let transport = FakeTransport::with(vec![Script::Fail(TransportError::Status {
            endpoint: Endpoint::ChatMessage,
            status: 500,
            reason: "Internal Server Error".into(),
            body: String::new(),
        })]);
        let orch = orchestrator(transport);

        let err = orch.send_message("generate").await.expect_err("500 fails");
        assert!(matches!(err, ClientError::Transport(TransportError::Status { status: 500, .. })));
        let session = orch.snapshot();
        assert_eq!(session.status, GenerationStatus::Error);
        assert_eq!(session.logs.len(), 1);
        assert!(session.logs[0].content.contains("500"));
    }

    #[tokio::test]
    async fn approve_without_run_fails_fast_with_notice() {
        let transport = FakeTransport::with(vec![]);
        let orch = orchestrator(transport.clone());
        let mut updates = orch.subscribe();

        let err = orch.approve_plan(Approval::approve()).await.expect_err("no run");
        assert_eq!(err, ClientError::NoActiveRun);
        assert_eq!(
            updates.try_recv().expect("notice"),
            SessionUpdate::Notice {
                level: NoticeLevel::Error,
                message: NO_ACTIVE_RUN_NOTICE.into()
            }
        );
        assert!(transport.streamed().is_empty());
        assert!(transport.posted().is_empty());
        assert_eq!(orch.status(), GenerationStatus::Idle);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_state_change() {
        let orch = orchestrator(FakeTransport::with(vec![]));
        let err = orch.send_message("   ").await.expect_err("blank");
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(orch.snapshot().transcript.is_empty());
    }

    #[tokio::test]
    async fn overlapping_calls_are_rejected_while_busy() {
        let transport = FakeTransport::with(vec![Script::ChunksThenHang(body(vec![
            serde_json::json!({"type": "meta", "run_id": 3}),
            serde_json::json!({"type": "log", "content": "Agent started"}),
        ]))]);
        let orch = orchestrator(transport.clone());
        let mut updates = orch.subscribe();

        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.send_message("generate").await }
        });
        wait_for(&mut updates, |u| matches!(u, SessionUpdate::LogAppended(_))).await;

        assert_eq!(orch.send_message("again").await, Err(ClientError::Busy));
        assert_eq!(orch.approve_plan(Approval::approve()).await, Err(ClientError::Busy));
        assert_eq!(transport.streamed().len(), 1);
        assert_eq!(orch.snapshot().transcript.len(), 1);

        orch.cancel();
        assert_eq!(running.await.expect("join"), Err(ClientError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_tears_down_hanging_stream() {
        let transport = FakeTransport::with(vec![Script::ChunksThenHang(body(vec![
            serde_json::json!({"type": "meta", "run_id": 3}),
            serde_json::json!({"type": "log", "content": "Agent started"}),
        ]))]);
        let orch = orchestrator(transport);
        let mut updates = orch.subscribe();
        let abort = orch.abort_handle();

        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.send_message("generate").await }
        });
        wait_for(&mut updates, |u| matches!(u, SessionUpdate::LogAppended(_))).await;
        abort.abort();

        assert_eq!(running.await.expect("join"), Err(ClientError::Cancelled));
        let session = orch.snapshot();
        assert_eq!(session.status, GenerationStatus::Idle);
        assert_eq!(session.run_id, Some(3));
        assert_eq!(
            session.logs.last().map(|l| l.content.as_str()),
            Some("Generation cancelled")
        );
    }

    #[tokio::test]
    async fn abort_before_a_call_does_not_cancel_it() {
        let transport = FakeTransport::with(vec![Script::Chunks(body(vec![
            serde_json::json!({"type": "finish"}),
        ]))]);
        let orch = orchestrator(transport);
        orch.cancel();
        assert_eq!(
            orch.send_message("generate").await,
            Ok(GenerationStatus::Success)
        );
    }

    #[tokio::test]
    async fn clear_cancels_in_flight_run_and_resets() {
        let transport = FakeTransport::with(vec![Script::ChunksThenHang(body(vec![
            serde_json::json!({"type": "meta", "run_id": 3}),
            serde_json::json!({"type": "log", "content": "Agent started"}),
        ]))]);
        let orch = orchestrator(transport);
        let mut updates = orch.subscribe();

        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.send_message("generate").await }
        });
        wait_for(&mut updates, |u| matches!(u, SessionUpdate::LogAppended(_))).await;

        orch.clear().await;
        assert_eq!(running.await.expect("join"), Err(ClientError::Cancelled));
        assert_eq!(orch.snapshot(), RunSession::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clear_completes_when_racing_a_starting_call() {
        for _ in 0..50 {
            let transport = FakeTransport::with(vec![Script::ChunksThenHang(body(vec![
                serde_json::json!({"type": "log", "content": "Agent started"}),
            ]))]);
            let orch = orchestrator(transport);
            let running = tokio::spawn({
                let orch = orch.clone();
                async move { orch.send_message("generate").await }
            });

            tokio::time::timeout(Duration::from_secs(5), orch.clear())
                .await
                .expect("clear finished");
            running.abort();
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving_and_resyncs_from_snapshot() {
        let mut payloads: Vec<_> = (0..20)
            .map(|i| serde_json::json!({"type": "log", "content": format!("step {i}")}))
            .collect();
        payloads.push(serde_json::json!({"type": "status", "content": "COMPLETED"}));
        payloads.push(serde_json::json!({"type": "finish"}));
        let transport = FakeTransport::with(vec![Script::Chunks(body(payloads))]);
        let config = ClientConfig::new("session-1")
            .model_name("model-a")
            .update_buffer_capacity(4);
        let orch = SessionOrchestrator::new(config, transport).expect("orchestrator");
        let mut updates = orch.subscribe();

        orch.send_message("generate").await.expect("run");

        match updates.recv().await {
            Err(RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        let mut retained = Vec::new();
        while let Ok(update) = updates.try_recv() {
            retained.push(update);
        }
        assert_eq!(retained.len(), 4);

        let session = orch.snapshot();
        assert_eq!(session.logs.len(), 20);
        assert_eq!(session.status, GenerationStatus::Success);
    }
}

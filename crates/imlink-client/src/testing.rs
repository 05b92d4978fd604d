// ABOUTME: In-memory transport and recording handler for session tests.
// ABOUTME: FakeDialer counts and scripts dials; FakeConnection exposes each stream's server side.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use imlink_discovery::Endpoint;
use imlink_grpc::{
    BidirectionalStream, Dialer, GrpcClientError, ImConnection, MessageStream, OutboundStream,
    StreamIdentity, StreamReceiver,
};
use imlink_proto::{
    GetRoomInfoRequest, GetRoomInfoResponse, HealthCheckRequest, HealthCheckResponse,
    JoinRoomRequest, JoinRoomResponse, LeaveRoomRequest, LeaveRoomResponse, MessageRequest,
    MessageResponse, RoomInfo, SendMessageRequest, SendMessageResponse, ServingStatus,
    TranscriptRequest, TranscriptResponse, UploadAudioRequest, UploadAudioResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::SessionError;
use crate::frame::InboundFrame;
use crate::handler::SessionHandler;

/// Endpoint `id` of the default service at `10.0.0.{port - 9000}:{port}`.
pub(crate) fn endpoint(id: &str, port: u16) -> Endpoint {
    Endpoint::new(id, "im-service", format!("10.0.0.{}", port - 9000), port)
}

/// Poll `condition` until it holds; panics after five seconds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Server side of one fake message stream.
pub(crate) struct ServerSide {
    requests: BoxStream<'static, MessageRequest>,
    responses: mpsc::Sender<Result<MessageResponse, GrpcClientError>>,
}

impl ServerSide {
    /// Next frame the client wrote, or `None` once it half-closed.
    pub(crate) async fn next_request(&mut self) -> Option<MessageRequest> {
        self.requests.next().await
    }

    pub(crate) async fn push(&self, response: MessageResponse) {
        let _ = self.responses.send(Ok(response)).await;
    }

    pub(crate) async fn fail(&self, err: GrpcClientError) {
        let _ = self.responses.send(Err(err)).await;
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BoxStream<'static, MessageRequest>,
        mpsc::Sender<Result<MessageResponse, GrpcClientError>>,
    ) {
        (self.requests, self.responses)
    }
}

pub(crate) struct FakeConnection {
    stream_buffer: usize,
    servers: Mutex<Vec<Option<ServerSide>>>,
    identities: Mutex<Vec<Option<StreamIdentity>>>,
    calls: Mutex<Vec<String>>,
    call_delay: Mutex<Duration>,
    fail_open: AtomicBool,
    closed: AtomicBool,
}

impl FakeConnection {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_stream_buffer(16)
    }

    pub(crate) fn with_stream_buffer(stream_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            stream_buffer,
            servers: Mutex::new(Vec::new()),
            identities: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            call_delay: Mutex::new(Duration::ZERO),
            fail_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Take the server side of the `index`th opened stream. Dropping it ends the stream.
    pub(crate) fn take_server(&self, index: usize) -> ServerSide {
        self.servers.lock().unwrap()[index]
            .take()
            .expect("server side already taken")
    }

    pub(crate) fn open_count(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub(crate) fn identities(&self) -> Vec<Option<StreamIdentity>> {
        self.identities.lock().unwrap().clone()
    }

    /// Unary calls seen, as `Method:room`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = delay;
    }

    fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    async fn unary(&self, call: String, timeout: Duration) -> Result<(), GrpcClientError> {
        if self.is_closed() {
            return Err(GrpcClientError::ConnectionClosed);
        }
        self.calls.lock().unwrap().push(call);
        let delay = *self.call_delay.lock().unwrap();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(GrpcClientError::Timeout(timeout));
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[async_trait]
impl ImConnection for FakeConnection {
    async fn open_stream(
        &self,
        identity: Option<&StreamIdentity>,
    ) -> Result<MessageStream, GrpcClientError> {
        if self.is_closed() {
            return Err(GrpcClientError::ConnectionClosed);
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(GrpcClientError::StreamError("scripted open failure".into()));
        }
        self.identities.lock().unwrap().push(identity.cloned());

        let outbound = OutboundStream::<MessageRequest>::new(self.stream_buffer);
        let (tx, rx) = mpsc::channel(16);
        self.servers.lock().unwrap().push(Some(ServerSide {
            requests: outbound.stream,
            responses: tx,
        }));
        Ok(BidirectionalStream::new(
            outbound.sender,
            StreamReceiver::new(ReceiverStream::new(rx)),
        ))
    }

    async fn send_message(
        &self,
        request: SendMessageRequest,
        timeout: Duration,
    ) -> Result<SendMessageResponse, GrpcClientError> {
        let message = request.message.unwrap_or_default();
        self.unary(format!("SendMessage:{}", message.room_id), timeout)
            .await?;
        Ok(SendMessageResponse {
            success: true,
            message_id: message.message_id,
            error: String::new(),
        })
    }

    async fn join_room(
        &self,
        request: JoinRoomRequest,
        timeout: Duration,
    ) -> Result<JoinRoomResponse, GrpcClientError> {
        self.unary(format!("JoinRoom:{}", request.room_id), timeout)
            .await?;
        Ok(JoinRoomResponse {
            success: true,
            message: "joined".to_string(),
            room_info: Some(RoomInfo {
                room_id: request.room_id,
                member_ids: vec![request.user_id],
                member_count: 1,
                ..Default::default()
            }),
        })
    }

    async fn leave_room(
        &self,
        request: LeaveRoomRequest,
        timeout: Duration,
    ) -> Result<LeaveRoomResponse, GrpcClientError> {
        self.unary(format!("LeaveRoom:{}", request.room_id), timeout)
            .await?;
        Ok(LeaveRoomResponse {
            success: true,
            message: "left".to_string(),
        })
    }

    async fn get_room_info(
        &self,
        request: GetRoomInfoRequest,
        timeout: Duration,
    ) -> Result<GetRoomInfoResponse, GrpcClientError> {
        self.unary(format!("GetRoomInfo:{}", request.room_id), timeout)
            .await?;
        if request.room_id == "missing" {
            return Ok(GetRoomInfoResponse {
                success: false,
                room_info: None,
            });
        }
        Ok(GetRoomInfoResponse {
            success: true,
            room_info: Some(RoomInfo {
                room_id: request.room_id,
                ..Default::default()
            }),
        })
    }

    async fn get_audio_transcript(
        &self,
        request: TranscriptRequest,
        timeout: Duration,
    ) -> Result<TranscriptResponse, GrpcClientError> {
        self.unary(format!("GetAudioTranscript:{}", request.audio_id), timeout)
            .await?;
        Ok(TranscriptResponse {
            audio_id: request.audio_id,
            transcript: "hello".to_string(),
            status: "done".to_string(),
        })
    }

    async fn upload_audio(
        &self,
        requests: Vec<UploadAudioRequest>,
        timeout: Duration,
    ) -> Result<UploadAudioResponse, GrpcClientError> {
        self.unary("UploadAudio:".to_string(), timeout).await?;
        Ok(UploadAudioResponse {
            success: true,
            audio_id: format!("audio-{}", requests.len()),
            url: String::new(),
            message: String::new(),
        })
    }

    async fn health_check(
        &self,
        _request: HealthCheckRequest,
        timeout: Duration,
    ) -> Result<HealthCheckResponse, GrpcClientError> {
        self.unary("HealthCheck:".to_string(), timeout).await?;
        Ok(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct DialScript {
    failing: bool,
    fail_after: Option<usize>,
    fail_next: usize,
    fail_streams: bool,
}

pub(crate) struct FakeDialer {
    stream_buffer: usize,
    dials: AtomicUsize,
    dial_delay: Mutex<Duration>,
    script: Mutex<DialScript>,
    addresses: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDialer {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(16, DialScript::default())
    }

    pub(crate) fn with_stream_buffer(stream_buffer: usize) -> Arc<Self> {
        Self::build(stream_buffer, DialScript::default())
    }

    /// Every dial fails.
    pub(crate) fn failing() -> Arc<Self> {
        Self::build(
            16,
            DialScript {
                failing: true,
                ..Default::default()
            },
        )
    }

    /// The first `n` dials succeed, every later one fails.
    pub(crate) fn fail_after(n: usize) -> Arc<Self> {
        Self::build(
            16,
            DialScript {
                fail_after: Some(n),
                ..Default::default()
            },
        )
    }

    fn build(stream_buffer: usize, script: DialScript) -> Arc<Self> {
        Arc::new(Self {
            stream_buffer,
            dials: AtomicUsize::new(0),
            dial_delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(script),
            addresses: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        let mut script = self.script.lock().unwrap();
        script.failing = failing;
        script.fail_after = None;
    }

    /// Every dial waits this long before completing.
    pub(crate) fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock().unwrap() = delay;
    }

    /// Fail the next `n` dials, then resume the current script.
    pub(crate) fn fail_next(&self, n: usize) {
        self.script.lock().unwrap().fail_next = n;
    }

    /// Connections dialed from now on refuse to open streams.
    pub(crate) fn fail_streams(&self, fail: bool) {
        self.script.lock().unwrap().fail_streams = fail;
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }

    /// The `index`th successfully dialed connection.
    pub(crate) fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> Result<Arc<dyn ImConnection>, GrpcClientError> {
        let n = self.dials.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().unwrap().push(address.to_string());
        let delay = *self.dial_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fail_streams = {
            let mut script = self.script.lock().unwrap();
            let fail = if script.fail_next > 0 {
                script.fail_next -= 1;
                true
            } else {
                script.failing || script.fail_after.is_some_and(|limit| n >= limit)
            };
            if fail {
                return Err(GrpcClientError::ConnectionFailed(format!(
                    "scripted dial failure to {}",
                    address
                )));
            }
            script.fail_streams
        };

        let conn = FakeConnection::with_stream_buffer(self.stream_buffer);
        conn.set_fail_open(fail_streams);
        self.connections.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

#[derive(Default)]
struct Recorded {
    connects: usize,
    disconnects: usize,
    errors: Vec<SessionError>,
    messages: Vec<InboundFrame>,
}

/// Handler that records every event.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    pub(crate) fn errors(&self) -> Vec<SessionError> {
        self.inner.lock().unwrap().errors.clone()
    }

    pub(crate) fn messages(&self) -> Vec<InboundFrame> {
        self.inner.lock().unwrap().messages.clone()
    }
}

impl SessionHandler for Recorder {
    fn on_message(&self, frame: &InboundFrame) {
        self.inner.lock().unwrap().messages.push(frame.clone());
    }

    fn on_connect(&self) {
        self.inner.lock().unwrap().connects += 1;
    }

    fn on_disconnect(&self, _reason: &SessionError) {
        self.inner.lock().unwrap().disconnects += 1;
    }

    fn on_error(&self, error: &SessionError) {
        self.inner.lock().unwrap().errors.push(error.clone());
    }
}

// ABOUTME: Transport seam between a session and the IM service: dialing and connections.
// ABOUTME: The tonic implementation opens the message stream lazily and bounds unary calls.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use imlink_proto::client::ImServiceClient;
use imlink_proto::{
    GetRoomInfoRequest, GetRoomInfoResponse, HealthCheckRequest, HealthCheckResponse,
    JoinRoomRequest, JoinRoomResponse, LeaveRoomRequest, LeaveRoomResponse, MessageRequest,
    MessageResponse, SendMessageRequest, SendMessageResponse, TranscriptRequest,
    TranscriptResponse, UploadAudioRequest, UploadAudioResponse,
};
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;

use crate::channel::{create_channel, ChannelConfig, KeepAliveConfig};
use crate::error::GrpcClientError;
use crate::stream::{BidirectionalStream, OutboundStream, StreamReceiver, DEFAULT_CHANNEL_BUFFER};

/// Call metadata key carrying the user id on the message stream.
pub const USER_ID_HEADER: &str = "user-id";
/// Call metadata key carrying the default room id on the message stream.
pub const ROOM_ID_HEADER: &str = "room-id";
/// Chunk size for audio uploads.
pub const AUDIO_CHUNK_SIZE: usize = 32 * 1024;

/// The session's bidirectional message stream.
pub type MessageStream = BidirectionalStream<MessageRequest, MessageResponse>;

/// Identity attached to the stream as call metadata rather than message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub user_id: String,
    pub room_id: String,
}

fn unimplemented(method: &str) -> GrpcClientError {
    GrpcClientError::Rpc {
        code: tonic::Code::Unimplemented,
        message: format!("{} is not supported by this connection", method),
    }
}

/// An established connection to one IM service instance.
///
/// Unary operations default to `Unimplemented` so lightweight connections
/// only need to provide the message stream.
#[async_trait]
pub trait ImConnection: Send + Sync {
    /// Open the bidirectional message stream.
    async fn open_stream(
        &self,
        identity: Option<&StreamIdentity>,
    ) -> Result<MessageStream, GrpcClientError>;

    async fn send_message(
        &self,
        _request: SendMessageRequest,
        _timeout: Duration,
    ) -> Result<SendMessageResponse, GrpcClientError> {
        Err(unimplemented("SendMessage"))
    }

    async fn join_room(
        &self,
        _request: JoinRoomRequest,
        _timeout: Duration,
    ) -> Result<JoinRoomResponse, GrpcClientError> {
        Err(unimplemented("JoinRoom"))
    }

    async fn leave_room(
        &self,
        _request: LeaveRoomRequest,
        _timeout: Duration,
    ) -> Result<LeaveRoomResponse, GrpcClientError> {
        Err(unimplemented("LeaveRoom"))
    }

    async fn get_room_info(
        &self,
        _request: GetRoomInfoRequest,
        _timeout: Duration,
    ) -> Result<GetRoomInfoResponse, GrpcClientError> {
        Err(unimplemented("GetRoomInfo"))
    }

    async fn get_audio_transcript(
        &self,
        _request: TranscriptRequest,
        _timeout: Duration,
    ) -> Result<TranscriptResponse, GrpcClientError> {
        Err(unimplemented("GetAudioTranscript"))
    }

    /// Client-streaming upload; `requests` is the metadata message followed by chunks.
    async fn upload_audio(
        &self,
        _requests: Vec<UploadAudioRequest>,
        _timeout: Duration,
    ) -> Result<UploadAudioResponse, GrpcClientError> {
        Err(unimplemented("UploadAudio"))
    }

    async fn health_check(
        &self,
        _request: HealthCheckRequest,
        _timeout: Duration,
    ) -> Result<HealthCheckResponse, GrpcClientError> {
        Err(unimplemented("HealthCheck"))
    }

    /// Close the connection. Later calls fail with `ConnectionClosed`.
    async fn close(&self);
}

/// Establishes connections to `host:port` addresses.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ImConnection>, GrpcClientError>;
}

/// Dials tonic channels.
#[derive(Debug, Clone)]
pub struct GrpcDialer {
    keep_alive: Option<KeepAliveConfig>,
    use_tls: bool,
}

impl GrpcDialer {
    /// Plaintext dialer with default keep-alive.
    pub fn new() -> Self {
        Self {
            keep_alive: Some(KeepAliveConfig::default()),
            use_tls: false,
        }
    }

    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<KeepAliveConfig>) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl Default for GrpcDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ImConnection>, GrpcClientError> {
        let mut config = ChannelConfig::new(address).with_connect_timeout(timeout);
        config.keep_alive = self.keep_alive.clone();
        if self.use_tls {
            config = config.with_tls();
        }
        let channel = with_deadline(timeout, create_channel(&config)).await?;
        Ok(Arc::new(GrpcConnection::new(channel, address)))
    }
}

/// A tonic channel speaking the IM service.
pub struct GrpcConnection {
    client: Mutex<Option<ImServiceClient<Channel>>>,
    address: String,
}

impl GrpcConnection {
    /// Wrap an already-connected channel.
    pub fn new(channel: Channel, address: impl Into<String>) -> Self {
        Self {
            client: Mutex::new(Some(ImServiceClient::new(channel))),
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn client(&self) -> Result<ImServiceClient<Channel>, GrpcClientError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(GrpcClientError::ConnectionClosed)
    }
}

/// Apply a deadline both as the `grpc-timeout` header and as a local timer.
fn request<T>(message: T, timeout: Duration) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.set_timeout(timeout);
    request
}

async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, GrpcClientError>
where
    F: Future<Output = Result<T, GrpcClientError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| GrpcClientError::Timeout(timeout))?
}

/// Names the boxed outbound stream so rustc can prove the call future is `Send`.
struct OutboundRequests(futures::stream::BoxStream<'static, MessageRequest>);

impl futures::Stream for OutboundRequests {
    type Item = MessageRequest;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<MessageRequest>> {
        self.0.as_mut().poll_next(cx)
    }
}

fn ascii_value(value: &str) -> Result<MetadataValue<tonic::metadata::Ascii>, GrpcClientError> {
    value
        .parse()
        .map_err(|_| GrpcClientError::StreamError(format!("invalid metadata value '{}'", value)))
}

#[async_trait]
impl ImConnection for GrpcConnection {
    async fn open_stream(
        &self,
        identity: Option<&StreamIdentity>,
    ) -> Result<MessageStream, GrpcClientError> {
        let mut client = self.client()?;
        let outbound = OutboundStream::<MessageRequest>::new(DEFAULT_CHANNEL_BUFFER);
        let mut request = tonic::Request::new(OutboundRequests(outbound.stream));
        if let Some(identity) = identity {
            let metadata = request.metadata_mut();
            metadata.insert(USER_ID_HEADER, ascii_value(&identity.user_id)?);
            metadata.insert(ROOM_ID_HEADER, ascii_value(&identity.room_id)?);
        }

        // The call is driven by the receiver's first poll, like a Go NewStream:
        // opening never waits on response headers, and a rejected call surfaces
        // as the first receive error.
        let address = self.address.clone();
        let inbound = futures::stream::once(async move { client.stream_messages(request).await })
            .flat_map(move |result| match result {
                Ok(response) => response
                    .into_inner()
                    .map(|r| r.map_err(|e| GrpcClientError::StreamError(e.to_string())))
                    .boxed(),
                Err(status) => {
                    tracing::debug!(address = %address, error = %status, "message stream rejected");
                    futures::stream::once(async move { Err(GrpcClientError::from(status)) })
                        .boxed()
                }
            });

        Ok(BidirectionalStream::new(
            outbound.sender,
            StreamReceiver::new(inbound),
        ))
    }

    async fn send_message(
        &self,
        req: SendMessageRequest,
        timeout: Duration,
    ) -> Result<SendMessageResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client.send_message(request(req, timeout)).await?.into_inner())
        })
        .await
    }

    async fn join_room(
        &self,
        req: JoinRoomRequest,
        timeout: Duration,
    ) -> Result<JoinRoomResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client.join_room(request(req, timeout)).await?.into_inner())
        })
        .await
    }

    async fn leave_room(
        &self,
        req: LeaveRoomRequest,
        timeout: Duration,
    ) -> Result<LeaveRoomResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client.leave_room(request(req, timeout)).await?.into_inner())
        })
        .await
    }

    async fn get_room_info(
        &self,
        req: GetRoomInfoRequest,
        timeout: Duration,
    ) -> Result<GetRoomInfoResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client.get_room_info(request(req, timeout)).await?.into_inner())
        })
        .await
    }

    async fn get_audio_transcript(
        &self,
        req: TranscriptRequest,
        timeout: Duration,
    ) -> Result<TranscriptResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client
                .get_audio_transcript(request(req, timeout))
                .await?
                .into_inner())
        })
        .await
    }

    async fn upload_audio(
        &self,
        requests: Vec<UploadAudioRequest>,
        timeout: Duration,
    ) -> Result<UploadAudioResponse, GrpcClientError> {
        let mut client = self.client()?;
        let upload = request(tokio_stream::iter(requests), timeout);
        with_deadline(timeout, async move {
            Ok(client.upload_audio(upload).await?.into_inner())
        })
        .await
    }

    async fn health_check(
        &self,
        req: HealthCheckRequest,
        timeout: Duration,
    ) -> Result<HealthCheckResponse, GrpcClientError> {
        let mut client = self.client()?;
        with_deadline(timeout, async move {
            Ok(client.health_check(request(req, timeout)).await?.into_inner())
        })
        .await
    }

    async fn close(&self) {
        let previous = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!(address = %self.address, "gRPC connection closed");
        }
    }
}

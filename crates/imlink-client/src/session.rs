// ABOUTME: Session aggregate owning connection state and orchestrating the background tasks.
// ABOUTME: Connect, disconnect, send and status accessors over one lock-guarded state struct.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use imlink_discovery::{BalancerKind, Endpoint, LoadBalancer, Registry};
use imlink_grpc::{Dialer, GrpcDialer, ImConnection, MessageStream, StreamIdentity, StreamSender};
use imlink_proto::{MessageRequest, MessageType};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::frame::OutboundFrame;
use crate::reconnect::Failure;
use crate::{heartbeat, pipeline, reconnect, watch};

/// How long `disconnect` waits for background tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active message stream's send half and the token stopping its receiver.
pub(crate) struct Link {
    pub(crate) sender: StreamSender<MessageRequest>,
    pub(crate) cancel: CancellationToken,
}

impl Link {
    pub(crate) fn close(&self) {
        self.sender.close_send();
        self.cancel.cancel();
    }
}

/// Connection-related mutable state. Only ever touched under `Inner::conn`.
pub(crate) struct ConnState {
    pub(crate) state: SessionState,
    pub(crate) connection: Option<Arc<dyn ImConnection>>,
    /// Whether `connection` was dialed by the session and must be closed by it.
    pub(crate) owned: bool,
    pub(crate) link: Option<Link>,
    pub(crate) endpoint: Option<Endpoint>,
    /// Bumped on every stream install; failure reports carry the epoch they saw.
    pub(crate) epoch: u64,
    /// Cancels every task started by the current connect.
    pub(crate) generation: Option<CancellationToken>,
    /// Set by an explicit disconnect; the session can never connect again.
    pub(crate) closed: bool,
}

/// A connection and stream produced by one connect or reconnect attempt.
pub(crate) struct Established {
    pub(crate) connection: Arc<dyn ImConnection>,
    pub(crate) owned: bool,
    pub(crate) endpoint: Option<Endpoint>,
    pub(crate) stream: MessageStream,
}

impl Established {
    /// Drop an attempt that lost a race with disconnect.
    pub(crate) async fn discard(self) {
        let (sender, _receiver) = self.stream.split();
        sender.close_send();
        if self.owned {
            self.connection.close().await;
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: SessionConfig,
    pub(crate) registry: Option<Arc<dyn Registry>>,
    pub(crate) balancer: Arc<dyn LoadBalancer>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) external: Option<Arc<dyn ImConnection>>,
    pub(crate) conn: RwLock<ConnState>,
    pub(crate) endpoints: RwLock<Vec<Endpoint>>,
    pub(crate) outbound_tx: mpsc::Sender<OutboundFrame>,
    pub(crate) outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundFrame>>,
    pub(crate) reconnect_tx: mpsc::Sender<()>,
    pub(crate) reconnect_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    pub(crate) pending_failure: Mutex<Option<Failure>>,
    pub(crate) root: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl Inner {
    pub(crate) fn read_conn(&self) -> RwLockReadGuard<'_, ConnState> {
        self.conn.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_conn(&self) -> RwLockWriteGuard<'_, ConnState> {
        self.conn.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> SessionState {
        self.read_conn().state
    }

    /// Sender of the live stream and its epoch.
    pub(crate) fn current_link(&self) -> (Option<StreamSender<MessageRequest>>, u64) {
        let st = self.read_conn();
        (st.link.as_ref().map(|l| l.sender.clone()), st.epoch)
    }

    pub(crate) fn endpoint_snapshot(&self) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the endpoint list, feeding the balancer only when it changed.
    pub(crate) fn apply_endpoints(&self, list: Vec<Endpoint>) {
        let mut current = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        if *current == list {
            return;
        }
        self.balancer.update(&list);
        tracing::info!(
            service = %self.config.service_name,
            endpoints = list.len(),
            "endpoint list updated"
        );
        *current = list;
    }

    fn identity(&self) -> Option<StreamIdentity> {
        let room = self.config.default_room_id.as_ref()?;
        if self.config.user_id.is_empty() || room.is_empty() {
            return None;
        }
        Some(StreamIdentity {
            user_id: self.config.user_id.clone(),
            room_id: room.clone(),
        })
    }

    /// Current endpoint candidates: the registry's answer, or the manual list.
    async fn discover(&self) -> Result<Vec<Endpoint>> {
        if let Some(registry) = &self.registry {
            let service = &self.config.service_name;
            let found =
                tokio::time::timeout(self.config.connect_timeout, registry.discover(service))
                    .await
                    .map_err(|_| {
                        SessionError::DiscoveryFailed(format!(
                            "registry did not answer within {:?}",
                            self.config.connect_timeout
                        ))
                    })?
                    .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;
            if !found.is_empty() {
                self.apply_endpoints(found.clone());
                return Ok(found);
            }
        }

        let manual = self.endpoint_snapshot();
        if manual.is_empty() {
            return Err(SessionError::DiscoveryFailed(format!(
                "no endpoints available for service '{}'",
                self.config.service_name
            )));
        }
        Ok(manual)
    }

    /// Discover, select and dial, or reuse the external connection, then open the stream.
    pub(crate) async fn establish(&self) -> Result<Established> {
        let (connection, endpoint, owned) = match &self.external {
            Some(conn) => (conn.clone(), None, false),
            None => {
                let candidates = self.discover().await?;
                let endpoint = self
                    .balancer
                    .select(&candidates)
                    .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;
                let address = endpoint.authority();
                tracing::debug!(
                    address = %address,
                    balancer = self.balancer.name(),
                    "dialing endpoint"
                );
                let conn = self
                    .dialer
                    .dial(&address, self.config.connect_timeout)
                    .await
                    .map_err(|e| SessionError::DialFailed {
                        address: address.clone(),
                        reason: e.to_string(),
                    })?;
                (conn, Some(endpoint), true)
            }
        };

        let identity = self.identity();
        match connection.open_stream(identity.as_ref()).await {
            Ok(stream) => Ok(Established {
                connection,
                owned,
                endpoint,
                stream,
            }),
            Err(e) => {
                if owned {
                    connection.close().await;
                }
                Err(SessionError::StreamCreateFailed(e.to_string()))
            }
        }
    }

    /// Make `established` the live connection and start its receiver.
    pub(crate) fn install(
        self: &Arc<Self>,
        st: &mut ConnState,
        established: Established,
        generation: &CancellationToken,
    ) {
        let (sender, receiver) = established.stream.split();
        let cancel = generation.child_token();
        st.epoch += 1;
        st.link = Some(Link {
            sender,
            cancel: cancel.clone(),
        });
        st.connection = Some(established.connection);
        st.owned = established.owned;
        st.endpoint = established.endpoint;
        self.tracker
            .spawn(pipeline::run_receiver(self.clone(), receiver, cancel, st.epoch));
    }

    /// Enqueue with a bounded wait. A full queue past `timeout` drops the frame.
    pub(crate) async fn enqueue(&self, frame: OutboundFrame, timeout: Duration) -> Result<()> {
        match self.outbound_tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SessionError::SendTimeout(timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(SessionError::NotConnected),
        }
    }
}

/// Builds a [`Session`] from a config plus its collaborators.
pub struct SessionBuilder {
    config: SessionConfig,
    registry: Option<Arc<dyn Registry>>,
    balancer: Option<Arc<dyn LoadBalancer>>,
    dialer: Option<Arc<dyn Dialer>>,
    connection: Option<Arc<dyn ImConnection>>,
    endpoints: Vec<Endpoint>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            registry: None,
            balancer: None,
            dialer: None,
            connection: None,
            endpoints: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to round-robin.
    pub fn balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Defaults to a plaintext [`GrpcDialer`].
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Use a caller-owned connection; discovery and dialing are skipped.
    pub fn connection(mut self, connection: Arc<dyn ImConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Manual endpoint list used when no registry is configured or it returns nothing.
    pub fn endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let balancer = self.balancer.unwrap_or_else(|| BalancerKind::default().build());
        if !self.endpoints.is_empty() {
            balancer.update(&self.endpoints);
        }
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);

        let inner = Inner {
            registry: self.registry,
            balancer,
            dialer: self
                .dialer
                .unwrap_or_else(|| Arc::new(GrpcDialer::new()) as Arc<dyn Dialer>),
            external: self.connection,
            conn: RwLock::new(ConnState {
                state: SessionState::Idle,
                connection: None,
                owned: false,
                link: None,
                endpoint: None,
                epoch: 0,
                generation: None,
                closed: false,
            }),
            endpoints: RwLock::new(self.endpoints),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            reconnect_tx,
            reconnect_rx: tokio::sync::Mutex::new(reconnect_rx),
            pending_failure: Mutex::new(None),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            config: self.config,
        };
        Ok(Session {
            inner: Arc::new(inner),
        })
    }
}

/// One logical client connection lifecycle.
///
/// Dropping the session cancels its background tasks without closing the
/// connection gracefully; call [`Session::disconnect`] first for that.
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

impl Session {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Session that discovers endpoints through `registry`.
    pub fn new(
        config: SessionConfig,
        registry: Arc<dyn Registry>,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Result<Self> {
        SessionBuilder::new(config)
            .registry(registry)
            .balancer(balancer)
            .build()
    }

    /// Session over a caller-owned connection, which it never closes.
    pub fn with_connection(connection: Arc<dyn ImConnection>, config: SessionConfig) -> Result<Self> {
        SessionBuilder::new(config).connection(connection).build()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Endpoint of the live connection, if the session dialed one.
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        self.inner.read_conn().endpoint.clone()
    }

    /// Last known endpoint list.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.endpoint_snapshot()
    }

    /// Replace the manual endpoint list.
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        self.inner.apply_endpoints(endpoints);
    }

    /// Establish the connection and start the background tasks.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let previous = {
            let mut st = inner.write_conn();
            if st.closed {
                return Err(SessionError::Closed);
            }
            match st.state {
                SessionState::Connecting | SessionState::Connected | SessionState::Reconnecting => {
                    return Err(SessionError::AlreadyConnected)
                }
                SessionState::Idle | SessionState::Disconnected => {}
            }
            let previous = st.state;
            st.state = SessionState::Connecting;
            previous
        };

        let established = match inner.establish().await {
            Ok(established) => established,
            Err(e) => {
                let mut st = inner.write_conn();
                if st.state == SessionState::Connecting {
                    st.state = previous;
                }
                tracing::warn!(error = %e, "connect failed");
                return Err(e);
            }
        };

        let generation = inner.root.child_token();
        let installed = {
            let mut st = inner.write_conn();
            if st.closed || st.state != SessionState::Connecting {
                Err(established)
            } else {
                inner.install(&mut st, established, &generation);
                st.generation = Some(generation.clone());
                st.state = SessionState::Connected;
                Ok(st.endpoint.as_ref().map(Endpoint::authority))
            }
        };
        let endpoint = match installed {
            Ok(endpoint) => endpoint,
            Err(established) => {
                established.discard().await;
                return Err(SessionError::Closed);
            }
        };

        let owned = inner.external.is_none();
        inner
            .tracker
            .spawn(pipeline::run_sender(inner.clone(), generation.clone()));
        inner
            .tracker
            .spawn(heartbeat::run_heartbeat(inner.clone(), generation.clone()));
        if owned || inner.config.reconnect_external {
            inner
                .tracker
                .spawn(reconnect::run_supervisor(inner.clone(), generation.clone()));
        }
        if let Some(registry) = &inner.registry {
            inner.tracker.spawn(watch::run_watch(
                inner.clone(),
                registry.clone(),
                generation.clone(),
            ));
        }

        tracing::info!(
            user_id = %inner.config.user_id,
            endpoint = endpoint.as_deref().unwrap_or("external"),
            "session connected"
        );
        inner.config.handler.on_connect();
        Ok(())
    }

    /// Stop every task and close the owned connection. The session cannot be reused.
    ///
    /// A no-op when idle or already disconnected. A connect still in flight is
    /// abandoned and returns [`SessionError::Closed`]. Must not be awaited from inside
    /// a handler callback, since it waits for the task running that callback.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        let (link, connection) = {
            let mut st = inner.write_conn();
            match st.state {
                SessionState::Connected | SessionState::Reconnecting => {}
                SessionState::Connecting => {
                    // The pending connect sees `closed` and discards its attempt.
                    st.state = SessionState::Disconnected;
                    st.closed = true;
                    drop(st);
                    inner.root.cancel();
                    inner.tracker.close();
                    tracing::info!(
                        user_id = %inner.config.user_id,
                        "session disconnected while connecting"
                    );
                    return Ok(());
                }
                SessionState::Idle | SessionState::Disconnected => return Ok(()),
            }
            st.state = SessionState::Disconnected;
            st.closed = true;
            st.endpoint = None;
            st.generation = None;
            let connection = st.connection.take();
            let owned = std::mem::take(&mut st.owned);
            (st.link.take(), connection.filter(|_| owned))
        };

        inner.root.cancel();
        if let Some(link) = link {
            link.close();
        }
        if let Some(connection) = connection {
            connection.close().await;
        }

        inner.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = inner.tracker.len(),
                "background tasks still running after disconnect"
            );
        }
        tracing::info!(user_id = %inner.config.user_id, "session disconnected");
        Ok(())
    }

    /// Queue a frame for the sender task.
    ///
    /// Waits up to the request timeout for queue space, then fails with
    /// [`SessionError::SendTimeout`] and drops the frame.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.inner
            .enqueue(frame, self.inner.config.request_timeout)
            .await
    }

    /// Send a text message to `room_id`. Returns the generated message id.
    pub async fn send_text(&self, room_id: &str, text: &str) -> Result<String> {
        let frame = OutboundFrame::text(self.inner.config.user_id.clone(), room_id, text);
        let id = frame.message_id.clone();
        self.send(frame).await?;
        Ok(id)
    }

    /// Send an arbitrary payload of `message_type` to `room_id`.
    pub async fn send_payload(
        &self,
        room_id: &str,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<String> {
        let frame = OutboundFrame::new(
            self.inner.config.user_id.clone(),
            room_id,
            message_type,
            payload,
        );
        let id = frame.message_id.clone();
        self.send(frame).await?;
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn task_count(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.inner.config.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

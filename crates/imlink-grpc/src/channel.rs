// ABOUTME: Tonic channel setup for dialing one IM service instance.
// ABOUTME: Normalizes host:port authorities and applies keep-alive, TLS and dial timeout.

use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::error::GrpcClientError;

/// Default dial timeout, matching the session's default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/2 keep-alive pings on the channel.
///
/// The message stream can sit idle for a whole heartbeat interval, so pings
/// run while idle by default to notice a dead peer before the next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    /// How long an unanswered ping may wait before the connection is dropped.
    pub timeout: Duration,
    pub while_idle: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(10),
            while_idle: true,
        }
    }
}

/// How to reach one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Full URI, e.g. `http://10.0.0.5:9000`.
    pub address: String,
    pub keep_alive: Option<KeepAliveConfig>,
    pub connect_timeout: Option<Duration>,
    pub use_tls: bool,
}

impl ChannelConfig {
    /// Accepts a bare `host:port` (dialed as `http://`) or a full URI.
    /// An `https://` URI turns TLS on.
    pub fn new(address: impl Into<String>) -> Self {
        let address = normalize(address.into().trim());
        let use_tls = has_scheme(&address, "https://");
        Self {
            address,
            keep_alive: Some(KeepAliveConfig::default()),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            use_tls,
        }
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn with_keep_alive(mut self, config: KeepAliveConfig) -> Self {
        self.keep_alive = Some(config);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Dial with TLS; a plain `http://` address is rewritten to `https://`.
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        if let Some(rest) = strip_scheme(&self.address, "http://") {
            self.address = format!("https://{}", rest);
        }
        self
    }

    /// Tonic endpoint for this config, without connecting.
    pub fn endpoint(&self) -> Result<Endpoint, GrpcClientError> {
        if self.address.is_empty() {
            return Err(GrpcClientError::InvalidAddress("empty address".to_string()));
        }
        let mut endpoint = Endpoint::from_shared(self.address.clone())
            .map_err(|e| GrpcClientError::InvalidAddress(format!("{}: {}", self.address, e)))?
            .tcp_nodelay(true);

        if self.use_tls {
            let tls = ClientTlsConfig::new().with_native_roots();
            endpoint = endpoint.tls_config(tls).map_err(|e| {
                GrpcClientError::ConnectionFailed(format!("TLS setup for {}: {}", self.address, e))
            })?;
        }
        if let Some(ka) = &self.keep_alive {
            endpoint = endpoint
                .http2_keep_alive_interval(ka.interval)
                .keep_alive_timeout(ka.timeout)
                .keep_alive_while_idle(ka.while_idle);
        }
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        Ok(endpoint)
    }
}

fn has_scheme(address: &str, scheme: &str) -> bool {
    strip_scheme(address, scheme).is_some()
}

fn strip_scheme<'a>(address: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix = address.get(..scheme.len())?;
    prefix
        .eq_ignore_ascii_case(scheme)
        .then(|| &address[scheme.len()..])
}

fn normalize(address: &str) -> String {
    if address.is_empty() || address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Connect a channel, failing once the dial timeout passes.
pub async fn create_channel(config: &ChannelConfig) -> Result<Channel, GrpcClientError> {
    let channel = config.endpoint()?.connect().await.map_err(|e| {
        GrpcClientError::ConnectionFailed(format!("{}: {}", config.address, e))
    })?;

    tracing::debug!(
        address = %config.address,
        tls = config.use_tls,
        keep_alive = config.keep_alive.is_some(),
        "channel connected"
    );
    Ok(channel)
}

// ABOUTME: Session configuration built in code or loaded from a TOML file.
// ABOUTME: Validation rejects missing identity, empty service name and zero durations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use imlink_discovery::{BalancerKind, Endpoint};
use serde::Deserialize;

use crate::error::{Result, SessionError};
use crate::handler::{NoopHandler, SessionHandler};

pub const DEFAULT_SERVICE_NAME: &str = "im-service";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OUTBOUND_BUFFER: usize = 100;

/// Runtime configuration of a [`crate::Session`].
#[derive(Clone)]
pub struct SessionConfig {
    pub service_name: String,
    pub user_id: String,
    pub default_room_id: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Attempts per reconnect cycle. Zero gives up immediately.
    pub max_retries: u32,
    pub retry_interval: Duration,
    /// Capacity of the outbound queue.
    pub outbound_buffer: usize,
    /// Run the reconnect supervisor for externally supplied connections too.
    pub reconnect_external: bool,
    pub handler: Arc<dyn SessionHandler>,
}

impl SessionConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            user_id: user_id.into(),
            default_room_id: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            reconnect_external: false,
            handler: Arc::new(NoopHandler),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_default_room(mut self, room_id: impl Into<String>) -> Self {
        self.default_room_id = Some(room_id.into());
        self
    }

    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    pub fn with_handler(mut self, handler: impl SessionHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn with_reconnect_external(mut self, enabled: bool) -> Self {
        self.reconnect_external = enabled;
        self
    }

    /// Default room, or the empty string when none is configured.
    pub fn room(&self) -> &str {
        self.default_room_id.as_deref().unwrap_or("")
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(SessionError::Config("user_id is required".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(SessionError::Config("service_name is required".into()));
        }
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("retry_interval", self.retry_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(SessionError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.outbound_buffer == 0 {
            return Err(SessionError::Config(
                "outbound_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("service_name", &self.service_name)
            .field("user_id", &self.user_id)
            .field("default_room_id", &self.default_room_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("reconnect_external", &self.reconnect_external)
            .finish_non_exhaustive()
    }
}

/// On-disk client configuration.
///
/// ```toml
/// [session]
/// user_id = "alice"
/// default_room_id = "lobby"
/// balancer = "weighted_round_robin"
///
/// [[endpoints]]
/// id = "im-1"
/// address = "10.0.0.5"
/// port = 9000
/// metadata = { weight = "3" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub session: SessionSection,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub default_room_id: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub balancer: BalancerKind,
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_interval_secs() -> u64 {
    DEFAULT_RETRY_INTERVAL.as_secs()
}

fn default_outbound_buffer() -> usize {
    DEFAULT_OUTBOUND_BUFFER
}

impl FileConfig {
    /// `<config dir>/imlink/client.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("imlink").join("client.toml"))
    }

    /// Read and parse a config file. `None` uses [`FileConfig::default_path`].
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()
                .ok_or_else(|| SessionError::Config("could not determine config path".into()))?,
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            SessionError::Config(format!("failed to read config from {:?}: {}", path, e))
        })?;
        Self::parse(&contents)
    }

    /// [`FileConfig::read`] plus validation of the session section.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.to_session_config().validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| SessionError::Config(format!("failed to parse config: {}", e)))
    }

    /// Convert to a [`SessionConfig`] with the no-op handler. Not validated.
    pub fn to_session_config(&self) -> SessionConfig {
        let s = &self.session;
        let mut config = SessionConfig::new(s.user_id.clone())
            .with_service_name(s.service_name.clone())
            .with_connect_timeout(Duration::from_secs(s.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(s.request_timeout_secs))
            .with_heartbeat_interval(Duration::from_secs(s.heartbeat_interval_secs))
            .with_max_retries(s.max_retries)
            .with_retry_interval(Duration::from_secs(s.retry_interval_secs))
            .with_outbound_buffer(s.outbound_buffer);
        if let Some(room) = s.default_room_id.as_ref().filter(|r| !r.is_empty()) {
            config = config.with_default_room(room.clone());
        }
        config
    }

    pub fn balancer(&self) -> BalancerKind {
        self.session.balancer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new("alice");
        assert_eq!(config.service_name, "im-service");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.outbound_buffer, 100);
        assert_eq!(config.room(), "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_user() {
        for user in ["", "   "] {
            let err = SessionConfig::new(user).validate().unwrap_err();
            assert!(matches!(err, SessionError::Config(ref m) if m.contains("user_id")));
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero = Duration::ZERO;
        assert!(SessionConfig::new("a").with_connect_timeout(zero).validate().is_err());
        assert!(SessionConfig::new("a").with_request_timeout(zero).validate().is_err());
        assert!(SessionConfig::new("a").with_heartbeat_interval(zero).validate().is_err());
        assert!(SessionConfig::new("a").with_retry_interval(zero).validate().is_err());
        assert!(SessionConfig::new("a").with_outbound_buffer(0).validate().is_err());
        assert!(SessionConfig::new("a").with_service_name("").validate().is_err());
        assert!(SessionConfig::new("a").with_max_retries(0).validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_file() {
        let config = FileConfig::parse("[session]\nuser_id = \"bob\"\n").unwrap();
        let session = config.to_session_config();
        assert_eq!(session.user_id, "bob");
        assert_eq!(session.max_retries, 3);
        assert_eq!(config.balancer(), BalancerKind::RoundRobin);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let toml = r#"
[session]
service_name = "chat"
user_id = "bob"
default_room_id = "lobby"
connect_timeout_secs = 2
request_timeout_secs = 4
heartbeat_interval_secs = 15
max_retries = 5
retry_interval_secs = 1
outbound_buffer = 8
balancer = "weighted_round_robin"

[[endpoints]]
id = "a"
address = "10.0.0.1"
port = 9000
metadata = { weight = "5" }

[[endpoints]]
id = "b"
address = "10.0.0.2"
port = 9000
"#;
        let config = FileConfig::parse(toml).unwrap();
        let session = config.to_session_config();
        assert_eq!(session.service_name, "chat");
        assert_eq!(session.room(), "lobby");
        assert_eq!(session.connect_timeout, Duration::from_secs(2));
        assert_eq!(session.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(session.max_retries, 5);
        assert_eq!(session.outbound_buffer, 8);
        assert_eq!(config.balancer(), BalancerKind::WeightedRoundRobin);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].weight(), 5);
    }

    #[test]
    fn test_parse_rejects_bad_balancer() {
        let err = FileConfig::parse("[session]\nuser_id = \"x\"\nbalancer = \"ring\"\n").unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }
}

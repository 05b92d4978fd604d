// ABOUTME: Error types for imlink-client.
// ABOUTME: Defines SessionError covering configuration, connection, send and unary call failures.

use std::time::Duration;

use imlink_grpc::GrpcClientError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("session already connected")]
    AlreadyConnected,

    #[error("endpoint discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("failed to dial {address}: {reason}")]
    DialFailed { address: String, reason: String },

    #[error("failed to open message stream: {0}")]
    StreamCreateFailed(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("outbound queue stayed full for {0:?}, message dropped")]
    SendTimeout(Duration),

    #[error("stream I/O error: {0}")]
    StreamIo(String),

    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("session was disconnected and cannot be reused")]
    Closed,

    #[error("{method} failed: {message}")]
    Rpc { method: &'static str, message: String },

    #[error("{method} timed out after {timeout:?}")]
    RequestTimeout {
        method: &'static str,
        timeout: Duration,
    },
}

impl SessionError {
    /// Map a transport failure of a unary call.
    pub(crate) fn from_call(method: &'static str, err: GrpcClientError) -> Self {
        match err {
            GrpcClientError::Timeout(timeout) => SessionError::RequestTimeout { method, timeout },
            GrpcClientError::ConnectionClosed => SessionError::NotConnected,
            GrpcClientError::Rpc { code, message } => SessionError::Rpc {
                method,
                message: format!("{:?}: {}", code, message),
            },
            other => SessionError::Rpc {
                method,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

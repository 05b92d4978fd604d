// ABOUTME: Error types for the imlink-grpc crate.
// ABOUTME: Provides structured errors for dialing, streaming and unary calls.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the gRPC transport.
#[derive(Error, Debug)]
pub enum GrpcClientError {
    /// Invalid server address format.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// Failed to connect to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation did not finish within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Stream was closed (locally half-closed or the peer went away).
    #[error("stream closed unexpectedly")]
    StreamClosed,

    /// Error on the gRPC stream.
    #[error("stream error: {0}")]
    StreamError(String),

    /// A unary or client-streaming call returned a non-OK status.
    #[error("rpc failed ({code:?}): {message}")]
    Rpc { code: tonic::Code, message: String },

    /// The connection has been closed by its owner.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<tonic::Status> for GrpcClientError {
    fn from(status: tonic::Status) -> Self {
        GrpcClientError::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for GrpcClientError {
    fn from(err: tonic::transport::Error) -> Self {
        GrpcClientError::ConnectionFailed(err.to_string())
    }
}

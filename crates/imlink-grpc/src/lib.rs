// ABOUTME: gRPC transport utilities for imlink client sessions.
// ABOUTME: Provides channel creation, bidirectional stream halves and the dial/connection seam.

pub mod channel;
pub mod error;
pub mod stream;
pub mod transport;

// Channel creation
pub use channel::{create_channel, ChannelConfig, KeepAliveConfig};

// Error types
pub use error::GrpcClientError;

// Stream management
pub use stream::{
    BidirectionalStream, OutboundStream, StreamReceiver, StreamSender, DEFAULT_CHANNEL_BUFFER,
};

// Transport seam
pub use transport::{
    Dialer, GrpcConnection, GrpcDialer, ImConnection, MessageStream, StreamIdentity,
    AUDIO_CHUNK_SIZE, ROOM_ID_HEADER, USER_ID_HEADER,
};

// Re-export proto types for convenience
pub use imlink_proto;

// ABOUTME: Client session layer for the imlink instant-messaging service.
// ABOUTME: Connection state machine, message pipeline, heartbeat, reconnection and room calls.

pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
mod heartbeat;
mod pipeline;
mod reconnect;
mod rooms;
pub mod session;
mod watch;

#[cfg(test)]
mod testing;

pub use config::{FileConfig, SessionConfig, SessionSection};
pub use error::{Result, SessionError};
pub use frame::{generate_message_id, InboundFrame, OutboundFrame, HEARTBEAT_PAYLOAD};
pub use handler::{Callbacks, NoopHandler, SessionHandler};
pub use heartbeat::HEARTBEAT_ENQUEUE_TIMEOUT;
pub use rooms::AudioUpload;
pub use session::{Session, SessionBuilder, SessionState};

// Collaborator types callers need to build a session
pub use imlink_discovery::{
    BalancerKind, Endpoint, HealthStatus, LoadBalancer, Registry, StaticRegistry,
};
pub use imlink_grpc::{Dialer, GrpcDialer, ImConnection};
pub use imlink_proto::{MessageType, RoomInfo, ServingStatus};

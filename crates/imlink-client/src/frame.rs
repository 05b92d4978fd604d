// ABOUTME: Outbound and inbound message frames exchanged on the session stream.
// ABOUTME: Handles message id generation and conversion to and from the wire types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use imlink_proto::{MessageRequest, MessageResponse, MessageType};

/// Payload of every heartbeat frame.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"ping";

/// Last nanosecond stamp handed out, so ids stay strictly increasing in-process.
static LAST_ID_NANOS: AtomicU64 = AtomicU64::new(0);

/// Generate `{user_id}_{nanos}`. Unique within this process only.
pub fn generate_message_id(user_id: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut prev = LAST_ID_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_ID_NANOS.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => return format!("{}_{}", user_id, next),
            Err(current) => prev = current,
        }
    }
}

fn message_type_from_wire(value: i32) -> MessageType {
    MessageType::try_from(value).unwrap_or(MessageType::Unspecified)
}

/// A frame queued for the sender task.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub message_id: String,
    pub user_id: String,
    pub room_id: String,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl OutboundFrame {
    /// Build a frame stamped with a fresh id and the current time.
    pub fn new(
        user_id: impl Into<String>,
        room_id: impl Into<String>,
        message_type: MessageType,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            message_id: generate_message_id(&user_id),
            user_id,
            room_id: room_id.into(),
            message_type,
            payload: payload.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn text(user_id: impl Into<String>, room_id: impl Into<String>, text: &str) -> Self {
        Self::new(user_id, room_id, MessageType::Text, text.as_bytes())
    }

    pub fn heartbeat(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self::new(user_id, room_id, MessageType::Heartbeat, HEARTBEAT_PAYLOAD)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message_type == MessageType::Heartbeat
    }
}

impl From<OutboundFrame> for MessageRequest {
    fn from(frame: OutboundFrame) -> Self {
        MessageRequest {
            message_id: frame.message_id,
            user_id: frame.user_id,
            room_id: frame.room_id,
            r#type: frame.message_type as i32,
            content: frame.payload,
            timestamp_ms: frame.timestamp.timestamp_millis(),
            metadata: frame.metadata,
        }
    }
}

/// A frame received from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub message_id: String,
    pub from_user_id: String,
    pub room_id: String,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl InboundFrame {
    pub fn is_heartbeat(&self) -> bool {
        self.message_type == MessageType::Heartbeat
    }

    /// Payload as UTF-8, if it is valid text.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<MessageResponse> for InboundFrame {
    fn from(msg: MessageResponse) -> Self {
        Self {
            message_id: msg.message_id,
            from_user_id: msg.from_user_id,
            room_id: msg.room_id,
            message_type: message_type_from_wire(msg.r#type),
            payload: msg.content,
            timestamp: DateTime::from_timestamp_millis(msg.timestamp_ms).unwrap_or_default(),
            metadata: msg.metadata,
        }
    }
}

// ABOUTME: Re-exports generated protobuf types and the tonic client for the im.v1 protocol.
// ABOUTME: Single source of truth for IMService methods and message types.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Generated protobuf types for the `im.v1` package.
pub mod v1 {
    tonic::include_proto!("im.v1");
}

// Re-export commonly used types at crate root for convenience
pub use v1::*;

// Re-export client types under a client module
pub mod client {
    pub use super::v1::im_service_client::ImServiceClient;
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_message_type_accessor() {
        let msg = MessageResponse {
            r#type: MessageType::Heartbeat as i32,
            ..Default::default()
        };
        assert_eq!(msg.r#type(), MessageType::Heartbeat);
    }

    #[test]
    fn test_unknown_message_type_falls_back_to_default() {
        let msg = MessageResponse {
            r#type: 99,
            ..Default::default()
        };
        assert_eq!(msg.r#type(), MessageType::Unspecified);
    }

    #[test]
    fn test_message_type_str_names() {
        assert_eq!(MessageType::Text.as_str_name(), "MESSAGE_TYPE_TEXT");
        assert_eq!(MessageType::Heartbeat.as_str_name(), "MESSAGE_TYPE_HEARTBEAT");
    }

    #[test]
    fn test_request_decodes_as_response_fields() {
        // Streamed request and response share tags 1..7 except sender identity.
        let mut req = MessageRequest {
            message_id: "u1_1".to_string(),
            user_id: "u1".to_string(),
            room_id: "lobby".to_string(),
            content: b"hi".to_vec(),
            timestamp_ms: 42,
            ..Default::default()
        };
        req.set_type(MessageType::Text);

        let bytes = req.encode_to_vec();
        let resp = MessageResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(resp.message_id, "u1_1");
        assert_eq!(resp.from_user_id, "u1");
        assert_eq!(resp.r#type(), MessageType::Text);
        assert_eq!(resp.content, b"hi");
    }

    #[test]
    fn test_upload_chunk_oneof() {
        let req = UploadAudioRequest {
            data: Some(upload_audio_request::Data::Chunk(vec![1, 2, 3])),
        };
        let decoded = UploadAudioRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert!(matches!(
            decoded.data,
            Some(upload_audio_request::Data::Chunk(ref c)) if c == &[1, 2, 3]
        ));
    }
}

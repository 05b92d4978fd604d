// ABOUTME: Unary room, message and audio operations sharing the session connection.
// ABOUTME: Each call requires a connected session and is bounded by the request timeout.

use std::collections::HashMap;
use std::sync::Arc;

use imlink_grpc::{ImConnection, AUDIO_CHUNK_SIZE};
use imlink_proto::{
    upload_audio_request, AudioMetadata, GetRoomInfoRequest, HealthCheckRequest,
    JoinRoomRequest, JoinRoomResponse, LeaveRoomRequest, LeaveRoomResponse, MessageRequest,
    MessageType, RoomInfo, SendMessageRequest, SendMessageResponse, ServingStatus,
    TranscriptRequest, TranscriptResponse, UploadAudioRequest, UploadAudioResponse,
};

use crate::error::{Result, SessionError};
use crate::frame::OutboundFrame;
use crate::session::{Session, SessionState};

/// Audio clip description for [`Session::upload_audio`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUpload {
    pub room_id: String,
    /// Container or codec name, e.g. `"wav"` or `"opus"`.
    pub format: String,
    /// Seconds.
    pub duration: f64,
    pub data: Vec<u8>,
}

/// Metadata message followed by the payload in [`AUDIO_CHUNK_SIZE`] pieces.
fn upload_requests(user_id: &str, upload: AudioUpload) -> Vec<UploadAudioRequest> {
    let metadata = AudioMetadata {
        user_id: user_id.to_string(),
        room_id: upload.room_id,
        format: upload.format,
        size: upload.data.len() as i64,
        duration: upload.duration,
    };
    let mut requests = vec![UploadAudioRequest {
        data: Some(upload_audio_request::Data::Metadata(metadata)),
    }];
    requests.extend(upload.data.chunks(AUDIO_CHUNK_SIZE).map(|chunk| UploadAudioRequest {
        data: Some(upload_audio_request::Data::Chunk(chunk.to_vec())),
    }));
    requests
}

impl Session {
    fn call_connection(&self) -> Result<Arc<dyn ImConnection>> {
        let st = self.inner.read_conn();
        if st.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        st.connection.clone().ok_or(SessionError::NotConnected)
    }

    pub async fn join_room(
        &self,
        room_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<JoinRoomResponse> {
        let conn = self.call_connection()?;
        let request = JoinRoomRequest {
            user_id: self.inner.config.user_id.clone(),
            room_id: room_id.to_string(),
            metadata,
        };
        let response = conn
            .join_room(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("JoinRoom", e))?;
        tracing::info!(room = %room_id, success = response.success, "join room");
        Ok(response)
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<LeaveRoomResponse> {
        let conn = self.call_connection()?;
        let request = LeaveRoomRequest {
            user_id: self.inner.config.user_id.clone(),
            room_id: room_id.to_string(),
        };
        let response = conn
            .leave_room(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("LeaveRoom", e))?;
        tracing::info!(room = %room_id, success = response.success, "leave room");
        Ok(response)
    }

    /// Room details, or `None` when the service reports no such room.
    pub async fn get_room_info(&self, room_id: &str) -> Result<Option<RoomInfo>> {
        let conn = self.call_connection()?;
        let request = GetRoomInfoRequest {
            room_id: room_id.to_string(),
            user_id: self.inner.config.user_id.clone(),
        };
        let response = conn
            .get_room_info(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("GetRoomInfo", e))?;
        Ok(response.room_info.filter(|_| response.success))
    }

    /// Send one message through the unary SendMessage call instead of the stream.
    pub async fn send_message_unary(
        &self,
        room_id: &str,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<SendMessageResponse> {
        let conn = self.call_connection()?;
        let frame = OutboundFrame::new(
            self.inner.config.user_id.clone(),
            room_id,
            message_type,
            payload,
        );
        let request = SendMessageRequest {
            message: Some(MessageRequest::from(frame)),
        };
        conn.send_message(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("SendMessage", e))
    }

    pub async fn get_audio_transcript(&self, audio_id: &str) -> Result<TranscriptResponse> {
        let conn = self.call_connection()?;
        let request = TranscriptRequest {
            audio_id: audio_id.to_string(),
            user_id: self.inner.config.user_id.clone(),
        };
        conn.get_audio_transcript(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("GetAudioTranscript", e))
    }

    /// Upload an audio clip over the client-streaming UploadAudio call.
    pub async fn upload_audio(&self, upload: AudioUpload) -> Result<UploadAudioResponse> {
        let conn = self.call_connection()?;
        let size = upload.data.len();
        let requests = upload_requests(&self.inner.config.user_id, upload);
        tracing::debug!(size, chunks = requests.len() - 1, "uploading audio");
        conn.upload_audio(requests, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("UploadAudio", e))
    }

    /// Serving status reported by the connected service instance.
    pub async fn health_check(&self) -> Result<ServingStatus> {
        let conn = self.call_connection()?;
        let request = HealthCheckRequest {
            service: self.inner.config.service_name.clone(),
        };
        let response = conn
            .health_check(request, self.inner.config.request_timeout)
            .await
            .map_err(|e| SessionError::from_call("HealthCheck", e))?;
        Ok(ServingStatus::try_from(response.status).unwrap_or(ServingStatus::Unknown))
    }
}

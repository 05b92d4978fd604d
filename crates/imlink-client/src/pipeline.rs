// ABOUTME: Sender and receiver tasks moving frames between the session and its stream.
// ABOUTME: Failures are reported to the handler and raise a coalesced reconnect signal.

use std::sync::Arc;

use imlink_grpc::StreamReceiver;
use imlink_proto::MessageResponse;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::frame::InboundFrame;
use crate::session::Inner;

/// Drain the outbound queue into whichever stream is live.
///
/// Keeps draining after a write failure; frames dequeued while no stream is
/// installed are dropped and reported.
pub(crate) async fn run_sender(inner: Arc<Inner>, generation: CancellationToken) {
    let mut queue = tokio::select! {
        _ = generation.cancelled() => return,
        queue = inner.outbound_rx.lock() => queue,
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = generation.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let (sender, epoch) = inner.current_link();
        let message_id = frame.message_id.clone();
        let result = match sender {
            Some(sender) => {
                tokio::select! {
                    biased;
                    _ = generation.cancelled() => break,
                    result = sender.send(frame.into()) => {
                        result.map_err(|e| SessionError::StreamIo(e.to_string()))
                    }
                }
            }
            None => Err(SessionError::StreamIo("no active stream".to_string())),
        };

        match result {
            Ok(()) => tracing::trace!(message_id = %message_id, "frame sent"),
            Err(err) => {
                tracing::warn!(message_id = %message_id, error = %err, "failed to send frame");
                inner.config.handler.on_error(&err);
                inner.signal_reconnect(epoch, err);
            }
        }
    }
    tracing::debug!("sender task stopped");
}

/// Read frames from one stream until it ends, fails or is cancelled.
///
/// Never restarts itself; the reconnect supervisor starts a new receiver with
/// each new stream.
pub(crate) async fn run_receiver(
    inner: Arc<Inner>,
    mut receiver: StreamReceiver<MessageResponse>,
    cancel: CancellationToken,
    epoch: u64,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.recv() => next,
        };

        let err = match next {
            Ok(Some(msg)) => {
                let frame = InboundFrame::from(msg);
                if frame.is_heartbeat() {
                    tracing::trace!(from = %frame.from_user_id, "heartbeat received");
                    continue;
                }
                tracing::debug!(
                    message_id = %frame.message_id,
                    from = %frame.from_user_id,
                    room = %frame.room_id,
                    "message received"
                );
                inner.config.handler.on_message(&frame);
                continue;
            }
            Ok(None) => {
                tracing::info!(epoch, "server closed the message stream");
                SessionError::StreamIo("stream closed by server".to_string())
            }
            Err(e) => {
                tracing::warn!(epoch, error = %e, "failed to receive frame");
                SessionError::StreamIo(e.to_string())
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        inner.config.handler.on_error(&err);
        inner.signal_reconnect(epoch, err);
        return;
    }
    tracing::debug!(epoch, "receiver task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use imlink_grpc::GrpcClientError;
    use imlink_proto::{MessageType, MessageResponse};

    use crate::config::SessionConfig;
    use crate::error::SessionError;
    use crate::session::Session;
    use crate::testing::{endpoint, wait_for, FakeConnection, FakeDialer, Recorder};

    fn session(recorder: &Recorder, dialer: &std::sync::Arc<FakeDialer>) -> Session {
        let config = SessionConfig::new("alice")
            .with_heartbeat_interval(Duration::from_secs(3600))
            .with_max_retries(0)
            .with_handler(recorder.clone());
        Session::builder(config)
            .dialer(dialer.clone())
            .endpoints(vec![endpoint("e1", 9001)])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_inbound_order_preserved() {
        let recorder = Recorder::new();
        let dialer = FakeDialer::new();
        let session = session(&recorder, &dialer);
        session.connect().await.unwrap();
        let server = dialer.connection(0).take_server(0);

        for i in 0..20 {
            server
                .push(MessageResponse {
                    message_id: format!("m{}", i),
                    r#type: MessageType::Text as i32,
                    ..Default::default()
                })
                .await;
        }
        wait_for(|| recorder.messages().len() == 20).await;
        let ids: Vec<String> = recorder.messages().into_iter().map(|m| m.message_id).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
        assert_eq!(ids, expected);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_error_reported_to_handler() {
        let recorder = Recorder::new();
        let dialer = FakeDialer::new();
        let session = session(&recorder, &dialer);
        session.connect().await.unwrap();
        let server = dialer.connection(0).take_server(0);

        server
            .fail(GrpcClientError::StreamError("reset by peer".to_string()))
            .await;
        wait_for(|| {
            recorder
                .errors()
                .iter()
                .any(|e| matches!(e, SessionError::StreamIo(m) if m.contains("reset by peer")))
        })
        .await;

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_reported_and_sender_keeps_draining() {
        let recorder = Recorder::new();
        let conn = FakeConnection::new();
        // No supervisor for an external connection, so the session stays
        // Connected and every queued frame still reaches the sender.
        let config = SessionConfig::new("alice")
            .with_heartbeat_interval(Duration::from_secs(3600))
            .with_handler(recorder.clone());
        let session = Session::with_connection(conn.clone(), config).unwrap();
        session.connect().await.unwrap();

        // Dropping the request side makes every stream write fail.
        let (requests, _responses) = conn.take_server(0).into_parts();
        drop(requests);

        for text in ["a", "b", "c"] {
            session.send_text("lobby", text).await.unwrap();
        }
        wait_for(|| recorder.errors().len() >= 3).await;
        assert!(recorder
            .errors()
            .iter()
            .all(|e| matches!(e, SessionError::StreamIo(_))));
        assert!(session.is_connected());
        assert_eq!(recorder.disconnects(), 0);

        session.disconnect().await.unwrap();
    }
}

// ABOUTME: Bidirectional gRPC stream halves for the session message pipeline.
// ABOUTME: Typed sender with half-close support and a receiver over any frame stream.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::GrpcClientError;

/// Default buffer size for outbound message channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 100;

/// Sender half of a bidirectional stream.
///
/// Cloning shares the underlying channel. [`StreamSender::close_send`] ends
/// the outbound request stream for every clone, which half-closes the call.
#[derive(Debug, Clone)]
pub struct StreamSender<T> {
    inner: mpsc::Sender<T>,
    closed: CancellationToken,
}

impl<T> StreamSender<T> {
    /// Create a stream sender from an mpsc sender and the token that ends its stream.
    pub fn new(sender: mpsc::Sender<T>, closed: CancellationToken) -> Self {
        Self {
            inner: sender,
            closed,
        }
    }

    /// Send a message on the stream.
    pub async fn send(&self, msg: T) -> Result<(), GrpcClientError> {
        if self.closed.is_cancelled() {
            return Err(GrpcClientError::StreamClosed);
        }
        self.inner
            .send(msg)
            .await
            .map_err(|_| GrpcClientError::StreamClosed)
    }

    /// Half-close the outbound side. Idempotent.
    pub fn close_send(&self) {
        self.closed.cancel();
    }

    /// Check if the stream is closed, locally or by the consumer going away.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.inner.is_closed()
    }
}

/// Receiver half of a bidirectional stream.
pub struct StreamReceiver<T> {
    inner: BoxStream<'static, Result<T, GrpcClientError>>,
}

impl<T: Send + 'static> StreamReceiver<T> {
    /// Wrap any stream of frames.
    pub fn new(stream: impl Stream<Item = Result<T, GrpcClientError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Receive the next message. `Ok(None)` means the peer ended the stream cleanly.
    pub async fn recv(&mut self) -> Result<Option<T>, GrpcClientError> {
        match self.inner.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// A pair of sender and outbound stream for initiating bidirectional communication.
///
/// The outbound stream should be passed to the gRPC client method,
/// while the sender is used to send messages.
pub struct OutboundStream<T> {
    /// Sender for pushing messages to the stream.
    pub sender: StreamSender<T>,
    /// The stream to pass to the gRPC method. Ends when the sender half-closes.
    pub stream: BoxStream<'static, T>,
}

impl<T: Send + 'static> OutboundStream<T> {
    /// Create an outbound stream pair with the specified buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        let closed = CancellationToken::new();
        let until = closed.clone();
        let stream = ReceiverStream::new(rx)
            .take_until(async move { until.cancelled().await })
            .boxed();
        Self {
            sender: StreamSender::new(tx, closed),
            stream,
        }
    }
}

/// A complete bidirectional stream pair after the call is opened.
pub struct BidirectionalStream<TSend, TRecv> {
    /// Sender for outgoing messages.
    pub sender: StreamSender<TSend>,
    /// Receiver for incoming messages.
    pub receiver: StreamReceiver<TRecv>,
}

impl<TSend, TRecv> BidirectionalStream<TSend, TRecv> {
    /// Create a bidirectional stream from sender and receiver.
    pub fn new(sender: StreamSender<TSend>, receiver: StreamReceiver<TRecv>) -> Self {
        Self { sender, receiver }
    }

    /// Split into sender and receiver.
    pub fn split(self) -> (StreamSender<TSend>, StreamReceiver<TRecv>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_delivers_in_order() {
        let OutboundStream { sender, mut stream } = OutboundStream::<u32>::new(8);
        for i in 0..5 {
            sender.send(i).await.unwrap();
        }
        let got: Vec<u32> = (&mut stream).take(5).collect().await;
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_close_send_ends_outbound_stream() {
        let OutboundStream { sender, mut stream } = OutboundStream::<String>::new(8);
        let clone = sender.clone();
        sender.close_send();

        assert!(clone.is_closed());
        assert!(stream.next().await.is_none());
        assert!(matches!(
            clone.send("late".to_string()).await.unwrap_err(),
            GrpcClientError::StreamClosed
        ));
        // Idempotent
        sender.close_send();
    }

    #[tokio::test]
    async fn test_send_fails_when_stream_dropped() {
        let OutboundStream { sender, stream } = OutboundStream::<String>::new(8);
        drop(stream);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send("x".to_string()).await.unwrap_err(),
            GrpcClientError::StreamClosed
        ));
    }

    #[tokio::test]
    async fn test_receiver_recv_variants() {
        let frames = futures::stream::iter(vec![
            Ok(1u32),
            Err(GrpcClientError::StreamError("reset".to_string())),
        ]);
        let mut receiver = StreamReceiver::new(frames);
        assert_eq!(receiver.recv().await.unwrap(), Some(1));
        assert!(matches!(
            receiver.recv().await.unwrap_err(),
            GrpcClientError::StreamError(_)
        ));
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[test]
    fn test_bidirectional_stream_split() {
        let OutboundStream { sender, stream: _stream } = OutboundStream::<String>::new(4);
        let receiver = StreamReceiver::<String>::new(futures::stream::empty());
        let bidi = BidirectionalStream::new(sender, receiver);
        let (sender, _receiver) = bidi.split();
        assert!(!sender.is_closed());
    }
}

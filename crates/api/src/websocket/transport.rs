//! Transport abstraction for connection pumps
//!
//! Pumps talk to a boxed sink/stream pair of [`Frame`]s rather than to an
//! axum `WebSocket` directly, so the hub can be driven by in-memory
//! transports in tests.

use std::pin::Pin;

use axum::extract::ws::{Message, WebSocket};
use futures::{future, stream::BoxStream, Sink, SinkExt, Stream, StreamExt};

/// One websocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Transport error: {0}")]
    Io(String),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// A live bidirectional connection, split into its write and read halves
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }

    /// Wrap an upgraded axum websocket
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
        let stream = stream.map(|msg| {
            msg.map(Frame::from)
                .map_err(|e| TransportError::Io(e.to_string()))
        });

        Self::new(sink, stream)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Peer side of an in-memory transport
#[cfg(test)]
pub(crate) struct TestPeer {
    pub to_server: futures::channel::mpsc::UnboundedSender<Result<Frame, TransportError>>,
    pub from_server: futures::channel::mpsc::Receiver<Frame>,
}

#[cfg(test)]
impl TestPeer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_server.unbounded_send(Ok(Frame::Text(text.to_string())));
    }

    /// Next frame written by the server, skipping pings
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.from_server.next().await {
                Some(Frame::Ping(_)) => continue,
                other => return other,
            }
        }
    }

    /// Next text frame parsed as JSON; `None` once the server closed
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Close => return None,
                _ => continue,
            }
        }
    }
}

/// In-memory transport whose server-to-peer side holds `buffer` frames
#[cfg(test)]
pub(crate) fn test_pair(buffer: usize) -> (Transport, TestPeer) {
    let (out_tx, out_rx) = futures::channel::mpsc::channel::<Frame>(buffer);
    let (in_tx, in_rx) = futures::channel::mpsc::unbounded();

    let sink = out_tx.sink_map_err(|_| TransportError::Closed);
    (
        Transport::new(sink, in_rx),
        TestPeer {
            to_server: in_tx,
            from_server: out_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_conversion() {
        assert_eq!(
            Message::from(Frame::Text("hi".to_string())),
            Message::Text("hi".to_string())
        );
        assert_eq!(Frame::from(Message::Ping(vec![1])), Frame::Ping(vec![1]));
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);
    }

    #[tokio::test]
    async fn test_pair_carries_frames_both_ways() {
        let (mut transport, mut peer) = test_pair(4);

        transport.sink.send(Frame::Text("out".to_string())).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Text("out".to_string())));

        peer.send_text("in");
        let received = transport.stream.next().await.unwrap().unwrap();
        assert_eq!(received, Frame::Text("in".to_string()));
    }
}

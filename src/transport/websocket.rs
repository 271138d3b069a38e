//! WebSocket connection from a client to the signaling server
//!
//! The connection is split into a sink and a stream so that the writer and
//! the reader can live on separate tasks.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open WebSocket connection to the signaling server
pub struct SignalingConnection {
    ws: WsStream,
}

impl SignalingConnection {
    /// Connect to a signaling server
    pub async fn connect(url: &str) -> TransportResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(SignalingConnection { ws })
    }

    /// Split into independently owned halves
    pub fn split(self) -> (SignalingSink, SignalingStream) {
        let (sink, stream) = self.ws.split();
        (SignalingSink { sink }, SignalingStream { stream })
    }
}

/// Write half of a signaling connection
pub struct SignalingSink {
    sink: SplitSink<WsStream, Message>,
}

impl SignalingSink {
    /// Send one text frame
    pub async fn send_text(&mut self, text: String) -> TransportResult<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a close frame
    pub async fn close(&mut self) -> TransportResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Read half of a signaling connection
pub struct SignalingStream {
    stream: SplitStream<WsStream>,
}

impl SignalingStream {
    /// Receive the next text frame
    ///
    /// Returns `Ok(None)` once the server closes the connection. Control and
    /// binary frames are skipped.
    pub async fn next_text(&mut self) -> TransportResult<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                Some(Ok(_)) => continue,
            }
        }
    }
}

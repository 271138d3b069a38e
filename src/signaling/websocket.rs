//! WebSocket container for the signaling server
//!
//! Each accepted connection becomes one session. Inbound text frames go to
//! [`SignalingServer::on_session_message`]; frames the server queues for the
//! session are written back from the same task.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::SignalingServer;

/// Accept connections on `listener` until it fails
pub async fn serve(listener: TcpListener, server: Arc<SignalingServer>) {
    while let Ok((stream, addr)) = listener.accept().await {
        let server = server.clone();
        tokio::spawn(handle_connection(stream, addr, server));
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, server: Arc<SignalingServer>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let session = server.on_session_open(outbound_tx);
    info!(%addr, %session, "signaling session opened");

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        server.on_session_message(session, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%addr, %session, "client closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%addr, %session, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!(%addr, %session, error = %e, "failed to write to session");
                    break;
                }
            }
        }
    }

    server.on_session_close(session);
    let _ = write.close().await;
    info!(%addr, %session, "signaling session closed");
}

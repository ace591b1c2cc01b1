//! Accept loop and per-connection handler for the platform gateway.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::Inbound;
use super::PlatformGateway;

/// Accept platform client connections until `cancel` fires.
pub async fn serve(gateway: PlatformGateway, listener: TcpListener, cancel: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "platform gateway listening");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let gateway = gateway.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws) => handle_connection(gateway, ws, addr, cancel).await,
                            Err(e) => {
                                warn!(peer = %addr, error = %e, "platform handshake failed");
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "platform gateway accept error"),
            },
        }
    }

    info!("platform gateway stopped");
}

async fn handle_connection(
    gateway: PlatformGateway,
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();
    let (client_id, mut out_rx) = gateway.attach(cancel.clone());
    info!(peer = %addr, client_id, "platform client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            Some(command) = out_rx.recv() => {
                let json = match serde_json::to_string(&command) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode platform command");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Inbound>(text.as_str()) {
                        Ok(msg) => gateway.on_inbound(client_id, msg).await,
                        Err(e) => warn!(peer = %addr, error = %e, "unreadable platform message"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(peer = %addr, error = %e, "platform connection error");
                    break;
                }
                _ => {}
            },
        }
    }

    gateway.detach(client_id);
    info!(peer = %addr, client_id, "platform client disconnected");
}

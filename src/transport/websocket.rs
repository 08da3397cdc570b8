//! WebSocket connector.
//!
//! Opens the transport with `tokio-tungstenite` and spawns a pump task that
//! owns the socket:
//!
//! - Outbound [`OutboundFrame`]s from the session are written in order
//! - Inbound text frames are forwarded as [`TransportEvent::Text`]
//! - Exactly one [`TransportEvent::Closed`] is emitted when the socket ends
//!
//! Ping/pong control frames are answered by `tungstenite` itself; the
//! application heartbeat runs on top as envelopes.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{CLOSE_NORMAL, Connector, OutboundFrame, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Close code reported when the server closes without a status.
const CLOSE_NO_STATUS: u16 = 1005;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ============================================================================
// WsConnector
// ============================================================================

/// Connector for `ws://` and `wss://` endpoints.
///
/// `wss://` requires the crate's `tls` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Transport> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::connection(format!(
                "unsupported scheme {:?} for WebSocket",
                parsed.scheme()
            )));
        }

        let (ws_stream, response) = connect_async(url).await.inspect_err(|e| {
            debug!(url, error = %e, "WebSocket handshake failed");
        })?;

        debug!(url, status = %response.status(), "WebSocket handshake completed");

        let (sink, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(run_pump(ws_stream, outbound_rx, events_tx));

        Ok(Transport { sink, events })
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Moves frames between the socket and the session until either side ends.
async fn run_pump(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            // Incoming frames from the server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "Frame received");
                        if events_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                            debug!("Session released transport");
                            let _ = ws_write.close().await;
                            return;
                        }
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by remote");
                        break match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => TransportEvent::Closed {
                                code: CLOSE_NO_STATUS,
                                reason: String::new(),
                            },
                        };
                    }

                    Some(Ok(Message::Binary(data))) => {
                        warn!(len = data.len(), "Ignoring binary frame");
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break TransportEvent::abnormal(e.to_string());
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break TransportEvent::abnormal("stream ended");
                    }

                    // Ping, Pong, raw frames
                    Some(Ok(_)) => {}
                }
            }

            // Outgoing frames from the session
            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(json)) => {
                        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                            warn!(error = %e, "Failed to send frame");
                            break TransportEvent::abnormal(e.to_string());
                        }
                    }

                    Some(OutboundFrame::Close { code, reason }) => {
                        send_close(&mut ws_write, code, &reason).await;
                        break TransportEvent::Closed { code, reason };
                    }

                    None => {
                        send_close(&mut ws_write, CLOSE_NORMAL, "client released").await;
                        break TransportEvent::Closed {
                            code: CLOSE_NORMAL,
                            reason: "client released".to_string(),
                        };
                    }
                }
            }
        }
    };

    let _ = events_tx.send(closed);
    debug!("Pump terminated");
}

/// Writes a close frame, ignoring failures on an already broken socket.
async fn send_close(ws_write: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    };
    if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

// ============================================================================
// Tests
// ============================================================================

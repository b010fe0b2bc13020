//! Transport seam between the session client and the wire.
//!
//! A transport is a pair of unbounded channels: the session writes JSON
//! text frames into `outbound` and reads them from `inbound`. Whatever
//! sits on the other side — a real WebSocket or a test harness — pumps
//! frames between those channels and the wire. The inbound sender being
//! dropped is the close signal; the session treats it as the end of the
//! transport and runs its reconnect policy.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Boxed future returned by [`Connect::connect`].
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Why a transport could not be opened.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP/TLS or WebSocket handshake failure.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The endpoint refused the connection at the application layer.
    #[error("connection refused: {0}")]
    Refused(String),
}

/// A live transport handed to the session.
pub struct Transport {
    /// Text frames the session sends toward the wire.
    pub outbound: UnboundedSender<String>,
    /// Text frames arriving from the wire. Closed when the transport dies.
    pub inbound: UnboundedReceiver<String>,
}

/// Opens transports for the session client.
///
/// The session calls this for the initial connect and for every reconnect
/// attempt. Errors are routed into the session's reconnect machinery and
/// never surface to API callers.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<Result<Transport, TransportError>>;
}

/// Production connector: one WebSocket per conversation, bridged to the
/// session by two pump tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connect for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<Result<Transport, TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(Box::new(e)))?;
            tracing::debug!(%url, "websocket open");
            let (mut sink, mut stream) = ws.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

            // Session → wire. Ends when the session drops its writer; the
            // close frame tells the server we are done.
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
            });

            // Wire → session. Dropping `in_tx` is the close signal the
            // session acts on; the error itself is only logged.
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text.to_string()).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "websocket transport error");
                            break;
                        }
                    }
                }
            });

            Ok(Transport { outbound: out_tx, inbound: in_rx })
        })
    }
}

//! WhatsApp bridge gateway.
//!
//! The WhatsApp Web protocol runs in an external bridge process; we speak
//! JSON text frames to it over a WebSocket. Sends are acknowledged by id.

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use remindclaw_core::config::WhatsAppConfig;
use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::{ConnectionEvent, GatewayConnection, MessagingGateway};
use remindclaw_core::types::CredentialBlob;

/// Messaging address for a canonical phone number.
pub fn whatsapp_jid(phone_canonical: &str) -> String {
    format!("{phone_canonical}@s.whatsapp.net")
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Hello { credentials: Option<&'a serde_json::Value> },
    Send { id: u64, to: &'a str, text: &'a str },
    Logout,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeFrame {
    Qr {
        data: String,
    },
    Creds {
        data: serde_json::Value,
    },
    Open,
    Close {
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        message: String,
    },
    Ack {
        id: u64,
    },
    Error {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        message: String,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<()>>>>>;

/// Connects to the bridge process.
pub struct WsBridgeGateway {
    url: String,
    connect_timeout: Duration,
}

impl WsBridgeGateway {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self::with_url(&config.bridge_url, Duration::from_secs(config.connect_timeout_secs))
    }

    pub fn with_url(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl MessagingGateway for WsBridgeGateway {
    fn name(&self) -> &str {
        "whatsapp-bridge"
    }

    async fn connect(
        &self,
        credentials: Option<CredentialBlob>,
    ) -> Result<(Arc<dyn GatewayConnection>, mpsc::Receiver<ConnectionEvent>)> {
        tracing::info!("🔗 Connecting to WhatsApp bridge: {}", self.url);
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str()))
                .await
                .map_err(|_| RemindClawError::Channel("bridge connect timed out".into()))?
                .map_err(|e| RemindClawError::Channel(format!("bridge connect failed: {e}")))?;

        let (mut sink, source) = stream.split();
        let hello = serde_json::to_string(&ClientFrame::Hello {
            credentials: credentials.as_ref().map(|c| &c.0),
        })?;
        sink.send(WsMessage::Text(hello))
            .await
            .map_err(|e| RemindClawError::Channel(format!("bridge hello failed: {e}")))?;

        let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let pending: Pending = Arc::default();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                tracing::warn!("Bridge write failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(read_loop(source, events_tx, pending.clone(), shutdown.clone()));

        let connection = BridgeConnection {
            out_tx,
            pending,
            next_id: AtomicU64::new(1),
            shutdown,
        };
        Ok((Arc::new(connection), events_rx))
    }
}

async fn read_loop<S>(
    mut source: S,
    events: mpsc::Sender<ConnectionEvent>,
    pending: Pending,
    shutdown: CancellationToken,
) where
    S: Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let closed = loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break None,
            msg = source.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<BridgeFrame>(&text) {
                Ok(BridgeFrame::Close { code, message }) => {
                    break Some(ConnectionEvent::Closed { code, message });
                }
                Ok(frame) => {
                    if let Some(event) = handle_frame(frame, &pending)
                        && events.send(event).await.is_err()
                    {
                        break None;
                    }
                }
                Err(e) => tracing::warn!("Unrecognised bridge frame: {e}"),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                break Some(ConnectionEvent::Closed {
                    code: None,
                    message: frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "socket closed".into()),
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break Some(ConnectionEvent::Closed {
                    code: None,
                    message: e.to_string(),
                });
            }
            None => {
                break Some(ConnectionEvent::Closed {
                    code: None,
                    message: "socket ended".into(),
                });
            }
        }
    };

    fail_pending(&pending);
    if let Some(event) = closed {
        let _ = events.send(event).await;
    }
    shutdown.cancel();
}

fn handle_frame(frame: BridgeFrame, pending: &Pending) -> Option<ConnectionEvent> {
    match frame {
        BridgeFrame::Qr { data } => Some(ConnectionEvent::Pairing(data)),
        BridgeFrame::Creds { data } => Some(ConnectionEvent::CredentialsUpdated(CredentialBlob(data))),
        BridgeFrame::Open => Some(ConnectionEvent::Open),
        BridgeFrame::Close { code, message } => Some(ConnectionEvent::Closed { code, message }),
        BridgeFrame::Ack { id } => {
            resolve(pending, id, Ok(()));
            None
        }
        BridgeFrame::Error { id: Some(id), message } => {
            resolve(pending, id, Err(RemindClawError::Channel(message)));
            None
        }
        BridgeFrame::Error { id: None, message } => {
            tracing::warn!("⚠️ Bridge error: {message}");
            None
        }
    }
}

fn resolve(pending: &Pending, id: u64, result: Result<()>) {
    let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
    if let Some(waiter) = waiter {
        let _ = waiter.send(result);
    }
}

fn fail_pending(pending: &Pending) {
    if let Ok(mut waiters) = pending.lock() {
        for (_, waiter) in waiters.drain() {
            let _ = waiter.send(Err(RemindClawError::Channel("connection closed".into())));
        }
    }
}

/// Removes a send's ack waiter when the send finishes or is dropped.
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

struct BridgeConnection {
    out_tx: mpsc::Sender<WsMessage>,
    pending: Pending,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl BridgeConnection {
    async fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.out_tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| RemindClawError::Channel("connection closed".into()))
    }
}

#[async_trait]
impl GatewayConnection for BridgeConnection {
    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RemindClawError::Channel("connection closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        // Cleared on every exit, including a caller timeout dropping this future.
        let _waiter = PendingEntry {
            pending: &self.pending,
            id,
        };

        self.send_frame(&ClientFrame::Send { id, to: address, text }).await?;
        rx.await
            .map_err(|_| RemindClawError::Channel("connection closed before ack".into()))?
    }

    async fn logout(&self) -> Result<()> {
        self.send_frame(&ClientFrame::Logout).await
    }

    async fn end(&self) {
        self.shutdown.cancel();
        fail_pending(&self.pending);
    }
}

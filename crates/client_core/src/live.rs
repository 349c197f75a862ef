//! Live connection transport: one socket per (self, peer) pair.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::domain::ConversationPair;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::COOKIE, HeaderValue},
        Message as WsMessage,
    },
};
use tracing::{debug, info, warn};

use crate::transport::BackendEndpoint;

/// Inbound side of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSignal {
    Frame(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close,
}

pub struct LiveSocket {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Option<mpsc::UnboundedReceiver<LiveSignal>>,
    pump: Option<JoinHandle<()>>,
}

impl LiveSocket {
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<LiveSignal>,
    ) -> Self {
        Self {
            outbound,
            inbound: Some(inbound),
            pump: None,
        }
    }

    fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Hands the inbound signal stream to a reader; only the first call gets it.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<LiveSignal>> {
        self.inbound.take()
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.outbound
            .send(Outbound::Text(text.to_string()))
            .map_err(|_| anyhow!("live connection is no longer writable"))
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for LiveSocket {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
        // The pump finishes on its own once the close frame is written.
        self.pump.take();
    }
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, pair: ConversationPair) -> Result<LiveSocket>;
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsConnector {
    endpoint: BackendEndpoint,
    session_cookie: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoint: BackendEndpoint, session_cookie: Option<String>) -> Self {
        Self {
            endpoint,
            session_cookie: session_cookie.filter(|cookie| !cookie.trim().is_empty()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bounds the TCP, TLS and WebSocket handshake together.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, pair: ConversationPair) -> Result<LiveSocket> {
        let ws_url = self.endpoint.live_url(pair);
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid websocket url: {ws_url}"))?;
        if let Some(cookie) = &self.session_cookie {
            let value = HeaderValue::from_str(cookie.trim())
                .context("session cookie is not a valid header value")?;
            request.headers_mut().insert(COOKIE, value);
        }

        info!(%ws_url, pair = %pair, "ws: opening");
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                anyhow!(
                    "websocket handshake timed out after {:?}: {ws_url}",
                    self.connect_timeout
                )
            })?
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut writer, mut reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LiveSignal>();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => match outbound {
                        Some(Outbound::Text(text)) => {
                            if let Err(err) = writer.send(WsMessage::Text(text)).await {
                                warn!(pair = %pair, "ws: send failed: {err}");
                                let _ = in_tx.send(LiveSignal::Error(format!("send failed: {err}")));
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = writer.send(WsMessage::Close(None)).await;
                            let _ = writer.close().await;
                            let _ = in_tx.send(LiveSignal::Closed {
                                code: None,
                                reason: "closed locally".to_string(),
                            });
                            break;
                        }
                    },
                    inbound = reader.next() => match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = in_tx.send(LiveSignal::Frame(text));
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            let _ = in_tx.send(LiveSignal::Frame(
                                String::from_utf8_lossy(&bytes).into_owned(),
                            ));
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|frame| (Some(u16::from(frame.code)), frame.reason.into_owned()))
                                .unwrap_or((None, String::new()));
                            let _ = in_tx.send(LiveSignal::Closed { code, reason });
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let _ = in_tx.send(LiveSignal::Error(format!("receive failed: {err}")));
                            let _ = in_tx.send(LiveSignal::Closed {
                                code: None,
                                reason: "connection lost".to_string(),
                            });
                            break;
                        }
                        None => {
                            let _ = in_tx.send(LiveSignal::Closed {
                                code: None,
                                reason: "stream ended".to_string(),
                            });
                            break;
                        }
                    },
                }
            }
            debug!(pair = %pair, "ws: pump finished");
        });

        Ok(LiveSocket::from_channels(out_tx, in_rx).with_pump(pump))
    }
}

#[cfg(test)]
#[path = "tests/live_tests.rs"]
mod tests;

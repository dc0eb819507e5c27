//! Duplex message link
//!
//! The channel sees a connected link as a pair of queues: text out, link
//! events in. [`WebSocketConnector`] provides it over tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{AppError, Result};

/// Something that happened on a live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    /// Orderly close from either side
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

/// One physical connection.
///
/// Dropping `outbound` closes the link.
#[derive(Debug)]
pub struct DuplexLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens physical connections
#[async_trait]
pub trait DuplexConnector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<DuplexLink>;
}

/// WebSocket links
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<DuplexLink> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| AppError::Signaling(format!("connect to {} failed: {}", endpoint, e)))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();

        // Reader stops once the writer is gone
        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();

        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            let _guard = cancel.drop_guard();
            while let Some(text) = out_rx.recv().await {
                trace!("ws -> {}", text);
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    let _ = writer_events.send(LinkEvent::Failed(e.to_string()));
                    return;
                }
            }
            // Owner dropped the link
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("WebSocket writer finished");
        });

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_cancel.cancelled() => {
                        debug!("WebSocket reader finished");
                        return;
                    }
                    next = ws_rx.next() => next,
                };
                let event = match next {
                    Some(Ok(Message::Text(text))) => LinkEvent::Text(text.to_string()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        let _ = in_tx.send(LinkEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = in_tx.send(LinkEvent::Failed(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = in_tx.send(LinkEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
        });

        Ok(DuplexLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

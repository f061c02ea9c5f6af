//! Streaming transport - one long-lived WebSocket connection
//!
//! Every inbound text frame becomes a raw event immediately, in arrival order.
//! Any connection-level failure ends `run` with an error; restarting is the
//! supervisor's decision.

use super::{EventSink, Transport, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub url: String,
    /// Sent once right after the handshake (e.g. a subscribe request)
    pub subscribe_message: Option<String>,
}

pub struct StreamingTransport {
    settings: StreamingSettings,
}

impl StreamingTransport {
    pub fn new(settings: StreamingSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn describe(&self) -> String {
        format!("stream {}", self.settings.url)
    }

    async fn run(&mut self, sink: &EventSink) -> Result<(), TransportError> {
        let (ws_stream, _) = connect_async(self.settings.url.as_str()).await?;
        log::info!("🔗 Stream connected: {}", self.settings.url);

        let (mut write, mut read) = ws_stream.split();

        if let Some(subscribe) = &self.settings.subscribe_message {
            write.send(Message::Text(subscribe.clone().into())).await?;
            log::debug!("Subscribe message sent");
        }

        if !sink.opened().await {
            return Ok(());
        }

        while let Some(frame) = read.next().await {
            let delivered = match frame? {
                Message::Text(text) => sink.raw(None, text.as_str()).await,
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => sink.raw(None, text).await,
                    Err(_) => {
                        log::debug!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                        true
                    }
                },
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    true
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(TransportError::Closed(reason));
                }
                _ => true,
            };

            if !delivered {
                return Ok(());
            }
        }

        Err(TransportError::Closed("stream ended".to_string()))
    }
}

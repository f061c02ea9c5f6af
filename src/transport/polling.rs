//! Polling transport - fetch the latest item on a fixed interval
//!
//! Each tick issues one request, pulls zero or one "latest" item out of the
//! response and emits it only when its identity differs from the last one
//! delivered. Repeated ticks on an unchanged head never reach normalization.

use super::{EventSink, Transport, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Wire tag given to every item this transport emits
pub const POLLED_ITEM_TAG: &str = "block";

#[derive(Debug, Clone)]
pub enum PollRequest {
    /// Plain GET returning the item (or an envelope around it)
    Get,
    /// JSON-RPC 2.0 POST
    JsonRpc { method: String, params: Value },
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub url: String,
    pub request: PollRequest,
    pub interval: Duration,
    pub timeout: Duration,
    /// JSON pointer to the item inside the response ("" = whole body)
    pub item_pointer: String,
    /// Field of the item holding its identity
    pub identity_field: String,
}

/// Remembers the identity of the last delivered item
///
/// Owned by exactly one transport instance; feeds never share it.
#[derive(Debug, Default)]
pub struct LatestTracker {
    last_delivered: Option<String>,
}

impl LatestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity` and report whether it is new
    pub fn observe(&mut self, identity: &str) -> bool {
        if self.last_delivered.as_deref() == Some(identity) {
            return false;
        }
        self.last_delivered = Some(identity.to_string());
        true
    }
}

/// Extract the latest item and its identity from a response body
///
/// Returns `None` when the pointer resolves to nothing, to `null` (no block
/// yet), or to an item without a usable identity.
pub fn extract_latest<'a>(
    body: &'a Value,
    item_pointer: &str,
    identity_field: &str,
) -> Option<(String, &'a Value)> {
    let item = if item_pointer.is_empty() {
        body
    } else {
        body.pointer(item_pointer)?
    };

    if item.is_null() {
        return None;
    }

    let identity = match item.get(identity_field)? {
        Value::String(s) if !s.is_empty() => s.to_lowercase(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    Some((identity, item))
}

pub struct PollingTransport {
    settings: PollingSettings,
    client: reqwest::Client,
    tracker: LatestTracker,
    request_id: AtomicU64,
}

impl PollingTransport {
    pub fn new(settings: PollingSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            settings,
            client,
            tracker: LatestTracker::new(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn fetch(&self) -> Result<Value, TransportError> {
        let request = match &self.settings.request {
            PollRequest::Get => self.client.get(&self.settings.url),
            PollRequest::JsonRpc { method, params } => {
                let id = self.request_id.fetch_add(1, Ordering::Relaxed);
                self.client.post(&self.settings.url).json(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": params,
                    "id": id,
                }))
            }
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.settings.timeout.as_millis() as u64)
            } else {
                TransportError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidBody(e.to_string()))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(TransportError::InvalidBody(format!("RPC error: {}", error)));
        }

        Ok(body)
    }

    /// Emit the latest item from `body` if it is new. Returns false once the
    /// sink's owner is gone.
    async fn deliver(&mut self, body: &Value, sink: &EventSink) -> bool {
        let Some((identity, item)) = extract_latest(
            body,
            &self.settings.item_pointer,
            &self.settings.identity_field,
        ) else {
            log::debug!("Poll response carried no latest item");
            return true;
        };

        if !self.tracker.observe(&identity) {
            log::trace!("Latest item unchanged: {}", identity);
            return true;
        }

        sink.raw(Some(POLLED_ITEM_TAG), item.to_string()).await
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn describe(&self) -> String {
        format!("poll {} every {}ms", self.settings.url, self.settings.interval.as_millis())
    }

    async fn run(&mut self, sink: &EventSink) -> Result<(), TransportError> {
        let mut timer = interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;

            if sink.is_closed() {
                return Ok(());
            }

            match self.fetch().await {
                Ok(body) => {
                    if !sink.opened().await || !self.deliver(&body, sink).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Poll of {} failed: {}", self.settings.url, e);
                    // A failed request never stops the timer
                    if !sink.error(e).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}

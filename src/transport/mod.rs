//! Transport adapters - "get me the next event(s)"
//!
//! A transport only moves bytes. It tags each inbound message with its arrival
//! order and pushes it into an [`EventSink`]; interpreting the payload is the
//! normalizer's job and deciding what to do on failure is the supervisor's.
//!
//! ```text
//! PollingTransport  ─┐
//!                    ├─▶ EventSink ─▶ ConnectionSupervisor ─▶ FeedEngine
//! StreamingTransport ┘
//! ```

pub mod polling;
pub mod streaming;

use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub use polling::PollingTransport;
pub use streaming::StreamingTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Periodic request/response
    Polling,
    /// Persistent pushed connection
    Streaming,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Streaming => "streaming",
        }
    }
}

/// Opaque inbound message, owned by the transport until normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Arrival order within one transport instance
    pub seq: u64,
    /// Wire-level type tag when the transport knows it
    pub tag: Option<String>,
    pub payload: String,
}

impl RawEvent {
    pub fn new(seq: u64, tag: Option<&str>, payload: impl Into<String>) -> Self {
        Self {
            seq,
            tag: tag.map(str::to_string),
            payload: payload.into(),
        }
    }
}

/// What a transport reports to its owner
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection established or a request succeeded
    Opened,
    Raw(RawEvent),
    /// Non-terminating failure (the transport keeps running)
    Error(TransportError),
}

/// Delivery side handed to a running transport
///
/// Sequence numbers keep increasing across reconnects of the same sink so
/// arrival order stays total for one feed.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<TransportEvent>,
    next_seq: AtomicU64,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            tx,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Emit an inbound message. Returns false once the owner is gone.
    pub async fn raw(&self, tag: Option<&str>, payload: impl Into<String>) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(TransportEvent::Raw(RawEvent::new(seq, tag, payload)))
            .await
            .is_ok()
    }

    pub async fn opened(&self) -> bool {
        self.tx.send(TransportEvent::Opened).await.is_ok()
    }

    pub async fn error(&self, error: TransportError) -> bool {
        self.tx.send(TransportEvent::Error(error)).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A source of raw events
///
/// `run` delivers until the connection terminates. Returning `Err` means the
/// underlying connection is gone and must be restarted by the supervisor;
/// returning `Ok` means the sink's owner went away. Cancelling the future
/// (dropping it) is the `stop` operation and must be safe at any await point.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Short human-readable target for logs
    fn describe(&self) -> String;

    async fn run(&mut self, sink: &EventSink) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn run(&mut self, sink: &EventSink) -> Result<(), TransportError> {
        (**self).run(sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_assigns_arrival_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(tx);

        assert!(sink.raw(None, "a").await);
        assert!(sink.opened().await);
        assert!(sink.raw(Some("block"), "b").await);

        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Raw(raw) = event {
                seqs.push((raw.seq, raw.tag));
            }
        }
        assert_eq!(seqs, vec![(0, None), (1, Some("block".to_string()))]);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_owner() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        drop(rx);

        assert!(sink.is_closed());
        assert!(!sink.raw(None, "x").await);
    }
}

//! Feed - wires transport, supervisor, admission, window and aggregator
//!
//! `FeedEngine` is the synchronous core: every mutation of the window and the
//! counters goes through it. `run_feed` drives one engine from a single task,
//! so no locking is needed; consumers read published snapshots.

use crate::admission::{Admission, AdmissionFilter};
use crate::aggregator::{AggregateView, Aggregator, AggregatorConfig};
use crate::clock::{system_clock, Clock};
use crate::config::FeedConfig;
use crate::error::{ConfigError, TransportError};
use crate::normalizer::{normalize, DomainEvent, IdentityKey};
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::transport::polling::PollingTransport;
use crate::transport::streaming::StreamingTransport;
use crate::transport::{RawEvent, Transport, TransportKind};
use crate::window::placement::PlacementPolicy;
use crate::window::{SweepReport, TrackedItem, WindowConfig, WindowStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Outcome of handling one raw event
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// Malformed or unrecognized payload
    Dropped,
    Duplicate(IdentityKey),
    Heartbeat,
    Notice(String),
    Admitted(TrackedItem),
}

/// Snapshot handed to presentation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedView {
    /// Active items, oldest first
    pub items: Vec<TrackedItem>,
    pub aggregate: AggregateView,
    /// Hovered or selected item, relayed as set
    pub focus: Option<IdentityKey>,
}

pub struct FeedEngine {
    admission: AdmissionFilter,
    store: WindowStore,
    aggregator: Aggregator,
    aggregate: AggregateView,
    focus: Option<IdentityKey>,
    now_fn: Clock,
}

impl FeedEngine {
    pub fn new(window: WindowConfig, aggregator: AggregatorConfig) -> Self {
        Self::new_with_clock(window, aggregator, PlacementPolicy::new(), system_clock())
    }

    /// Create an engine with a custom clock and placement (for tests)
    pub fn new_with_clock(
        window: WindowConfig,
        aggregator: AggregatorConfig,
        placement: PlacementPolicy,
        now_fn: Clock,
    ) -> Self {
        let aggregator = Aggregator::new(aggregator);
        let aggregate = aggregator.recompute(&[], now_fn());

        Self {
            admission: AdmissionFilter::new(),
            store: WindowStore::with_placement(window, placement),
            aggregator,
            aggregate,
            focus: None,
            now_fn,
        }
    }

    pub fn handle(&mut self, raw: RawEvent) -> Ingest {
        let Some(event) = normalize(&raw) else {
            log::debug!("Dropped unrecognized event #{} ({:?})", raw.seq, raw.tag);
            return Ingest::Dropped;
        };

        let now = (self.now_fn)();

        match self.admission.admit(&event, &self.store) {
            Admission::Duplicate(id) => Ingest::Duplicate(id),
            Admission::Admitted(id) => {
                let item = self.store.insert(id, event, now);
                self.aggregator.record_admission(&item);
                self.refresh(now);
                log::debug!("Admitted {} at {}", item.id, item.created_at);
                Ingest::Admitted(item)
            }
            Admission::Untracked => match event {
                DomainEvent::Heartbeat { .. } => {
                    self.aggregator.record_heartbeat(now);
                    self.aggregate.last_heartbeat_at = Some(now);
                    Ingest::Heartbeat
                }
                DomainEvent::ConnectionNotice { status } => {
                    log::info!("📡 Upstream notice: {}", status);
                    Ingest::Notice(status)
                }
                _ => Ingest::Dropped,
            },
        }
    }

    /// Run one sweep and refresh the aggregate
    pub fn tick(&mut self) -> SweepReport {
        let now = (self.now_fn)();
        let report = self.store.sweep(now);
        if !report.evicted.is_empty() {
            log::debug!("Evicted {} item(s)", report.evicted.len());
        }
        self.aggregator.prune(now);
        self.refresh(now);
        report
    }

    pub fn set_focus(&mut self, focus: Option<IdentityKey>) {
        self.focus = focus;
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            items: self.store.snapshot(),
            aggregate: self.aggregate.clone(),
            focus: self.focus.clone(),
        }
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn duplicates(&self) -> u64 {
        self.admission.duplicates()
    }

    fn refresh(&mut self, now: i64) {
        self.aggregate = self.aggregator.recompute(&self.store.all_items(), now);
    }
}

/// Drive `engine` until shutdown or until the supervisor goes away
///
/// Every change is published as a fresh `Arc<FeedView>`.
pub async fn run_feed(
    mut engine: FeedEngine,
    mut rx: mpsc::Receiver<RawEvent>,
    sweep_interval: Duration,
    view_tx: watch::Sender<Arc<FeedView>>,
    mut focus_rx: watch::Receiver<Option<IdentityKey>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    log::info!("🚀 Starting feed loop");
    log::info!("   ├─ Sweep interval: {}ms", sweep_interval.as_millis());
    log::info!("   └─ Window: {:?}", engine.store().config());

    let mut sweep_timer = interval(sweep_interval);
    sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut admitted = 0u64;

    view_tx.send_replace(Arc::new(engine.view()));

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            maybe = rx.recv() => {
                let Some(raw) = maybe else {
                    log::info!("Event channel closed");
                    break;
                };
                match engine.handle(raw) {
                    Ingest::Dropped | Ingest::Duplicate(_) | Ingest::Notice(_) => continue,
                    Ingest::Admitted(_) => admitted += 1,
                    Ingest::Heartbeat => {}
                }
                view_tx.send_replace(Arc::new(engine.view()));
            }

            Ok(()) = focus_rx.changed() => {
                let focus = focus_rx.borrow_and_update().clone();
                engine.set_focus(focus);
                view_tx.send_replace(Arc::new(engine.view()));
            }

            _ = sweep_timer.tick() => {
                engine.tick();
                view_tx.send_replace(Arc::new(engine.view()));
            }
        }
    }

    log::info!(
        "🛑 Feed loop stopped ({} admitted, {} duplicates discarded)",
        admitted,
        engine.duplicates()
    );
}

/// Build the transport a config asks for
pub fn transport_for(config: &FeedConfig) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match config.preset.transport_kind() {
        TransportKind::Polling => Box::new(PollingTransport::new(config.polling_settings())?),
        TransportKind::Streaming => Box::new(StreamingTransport::new(config.streaming_settings())),
    };
    Ok(transport)
}

pub struct Feed;

impl Feed {
    /// Start a feed: one supervisor task and one feed task
    pub fn start<T>(config: &FeedConfig, transport: T) -> Result<FeedHandle, ConfigError>
    where
        T: Transport + 'static,
    {
        Self::start_with_clock(config, transport, system_clock())
    }

    pub fn start_with_clock<T>(
        config: &FeedConfig,
        transport: T,
        clock: Clock,
    ) -> Result<FeedHandle, ConfigError>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let engine = FeedEngine::new_with_clock(
            config.window_config()?,
            config.aggregator_config(),
            PlacementPolicy::new(),
            clock.clone(),
        );

        let (event_tx, event_rx) = mpsc::channel(config.channel_buffer);
        let (view_tx, view_rx) = watch::channel(Arc::new(engine.view()));
        let (focus_tx, focus_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor =
            ConnectionSupervisor::spawn(transport, event_tx, config.supervisor_config(), clock);

        let task = tokio::spawn(run_feed(
            engine,
            event_rx,
            Duration::from_millis(config.sweep_interval_ms),
            view_tx,
            focus_rx,
            shutdown_rx,
        ));

        log::info!("✅ Feed started: {} ({})", config.preset.as_str(), config.endpoint);

        Ok(FeedHandle {
            view_rx,
            focus_tx,
            shutdown_tx,
            supervisor,
            task: Some(task),
        })
    }
}

/// Owner handle of a running feed
pub struct FeedHandle {
    view_rx: watch::Receiver<Arc<FeedView>>,
    focus_tx: watch::Sender<Option<IdentityKey>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: ConnectionSupervisor,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn view(&self) -> watch::Receiver<Arc<FeedView>> {
        self.view_rx.clone()
    }

    pub fn latest(&self) -> Arc<FeedView> {
        self.view_rx.borrow().clone()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.state()
    }

    pub fn set_focus(&self, focus: Option<IdentityKey>) {
        self.focus_tx.send_replace(focus);
    }

    /// Stop the transport, then the feed task. Idempotent.
    pub async fn stop(&mut self) {
        self.supervisor.stop().await;
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("❌ Feed task failed: {}", e);
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::normalizer::EventKind;

    fn engine(clock: &ManualClock) -> FeedEngine {
        FeedEngine::new_with_clock(
            WindowConfig::new(5_000, 10_000, 2).unwrap(),
            AggregatorConfig::default(),
            PlacementPolicy::seeded(3),
            clock.clock(),
        )
    }

    fn proposal(seq: u64, author: &str, number: u64) -> RawEvent {
        RawEvent::new(
            seq,
            Some("block_proposal"),
            format!(r#"{{"author_id":"{}","block_number":{}}}"#, author, number),
        )
    }

    #[test]
    fn test_window_scenario() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock);

        for (t, author) in [(0, "a"), (1_000, "b"), (2_000, "c")] {
            clock.set(t);
            assert!(matches!(engine.handle(proposal(0, author, 1)), Ingest::Admitted(_)));
        }

        clock.set(3_000);
        engine.tick();
        let view = engine.view();
        let authors: Vec<_> = view.items.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(authors, vec!["proposal:b@1", "proposal:c@1"]);

        clock.set(7_000);
        engine.tick();
        assert!(engine.view().items.is_empty());
        assert_eq!(engine.store().len(), 2);
        assert_eq!(engine.view().aggregate.inactive_items, 2);

        clock.set(12_000);
        engine.tick();
        assert!(engine.store().is_empty());

        // durable counters outlive the window
        assert_eq!(engine.view().aggregate.proposals_admitted, 3);
        assert_eq!(engine.aggregator().blocks_produced("a"), 1);
    }

    #[test]
    fn test_duplicate_has_no_side_effect() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock);

        engine.handle(proposal(1, "a", 1));
        clock.set(1_000);
        engine.handle(proposal(2, "b", 1));
        let before = engine.view();

        clock.set(2_500);
        assert!(matches!(engine.handle(proposal(3, "b", 1)), Ingest::Duplicate(_)));

        let after = engine.view();
        assert_eq!(before.items, after.items);
        assert_eq!(after.aggregate.total_admitted, 2);
        let b = after.items.iter().find(|i| i.id.to_string() == "proposal:b@1").unwrap();
        assert_eq!(b.created_at, 1_000);
        assert_eq!(engine.duplicates(), 1);
    }

    #[test]
    fn test_malformed_and_side_channel_events() {
        let clock = ManualClock::new(50);
        let mut engine = engine(&clock);

        assert_eq!(engine.handle(RawEvent::new(1, None, "not json")), Ingest::Dropped);
        assert_eq!(
            engine.handle(RawEvent::new(2, Some("heartbeat"), "{}")),
            Ingest::Heartbeat
        );
        assert!(matches!(
            engine.handle(RawEvent::new(3, Some("connection"), r#"{"status":"ok"}"#)),
            Ingest::Notice(_)
        ));

        let view = engine.view();
        assert!(view.items.is_empty());
        assert_eq!(view.aggregate.last_heartbeat_at, Some(50));
        assert!(view.aggregate.counts_by_kind.get(&EventKind::Heartbeat).is_none());
    }

    #[test]
    fn test_focus_is_relayed() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock);

        let id = match engine.handle(proposal(1, "a", 7)) {
            Ingest::Admitted(item) => item.id,
            other => panic!("unexpected {:?}", other),
        };
        engine.set_focus(Some(id.clone()));
        assert_eq!(engine.view().focus, Some(id));

        engine.set_focus(None);
        assert_eq!(engine.view().focus, None);
    }
}

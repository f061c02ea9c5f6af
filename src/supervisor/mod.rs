//! Connection supervisor - owns the transport lifecycle
//!
//! ```text
//! Disconnected ─start─▶ Connecting ─open/first event─▶ Connected
//!                           ▲                              │
//!                           └──────── Error ◀── failure ───┘
//! stop() from any state ─▶ Disconnected (terminal)
//! ```
//!
//! The supervisor forwards raw events to the feed and publishes connection
//! health. It never touches item state.

pub mod backoff;

use crate::clock::Clock;
use crate::error::TransportError;
use crate::transport::{EventSink, RawEvent, Transport, TransportEvent};
use crate::window::Timestamp;
use backoff::ReconnectBackoff;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Buffer between a running transport and its supervisor
const TRANSPORT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub message: String,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<ErrorInfo>,
    /// Connection attempts made after a failure
    pub reconnect_attempts: u32,
    /// When `status` was entered
    pub since: Timestamp,
}

impl ConnectionState {
    pub fn disconnected(now: Timestamp) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            reconnect_attempts: 0,
            since: now,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Pure connection state machine
///
/// Every method returns whether the state changed. Once stopped, nothing
/// changes anymore.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    stopped: bool,
}

impl ConnectionMachine {
    pub fn new(now: Timestamp) -> Self {
        Self {
            state: ConnectionState::disconnected(now),
            stopped: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Disconnected -> Connecting
    pub fn start(&mut self, now: Timestamp) -> bool {
        self.transition(ConnectionStatus::Disconnected, ConnectionStatus::Connecting, now)
    }

    /// Connecting -> Connected, on an open signal or the first delivery
    pub fn opened(&mut self, now: Timestamp) -> bool {
        self.transition(ConnectionStatus::Connecting, ConnectionStatus::Connected, now)
    }

    /// Connecting | Connected -> Error
    pub fn failed(&mut self, message: impl Into<String>, now: Timestamp) -> bool {
        if self.stopped
            || matches!(
                self.state.status,
                ConnectionStatus::Disconnected | ConnectionStatus::Error
            )
        {
            return false;
        }
        self.state.last_error = Some(ErrorInfo {
            message: message.into(),
            at: now,
        });
        self.enter(ConnectionStatus::Error, now);
        true
    }

    /// Error -> Connecting
    pub fn retry(&mut self, now: Timestamp) -> bool {
        if self.transition(ConnectionStatus::Error, ConnectionStatus::Connecting, now) {
            self.state.reconnect_attempts += 1;
            true
        } else {
            false
        }
    }

    /// Any -> Disconnected, terminal
    pub fn stop(&mut self, now: Timestamp) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.enter(ConnectionStatus::Disconnected, now);
        true
    }

    fn transition(&mut self, from: ConnectionStatus, to: ConnectionStatus, now: Timestamp) -> bool {
        if self.stopped || self.state.status != from {
            return false;
        }
        self.enter(to, now);
        true
    }

    fn enter(&mut self, status: ConnectionStatus, now: Timestamp) {
        self.state.status = status;
        self.state.since = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Floor between connection attempts
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Handle to a running supervisor task
pub struct ConnectionSupervisor {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    /// Start supervising `transport`, forwarding its raw events to `forward`
    pub fn spawn<T>(
        transport: T,
        forward: mpsc::Sender<RawEvent>,
        config: SupervisorConfig,
        clock: Clock,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::disconnected(clock()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(supervise(
            transport,
            forward,
            config,
            clock,
            state_tx,
            shutdown_rx,
        ));

        Self {
            state_rx,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Subscribe to connection health
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Tear down the transport. Idempotent; once this returns no event is
    /// forwarded anymore.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("❌ Supervisor task failed: {}", e);
            }
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum RunOutcome {
    Shutdown,
    FeedGone,
    Ended(Result<(), TransportError>),
}

/// Mutable side of one supervisor task
struct Session {
    target: String,
    machine: ConnectionMachine,
    backoff: ReconnectBackoff,
    forward: mpsc::Sender<RawEvent>,
    clock: Clock,
    state_tx: watch::Sender<ConnectionState>,
}

impl Session {
    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state().clone());
    }

    fn mark_connected(&mut self, how: &str) {
        self.backoff.reset();
        if self.machine.opened((self.clock)()) {
            self.publish();
            log::info!("✅ Connected: {}{}", self.target, how);
        }
    }

    fn mark_failed(&mut self, error: &TransportError) {
        if self.machine.failed(error.to_string(), (self.clock)()) {
            self.publish();
        }
    }

    fn mark_retrying(&mut self) {
        if self.machine.retry((self.clock)()) {
            self.publish();
        }
    }

    /// Apply one transport event
    ///
    /// Returns the outcome that ends the current run, if any. A forward
    /// blocked on a full feed channel still yields to shutdown.
    async fn handle(
        &mut self,
        event: TransportEvent,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<RunOutcome> {
        match event {
            TransportEvent::Opened => self.mark_connected(""),
            TransportEvent::Raw(raw) => {
                self.mark_connected(" (first event)");
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => return Some(RunOutcome::Shutdown),
                    sent = self.forward.send(raw) => {
                        if sent.is_err() {
                            return Some(RunOutcome::FeedGone);
                        }
                    }
                }
            }
            TransportEvent::Error(e) => {
                self.mark_failed(&e);
                if e.is_connection_level() {
                    log::error!("❌ Transport error on {}: {}", self.target, e);
                } else {
                    // request-level: the transport is still running, so it is already retrying
                    log::warn!("⚠️  Request failed on {}: {}", self.target, e);
                    self.mark_retrying();
                }
            }
        }
        None
    }
}

async fn supervise<T: Transport>(
    mut transport: T,
    forward: mpsc::Sender<RawEvent>,
    config: SupervisorConfig,
    clock: Clock,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut session = Session {
        target: transport.describe(),
        machine: ConnectionMachine::new(clock()),
        backoff: ReconnectBackoff::new(config.reconnect_min, config.reconnect_max),
        forward,
        clock,
        state_tx,
    };

    let (tx, mut rx) = mpsc::channel(TRANSPORT_BUFFER);
    let sink = EventSink::new(tx);

    session.machine.start((session.clock)());
    session.publish();
    log::info!("🔌 Connecting ({}): {}", transport.kind().as_str(), session.target);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let outcome = {
            let run = transport.run(&sink);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break RunOutcome::Shutdown,

                    Some(event) = rx.recv() => {
                        if let Some(outcome) = session.handle(event, &mut shutdown_rx).await {
                            break outcome;
                        }
                    }

                    result = &mut run => break RunOutcome::Ended(result),
                }
            }
        };

        let error = match outcome {
            RunOutcome::Shutdown => break,
            RunOutcome::FeedGone => {
                log::info!("Feed closed, stopping supervisor for {}", session.target);
                break;
            }
            RunOutcome::Ended(result) => {
                // events emitted right before the transport returned
                let mut stopped = false;
                while let Ok(event) = rx.try_recv() {
                    if session.handle(event, &mut shutdown_rx).await.is_some() {
                        stopped = true;
                        break;
                    }
                }
                if stopped {
                    break;
                }
                match result {
                    Ok(()) => TransportError::Closed("transport stopped delivering".to_string()),
                    Err(e) => e,
                }
            }
        };

        log::error!("❌ Connection lost on {}: {}", session.target, error);
        session.mark_failed(&error);

        let delay = session.backoff.next_delay();
        log::warn!("⏳ Reconnecting to {} in {}ms", session.target, delay.as_millis());

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        session.mark_retrying();
    }

    session.machine.stop((session.clock)());
    session.publish();
    log::info!("🛑 Supervisor stopped: {}", session.target);
}

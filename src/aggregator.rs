//! Aggregate view over the window plus durable running counters
//!
//! Two kinds of numbers live here:
//! - window-derived figures (live counts, averages) recomputed from the store
//!   on every pass
//! - running counters (per-validator blocks produced, totals) that only ever
//!   grow and survive eviction of the items that triggered them

use crate::normalizer::{DomainEvent, EventKind};
use crate::window::{Timestamp, TrackedItem};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Trailing window for admission rates
    pub rate_window_ms: i64,
    pub leaderboard_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            rate_window_ms: 60_000,
            leaderboard_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub author_id: String,
    pub blocks_produced: u64,
    /// Fraction of all attributed admissions
    pub share: f64,
}

/// Summary handed to presentation, replaced wholesale on every recompute
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateView {
    pub generated_at: Timestamp,
    pub live_items: usize,
    pub inactive_items: usize,
    /// Items currently in the window, by kind
    pub counts_by_kind: BTreeMap<EventKind, usize>,
    pub total_admitted: u64,
    pub blocks_admitted: u64,
    pub proposals_admitted: u64,
    pub admissions_per_minute: f64,
    pub latest_block_number: Option<u64>,
    pub avg_gas_utilization: Option<f64>,
    pub avg_tx_per_block: Option<f64>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub last_heartbeat_at: Option<Timestamp>,
}

pub struct Aggregator {
    config: AggregatorConfig,
    /// author -> blocks produced, never decremented
    blocks_by_author: HashMap<String, u64>,
    totals_by_kind: HashMap<EventKind, u64>,
    admission_times: VecDeque<Timestamp>,
    latest_block_number: Option<u64>,
    last_heartbeat_at: Option<Timestamp>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            blocks_by_author: HashMap::new(),
            totals_by_kind: HashMap::new(),
            admission_times: VecDeque::new(),
            latest_block_number: None,
            last_heartbeat_at: None,
        }
    }

    /// Count an admitted item. Called exactly once per admission.
    pub fn record_admission(&mut self, item: &TrackedItem) {
        *self.totals_by_kind.entry(item.payload.kind()).or_default() += 1;

        let (author, number) = match &item.payload {
            DomainEvent::BlockObserved(block) => (block.miner.as_deref(), Some(block.number)),
            DomainEvent::ValidatorProposal {
                author_id,
                block_number,
            } => (Some(author_id.as_str()), Some(*block_number)),
            _ => (None, None),
        };

        if let Some(author) = author {
            *self.blocks_by_author.entry(author.to_string()).or_default() += 1;
        }
        if let Some(number) = number {
            self.latest_block_number = Some(self.latest_block_number.map_or(number, |n| n.max(number)));
        }

        self.admission_times.push_back(item.created_at);
        self.prune(item.created_at);
    }

    pub fn record_heartbeat(&mut self, now: Timestamp) {
        self.last_heartbeat_at = Some(now);
    }

    /// Forget admission timestamps older than the rate window
    pub fn prune(&mut self, now: Timestamp) {
        let cutoff = now - self.config.rate_window_ms;
        while self.admission_times.front().is_some_and(|t| *t < cutoff) {
            self.admission_times.pop_front();
        }
    }

    pub fn blocks_produced(&self, author_id: &str) -> u64 {
        self.blocks_by_author.get(author_id).copied().unwrap_or(0)
    }

    pub fn total_admitted(&self) -> u64 {
        self.totals_by_kind.values().sum()
    }

    /// Build a fresh view from the store's items and the running counters
    pub fn recompute(&self, items: &[TrackedItem], now: Timestamp) -> AggregateView {
        let live_items = items.iter().filter(|item| item.active).count();

        let mut counts_by_kind = BTreeMap::new();
        for item in items {
            *counts_by_kind.entry(item.payload.kind()).or_insert(0) += 1;
        }

        let blocks: Vec<_> = items
            .iter()
            .filter_map(|item| match &item.payload {
                DomainEvent::BlockObserved(block) => Some(block),
                _ => None,
            })
            .collect();

        let (avg_gas_utilization, avg_tx_per_block) = if blocks.is_empty() {
            (None, None)
        } else {
            let n = blocks.len() as f64;
            (
                Some(blocks.iter().map(|b| b.gas_utilization()).sum::<f64>() / n),
                Some(blocks.iter().map(|b| b.tx_count as f64).sum::<f64>() / n),
            )
        };

        let cutoff = now - self.config.rate_window_ms;
        let recent = self.admission_times.iter().filter(|t| **t >= cutoff).count();
        let admissions_per_minute = if self.config.rate_window_ms > 0 {
            recent as f64 * 60_000.0 / self.config.rate_window_ms as f64
        } else {
            0.0
        };

        AggregateView {
            generated_at: now,
            live_items,
            inactive_items: items.len() - live_items,
            counts_by_kind,
            total_admitted: self.total_admitted(),
            blocks_admitted: self.totals_by_kind.get(&EventKind::Block).copied().unwrap_or(0),
            proposals_admitted: self
                .totals_by_kind
                .get(&EventKind::Proposal)
                .copied()
                .unwrap_or(0),
            admissions_per_minute,
            latest_block_number: self.latest_block_number,
            avg_gas_utilization,
            avg_tx_per_block,
            leaderboard: self.leaderboard(),
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }

    /// Authors by blocks produced, ties broken by name
    fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let total: u64 = self.blocks_by_author.values().sum();

        let mut entries: Vec<LeaderboardEntry> = self
            .blocks_by_author
            .iter()
            .map(|(author_id, count)| LeaderboardEntry {
                author_id: author_id.clone(),
                blocks_produced: *count,
                share: if total == 0 { 0.0 } else { *count as f64 / total as f64 },
            })
            .collect();

        entries.sort_by(|a, b| {
            b.blocks_produced
                .cmp(&a.blocks_produced)
                .then_with(|| a.author_id.cmp(&b.author_id))
        });
        entries.truncate(self.config.leaderboard_size);
        entries
    }
}

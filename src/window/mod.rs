//! Windowed state store - bounded, time-decaying set of admitted items
//!
//! Items live in admission order. Two independent bounds apply:
//! - capacity: inserting past `max_items` drops the oldest items (FIFO)
//! - time: `sweep` deactivates items older than the dwell duration and
//!   evicts items older than the retention horizon
//!
//! Dwell is strictly shorter than retention, so an item is always seen
//! inactive before it disappears by age.

pub mod placement;

use crate::error::ConfigError;
use crate::normalizer::{DomainEvent, IdentityKey};
use placement::{Placement, PlacementPolicy};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Unix milliseconds
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    dwell_ms: i64,
    retention_ms: i64,
    max_items: usize,
}

impl WindowConfig {
    pub fn new(dwell_ms: i64, retention_ms: i64, max_items: usize) -> Result<Self, ConfigError> {
        if dwell_ms <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "dwell duration must be positive, got {}ms",
                dwell_ms
            )));
        }
        if dwell_ms >= retention_ms {
            return Err(ConfigError::InvalidValue(format!(
                "dwell duration ({}ms) must be shorter than retention horizon ({}ms)",
                dwell_ms, retention_ms
            )));
        }
        if max_items == 0 {
            return Err(ConfigError::InvalidValue(
                "maximum item count must be positive".to_string(),
            ));
        }

        Ok(Self {
            dwell_ms,
            retention_ms,
            max_items,
        })
    }

    pub fn dwell_ms(&self) -> i64 {
        self.dwell_ms
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

/// Unit held by the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedItem {
    pub id: IdentityKey,
    pub payload: DomainEvent,
    pub created_at: Timestamp,
    pub active: bool,
    pub placement: Placement,
}

impl TrackedItem {
    pub fn age(&self, now: Timestamp) -> i64 {
        now - self.created_at
    }
}

/// What a sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deactivated: Vec<IdentityKey>,
    pub evicted: Vec<IdentityKey>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.deactivated.is_empty() && self.evicted.is_empty()
    }
}

pub struct WindowStore {
    config: WindowConfig,
    items: VecDeque<TrackedItem>,
    ids: HashSet<IdentityKey>,
    placement: PlacementPolicy,
    last_created_at: Option<Timestamp>,
}

impl WindowStore {
    pub fn new(config: WindowConfig) -> Self {
        Self::with_placement(config, PlacementPolicy::new())
    }

    pub fn with_placement(config: WindowConfig, placement: PlacementPolicy) -> Self {
        Self {
            config,
            items: VecDeque::with_capacity(config.max_items + 1),
            ids: HashSet::with_capacity(config.max_items + 1),
            placement,
            last_created_at: None,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Admit an item, then enforce capacity
    ///
    /// The caller (admission filter) guarantees `id` is not live. `created_at`
    /// never goes backwards even if the clock does.
    pub fn insert(&mut self, id: IdentityKey, payload: DomainEvent, now: Timestamp) -> TrackedItem {
        debug_assert!(!self.ids.contains(&id), "duplicate id reached the store: {}", id);

        let created_at = match self.last_created_at {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_created_at = Some(created_at);

        let occupied: Vec<Placement> = self
            .items
            .iter()
            .filter(|item| item.active)
            .map(|item| item.placement)
            .collect();

        let item = TrackedItem {
            id: id.clone(),
            payload,
            created_at,
            active: true,
            placement: self.placement.place(&occupied),
        };

        self.ids.insert(id);
        self.items.push_back(item.clone());

        while self.items.len() > self.config.max_items {
            if let Some(oldest) = self.items.pop_front() {
                log::debug!("Window full, dropping oldest item {}", oldest.id);
                self.ids.remove(&oldest.id);
            }
        }

        item
    }

    /// Deactivate items past dwell, then evict items past retention
    pub fn sweep(&mut self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        for item in self.items.iter_mut() {
            if item.active && item.age(now) >= self.config.dwell_ms {
                item.active = false;
                report.deactivated.push(item.id.clone());
            }
        }

        let retention_ms = self.config.retention_ms;
        let ids = &mut self.ids;
        self.items.retain(|item| {
            if item.age(now) >= retention_ms {
                debug_assert!(!item.active, "evicting an active item: {}", item.id);
                ids.remove(&item.id);
                report.evicted.push(item.id.clone());
                false
            } else {
                true
            }
        });

        report
    }

    /// Active items in admission order
    pub fn snapshot(&self) -> Vec<TrackedItem> {
        self.items.iter().filter(|item| item.active).cloned().collect()
    }

    /// Every item still held, active or not
    pub fn all_items(&self) -> Vec<TrackedItem> {
        self.items.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedItem> {
        self.items.iter()
    }

    pub fn contains(&self, id: &IdentityKey) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &IdentityKey) -> Option<&TrackedItem> {
        if !self.ids.contains(id) {
            return None;
        }
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.items.iter().filter(|item| item.active).count()
    }
}

//! Deduplication and admission
//!
//! First write wins: an event whose identity is already live in the window, or
//! equals the most recently admitted identity, is a re-delivery and is
//! discarded without touching any state. Existing items are never updated in
//! place.

use crate::normalizer::{DomainEvent, IdentityKey};
use crate::window::WindowStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New identity, insert it
    Admitted(IdentityKey),
    /// Re-delivery of a live or just-admitted identity
    Duplicate(IdentityKey),
    /// Event kind that never enters the window
    Untracked,
}

/// Tracks the most recent admission for every feed, streaming ones included.
/// Only a polling feed can re-deliver an evicted head, but a stream never
/// re-sends an identity it just sent, so the check costs nothing there.
#[derive(Debug, Default)]
pub struct AdmissionFilter {
    last_admitted: Option<IdentityKey>,
    duplicates: u64,
}

impl AdmissionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `event` is new
    ///
    /// An `Admitted` verdict records the identity as the latest admission, so
    /// the caller must insert it into `store` before the next call.
    pub fn admit(&mut self, event: &DomainEvent, store: &WindowStore) -> Admission {
        let Some(id) = event.identity() else {
            return Admission::Untracked;
        };

        if store.contains(&id) || self.last_admitted.as_ref() == Some(&id) {
            self.duplicates += 1;
            log::debug!("Duplicate {} discarded ({} so far)", id, self.duplicates);
            return Admission::Duplicate(id);
        }

        self.last_admitted = Some(id.clone());
        Admission::Admitted(id)
    }

    pub fn last_admitted(&self) -> Option<&IdentityKey> {
        self.last_admitted.as_ref()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::placement::PlacementPolicy;
    use crate::window::WindowConfig;

    fn proposal(author: &str, number: u64) -> DomainEvent {
        DomainEvent::ValidatorProposal {
            author_id: author.to_string(),
            block_number: number,
        }
    }

    fn store() -> WindowStore {
        WindowStore::with_placement(
            WindowConfig::new(1_000, 2_000, 4).unwrap(),
            PlacementPolicy::seeded(11),
        )
    }

    #[test]
    fn test_admits_new_identity() {
        let mut filter = AdmissionFilter::new();
        let store = store();
        let event = proposal("v1", 10);

        assert_eq!(filter.admit(&event, &store), Admission::Admitted(event.identity().unwrap()));
        assert_eq!(filter.last_admitted(), event.identity().as_ref());
    }

    #[test]
    fn test_rejects_live_identity() {
        let mut filter = AdmissionFilter::new();
        let mut store = store();
        let a = proposal("v1", 10);
        let b = proposal("v2", 10);

        for event in [&a, &b] {
            if let Admission::Admitted(id) = filter.admit(event, &store) {
                store.insert(id, event.clone(), 0);
            }
        }

        // `a` is live but no longer the latest admission
        assert!(matches!(filter.admit(&a, &store), Admission::Duplicate(_)));
        assert_eq!(filter.duplicates(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_latest_identity_stays_suppressed_after_eviction() {
        let mut filter = AdmissionFilter::new();
        let mut store = store();
        let event = proposal("v1", 10);

        if let Admission::Admitted(id) = filter.admit(&event, &store) {
            store.insert(id, event.clone(), 0);
        }
        store.sweep(5_000);
        assert!(store.is_empty());

        assert!(matches!(filter.admit(&event, &store), Admission::Duplicate(_)));
    }

    #[test]
    fn test_same_author_different_height_is_new() {
        let mut filter = AdmissionFilter::new();
        let store = store();

        assert!(matches!(filter.admit(&proposal("v1", 1), &store), Admission::Admitted(_)));
        assert!(matches!(filter.admit(&proposal("v1", 2), &store), Admission::Admitted(_)));
    }

    #[test]
    fn test_heartbeat_is_untracked() {
        let mut filter = AdmissionFilter::new();
        let store = store();

        let heartbeat = DomainEvent::Heartbeat { timestamp: None };
        assert_eq!(filter.admit(&heartbeat, &store), Admission::Untracked);
        assert_eq!(filter.last_admitted(), None);
    }
}

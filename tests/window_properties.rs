use chainfeed::aggregator::AggregatorConfig;
use chainfeed::clock::ManualClock;
use chainfeed::feed::{FeedEngine, Ingest};
use chainfeed::normalizer::IdentityKey;
use chainfeed::transport::RawEvent;
use chainfeed::window::placement::PlacementPolicy;
use chainfeed::window::WindowConfig;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

const DWELL_MS: i64 = 5_000;
const RETENTION_MS: i64 = 10_000;
const MAX_ITEMS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Deliver { author: u8, number: u8, dt: u16 },
    Sweep { dt: u16 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..5, 0u8..3, 0u16..4_000).prop_map(|(author, number, dt)| Op::Deliver { author, number, dt }),
        1 => (0u16..6_000).prop_map(|dt| Op::Sweep { dt }),
    ]
}

fn raw(author: u8, number: u8) -> RawEvent {
    RawEvent::new(
        0,
        Some("block_proposal"),
        format!(r#"{{"author_id":"v{}","block_number":{}}}"#, author, number),
    )
}

fn engine(clock: &ManualClock, seed: u64) -> FeedEngine {
    FeedEngine::new_with_clock(
        WindowConfig::new(DWELL_MS, RETENTION_MS, MAX_ITEMS).unwrap(),
        AggregatorConfig::default(),
        PlacementPolicy::seeded(seed),
        clock.clock(),
    )
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(500))]

    #[test]
    fn window_invariants_hold(ops in prop::collection::vec(arb_op(), 1..80), seed in any::<u64>()) {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, seed);

        // (id, created_at) of every item ever seen inactive
        let mut seen_inactive: HashSet<(IdentityKey, i64)> = HashSet::new();

        for op in ops {
            let active_before: HashSet<IdentityKey> = engine
                .store()
                .iter()
                .filter(|item| item.active)
                .map(|item| item.id.clone())
                .collect();

            match op {
                Op::Deliver { author, number, dt } => {
                    clock.advance(dt as i64);
                    engine.handle(raw(author, number));
                }
                Op::Sweep { dt } => {
                    clock.advance(dt as i64);
                    let report = engine.tick();
                    for id in &report.evicted {
                        // an item leaving by expiry was never active at that moment
                        prop_assert!(!active_before.contains(id) || report.deactivated.contains(id));
                    }
                }
            }

            let ids: Vec<_> = engine.store().iter().map(|item| item.id.clone()).collect();
            let unique: HashSet<_> = ids.iter().cloned().collect();
            prop_assert_eq!(ids.len(), unique.len());
            prop_assert!(engine.store().len() <= MAX_ITEMS);

            for item in engine.store().iter() {
                let key = (item.id.clone(), item.created_at);
                if seen_inactive.contains(&key) {
                    prop_assert!(!item.active, "{} was reactivated", item.id);
                }
                if !item.active {
                    seen_inactive.insert(key);
                }
            }
        }
    }

    #[test]
    fn duplicate_of_live_item_has_no_effect(author in 0u8..5, number in 0u8..3, dt in 0u16..4_000) {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 7);

        prop_assert!(matches!(engine.handle(raw(author, number)), Ingest::Admitted(_)));
        let before = engine.store().all_items();
        let admitted_before = engine.aggregator().total_admitted();

        clock.advance(dt as i64);
        prop_assert!(matches!(engine.handle(raw(author, number)), Ingest::Duplicate(_)));

        prop_assert_eq!(engine.store().all_items(), before);
        prop_assert_eq!(engine.aggregator().total_admitted(), admitted_before);
    }

    #[test]
    fn counters_reflect_all_admissions(ops in prop::collection::vec(arb_op(), 1..80)) {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 1);
        let mut expected: HashMap<String, u64> = HashMap::new();

        for op in ops {
            match op {
                Op::Deliver { author, number, dt } => {
                    clock.advance(dt as i64);
                    if let Ingest::Admitted(_) = engine.handle(raw(author, number)) {
                        *expected.entry(format!("v{}", author)).or_default() += 1;
                    }
                }
                Op::Sweep { dt } => {
                    clock.advance(dt as i64);
                    engine.tick();
                }
            }
        }

        for (author, count) in &expected {
            prop_assert_eq!(engine.aggregator().blocks_produced(author), *count);
        }
        prop_assert_eq!(engine.aggregator().total_admitted(), expected.values().sum::<u64>());
    }
}

#[test]
fn capacity_drops_oldest_first() {
    let clock = ManualClock::new(0);
    let mut engine = engine(&clock, 2);

    for author in 0..(MAX_ITEMS as u8 + 2) {
        clock.advance(10);
        engine.handle(raw(author, 0));
    }

    let held: Vec<_> = engine.store().iter().map(|item| item.id.to_string()).collect();
    assert_eq!(held, vec!["proposal:v2@0", "proposal:v3@0", "proposal:v4@0", "proposal:v5@0"]);
}

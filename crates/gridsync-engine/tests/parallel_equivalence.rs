//! A feeder population must end in the same state whatever the worker
//! count, batch size or rank shuffle.

use gridsync_core::{NextEvent, Timestamp};
use gridsync_engine::{Engine, EngineConfig, RunStats};
use gridsync_model::{Payload, PropertyValue};
use gridsync_test_utils::{feeder_module, FEEDER_HORIZON};
use proptest::prelude::*;

const FEEDERS: usize = 4;
const HOUSES_PER_FEEDER: usize = 40;

type Snapshot = Vec<(Payload, NextEvent, Timestamp)>;

fn build(threads: usize, min_batch: usize, shuffle: bool) -> Engine {
    let mut engine = Engine::new(EngineConfig {
        thread_count: Some(threads),
        min_batch,
        shuffle_ranks: shuffle,
        seed: 7,
        watchdog_timeout: None,
        ..EngineConfig::default()
    })
    .unwrap();
    engine.load_module(&feeder_module()).unwrap();
    for feeder in engine.create_objects("feeder", FEEDERS).unwrap() {
        for house in engine.create_objects("house", HOUSES_PER_FEEDER).unwrap() {
            engine.set_parent(house, Some(feeder)).unwrap();
        }
    }
    engine
}

fn run(threads: usize, min_batch: usize, shuffle: bool) -> (RunStats, Snapshot) {
    let mut engine = build(threads, min_batch, shuffle);
    let stats = engine.run().unwrap();
    let snapshot = engine
        .store()
        .iter()
        .map(|o| {
            let body = o.read();
            (body.payload.clone(), body.header.valid_to, body.header.clock)
        })
        .collect();
    (stats, snapshot)
}

fn counters(s: &RunStats) -> (u64, u64, u64, u64) {
    (s.passes, s.time_steps, s.hard_events, s.objects_synced)
}

#[test]
fn serial_run_covers_the_horizon() {
    let mut engine = build(1, 1, true);
    let stats = engine.run().unwrap();
    let ticks = (FEEDER_HORIZON / 60 + 1) as u64;
    assert_eq!(stats.time_steps, ticks);
    assert_eq!(stats.passes, ticks);
    assert_eq!(engine.clock(), Timestamp(FEEDER_HORIZON));

    let feeder = engine.store().iter().next().unwrap().id();
    let sum = engine.get_value(feeder, "sum").unwrap();
    let total: i64 = engine
        .store()
        .iter()
        .filter(|o| o.read().header.parent == Some(feeder))
        .map(|o| match engine.get_value(o.id(), "energy").unwrap() {
            PropertyValue::Int64(e) => e,
            other => panic!("expected int64, got {other:?}"),
        })
        .sum();
    assert_eq!(sum, PropertyValue::Int64(total));
}

#[test]
fn worker_counts_agree_with_serial() {
    let (serial_stats, serial) = run(1, 1, true);
    for threads in [2, 8] {
        let (stats, snapshot) = run(threads, 1, true);
        assert_eq!(counters(&stats), counters(&serial_stats), "threads = {threads}");
        assert_eq!(snapshot, serial, "threads = {threads}");
    }
}

#[test]
fn rank_shuffle_does_not_change_results() {
    let (a_stats, a) = run(4, 2, true);
    let (b_stats, b) = run(4, 2, false);
    assert_eq!(counters(&a_stats), counters(&b_stats));
    assert_eq!(a, b);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn any_partitioning_matches_serial(threads in 2usize..=8, min_batch in 1usize..=64) {
        let (serial_stats, serial) = run(1, 1, true);
        let (stats, snapshot) = run(threads, min_batch, true);
        prop_assert_eq!(counters(&stats), counters(&serial_stats));
        prop_assert_eq!(snapshot, serial);
    }
}

//! Benchmark populations for the gridsync simulation core.
//!
//! - [`reference_profile`]: 10 feeders with 1 000 houses each (10K objects)
//! - [`stress_profile`]: 100 feeders with 1 000 houses each (100K objects)
//! - [`feeder_assignments`]: deterministic house-to-feeder mapping via seed

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use gridsync_engine::{Engine, EngineConfig, EngineError};
use gridsync_test_utils::feeder_module;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Engine settings shared by every profile.
pub fn bench_config(threads: usize, seed: u64) -> EngineConfig {
    EngineConfig {
        thread_count: Some(threads),
        watchdog_timeout: None,
        seed,
        ..EngineConfig::default()
    }
}

/// Build a loaded, uninitialized feeder population.
///
/// Houses are spread over feeders by [`feeder_assignments`], so bucket
/// sizes differ slightly between feeders, as in a real network.
pub fn feeder_population(
    config: EngineConfig,
    feeders: usize,
    houses: usize,
) -> Result<Engine, EngineError> {
    let seed = config.seed;
    let mut engine = Engine::new(config)?;
    engine.load_module(&feeder_module())?;
    let feeder_ids = engine.create_objects("feeder", feeders)?;
    let house_ids = engine.create_objects("house", houses)?;
    for (house, slot) in house_ids.into_iter().zip(feeder_assignments(houses, feeders, seed)) {
        engine.set_parent(house, Some(feeder_ids[slot]))?;
    }
    Ok(engine)
}

/// Reference profile: 10 feeders, 10K houses.
pub fn reference_profile(threads: usize, seed: u64) -> Result<Engine, EngineError> {
    feeder_population(bench_config(threads, seed), 10, 10_000)
}

/// Stress profile: 100 feeders, 100K houses.
pub fn stress_profile(threads: usize, seed: u64) -> Result<Engine, EngineError> {
    feeder_population(bench_config(threads, seed), 100, 100_000)
}

/// Feeder index for each of `houses` houses. Deterministic per seed.
pub fn feeder_assignments(houses: usize, feeders: usize, seed: u64) -> Vec<usize> {
    if feeders == 0 {
        return Vec::new();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..houses).map(|_| rng.random_range(0..feeders)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_builds() {
        let engine = reference_profile(1, 42).unwrap();
        assert_eq!(engine.store().count(), 10_010);
    }

    #[test]
    fn assignments_stay_in_range() {
        let slots = feeder_assignments(1000, 7, 42);
        assert_eq!(slots.len(), 1000);
        assert!(slots.iter().all(|&s| s < 7));
    }

    #[test]
    fn assignments_deterministic() {
        assert_eq!(feeder_assignments(500, 9, 3), feeder_assignments(500, 9, 3));
        assert!(feeder_assignments(10, 0, 3).is_empty());
    }

    #[test]
    fn small_population_runs_to_horizon() {
        let mut engine = feeder_population(bench_config(2, 1), 2, 50).unwrap();
        let stats = engine.run().unwrap();
        assert_eq!(stats.time_steps, 11);
    }
}

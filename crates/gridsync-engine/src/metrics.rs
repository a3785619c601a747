//! Run statistics and the profiler summary.
//!
//! [`RunStats`] accumulates counters across every step of a run;
//! [`ProfileReport`] joins them with per-class timing and per-object
//! lock contention for the summary logged at shutdown.

use std::time::Duration;

use gridsync_model::{ClassRegistry, ObjectStore};
use tracing::info;

/// Counters accumulated over a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Iterations executed, each one PRETOPDOWN, BOTTOMUP and
    /// POSTTOPDOWN in turn.
    pub passes: u64,
    /// Times the global clock advanced.
    pub time_steps: u64,
    /// Hard events reported across all iterations.
    pub hard_events: u64,
    /// Per-object results aggregated across all iterations.
    pub objects_synced: u64,
    /// Wall-clock time spent inside `step`.
    pub elapsed: Duration,
}

/// Timing for one class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSummary {
    /// Class name.
    pub class: String,
    /// Instances created.
    pub objects: u64,
    /// Sync callbacks timed.
    pub syncs: u64,
    /// Total time inside sync callbacks.
    pub model_time: Duration,
}

/// Everything the profiler reports at the end of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileReport {
    /// The run counters.
    pub stats: RunStats,
    /// Object write-lock acquisitions.
    pub lock_acquisitions: u64,
    /// Acquisitions that had to wait.
    pub lock_contended: u64,
    /// Classes with at least one timed sync, busiest first.
    pub classes: Vec<ClassSummary>,
}

impl ProfileReport {
    /// Gather the report from the live tables.
    pub fn collect(stats: &RunStats, registry: &ClassRegistry, store: &ObjectStore) -> Self {
        let (lock_acquisitions, lock_contended) = store
            .iter()
            .map(|o| o.lock_stats())
            .fold((0, 0), |(a, c), (da, dc)| (a + da, c + dc));
        let mut classes: Vec<ClassSummary> = registry
            .class_profiles()
            .into_iter()
            .map(|(class, p)| ClassSummary {
                class,
                objects: p.numobjs,
                syncs: p.count,
                model_time: p.clocks,
            })
            .collect();
        classes.sort_by(|a, b| b.model_time.cmp(&a.model_time));
        Self {
            stats: stats.clone(),
            lock_acquisitions,
            lock_contended,
            classes,
        }
    }

    /// Share of acquisitions that waited, in percent.
    pub fn contention_pct(&self) -> f64 {
        if self.lock_acquisitions == 0 {
            0.0
        } else {
            100.0 * self.lock_contended as f64 / self.lock_acquisitions as f64
        }
    }

    /// Emit the summary at `info` level.
    pub fn log(&self) {
        info!(
            passes = self.stats.passes,
            time_steps = self.stats.time_steps,
            hard_events = self.stats.hard_events,
            objects_synced = self.stats.objects_synced,
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            "run summary"
        );
        info!(
            acquisitions = self.lock_acquisitions,
            contended = self.lock_contended,
            contention_pct = self.contention_pct(),
            "object locks"
        );
        let total: Duration = self.classes.iter().map(|c| c.model_time).sum();
        for c in &self.classes {
            let share = if total.is_zero() {
                0.0
            } else {
                100.0 * c.model_time.as_secs_f64() / total.as_secs_f64()
            };
            info!(
                class = %c.class,
                objects = c.objects,
                syncs = c.syncs,
                model_ms = c.model_time.as_secs_f64() * 1e3,
                share_pct = share,
                "class profile"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_core::PassConfig;
    use gridsync_model::{Callback, StoreConfig};

    #[test]
    fn default_stats_are_zero() {
        let s = RunStats::default();
        assert_eq!(s.passes, 0);
        assert_eq!(s.time_steps, 0);
        assert_eq!(s.hard_events, 0);
        assert_eq!(s.elapsed, Duration::ZERO);
    }

    #[test]
    fn report_orders_classes_by_time() {
        let mut reg = ClassRegistry::new();
        let mut store = ObjectStore::new(StoreConfig::default());
        for (name, ms) in [("light", 1u64), ("heavy", 9)] {
            let c = reg.register_class(name, "m", 0, PassConfig::BOTTOMUP).unwrap();
            reg.define_function(c, Callback::create(|_| Ok(()))).unwrap();
            store.create(&reg, c).unwrap();
            reg.get(c).unwrap().record_sync(Duration::from_millis(ms));
        }
        let obj = store.iter().next().unwrap();
        drop(obj.write());
        let report = ProfileReport::collect(&RunStats::default(), &reg, &store);
        let names: Vec<&str> = report.classes.iter().map(|c| c.class.as_str()).collect();
        assert_eq!(names, ["heavy", "light"]);
        assert_eq!(report.classes[0].objects, 1);
        assert_eq!(report.lock_acquisitions, 1);
        assert_eq!(report.contention_pct(), 0.0);
        report.log();
    }
}

//! Generation-counted two-phase barrier and work partitioning.
//!
//! [`SyncBarrier`] coordinates a fixed set of persistent workers. The
//! coordinator publishes a job and bumps the generation under the
//! start lock, then waits on the done lock until every worker has
//! reported. Workers sleep on the start condvar between generations.
//!
//! The engine keeps one barrier and its worker threads from `init` to
//! `shutdown` to split rank buckets; [`PartitionedSync`] packages the
//! same primitive for a flat population that owns its threads.

use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use gridsync_core::{NextEvent, SyncAggregate, SyncError, Timestamp};
use tracing::debug;

use crate::config::ConfigError;

struct StartState<J> {
    generation: u64,
    job: Option<J>,
    shutdown: bool,
}

struct DoneState<R> {
    remaining: usize,
    /// One slot per worker; `Err` marks a panicked worker.
    results: Vec<Option<Result<R, ()>>>,
}

/// Two condvar/mutex pairs around a generation counter.
///
/// `J` is the job broadcast to every worker, `R` what each worker
/// reports back. A barrier is reusable for any number of generations.
pub struct SyncBarrier<J, R> {
    workers: usize,
    start: Mutex<StartState<J>>,
    start_cv: Condvar,
    done: Mutex<DoneState<R>>,
    done_cv: Condvar,
}

impl<J: Clone, R> SyncBarrier<J, R> {
    /// A barrier for exactly `workers` participants.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            start: Mutex::new(StartState {
                generation: 0,
                job: None,
                shutdown: false,
            }),
            start_cv: Condvar::new(),
            done: Mutex::new(DoneState {
                remaining: 0,
                results: (0..workers).map(|_| None).collect(),
            }),
            done_cv: Condvar::new(),
        }
    }

    /// Number of participating workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Body of worker `idx`: wait for a generation, run `work`, report.
    ///
    /// Returns after [`shutdown`](Self::shutdown). A panic inside
    /// `work` is caught and reported to the coordinator.
    pub fn worker_loop(&self, idx: usize, mut work: impl FnMut(&J) -> R) {
        let mut seen = 0u64;
        loop {
            let job = {
                let mut s = self.start.lock().unwrap_or_else(PoisonError::into_inner);
                while s.generation == seen && !s.shutdown {
                    s = self.start_cv.wait(s).unwrap_or_else(PoisonError::into_inner);
                }
                if s.shutdown {
                    return;
                }
                seen = s.generation;
                s.job.clone()
            };
            let Some(job) = job else { continue };
            let out = catch_unwind(AssertUnwindSafe(|| work(&job))).map_err(|_| ());
            let mut d = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = d.results.get_mut(idx) {
                *slot = Some(out);
            }
            d.remaining = d.remaining.saturating_sub(1);
            if d.remaining == 0 {
                self.done_cv.notify_all();
            }
        }
    }

    /// Run one generation and collect every worker's result in
    /// worker order.
    ///
    /// All `workers` participants must be inside
    /// [`worker_loop`](Self::worker_loop), or this blocks forever.
    pub fn dispatch(&self, job: J) -> Result<Vec<R>, SyncError> {
        {
            let mut d = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            d.remaining = self.workers;
            d.results.iter_mut().for_each(|r| *r = None);
        }
        {
            let mut s = self.start.lock().unwrap_or_else(PoisonError::into_inner);
            s.job = Some(job);
            s.generation += 1;
            self.start_cv.notify_all();
        }
        let mut d = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while d.remaining > 0 {
            d = self.done_cv.wait(d).unwrap_or_else(PoisonError::into_inner);
        }
        let mut out = Vec::with_capacity(self.workers);
        for (worker, slot) in d.results.iter_mut().enumerate() {
            match slot.take() {
                Some(Ok(r)) => out.push(r),
                _ => return Err(SyncError::WorkerPanicked { worker }),
            }
        }
        Ok(out)
    }

    /// Release every worker from its loop.
    pub fn shutdown(&self) {
        let mut s = self.start.lock().unwrap_or_else(PoisonError::into_inner);
        s.shutdown = true;
        self.start_cv.notify_all();
    }
}

/// Split `0..len` into contiguous, balanced ranges.
///
/// At most `max_threads` ranges, each with at least `min_batch` items
/// unless `len` itself is smaller, in which case one range covers
/// everything. Empty input gives no ranges.
pub fn partition(len: usize, max_threads: usize, min_batch: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let min_batch = min_batch.max(1);
    let mut threads = max_threads.max(1);
    if len < threads.saturating_mul(min_batch) {
        threads = (len / min_batch).max(1);
    }
    (0..threads)
        .map(|i| (i * len / threads)..((i + 1) * len / threads))
        .collect()
}

// ── PartitionedSync ────────────────────────────────────────────

/// Per-item sync function for [`PartitionedSync`].
pub type ItemSync<T> = Arc<dyn Fn(&T, Timestamp) -> NextEvent + Send + Sync>;

/// A flat population advanced through one pass at a time by
/// persistent worker threads.
///
/// Threads are spawned once at construction, one per partition. When
/// the population is too small to split, everything runs on the
/// calling thread.
pub struct PartitionedSync<T: Send + Sync + 'static> {
    items: Arc<[T]>,
    ranges: Vec<Range<usize>>,
    sync: ItemSync<T>,
    barrier: Option<Arc<SyncBarrier<Timestamp, SyncAggregate>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> PartitionedSync<T> {
    /// Partition `items` and start the workers.
    pub fn new(
        items: Vec<T>,
        max_threads: usize,
        min_batch: usize,
        sync: ItemSync<T>,
    ) -> Result<Self, ConfigError> {
        let items: Arc<[T]> = items.into();
        let ranges = partition(items.len(), max_threads, min_batch);
        let mut this = Self {
            items,
            ranges,
            sync,
            barrier: None,
            handles: Vec::new(),
        };
        if this.ranges.len() <= 1 {
            debug!(items = this.items.len(), "partitioned sync running serially");
            return Ok(this);
        }
        let barrier = Arc::new(SyncBarrier::new(this.ranges.len()));
        this.barrier = Some(Arc::clone(&barrier));
        for (idx, range) in this.ranges.iter().cloned().enumerate() {
            let items = Arc::clone(&this.items);
            let sync = Arc::clone(&this.sync);
            let barrier = Arc::clone(&barrier);
            let spawned = std::thread::Builder::new()
                .name(format!("gridsync-part-{idx}"))
                .spawn(move || {
                    barrier.worker_loop(idx, |t1: &Timestamp| {
                        items[range.clone()].iter().map(|it| sync(it, *t1)).collect()
                    })
                });
            match spawned {
                Ok(h) => this.handles.push(h),
                // Drop shuts down and joins what was already spawned.
                Err(e) => {
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: e.to_string(),
                    })
                }
            }
        }
        debug!(
            items = this.items.len(),
            workers = this.ranges.len(),
            "partitioned sync workers started"
        );
        Ok(this)
    }

    /// Advance every item to `t1` and reduce the results.
    pub fn sync(&self, t1: Timestamp) -> Result<SyncAggregate, SyncError> {
        match &self.barrier {
            None => Ok(self.items.iter().map(|it| (self.sync)(it, t1)).collect()),
            Some(barrier) => {
                let parts = barrier.dispatch(t1)?;
                Ok(parts.iter().fold(SyncAggregate::default(), |mut acc, p| {
                    acc.merge(p);
                    acc
                }))
            }
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the population is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Worker threads in use; 0 when running serially.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }
}

impl<T: Send + Sync + 'static> Drop for PartitionedSync<T> {
    fn drop(&mut self) {
        if let Some(barrier) = &self.barrier {
            barrier.shutdown();
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn partition_small_population_is_serial() {
        assert_eq!(partition(3, 8, 4), vec![0..3]);
        assert_eq!(partition(7, 8, 4), vec![0..7]);
        assert!(partition(0, 8, 4).is_empty());
    }

    #[test]
    fn partition_respects_min_batch() {
        let parts = partition(10, 8, 4);
        assert_eq!(parts, vec![0..5, 5..10]);
        assert_eq!(partition(100, 4, 4).len(), 4);
    }

    proptest! {
        #[test]
        fn partition_covers_everything_once(
            len in 0usize..500,
            threads in 1usize..16,
            min_batch in 1usize..8,
        ) {
            let parts = partition(len, threads, min_batch);
            prop_assert!(parts.len() <= threads);
            let mut next = 0;
            for r in &parts {
                prop_assert_eq!(r.start, next);
                prop_assert!(r.end > r.start);
                next = r.end;
            }
            prop_assert_eq!(next, len);
            if parts.len() > 1 {
                for r in &parts {
                    prop_assert!(r.len() >= min_batch);
                }
            }
        }
    }

    #[test]
    fn barrier_runs_many_generations() {
        let barrier = SyncBarrier::<u64, u64>::new(3);
        std::thread::scope(|s| {
            for idx in 0..3 {
                let barrier = &barrier;
                s.spawn(move || barrier.worker_loop(idx, |j| j * 10 + idx as u64));
            }
            for g in 1..=50u64 {
                let out = barrier.dispatch(g).unwrap();
                assert_eq!(out, vec![g * 10, g * 10 + 1, g * 10 + 2]);
            }
            barrier.shutdown();
        });
    }

    #[test]
    fn barrier_reports_panicked_worker() {
        let barrier = SyncBarrier::<u32, u32>::new(2);
        std::thread::scope(|s| {
            for idx in 0..2 {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.worker_loop(idx, |j| {
                        if idx == 1 && *j == 2 {
                            panic!("worker fault");
                        }
                        *j
                    })
                });
            }
            assert_eq!(barrier.dispatch(1).unwrap(), vec![1, 1]);
            match barrier.dispatch(2) {
                Err(SyncError::WorkerPanicked { worker: 1 }) => {}
                other => panic!("expected WorkerPanicked, got {other:?}"),
            }
            // The barrier survives the fault.
            assert_eq!(barrier.dispatch(3).unwrap(), vec![3, 3]);
            barrier.shutdown();
        });
    }

    #[test]
    fn partitioned_sync_matches_serial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sync: ItemSync<i64> = Arc::new(move |item, t1| {
            counter.fetch_add(1, Ordering::Relaxed);
            match item % 3 {
                0 => NextEvent::Never,
                1 => NextEvent::hard(Timestamp(t1.0 + item)),
                _ => NextEvent::soft(Timestamp(t1.0 + item)),
            }
        });
        let items: Vec<i64> = (1..=40).collect();
        let serial = PartitionedSync::new(items.clone(), 1, 4, Arc::clone(&sync)).unwrap();
        let pooled = PartitionedSync::new(items, 4, 4, sync).unwrap();
        assert_eq!(serial.workers(), 0);
        assert_eq!(pooled.workers(), 4);
        for t in [0, 100, 200] {
            let a = serial.sync(Timestamp(t)).unwrap();
            let b = pooled.sync(Timestamp(t)).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.objects, 40);
            assert_eq!(a.next, NextEvent::hard(Timestamp(t + 1)));
        }
        assert_eq!(calls.load(Ordering::Relaxed), 240);
    }

    #[test]
    fn partitioned_sync_aggregates_soft_minimum() {
        let events = vec![
            NextEvent::Never,
            NextEvent::hard(Timestamp(100)),
            NextEvent::from_raw(-50),
        ];
        let sync: ItemSync<NextEvent> = Arc::new(|e, _| *e);
        let part = PartitionedSync::new(events, 3, 1, sync).unwrap();
        assert_eq!(part.workers(), 3);
        let agg = part.sync(Timestamp::ZERO).unwrap();
        assert_eq!(agg.next, NextEvent::soft(Timestamp(50)));
        assert_eq!(agg.step_to(), Timestamp(50));
        assert_eq!(agg.hard_events, 1);
    }
}

//! The tick loop.
//!
//! One iteration runs the three passes at the current clock, walking
//! each pass's rank index in its direction. A rank bucket large enough
//! to split is handed to the persistent worker pool; anything smaller
//! runs on the coordinating thread. After the passes the aggregate decides
//! what happens next:
//!
//! - a next time later than the clock commits every object and
//!   advances;
//! - a next time equal to the clock repeats the iteration, at most
//!   `iteration_limit` times;
//! - no hard event, a stop request or the stop time ends the run.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use gridsync_core::{
    CallbackError, Direction, NextEvent, ObjectFlags, Pass, Rank, SyncAggregate, SyncError,
    Timestamp,
};
use gridsync_model::{ClassRegistry, InitStatus, ObjectAccess, ObjectBody, ObjectStore, SimObject};
use tracing::{debug, error, info, warn};

use crate::barrier::{partition, SyncBarrier};
use crate::metrics::RunStats;
use crate::rank_index::PassIndexes;
use crate::sync::{SyncContext, SyncSettings};
use crate::watchdog::Watchdog;

/// The job broadcast to workers: one rank bucket of one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PassJob {
    pub(crate) pass: Pass,
    pub(crate) rank: Rank,
    pub(crate) t1: Timestamp,
    pub(crate) iterations_left: u32,
}

pub(crate) type PassResult = Result<SyncAggregate, SyncError>;

/// The barrier type the tick loop dispatches rank buckets through.
pub(crate) type PassBarrier = SyncBarrier<PassJob, PassResult>;

/// What one iteration of the tick loop did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// The clock the passes ran at.
    pub clock: Timestamp,
    /// The nearest next event reported.
    pub next: NextEvent,
    /// Hard events reported in this iteration.
    pub hard_events: u64,
    /// Per-object results aggregated.
    pub objects: u64,
    /// Whether the clock will move on to `next`.
    pub advanced: bool,
}

/// Clock bookkeeping carried between iterations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecState {
    clock: Timestamp,
    step_to: Timestamp,
    hard_events: u64,
    iterations_left: u32,
    precommitted: Option<Timestamp>,
}

impl ExecState {
    /// State before the first iteration at `start`.
    pub fn new(start: Timestamp, iteration_limit: u32) -> Self {
        Self {
            clock: start,
            step_to: start,
            hard_events: 1,
            iterations_left: iteration_limit,
            precommitted: None,
        }
    }

    /// The clock of the last iteration.
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    /// The clock the next iteration will run at.
    pub fn step_to(&self) -> Timestamp {
        self.step_to
    }

    /// Whether another iteration should run.
    ///
    /// A soft request at the current clock keeps the loop going even
    /// without hard events; a soft request for a later time does not.
    pub fn can_continue(&self, stop_time: Option<Timestamp>, stop: &AtomicBool) -> bool {
        let limit = stop_time.unwrap_or(Timestamp::NEVER);
        self.iterations_left > 0
            && self.step_to < limit
            && (self.hard_events > 0 || self.step_to == self.clock)
            && !stop.load(Ordering::Acquire)
    }
}

/// Per-iteration parameters that come from the engine config.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopLimits {
    pub(crate) iteration_limit: u32,
    pub(crate) stop_time: Option<Timestamp>,
    pub(crate) workers: usize,
    pub(crate) min_batch: usize,
}

/// Borrowed view of everything the tick loop touches.
pub(crate) struct Exec<'a> {
    pub(crate) ctx: SyncContext<'a>,
    pub(crate) indexes: &'a PassIndexes,
    pub(crate) limits: LoopLimits,
    pub(crate) stop: &'a Arc<AtomicBool>,
}

impl Exec<'_> {
    /// Run one iteration. `None` when the run is over.
    pub(crate) fn iterate(
        &self,
        state: &mut ExecState,
        stats: &mut RunStats,
        pool: Option<&PassBarrier>,
    ) -> Result<Option<StepReport>, SyncError> {
        if !state.can_continue(self.limits.stop_time, self.stop) {
            return Ok(None);
        }
        state.hard_events = 0;
        state.clock = state.step_to;
        let clock = state.clock;

        if state.precommitted != Some(clock) {
            self.precommit_all(clock)?;
            state.precommitted = Some(clock);
        }

        let mut agg = SyncAggregate::default();
        for pass in Pass::ALL {
            agg.merge(&self.run_pass(pass, clock, state.iterations_left, pool)?);
        }
        agg.merge(&self.heartbeats(clock)?);
        stats.passes += 1;
        stats.objects_synced += agg.objects;

        let mut step_to = agg.step_to();
        let mut hard_events = agg.hard_events;
        if step_to != clock {
            let committed = self.commit_all(clock, step_to)?;
            step_to = step_to.min(committed.step_to());
            hard_events += committed.hard_events;
        }
        state.hard_events = hard_events;
        stats.hard_events += hard_events;

        let advanced = step_to != clock;
        if advanced {
            state.iterations_left = self.limits.iteration_limit;
            stats.time_steps += 1;
        } else {
            state.iterations_left -= 1;
            if state.iterations_left == 0 {
                error!(%clock, iterations = self.limits.iteration_limit, "convergence iteration limit reached");
                return Err(SyncError::ConvergenceLimit {
                    clock,
                    iterations: self.limits.iteration_limit,
                });
            }
        }
        state.step_to = step_to;
        debug!(%clock, next = %agg.next, hard_events, objects = agg.objects, advanced, "iteration done");
        if step_to.is_never() {
            info!(%clock, "simulation reached steady state");
        }
        Ok(Some(StepReport {
            clock,
            next: agg.next,
            hard_events,
            objects: agg.objects,
            advanced,
        }))
    }

    /// Run one pass over every rank bucket in the pass's direction.
    fn run_pass(
        &self,
        pass: Pass,
        t1: Timestamp,
        iterations_left: u32,
        pool: Option<&PassBarrier>,
    ) -> Result<SyncAggregate, SyncError> {
        let index = self.indexes.pass(pass);
        let mut agg = SyncAggregate::default();
        for rank in index.ranks(pass.direction()) {
            let bucket = index.bucket(rank);
            let job = PassJob {
                pass,
                rank,
                t1,
                iterations_left,
            };
            let parts = partition(bucket.len(), self.limits.workers, self.limits.min_batch);
            match pool {
                Some(barrier) if parts.len() > 1 => {
                    for part in barrier.dispatch(job)? {
                        agg.merge(&part?);
                    }
                }
                _ => agg.merge(&self.sync_range(bucket, 0..bucket.len(), job, 0)?),
            }
        }
        Ok(agg)
    }

    /// Body of worker `idx` for one dispatched bucket.
    pub(crate) fn worker_job(&self, idx: usize, job: &PassJob) -> PassResult {
        let bucket = self.indexes.pass(job.pass).bucket(job.rank);
        let parts = partition(bucket.len(), self.limits.workers, self.limits.min_batch);
        match parts.get(idx) {
            Some(range) => self.sync_range(bucket, range.clone(), *job, idx + 1),
            None => Ok(SyncAggregate::default()),
        }
    }

    fn sync_range(
        &self,
        bucket: &[Arc<SimObject>],
        range: Range<usize>,
        job: PassJob,
        slot: usize,
    ) -> PassResult {
        let mut agg = SyncAggregate::default();
        for obj in &bucket[range] {
            agg.record(self.exec_object(obj, job, slot)?);
        }
        Ok(agg)
    }

    /// One object at the job's clock: service window, sync, then the
    /// stopped-clock check and minimum timestep rounding.
    fn exec_object(
        &self,
        obj: &SimObject,
        job: PassJob,
        slot: usize,
    ) -> Result<NextEvent, SyncError> {
        let clock = job.t1;
        let (in_svc, out_svc) = {
            let body = obj.read();
            (body.header.in_svc, body.header.out_svc)
        };
        let next = if clock < in_svc {
            NextEvent::hard(in_svc)
        } else if clock <= out_svc {
            self.ctx.sync_object(obj, job.pass, clock, slot)?
        } else {
            NextEvent::Never
        };
        if next.is_never() {
            return Ok(next);
        }
        let at = next.magnitude();
        if at < clock {
            let class = self.ctx.class_of(obj)?;
            error!(object = %obj.id(), class = class.name(), %clock, reported = %at, "object stopped its clock");
            return Err(SyncError::ClockStopped {
                class: class.name().to_string(),
                object: obj.id(),
                clock,
                reported: at,
            });
        }
        if at == clock && job.iterations_left == 2 {
            warn!(object = %obj.id(), pass = job.pass.name(), %clock, "convergence iteration limit imminent");
        }
        let step = self.ctx.settings.minimum_timestep;
        if step > 1 && at > clock {
            let rounded = at.round_up_to(step);
            return Ok(match next {
                NextEvent::Soft(_) => NextEvent::soft(rounded),
                _ => NextEvent::hard(rounded),
            });
        }
        Ok(next)
    }

    // ── Lifecycle sweeps ───────────────────────────────────────

    fn precommit_all(&self, clock: Timestamp) -> Result<(), SyncError> {
        for obj in self.ctx.store.iter() {
            let class = self.ctx.class_of(obj)?;
            if let Some(precommit) = &class.callbacks().precommit {
                self.ctx
                    .invoke(obj, "precommit", clock, |body, view| precommit(body, view, clock))?;
            }
        }
        Ok(())
    }

    /// Commit every object from `t1` toward `t2`, bottom-up, and
    /// advance object clocks to `t1`.
    fn commit_all(&self, t1: Timestamp, t2: Timestamp) -> Result<SyncAggregate, SyncError> {
        let mut agg = SyncAggregate::default();
        for obj in self.indexes.all().iter(Direction::BottomUp) {
            let class = self.ctx.class_of(obj)?;
            if let Some(commit) = &class.callbacks().commit {
                let next = self
                    .ctx
                    .invoke(obj, "commit", t1, |body, view| commit(body, view, t1, t2))?;
                if !next.is_never() && next.magnitude() < t1 {
                    return Err(SyncError::ClockStopped {
                        class: class.name().to_string(),
                        object: obj.id(),
                        clock: t1,
                        reported: next.magnitude(),
                    });
                }
                agg.record(next);
            }
            obj.write().header.clock = t1;
        }
        Ok(agg)
    }

    /// Wake every object whose heartbeat interval has elapsed.
    fn heartbeats(&self, clock: Timestamp) -> Result<SyncAggregate, SyncError> {
        let mut agg = SyncAggregate::default();
        for obj in self.indexes.all().iter(Direction::BottomUp) {
            let due = {
                let body = obj.read();
                let h = &body.header;
                h.heartbeat > 0
                    && clock >= h.last_heartbeat.offset(i64::try_from(h.heartbeat).unwrap_or(i64::MAX))
            };
            if !due {
                continue;
            }
            let class = self.ctx.class_of(obj)?;
            let Some(heartbeat) = &class.callbacks().heartbeat else {
                continue;
            };
            let next = self.ctx.invoke(obj, "heartbeat", clock, |body, view| {
                body.header.last_heartbeat = clock;
                heartbeat(body, view)
            })?;
            if !next.is_never() && next.magnitude() < clock {
                return Err(SyncError::ClockStopped {
                    class: class.name().to_string(),
                    object: obj.id(),
                    clock,
                    reported: next.magnitude(),
                });
            }
            agg.record(next);
        }
        Ok(agg)
    }

    /// Sub-step update of every object in bottom-up rank order.
    pub(crate) fn update_all(&self, t: Timestamp, dt: f64) -> Result<(), SyncError> {
        for obj in self.indexes.all().iter(Direction::BottomUp) {
            let class = self.ctx.class_of(obj)?;
            if let Some(update) = &class.callbacks().update {
                self.ctx
                    .invoke(obj, "update", t, |body, view| update(body, view, t, dt))?;
            }
        }
        Ok(())
    }
}

impl SyncContext<'_> {
    /// Run a non-sync callback on `obj` under its write lock, watched
    /// by the coordinator's watchdog slot.
    pub(crate) fn invoke<R>(
        &self,
        obj: &SimObject,
        stage: &'static str,
        t1: Timestamp,
        f: impl FnOnce(&mut ObjectBody, &dyn ObjectAccess) -> Result<R, CallbackError>,
    ) -> Result<R, SyncError> {
        let view = self.store.view(self.registry, obj.id(), t1);
        let _alarm = self.watchdog.arm(0, obj.id());
        let mut body = obj.write();
        f(&mut body, &view).map_err(|reason| SyncError::CallbackFailed {
            class: self
                .registry
                .get(obj.class())
                .map_or_else(|| obj.class().to_string(), |c| c.name().to_string()),
            object: obj.id(),
            stage,
            t1,
            reason,
        })
    }
}

// ── Init and finalize ──────────────────────────────────────────

/// Set every clock to `start` and run `init` until every object is
/// done. Deferred objects are retried in later rounds; a round in which
/// nobody finishes is fatal.
pub(crate) fn init_all(
    ctx: &SyncContext<'_>,
    start: Timestamp,
) -> Result<(), SyncError> {
    let mut pending: Vec<&Arc<SimObject>> = Vec::with_capacity(ctx.store.count());
    for obj in ctx.store.iter() {
        let class = ctx.class_of(obj)?;
        let mut body = obj.write();
        body.header.clock = start;
        body.header.last_heartbeat = start;
        body.header.flags.insert(ObjectFlags::DEFERRED);
        if class.passconfig().force_name() && body.header.name.is_none() {
            warn!(object = %obj.id(), class = class.name(), "object of a named class has no name");
        }
        drop(body);
        pending.push(obj);
    }

    let mut round = 0u32;
    while !pending.is_empty() {
        round += 1;
        let before = pending.len();
        let mut deferred = Vec::new();
        for obj in pending {
            let class = ctx.class_of(obj)?;
            let status = match &class.callbacks().init {
                Some(init) => ctx.invoke(obj, "init", start, |body, view| init(body, view))?,
                None => InitStatus::Done,
            };
            match status {
                InitStatus::Done => obj.write().header.flags.remove(ObjectFlags::DEFERRED),
                InitStatus::Deferred => deferred.push(obj),
            }
        }
        if deferred.len() == before {
            error!(pending = before, round, "deferred initialization made no progress");
            return Err(SyncError::InitStalled { pending: before });
        }
        if !deferred.is_empty() {
            debug!(deferred = deferred.len(), round, "retrying deferred initializations");
        }
        pending = deferred;
    }
    info!(objects = ctx.store.count(), rounds = round, %start, "initialization complete");
    Ok(())
}

/// Run `finalize` on every object.
pub(crate) fn finalize_all(ctx: &SyncContext<'_>, clock: Timestamp) -> Result<(), SyncError> {
    for obj in ctx.store.iter() {
        let class = ctx.class_of(obj)?;
        if let Some(finalize) = &class.callbacks().finalize {
            ctx.invoke(obj, "finalize", clock, |body, view| finalize(body, view))?;
        }
    }
    Ok(())
}

// ── Worker pool ────────────────────────────────────────────────

/// What a worker thread holds for as long as the pool lives.
#[derive(Clone)]
pub(crate) struct SharedRun {
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) store: Arc<ObjectStore>,
    pub(crate) indexes: Arc<PassIndexes>,
    pub(crate) watchdog: Arc<Watchdog>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) settings: SyncSettings,
    pub(crate) limits: LoopLimits,
}

// Compile-time assertion: the run state moves into worker threads.
const _: fn() = || {
    fn assert<T: Send + 'static>() {}
    assert::<SharedRun>();
};

impl SharedRun {
    pub(crate) fn exec(&self) -> Exec<'_> {
        Exec {
            ctx: SyncContext::new(&self.registry, &self.store, &self.watchdog, self.settings),
            indexes: &self.indexes,
            limits: self.limits,
            stop: &self.stop,
        }
    }
}

/// Sync workers that live from `init` to `shutdown`, parked on the
/// barrier between rank buckets.
pub(crate) struct WorkerPool {
    barrier: Arc<PassBarrier>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn one thread per configured worker. `None` when a single
    /// thread is configured or a spawn fails; the run is then serial.
    pub(crate) fn start(run: &SharedRun) -> Option<Self> {
        let workers = run.limits.workers;
        if workers <= 1 {
            return None;
        }
        let barrier = Arc::new(PassBarrier::new(workers));
        let mut pool = Self {
            barrier: Arc::clone(&barrier),
            handles: Vec::with_capacity(workers),
        };
        for idx in 0..workers {
            let run = run.clone();
            let barrier = Arc::clone(&barrier);
            let spawned = std::thread::Builder::new()
                .name(format!("gridsync-sync-{idx}"))
                .spawn(move || {
                    let exec = run.exec();
                    barrier.worker_loop(idx, |job| exec.worker_job(idx, job));
                });
            match spawned {
                Ok(h) => pool.handles.push(h),
                // Drop shuts down and joins what was already spawned.
                Err(e) => {
                    warn!(error = %e, "sync worker spawn failed, running serially");
                    return None;
                }
            }
        }
        debug!(workers, "sync workers started");
        Some(pool)
    }

    pub(crate) fn barrier(&self) -> &PassBarrier {
        &self.barrier
    }

    pub(crate) fn workers(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.barrier.shutdown();
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        debug!("sync workers stopped");
    }
}

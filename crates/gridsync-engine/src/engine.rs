//! The engine context: owns the registries, the object store and the
//! clock, and drives them through `init`, `step`/`run` and `shutdown`.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gridsync_core::{
    ClassError, ClassId, ModuleError, ObjectError, ObjectId, Rank, SyncError, Timestamp,
};
use gridsync_model::{
    ClassRegistry, HeaderField, Module, ModuleRegistry, ObjectStore, PropertyValue, SimObject,
};
use tracing::{error, info};

use crate::config::{ConfigError, EngineConfig};
use crate::exec::{
    finalize_all, init_all, Exec, ExecState, LoopLimits, SharedRun, StepReport, WorkerPool,
};
use crate::metrics::{ProfileReport, RunStats};
use crate::rank_index::PassIndexes;
use crate::sync::{SyncContext, SyncSettings};
use crate::watchdog::{abort_on_expiry, ExpiryHandler, Watchdog};

// ── EngineState ────────────────────────────────────────────────

/// Lifecycle position of an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Modules and objects are being set up.
    Loading,
    /// Objects are initialized; no iteration has run yet.
    Initialized,
    /// At least one iteration has run.
    Running,
    /// The run ended: steady state, stop time or stop request.
    Finished,
    /// An iteration failed; only `shutdown` remains.
    Failed,
    /// `finalize` has run.
    ShutDown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}

// ── EngineError ────────────────────────────────────────────────

/// Anything an [`Engine`] operation can fail with.
#[derive(Debug)]
pub enum EngineError {
    /// Invalid configuration or thread setup.
    Config(ConfigError),
    /// A module failed to load.
    Module(ModuleError),
    /// A class lookup failed.
    Class(ClassError),
    /// An object operation failed.
    Object(ObjectError),
    /// Initialization or an iteration failed.
    Sync(SyncError),
    /// The operation is not allowed in the current state.
    InvalidState {
        /// The operation attempted.
        operation: &'static str,
        /// The engine's state at the time.
        state: EngineState,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {e}"),
            Self::Module(e) => write!(f, "module: {e}"),
            Self::Class(e) => write!(f, "class: {e}"),
            Self::Object(e) => write!(f, "object: {e}"),
            Self::Sync(e) => write!(f, "sync: {e}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while {state}")
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Module(e) => Some(e),
            Self::Class(e) => Some(e),
            Self::Object(e) => Some(e),
            Self::Sync(e) => Some(e),
            Self::InvalidState { .. } => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ModuleError> for EngineError {
    fn from(e: ModuleError) -> Self {
        Self::Module(e)
    }
}

impl From<ClassError> for EngineError {
    fn from(e: ClassError) -> Self {
        Self::Class(e)
    }
}

impl From<ObjectError> for EngineError {
    fn from(e: ObjectError) -> Self {
        Self::Object(e)
    }
}

impl From<SyncError> for EngineError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

// ── StopHandle ─────────────────────────────────────────────────

/// Requests a cooperative stop, honored before the next iteration.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the engine to stop.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Engine ─────────────────────────────────────────────────────

/// A simulation: class registry, object store, rank indexes and clock.
///
/// Objects are created and linked while [`EngineState::Loading`];
/// [`init`](Self::init) freezes the topology into rank indexes and
/// starts the sync workers, which stay up until
/// [`shutdown`](Self::shutdown). Property values may be written between
/// iterations.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<ClassRegistry>,
    modules: ModuleRegistry,
    store: Arc<ObjectStore>,
    indexes: Arc<PassIndexes>,
    exec: ExecState,
    stats: RunStats,
    state: EngineState,
    stop: Arc<AtomicBool>,
    watchdog: Arc<Watchdog>,
    pool: Option<WorkerPool>,
}

/// Mutable access to loading-time state. Fails once the sync workers
/// share it.
fn exclusive<'a, T>(
    shared: &'a mut Arc<T>,
    operation: &'static str,
    state: EngineState,
) -> Result<&'a mut T, EngineError> {
    Arc::get_mut(shared).ok_or(EngineError::InvalidState { operation, state })
}

impl Engine {
    /// Create an engine whose watchdog aborts the process on expiry.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_expiry_handler(config, abort_on_expiry())
    }

    /// Create an engine with a custom watchdog reaction.
    pub fn with_expiry_handler(
        config: EngineConfig,
        handler: ExpiryHandler,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        // Slot 0 is the coordinating thread, workers take 1..=n.
        let slots = config.resolved_thread_count() + 1;
        let watchdog = match config.watchdog_timeout {
            Some(timeout) => Watchdog::start(slots, timeout, handler).map_err(|e| {
                ConfigError::ThreadSpawnFailed {
                    reason: e.to_string(),
                }
            })?,
            None => Watchdog::disabled(slots),
        };
        info!(
            threads = config.resolved_thread_count(),
            start = %config.start_time,
            "engine created"
        );
        Ok(Self {
            store: Arc::new(ObjectStore::new(config.store_config())),
            exec: ExecState::new(config.start_time, config.iteration_limit),
            registry: Arc::new(ClassRegistry::new()),
            modules: ModuleRegistry::new(),
            indexes: Arc::new(PassIndexes::default()),
            stats: RunStats::default(),
            state: EngineState::Loading,
            stop: Arc::new(AtomicBool::new(false)),
            watchdog: Arc::new(watchdog),
            pool: None,
            config,
        })
    }

    fn require(&self, operation: &'static str, allowed: &[EngineState]) -> Result<(), EngineError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn loading(&self, operation: &'static str) -> Result<(), EngineError> {
        self.require(operation, &[EngineState::Loading])
    }

    // ── Setup ──────────────────────────────────────────────────

    /// Register a module's classes.
    pub fn load_module(&mut self, module: &dyn Module) -> Result<Vec<ClassId>, EngineError> {
        let op = "load a module";
        self.loading(op)?;
        let registry = exclusive(&mut self.registry, op, self.state)?;
        Ok(self.modules.load(registry, module)?)
    }

    /// Create one object of the named class.
    pub fn create_object(&mut self, class: &str) -> Result<ObjectId, EngineError> {
        let op = "create objects";
        self.loading(op)?;
        let class = self.registry.class_by_name(class)?;
        let store = exclusive(&mut self.store, op, self.state)?;
        Ok(store.create(&self.registry, class)?)
    }

    /// Create `n` objects of the named class.
    pub fn create_objects(&mut self, class: &str, n: usize) -> Result<Vec<ObjectId>, EngineError> {
        let op = "create objects";
        self.loading(op)?;
        let class = self.registry.class_by_name(class)?;
        let store = exclusive(&mut self.store, op, self.state)?;
        Ok(store.create_array(&self.registry, class, n)?)
    }

    /// Remove an object from the store.
    pub fn remove_object(&mut self, id: ObjectId) -> Result<(), EngineError> {
        let op = "remove objects";
        self.loading(op)?;
        exclusive(&mut self.store, op, self.state)?.remove(id)?;
        Ok(())
    }

    /// Give an object a unique name.
    pub fn set_name(&mut self, id: ObjectId, name: &str) -> Result<(), EngineError> {
        self.loading("rename objects")?;
        Ok(self.store.set_name(id, name)?)
    }

    /// Link `id` to `parent`, raising ranks as needed.
    pub fn set_parent(&mut self, id: ObjectId, parent: Option<ObjectId>) -> Result<Rank, EngineError> {
        self.loading("link objects")?;
        Ok(self.store.set_parent(id, parent)?)
    }

    /// Require `id` to hold at least `rank`.
    pub fn set_rank(&mut self, id: ObjectId, rank: Rank) -> Result<Rank, EngineError> {
        self.loading("rank objects")?;
        Ok(self.store.set_rank(id, rank)?)
    }

    /// Rank `dependent` above `id` without linking them.
    pub fn set_dependent(&mut self, id: ObjectId, dependent: ObjectId) -> Result<Rank, EngineError> {
        self.loading("rank objects")?;
        Ok(self.store.set_dependent(id, dependent)?)
    }

    /// Write a property or header field by name.
    ///
    /// Rank and parent are fixed once the engine is initialized.
    pub fn set_value(
        &mut self,
        id: ObjectId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), EngineError> {
        self.require(
            "set values",
            &[
                EngineState::Loading,
                EngineState::Initialized,
                EngineState::Running,
                EngineState::Finished,
            ],
        )?;
        if self.state != EngineState::Loading
            && matches!(
                HeaderField::from_name(name),
                Some(HeaderField::Rank | HeaderField::Parent)
            )
        {
            return Err(EngineError::InvalidState {
                operation: "change the object topology",
                state: self.state,
            });
        }
        Ok(self.store.set_value(&self.registry, id, name, value)?)
    }

    /// Read a property or header field by name.
    pub fn get_value(&self, id: ObjectId, name: &str) -> Result<PropertyValue, EngineError> {
        Ok(self.store.get_value(&self.registry, id, name)?)
    }

    /// Whether the object is of type `type_name`.
    pub fn isa(&self, id: ObjectId, type_name: &str) -> Result<bool, EngineError> {
        Ok(self.store.isa(&self.registry, id, type_name)?)
    }

    /// Look up a live object by name.
    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        self.store.find_by_name(name)
    }

    /// A live object.
    pub fn object(&self, id: ObjectId) -> Result<&Arc<SimObject>, EngineError> {
        Ok(self.store.object(id)?)
    }

    // ── Accessors ──────────────────────────────────────────────

    /// The class registry.
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// The loaded modules.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// The object store.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Clock of the last iteration, or the start time before the first.
    pub fn clock(&self) -> Timestamp {
        self.exec.clock()
    }

    /// Clock the next iteration would run at.
    pub fn next_time(&self) -> Timestamp {
        self.exec.step_to()
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// A handle that stops the run before its next iteration.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Profiler summary of the run so far.
    pub fn profile_report(&self) -> ProfileReport {
        ProfileReport::collect(&self.stats, &self.registry, &self.store)
    }

    fn context(&self) -> SyncContext<'_> {
        SyncContext::new(
            &self.registry,
            &self.store,
            &self.watchdog,
            SyncSettings::from(&self.config),
        )
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Initialize every object and build the rank indexes.
    pub fn init(&mut self) -> Result<(), EngineError> {
        self.loading("initialize")?;
        let start = self.config.start_time;
        if let Err(e) = init_all(&self.context(), start) {
            return Err(self.fail(e));
        }
        let seed = self.config.shuffle_ranks.then_some(self.config.seed);
        self.indexes = Arc::new(PassIndexes::build(&self.registry, &self.store, seed));
        self.exec = ExecState::new(start, self.config.iteration_limit);
        self.pool = WorkerPool::start(&self.shared_run());
        self.state = EngineState::Initialized;
        Ok(())
    }

    /// Run one iteration: three passes at the next clock.
    ///
    /// Returns `None` once the run is over.
    pub fn step(&mut self) -> Result<Option<StepReport>, EngineError> {
        if self.state == EngineState::Finished {
            return Ok(None);
        }
        self.require("step", &[EngineState::Initialized, EngineState::Running])?;
        let started = Instant::now();
        let exec = Exec {
            ctx: SyncContext::new(
                &self.registry,
                &self.store,
                &self.watchdog,
                SyncSettings::from(&self.config),
            ),
            indexes: &self.indexes,
            limits: self.limits(),
            stop: &self.stop,
        };
        let pool = self.pool.as_ref().map(WorkerPool::barrier);
        let out = exec.iterate(&mut self.exec, &mut self.stats, pool);
        self.stats.elapsed += started.elapsed();
        match out {
            Ok(Some(report)) => {
                self.state = EngineState::Running;
                Ok(Some(report))
            }
            Ok(None) => {
                self.state = EngineState::Finished;
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Iterate until the run is over, initializing first if needed.
    pub fn run(&mut self) -> Result<RunStats, EngineError> {
        if self.state == EngineState::Loading {
            self.init()?;
        }
        if self.state == EngineState::Finished {
            return Ok(self.stats.clone());
        }
        self.require("run", &[EngineState::Initialized, EngineState::Running])?;
        let started = Instant::now();
        let exec = Exec {
            ctx: SyncContext::new(
                &self.registry,
                &self.store,
                &self.watchdog,
                SyncSettings::from(&self.config),
            ),
            indexes: &self.indexes,
            limits: self.limits(),
            stop: &self.stop,
        };
        let pool = self.pool.as_ref().map(WorkerPool::barrier);
        let out = loop {
            match exec.iterate(&mut self.exec, &mut self.stats, pool) {
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stats.elapsed += started.elapsed();
        match out {
            Ok(()) => {
                self.state = EngineState::Finished;
                info!(
                    clock = %self.exec.clock(),
                    passes = self.stats.passes,
                    time_steps = self.stats.time_steps,
                    "run finished"
                );
                Ok(self.stats.clone())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Call every object's `update` callback in bottom-up rank order.
    pub fn update_objects(&mut self, t: Timestamp, dt: f64) -> Result<(), EngineError> {
        self.require(
            "update objects",
            &[EngineState::Initialized, EngineState::Running, EngineState::Finished],
        )?;
        let updated = Exec {
            ctx: self.context(),
            indexes: &self.indexes,
            limits: self.limits(),
            stop: &self.stop,
        }
        .update_all(t, dt);
        updated.map_err(|e| self.fail(e))
    }

    /// Stop the sync workers, finalize every initialized object and
    /// log the profiler summary if enabled.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::ShutDown {
            return Ok(());
        }
        self.pool = None;
        if self.state != EngineState::Loading {
            finalize_all(&self.context(), self.exec.clock())?;
        }
        if self.config.profiler {
            self.profile_report().log();
        }
        self.state = EngineState::ShutDown;
        info!(clock = %self.exec.clock(), "engine shut down");
        Ok(())
    }

    /// Sync worker threads alive; 0 when iterations run serially.
    pub fn worker_threads(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::workers)
    }

    fn shared_run(&self) -> SharedRun {
        SharedRun {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            indexes: Arc::clone(&self.indexes),
            watchdog: Arc::clone(&self.watchdog),
            stop: Arc::clone(&self.stop),
            settings: SyncSettings::from(&self.config),
            limits: self.limits(),
        }
    }

    fn limits(&self) -> LoopLimits {
        LoopLimits {
            iteration_limit: self.config.iteration_limit,
            stop_time: self.config.stop_time,
            workers: self.config.resolved_thread_count(),
            min_batch: self.config.min_batch,
        }
    }

    fn fail(&mut self, e: SyncError) -> EngineError {
        error!(error = %e, clock = %self.exec.clock(), "simulation failed");
        self.state = EngineState::Failed;
        EngineError::Sync(e)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("classes", &self.registry.len())
            .field("objects", &self.store.count())
            .field("clock", &self.exec.clock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_core::{CallbackError, NextEvent, PassConfig};
    use gridsync_model::{Callback, ModuleApi};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    struct Widgets;

    impl Module for Widgets {
        fn name(&self) -> &str {
            "widgets"
        }

        fn init(&self, api: &mut ModuleApi<'_>) -> Result<(), ModuleError> {
            let c = api.register_class("widget", 0, PassConfig::BOTTOMUP)?;
            api.define_function(c, Callback::create(|_| Ok(())))?;
            api.define_function(c, Callback::sync(|_, _, _, _| Ok(NextEvent::Never)))?;
            Ok(())
        }
    }

    /// Records which threads ran its sync callbacks.
    struct Spinners(Arc<Mutex<HashSet<ThreadId>>>);

    impl Module for Spinners {
        fn name(&self) -> &str {
            "spinners"
        }

        fn init(&self, api: &mut ModuleApi<'_>) -> Result<(), ModuleError> {
            let c = api.register_class("spinner", 0, PassConfig::BOTTOMUP)?;
            api.define_function(c, Callback::create(|_| Ok(())))?;
            let seen = Arc::clone(&self.0);
            api.define_function(
                c,
                Callback::sync(move |_, _, t1, _| {
                    seen.lock().unwrap().insert(std::thread::current().id());
                    Ok(NextEvent::hard(Timestamp(t1.0 + 1)))
                }),
            )?;
            api.define_function(
                c,
                Callback::update(|_, _, _, dt| {
                    if dt < 0.0 {
                        Err(CallbackError::failed("negative sub-step"))
                    } else {
                        Ok(())
                    }
                }),
            )?;
            Ok(())
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            thread_count: Some(1),
            watchdog_timeout: None,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = EngineConfig {
            min_batch: 0,
            ..config()
        };
        match Engine::new(cfg) {
            Err(EngineError::Config(ConfigError::ZeroLimit { field: "min_batch" })) => {}
            other => panic!("expected ZeroLimit, got {other:?}"),
        }
    }

    #[test]
    fn step_before_init_is_invalid() {
        let mut engine = Engine::new(config()).unwrap();
        match engine.step() {
            Err(EngineError::InvalidState {
                state: EngineState::Loading,
                ..
            }) => {}
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn topology_is_frozen_after_init() {
        let mut engine = Engine::new(config()).unwrap();
        engine.load_module(&Widgets).unwrap();
        let a = engine.create_object("widget").unwrap();
        let b = engine.create_object("widget").unwrap();
        engine.init().unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);
        assert!(matches!(
            engine.set_parent(a, Some(b)),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.set_value(a, "parent", PropertyValue::Object(Some(b))),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.load_module(&Widgets),
            Err(EngineError::InvalidState { .. })
        ));
        engine
            .set_value(a, "latitude", PropertyValue::Double(45.0))
            .unwrap();
    }

    #[test]
    fn unknown_class_is_reported() {
        let mut engine = Engine::new(config()).unwrap();
        match engine.create_object("gizmo") {
            Err(EngineError::Class(ClassError::UnknownClass { name })) => assert_eq!(name, "gizmo"),
            other => panic!("expected UnknownClass, got {other:?}"),
        }
    }

    #[test]
    fn run_inits_and_finishes() {
        let mut engine = Engine::new(config()).unwrap();
        engine.load_module(&Widgets).unwrap();
        engine.create_objects("widget", 3).unwrap();
        let stats = engine.run().unwrap();
        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.objects_synced, 3);
        assert_eq!(engine.step().unwrap(), None);
        engine.shutdown().unwrap();
        assert_eq!(engine.state(), EngineState::ShutDown);
        assert!(matches!(engine.run(), Err(EngineError::InvalidState { .. })));
    }

    #[test]
    fn stop_handle_ends_run_before_first_iteration() {
        let mut engine = Engine::new(config()).unwrap();
        engine.load_module(&Widgets).unwrap();
        engine.create_object("widget").unwrap();
        engine.init().unwrap();
        let stop = engine.stop_handle();
        stop.request_stop();
        assert!(stop.is_stop_requested());
        assert_eq!(engine.step().unwrap(), None);
        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(engine.stats().passes, 0);
    }

    #[test]
    fn sync_workers_persist_across_steps() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut engine = Engine::new(EngineConfig {
            thread_count: Some(2),
            min_batch: 1,
            ..config()
        })
        .unwrap();
        engine.load_module(&Spinners(Arc::clone(&seen))).unwrap();
        engine.create_objects("spinner", 8).unwrap();
        assert_eq!(engine.worker_threads(), 0);
        engine.init().unwrap();
        assert_eq!(engine.worker_threads(), 2);

        engine.step().unwrap().unwrap();
        let first = std::mem::take(&mut *seen.lock().unwrap());
        engine.step().unwrap().unwrap();
        let second = seen.lock().unwrap().clone();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(!first.contains(&std::thread::current().id()));

        engine.shutdown().unwrap();
        assert_eq!(engine.worker_threads(), 0);
    }

    #[test]
    fn failed_update_marks_engine_failed() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut engine = Engine::new(config()).unwrap();
        engine.load_module(&Spinners(seen)).unwrap();
        engine.create_objects("spinner", 2).unwrap();
        engine.init().unwrap();
        engine.update_objects(Timestamp::ZERO, 0.5).unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);
        match engine.update_objects(Timestamp::ZERO, -1.0) {
            Err(EngineError::Sync(SyncError::CallbackFailed { stage: "update", .. })) => {}
            other => panic!("expected CallbackFailed, got {other:?}"),
        }
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(matches!(engine.step(), Err(EngineError::InvalidState { .. })));
    }
}

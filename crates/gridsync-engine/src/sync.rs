//! Synchronizing one object at one time for one pass.

use std::sync::RwLockWriteGuard;
use std::time::Instant;

use gridsync_core::{
    CallbackError, NextEvent, ObjectFlags, Pass, SyncError, Timestamp,
};
use gridsync_model::{ClassDescriptor, ClassRegistry, ObjectBody, ObjectHeader, ObjectStore, SimObject};
use tracing::trace;

use crate::config::EngineConfig;
use crate::watchdog::Watchdog;

/// The subset of [`EngineConfig`] the per-object path reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    /// Re-invocations allowed for early soft requests.
    pub retry_limit: u32,
    /// Cap on the skip-safe window past the object's clock.
    pub skipsafe_horizon: Option<u64>,
    /// Future times are rounded up to a multiple of this.
    pub minimum_timestep: u64,
    /// Record per-class sync timing.
    pub profiler: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SyncSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry_limit: config.convergence_retry_limit,
            skipsafe_horizon: config.skipsafe_horizon,
            minimum_timestep: config.minimum_timestep,
            profiler: config.profiler,
        }
    }
}

/// Everything a sync thread needs, borrowed for the length of a run.
pub struct SyncContext<'a> {
    pub(crate) registry: &'a ClassRegistry,
    pub(crate) store: &'a ObjectStore,
    pub(crate) watchdog: &'a Watchdog,
    pub(crate) settings: SyncSettings,
}

// Compile-time assertion: one context is shared by every worker.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SyncContext<'static>>();
};

/// The window in which `header`'s last result may be reused, if any.
///
/// Only skip-safe objects whose last result was not a soft request
/// qualify. With a horizon, the window ends no later than
/// `clock + horizon`.
fn skipsafe_window(header: &ObjectHeader, horizon: Option<u64>) -> Option<NextEvent> {
    if !header.flags.contains(ObjectFlags::SKIPSAFE) || header.valid_to.is_soft() {
        return None;
    }
    Some(match horizon {
        Some(h) => {
            let cap = header.clock.offset(i64::try_from(h).unwrap_or(i64::MAX));
            header.valid_to.earliest(NextEvent::hard(cap))
        }
        None => header.valid_to,
    })
}

/// Either one guard for the whole object sync, or a fresh guard per
/// callback.
enum BodyLock<'o> {
    Held(RwLockWriteGuard<'o, ObjectBody>),
    PerCall(&'o SimObject),
}

impl BodyLock<'_> {
    fn with<R>(&mut self, f: impl FnOnce(&mut ObjectBody) -> R) -> R {
        match self {
            BodyLock::Held(guard) => f(&mut **guard),
            BodyLock::PerCall(obj) => f(&mut obj.write()),
        }
    }
}

impl<'a> SyncContext<'a> {
    /// Bundle the borrowed state for a run.
    pub fn new(
        registry: &'a ClassRegistry,
        store: &'a ObjectStore,
        watchdog: &'a Watchdog,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            store,
            watchdog,
            settings,
        }
    }

    /// The per-object settings in effect.
    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub(crate) fn class_of(&self, obj: &SimObject) -> Result<&'a ClassDescriptor, SyncError> {
        self.registry
            .get(obj.class())
            .ok_or(SyncError::UnknownClass {
                class: obj.class(),
                object: obj.id(),
            })
    }

    /// Synchronize `obj` to `t1` for `pass`, re-invoking it while it
    /// answers with a soft request earlier than `t1`.
    ///
    /// `slot` selects the watchdog slot of the calling thread.
    pub fn sync_object(
        &self,
        obj: &SimObject,
        pass: Pass,
        t1: Timestamp,
        slot: usize,
    ) -> Result<NextEvent, SyncError> {
        let class = self.class_of(obj)?;
        let mut retries = 0u32;
        loop {
            let next = self.sync_once(class, obj, pass, t1, slot)?;
            if !(next.is_soft() && next.magnitude() < t1) {
                return Ok(next);
            }
            retries += 1;
            if retries > self.settings.retry_limit {
                return Err(SyncError::NonConvergence {
                    class: class.name().to_string(),
                    object: obj.id(),
                    pass: pass.name(),
                    t1,
                    retries: self.settings.retry_limit,
                });
            }
            trace!(object = %obj.id(), %t1, %next, retries, "early soft request, re-syncing");
        }
    }

    fn sync_once(
        &self,
        class: &ClassDescriptor,
        obj: &SimObject,
        pass: Pass,
        t1: Timestamp,
        slot: usize,
    ) -> Result<NextEvent, SyncError> {
        let window = skipsafe_window(&obj.read().header, self.settings.skipsafe_horizon);
        if let Some(window) = window {
            if t1 < window.magnitude() {
                trace!(object = %obj.id(), %t1, valid_to = %window, "skip-safe");
                return Ok(window);
            }
        }
        let pc = class.passconfig();
        if !pc.requires(pass) {
            return Ok(NextEvent::Never);
        }
        let callbacks = class.callbacks();
        let Some(sync) = callbacks.sync.as_ref() else {
            return Err(SyncError::MissingSync {
                class: class.name().to_string(),
                object: obj.id(),
                pass: pass.name(),
                t1,
            });
        };
        let failed = |stage: &'static str| {
            move |reason: CallbackError| SyncError::CallbackFailed {
                class: class.name().to_string(),
                object: obj.id(),
                stage,
                t1,
                reason,
            }
        };

        let view = self.store.view(self.registry, obj.id(), t1);
        let started = self.settings.profiler.then(Instant::now);
        let _alarm = self.watchdog.arm(slot, obj.id());
        let mut lock = if pc.autolock() {
            BodyLock::PerCall(obj)
        } else {
            BodyLock::Held(obj.write())
        };

        if let Some(recalc) = &callbacks.recalc {
            lock.with(|body| {
                if body.header.flags.contains(ObjectFlags::RECALC) {
                    recalc(body).map_err(failed("recalc"))?;
                    body.header.flags.remove(ObjectFlags::RECALC);
                }
                Ok::<_, SyncError>(())
            })?;
        }

        let plc = match (&callbacks.plc, pass) {
            (Some(plc), Pass::BottomUp) => lock.with(|body| {
                if body.header.flags.contains(ObjectFlags::HAS_PLC) {
                    Ok(NextEvent::Never)
                } else {
                    plc(body, &view, t1).map_err(failed("plc"))
                }
            })?,
            _ => NextEvent::Never,
        };

        let synced = lock
            .with(|body| sync(body, &view, t1, pass))
            .map_err(failed("sync"))?;
        let next = synced.earliest(plc).clamp_to_max();
        lock.with(|body| body.header.valid_to = next);
        drop(lock);

        if let Some(started) = started {
            class.record_sync(started.elapsed());
        }
        trace!(object = %obj.id(), class = class.name(), pass = pass.name(), %t1, %next, "synced");
        Ok(next)
    }
}

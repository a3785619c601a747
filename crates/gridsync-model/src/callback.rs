//! Class lifecycle callbacks and the context they run in.
//!
//! All objects of a class share one [`ClassCallbacks`] table; the
//! engine resolves a slot by class, never by instance. A callback gets
//! exclusive access to its own object's [`ObjectBody`] and reaches every
//! other object only through [`ObjectAccess`], which takes that
//! object's lock for the duration of the closure.

use std::fmt;
use std::sync::Arc;

use gridsync_core::{CallbackError, NextEvent, ObjectError, ObjectId, Pass, Timestamp};

use crate::object::ObjectBody;
use crate::property::PropertyDescriptor;

/// Lifecycle slot of a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Fill in a freshly allocated object. Mandatory.
    Create,
    /// Prepare the object once every object exists.
    Init,
    /// Once per new timestep, before the first pass.
    Precommit,
    /// Per-pass synchronization.
    Sync,
    /// Once the clock is about to advance.
    Commit,
    /// At shutdown.
    Finalize,
    /// Around external property writes.
    Notify,
    /// Answer type queries beyond the class chain.
    Isa,
    /// Built-in control logic, bottom-up pass only.
    Plc,
    /// Recompute derived state after a flagged write.
    Recalc,
    /// Sub-step update.
    Update,
    /// Periodic wake-up.
    Heartbeat,
}

impl Stage {
    /// Every slot, in table order.
    pub const ALL: [Stage; 12] = [
        Stage::Create,
        Stage::Init,
        Stage::Precommit,
        Stage::Sync,
        Stage::Commit,
        Stage::Finalize,
        Stage::Notify,
        Stage::Isa,
        Stage::Plc,
        Stage::Recalc,
        Stage::Update,
        Stage::Heartbeat,
    ];

    /// Lower-case slot name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Create => "create",
            Stage::Init => "init",
            Stage::Precommit => "precommit",
            Stage::Sync => "sync",
            Stage::Commit => "commit",
            Stage::Finalize => "finalize",
            Stage::Notify => "notify",
            Stage::Isa => "isa",
            Stage::Plc => "plc",
            Stage::Recalc => "recalc",
            Stage::Update => "update",
            Stage::Heartbeat => "heartbeat",
        }
    }

    /// Look up a slot by its name.
    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Conventional entry-point name for this slot of `class`,
    /// e.g. `sync_meter`.
    pub fn symbol(self, class: &str) -> String {
        format!("{}_{class}", self.name())
    }

    /// Position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of an `init` callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    /// The object is ready.
    Done,
    /// Call again after other objects have initialized.
    Deferred,
}

/// Which side of an external write a `notify` callback sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyKind {
    /// Before the value is stored.
    PreUpdate,
    /// After the value is stored.
    PostUpdate,
}

/// Access to the rest of the population from inside a callback.
pub trait ObjectAccess: Sync {
    /// The object the callback is running on.
    fn this(&self) -> ObjectId;

    /// The engine's global clock.
    fn clock(&self) -> Timestamp;

    /// Find a live object by name.
    fn find(&self, name: &str) -> Option<ObjectId>;

    /// Run `f` with shared access to another object.
    fn with_object(
        &self,
        id: ObjectId,
        f: &mut dyn FnMut(&ObjectBody),
    ) -> Result<(), ObjectError>;

    /// Run `f` with exclusive access to another object.
    fn with_object_mut(
        &self,
        id: ObjectId,
        f: &mut dyn FnMut(&mut ObjectBody),
    ) -> Result<(), ObjectError>;

    /// Resolve a property of another object's class chain by name.
    fn property(&self, id: ObjectId, name: &str) -> Result<PropertyDescriptor, ObjectError>;
}

impl dyn ObjectAccess + '_ {
    /// Read from another object, returning what `f` returns.
    pub fn read<R>(
        &self,
        id: ObjectId,
        f: impl FnOnce(&ObjectBody) -> R,
    ) -> Result<R, ObjectError> {
        let mut f = Some(f);
        let mut out = None;
        self.with_object(id, &mut |body| {
            if let Some(f) = f.take() {
                out = Some(f(body));
            }
        })?;
        out.ok_or(ObjectError::UnknownObject { object: id })
    }

    /// Modify another object, returning what `f` returns.
    pub fn write<R>(
        &self,
        id: ObjectId,
        f: impl FnOnce(&mut ObjectBody) -> R,
    ) -> Result<R, ObjectError> {
        let mut f = Some(f);
        let mut out = None;
        self.with_object_mut(id, &mut |body| {
            if let Some(f) = f.take() {
                out = Some(f(body));
            }
        })?;
        out.ok_or(ObjectError::UnknownObject { object: id })
    }
}

/// `create` callback.
pub type CreateFn = Arc<dyn Fn(&mut ObjectBody) -> Result<(), CallbackError> + Send + Sync>;
/// `init` callback.
pub type InitFn =
    Arc<dyn Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<InitStatus, CallbackError> + Send + Sync>;
/// `precommit` callback.
pub type PrecommitFn =
    Arc<dyn Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp) -> Result<(), CallbackError> + Send + Sync>;
/// `sync` callback.
pub type SyncFn = Arc<
    dyn Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp, Pass) -> Result<NextEvent, CallbackError>
        + Send
        + Sync,
>;
/// `commit` callback, given the current and the proposed next time.
pub type CommitFn = Arc<
    dyn Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp, Timestamp) -> Result<NextEvent, CallbackError>
        + Send
        + Sync,
>;
/// `finalize` callback.
pub type FinalizeFn =
    Arc<dyn Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<(), CallbackError> + Send + Sync>;
/// `notify` callback.
pub type NotifyFn = Arc<
    dyn Fn(&mut ObjectBody, NotifyKind, &PropertyDescriptor) -> Result<(), CallbackError> + Send + Sync,
>;
/// `isa` callback.
pub type IsaFn = Arc<dyn Fn(&ObjectBody, &str) -> bool + Send + Sync>;
/// `plc` callback.
pub type PlcFn = Arc<
    dyn Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp) -> Result<NextEvent, CallbackError>
        + Send
        + Sync,
>;
/// `recalc` callback.
pub type RecalcFn = Arc<dyn Fn(&mut ObjectBody) -> Result<(), CallbackError> + Send + Sync>;
/// `update` callback, given the time and the sub-step length in seconds.
pub type UpdateFn = Arc<
    dyn Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp, f64) -> Result<(), CallbackError> + Send + Sync,
>;
/// `heartbeat` callback.
pub type HeartbeatFn = Arc<
    dyn Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<NextEvent, CallbackError>
        + Send
        + Sync,
>;

/// One lifecycle function, tagged by its slot.
#[derive(Clone)]
pub enum Callback {
    /// [`Stage::Create`].
    Create(CreateFn),
    /// [`Stage::Init`].
    Init(InitFn),
    /// [`Stage::Precommit`].
    Precommit(PrecommitFn),
    /// [`Stage::Sync`].
    Sync(SyncFn),
    /// [`Stage::Commit`].
    Commit(CommitFn),
    /// [`Stage::Finalize`].
    Finalize(FinalizeFn),
    /// [`Stage::Notify`].
    Notify(NotifyFn),
    /// [`Stage::Isa`].
    Isa(IsaFn),
    /// [`Stage::Plc`].
    Plc(PlcFn),
    /// [`Stage::Recalc`].
    Recalc(RecalcFn),
    /// [`Stage::Update`].
    Update(UpdateFn),
    /// [`Stage::Heartbeat`].
    Heartbeat(HeartbeatFn),
}

impl Callback {
    /// The slot this function fills.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Create(_) => Stage::Create,
            Self::Init(_) => Stage::Init,
            Self::Precommit(_) => Stage::Precommit,
            Self::Sync(_) => Stage::Sync,
            Self::Commit(_) => Stage::Commit,
            Self::Finalize(_) => Stage::Finalize,
            Self::Notify(_) => Stage::Notify,
            Self::Isa(_) => Stage::Isa,
            Self::Plc(_) => Stage::Plc,
            Self::Recalc(_) => Stage::Recalc,
            Self::Update(_) => Stage::Update,
            Self::Heartbeat(_) => Stage::Heartbeat,
        }
    }

    /// Wrap a `create` closure.
    pub fn create<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self::Create(Arc::new(f))
    }

    /// Wrap an `init` closure.
    pub fn init<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<InitStatus, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Init(Arc::new(f))
    }

    /// Wrap a `precommit` closure.
    pub fn precommit<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Precommit(Arc::new(f))
    }

    /// Wrap a `sync` closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(
                &mut ObjectBody,
                &dyn ObjectAccess,
                Timestamp,
                Pass,
            ) -> Result<NextEvent, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a `commit` closure.
    pub fn commit<F>(f: F) -> Self
    where
        F: Fn(
                &mut ObjectBody,
                &dyn ObjectAccess,
                Timestamp,
                Timestamp,
            ) -> Result<NextEvent, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Commit(Arc::new(f))
    }

    /// Wrap a `finalize` closure.
    pub fn finalize<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Finalize(Arc::new(f))
    }

    /// Wrap a `notify` closure.
    pub fn notify<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, NotifyKind, &PropertyDescriptor) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Notify(Arc::new(f))
    }

    /// Wrap an `isa` closure.
    pub fn isa<F>(f: F) -> Self
    where
        F: Fn(&ObjectBody, &str) -> bool + Send + Sync + 'static,
    {
        Self::Isa(Arc::new(f))
    }

    /// Wrap a `plc` closure.
    pub fn plc<F>(f: F) -> Self
    where
        F: Fn(
                &mut ObjectBody,
                &dyn ObjectAccess,
                Timestamp,
            ) -> Result<NextEvent, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Plc(Arc::new(f))
    }

    /// Wrap a `recalc` closure.
    pub fn recalc<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self::Recalc(Arc::new(f))
    }

    /// Wrap an `update` closure.
    pub fn update<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, &dyn ObjectAccess, Timestamp, f64) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Update(Arc::new(f))
    }

    /// Wrap a `heartbeat` closure.
    pub fn heartbeat<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectBody, &dyn ObjectAccess) -> Result<NextEvent, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self::Heartbeat(Arc::new(f))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{}", self.stage())
    }
}

/// The function table shared by every object of a class.
#[derive(Clone, Default)]
pub struct ClassCallbacks {
    /// `create`.
    pub create: Option<CreateFn>,
    /// `init`.
    pub init: Option<InitFn>,
    /// `precommit`.
    pub precommit: Option<PrecommitFn>,
    /// `sync`.
    pub sync: Option<SyncFn>,
    /// `commit`.
    pub commit: Option<CommitFn>,
    /// `finalize`.
    pub finalize: Option<FinalizeFn>,
    /// `notify`.
    pub notify: Option<NotifyFn>,
    /// `isa`.
    pub isa: Option<IsaFn>,
    /// `plc`.
    pub plc: Option<PlcFn>,
    /// `recalc`.
    pub recalc: Option<RecalcFn>,
    /// `update`.
    pub update: Option<UpdateFn>,
    /// `heartbeat`.
    pub heartbeat: Option<HeartbeatFn>,
}

impl ClassCallbacks {
    /// Whether the slot is populated.
    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Create => self.create.is_some(),
            Stage::Init => self.init.is_some(),
            Stage::Precommit => self.precommit.is_some(),
            Stage::Sync => self.sync.is_some(),
            Stage::Commit => self.commit.is_some(),
            Stage::Finalize => self.finalize.is_some(),
            Stage::Notify => self.notify.is_some(),
            Stage::Isa => self.isa.is_some(),
            Stage::Plc => self.plc.is_some(),
            Stage::Recalc => self.recalc.is_some(),
            Stage::Update => self.update.is_some(),
            Stage::Heartbeat => self.heartbeat.is_some(),
        }
    }

    /// Fill a slot. Returns `false` if it was already populated.
    pub fn set(&mut self, callback: Callback) -> bool {
        if self.has(callback.stage()) {
            return false;
        }
        match callback {
            Callback::Create(f) => self.create = Some(f),
            Callback::Init(f) => self.init = Some(f),
            Callback::Precommit(f) => self.precommit = Some(f),
            Callback::Sync(f) => self.sync = Some(f),
            Callback::Commit(f) => self.commit = Some(f),
            Callback::Finalize(f) => self.finalize = Some(f),
            Callback::Notify(f) => self.notify = Some(f),
            Callback::Isa(f) => self.isa = Some(f),
            Callback::Plc(f) => self.plc = Some(f),
            Callback::Recalc(f) => self.recalc = Some(f),
            Callback::Update(f) => self.update = Some(f),
            Callback::Heartbeat(f) => self.heartbeat = Some(f),
        }
        true
    }
}

impl fmt::Debug for ClassCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defined: Vec<&str> = Stage::ALL
            .into_iter()
            .filter(|s| self.has(*s))
            .map(Stage::name)
            .collect();
        f.debug_struct("ClassCallbacks").field("defined", &defined).finish()
    }
}

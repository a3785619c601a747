//! Simulation objects: a fixed header followed by the class payload,
//! guarded by a per-object lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use gridsync_core::{ClassId, NextEvent, ObjectFlags, ObjectId, Rank, Timestamp};

use crate::payload::Payload;

/// Engine-owned fields every object carries.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectHeader {
    /// Unique name, if one was set.
    pub name: Option<String>,
    /// Non-owning back-reference used for rank propagation.
    pub parent: Option<ObjectId>,
    /// Dependency rank.
    pub rank: Rank,
    /// Time the object was last committed to.
    pub clock: Timestamp,
    /// Result of the last sync; the skip-safe window.
    pub valid_to: NextEvent,
    /// Start of the service window.
    pub in_svc: Timestamp,
    /// End of the service window.
    pub out_svc: Timestamp,
    /// Latitude in degrees, NaN when unset.
    pub latitude: f64,
    /// Longitude in degrees, NaN when unset.
    pub longitude: f64,
    /// State flags.
    pub flags: ObjectFlags,
    /// Per-object pseudo-random seed.
    pub rng_seed: u64,
    /// Heartbeat interval in seconds; 0 disables the heartbeat.
    pub heartbeat: u64,
    /// Time of the last heartbeat.
    pub last_heartbeat: Timestamp,
}

impl ObjectHeader {
    /// Header with every field at its sentinel default.
    pub fn new(rng_seed: u64) -> Self {
        Self {
            name: None,
            parent: None,
            rank: Rank::ZERO,
            clock: Timestamp::ZERO,
            valid_to: NextEvent::Hard(Timestamp::ZERO),
            in_svc: Timestamp::ZERO,
            out_svc: Timestamp::NEVER,
            latitude: f64::NAN,
            longitude: f64::NAN,
            flags: ObjectFlags::NONE,
            rng_seed,
            heartbeat: 0,
            last_heartbeat: Timestamp::ZERO,
        }
    }

    /// Whether `t` lies inside `[in_svc, out_svc]`.
    pub fn in_service(&self, t: Timestamp) -> bool {
        t >= self.in_svc && t <= self.out_svc
    }
}

/// Header plus payload: everything a class callback may touch.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectBody {
    id: ObjectId,
    class: ClassId,
    /// Engine-owned fields.
    pub header: ObjectHeader,
    /// Class-owned bytes.
    pub payload: Payload,
}

impl ObjectBody {
    pub(crate) fn new(id: ObjectId, class: ClassId, header: ObjectHeader, payload: Payload) -> Self {
        Self {
            id,
            class,
            header,
            payload,
        }
    }

    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The object's class.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// The name, or `#<id>` for unnamed objects.
    pub fn label(&self) -> String {
        match &self.header.name {
            Some(n) => n.clone(),
            None => format!("#{}", self.id),
        }
    }
}

/// A live object in the store.
///
/// The body sits behind a reader/writer lock; class callbacks run
/// with the write guard held. Acquisitions and contended
/// acquisitions are counted for the run statistics.
#[derive(Debug)]
pub struct SimObject {
    id: ObjectId,
    class: ClassId,
    body: RwLock<ObjectBody>,
    lock_count: AtomicU64,
    lock_contended: AtomicU64,
}

// Compile-time assertion: objects are shared across sync workers.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SimObject>();
};

impl SimObject {
    pub(crate) fn new(body: ObjectBody) -> Self {
        Self {
            id: body.id,
            class: body.class,
            body: RwLock::new(body),
            lock_count: AtomicU64::new(0),
            lock_contended: AtomicU64::new(0),
        }
    }

    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The object's class.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Shared access to the body.
    pub fn read(&self) -> RwLockReadGuard<'_, ObjectBody> {
        self.body.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the body, counting contention.
    pub fn write(&self) -> RwLockWriteGuard<'_, ObjectBody> {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        match self.body.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.lock_contended.fetch_add(1, Ordering::Relaxed);
                self.body.write().unwrap_or_else(PoisonError::into_inner)
            }
        }
    }

    /// `(acquisitions, contended)` write-lock counters.
    pub fn lock_stats(&self) -> (u64, u64) {
        (
            self.lock_count.load(Ordering::Relaxed),
            self.lock_contended.load(Ordering::Relaxed),
        )
    }

    /// Current rank, read under the lock.
    pub fn rank(&self) -> Rank {
        self.read().header.rank
    }
}

//! Synchronization engine for gridsync simulations.
//!
//! The [`Engine`] owns the class registry and object store, buckets
//! objects by rank at init, and advances the global clock through
//! repeated PRETOPDOWN, BOTTOMUP and POSTTOPDOWN passes until no hard
//! event remains. Rank buckets large enough to split are synchronized
//! by a pool of worker threads behind a [`SyncBarrier`]; a
//! [`Watchdog`] bounds how long any single object may take.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod barrier;
pub mod config;
pub mod engine;
pub mod exec;
pub mod metrics;
pub mod rank_index;
pub mod sync;
pub mod watchdog;

pub use barrier::{partition, ItemSync, PartitionedSync, SyncBarrier};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, EngineState, StopHandle};
pub use exec::{ExecState, StepReport};
pub use metrics::{ClassSummary, ProfileReport, RunStats};
pub use rank_index::{PassIndexes, RankIndex};
pub use sync::{SyncContext, SyncSettings};
pub use watchdog::{abort_on_expiry, Expiry, ExpiryHandler, WatchGuard, Watchdog};

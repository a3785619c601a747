//! Gridsync: a discrete-time, rank-ordered simulation core.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! gridsync sub-crates. For most users, adding `gridsync` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use gridsync::prelude::*;
//!
//! // A module with one class that ticks every 10 seconds until t = 30.
//! struct Clocks;
//! impl Module for Clocks {
//!     fn name(&self) -> &str { "clocks" }
//!     fn init(&self, api: &mut ModuleApi<'_>) -> Result<(), ModuleError> {
//!         let c = api.register_class("clock", 0, PassConfig::BOTTOMUP)?;
//!         api.define_function(c, Callback::create(|_| Ok(())))?;
//!         api.define_function(c, Callback::sync(|_, _, t1, _| {
//!             Ok(if t1 < Timestamp(30) {
//!                 NextEvent::hard(t1.offset(10))
//!             } else {
//!                 NextEvent::Never
//!             })
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! let mut engine = Engine::new(EngineConfig {
//!     thread_count: Some(1),
//!     ..EngineConfig::default()
//! })
//! .unwrap();
//! engine.load_module(&Clocks).unwrap();
//! engine.create_objects("clock", 3).unwrap();
//! let stats = engine.run().unwrap();
//! assert_eq!(stats.time_steps, 4);
//! assert_eq!(engine.clock(), Timestamp(30));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `gridsync-core` | IDs, timestamps, pass configuration, errors |
//! | [`model`] | `gridsync-model` | Classes, properties, objects, modules |
//! | [`engine`] | `gridsync-engine` | Rank indexes, tick loop, worker barrier, watchdog |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, IDs and errors (`gridsync-core`).
///
/// Contains [`types::Timestamp`], [`types::NextEvent`], the pass
/// definitions ([`types::Pass`], [`types::PassConfig`]) and every
/// error type.
pub use gridsync_core as types;

/// Class registry, object store and module interface (`gridsync-model`).
///
/// The [`model::Module`] trait is the main extension point for
/// user-defined classes.
pub use gridsync_model as model;

/// The synchronization engine (`gridsync-engine`).
///
/// [`engine::Engine`] owns a simulation end to end;
/// [`engine::PartitionedSync`] is the standalone parallel barrier.
pub use gridsync_engine as engine;

/// Common imports for typical gridsync usage.
///
/// ```rust
/// use gridsync::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use gridsync_core::{
        ClassId, NextEvent, ObjectFlags, ObjectId, Pass, PassConfig, Rank, SyncAggregate,
        Timestamp,
    };

    // Errors
    pub use gridsync_core::{CallbackError, ClassError, ModuleError, ObjectError, SyncError};

    // Model
    pub use gridsync_model::{
        Callback, InitStatus, Module, ModuleApi, ObjectAccess, ObjectBody, PropertyDescriptor,
        PropertyType, PropertyValue,
    };

    // Engine
    pub use gridsync_engine::{
        Engine, EngineConfig, EngineError, EngineState, RunStats, StepReport, StopHandle,
    };
}

//! Core types for the gridsync discrete-time simulation engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the rest of the workspace: strongly-typed
//! identifiers, simulation timestamps and next-event results, the
//! synchronization pass set, object flags, and the error enums of
//! every subsystem.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod flags;
pub mod id;
pub mod pass;
pub mod time;

pub use error::{CallbackError, ClassError, ModuleError, ObjectError, SyncError};
pub use flags::ObjectFlags;
pub use id::{ClassId, ObjectId, Rank};
pub use pass::{Direction, Pass, PassConfig};
pub use time::{NextEvent, SyncAggregate, Timestamp};

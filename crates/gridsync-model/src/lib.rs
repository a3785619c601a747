//! Object model of the gridsync engine.
//!
//! - [`ClassRegistry`]: class descriptors, property inheritance and the
//!   per-class lifecycle function table.
//! - [`ObjectStore`]: object allocation, naming, parent links and rank
//!   propagation, checked property access.
//! - [`Module`]: the versioned interface domain modules register
//!   their classes through.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod callback;
pub mod class;
pub mod module;
pub mod object;
pub mod payload;
pub mod property;
pub mod store;

pub use callback::{Callback, ClassCallbacks, InitStatus, NotifyKind, ObjectAccess, Stage};
pub use class::{ClassDescriptor, ClassProfile, ClassRegistry};
pub use module::{ApiVersion, Module, ModuleApi, ModuleRegistry, CORE_API_VERSION};
pub use object::{ObjectBody, ObjectHeader, SimObject};
pub use payload::Payload;
pub use property::{Access, PropertyDescriptor, PropertyType, PropertyValue};
pub use store::{HeaderField, ObjectStore, StoreConfig, StoreView};

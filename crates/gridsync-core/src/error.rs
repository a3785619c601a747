//! Error types for the gridsync engine, organized by subsystem:
//! class registry, object store, module loading, class callbacks and
//! synchronization.
//!
//! Every variant carries enough context (class name, object id, pass,
//! requested time) to reproduce the failure from the message alone.

use std::error::Error;
use std::fmt;

use crate::{ClassId, ObjectId, Rank, Timestamp};

/// Errors from the property/class registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassError {
    /// A class with this name is already registered.
    DuplicateClass {
        /// The colliding name.
        name: String,
    },
    /// No class is registered under this name.
    UnknownClass {
        /// The name looked up.
        name: String,
    },
    /// No class is registered under this id.
    UnknownClassId {
        /// The id looked up.
        class: ClassId,
    },
    /// Class names must be non-empty and contain no whitespace.
    InvalidClassName {
        /// The rejected name.
        name: String,
    },
    /// A derived class payload is smaller than its parent's.
    ParentTooLarge {
        /// The derived class.
        class: String,
        /// Payload size of the derived class.
        size: usize,
        /// The parent class.
        parent: String,
        /// Payload size of the parent class.
        parent_size: usize,
    },
    /// The class already has a property with this name.
    DuplicateProperty {
        /// The owning class.
        class: String,
        /// The colliding property.
        property: String,
    },
    /// A property does not fit inside the class payload.
    PropertyOutOfBounds {
        /// The owning class.
        class: String,
        /// The property.
        property: String,
        /// Byte offset of the property.
        offset: usize,
        /// Byte size of the property.
        size: usize,
        /// Payload size of the class.
        payload: usize,
    },
    /// The property shares payload bytes with one already declared on
    /// the class or an ancestor.
    PropertyOverlap {
        /// The class.
        class: String,
        /// The property being added.
        property: String,
        /// The property it collides with.
        existing: String,
    },
    /// No property with this name exists in the class chain.
    UnknownProperty {
        /// The class searched.
        class: String,
        /// The property looked up.
        property: String,
    },
    /// The lifecycle slot is already populated.
    DuplicateFunction {
        /// The class.
        class: String,
        /// The slot name.
        stage: &'static str,
    },
    /// Keywords can only be added to enumeration and set properties.
    NotKeywordProperty {
        /// The class.
        class: String,
        /// The property.
        property: String,
    },
    /// The keyword is already defined on this property.
    DuplicateKeyword {
        /// The property.
        property: String,
        /// The keyword.
        keyword: String,
    },
}

impl fmt::Display for ClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateClass { name } => write!(f, "class '{name}' is already registered"),
            Self::UnknownClass { name } => write!(f, "class '{name}' is not registered"),
            Self::UnknownClassId { class } => write!(f, "class id {class} is not registered"),
            Self::InvalidClassName { name } => write!(f, "'{name}' is not a valid class name"),
            Self::ParentTooLarge {
                class,
                size,
                parent,
                parent_size,
            } => write!(
                f,
                "class '{class}' payload ({size} bytes) is smaller than parent '{parent}' ({parent_size} bytes)"
            ),
            Self::DuplicateProperty { class, property } => {
                write!(f, "class '{class}' already defines property '{property}'")
            }
            Self::PropertyOutOfBounds {
                class,
                property,
                offset,
                size,
                payload,
            } => write!(
                f,
                "property '{class}.{property}' at offset {offset} size {size} exceeds payload of {payload} bytes"
            ),
            Self::PropertyOverlap {
                class,
                property,
                existing,
            } => write!(
                f,
                "property '{class}.{property}' overlaps property '{existing}'"
            ),
            Self::UnknownProperty { class, property } => {
                write!(f, "class '{class}' has no property '{property}'")
            }
            Self::DuplicateFunction { class, stage } => {
                write!(f, "class '{class}' already defines {stage}_{class}")
            }
            Self::NotKeywordProperty { class, property } => write!(
                f,
                "property '{class}.{property}' is not an enumeration or set"
            ),
            Self::DuplicateKeyword { property, keyword } => {
                write!(f, "property '{property}' already has keyword '{keyword}'")
            }
        }
    }
}

impl Error for ClassError {}

/// Errors from the object store and property accessors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectError {
    /// The class id does not name a registered class.
    UnknownClass {
        /// The id passed to `create`.
        class: ClassId,
    },
    /// Abstract classes can only be instantiated through a descendant.
    AbstractClass {
        /// The abstract class.
        class: String,
    },
    /// No live object has this id.
    UnknownObject {
        /// The id looked up.
        object: ObjectId,
    },
    /// Another object already holds this name.
    NameTaken {
        /// The name.
        name: String,
        /// The object holding it.
        holder: ObjectId,
    },
    /// Names must start with a letter or underscore.
    InvalidName {
        /// The rejected name.
        name: String,
    },
    /// An object cannot be its own parent.
    SelfParent {
        /// The object.
        object: ObjectId,
    },
    /// Rank propagation revisited an object in its own ancestor chain.
    ParentLoopback {
        /// The object whose rank was being raised.
        object: ObjectId,
        /// The ancestor at which the loop closed.
        ancestor: ObjectId,
    },
    /// No property with this name exists on the object's class chain.
    UnknownProperty {
        /// Class of the object.
        class: String,
        /// The property looked up.
        property: String,
    },
    /// The value has the wrong type for the property.
    TypeMismatch {
        /// The property.
        property: String,
        /// Type the property holds.
        expected: &'static str,
        /// Type supplied.
        found: &'static str,
    },
    /// The property may not be written from outside its class.
    AccessDenied {
        /// The property.
        property: String,
        /// Access level of the property.
        access: &'static str,
    },
    /// Array value length differs from the declared array size.
    ArrayLength {
        /// The property.
        property: String,
        /// Declared size.
        expected: usize,
        /// Supplied length.
        found: usize,
    },
    /// Text value does not fit in the property's fixed capacity.
    TextTooLong {
        /// The property.
        property: String,
        /// Maximum byte length.
        capacity: usize,
        /// Supplied byte length.
        len: usize,
    },
    /// Keyword is not defined on an enumeration or set property.
    UnknownKeyword {
        /// The property.
        property: String,
        /// The keyword.
        keyword: String,
    },
    /// A requested rank is larger than the object population.
    RankOutOfRange {
        /// The object.
        object: ObjectId,
        /// The requested rank.
        rank: Rank,
        /// Number of objects in the store.
        limit: u32,
    },
    /// A property accessor would read or write outside the payload.
    PayloadBounds {
        /// The property.
        property: String,
        /// Byte offset requested.
        offset: usize,
        /// Byte size requested.
        size: usize,
        /// Actual payload size.
        payload: usize,
    },
    /// A callback asked for the object it is already running on.
    SelfLock {
        /// The object.
        object: ObjectId,
    },
    /// A `create` or `notify` callback failed.
    CallbackFailed {
        /// Class of the object.
        class: String,
        /// The object, if it was already allocated.
        object: Option<ObjectId>,
        /// Lifecycle slot that failed.
        stage: &'static str,
        /// Reason reported by the callback.
        reason: String,
    },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClass { class } => write!(f, "cannot create object of unknown class {class}"),
            Self::AbstractClass { class } => {
                write!(f, "cannot create object of abstract class '{class}'")
            }
            Self::UnknownObject { object } => write!(f, "object {object} does not exist"),
            Self::NameTaken { name, holder } => {
                write!(f, "name '{name}' is already used by object {holder}")
            }
            Self::InvalidName { name } => write!(
                f,
                "object name '{name}' must start with a letter or underscore"
            ),
            Self::SelfParent { object } => write!(f, "object {object} cannot be its own parent"),
            Self::ParentLoopback { object, ancestor } => write!(
                f,
                "fatal loopback: object {object} is its own ancestor via object {ancestor}"
            ),
            Self::RankOutOfRange {
                object,
                rank,
                limit,
            } => write!(
                f,
                "rank {rank} for object {object} exceeds the object count {limit}"
            ),
            Self::UnknownProperty { class, property } => {
                write!(f, "class '{class}' has no property '{property}'")
            }
            Self::TypeMismatch {
                property,
                expected,
                found,
            } => write!(f, "property '{property}' holds {expected}, got {found}"),
            Self::AccessDenied { property, access } => {
                write!(f, "property '{property}' is {access} and cannot be set externally")
            }
            Self::ArrayLength {
                property,
                expected,
                found,
            } => write!(
                f,
                "property '{property}' holds {expected} elements, got {found}"
            ),
            Self::TextTooLong {
                property,
                capacity,
                len,
            } => write!(
                f,
                "value for '{property}' is {len} bytes, capacity is {capacity}"
            ),
            Self::UnknownKeyword { property, keyword } => {
                write!(f, "property '{property}' has no keyword '{keyword}'")
            }
            Self::PayloadBounds {
                property,
                offset,
                size,
                payload,
            } => write!(
                f,
                "access to '{property}' at offset {offset} size {size} exceeds payload of {payload} bytes"
            ),
            Self::SelfLock { object } => {
                write!(f, "object {object} is already locked by the running callback")
            }
            Self::CallbackFailed {
                class,
                object,
                stage,
                reason,
            } => {
                write!(f, "{stage}_{class} failed")?;
                if let Some(id) = object {
                    write!(f, " for object {id}")?;
                }
                write!(f, ": {reason}")
            }
        }
    }
}

impl Error for ObjectError {}

/// Errors from loading a domain module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleError {
    /// The module was built against a different core API version.
    VersionMismatch {
        /// The module.
        module: String,
        /// Core API version as `(major, minor)`.
        expected: (u16, u16),
        /// Version the module reports.
        found: (u16, u16),
    },
    /// A module with this name is already loaded.
    DuplicateModule {
        /// The module name.
        module: String,
    },
    /// The module registered a concrete class without a `create` callback.
    MissingCreate {
        /// The module.
        module: String,
        /// The class.
        class: String,
    },
    /// The module tried to modify a class it did not register.
    ForeignClass {
        /// The module.
        module: String,
        /// The class.
        class: String,
    },
    /// Registering a class failed.
    Class {
        /// The module.
        module: String,
        /// The registry error.
        reason: ClassError,
    },
    /// The module's own initializer failed.
    InitFailed {
        /// The module.
        module: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch {
                module,
                expected,
                found,
            } => write!(
                f,
                "module '{module}' uses core API {}.{}, expected {}.{}",
                found.0, found.1, expected.0, expected.1
            ),
            Self::DuplicateModule { module } => write!(f, "module '{module}' is already loaded"),
            Self::MissingCreate { module, class } => write!(
                f,
                "module '{module}' does not implement create_{class}"
            ),
            Self::ForeignClass { module, class } => write!(
                f,
                "module '{module}' cannot modify class '{class}' of another module"
            ),
            Self::Class { module, reason } => write!(f, "module '{module}': {reason}"),
            Self::InitFailed { module, reason } => {
                write!(f, "module '{module}' failed to initialize: {reason}")
            }
        }
    }
}

impl Error for ModuleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Class { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Failure reported by a class lifecycle callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackError {
    /// The callback failed for a model-specific reason.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// An object-store operation made by the callback failed.
    Object(ObjectError),
}

impl CallbackError {
    /// Shorthand for [`CallbackError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => f.write_str(reason),
            Self::Object(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CallbackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Object(e) => Some(e),
            Self::Failed { .. } => None,
        }
    }
}

impl From<ObjectError> for CallbackError {
    fn from(e: ObjectError) -> Self {
        Self::Object(e)
    }
}

/// Errors that abort the current synchronization step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// The class requires a pass but has no sync callback.
    MissingSync {
        /// The class.
        class: String,
        /// The object being synchronized.
        object: ObjectId,
        /// The pass.
        pass: &'static str,
        /// Requested time.
        t1: Timestamp,
    },
    /// A lifecycle callback returned an error.
    CallbackFailed {
        /// The class.
        class: String,
        /// The object.
        object: ObjectId,
        /// Lifecycle slot that failed.
        stage: &'static str,
        /// Requested time.
        t1: Timestamp,
        /// The callback's error.
        reason: CallbackError,
    },
    /// Soft requests earlier than the requested time kept coming back.
    NonConvergence {
        /// The class.
        class: String,
        /// The object.
        object: ObjectId,
        /// The pass.
        pass: &'static str,
        /// Requested time.
        t1: Timestamp,
        /// Re-invocations made before giving up.
        retries: u32,
    },
    /// An object reported a next time earlier than the global clock.
    ClockStopped {
        /// The class.
        class: String,
        /// The object.
        object: ObjectId,
        /// The global clock.
        clock: Timestamp,
        /// The reported time.
        reported: Timestamp,
    },
    /// The global clock failed to advance within the iteration limit.
    ConvergenceLimit {
        /// The stuck clock.
        clock: Timestamp,
        /// Iterations spent at that clock.
        iterations: u32,
    },
    /// Deferred initialization made no progress.
    InitStalled {
        /// Objects still waiting to initialize.
        pending: usize,
    },
    /// A live object refers to a class the registry does not hold.
    UnknownClass {
        /// The dangling class id.
        class: ClassId,
        /// The object.
        object: ObjectId,
    },
    /// A worker thread panicked while running a pass.
    WorkerPanicked {
        /// Index of the worker.
        worker: usize,
    },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSync {
                class,
                object,
                pass,
                t1,
            } => write!(
                f,
                "sync_{class} is not implemented but class requires {pass} (object {object}, t1 {t1})"
            ),
            Self::CallbackFailed {
                class,
                object,
                stage,
                t1,
                reason,
            } => write!(
                f,
                "{stage}_{class} failed for object {object} at {t1}: {reason}"
            ),
            Self::NonConvergence {
                class,
                object,
                pass,
                t1,
                retries,
            } => write!(
                f,
                "object {object} ({class}) did not converge on {pass} at {t1} after {retries} retries"
            ),
            Self::ClockStopped {
                class,
                object,
                clock,
                reported,
            } => write!(
                f,
                "object {object} ({class}) stopped its clock: reported {reported} at clock {clock}"
            ),
            Self::ConvergenceLimit { clock, iterations } => write!(
                f,
                "convergence iteration limit of {iterations} reached at {clock}"
            ),
            Self::InitStalled { pending } => {
                write!(f, "initialization stalled with {pending} objects deferred")
            }
            Self::UnknownClass { class, object } => {
                write!(f, "object {object} has unregistered class id {class}")
            }
            Self::WorkerPanicked { worker } => write!(f, "sync worker {worker} panicked"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CallbackFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_names_class_object_and_time() {
        let e = SyncError::MissingSync {
            class: "meter".into(),
            object: ObjectId(3),
            pass: "BOTTOMUP",
            t1: Timestamp(60),
        };
        let msg = e.to_string();
        assert!(msg.contains("sync_meter"));
        assert!(msg.contains("object 3"));
        assert!(msg.contains("BOTTOMUP"));
        assert!(msg.contains("60"));
    }

    #[test]
    fn callback_error_chains_object_error() {
        let e: CallbackError = ObjectError::SelfLock {
            object: ObjectId(1),
        }
        .into();
        assert!(e.source().is_some());
    }
}

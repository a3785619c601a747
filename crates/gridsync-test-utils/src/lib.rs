//! Fixture modules for gridsync tests.
//!
//! [`FixtureModule`] registers classes described by [`FixtureClass`]
//! values, so a test can declare a class inline with its callbacks.
//! The [`fixtures`] module builds the standard populations used across
//! the workspace on top of it.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex, PoisonError};

use gridsync_core::{ModuleError, ObjectId, Pass, PassConfig, Rank, Timestamp};
use gridsync_model::{Callback, Module, ModuleApi, PropertyDescriptor, Stage};

pub use fixtures::*;

/// A class declared inline: layout, pass participation, callbacks.
#[derive(Clone, Debug)]
pub struct FixtureClass {
    pub name: String,
    pub parent: Option<String>,
    pub size: usize,
    pub passconfig: PassConfig,
    pub properties: Vec<PropertyDescriptor>,
    pub callbacks: Vec<Callback>,
}

impl FixtureClass {
    pub fn new(name: impl Into<String>, size: usize, passconfig: PassConfig) -> Self {
        Self {
            name: name.into(),
            parent: None,
            size,
            passconfig,
            properties: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Inherit from a class registered earlier.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn property(mut self, prop: PropertyDescriptor) -> Self {
        self.properties.push(prop);
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }
}

/// A module registering a list of [`FixtureClass`]es in order.
///
/// Classes without a `create` callback get a no-op one.
#[derive(Clone, Debug)]
pub struct FixtureModule {
    name: String,
    classes: Vec<FixtureClass>,
}

impl FixtureModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class(mut self, class: FixtureClass) -> Self {
        self.classes.push(class);
        self
    }
}

impl Module for FixtureModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, api: &mut ModuleApi<'_>) -> Result<(), ModuleError> {
        for c in &self.classes {
            let id = match &c.parent {
                Some(parent) => {
                    let pid = api.find_class(parent).ok_or_else(|| ModuleError::InitFailed {
                        module: self.name.clone(),
                        reason: format!("unknown parent class '{parent}'"),
                    })?;
                    api.register_class_with_parent(&c.name, c.size, c.passconfig, pid)?
                }
                None => api.register_class(&c.name, c.size, c.passconfig)?,
            };
            for prop in &c.properties {
                api.add_property(id, prop.clone())?;
            }
            for cb in &c.callbacks {
                api.define_function(id, cb.clone())?;
            }
            if !c.callbacks.iter().any(|cb| cb.stage() == Stage::Create) {
                api.define_function(id, Callback::create(|_| Ok(())))?;
            }
        }
        Ok(())
    }
}

/// One recorded sync invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub pass: Pass,
    pub object: ObjectId,
    pub rank: Rank,
    pub t1: Timestamp,
}

/// Shared, append-only record of sync invocations.
#[derive(Clone, Debug, Default)]
pub struct TraceLog(Arc<Mutex<Vec<TraceEntry>>>);

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: TraceEntry) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Ranks visited during `pass`, in invocation order.
    pub fn ranks_for(&self, pass: Pass) -> Vec<Rank> {
        self.entries()
            .into_iter()
            .filter(|e| e.pass == pass)
            .map(|e| e.rank)
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Shared list of lifecycle event labels such as `"commit@0->10"`.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

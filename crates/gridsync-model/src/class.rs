//! Property/class registry.
//!
//! Classes are registered once per module at load time and never
//! removed. Each class may name a single parent whose properties it
//! inherits; property lookup walks the class's own map first and then
//! each ancestor in turn, so a derived class shadows its parent.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use gridsync_core::{ClassError, ClassId, PassConfig};
use indexmap::IndexMap;
use tracing::warn;

use crate::callback::{Callback, ClassCallbacks};
use crate::property::{PropertyDescriptor, PropertyType};

/// Aggregate profiling counters of one class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassProfile {
    /// Objects created.
    pub numobjs: u64,
    /// Sync invocations.
    pub count: u64,
    /// Wall time spent in sync invocations.
    pub clocks: Duration,
}

/// Shape, pass configuration and function table of one class.
pub struct ClassDescriptor {
    id: ClassId,
    name: String,
    module: String,
    size: usize,
    parent: Option<ClassId>,
    passconfig: PassConfig,
    properties: IndexMap<String, PropertyDescriptor>,
    callbacks: ClassCallbacks,
    profile: Mutex<ClassProfile>,
}

// Compile-time assertion: descriptors are shared across sync workers.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ClassDescriptor>();
};

impl ClassDescriptor {
    /// Registry id.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the module that registered the class.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Parent class, if any.
    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    /// Pass and behaviour bits.
    pub fn passconfig(&self) -> PassConfig {
        self.passconfig
    }

    /// The shared function table.
    pub fn callbacks(&self) -> &ClassCallbacks {
        &self.callbacks
    }

    /// Properties declared by this class itself, in declaration order.
    pub fn own_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Record one created instance.
    pub fn record_instance(&self) {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .numobjs += 1;
    }

    /// Record one sync invocation taking `elapsed`.
    pub fn record_sync(&self, elapsed: Duration) {
        let mut p = self.profile.lock().unwrap_or_else(PoisonError::into_inner);
        p.count += 1;
        p.clocks += elapsed;
    }

    /// Snapshot of the profiling counters.
    pub fn profile(&self) -> ClassProfile {
        *self.profile.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("module", &self.module)
            .field("size", &self.size)
            .field("parent", &self.parent)
            .field("passconfig", &self.passconfig)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// All registered classes, indexed by [`ClassId`] and by name.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: IndexMap<String, ClassDescriptor>,
}

/// Iterator over a class and its ancestors, nearest first.
pub struct ClassChain<'a> {
    registry: &'a ClassRegistry,
    next: Option<ClassId>,
    remaining: usize,
}

impl<'a> Iterator for ClassChain<'a> {
    type Item = &'a ClassDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let class = self.registry.get(self.next?)?;
        self.next = class.parent;
        Some(class)
    }
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class with no parent.
    pub fn register_class(
        &mut self,
        name: &str,
        module: &str,
        size: usize,
        passconfig: PassConfig,
    ) -> Result<ClassId, ClassError> {
        self.insert_class(name, module, size, passconfig, None)
    }

    /// Register a class that inherits the properties of `parent`.
    ///
    /// The derived payload must be at least as large as the parent's,
    /// since inherited properties keep their offsets.
    pub fn register_class_with_parent(
        &mut self,
        name: &str,
        module: &str,
        size: usize,
        passconfig: PassConfig,
        parent: ClassId,
    ) -> Result<ClassId, ClassError> {
        let p = self.class(parent)?;
        if size < p.size {
            return Err(ClassError::ParentTooLarge {
                class: name.to_string(),
                size,
                parent: p.name.clone(),
                parent_size: p.size,
            });
        }
        self.insert_class(name, module, size, passconfig, Some(parent))
    }

    fn insert_class(
        &mut self,
        name: &str,
        module: &str,
        size: usize,
        passconfig: PassConfig,
        parent: Option<ClassId>,
    ) -> Result<ClassId, ClassError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ClassError::InvalidClassName {
                name: name.to_string(),
            });
        }
        if self.classes.contains_key(name) {
            return Err(ClassError::DuplicateClass {
                name: name.to_string(),
            });
        }
        let id = ClassId(self.classes.len() as u32);
        self.classes.insert(
            name.to_string(),
            ClassDescriptor {
                id,
                name: name.to_string(),
                module: module.to_string(),
                size,
                parent,
                passconfig,
                properties: IndexMap::new(),
                callbacks: ClassCallbacks::default(),
                profile: Mutex::new(ClassProfile::default()),
            },
        );
        Ok(id)
    }

    /// Drop every class registered after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.classes.truncate(len);
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no class is registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Classes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    /// Descriptor by id.
    pub fn get(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.classes.get_index(id.index()).map(|(_, c)| c)
    }

    /// Descriptor by id, as a `Result`.
    pub fn class(&self, id: ClassId) -> Result<&ClassDescriptor, ClassError> {
        self.get(id).ok_or(ClassError::UnknownClassId { class: id })
    }

    fn class_mut(&mut self, id: ClassId) -> Result<&mut ClassDescriptor, ClassError> {
        self.classes
            .get_index_mut(id.index())
            .map(|(_, c)| c)
            .ok_or(ClassError::UnknownClassId { class: id })
    }

    /// Id of the class registered under `name`.
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes.get(name).map(|c| c.id)
    }

    /// Id of the class registered under `name`, as a `Result`.
    pub fn class_by_name(&self, name: &str) -> Result<ClassId, ClassError> {
        self.find_class(name).ok_or_else(|| ClassError::UnknownClass {
            name: name.to_string(),
        })
    }

    /// The class followed by its ancestors.
    pub fn chain(&self, id: ClassId) -> ClassChain<'_> {
        ClassChain {
            registry: self,
            next: Some(id),
            remaining: self.classes.len(),
        }
    }

    /// Every property visible on `id`: own properties, then each
    /// ancestor's.
    pub fn chain_properties(&self, id: ClassId) -> impl Iterator<Item = &PropertyDescriptor> {
        self.chain(id).flat_map(|c| c.properties.values())
    }

    /// Whether `id` or one of its ancestors is named `type_name`.
    pub fn is_a(&self, id: ClassId, type_name: &str) -> bool {
        self.chain(id).any(|c| c.name == type_name)
    }

    /// Add a property to a class.
    ///
    /// Fails if the class already declares the name, the property does
    /// not fit in the payload, or its bytes overlap a property of the
    /// class or an ancestor. Shadowing an ancestor's property by name is
    /// allowed and logged.
    pub fn add_property(
        &mut self,
        class: ClassId,
        mut prop: PropertyDescriptor,
    ) -> Result<PropertyDescriptor, ClassError> {
        let c = self.class(class)?;
        if prop.end() > c.size {
            return Err(ClassError::PropertyOutOfBounds {
                class: c.name.clone(),
                offset: prop.offset,
                size: prop.size(),
                payload: c.size,
                property: prop.name,
            });
        }
        if c.properties.contains_key(&prop.name) {
            return Err(ClassError::DuplicateProperty {
                class: c.name.clone(),
                property: prop.name,
            });
        }
        let span = prop.offset..prop.end();
        if let Some(existing) = self
            .chain_properties(class)
            .find(|p| p.offset < span.end && span.start < p.end())
        {
            return Err(ClassError::PropertyOverlap {
                class: c.name.clone(),
                property: prop.name,
                existing: existing.name.clone(),
            });
        }
        if let Some(shadowed) = self
            .chain(class)
            .skip(1)
            .find(|a| a.properties.contains_key(&prop.name))
        {
            warn!(
                class = %c.name,
                property = %prop.name,
                ancestor = %shadowed.name,
                "property shadows an inherited property"
            );
        }
        prop.owner = class;
        let c = self.class_mut(class)?;
        c.properties.insert(prop.name.clone(), prop.clone());
        Ok(prop)
    }

    /// Find a property by name on `class` or its nearest ancestor.
    pub fn find_property(&self, class: ClassId, name: &str) -> Option<&PropertyDescriptor> {
        let prop = self.chain(class).find_map(|c| c.properties.get(name))?;
        if prop.deprecated {
            warn!(property = %name, "property is deprecated");
        }
        Some(prop)
    }

    /// [`ClassRegistry::find_property`] as a `Result`.
    pub fn property(&self, class: ClassId, name: &str) -> Result<&PropertyDescriptor, ClassError> {
        self.find_property(class, name)
            .ok_or_else(|| ClassError::UnknownProperty {
                class: self
                    .get(class)
                    .map_or_else(|| class.to_string(), |c| c.name.clone()),
                property: name.to_string(),
            })
    }

    /// Attach a lifecycle function to a class.
    pub fn define_function(&mut self, class: ClassId, callback: Callback) -> Result<(), ClassError> {
        let stage = callback.stage();
        let c = self.class_mut(class)?;
        if c.callbacks.set(callback) {
            Ok(())
        } else {
            Err(ClassError::DuplicateFunction {
                class: c.name.clone(),
                stage: stage.name(),
            })
        }
    }

    /// Add a keyword to an enumeration property of `class`.
    pub fn define_enumeration_member(
        &mut self,
        class: ClassId,
        property: &str,
        keyword: &str,
        value: u32,
    ) -> Result<(), ClassError> {
        self.add_keyword(class, property, keyword, u64::from(value), PropertyType::Enumeration)
    }

    /// Add a flag keyword to a set property of `class`.
    pub fn define_set_member(
        &mut self,
        class: ClassId,
        property: &str,
        keyword: &str,
        bits: u64,
    ) -> Result<(), ClassError> {
        self.add_keyword(class, property, keyword, bits, PropertyType::Set)
    }

    fn add_keyword(
        &mut self,
        class: ClassId,
        property: &str,
        keyword: &str,
        value: u64,
        ptype: PropertyType,
    ) -> Result<(), ClassError> {
        let c = self.class_mut(class)?;
        let class_name = c.name.clone();
        let prop = c
            .properties
            .get_mut(property)
            .ok_or_else(|| ClassError::UnknownProperty {
                class: class_name.clone(),
                property: property.to_string(),
            })?;
        if prop.ptype != ptype {
            return Err(ClassError::NotKeywordProperty {
                class: class_name,
                property: property.to_string(),
            });
        }
        if prop.keyword_value(keyword).is_some() {
            return Err(ClassError::DuplicateKeyword {
                property: property.to_string(),
                keyword: keyword.to_string(),
            });
        }
        prop.keywords.push((keyword.to_string(), value));
        Ok(())
    }

    /// Profiling counters of every class with at least one sync call.
    pub fn class_profiles(&self) -> Vec<(String, ClassProfile)> {
        self.classes
            .values()
            .map(|c| (c.name.clone(), c.profile()))
            .filter(|(_, p)| p.count > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Access;

    fn registry_with_base() -> (ClassRegistry, ClassId) {
        let mut reg = ClassRegistry::new();
        let base = reg
            .register_class("node", "powerflow", 16, PassConfig::BOTTOMUP)
            .unwrap();
        reg.add_property(base, PropertyDescriptor::new("voltage", PropertyType::Double, 0))
            .unwrap();
        reg.add_property(base, PropertyDescriptor::new("phases", PropertyType::Set, 8))
            .unwrap();
        (reg, base)
    }

    #[test]
    fn duplicate_class_name_fails() {
        let (mut reg, _) = registry_with_base();
        match reg.register_class("node", "other", 8, PassConfig::NOSYNC) {
            Err(ClassError::DuplicateClass { name }) => assert_eq!(name, "node"),
            other => panic!("expected DuplicateClass, got {other:?}"),
        }
    }

    #[test]
    fn derived_class_inherits_properties() {
        let (mut reg, base) = registry_with_base();
        let meter = reg
            .register_class_with_parent("meter", "powerflow", 24, PassConfig::BOTTOMUP, base)
            .unwrap();
        reg.add_property(meter, PropertyDescriptor::new("energy", PropertyType::Double, 16))
            .unwrap();
        assert_eq!(reg.find_property(meter, "voltage").unwrap().owner, base);
        assert_eq!(reg.find_property(meter, "energy").unwrap().owner, meter);
        assert!(reg.find_property(base, "energy").is_none());
        let names: Vec<&str> = reg.chain_properties(meter).map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["energy", "voltage", "phases"]);
        assert!(reg.is_a(meter, "node"));
        assert!(!reg.is_a(base, "meter"));
    }

    #[test]
    fn shadowing_is_allowed_and_nearest_wins() {
        let (mut reg, base) = registry_with_base();
        let meter = reg
            .register_class_with_parent("meter", "powerflow", 24, PassConfig::BOTTOMUP, base)
            .unwrap();
        reg.add_property(
            meter,
            PropertyDescriptor::new("voltage", PropertyType::Double, 16).access(Access::Protected),
        )
        .unwrap();
        assert_eq!(reg.find_property(meter, "voltage").unwrap().offset, 16);
        assert_eq!(reg.find_property(base, "voltage").unwrap().offset, 0);
    }

    #[test]
    fn smaller_derived_payload_fails() {
        let (mut reg, base) = registry_with_base();
        match reg.register_class_with_parent("tiny", "m", 8, PassConfig::NOSYNC, base) {
            Err(ClassError::ParentTooLarge { size: 8, parent_size: 16, .. }) => {}
            other => panic!("expected ParentTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn property_outside_payload_fails() {
        let (mut reg, base) = registry_with_base();
        match reg.add_property(base, PropertyDescriptor::new("x", PropertyType::Double, 12)) {
            Err(ClassError::PropertyOutOfBounds { offset: 12, payload: 16, .. }) => {}
            other => panic!("expected PropertyOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    fn overlapping_bytes_are_rejected() {
        let (mut reg, base) = registry_with_base();
        let meter = reg
            .register_class_with_parent("meter", "powerflow", 32, PassConfig::BOTTOMUP, base)
            .unwrap();
        match reg.add_property(meter, PropertyDescriptor::new("energy", PropertyType::Double, 4)) {
            Err(ClassError::PropertyOverlap { class, property, existing }) => {
                assert_eq!(class, "meter");
                assert_eq!(property, "energy");
                assert_eq!(existing, "voltage");
            }
            other => panic!("expected PropertyOverlap, got {other:?}"),
        }
        reg.add_property(meter, PropertyDescriptor::new("energy", PropertyType::Double, 16))
            .unwrap();
        match reg.add_property(meter, PropertyDescriptor::new("demand", PropertyType::Int32, 20)) {
            Err(ClassError::PropertyOverlap { existing, .. }) => assert_eq!(existing, "energy"),
            other => panic!("expected PropertyOverlap, got {other:?}"),
        }
        reg.add_property(meter, PropertyDescriptor::new("demand", PropertyType::Int32, 24))
            .unwrap();
    }

    #[test]
    fn duplicate_property_fails() {
        let (mut reg, base) = registry_with_base();
        match reg.add_property(base, PropertyDescriptor::new("voltage", PropertyType::Double, 0)) {
            Err(ClassError::DuplicateProperty { .. }) => {}
            other => panic!("expected DuplicateProperty, got {other:?}"),
        }
    }

    #[test]
    fn define_function_twice_fails() {
        let (mut reg, base) = registry_with_base();
        reg.define_function(base, Callback::create(|_| Ok(()))).unwrap();
        match reg.define_function(base, Callback::create(|_| Ok(()))) {
            Err(ClassError::DuplicateFunction { stage: "create", .. }) => {}
            other => panic!("expected DuplicateFunction, got {other:?}"),
        }
    }

    #[test]
    fn set_members_only_on_set_properties() {
        let (mut reg, base) = registry_with_base();
        reg.define_set_member(base, "phases", "A", 1).unwrap();
        reg.define_set_member(base, "phases", "B", 2).unwrap();
        assert_eq!(reg.find_property(base, "phases").unwrap().keyword_value("B"), Some(2));
        match reg.define_enumeration_member(base, "voltage", "HIGH", 1) {
            Err(ClassError::NotKeywordProperty { .. }) => {}
            other => panic!("expected NotKeywordProperty, got {other:?}"),
        }
        match reg.define_set_member(base, "phases", "A", 4) {
            Err(ClassError::DuplicateKeyword { .. }) => {}
            other => panic!("expected DuplicateKeyword, got {other:?}"),
        }
    }

    #[test]
    fn profile_accumulates() {
        let (reg, base) = registry_with_base();
        let c = reg.get(base).unwrap();
        c.record_sync(Duration::from_millis(2));
        c.record_sync(Duration::from_millis(3));
        assert_eq!(c.profile().count, 2);
        assert_eq!(c.profile().clocks, Duration::from_millis(5));
        assert_eq!(reg.class_profiles().len(), 1);
    }
}

//! Object store: allocation, naming, parent links and rank propagation,
//! and external property access.
//!
//! Ids are handed out sequentially and never reused. Removal is
//! logical: the object leaves the table and the name index, and the
//! live count becomes `next_id - deleted`.

use std::sync::{Arc, PoisonError, RwLock};

use gridsync_core::{CallbackError, ClassId, ObjectError, ObjectFlags, ObjectId, Rank, Timestamp};
use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::callback::{NotifyKind, ObjectAccess, Stage};
use crate::class::ClassRegistry;
use crate::object::{ObjectBody, ObjectHeader, SimObject};
use crate::payload::Payload;
use crate::property::{PropertyDescriptor, PropertyType, PropertyValue};

/// Object store settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Log a warning instead of failing on names that break the
    /// naming convention.
    pub relax_naming_rules: bool,
    /// Seed for the per-object random seeds.
    pub seed: u64,
}

/// Header fields reachable through the by-name accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderField {
    /// `name`.
    Name,
    /// `parent`.
    Parent,
    /// `rank`.
    Rank,
    /// `clock` (read-only).
    Clock,
    /// `in_svc`.
    InSvc,
    /// `out_svc`.
    OutSvc,
    /// `latitude`.
    Latitude,
    /// `longitude`.
    Longitude,
    /// `flags`.
    Flags,
    /// `heartbeat`.
    Heartbeat,
}

impl HeaderField {
    /// Resolve a header field name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "name" => Self::Name,
            "parent" => Self::Parent,
            "rank" => Self::Rank,
            "clock" => Self::Clock,
            "in_svc" => Self::InSvc,
            "out_svc" => Self::OutSvc,
            "latitude" => Self::Latitude,
            "longitude" => Self::Longitude,
            "flags" => Self::Flags,
            "heartbeat" => Self::Heartbeat,
            _ => return None,
        })
    }

    /// Field name as accepted by [`HeaderField::from_name`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Parent => "parent",
            Self::Rank => "rank",
            Self::Clock => "clock",
            Self::InSvc => "in_svc",
            Self::OutSvc => "out_svc",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Flags => "flags",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Owns every simulation object of a run.
#[derive(Debug)]
pub struct ObjectStore {
    config: StoreConfig,
    objects: IndexMap<ObjectId, Arc<SimObject>>,
    names: RwLock<IndexMap<String, ObjectId>>,
    next_id: u32,
    deleted: u32,
    rng: ChaCha8Rng,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn type_mismatch(property: &str, expected: &'static str, value: &PropertyValue) -> ObjectError {
    ObjectError::TypeMismatch {
        property: property.to_string(),
        expected,
        found: value.type_name(),
    }
}

impl ObjectStore {
    /// An empty store.
    pub fn new(config: StoreConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            objects: IndexMap::new(),
            names: RwLock::new(IndexMap::new()),
            next_id: 0,
            deleted: 0,
            rng,
        }
    }

    /// The store settings.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ── Allocation ─────────────────────────────────────────────

    /// Create one object of `class`.
    ///
    /// Fills the header with sentinel defaults, runs every property
    /// initializer along the class chain, then the class `create`
    /// callback if there is one.
    pub fn create(
        &mut self,
        registry: &ClassRegistry,
        class: ClassId,
    ) -> Result<ObjectId, ObjectError> {
        let c = registry
            .get(class)
            .ok_or(ObjectError::UnknownClass { class })?;
        if c.passconfig().is_abstract() {
            return Err(ObjectError::AbstractClass {
                class: c.name().to_string(),
            });
        }

        let id = ObjectId(self.next_id);

        let mut payload = Payload::zeroed(c.size());
        for prop in registry.chain_properties(class) {
            payload.initialize(prop)?;
        }
        let header = ObjectHeader::new(self.rng.random());
        let mut body = ObjectBody::new(id, class, header, payload);

        if let Some(create) = &c.callbacks().create {
            create(&mut body).map_err(|e| ObjectError::CallbackFailed {
                class: c.name().to_string(),
                object: Some(id),
                stage: Stage::Create.name(),
                reason: e.to_string(),
            })?;
        }

        c.record_instance();
        self.objects.insert(id, Arc::new(SimObject::new(body)));
        self.next_id += 1;
        trace!(object = %id, class = c.name(), "object created");
        Ok(id)
    }

    /// Create `n` objects of `class`.
    pub fn create_array(
        &mut self,
        registry: &ClassRegistry,
        class: ClassId,
        n: usize,
    ) -> Result<Vec<ObjectId>, ObjectError> {
        (0..n).map(|_| self.create(registry, class)).collect()
    }

    /// Logically remove an object.
    ///
    /// The id is not reused. Objects that name it as parent keep the
    /// stale back-reference; rank propagation stops there.
    pub fn remove(&mut self, id: ObjectId) -> Result<Arc<SimObject>, ObjectError> {
        let obj = self
            .objects
            .shift_remove(&id)
            .ok_or(ObjectError::UnknownObject { object: id })?;
        if let Some(name) = obj.read().header.name.clone() {
            self.names
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .shift_remove(&name);
        }
        self.deleted += 1;
        debug!(object = %id, "object removed");
        Ok(obj)
    }

    // ── Lookup ─────────────────────────────────────────────────

    /// Number of live objects.
    pub fn count(&self) -> usize {
        (self.next_id - self.deleted) as usize
    }

    /// Id the next created object will get.
    pub fn next_id(&self) -> ObjectId {
        ObjectId(self.next_id)
    }

    /// Live object by id.
    pub fn get(&self, id: ObjectId) -> Option<&Arc<SimObject>> {
        self.objects.get(&id)
    }

    /// Live object by id, as a `Result`.
    pub fn object(&self, id: ObjectId) -> Result<&Arc<SimObject>, ObjectError> {
        self.get(id).ok_or(ObjectError::UnknownObject { object: id })
    }

    /// Live object by name.
    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Live objects in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SimObject>> {
        self.objects.values()
    }

    // ── Naming ─────────────────────────────────────────────────

    /// Register `name` for `id`, replacing any previous name.
    pub fn set_name(&self, id: ObjectId, name: &str) -> Result<(), ObjectError> {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_');
        if !valid {
            if name.is_empty() || !self.config.relax_naming_rules {
                return Err(ObjectError::InvalidName {
                    name: name.to_string(),
                });
            }
            warn!(object = %id, name, "object name should start with a letter or underscore");
        }
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&holder) = names.get(name) {
            if holder != id {
                return Err(ObjectError::NameTaken {
                    name: name.to_string(),
                    holder,
                });
            }
            return Ok(());
        }
        let obj = self.object(id)?;
        let old = obj.write().header.name.replace(name.to_string());
        if let Some(old) = old {
            names.shift_remove(&old);
        }
        names.insert(name.to_string(), id);
        Ok(())
    }

    // ── Parents and ranks ──────────────────────────────────────

    /// `id` followed by each ancestor. Fails if the chain loops.
    fn ancestry(&self, id: ObjectId) -> Result<Vec<ObjectId>, ObjectError> {
        let mut chain = vec![id];
        let mut next = self.object(id)?.read().header.parent;
        while let Some(p) = next {
            if chain.contains(&p) {
                return Err(ObjectError::ParentLoopback {
                    object: id,
                    ancestor: p,
                });
            }
            chain.push(p);
            next = self.get(p).and_then(|o| o.read().header.parent);
        }
        Ok(chain)
    }

    /// Raise `id` to `rank` and its ancestors to one more than their
    /// child, all or nothing. Every new rank must stay below the live
    /// object count.
    fn raise_rank(&self, id: ObjectId, rank: Rank) -> Result<Rank, ObjectError> {
        let limit = self.count() as u32;
        let mut plan = Vec::new();
        let mut required = rank;
        for oid in self.ancestry(id)? {
            let Some(obj) = self.get(oid) else { break };
            if obj.rank() >= required {
                break;
            }
            if required.0 > 0 && required.0 >= limit {
                return Err(ObjectError::RankOutOfRange {
                    object: oid,
                    rank: required,
                    limit,
                });
            }
            plan.push((obj, required));
            required = required.above();
        }
        for (obj, rank) in plan {
            let mut body = obj.write();
            if body.header.rank < rank {
                body.header.rank = rank;
            }
        }
        Ok(self.object(id)?.rank())
    }

    /// Raise the rank of `id` to at least `rank`, then require each
    /// ancestor to hold at least one more than its child.
    ///
    /// Ranks are never lowered. Returns the resulting rank of `id`.
    pub fn set_rank(&self, id: ObjectId, rank: Rank) -> Result<Rank, ObjectError> {
        self.raise_rank(id, rank)
    }

    /// Link `id` to `parent` and propagate ranks so the parent
    /// outranks the child. `None` clears the link.
    pub fn set_parent(
        &self,
        id: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<Rank, ObjectError> {
        let obj = self.object(id)?;
        let Some(p) = parent else {
            obj.write().header.parent = None;
            return Ok(obj.rank());
        };
        if p == id {
            return Err(ObjectError::SelfParent { object: id });
        }
        if self.ancestry(p)?.contains(&id) {
            return Err(ObjectError::ParentLoopback {
                object: id,
                ancestor: p,
            });
        }
        self.raise_rank(p, obj.rank().above())?;
        obj.write().header.parent = Some(p);
        Ok(obj.rank())
    }

    /// Record that `id` depends on `dependent` without linking them:
    /// `dependent` is ranked above `id` as though it were its parent.
    ///
    /// Returns the resulting rank of `dependent`.
    pub fn set_dependent(&self, id: ObjectId, dependent: ObjectId) -> Result<Rank, ObjectError> {
        if id == dependent {
            return Err(ObjectError::SelfParent { object: id });
        }
        if self.ancestry(dependent)?.contains(&id) {
            return Err(ObjectError::ParentLoopback {
                object: dependent,
                ancestor: id,
            });
        }
        let rank = self.object(id)?.rank();
        self.raise_rank(dependent, rank.above())
    }

    // ── External property access ───────────────────────────────

    /// Read a property or header field by name.
    ///
    /// Private properties are not readable from outside their class.
    pub fn get_value(
        &self,
        registry: &ClassRegistry,
        id: ObjectId,
        name: &str,
    ) -> Result<PropertyValue, ObjectError> {
        let obj = self.object(id)?;
        if let Some(field) = HeaderField::from_name(name) {
            return Ok(Self::header_value(&obj.read().header, field));
        }
        let prop = Self::resolve(registry, obj.class(), name)?;
        if !prop.access.externally_readable() {
            return Err(ObjectError::AccessDenied {
                property: name.to_string(),
                access: prop.access.name(),
            });
        }
        obj.read().payload.read(prop)
    }

    /// Write a property or header field by name.
    ///
    /// Only public properties are writable. Text values for
    /// enumeration and set properties are resolved through the
    /// property keywords (`A|B` for sets). The class `notify` callback
    /// sees the write before and after the value is stored, and a
    /// `recalc` property raises the object's recalculation flag. A
    /// value that does not fit the property is refused before `notify`
    /// runs.
    pub fn set_value(
        &self,
        registry: &ClassRegistry,
        id: ObjectId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), ObjectError> {
        if let Some(field) = HeaderField::from_name(name) {
            return self.set_header_field(id, field, value);
        }
        let obj = self.object(id)?;
        let class = registry
            .get(obj.class())
            .ok_or(ObjectError::UnknownClass { class: obj.class() })?;
        let prop = Self::resolve(registry, obj.class(), name)?;
        if !prop.access.externally_writable() {
            return Err(ObjectError::AccessDenied {
                property: name.to_string(),
                access: prop.access.name(),
            });
        }
        let value = Self::resolve_keywords(prop, value)?;

        let notify_failed = |e: CallbackError| ObjectError::CallbackFailed {
            class: class.name().to_string(),
            object: Some(id),
            stage: Stage::Notify.name(),
            reason: e.to_string(),
        };
        let mut body = obj.write();
        body.payload.check(prop, &value)?;
        if let Some(notify) = &class.callbacks().notify {
            notify(&mut body, NotifyKind::PreUpdate, prop).map_err(notify_failed)?;
        }
        let written = body.payload.write(prop, &value);
        if written.is_ok() && prop.recalc {
            body.header.flags.insert(ObjectFlags::RECALC);
        }
        if let Some(notify) = &class.callbacks().notify {
            notify(&mut body, NotifyKind::PostUpdate, prop).map_err(notify_failed)?;
        }
        written
    }

    fn resolve<'r>(
        registry: &'r ClassRegistry,
        class: ClassId,
        name: &str,
    ) -> Result<&'r PropertyDescriptor, ObjectError> {
        registry
            .find_property(class, name)
            .ok_or_else(|| ObjectError::UnknownProperty {
                class: registry
                    .get(class)
                    .map_or_else(|| class.to_string(), |c| c.name().to_string()),
                property: name.to_string(),
            })
    }

    fn resolve_keywords(
        prop: &PropertyDescriptor,
        value: PropertyValue,
    ) -> Result<PropertyValue, ObjectError> {
        let PropertyValue::Text(text) = &value else {
            return Ok(value);
        };
        let lookup = |kw: &str| {
            prop.keyword_value(kw.trim())
                .ok_or_else(|| ObjectError::UnknownKeyword {
                    property: prop.name.clone(),
                    keyword: kw.trim().to_string(),
                })
        };
        match prop.ptype {
            PropertyType::Enumeration => {
                let v = lookup(text.as_str())?;
                Ok(PropertyValue::Enumeration(v as u32))
            }
            PropertyType::Set => text
                .split('|')
                .filter(|kw| !kw.trim().is_empty())
                .try_fold(0u64, |acc, kw| -> Result<u64, ObjectError> {
                    Ok(acc | lookup(kw)?)
                })
                .map(PropertyValue::Set),
            _ => Ok(value),
        }
    }

    fn header_value(h: &ObjectHeader, field: HeaderField) -> PropertyValue {
        match field {
            HeaderField::Name => PropertyValue::Text(h.name.clone().unwrap_or_default()),
            HeaderField::Parent => PropertyValue::Object(h.parent),
            HeaderField::Rank => PropertyValue::Int64(i64::from(h.rank.0)),
            HeaderField::Clock => PropertyValue::Timestamp(h.clock),
            HeaderField::InSvc => PropertyValue::Timestamp(h.in_svc),
            HeaderField::OutSvc => PropertyValue::Timestamp(h.out_svc),
            HeaderField::Latitude => PropertyValue::Double(h.latitude),
            HeaderField::Longitude => PropertyValue::Double(h.longitude),
            HeaderField::Flags => PropertyValue::Set(u64::from(h.flags.bits())),
            HeaderField::Heartbeat => PropertyValue::Int64(h.heartbeat as i64),
        }
    }

    /// Write one header field.
    pub fn set_header_field(
        &self,
        id: ObjectId,
        field: HeaderField,
        value: PropertyValue,
    ) -> Result<(), ObjectError> {
        match (field, value) {
            (HeaderField::Name, PropertyValue::Text(name)) => self.set_name(id, &name),
            (HeaderField::Parent, PropertyValue::Object(parent)) => {
                self.set_parent(id, parent).map(|_| ())
            }
            (HeaderField::Rank, PropertyValue::Int64(r)) => {
                let rank = u32::try_from(r).map_err(|_| ObjectError::RankOutOfRange {
                    object: id,
                    rank: Rank(u32::MAX),
                    limit: self.count() as u32,
                })?;
                self.set_rank(id, Rank(rank)).map(|_| ())
            }
            (HeaderField::Clock, _) => Err(ObjectError::AccessDenied {
                property: "clock".to_string(),
                access: "reference",
            }),
            (field, value) => {
                let mut body = self.object(id)?.write();
                let h = &mut body.header;
                match (field, value) {
                    (HeaderField::InSvc, PropertyValue::Timestamp(t)) => h.in_svc = t,
                    (HeaderField::OutSvc, PropertyValue::Timestamp(t)) => h.out_svc = t,
                    (HeaderField::Latitude, PropertyValue::Double(v)) => h.latitude = v,
                    (HeaderField::Longitude, PropertyValue::Double(v)) => h.longitude = v,
                    (HeaderField::Flags, PropertyValue::Set(bits)) => {
                        h.flags = ObjectFlags::from_bits(bits as u32)
                    }
                    (HeaderField::Heartbeat, PropertyValue::Int64(secs)) => {
                        h.heartbeat = secs.max(0) as u64
                    }
                    (field, value) => {
                        let expected = match field {
                            HeaderField::Name => "text",
                            HeaderField::Parent => "object",
                            HeaderField::InSvc | HeaderField::OutSvc | HeaderField::Clock => {
                                "timestamp"
                            }
                            HeaderField::Latitude | HeaderField::Longitude => "double",
                            HeaderField::Flags => "set",
                            HeaderField::Rank | HeaderField::Heartbeat => "int64",
                        };
                        return Err(type_mismatch(field.name(), expected, &value));
                    }
                }
                Ok(())
            }
        }
    }

    /// Whether the object is of type `type_name`: its class or an
    /// ancestor has that name, or the class `isa` callback says so.
    pub fn isa(
        &self,
        registry: &ClassRegistry,
        id: ObjectId,
        type_name: &str,
    ) -> Result<bool, ObjectError> {
        let obj = self.object(id)?;
        if registry.is_a(obj.class(), type_name) {
            return Ok(true);
        }
        let isa = registry
            .get(obj.class())
            .and_then(|c| c.callbacks().isa.clone());
        Ok(isa.is_some_and(|f| f(&obj.read(), type_name)))
    }

    /// A callback context for `this` at `clock`.
    pub fn view<'a>(
        &'a self,
        registry: &'a ClassRegistry,
        this: ObjectId,
        clock: Timestamp,
    ) -> StoreView<'a> {
        StoreView {
            store: self,
            registry,
            this,
            clock,
        }
    }
}

/// [`ObjectAccess`] over an [`ObjectStore`] for one running callback.
pub struct StoreView<'a> {
    store: &'a ObjectStore,
    registry: &'a ClassRegistry,
    this: ObjectId,
    clock: Timestamp,
}

impl StoreView<'_> {
    fn other(&self, id: ObjectId) -> Result<&Arc<SimObject>, ObjectError> {
        if id == self.this {
            return Err(ObjectError::SelfLock { object: id });
        }
        self.store.object(id)
    }
}

impl ObjectAccess for StoreView<'_> {
    fn this(&self) -> ObjectId {
        self.this
    }

    fn clock(&self) -> Timestamp {
        self.clock
    }

    fn find(&self, name: &str) -> Option<ObjectId> {
        self.store.find_by_name(name)
    }

    fn with_object(
        &self,
        id: ObjectId,
        f: &mut dyn FnMut(&ObjectBody),
    ) -> Result<(), ObjectError> {
        f(&self.other(id)?.read());
        Ok(())
    }

    fn with_object_mut(
        &self,
        id: ObjectId,
        f: &mut dyn FnMut(&mut ObjectBody),
    ) -> Result<(), ObjectError> {
        f(&mut self.other(id)?.write());
        Ok(())
    }

    fn property(&self, id: ObjectId, name: &str) -> Result<PropertyDescriptor, ObjectError> {
        let class = self.store.object(id)?.class();
        ObjectStore::resolve(self.registry, class, name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callback;
    use crate::property::Access;
    use gridsync_core::PassConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (ClassRegistry, ObjectStore, ClassId) {
        let mut reg = ClassRegistry::new();
        let c = reg
            .register_class("load", "test", 24, PassConfig::BOTTOMUP)
            .unwrap();
        reg.add_property(
            c,
            PropertyDescriptor::new("power", PropertyType::Double, 0)
                .default_value(PropertyValue::Double(1.5))
                .recalc(),
        )
        .unwrap();
        reg.add_property(
            c,
            PropertyDescriptor::new("status", PropertyType::Enumeration, 8)
                .keyword("OFF", 0)
                .keyword("ON", 1),
        )
        .unwrap();
        reg.add_property(
            c,
            PropertyDescriptor::new("phases", PropertyType::Set, 16)
                .keyword("A", 1)
                .keyword("B", 2)
                .keyword("C", 4)
                .access(Access::Reference),
        )
        .unwrap();
        (reg, ObjectStore::default(), c)
    }

    #[test]
    fn create_runs_initializers_and_defaults() {
        let (reg, mut store, c) = setup();
        let id = store.create(&reg, c).unwrap();
        assert_eq!(id, ObjectId(0));
        assert_eq!(
            store.get_value(&reg, id, "power").unwrap(),
            PropertyValue::Double(1.5)
        );
        let obj = store.object(id).unwrap().read();
        assert_eq!(obj.header.rank, Rank::ZERO);
        assert_eq!(obj.header.out_svc, Timestamp::NEVER);
        assert!(obj.header.longitude.is_nan());
    }

    #[test]
    fn per_object_seeds_differ_and_are_reproducible() {
        let (reg, mut a, c) = setup();
        let mut b = ObjectStore::default();
        let ids = a.create_array(&reg, c, 2).unwrap();
        b.create_array(&reg, c, 2).unwrap();
        let seed = |s: &ObjectStore, id| s.object(id).unwrap().read().header.rng_seed;
        assert_ne!(seed(&a, ids[0]), seed(&a, ids[1]));
        assert_eq!(seed(&a, ids[1]), seed(&b, ids[1]));
    }

    #[test]
    fn abstract_class_cannot_be_created() {
        let mut reg = ClassRegistry::new();
        let c = reg
            .register_class("device", "test", 0, PassConfig::ABSTRACT)
            .unwrap();
        let mut store = ObjectStore::default();
        match store.create(&reg, c) {
            Err(ObjectError::AbstractClass { class }) => assert_eq!(class, "device"),
            other => panic!("expected AbstractClass, got {other:?}"),
        }
        match store.create(&reg, ClassId(9)) {
            Err(ObjectError::UnknownClass { .. }) => {}
            other => panic!("expected UnknownClass, got {other:?}"),
        }
    }

    #[test]
    fn failing_create_callback_is_reported() {
        let (mut reg, mut store, c) = setup();
        reg.define_function(
            c,
            Callback::create(|_| Err(CallbackError::failed("no memory"))),
        )
        .unwrap();
        match store.create(&reg, c) {
            Err(ObjectError::CallbackFailed { stage: "create", reason, .. }) => {
                assert_eq!(reason, "no memory")
            }
            other => panic!("expected CallbackFailed, got {other:?}"),
        }
        assert_eq!(store.count(), 0);
        assert_eq!(store.iter().count(), 0);
        assert_eq!(store.next_id(), ObjectId(0));
    }

    #[test]
    fn removal_keeps_ids_unique() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 3).unwrap();
        store.set_name(ids[1], "middle").unwrap();
        store.remove(ids[1]).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.find_by_name("middle").is_none());
        let next = store.create(&reg, c).unwrap();
        assert_eq!(next, ObjectId(3));
        assert_eq!(store.count(), 3);
        let order: Vec<ObjectId> = store.iter().map(|o| o.id()).collect();
        assert_eq!(order, vec![ObjectId(0), ObjectId(2), ObjectId(3)]);
    }

    #[test]
    fn naming_rules() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 2).unwrap();
        store.set_name(ids[0], "_feeder").unwrap();
        match store.set_name(ids[1], "_feeder") {
            Err(ObjectError::NameTaken { holder, .. }) => assert_eq!(holder, ids[0]),
            other => panic!("expected NameTaken, got {other:?}"),
        }
        match store.set_name(ids[1], "9lives") {
            Err(ObjectError::InvalidName { .. }) => {}
            other => panic!("expected InvalidName, got {other:?}"),
        }
        store.set_name(ids[0], "renamed").unwrap();
        assert_eq!(store.find_by_name("renamed"), Some(ids[0]));
        assert!(store.find_by_name("_feeder").is_none());
    }

    #[test]
    fn relaxed_naming_warns_instead() {
        let (reg, _, c) = setup();
        let mut store = ObjectStore::new(StoreConfig {
            relax_naming_rules: true,
            seed: 1,
        });
        let id = store.create(&reg, c).unwrap();
        store.set_name(id, "9lives").unwrap();
        assert_eq!(store.find_by_name("9lives"), Some(id));
    }

    #[test]
    fn parent_outranks_child_transitively() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 3).unwrap();
        store.set_parent(ids[0], Some(ids[1])).unwrap();
        store.set_parent(ids[1], Some(ids[2])).unwrap();
        let rank = |id| store.object(id).unwrap().rank();
        assert_eq!(rank(ids[0]), Rank(0));
        assert_eq!(rank(ids[1]), Rank(1));
        assert_eq!(rank(ids[2]), Rank(2));
    }

    #[test]
    fn self_parent_and_cycles_are_rejected() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 3).unwrap();
        match store.set_parent(ids[0], Some(ids[0])) {
            Err(ObjectError::SelfParent { .. }) => {}
            other => panic!("expected SelfParent, got {other:?}"),
        }
        store.set_parent(ids[0], Some(ids[1])).unwrap();
        store.set_parent(ids[1], Some(ids[2])).unwrap();
        match store.set_parent(ids[2], Some(ids[0])) {
            Err(ObjectError::ParentLoopback { object, .. }) => assert_eq!(object, ids[2]),
            other => panic!("expected ParentLoopback, got {other:?}"),
        }
        assert_eq!(store.object(ids[2]).unwrap().read().header.parent, None);
    }

    #[test]
    fn set_rank_never_lowers_and_propagates() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 4).unwrap();
        store.set_parent(ids[0], Some(ids[1])).unwrap();
        assert_eq!(store.set_rank(ids[0], Rank(2)).unwrap(), Rank(2));
        assert_eq!(store.object(ids[1]).unwrap().rank(), Rank(3));
        assert_eq!(store.set_rank(ids[0], Rank(1)).unwrap(), Rank(2));
        match store.set_rank(ids[2], Rank(4)) {
            Err(ObjectError::RankOutOfRange { limit: 4, .. }) => {}
            other => panic!("expected RankOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn dependent_is_ranked_above() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 2).unwrap();
        store.set_dependent(ids[0], ids[1]).unwrap();
        assert_eq!(store.object(ids[1]).unwrap().rank(), Rank(1));
        assert_eq!(store.object(ids[0]).unwrap().read().header.parent, None);
    }

    #[test]
    fn mutual_dependents_hit_the_rank_ceiling() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 2).unwrap();
        store.set_dependent(ids[0], ids[1]).unwrap();
        match store.set_dependent(ids[1], ids[0]) {
            Err(ObjectError::RankOutOfRange { object, limit: 2, .. }) => {
                assert_eq!(object, ids[0])
            }
            other => panic!("expected RankOutOfRange, got {other:?}"),
        }
        assert_eq!(store.object(ids[0]).unwrap().rank(), Rank(0));
        assert_eq!(store.object(ids[1]).unwrap().rank(), Rank(1));
    }

    #[test]
    fn rank_overflow_leaves_parent_unlinked() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 3).unwrap();
        store.set_parent(ids[1], Some(ids[2])).unwrap();
        store.set_rank(ids[0], Rank(2)).unwrap();
        match store.set_parent(ids[0], Some(ids[1])) {
            Err(ObjectError::RankOutOfRange { object, .. }) => assert_eq!(object, ids[1]),
            other => panic!("expected RankOutOfRange, got {other:?}"),
        }
        assert_eq!(store.object(ids[0]).unwrap().read().header.parent, None);
        assert_eq!(store.object(ids[1]).unwrap().rank(), Rank(0));
        assert_eq!(store.object(ids[2]).unwrap().rank(), Rank(1));
    }

    #[test]
    fn external_write_checks_access_and_keywords() {
        let (reg, mut store, c) = setup();
        let id = store.create(&reg, c).unwrap();
        store
            .set_value(&reg, id, "status", PropertyValue::Text("ON".into()))
            .unwrap();
        assert_eq!(
            store.get_value(&reg, id, "status").unwrap(),
            PropertyValue::Enumeration(1)
        );
        match store.set_value(&reg, id, "status", PropertyValue::Text("AUTO".into())) {
            Err(ObjectError::UnknownKeyword { .. }) => {}
            other => panic!("expected UnknownKeyword, got {other:?}"),
        }
        match store.set_value(&reg, id, "phases", PropertyValue::Text("A|C".into())) {
            Err(ObjectError::AccessDenied { access: "reference", .. }) => {}
            other => panic!("expected AccessDenied, got {other:?}"),
        }
        match store.set_value(&reg, id, "nope", PropertyValue::Double(0.0)) {
            Err(ObjectError::UnknownProperty { .. }) => {}
            other => panic!("expected UnknownProperty, got {other:?}"),
        }
    }

    #[test]
    fn recalc_property_sets_flag_and_notify_brackets_write() {
        let (mut reg, mut store, c) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        reg.define_function(
            c,
            Callback::notify(move |_, kind, prop| {
                assert_eq!(prop.name, "power");
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let expected = if n % 2 == 0 {
                    NotifyKind::PreUpdate
                } else {
                    NotifyKind::PostUpdate
                };
                assert_eq!(kind, expected);
                Ok(())
            }),
        )
        .unwrap();
        let id = store.create(&reg, c).unwrap();
        store
            .set_value(&reg, id, "power", PropertyValue::Double(3.0))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let flags = store.object(id).unwrap().read().header.flags;
        assert!(flags.contains(ObjectFlags::RECALC));
    }

    #[test]
    fn rejected_array_write_is_atomic_and_silent() {
        let (mut reg, mut store, c) = setup();
        let taps = reg
            .register_class_with_parent("regulator", "test", 40, PassConfig::BOTTOMUP, c)
            .unwrap();
        reg.add_property(
            taps,
            PropertyDescriptor::new("taps", PropertyType::Double, 24)
                .array(2)
                .default_value(PropertyValue::Double(1.0)),
        )
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        reg.define_function(
            taps,
            Callback::notify(move |_, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
        let id = store.create(&reg, taps).unwrap();
        let mixed = PropertyValue::Array(vec![PropertyValue::Double(5.0), PropertyValue::Int64(1)]);
        match store.set_value(&reg, id, "taps", mixed) {
            Err(ObjectError::TypeMismatch { expected: "double", found: "int64", .. }) => {}
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
        assert_eq!(
            store.get_value(&reg, id, "taps").unwrap(),
            PropertyValue::Array(vec![PropertyValue::Double(1.0); 2])
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn header_fields_by_name() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 2).unwrap();
        store
            .set_value(&reg, ids[0], "parent", PropertyValue::Object(Some(ids[1])))
            .unwrap();
        store
            .set_value(&reg, ids[0], "latitude", PropertyValue::Double(45.0))
            .unwrap();
        store
            .set_value(&reg, ids[0], "in_svc", PropertyValue::Timestamp(Timestamp(60)))
            .unwrap();
        assert_eq!(
            store.get_value(&reg, ids[1], "rank").unwrap(),
            PropertyValue::Int64(1)
        );
        assert_eq!(
            store.get_value(&reg, ids[0], "latitude").unwrap(),
            PropertyValue::Double(45.0)
        );
        match store.set_value(&reg, ids[0], "clock", PropertyValue::Timestamp(Timestamp(1))) {
            Err(ObjectError::AccessDenied { .. }) => {}
            other => panic!("expected AccessDenied, got {other:?}"),
        }
        match store.set_value(&reg, ids[0], "latitude", PropertyValue::Int64(1)) {
            Err(ObjectError::TypeMismatch { expected: "double", .. }) => {}
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn isa_checks_chain_then_callback() {
        let (mut reg, mut store, c) = setup();
        let meter = reg
            .register_class_with_parent("meter", "test", 24, PassConfig::BOTTOMUP, c)
            .unwrap();
        reg.define_function(meter, Callback::isa(|_, t| t == "billing_point"))
            .unwrap();
        let id = store.create(&reg, meter).unwrap();
        assert!(store.isa(&reg, id, "meter").unwrap());
        assert!(store.isa(&reg, id, "load").unwrap());
        assert!(store.isa(&reg, id, "billing_point").unwrap());
        assert!(!store.isa(&reg, id, "switch").unwrap());
    }

    #[test]
    fn view_refuses_self_lock() {
        let (reg, mut store, c) = setup();
        let ids = store.create_array(&reg, c, 2).unwrap();
        let view = store.view(&reg, ids[0], Timestamp::ZERO);
        let ctx: &dyn ObjectAccess = &view;
        match ctx.read(ids[0], |b| b.id()) {
            Err(ObjectError::SelfLock { .. }) => {}
            other => panic!("expected SelfLock, got {other:?}"),
        }
        assert_eq!(ctx.read(ids[1], |b| b.id()).unwrap(), ids[1]);
        assert_eq!(ctx.property(ids[1], "power").unwrap().offset, 0);
    }
}

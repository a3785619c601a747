//! Domain modules and the versioned registration interface they see.
//!
//! A module never touches engine internals: its [`Module::init`] gets a
//! [`ModuleApi`] scoped to the module's name, registers classes and
//! properties through it, and attaches the lifecycle functions that
//! stand in for the `<stage>_<classname>` entry points of a native
//! module.

use std::fmt;

use gridsync_core::{ClassError, ClassId, ModuleError, PassConfig};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::callback::{Callback, Stage};
use crate::class::ClassRegistry;
use crate::property::PropertyDescriptor;

/// Version of the module interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApiVersion {
    /// Incompatible changes.
    pub major: u16,
    /// Compatible additions.
    pub minor: u16,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The interface version this core exposes. Modules must match it
/// exactly.
pub const CORE_API_VERSION: ApiVersion = ApiVersion { major: 1, minor: 0 };

/// A loadable bundle of classes.
pub trait Module: Send + Sync {
    /// Unique module name.
    fn name(&self) -> &str;

    /// Interface version the module was written against.
    fn api_version(&self) -> ApiVersion {
        CORE_API_VERSION
    }

    /// Register the module's classes.
    fn init(&self, api: &mut ModuleApi<'_>) -> Result<(), ModuleError>;
}

/// Registration interface handed to [`Module::init`].
pub struct ModuleApi<'a> {
    module: String,
    registry: &'a mut ClassRegistry,
    classes: Vec<ClassId>,
}

impl ModuleApi<'_> {
    fn wrap(&self, reason: ClassError) -> ModuleError {
        ModuleError::Class {
            module: self.module.clone(),
            reason,
        }
    }

    fn owned(&self, class: ClassId) -> Result<(), ModuleError> {
        match self.registry.get(class) {
            Some(c) if !self.classes.contains(&class) => Err(ModuleError::ForeignClass {
                module: self.module.clone(),
                class: c.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Name of the module being loaded.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Register a class owned by this module.
    pub fn register_class(
        &mut self,
        name: &str,
        size: usize,
        passconfig: PassConfig,
    ) -> Result<ClassId, ModuleError> {
        let id = self
            .registry
            .register_class(name, &self.module, size, passconfig)
            .map_err(|e| self.wrap(e))?;
        self.classes.push(id);
        Ok(id)
    }

    /// Register a class that inherits from `parent`, which may belong
    /// to another module.
    pub fn register_class_with_parent(
        &mut self,
        name: &str,
        size: usize,
        passconfig: PassConfig,
        parent: ClassId,
    ) -> Result<ClassId, ModuleError> {
        let id = self
            .registry
            .register_class_with_parent(name, &self.module, size, passconfig, parent)
            .map_err(|e| self.wrap(e))?;
        self.classes.push(id);
        Ok(id)
    }

    /// Add a property to a class this module registered. Returns the
    /// registered descriptor, which callbacks use to address the payload.
    pub fn add_property(
        &mut self,
        class: ClassId,
        prop: PropertyDescriptor,
    ) -> Result<PropertyDescriptor, ModuleError> {
        self.owned(class)?;
        self.registry
            .add_property(class, prop)
            .map_err(|e| self.wrap(e))
    }

    /// Attach a lifecycle function to a class this module registered.
    pub fn define_function(&mut self, class: ClassId, callback: Callback) -> Result<(), ModuleError> {
        self.owned(class)?;
        self.registry
            .define_function(class, callback)
            .map_err(|e| self.wrap(e))
    }

    /// Add an enumeration keyword.
    pub fn define_enumeration_member(
        &mut self,
        class: ClassId,
        property: &str,
        keyword: &str,
        value: u32,
    ) -> Result<(), ModuleError> {
        self.owned(class)?;
        self.registry
            .define_enumeration_member(class, property, keyword, value)
            .map_err(|e| self.wrap(e))
    }

    /// Add a set keyword.
    pub fn define_set_member(
        &mut self,
        class: ClassId,
        property: &str,
        keyword: &str,
        bits: u64,
    ) -> Result<(), ModuleError> {
        self.owned(class)?;
        self.registry
            .define_set_member(class, property, keyword, bits)
            .map_err(|e| self.wrap(e))
    }

    /// Look up a class from any loaded module.
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.registry.find_class(name)
    }

    /// Look up a property on any registered class.
    pub fn find_property(&self, class: ClassId, name: &str) -> Option<&PropertyDescriptor> {
        self.registry.find_property(class, name)
    }
}

/// Names and versions of the loaded modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    loaded: IndexMap<String, ApiVersion>,
}

impl ModuleRegistry {
    /// No modules loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the module's version, run its initializer, and verify that
    /// every concrete class it registered has a `create` function.
    ///
    /// On failure the classes the module registered are removed again,
    /// so a corrected module can be loaded under the same name.
    /// Returns the ids of the classes the module registered.
    pub fn load(
        &mut self,
        registry: &mut ClassRegistry,
        module: &dyn Module,
    ) -> Result<Vec<ClassId>, ModuleError> {
        let name = module.name().to_string();
        if self.loaded.contains_key(&name) {
            return Err(ModuleError::DuplicateModule { module: name });
        }
        let version = module.api_version();
        if version != CORE_API_VERSION {
            return Err(ModuleError::VersionMismatch {
                module: name,
                expected: (CORE_API_VERSION.major, CORE_API_VERSION.minor),
                found: (version.major, version.minor),
            });
        }

        let mark = registry.len();
        let classes = match Self::register(registry, module, &name) {
            Ok(classes) => classes,
            Err(e) => {
                registry.truncate(mark);
                warn!(module = %name, error = %e, "module load rolled back");
                return Err(e);
            }
        };

        info!(module = %name, version = %version, classes = classes.len(), "module loaded");
        self.loaded.insert(name, version);
        Ok(classes)
    }

    fn register(
        registry: &mut ClassRegistry,
        module: &dyn Module,
        name: &str,
    ) -> Result<Vec<ClassId>, ModuleError> {
        let mut api = ModuleApi {
            module: name.to_string(),
            registry: &mut *registry,
            classes: Vec::new(),
        };
        module.init(&mut api)?;
        let classes = api.classes;

        for &id in &classes {
            let class = registry.class(id).map_err(|reason| ModuleError::Class {
                module: name.to_string(),
                reason,
            })?;
            if !class.passconfig().is_abstract() && !class.callbacks().has(Stage::Create) {
                return Err(ModuleError::MissingCreate {
                    module: name.to_string(),
                    class: class.name().to_string(),
                });
            }
            debug!(
                module = %name,
                class = class.name(),
                passes = ?class.passconfig().passes().collect::<Vec<_>>(),
                "class registered"
            );
        }
        Ok(classes)
    }

    /// Loaded module names in load order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    /// Whether a module with this name is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }
}

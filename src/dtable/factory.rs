// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Construction of table stacks by class name
//!
//! Every table class publishes a factory under a string name; a [`Params`]
//! tree naming classes can then be instantiated into a concrete stack without
//! the caller knowing any concrete type. The process-global [`registry`] is
//! populated once (built-ins by default, or a custom set installed before
//! first use) and is read-only afterwards.
//!
//! Factory flavors differ in which construction paths they support:
//!
//! - *open*: existing state only ([`DTableFactory::open`]);
//! - *read-only*: additionally built from a source cursor
//!   ([`DTableFactory::create`]), fully populated from the start;
//! - *read-write*: additionally created empty for a key type
//!   ([`DTableFactory::create_empty`]);
//! - *wrap*: no state of its own; every path resolves the wrapped class from
//!   the `base`/`base_config` params and delegates.

use crate::{
    dtable::{Cursor, DTable, Shadow},
    dtype::KeyType,
    params::ParamError,
    IStr, Params,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{Arc, OnceLock},
};

/// Named constructor for one table class
pub trait DTableFactory: Send + Sync {
    /// The class name this factory is registered under.
    fn name(&self) -> &'static str;

    /// Opens existing table state.
    fn open(&self, dir: &Path, name: &str, config: &Params) -> crate::Result<Box<dyn DTable>>;

    /// Builds a fully populated read-only table from a source cursor.
    fn create(
        &self,
        _dir: &Path,
        _name: &str,
        _config: &Params,
        _source: &mut dyn Cursor,
        _shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        Err(crate::Error::UnsupportedFactoryOp)
    }

    /// Creates an empty writable table for the given key type.
    fn create_empty(
        &self,
        _dir: &Path,
        _name: &str,
        _config: &Params,
        _key_type: KeyType,
    ) -> crate::Result<()> {
        Err(crate::Error::UnsupportedFactoryOp)
    }

    /// Whether tables of this class (under this config) support access by
    /// position.
    fn indexed_access(&self, _config: &Params) -> bool {
        false
    }
}

/// The class name → factory mapping
#[derive(Default)]
pub struct Registry {
    map: BTreeMap<IStr, Arc<dyn DTableFactory>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in table class.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::dtable::mem::MemFactory));
        registry.register(Arc::new(crate::dtable::array::ArrayFactory));
        registry.register(Arc::new(crate::bloom::BloomFactory));
        registry.register(Arc::new(crate::cache_table::CacheFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn DTableFactory>) {
        self.map.insert(IStr::new(factory.name()), factory);
    }

    #[must_use]
    pub fn lookup(&self, class: &str) -> Option<Arc<dyn DTableFactory>> {
        self.map.get(&IStr::new(class)).cloned()
    }

    /// Resolves the factory named by the string parameter `name` in `config`.
    pub fn lookup_param(&self, config: &Params, name: &str) -> crate::Result<Arc<dyn DTableFactory>> {
        let class = config.get_str(name)?;
        self.lookup(class.as_str())
            .ok_or(crate::Error::UnknownClass(class))
    }

    /// Registered class names, in order.
    pub fn class_names(&self) -> impl Iterator<Item = &IStr> {
        self.map.keys()
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-global factory registry.
///
/// Initialized with [`Registry::builtin`] on first use unless a custom
/// registry was installed beforehand.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::builtin)
}

/// Installs a custom global registry.
///
/// Fails (returning the rejected registry) once the global registry has been
/// initialized, so all configuration must happen at startup.
pub fn install_registry(registry: Registry) -> Result<(), Registry> {
    REGISTRY.set(registry)
}

/// A set of class names whose factories live outside this crate
///
/// Used to validate `class_ct`/`class_idx` references in parsed params.
#[derive(Default)]
pub struct ClassSet {
    names: BTreeSet<IStr>,
}

impl ClassSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) {
        self.names.insert(IStr::new(name));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&IStr::new(name))
    }
}

static CTABLE_CLASSES: OnceLock<ClassSet> = OnceLock::new();
static INDEX_CLASSES: OnceLock<ClassSet> = OnceLock::new();

/// Class names valid for `class_ct` params. Empty unless installed.
pub fn ctable_classes() -> &'static ClassSet {
    CTABLE_CLASSES.get_or_init(ClassSet::new)
}

/// Installs the column-table class set; fails after first use.
pub fn install_ctable_classes(set: ClassSet) -> Result<(), ClassSet> {
    CTABLE_CLASSES.set(set)
}

/// Class names valid for `class_idx` params. Empty unless installed.
pub fn index_classes() -> &'static ClassSet {
    INDEX_CLASSES.get_or_init(ClassSet::new)
}

/// Installs the index class set; fails after first use.
pub fn install_index_classes(set: ClassSet) -> Result<(), ClassSet> {
    INDEX_CLASSES.set(set)
}

/// Opens a table of the named class and runs its startup maintenance.
pub fn load(class: &str, dir: &Path, name: &str, config: &Params) -> crate::Result<Box<dyn DTable>> {
    let factory = registry()
        .lookup(class)
        .ok_or_else(|| crate::Error::UnknownClass(IStr::new(class)))?;

    let mut table = factory.open(dir, name, config)?;

    if let Err(e) = table.maintain(false) {
        log::warn!("failed to maintain {name:?} ({class}) after opening: {e}");
    }

    Ok(table)
}

/// Builds a read-only table of the named class from a source cursor.
pub fn setup(
    class: &str,
    dir: &Path,
    name: &str,
    config: &Params,
    source: &mut dyn Cursor,
    shadow: Option<&dyn Shadow>,
) -> crate::Result<()> {
    let factory = registry()
        .lookup(class)
        .ok_or_else(|| crate::Error::UnknownClass(IStr::new(class)))?;

    factory.create(dir, name, config, source, shadow)
}

/// Creates an empty writable table of the named class.
pub fn setup_empty(
    class: &str,
    dir: &Path,
    name: &str,
    config: &Params,
    key_type: KeyType,
) -> crate::Result<()> {
    let factory = registry()
        .lookup(class)
        .ok_or_else(|| crate::Error::UnknownClass(IStr::new(class)))?;

    factory.create_empty(dir, name, config, key_type)
}

/// Resolves the `base` class and `base_config` params of a wrapper config.
///
/// A missing `base_config` reads as empty params.
pub(crate) fn base_factory(config: &Params) -> crate::Result<(Arc<dyn DTableFactory>, Params)> {
    let factory = registry().lookup_param(config, "base")?;

    let base_config = match config.get_params("base_config") {
        Ok(params) => params,
        Err(ParamError::Missing) => Params::new(),
        Err(e) => return Err(e.into()),
    };

    Ok((factory, base_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn registry_builtin_classes() {
        let names = registry().class_names().cloned().collect::<Vec<_>>();

        for class in ["array", "bloom", "cache", "memory"] {
            assert!(
                names.iter().any(|n| *n == class),
                "missing class {class}, got {names:?}",
            );
        }
    }

    #[test]
    fn registry_unknown_class() {
        assert!(registry().lookup("no_such_table").is_none());

        let mut config = Params::new();
        config.set("base", "no_such_table");

        assert!(matches!(
            registry().lookup_param(&config, "base"),
            Err(crate::Error::UnknownClass(_)),
        ));
    }

    #[test]
    fn class_sets_start_empty() {
        assert!(!ctable_classes().contains("column"));
        assert!(!index_classes().contains("hash"));
    }
}

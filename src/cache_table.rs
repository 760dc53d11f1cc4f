// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The positive/negative lookup cache
//!
//! A `CacheDTable` memoizes recent point-query results (including misses and
//! tombstones) in front of any base table. Eviction is first-cached-first-out:
//! the cache is a hint, so simplicity beats hit rate here. Writes go through
//! to the base and refresh the cached entry, keeping read-after-write exact.

use crate::{
    dtable::{
        factory::{base_factory, DTableFactory},
        Cursor, DTable, Lookup, Presence, Shadow, TxId,
    },
    dtype::{BlobComparator, KeyType},
    Blob, Dtype, Params,
};
use rustc_hash::FxHashMap;
use std::{cell::RefCell, collections::VecDeque, path::Path, sync::Arc};

const DEFAULT_CACHE_SIZE: i64 = 40;

struct CacheState {
    map: FxHashMap<Dtype, Lookup>,
    order: VecDeque<Dtype>,
}

/// Caching wrapper around a base table
pub struct CacheDTable {
    base: Box<dyn DTable>,
    cache_size: usize,
    state: RefCell<CacheState>,
}

impl CacheDTable {
    /// Wraps `base`, memoizing up to `cache_size` lookup results.
    #[must_use]
    pub fn wrap(base: Box<dyn DTable>, cache_size: usize) -> Self {
        Self {
            base,
            cache_size,
            state: RefCell::new(CacheState {
                map: FxHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Opens the wrapped table at `dir/name`; the cache itself has no on-disk
    /// state. The base class is resolved from the `base`/`base_config` params.
    pub fn open(dir: &Path, name: &str, config: &Params) -> crate::Result<Self> {
        let (factory, base_config) = base_factory(config)?;
        let base = factory.open(dir, name, &base_config)?;

        #[allow(clippy::cast_sign_loss)]
        let cache_size = config.get_int_or("cache_size", DEFAULT_CACHE_SIZE)?.max(0) as usize;

        Ok(Self::wrap(base, cache_size))
    }

    /// Number of currently cached results.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.state.borrow().map.len()
    }

    fn remember(&self, key: Dtype, result: Lookup) {
        let mut state = self.state.borrow_mut();

        if let Some(entry) = state.map.get_mut(&key) {
            // refreshed in place; the key keeps its original queue position
            *entry = result;
            return;
        }

        state.map.insert(key.clone(), result);
        state.order.push_back(key);

        while state.map.len() > self.cache_size {
            #[allow(clippy::expect_used)]
            let evicted = state.order.pop_front().expect("queue covers the map");
            state.map.remove(&evicted);
        }
    }
}

impl DTable for CacheDTable {
    fn iter(&self) -> Box<dyn Cursor + '_> {
        self.base.iter()
    }

    fn key_type(&self) -> KeyType {
        self.base.key_type()
    }

    fn len(&self) -> usize {
        self.base.len()
    }

    fn lookup(&self, key: &Dtype) -> crate::Result<Lookup> {
        if let Some(hit) = self.state.borrow().map.get(key) {
            return Ok(hit.clone());
        }

        let result = self.base.lookup(key)?;
        self.remember(key.clone(), result.clone());
        Ok(result)
    }

    fn present(&self, key: &Dtype) -> crate::Result<Presence> {
        if let Some(hit) = self.state.borrow().map.get(key) {
            return Ok(hit.presence());
        }

        // a value-free probe is not cached: it would poison lookups
        self.base.present(key)
    }

    fn writable(&self) -> bool {
        self.base.writable()
    }

    fn insert(&mut self, key: Dtype, value: Option<Blob>, append: bool) -> crate::Result<()> {
        self.base.insert(key.clone(), value.clone(), append)?;
        self.remember(key, Lookup::from(value));
        Ok(())
    }

    fn remove(&mut self, key: &Dtype) -> crate::Result<()> {
        self.base.remove(key)?;
        self.remember(key.clone(), Lookup::Absent);
        Ok(())
    }

    fn maintain(&mut self, force: bool) -> crate::Result<()> {
        self.base.maintain(force)
    }

    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()> {
        self.base.set_blob_cmp(cmp)
    }

    fn blob_cmp(&self) -> Option<Arc<dyn BlobComparator>> {
        self.base.blob_cmp()
    }

    // the cache is not part of durable state, so transactions pass through

    fn create_tx(&mut self) -> crate::Result<TxId> {
        self.base.create_tx()
    }

    fn check_tx(&self, tx: TxId) -> crate::Result<()> {
        self.base.check_tx(tx)
    }

    fn commit_tx(&mut self, tx: TxId) -> crate::Result<()> {
        self.base.commit_tx(tx)
    }

    fn abort_tx(&mut self, tx: TxId) -> crate::Result<()> {
        self.base.abort_tx(tx)
    }
}

/// Factory for the `cache` class (wrap flavor)
///
/// Creation paths delegate to the wrapped class; only `open` adds the cache
/// layer on top.
pub struct CacheFactory;

impl DTableFactory for CacheFactory {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn open(&self, dir: &Path, name: &str, config: &Params) -> crate::Result<Box<dyn DTable>> {
        Ok(Box::new(CacheDTable::open(dir, name, config)?))
    }

    fn create(
        &self,
        dir: &Path,
        name: &str,
        config: &Params,
        source: &mut dyn Cursor,
        shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        let (factory, base_config) = base_factory(config)?;
        factory.create(dir, name, &base_config, source, shadow)
    }

    fn create_empty(
        &self,
        dir: &Path,
        name: &str,
        config: &Params,
        key_type: KeyType,
    ) -> crate::Result<()> {
        let (factory, base_config) = base_factory(config)?;
        factory.create_empty(dir, name, &base_config, key_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtable::mem::MemDTable;
    use test_log::test;

    fn cache_over_mem(cache_size: usize) -> CacheDTable {
        let mut base = MemDTable::new(KeyType::Str);
        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            base.insert(key.into(), Some(Blob::from(value)), false)
                .unwrap();
        }
        CacheDTable::wrap(Box::new(base), cache_size)
    }

    #[test]
    fn cache_fifo_eviction() -> crate::Result<()> {
        let cache = cache_over_mem(2);

        cache.lookup(&"a".into())?;
        cache.lookup(&"b".into())?;
        cache.lookup(&"c".into())?;

        // a was cached first, so it is the one evicted
        let state = cache.state.borrow();
        assert!(!state.map.contains_key(&"a".into()));
        assert!(state.map.contains_key(&"b".into()));
        assert!(state.map.contains_key(&"c".into()));
        drop(state);

        assert_eq!(2, cache.cached());

        // and c is still served from the cache
        assert_eq!(Lookup::Value(Blob::from("3")), cache.lookup(&"c".into())?);

        Ok(())
    }

    #[test]
    fn cache_size_is_never_exceeded() -> crate::Result<()> {
        let cache = cache_over_mem(2);

        for key in ["a", "b", "c", "nope", "also-nope", "a", "b"] {
            cache.lookup(&key.into())?;
            assert!(cache.cached() <= 2);
        }

        Ok(())
    }

    #[test]
    fn cache_negative_results() -> crate::Result<()> {
        let cache = cache_over_mem(4);

        assert_eq!(Lookup::Absent, cache.lookup(&"ghost".into())?);

        // the miss itself is cached
        assert!(cache
            .state
            .borrow()
            .map
            .contains_key(&"ghost".into()));
        assert_eq!(Lookup::Absent, cache.lookup(&"ghost".into())?);

        Ok(())
    }

    #[test]
    fn cache_read_after_write() -> crate::Result<()> {
        let mut cache = cache_over_mem(4);

        // warm the cache with the old value
        assert_eq!(Lookup::Value(Blob::from("1")), cache.lookup(&"a".into())?);

        cache.insert("a".into(), Some(Blob::from("updated")), false)?;
        assert_eq!(
            Lookup::Value(Blob::from("updated")),
            cache.lookup(&"a".into())?,
        );

        cache.remove(&"a".into())?;
        assert_eq!(Lookup::Absent, cache.lookup(&"a".into())?);

        cache.insert("t".into(), None, false)?;
        assert_eq!(Lookup::Tombstone, cache.lookup(&"t".into())?);

        Ok(())
    }

    #[test]
    fn cache_zero_capacity() -> crate::Result<()> {
        let cache = cache_over_mem(0);

        assert_eq!(Lookup::Value(Blob::from("1")), cache.lookup(&"a".into())?);
        assert_eq!(0, cache.cached());

        Ok(())
    }
}

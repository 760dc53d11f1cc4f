// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The negative-lookup accelerator
//!
//! A `BloomDTable` sits in front of an immutable base table and answers
//! definitely-absent point queries without touching the base. The filter is
//! sized once at creation from the base's entry count and the configured
//! false positive rate, and persisted next to the base.

mod bit_array;
mod filter;

pub use filter::{BloomFilter, Builder, BLOOM_MAGIC, BLOOM_VERSION};

use crate::{
    coding::Encode,
    dtable::{
        factory::{base_factory, DTableFactory},
        Cursor, DTable, Lookup, Presence, Shadow,
    },
    dtype::{BlobComparator, KeyType},
    file::write_atomic,
    Blob, Dtype, Params,
};
use std::{fs::File, path::Path, sync::Arc};

const FILTER_FILE: &str = "bloom";
const BASE_NAME: &str = "base";
const DEFAULT_FP_RATE: f64 = 0.01;

/// Bloom-filtered wrapper around an immutable base table
pub struct BloomDTable {
    base: Box<dyn DTable>,
    filter: BloomFilter,
}

impl BloomDTable {
    /// Opens the table directory `dir/name` (base table plus filter file).
    ///
    /// The base class is resolved from the `base`/`base_config` params.
    pub fn open(dir: &Path, name: &str, config: &Params) -> crate::Result<Self> {
        let home = dir.join(name);

        let (factory, base_config) = base_factory(config)?;
        let base = factory.open(&home, BASE_NAME, &base_config)?;

        let mut file = File::open(home.join(FILTER_FILE))?;
        let filter = BloomFilter::decode_from(&mut file)?;

        Ok(Self { base, filter })
    }

    /// Creates the base table from `source`, then builds and persists the
    /// filter over the base's keys.
    pub fn create(
        dir: &Path,
        name: &str,
        config: &Params,
        source: &mut dyn Cursor,
        shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        let home = dir.join(name);
        std::fs::create_dir_all(&home)?;

        let (factory, base_config) = base_factory(config)?;
        factory.create(&home, BASE_NAME, &base_config, source, shadow)?;

        let base = factory.open(&home, BASE_NAME, &base_config)?;
        let fp_rate = config.get_float_or("fp_rate", DEFAULT_FP_RATE)?;

        let mut builder = Builder::with_fp_rate(base.len(), fp_rate);

        let mut keys = base.iter();
        let mut count = 0_usize;
        while keys.valid() {
            builder.set(&keys.key().flatten());
            count += 1;
            keys.next()?;
        }

        write_atomic(
            &home.join(FILTER_FILE),
            &builder.build().encode_into_vec(),
        )?;

        log::debug!("wrote bloom filter for {name:?}: {count} keys at fp rate {fp_rate}");
        Ok(())
    }

    /// Wraps an already constructed base, building the filter in memory.
    pub fn with_base(base: Box<dyn DTable>, fp_rate: f64) -> crate::Result<Self> {
        let mut builder = Builder::with_fp_rate(base.len(), fp_rate);

        let mut keys = base.iter();
        while keys.valid() {
            builder.set(&keys.key().flatten());
            keys.next()?;
        }
        drop(keys);

        Ok(Self {
            base,
            filter: builder.build(),
        })
    }

    fn may_contain(&self, key: &Dtype) -> bool {
        self.filter.contains(&key.flatten())
    }
}

impl DTable for BloomDTable {
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
        if !self.may_contain(key) {
            return Ok(Lookup::Absent);
        }
        self.base.lookup(key)
    }

    fn present(&self, key: &Dtype) -> crate::Result<Presence> {
        if !self.may_contain(key) {
            return Ok(Presence::Absent);
        }
        self.base.present(key)
    }

    fn maintain(&mut self, force: bool) -> crate::Result<()> {
        self.base.maintain(force)
    }

    fn supports_indexed_access(&self) -> bool {
        self.base.supports_indexed_access()
    }

    fn index(&self, index: usize) -> crate::Result<Option<Blob>> {
        self.base.index(index)
    }

    fn contains_index(&self, index: usize) -> crate::Result<bool> {
        self.base.contains_index(index)
    }

    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()> {
        self.base.set_blob_cmp(cmp)
    }

    fn blob_cmp(&self) -> Option<Arc<dyn BlobComparator>> {
        self.base.blob_cmp()
    }
}

/// Factory for the `bloom` class (read-only flavor)
pub struct BloomFactory;

impl DTableFactory for BloomFactory {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn open(&self, dir: &Path, name: &str, config: &Params) -> crate::Result<Box<dyn DTable>> {
        Ok(Box::new(BloomDTable::open(dir, name, config)?))
    }

    fn create(
        &self,
        dir: &Path,
        name: &str,
        config: &Params,
        source: &mut dyn Cursor,
        shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        BloomDTable::create(dir, name, config, source, shadow)
    }

    /// Indexed access is supported if the base supports it.
    fn indexed_access(&self, config: &Params) -> bool {
        base_factory(config)
            .map(|(factory, base_config)| factory.indexed_access(&base_config))
            .unwrap_or(false)
    }
}

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The common table abstraction
//!
//! A dtable is an ordered mapping from typed keys to optional blob values,
//! where an *absent* value (a tombstone) is a real entry that shadows older
//! values in layered stacks. Leaf tables own data; wrapper tables own a base
//! table and add behavior (filtering, caching, merging). Wrappers and leaves
//! share one iterator-and-lookup contract, so they compose freely.

pub mod array;
pub mod factory;
pub mod mem;

use crate::{
    dtype::{BlobComparator, KeyType},
    Blob, Dtype, IStr,
};
use std::{cmp::Ordering, sync::Arc};

/// Result of a point query against a table
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// No entry under this key
    Absent,

    /// An entry exists but marks a deletion
    Tombstone,

    /// An entry exists with a value
    Value(Blob),
}

impl Lookup {
    /// Whether an entry (value or tombstone) exists.
    #[must_use]
    pub fn found(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Whether the entry carries a value.
    #[must_use]
    pub fn exists(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn into_value(self) -> Option<Blob> {
        match self {
            Self::Value(blob) => Some(blob),
            _ => None,
        }
    }

    #[must_use]
    pub fn presence(&self) -> Presence {
        match self {
            Self::Absent => Presence::Absent,
            Self::Tombstone => Presence::Tombstone,
            Self::Value(_) => Presence::Present,
        }
    }
}

impl From<Option<Blob>> for Lookup {
    /// An *entry's* value: `None` is a tombstone, not a missing entry.
    fn from(value: Option<Blob>) -> Self {
        match value {
            Some(blob) => Self::Value(blob),
            None => Self::Tombstone,
        }
    }
}

/// Value-free flavor of [`Lookup`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Tombstone,
    Present,
}

impl Presence {
    #[must_use]
    pub fn found(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Value size and existence, without the payload
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValueMeta {
    pub len: usize,
    pub exists: bool,
}

impl From<&Option<Blob>> for ValueMeta {
    fn from(value: &Option<Blob>) -> Self {
        Self {
            len: value.as_ref().map_or(0, |b| b.len()),
            exists: value.is_some(),
        }
    }
}

/// Handle for an abortable transaction on a table that supports them
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxId(pub u64);

/// Shadow set consulted when building read-only tables
///
/// Tombstones from the source are preserved only for keys the shadow
/// contains; other tombstones have nothing left to shadow and are dropped.
pub trait Shadow {
    fn contains(&self, key: &Dtype) -> bool;
}

/// Uses any table's key set as a shadow.
pub struct TableShadow<'a>(pub &'a dyn DTable);

impl Shadow for TableShadow<'_> {
    fn contains(&self, key: &Dtype) -> bool {
        match self.0.present(key) {
            Ok(presence) => presence.found(),
            Err(e) => {
                log::warn!("shadow probe failed, treating key as uncovered: {e}");
                false
            }
        }
    }
}

/// An ordered key → optional-blob table
pub trait DTable {
    /// Opens a cursor positioned at the first entry.
    fn iter(&self) -> Box<dyn Cursor + '_>;

    fn key_type(&self) -> KeyType;

    /// Number of entries, tombstones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point query; a found entry may be a tombstone.
    fn lookup(&self, key: &Dtype) -> crate::Result<Lookup>;

    /// Like [`DTable::lookup`], without materializing the value.
    fn present(&self, key: &Dtype) -> crate::Result<Presence> {
        Ok(self.lookup(key)?.presence())
    }

    fn writable(&self) -> bool {
        false
    }

    /// Stores an entry; `value: None` writes a tombstone. `append` hints that
    /// the key sorts after every existing key.
    fn insert(&mut self, _key: Dtype, _value: Option<Blob>, _append: bool) -> crate::Result<()> {
        Err(crate::Error::ReadOnlyTable)
    }

    /// Deletes the entry outright. To *shadow* older layers, insert a
    /// tombstone instead.
    fn remove(&mut self, _key: &Dtype) -> crate::Result<()> {
        Err(crate::Error::ReadOnlyTable)
    }

    /// Housekeeping pass; a no-op for most tables.
    fn maintain(&mut self, _force: bool) -> crate::Result<()> {
        Ok(())
    }

    /// Whether entries can be fetched by position.
    fn supports_indexed_access(&self) -> bool {
        false
    }

    /// Fetches the value of the entry at position `index`.
    fn index(&self, _index: usize) -> crate::Result<Option<Blob>> {
        Err(crate::Error::NoIndexedAccess)
    }

    /// Whether the entry at position `index` carries a value.
    fn contains_index(&self, _index: usize) -> crate::Result<bool> {
        Err(crate::Error::NoIndexedAccess)
    }

    /// Installs a comparator for blob-typed keys.
    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()>;

    fn blob_cmp(&self) -> Option<Arc<dyn BlobComparator>>;

    /// Name of the installed comparator, for persistence.
    fn cmp_name(&self) -> IStr {
        self.blob_cmp()
            .map_or_else(IStr::null, |cmp| IStr::new(cmp.name()))
    }

    // Abortable transactions are delegated down wrapper chains; only tables
    // with journal-backed state implement them.

    fn create_tx(&mut self) -> crate::Result<TxId> {
        Err(crate::Error::NoAbortableTx)
    }

    fn check_tx(&self, _tx: TxId) -> crate::Result<()> {
        Err(crate::Error::NoAbortableTx)
    }

    fn commit_tx(&mut self, _tx: TxId) -> crate::Result<()> {
        Err(crate::Error::NoAbortableTx)
    }

    fn abort_tx(&mut self, _tx: TxId) -> crate::Result<()> {
        Err(crate::Error::NoAbortableTx)
    }
}

/// A bidirectional, seekable cursor over a table's live entries
///
/// Cursors borrow their table and observe a fixed snapshot (the borrow
/// prevents mutation while the cursor lives). Position conventions:
///
/// - a fresh cursor sits at the first entry (invalid if the table is empty);
/// - `next` past the last entry parks the cursor invalid at the end, from
///   where `prev` steps back onto the last entry;
/// - `prev` at the first entry returns `false` and stays put.
pub trait Cursor {
    fn valid(&self) -> bool;

    fn next(&mut self) -> crate::Result<bool>;

    fn prev(&mut self) -> crate::Result<bool>;

    /// Repositions at the first entry.
    fn first(&mut self) -> crate::Result<bool>;

    /// Repositions at the last entry.
    fn last(&mut self) -> crate::Result<bool>;

    /// Current key.
    ///
    /// # Panics
    ///
    /// May panic if the cursor is not valid.
    fn key(&self) -> Dtype;

    /// Current value; `None` is a tombstone.
    fn value(&self) -> crate::Result<Option<Blob>>;

    /// Current value size and existence.
    fn meta(&self) -> crate::Result<ValueMeta> {
        Ok(ValueMeta::from(&self.value()?))
    }

    /// Positions at the first entry with key `>= key`; returns whether an
    /// exact match was found.
    fn seek(&mut self, key: &Dtype) -> crate::Result<bool>;

    /// Like [`Cursor::seek`], but against a comparison function: `test(k)`
    /// reports how `k` orders relative to the target.
    fn seek_by(&mut self, test: &dyn Fn(&Dtype) -> Ordering) -> crate::Result<bool>;

    fn key_type(&self) -> KeyType;

    /// The leaf table this cursor's current entry originates from.
    fn source(&self) -> &dyn DTable;

    /// Compaction hook: asks the source to stand in a replacement for a value
    /// the consumer cannot store. `None` means the rejection is not handled.
    fn reject(&mut self) -> Option<Option<Blob>> {
        None
    }
}

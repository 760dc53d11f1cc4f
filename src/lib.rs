// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Core read path of a log-structured key/value table engine.
//!
//! ##### About
//!
//! This crate provides the layered *dtable* model: immutable on-disk tables
//! and in-memory overlays that compose into a read-and-update pipeline. It is
//! a storage engine core, not a full database: schema layers, journaling and
//! transaction management live above it.
//!
//! The pieces, bottom up:
//!
//! - [`Blob`] / [`BlobBuffer`]: the reference-counted byte substrate backing
//!   every key, value and page, with copy-on-write mutation
//! - [`IStr`]: shared immutable strings for identifiers
//! - [`Params`]: typed configuration trees with a small textual grammar,
//!   instantiated into table stacks through the factory registry
//! - [`IndexBlob`]: a packed array of optional sub-blobs over one backing blob
//! - [`StringTable`]: sorted, prefix-compressed on-disk dictionaries
//! - [`DTable`] and [`Cursor`]: the common table/iterator contract
//! - [`OverlayDTable`]: the ranked union with shadowing semantics
//! - [`BloomDTable`] and [`CacheDTable`]: negative- and positive-lookup
//!   accelerators
//!
//! # Example usage
//!
//! ```
//! use dtable::{Cursor, DTable, Dtype, KeyType, MemDTable, OverlayDTable};
//!
//! // a writable layer over an older snapshot
//! let mut newer = MemDTable::new(KeyType::Str);
//! newer.insert("deleted".into(), None, false)?;
//!
//! let mut older = MemDTable::new(KeyType::Str);
//! older.insert("deleted".into(), Some("payload".into()), false)?;
//! older.insert("kept".into(), Some("value".into()), false)?;
//!
//! let overlay = OverlayDTable::new(vec![Box::new(newer), Box::new(older)])?;
//!
//! // the newer tombstone shadows the older value
//! assert!(!overlay.lookup(&"deleted".into())?.exists());
//! assert!(overlay.lookup(&"kept".into())?.exists());
//!
//! // ordered traversal over the merged view
//! let mut cursor = overlay.iter();
//! while cursor.valid() {
//!     let _entry = (cursor.key(), cursor.value()?);
//!     cursor.next()?;
//! }
//! #
//! # Ok::<(), dtable::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(missing_docs)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

mod binary_search;
mod blob;
mod blob_buffer;

#[doc(hidden)]
pub mod bloom;

mod cache_table;

#[doc(hidden)]
pub mod coding;

mod dtable;
mod dtype;
mod error;

#[doc(hidden)]
pub mod file;

mod hash;
mod index_blob;
mod istr;
mod overlay;
mod params;
mod string_table;

pub use dtable::factory;

pub use {
    blob::Blob,
    blob_buffer::BlobBuffer,
    bloom::BloomDTable,
    cache_table::CacheDTable,
    dtable::{
        array::ArrayDTable, mem::MemDTable, Cursor, DTable, Lookup, Presence, Shadow,
        TableShadow, TxId, ValueMeta,
    },
    dtype::{BlobComparator, Dtype, KeyType},
    error::{Error, Result},
    index_blob::IndexBlob,
    istr::IStr,
    overlay::OverlayDTable,
    params::{Param, ParamError, Params, ParseError},
    string_table::{StringTable, ST_LRU},
};

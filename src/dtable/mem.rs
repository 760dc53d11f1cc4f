// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The writable in-memory leaf table
//!
//! A `MemDTable` is the mutable top layer of a table stack: inserts and
//! tombstones land here until the table is drained into an immutable leaf.
//! Entries live in a sorted vector ordered under the table's comparator; the
//! engine runs single-threaded per client, so no concurrent structure is
//! needed.

use crate::{
    coding::DecodeError,
    dtable::{factory::DTableFactory, Cursor, DTable, Lookup},
    dtype::{BlobComparator, KeyType},
    file::{read_blob_at, write_atomic},
    Blob, Dtype, Params,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{cmp::Ordering, fs::File, path::Path, sync::Arc};

const MEM_MAGIC: u32 = 0x1138_5A9C;
const MEM_VERSION: u32 = 0;

/// Writable in-memory table
pub struct MemDTable {
    key_type: KeyType,
    entries: Vec<(Dtype, Option<Blob>)>,
    blob_cmp: Option<Arc<dyn BlobComparator>>,
}

impl MemDTable {
    #[must_use]
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            entries: Vec::new(),
            blob_cmp: None,
        }
    }

    fn compare(&self, a: &Dtype, b: &Dtype) -> Ordering {
        a.compare(b, self.blob_cmp.as_deref())
    }

    /// `Ok(i)`: entry at `i` holds the key; `Err(i)`: insertion point.
    fn locate(&self, key: &Dtype) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| self.compare(probe, key))
    }
}

impl DTable for MemDTable {
    fn iter(&self) -> Box<dyn Cursor + '_> {
        Box::new(MemCursor {
            table: self,
            pos: if self.entries.is_empty() {
                Pos::End
            } else {
                Pos::At(0)
            },
        })
    }

    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, key: &Dtype) -> crate::Result<Lookup> {
        Ok(match self.locate(key) {
            #[allow(clippy::indexing_slicing)]
            Ok(i) => Lookup::from(self.entries[i].1.clone()),
            Err(_) => Lookup::Absent,
        })
    }

    fn writable(&self) -> bool {
        true
    }

    fn insert(&mut self, key: Dtype, value: Option<Blob>, append: bool) -> crate::Result<()> {
        debug_assert_eq!(self.key_type, key.key_type(), "inserting key of wrong type");

        if append {
            let sorts_last = self
                .entries
                .last()
                .is_none_or(|(last, _)| self.compare(last, &key) == Ordering::Less);

            if sorts_last {
                self.entries.push((key, value));
                return Ok(());
            }
        }

        match self.locate(&key) {
            #[allow(clippy::indexing_slicing)]
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (key, value)),
        }

        Ok(())
    }

    fn remove(&mut self, key: &Dtype) -> crate::Result<()> {
        if let Ok(i) = self.locate(key) {
            self.entries.remove(i);
        }
        Ok(())
    }

    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()> {
        self.blob_cmp = Some(cmp);

        if self.key_type == KeyType::Blob && self.entries.len() > 1 {
            let cmp = self.blob_cmp.clone();
            self.entries
                .sort_by(|(a, _), (b, _)| a.compare(b, cmp.as_deref()));
        }

        Ok(())
    }

    fn blob_cmp(&self) -> Option<Arc<dyn BlobComparator>> {
        self.blob_cmp.clone()
    }
}

enum Pos {
    At(usize),
    End,
}

struct MemCursor<'a> {
    table: &'a MemDTable,
    pos: Pos,
}

impl MemCursor<'_> {
    fn entry(&self) -> &(Dtype, Option<Blob>) {
        match self.pos {
            #[allow(clippy::indexing_slicing)]
            Pos::At(i) => &self.table.entries[i],
            Pos::End => panic!("cursor is not valid"),
        }
    }

    fn land(&mut self, i: usize) -> bool {
        if i < self.table.entries.len() {
            self.pos = Pos::At(i);
            true
        } else {
            self.pos = Pos::End;
            false
        }
    }
}

impl Cursor for MemCursor<'_> {
    fn valid(&self) -> bool {
        matches!(self.pos, Pos::At(_))
    }

    fn next(&mut self) -> crate::Result<bool> {
        Ok(match self.pos {
            Pos::At(i) => self.land(i + 1),
            Pos::End => false,
        })
    }

    fn prev(&mut self) -> crate::Result<bool> {
        Ok(match self.pos {
            // stays on the first entry
            Pos::At(0) => false,
            Pos::At(i) => self.land(i - 1),
            Pos::End => {
                let len = self.table.entries.len();
                len > 0 && self.land(len - 1)
            }
        })
    }

    fn first(&mut self) -> crate::Result<bool> {
        Ok(self.land(0))
    }

    fn last(&mut self) -> crate::Result<bool> {
        let len = self.table.entries.len();
        Ok(len > 0 && self.land(len - 1))
    }

    fn key(&self) -> Dtype {
        self.entry().0.clone()
    }

    fn value(&self) -> crate::Result<Option<Blob>> {
        Ok(self.entry().1.clone())
    }

    fn seek(&mut self, key: &Dtype) -> crate::Result<bool> {
        match self.table.locate(key) {
            Ok(i) => {
                self.pos = Pos::At(i);
                Ok(true)
            }
            Err(i) => {
                self.land(i);
                Ok(false)
            }
        }
    }

    fn seek_by(&mut self, test: &dyn Fn(&Dtype) -> Ordering) -> crate::Result<bool> {
        let i = crate::binary_search::partition_point(&self.table.entries, |(probe, _)| {
            test(probe) == Ordering::Less
        });

        let exact = self.land(i) && test(&self.entry().0) == Ordering::Equal;
        Ok(exact)
    }

    fn key_type(&self) -> KeyType {
        self.table.key_type
    }

    fn source(&self) -> &dyn DTable {
        self.table
    }
}

/// Factory for the `memory` class (read-write flavor)
///
/// The only on-disk state is a marker recording the key type, so an empty
/// table of the right shape comes back on open.
pub struct MemFactory;

impl DTableFactory for MemFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, dir: &Path, name: &str, _config: &Params) -> crate::Result<Box<dyn DTable>> {
        let file = File::open(dir.join(name))?;
        let header = read_blob_at(&file, 0, 9)?;
        let mut reader = &header[..];

        if reader.read_u32::<LittleEndian>()? != MEM_MAGIC {
            return Err(DecodeError::InvalidHeader("bad memory table magic").into());
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != MEM_VERSION {
            return Err(crate::Error::InvalidVersion(version));
        }

        let tag = reader.read_u8()?;
        let key_type =
            KeyType::try_from(tag).map_err(|()| DecodeError::InvalidTag(("key type", tag)))?;

        Ok(Box::new(MemDTable::new(key_type)))
    }

    fn create_empty(
        &self,
        dir: &Path,
        name: &str,
        _config: &Params,
        key_type: KeyType,
    ) -> crate::Result<()> {
        let mut marker = Vec::with_capacity(9);
        marker.extend_from_slice(&MEM_MAGIC.to_le_bytes());
        marker.extend_from_slice(&MEM_VERSION.to_le_bytes());
        marker.push(u8::from(key_type));

        write_atomic(&dir.join(name), &marker)?;
        Ok(())
    }
}

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The immutable on-disk leaf table
//!
//! An `ArrayDTable` file holds one sorted run of entries: a key section
//! (fixed-width numerics, or a [`StringTable`] for string/blob keys) followed
//! by a flattened [`IndexBlob`] holding the values, with tombstones stored as
//! absent slots. Entries are addressable by position, which is what makes
//! this the leaf of choice under wrappers that delegate indexed access.
//!
//! File layout (little-endian):
//!
//! ```text
//! u32 magic | u32 version | u8 key_type | u8 pad[3] | u32 count | u32 key_len | u32 value_len
//! key section
//! value section (flattened index blob)
//! ```

use crate::{
    binary_search::{partition_point, partition_point_fallible},
    coding::DecodeError,
    dtable::{factory::DTableFactory, Cursor, DTable, Lookup, Shadow},
    dtype::{BlobComparator, KeyType},
    file::{read_blob_at, write_atomic},
    Blob, Dtype, IndexBlob, IStr, Params, StringTable,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{cell::RefCell, cmp::Ordering, fs::File, path::Path, sync::Arc};

const ARRAY_MAGIC: u32 = 0x1138_D7B1;
const ARRAY_VERSION: u32 = 0;
const HEADER_LEN: usize = 24;

enum Keys {
    UInt32(Vec<u32>),
    Double(Vec<f64>),
    Table(StringTable),
}

/// Immutable on-disk table with indexed access
pub struct ArrayDTable {
    key_type: KeyType,
    count: usize,
    keys: Keys,
    values: RefCell<IndexBlob>,
    blob_cmp: Option<Arc<dyn BlobComparator>>,
}

impl ArrayDTable {
    /// Opens the table file `dir/name`.
    pub fn open(dir: &Path, name: &str) -> crate::Result<Self> {
        let file = Arc::new(File::open(dir.join(name))?);
        let header = read_blob_at(&file, 0, HEADER_LEN)?;
        let mut reader = &header[..];

        if reader.read_u32::<LittleEndian>()? != ARRAY_MAGIC {
            return Err(DecodeError::InvalidHeader("bad array table magic").into());
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != ARRAY_VERSION {
            return Err(crate::Error::InvalidVersion(version));
        }

        let tag = reader.read_u8()?;
        let key_type =
            KeyType::try_from(tag).map_err(|()| DecodeError::InvalidTag(("key type", tag)))?;

        let mut pad = [0; 3];
        std::io::Read::read_exact(&mut reader, &mut pad)?;

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let key_len = reader.read_u32::<LittleEndian>()? as usize;
        let value_len = reader.read_u32::<LittleEndian>()? as usize;

        let keys = match key_type {
            KeyType::UInt32 => {
                let bytes = read_blob_at(&file, HEADER_LEN as u64, key_len)?;
                if bytes.len() != count * 4 {
                    return Err(DecodeError::InvalidHeader("key section size mismatch").into());
                }

                let mut section = &bytes[..];
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(section.read_u32::<LittleEndian>()?);
                }
                Keys::UInt32(keys)
            }
            KeyType::Double => {
                let bytes = read_blob_at(&file, HEADER_LEN as u64, key_len)?;
                if bytes.len() != count * 8 {
                    return Err(DecodeError::InvalidHeader("key section size mismatch").into());
                }

                let mut section = &bytes[..];
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(f64::from_bits(section.read_u64::<LittleEndian>()?));
                }
                Keys::Double(keys)
            }
            KeyType::Str | KeyType::Blob => {
                let table = StringTable::init(file.clone(), HEADER_LEN as u64)?;
                if table.len() != count {
                    return Err(DecodeError::InvalidHeader("key section count mismatch").into());
                }
                Keys::Table(table)
            }
        };

        let value_blob = read_blob_at(&file, (HEADER_LEN + key_len) as u64, value_len)?;
        let values = IndexBlob::from_blob(value_blob, count)?;

        Ok(Self {
            key_type,
            count,
            keys,
            values: RefCell::new(values),
            blob_cmp: None,
        })
    }

    /// Drains `source` into a new table file `dir/name`.
    ///
    /// The source cursor must yield keys in ascending order. Tombstones are
    /// kept only for keys the shadow covers.
    pub fn create(
        dir: &Path,
        name: &str,
        source: &mut dyn Cursor,
        shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        let key_type = source.key_type();

        let mut keys = Vec::new();
        let mut values = Vec::new();

        source.first()?;
        while source.valid() {
            let key = source.key();
            let value = source.value()?;

            // a tombstone with nothing to shadow carries no information
            if value.is_some() || shadow.is_some_and(|s| s.contains(&key)) {
                keys.push(key);
                values.push(value);
            }

            source.next()?;
        }

        let count = keys.len();
        let key_section = encode_keys(key_type, &keys)?;

        let mut index = IndexBlob::new(count);
        for (i, value) in values.into_iter().enumerate() {
            index.set(i, value);
        }
        let value_section = index.flatten();

        let mut bytes =
            Vec::with_capacity(HEADER_LEN + key_section.len() + value_section.len());
        bytes.extend_from_slice(&ARRAY_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&ARRAY_VERSION.to_le_bytes());
        bytes.push(u8::from(key_type));
        bytes.extend_from_slice(&[0, 0, 0]);

        #[allow(clippy::cast_possible_truncation)]
        {
            bytes.extend_from_slice(&(count as u32).to_le_bytes());
            bytes.extend_from_slice(&(key_section.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&(value_section.len() as u32).to_le_bytes());
        }

        bytes.extend_from_slice(&key_section);
        bytes.extend_from_slice(&value_section);

        write_atomic(&dir.join(name), &bytes)?;

        log::debug!("wrote array table {name:?}: {count} entries, {} bytes", bytes.len());
        Ok(())
    }

    fn key_at(&self, index: usize) -> crate::Result<Dtype> {
        Ok(match &self.keys {
            #[allow(clippy::indexing_slicing)]
            Keys::UInt32(keys) => Dtype::UInt32(keys[index]),
            #[allow(clippy::indexing_slicing)]
            Keys::Double(keys) => Dtype::Double(keys[index]),
            Keys::Table(table) => {
                let blob = table.get(index)?;
                if self.key_type == KeyType::Str {
                    let s = std::str::from_utf8(&blob).map_err(DecodeError::Utf8)?;
                    Dtype::Str(IStr::new(s))
                } else {
                    Dtype::Blob(blob)
                }
            }
        })
    }

    /// Position of the first key `>= key`, plus whether it is an exact match.
    fn lower_bound(&self, key: &Dtype) -> crate::Result<(usize, bool)> {
        match (&self.keys, key) {
            (Keys::UInt32(keys), Dtype::UInt32(key)) => {
                let i = partition_point(keys, |probe| probe < key);
                Ok((i, keys.get(i) == Some(key)))
            }
            (Keys::Double(keys), Dtype::Double(key)) => {
                let i = partition_point(keys, |probe| probe.total_cmp(key) == Ordering::Less);
                let exact = keys
                    .get(i)
                    .is_some_and(|probe| probe.total_cmp(key) == Ordering::Equal);
                Ok((i, exact))
            }
            (Keys::Table(table), _) => {
                let target = key.flatten();
                let cmp = self.blob_cmp.as_deref().filter(|_| self.key_type == KeyType::Blob);

                let compare = |probe: &Blob| match cmp {
                    Some(cmp) => cmp.compare(probe, &target),
                    None => probe.as_ref().cmp(&target),
                };

                let i = partition_point_fallible(self.count, |mid| {
                    Ok::<_, crate::Error>(compare(&table.get(mid)?) == Ordering::Less)
                })?;

                let exact = i < self.count && compare(&table.get(i)?) == Ordering::Equal;
                Ok((i, exact))
            }
            _ => {
                debug_assert!(false, "probing with key of wrong type");
                Ok((self.count, false))
            }
        }
    }
}

impl DTable for ArrayDTable {
    fn iter(&self) -> Box<dyn Cursor + '_> {
        let mut cursor = Box::new(ArrayCursor {
            table: self,
            pos: Pos::End,
            current: None,
        });

        // a fresh cursor sits at the first entry; the file was just readable,
        // so only a truncated table can fail here and invalid is the right answer
        if let Err(e) = cursor.land(0) {
            log::warn!("failed to position fresh cursor: {e}");
        }

        cursor
    }

    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn len(&self) -> usize {
        self.count
    }

    fn lookup(&self, key: &Dtype) -> crate::Result<Lookup> {
        let (index, exact) = self.lower_bound(key)?;

        Ok(if exact {
            Lookup::from(self.values.borrow_mut().get(index))
        } else {
            Lookup::Absent
        })
    }

    fn supports_indexed_access(&self) -> bool {
        true
    }

    fn index(&self, index: usize) -> crate::Result<Option<Blob>> {
        if index >= self.count {
            return Err(crate::Error::NoIndexedAccess);
        }
        Ok(self.values.borrow_mut().get(index))
    }

    fn contains_index(&self, index: usize) -> crate::Result<bool> {
        if index >= self.count {
            return Err(crate::Error::NoIndexedAccess);
        }
        Ok(self.values.borrow().contains(index))
    }

    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()> {
        self.blob_cmp = Some(cmp);
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

struct ArrayCursor<'a> {
    table: &'a ArrayDTable,
    pos: Pos,
    current: Option<Dtype>,
}

impl ArrayCursor<'_> {
    fn land(&mut self, index: usize) -> crate::Result<bool> {
        if index < self.table.count {
            self.current = Some(self.table.key_at(index)?);
            self.pos = Pos::At(index);
            Ok(true)
        } else {
            self.current = None;
            self.pos = Pos::End;
            Ok(false)
        }
    }
}

impl Cursor for ArrayCursor<'_> {
    fn valid(&self) -> bool {
        matches!(self.pos, Pos::At(_))
    }

    fn next(&mut self) -> crate::Result<bool> {
        match self.pos {
            Pos::At(i) => self.land(i + 1),
            Pos::End => Ok(false),
        }
    }

    fn prev(&mut self) -> crate::Result<bool> {
        match self.pos {
            // stays on the first entry
            Pos::At(0) => Ok(false),
            Pos::At(i) => self.land(i - 1),
            Pos::End => {
                if self.table.count == 0 {
                    Ok(false)
                } else {
                    self.land(self.table.count - 1)
                }
            }
        }
    }

    fn first(&mut self) -> crate::Result<bool> {
        self.land(0)
    }

    fn last(&mut self) -> crate::Result<bool> {
        if self.table.count == 0 {
            Ok(false)
        } else {
            self.land(self.table.count - 1)
        }
    }

    #[allow(clippy::expect_used)]
    fn key(&self) -> Dtype {
        self.current.clone().expect("cursor is not valid")
    }

    fn value(&self) -> crate::Result<Option<Blob>> {
        match self.pos {
            Pos::At(i) => Ok(self.table.values.borrow_mut().get(i)),
            Pos::End => panic!("cursor is not valid"),
        }
    }

    fn seek(&mut self, key: &Dtype) -> crate::Result<bool> {
        let (index, exact) = self.table.lower_bound(key)?;
        self.land(index)?;
        Ok(exact)
    }

    fn seek_by(&mut self, test: &dyn Fn(&Dtype) -> Ordering) -> crate::Result<bool> {
        let index = partition_point_fallible(self.table.count, |mid| {
            Ok::<_, crate::Error>(test(&self.table.key_at(mid)?) == Ordering::Less)
        })?;

        let landed = self.land(index)?;
        Ok(landed && self.current.as_ref().is_some_and(|key| test(key) == Ordering::Equal))
    }

    fn key_type(&self) -> KeyType {
        self.table.key_type
    }

    fn source(&self) -> &dyn DTable {
        self.table
    }
}

fn encode_keys(key_type: KeyType, keys: &[Dtype]) -> crate::Result<Vec<u8>> {
    let mut bytes = Vec::new();

    match key_type {
        KeyType::UInt32 | KeyType::Double => {
            for key in keys {
                bytes.extend_from_slice(&key.flatten());
            }
        }
        KeyType::Str | KeyType::Blob => {
            let blobs = keys.iter().map(Dtype::flatten).collect::<Vec<_>>();
            StringTable::create(&mut bytes, &blobs, key_type == KeyType::Blob)?;
        }
    }

    Ok(bytes)
}

/// Factory for the `array` class (read-only flavor)
pub struct ArrayFactory;

impl DTableFactory for ArrayFactory {
    fn name(&self) -> &'static str {
        "array"
    }

    fn open(&self, dir: &Path, name: &str, _config: &Params) -> crate::Result<Box<dyn DTable>> {
        Ok(Box::new(ArrayDTable::open(dir, name)?))
    }

    fn create(
        &self,
        dir: &Path,
        name: &str,
        _config: &Params,
        source: &mut dyn Cursor,
        shadow: Option<&dyn Shadow>,
    ) -> crate::Result<()> {
        ArrayDTable::create(dir, name, source, shadow)
    }

    fn indexed_access(&self, _config: &Params) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtable::{mem::MemDTable, TableShadow};
    use test_log::test;

    fn mem_fixture(entries: &[(&str, Option<&[u8]>)]) -> MemDTable {
        let mut table = MemDTable::new(KeyType::Str);
        for (key, value) in entries {
            table
                .insert(Dtype::from(*key), value.map(Blob::new), false)
                .unwrap();
        }
        table
    }

    #[test]
    fn array_round_trip_string_keys() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let source = mem_fixture(&[
            ("alpha", Some(b"1")),
            ("beta", Some(b"2")),
            ("gamma", Some(b"")),
        ]);
        ArrayDTable::create(dir.path(), "run", &mut *source.iter(), None)?;

        let table = ArrayDTable::open(dir.path(), "run")?;
        assert_eq!(3, table.len());
        assert_eq!(KeyType::Str, table.key_type());

        assert_eq!(
            Lookup::Value(Blob::from(*b"1")),
            table.lookup(&"alpha".into())?,
        );
        // empty value stays distinct from a tombstone
        assert_eq!(
            Lookup::Value(Blob::empty()),
            table.lookup(&"gamma".into())?,
        );
        assert_eq!(Lookup::Absent, table.lookup(&"delta".into())?);

        Ok(())
    }

    #[test]
    fn array_round_trip_uint_keys() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut source = MemDTable::new(KeyType::UInt32);
        for i in 0..100_u32 {
            source.insert(i.into(), Some(Blob::from(i.to_le_bytes())), true)?;
        }
        ArrayDTable::create(dir.path(), "run", &mut *source.iter(), None)?;

        let table = ArrayDTable::open(dir.path(), "run")?;
        for i in (0..100_u32).step_by(7) {
            assert_eq!(
                Lookup::Value(Blob::from(i.to_le_bytes())),
                table.lookup(&i.into())?,
            );
        }

        Ok(())
    }

    #[test]
    fn array_tombstones_follow_shadow() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let source = mem_fixture(&[("kept", None), ("live", Some(b"v")), ("pruned", None)]);
        let older = mem_fixture(&[("kept", Some(b"old"))]);

        ArrayDTable::create(
            dir.path(),
            "run",
            &mut *source.iter(),
            Some(&TableShadow(&older)),
        )?;

        let table = ArrayDTable::open(dir.path(), "run")?;
        assert_eq!(2, table.len());
        assert_eq!(Lookup::Tombstone, table.lookup(&"kept".into())?);
        assert_eq!(Lookup::Absent, table.lookup(&"pruned".into())?);

        Ok(())
    }

    #[test]
    fn array_indexed_access_matches_cursor() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let source = mem_fixture(&[("a", Some(b"1")), ("b", None), ("c", Some(b"3"))]);
        ArrayDTable::create(
            dir.path(),
            "run",
            &mut *source.iter(),
            Some(&TableShadow(&source)),
        )?;

        let table = ArrayDTable::open(dir.path(), "run")?;
        assert!(table.supports_indexed_access());

        let mut cursor = table.iter();
        let mut position = 0;

        while cursor.valid() {
            assert_eq!(cursor.value()?, table.index(position)?);
            assert_eq!(cursor.value()?.is_some(), table.contains_index(position)?);
            position += 1;
            cursor.next()?;
        }

        assert_eq!(3, position);
        assert!(table.index(3).is_err());

        Ok(())
    }

    #[test]
    fn array_cursor_seek_and_reverse() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let source = mem_fixture(&[("a", Some(b"1")), ("c", Some(b"3")), ("e", Some(b"5"))]);
        ArrayDTable::create(dir.path(), "run", &mut *source.iter(), None)?;
        let table = ArrayDTable::open(dir.path(), "run")?;

        let mut cursor = table.iter();
        assert!(!cursor.seek(&"b".into())?);
        assert_eq!(Dtype::from("c"), cursor.key());

        assert!(cursor.prev()?);
        assert_eq!(Dtype::from("a"), cursor.key());

        assert!(cursor.last()?);
        assert_eq!(Dtype::from("e"), cursor.key());

        Ok(())
    }

    #[test]
    fn array_rejects_foreign_files() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("junk"), b"not a table at all......")?;

        assert!(ArrayDTable::open(dir.path(), "junk").is_err());
        Ok(())
    }
}

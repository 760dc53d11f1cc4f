// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted, immutable on-disk dictionaries
//!
//! A string table is a section of a file holding unique strings (or blobs) in
//! sorted order, with leading bytes shared between neighbors elided. Every
//! 16th entry is stored uncompressed, so materializing an entry re-reads a
//! bounded number of predecessor rows. A small cache keeps the most recently
//! materialized entries alive across lookups.
//!
//! Section layout (all integers little-endian, starting at `start`):
//!
//! ```text
//! u32 count | u32 size | u8 offset_width | u8 length_width | u8 prefix_width | u8 flags
//! count rows of { offset, suffix_len, shared_prefix_len } at the given widths
//! concatenated suffix payload
//! ```
//!
//! `flags` bit 0 marks a binary (blob) table; `prefix_width` may be 0 when no
//! entry shares a prefix with its predecessor.

use crate::{
    binary_search::partition_point_fallible,
    coding::DecodeError,
    dtype::BlobComparator,
    file::read_blob_at,
    Blob, IStr,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{cell::RefCell, cmp::Ordering, fs::File, io::Write, sync::Arc};

/// Entries returned by `get` stay materialized for at least this many
/// subsequent `get` calls.
pub const ST_LRU: usize = 16;

const RESTART_INTERVAL: usize = 16;
const HEADER_LEN: usize = 14;
const FLAG_BINARY: u8 = 1;

struct Row {
    offset: usize,
    suffix_len: usize,
    prefix_len: usize,
}

struct Lru {
    entries: Vec<(usize, Blob)>,
    next: usize,
}

impl Lru {
    fn get(&self, index: usize) -> Option<Blob> {
        self.entries
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, blob)| blob.clone())
    }

    fn put(&mut self, index: usize, blob: Blob) {
        if self.entries.len() < ST_LRU {
            self.entries.push((index, blob));
        } else {
            #[allow(clippy::indexing_slicing)]
            {
                self.entries[self.next] = (index, blob);
            }
            self.next = (self.next + 1) % ST_LRU;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.next = 0;
    }
}

/// Read handle for a string table section of a file
pub struct StringTable {
    file: Arc<File>,
    start: u64,
    count: usize,
    size: usize,
    offset_width: u8,
    length_width: u8,
    prefix_width: u8,
    binary: bool,
    lru: RefCell<Lru>,
}

impl StringTable {
    /// Opens the table section starting at `start`.
    pub fn init(file: Arc<File>, start: u64) -> crate::Result<Self> {
        let header = read_blob_at(&file, start, HEADER_LEN)?;
        let mut reader = &header[..];

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let size = reader.read_u32::<LittleEndian>()? as usize;
        let offset_width = reader.read_u8()?;
        let length_width = reader.read_u8()?;
        let prefix_width = reader.read_u8()?;
        let flags = reader.read_u8()?;

        if !(1..=4).contains(&offset_width)
            || !(1..=4).contains(&length_width)
            || prefix_width > 4
        {
            return Err(DecodeError::InvalidHeader("string table widths out of range").into());
        }

        Ok(Self {
            file,
            start,
            count,
            size,
            offset_width,
            length_width,
            prefix_width,
            binary: flags & FLAG_BINARY != 0,
            lru: RefCell::new(Lru {
                entries: Vec::with_capacity(ST_LRU),
                next: 0,
            }),
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total byte size of the table section, including its header.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.size
    }

    /// Whether this is a blob table rather than a string table.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    fn row_len(&self) -> usize {
        usize::from(self.offset_width) + usize::from(self.length_width) + usize::from(self.prefix_width)
    }

    fn payload_start(&self) -> u64 {
        self.start + (HEADER_LEN + self.count * self.row_len()) as u64
    }

    #[allow(clippy::indexing_slicing)]
    fn row(&self, index: usize) -> crate::Result<Row> {
        let pos = self.start + (HEADER_LEN + index * self.row_len()) as u64;
        let bytes = read_blob_at(&self.file, pos, self.row_len())?;

        let ow = usize::from(self.offset_width);
        let lw = usize::from(self.length_width);
        let pw = usize::from(self.prefix_width);

        Ok(Row {
            offset: read_uint(&bytes[..ow]),
            suffix_len: read_uint(&bytes[ow..ow + lw]),
            prefix_len: read_uint(&bytes[ow + lw..ow + lw + pw]),
        })
    }

    /// Materializes entry `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, index: usize) -> crate::Result<Blob> {
        assert!(index < self.count, "string table index out of range");

        if let Some(hit) = self.lru.borrow().get(index) {
            return Ok(hit);
        }

        let row = self.row(index)?;
        let suffix = read_blob_at(
            &self.file,
            self.payload_start() + row.offset as u64,
            row.suffix_len,
        )?;

        let entry = if row.prefix_len == 0 {
            suffix
        } else {
            // bounded by the restart interval
            let prev = self.get(index - 1)?;
            debug_assert!(row.prefix_len <= prev.len());

            let mut bytes = Vec::with_capacity(row.prefix_len + suffix.len());
            bytes.extend_from_slice(&prev[..row.prefix_len.min(prev.len())]);
            bytes.extend_from_slice(&suffix);
            Blob::from(bytes)
        };

        self.lru.borrow_mut().put(index, entry.clone());
        Ok(entry)
    }

    /// Materializes entry `index` of a non-binary table as a string.
    pub fn get_string(&self, index: usize) -> crate::Result<IStr> {
        let blob = self.get(index)?;
        let s = std::str::from_utf8(&blob).map_err(DecodeError::Utf8)?;
        Ok(IStr::new(s))
    }

    /// Binary search; returns the entry index holding `key`.
    ///
    /// The comparator must match the one the table was created under.
    /// Invalidates the `get` cache.
    pub fn locate(
        &self,
        key: &[u8],
        cmp: Option<&dyn BlobComparator>,
    ) -> crate::Result<Option<usize>> {
        self.lru.borrow_mut().clear();

        let compare = |probe: &Blob| match cmp {
            Some(cmp) => cmp.compare(probe, key),
            None => probe.as_ref().cmp(key),
        };

        let index = partition_point_fallible(self.count, |mid| {
            Ok::<_, crate::Error>(compare(&self.get(mid)?) == Ordering::Less)
        })?;

        if index < self.count && compare(&self.get(index)?) == Ordering::Equal {
            Ok(Some(index))
        } else {
            Ok(None)
        }
    }

    /// [`StringTable::locate`] for string keys.
    pub fn locate_str(&self, key: &str) -> crate::Result<Option<usize>> {
        self.locate(key.as_bytes(), None)
    }

    /// Serializes a table over pre-sorted blobs; returns the section size.
    pub fn create<W: Write>(writer: &mut W, items: &[Blob], binary: bool) -> crate::Result<usize> {
        let mut rows = Vec::with_capacity(items.len());
        let mut payload_len = 0_usize;
        let mut max_prefix = 0_usize;
        let mut max_suffix = 0_usize;

        for (i, item) in items.iter().enumerate() {
            let prefix_len = match i.checked_sub(1).filter(|_| i % RESTART_INTERVAL != 0) {
                Some(prev) => items.get(prev).map_or(0, |p| shared_prefix(p, item)),
                None => 0,
            };

            let suffix_len = item.len() - prefix_len;

            rows.push(Row {
                offset: payload_len,
                suffix_len,
                prefix_len,
            });

            payload_len += suffix_len;
            max_prefix = max_prefix.max(prefix_len);
            max_suffix = max_suffix.max(suffix_len);
        }

        let offset_width = width_for(payload_len);
        let length_width = width_for(max_suffix);
        let prefix_width = if max_prefix == 0 { 0 } else { width_for(max_prefix) };

        let row_len = usize::from(offset_width) + usize::from(length_width) + usize::from(prefix_width);
        let size = HEADER_LEN + items.len() * row_len + payload_len;

        #[allow(clippy::cast_possible_truncation)]
        {
            writer.write_u32::<LittleEndian>(items.len() as u32)?;
            writer.write_u32::<LittleEndian>(size as u32)?;
        }
        writer.write_u8(offset_width)?;
        writer.write_u8(length_width)?;
        writer.write_u8(prefix_width)?;
        writer.write_u8(if binary { FLAG_BINARY } else { 0 })?;
        writer.write_all(&[0, 0])?;

        for row in &rows {
            write_uint(writer, row.offset, offset_width)?;
            write_uint(writer, row.suffix_len, length_width)?;
            write_uint(writer, row.prefix_len, prefix_width)?;
        }

        for (item, row) in items.iter().zip(&rows) {
            #[allow(clippy::indexing_slicing)]
            writer.write_all(&item[row.prefix_len..])?;
        }

        log::trace!(
            "wrote string table: {} entries, {} payload bytes, widths {}/{}/{}",
            items.len(),
            payload_len,
            offset_width,
            length_width,
            prefix_width,
        );

        Ok(size)
    }

    /// Serializes a non-binary table over pre-sorted strings.
    pub fn create_strings<W: Write>(writer: &mut W, items: &[IStr]) -> crate::Result<usize> {
        let blobs = items
            .iter()
            .map(|s| Blob::from(s.as_str()))
            .collect::<Vec<_>>();
        Self::create(writer, &blobs, false)
    }
}

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn width_for(value: usize) -> u8 {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn read_uint(bytes: &[u8]) -> usize {
    let mut value = 0_usize;
    for (i, byte) in bytes.iter().enumerate() {
        value |= usize::from(*byte) << (8 * i);
    }
    value
}

#[allow(clippy::cast_possible_truncation, clippy::indexing_slicing)]
fn write_uint<W: Write>(writer: &mut W, value: usize, width: u8) -> std::io::Result<()> {
    let bytes = (value as u32).to_le_bytes();
    writer.write_all(&bytes[..usize::from(width)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn write_table(items: &[Blob], binary: bool) -> crate::Result<(tempfile::TempDir, Arc<File>)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("strings");

        let mut bytes = vec![];
        StringTable::create(&mut bytes, items, binary)?;
        std::fs::write(&path, &bytes)?;

        Ok((dir, Arc::new(File::open(path)?)))
    }

    #[test]
    fn string_table_round_trip() -> crate::Result<()> {
        let items = [
            Blob::from(*b"customer"),
            Blob::from(*b"customer_id"),
            Blob::from(*b"customer_name"),
            Blob::from(*b"order"),
            Blob::from(*b"order_id"),
        ];

        let (_dir, file) = write_table(&items, true)?;
        let table = StringTable::init(file, 0)?;

        assert_eq!(items.len(), table.len());
        assert!(table.is_binary());

        for (i, item) in items.iter().enumerate() {
            assert_eq!(*item, table.get(i)?, "entry {i}");
        }

        Ok(())
    }

    #[test]
    fn string_table_prefix_compression_shares_bytes() -> crate::Result<()> {
        let clustered = (0..64)
            .map(|i| Blob::from(format!("common/prefix/key{i:04}")))
            .collect::<Vec<_>>();

        let mut compressed = vec![];
        StringTable::create(&mut compressed, &clustered, true)?;

        let raw_len: usize = clustered.iter().map(|b| b.len()).sum();
        assert!(
            compressed.len() < raw_len,
            "{} bytes written, {raw_len} raw",
            compressed.len(),
        );

        Ok(())
    }

    #[test]
    fn string_table_locate() -> crate::Result<()> {
        let items = (0..100)
            .map(|i| Blob::from(format!("key{i:03}")))
            .collect::<Vec<_>>();

        let (_dir, file) = write_table(&items, true)?;
        let table = StringTable::init(file, 0)?;

        for (i, item) in items.iter().enumerate() {
            assert_eq!(Some(i), table.locate(item, None)?);
        }

        assert_eq!(None, table.locate(b"key0005", None)?);
        assert_eq!(None, table.locate(b"zzz", None)?);

        Ok(())
    }

    #[test]
    fn string_table_locate_agrees_with_get() -> crate::Result<()> {
        let items = [
            Blob::from(*b"aa"),
            Blob::from(*b"ab"),
            Blob::from(*b"b"),
        ];

        let (_dir, file) = write_table(&items, true)?;
        let table = StringTable::init(file, 0)?;

        let located = table.locate(b"ab", None)?.unwrap();
        assert_eq!(Blob::from(*b"ab"), table.get(located)?);

        Ok(())
    }

    #[test]
    fn string_table_strings() -> crate::Result<()> {
        let items = [IStr::new("alpha"), IStr::new("beta"), IStr::new("gamma")];

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("strings");

        let mut bytes = vec![];
        StringTable::create_strings(&mut bytes, &items)?;
        std::fs::write(&path, &bytes)?;

        let table = StringTable::init(Arc::new(File::open(path)?), 0)?;
        assert!(!table.is_binary());
        assert_eq!(IStr::new("beta"), table.get_string(1)?);
        assert_eq!(Some(2), table.locate_str("gamma")?);

        Ok(())
    }

    #[test]
    fn string_table_at_offset() -> crate::Result<()> {
        let items = [Blob::from(*b"x"), Blob::from(*b"y")];

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("strings");

        let mut bytes = b"leading junk".to_vec();
        let start = bytes.len() as u64;
        StringTable::create(&mut bytes, &items, true)?;
        std::fs::write(&path, &bytes)?;

        let table = StringTable::init(Arc::new(File::open(path)?), start)?;
        assert_eq!(Blob::from(*b"y"), table.get(1)?);

        Ok(())
    }

    #[test]
    fn string_table_empty() -> crate::Result<()> {
        let (_dir, file) = write_table(&[], true)?;
        let table = StringTable::init(file, 0)?;

        assert!(table.is_empty());
        assert_eq!(None, table.locate(b"anything", None)?);

        Ok(())
    }
}

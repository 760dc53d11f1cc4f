// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{coding::DecodeError, Blob, BlobBuffer};
use byteorder::{LittleEndian, ReadBytesExt};

const SIZE_TABLE_ENTRY: usize = std::mem::size_of::<u32>();

/// One slot of an [`IndexBlob`].
///
/// A slot parsed from a backing blob stays `delayed` (offset/size only) until
/// first access, at which point it becomes a zero-copy view into the backing
/// payload.
#[derive(Clone, Debug, Default)]
struct Sub {
    value: Option<Blob>,
    delayed: bool,
    offset: usize,
    size: usize,
    modified: bool,
}

/// A fixed number of optional sub-blobs packed into one backing [`Blob`]
///
/// Layout: `count` little-endian `u32` size entries (0 = absent, otherwise
/// size + 1), followed by the concatenated bodies in slot order. Unchanged
/// slots read as views of the backing payload; [`IndexBlob::flatten`]
/// re-serializes only as much as the tracked modifications require.
#[derive(Clone, Debug)]
pub struct IndexBlob {
    base: Blob,
    subs: Vec<Sub>,
    modified: bool,
    resized: bool,
}

impl IndexBlob {
    /// Creates an index blob with all `count` slots absent.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            base: Blob::empty(),
            subs: vec![Sub::default(); count],
            modified: true,
            resized: true,
        }
    }

    /// Parses a backing blob produced by [`IndexBlob::flatten`].
    ///
    /// Slot bodies are not copied; each slot is materialized lazily on first
    /// access.
    pub fn from_blob(base: Blob, count: usize) -> Result<Self, DecodeError> {
        let table_len = count * SIZE_TABLE_ENTRY;

        if base.len() < table_len {
            return Err(DecodeError::InvalidHeader("index blob size table truncated"));
        }

        let mut subs = Vec::with_capacity(count);
        let mut offset = table_len;

        #[allow(clippy::indexing_slicing)]
        let mut table = &base[..table_len];

        for _ in 0..count {
            let entry = table.read_u32::<LittleEndian>()? as usize;

            if entry > 0 {
                let size = entry - 1;
                subs.push(Sub {
                    value: None,
                    delayed: true,
                    offset,
                    size,
                    modified: false,
                });
                offset += size;
            } else {
                subs.push(Sub::default());
            }
        }

        if base.len() < offset {
            return Err(DecodeError::InvalidHeader("index blob body truncated"));
        }

        Ok(Self {
            base,
            subs,
            modified: false,
            resized: false,
        })
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.subs.len()
    }

    /// Whether slot `i` holds a sub-blob.
    #[must_use]
    pub fn contains(&self, i: usize) -> bool {
        #[allow(clippy::indexing_slicing)]
        let sub = &self.subs[i];
        sub.delayed || sub.value.is_some()
    }

    fn sub_size(&self, i: usize) -> usize {
        #[allow(clippy::indexing_slicing)]
        let sub = &self.subs[i];

        if sub.delayed {
            sub.size
        } else {
            sub.value.as_ref().map_or(0, |b| b.len())
        }
    }

    /// Fetches slot `i`, materializing it from the backing blob if needed.
    #[allow(clippy::indexing_slicing)]
    pub fn get(&mut self, i: usize) -> Option<Blob> {
        if self.subs[i].delayed {
            let view = self
                .base
                .slice(self.subs[i].offset..self.subs[i].offset + self.subs[i].size);

            let sub = &mut self.subs[i];
            sub.value = Some(view);
            sub.delayed = false;
        }

        self.subs[i].value.clone()
    }

    /// Installs `value` (or absence) into slot `i`.
    pub fn set(&mut self, i: usize, value: Option<Blob>) {
        let old_size = self.sub_size(i);
        let old_exists = self.contains(i);

        let new_size = value.as_ref().map_or(0, |b| b.len());
        let new_exists = value.is_some();

        #[allow(clippy::indexing_slicing)]
        let sub = &mut self.subs[i];
        sub.value = value;
        sub.delayed = false;
        sub.modified = true;

        self.modified = true;
        if old_size != new_size || old_exists != new_exists {
            self.resized = true;
        }
    }

    /// Re-serializes into the canonical backing blob.
    ///
    /// Unmodified instances return the cached backing blob; same-size
    /// overwrites patch the backing payload in place (copy-on-write);
    /// anything that changed a slot's size rebuilds from scratch.
    pub fn flatten(&mut self) -> Blob {
        if !self.modified {
            return self.base.clone();
        }

        if self.resized {
            self.rebuild();
        } else {
            self.patch_in_place();
        }

        self.modified = false;
        self.base.clone()
    }

    fn patch_in_place(&mut self) {
        // the builder re-breaks sharing on its first write, so holders of the
        // old backing blob keep their view
        let mut buffer = BlobBuffer::from(std::mem::replace(&mut self.base, Blob::empty()));
        let mut offset = self.subs.len() * SIZE_TABLE_ENTRY;

        for i in 0..self.subs.len() {
            let size = self.sub_size(i);

            #[allow(clippy::indexing_slicing)]
            let sub = &mut self.subs[i];

            if sub.modified {
                debug_assert!(!sub.delayed, "a modified slot cannot be delayed");

                if let Some(value) = &sub.value {
                    buffer.overwrite(offset, value);
                }
                sub.modified = false;
            }

            offset += size;
        }

        self.base = buffer.into_blob();
        self.rebase();
    }

    fn rebuild(&mut self) {
        let table_len = self.subs.len() * SIZE_TABLE_ENTRY;
        let total = table_len + (0..self.subs.len()).map(|i| self.sub_size(i)).sum::<usize>();

        let mut buffer = BlobBuffer::with_capacity(total);

        for i in 0..self.subs.len() {
            // 0 encodes "absent", so present sizes are stored incremented
            #[allow(clippy::cast_possible_truncation)]
            let entry = if self.contains(i) {
                self.sub_size(i) as u32 + 1
            } else {
                0
            };
            buffer.layout_append(entry, SIZE_TABLE_ENTRY);
        }

        for i in 0..self.subs.len() {
            // get() rather than the slot value, in case it is still delayed
            if let Some(value) = self.get(i) {
                buffer.append(&value);
            }

            #[allow(clippy::indexing_slicing)]
            {
                self.subs[i].modified = false;
            }
        }

        self.base = buffer.into_blob();
        self.resized = false;
        self.rebase();
    }

    /// Records the freshly written offsets so slots keep lining up with the
    /// new backing blob.
    fn rebase(&mut self) {
        let mut offset = self.subs.len() * SIZE_TABLE_ENTRY;

        for sub in &mut self.subs {
            let size = if sub.delayed {
                sub.size
            } else {
                sub.value.as_ref().map_or(0, |b| b.len())
            };

            sub.offset = offset;
            sub.size = size;
            offset += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IndexBlob;
    use crate::Blob;
    use test_log::test;

    #[test]
    fn index_blob_rebuild_layout() {
        let mut ib = IndexBlob::new(3);
        ib.set(0, Some(Blob::from([1])));
        ib.set(1, Some(Blob::empty()));
        ib.set(2, Some(Blob::from([2, 3])));

        #[rustfmt::skip]
        assert_eq!(
            [
                // size table: stored size + 1, 0 = absent
                2, 0, 0, 0,
                1, 0, 0, 0,
                3, 0, 0, 0,

                // bodies
                1,
                2, 3,
            ],
            &*ib.flatten(),
        );
    }

    #[test]
    fn index_blob_round_trip() -> crate::Result<()> {
        let mut ib = IndexBlob::new(4);
        ib.set(0, Some(Blob::from(*b"first")));
        ib.set(2, Some(Blob::empty()));
        ib.set(3, Some(Blob::from(*b"last")));

        let flat = ib.flatten();
        let mut reread = IndexBlob::from_blob(flat, 4)?;

        for i in 0..4 {
            assert_eq!(ib.get(i), reread.get(i), "slot {i}");
        }

        assert!(!reread.contains(1));
        assert_eq!(Some(Blob::empty()), reread.get(2));

        Ok(())
    }

    #[test]
    fn index_blob_same_size_overwrite_patches() -> crate::Result<()> {
        let mut ib = IndexBlob::new(3);
        ib.set(0, Some(Blob::from(*b"aaa")));
        ib.set(1, Some(Blob::from(*b"bbb")));
        ib.set(2, Some(Blob::from(*b"ccc")));

        let before = ib.flatten();

        let mut reread = IndexBlob::from_blob(before.clone(), 3)?;
        reread.set(1, Some(Blob::from(*b"XYZ")));
        let after = reread.flatten();

        // untouched holder keeps its view
        assert_eq!(
            Blob::from(*b"aaa").as_ref(),
            &before[12..15],
        );

        let mut check = IndexBlob::from_blob(after, 3)?;
        assert_eq!(Some(Blob::from(*b"aaa")), check.get(0));
        assert_eq!(Some(Blob::from(*b"XYZ")), check.get(1));
        assert_eq!(Some(Blob::from(*b"ccc")), check.get(2));

        Ok(())
    }

    #[test]
    fn index_blob_resize_after_reread() -> crate::Result<()> {
        let mut ib = IndexBlob::new(2);
        ib.set(0, Some(Blob::from(*b"ab")));
        ib.set(1, Some(Blob::from(*b"cd")));

        let mut reread = IndexBlob::from_blob(ib.flatten(), 2)?;
        reread.set(0, Some(Blob::from(*b"longer than before")));
        reread.set(1, None);

        let mut check = IndexBlob::from_blob(reread.flatten(), 2)?;
        assert_eq!(Some(Blob::from(*b"longer than before")), check.get(0));
        assert_eq!(None, check.get(1));
        assert!(!check.contains(1));

        Ok(())
    }

    #[test]
    fn index_blob_absent_over_empty_is_a_resize() -> crate::Result<()> {
        let mut ib = IndexBlob::new(1);
        ib.set(0, Some(Blob::empty()));

        let mut reread = IndexBlob::from_blob(ib.flatten(), 1)?;
        assert!(reread.contains(0));

        // same byte size, but existence changes, so the size table must be rewritten
        reread.set(0, None);

        let mut check = IndexBlob::from_blob(reread.flatten(), 1)?;
        assert!(!check.contains(0));
        assert_eq!(None, check.get(0));

        Ok(())
    }

    #[test]
    fn index_blob_truncated_backing() {
        let err = IndexBlob::from_blob(Blob::from([1, 0, 0]), 1);
        assert!(err.is_err());

        // size table says 4 body bytes, body has 1
        let err = IndexBlob::from_blob(Blob::from([5, 0, 0, 0, 9]), 1);
        assert!(err.is_err());
    }
}

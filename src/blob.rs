// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::dtype::BlobComparator;
use byteview::ByteView;
use std::sync::Arc;

/// An immutable byte sequence that can be cloned without additional heap allocation
///
/// Every key, value and on-disk page in the engine is backed by a `Blob`,
/// so layers share payloads instead of copying them. A `Blob` is always
/// *present*; a deleted value (tombstone) is `Option<Blob>::None`, which keeps
/// "absent" distinct from "empty".
#[derive(Debug, Clone, Eq, Hash, Ord)]
pub struct Blob(ByteView);

impl Blob {
    /// Construct a [`Blob`] from a byte slice.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    /// The empty blob (present, zero length).
    #[must_use]
    pub fn empty() -> Self {
        Self(ByteView::new(&[]))
    }

    /// Clones out a sub-range without copying the payload.
    #[must_use]
    pub fn slice(&self, range: impl std::ops::RangeBounds<usize>) -> Self {
        Self(self.0.slice(range))
    }

    /// Binary search over a sorted sequence of blobs.
    ///
    /// Ordering is lexicographic unless a comparator is supplied; the input
    /// must be sorted under the same ordering.
    #[must_use]
    pub fn locate(sorted: &[Self], key: &Self, cmp: Option<&dyn BlobComparator>) -> Option<usize> {
        let mut min = 0_usize;
        let mut max = sorted.len();

        while min < max {
            let index = min + (max - min) / 2;

            #[allow(clippy::expect_used)]
            let probe = sorted.get(index).expect("should be in bounds");

            let c = match cmp {
                Some(cmp) => cmp.compare(probe, key),
                None => probe.cmp(key),
            };

            match c {
                std::cmp::Ordering::Less => min = index + 1,
                std::cmp::Ordering::Greater => max = index,
                std::cmp::Ordering::Equal => return Some(index),
            }
        }

        None
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl std::borrow::Borrow<[u8]> for Blob {
    fn borrow(&self) -> &[u8] {
        self
    }
}

impl From<&[u8]> for Blob {
    fn from(value: &[u8]) -> Self {
        Self(ByteView::new(value))
    }
}

// Arc::from<Vec<u8>> is specialized
impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self {
        Self(ByteView::from(value))
    }
}

impl From<String> for Blob {
    fn from(value: String) -> Self {
        Self(ByteView::from(value.into_bytes()))
    }
}

impl From<&str> for Blob {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

impl From<Arc<[u8]>> for Blob {
    fn from(value: Arc<[u8]>) -> Self {
        Self::from(&*value)
    }
}

impl<const N: usize> From<[u8; N]> for Blob {
    fn from(value: [u8; N]) -> Self {
        Self::from(value.as_slice())
    }
}

impl<const N: usize> From<&[u8; N]> for Blob {
    fn from(value: &[u8; N]) -> Self {
        Self::from(value.as_slice())
    }
}

impl FromIterator<u8> for Blob {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = u8>,
    {
        Vec::from_iter(iter).into()
    }
}

impl<T> PartialEq<T> for Blob
where
    T: AsRef<[u8]>,
{
    fn eq(&self, other: &T) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl PartialEq<Blob> for &[u8] {
    fn eq(&self, other: &Blob) -> bool {
        *self == other.as_ref()
    }
}

impl<T> PartialOrd<T> for Blob
where
    T: AsRef<[u8]>,
{
    fn partial_cmp(&self, other: &T) -> Option<std::cmp::Ordering> {
        self.as_ref().partial_cmp(other.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::Blob;
    use test_log::test;

    #[test]
    fn blob_empty_is_present() {
        assert_eq!(Blob::empty(), []);
        assert_eq!(0, Blob::empty().len());
    }

    #[test]
    fn blob_from_preserves_bytes() {
        let payload = [1_u8, 2, 3, 4];
        let blob = Blob::from(payload);
        assert_eq!(payload.len(), blob.len());
        assert_eq!(payload, &*blob);
    }

    #[test]
    fn blob_clone_shares_payload() {
        let blob = Blob::from(*b"shared payload");

        let clones = (0..8).map(|_| blob.clone()).collect::<Vec<_>>();
        drop(clones);

        assert_eq!(b"shared payload", &*blob);
    }

    #[test]
    fn blob_slice_is_view() {
        let blob = Blob::from(*b"abcdef");
        assert_eq!(b"cde", &*blob.slice(2..5));
    }

    #[test]
    fn blob_locate() {
        let sorted = [
            Blob::from(*b"bar"),
            Blob::from(*b"baz"),
            Blob::from(*b"foo"),
        ];

        assert_eq!(Some(0), Blob::locate(&sorted, &Blob::from(*b"bar"), None));
        assert_eq!(Some(2), Blob::locate(&sorted, &Blob::from(*b"foo"), None));
        assert_eq!(None, Blob::locate(&sorted, &Blob::from(*b"quux"), None));
        assert_eq!(None, Blob::locate(&[], &Blob::from(*b"bar"), None));
    }
}

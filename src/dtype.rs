// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Blob, IStr,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    cmp::Ordering,
    io::{Read, Write},
};

/// Pluggable ordering for blob-typed keys
///
/// The default ordering of blob keys is lexicographic; a table can be handed
/// a named comparator instead. The name is persisted by tables that depend on
/// their sort order, so the same comparator can be supplied on reopen.
pub trait BlobComparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Key type tag of a table
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyType {
    /// 32-bit unsigned integer keys
    UInt32,

    /// 64-bit float keys
    Double,

    /// UTF-8 string keys
    Str,

    /// Arbitrary byte keys
    Blob,
}

impl From<KeyType> for u8 {
    fn from(value: KeyType) -> Self {
        match value {
            KeyType::UInt32 => 0,
            KeyType::Double => 1,
            KeyType::Str => 2,
            KeyType::Blob => 3,
        }
    }
}

impl TryFrom<u8> for KeyType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::UInt32),
            1 => Ok(Self::Double),
            2 => Ok(Self::Str),
            3 => Ok(Self::Blob),
            _ => Err(()),
        }
    }
}

/// A typed table key
#[derive(Clone, Debug)]
pub enum Dtype {
    UInt32(u32),
    Double(f64),
    Str(IStr),
    Blob(Blob),
}

impl Dtype {
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::UInt32(_) => KeyType::UInt32,
            Self::Double(_) => KeyType::Double,
            Self::Str(_) => KeyType::Str,
            Self::Blob(_) => KeyType::Blob,
        }
    }

    /// Type-specific three-way comparison.
    ///
    /// Blob keys honor `cmp` when given; doubles use the IEEE total order.
    /// Comparing keys of different types is a programmer error.
    #[must_use]
    pub fn compare(&self, other: &Self, cmp: Option<&dyn BlobComparator>) -> Ordering {
        debug_assert_eq!(
            self.key_type(),
            other.key_type(),
            "comparing keys of different types",
        );

        match (self, other) {
            (Self::UInt32(a), Self::UInt32(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => match cmp {
                Some(cmp) => cmp.compare(a, b),
                None => a.cmp(b),
            },
            _ => u8::from(self.key_type()).cmp(&u8::from(other.key_type())),
        }
    }

    /// The key's stable byte representation (little-endian for numerics).
    ///
    /// This feeds the bloom filter hash and the fixed-width key sections of
    /// on-disk tables.
    #[must_use]
    pub fn flatten(&self) -> Blob {
        match self {
            Self::UInt32(v) => Blob::from(v.to_le_bytes()),
            Self::Double(v) => Blob::from(v.to_bits().to_le_bytes()),
            Self::Str(v) => Blob::from(v.as_str()),
            Self::Blob(v) => v.clone(),
        }
    }

    /// Serializes the key; variable-length types carry a `u32` length prefix.
    pub fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::UInt32(v) => writer.write_u32::<LittleEndian>(*v)?,
            Self::Double(v) => writer.write_u64::<LittleEndian>(v.to_bits())?,
            Self::Str(v) => {
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<LittleEndian>(v.len() as u32)?;
                writer.write_all(v.as_str().as_bytes())?;
            }
            Self::Blob(v) => {
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<LittleEndian>(v.len() as u32)?;
                writer.write_all(v)?;
            }
        }
        Ok(())
    }

    /// Deserializes a key of the given type.
    pub fn decode_from<R: Read>(reader: &mut R, key_type: KeyType) -> Result<Self, DecodeError> {
        Ok(match key_type {
            KeyType::UInt32 => Self::UInt32(reader.read_u32::<LittleEndian>()?),
            KeyType::Double => Self::Double(f64::from_bits(reader.read_u64::<LittleEndian>()?)),
            KeyType::Str => {
                let len = reader.read_u32::<LittleEndian>()? as usize;
                let mut buf = vec![0; len];
                reader.read_exact(&mut buf)?;
                Self::Str(IStr::new(std::str::from_utf8(&buf)?))
            }
            KeyType::Blob => {
                let len = reader.read_u32::<LittleEndian>()? as usize;
                let mut buf = vec![0; len];
                reader.read_exact(&mut buf)?;
                Self::Blob(buf.into())
            }
        })
    }
}

impl PartialEq for Dtype {
    fn eq(&self, other: &Self) -> bool {
        self.key_type() == other.key_type() && self.compare(other, None) == Ordering::Equal
    }
}

impl Eq for Dtype {}

impl PartialOrd for Dtype {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dtype {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other, None)
    }
}

impl std::hash::Hash for Dtype {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        u8::from(self.key_type()).hash(state);

        match self {
            Self::UInt32(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Blob(v) => v.hash(state),
        }
    }
}

impl From<u32> for Dtype {
    fn from(value: u32) -> Self {
        Self::UInt32(value)
    }
}

impl From<f64> for Dtype {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Dtype {
    fn from(value: &str) -> Self {
        Self::Str(IStr::new(value))
    }
}

impl From<Blob> for Dtype {
    fn from(value: Blob) -> Self {
        Self::Blob(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct ReverseCmp;

    impl BlobComparator for ReverseCmp {
        fn name(&self) -> &str {
            "reverse"
        }

        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            b.cmp(a)
        }
    }

    #[test]
    fn dtype_uint_order() {
        assert!(Dtype::from(1_u32) < Dtype::from(2_u32));
        assert_eq!(Dtype::from(7_u32), Dtype::from(7_u32));
    }

    #[test]
    fn dtype_double_total_order() {
        assert!(Dtype::from(-1.5) < Dtype::from(0.0));
        assert!(Dtype::from(f64::NEG_INFINITY) < Dtype::from(f64::MAX));
        assert_eq!(Dtype::from(2.5), Dtype::from(2.5));
    }

    #[test]
    fn dtype_blob_custom_cmp() {
        let a = Dtype::from(Blob::from(*b"aaa"));
        let b = Dtype::from(Blob::from(*b"bbb"));

        assert_eq!(Ordering::Less, a.compare(&b, None));
        assert_eq!(Ordering::Greater, a.compare(&b, Some(&ReverseCmp)));
    }

    #[test]
    fn dtype_round_trip() -> Result<(), DecodeError> {
        for key in [
            Dtype::from(42_u32),
            Dtype::from(13.37),
            Dtype::from("hello"),
            Dtype::from(Blob::from([0, 1, 254, 255])),
        ] {
            let bytes = {
                let mut v = vec![];
                #[allow(clippy::expect_used)]
                key.encode_into(&mut v).expect("vec write cannot fail");
                v
            };

            let decoded = Dtype::decode_from(&mut &bytes[..], key.key_type())?;
            assert_eq!(key, decoded);
        }

        Ok(())
    }
}

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::bit_array::BitArray;
use crate::coding::{DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const BLOOM_MAGIC: u32 = 0x1138_B893;

/// Version 0 pins the hash scheme: xxh3-64 over the key bytes, double hashed
/// into `k` probe indices.
pub const BLOOM_VERSION: u32 = 0;

// Taken from https://github.com/tomtomwombat/fastbloom
fn secondary_hash(h1: u64) -> u64 {
    h1.wrapping_shr(32).wrapping_mul(0x51_7c_c1_b7_27_22_0a_95)
}

/// A standard bloom filter over key bytes
///
/// Sized once at construction and never resized. Uses double hashing instead
/// of `k` independent hash functions.
///
/// On-disk: `{u32 magic, u32 version, u32 m, u32 k}` little-endian, then
/// `ceil(m / 8)` bytes of bitset with bit 0 in the least significant bit of
/// byte 0.
#[derive(Debug, PartialEq)]
pub struct BloomFilter {
    bits: BitArray,

    /// Bit count
    m: usize,

    /// Number of hash indices
    k: usize,
}

impl BloomFilter {
    /// Returns `true` if the key may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let mut h1 = crate::hash::hash64(key);
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h1 % (self.m as u64)) as usize;

            if !self.bits.get(idx) {
                return false;
            }

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }

        true
    }

    /// Reads a persisted filter, checking magic and version.
    pub fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != BLOOM_MAGIC {
            return Err(DecodeError::InvalidHeader("bad bloom filter magic").into());
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != BLOOM_VERSION {
            return Err(crate::Error::InvalidVersion(version));
        }

        let m = reader.read_u32::<LittleEndian>()? as usize;
        let k = reader.read_u32::<LittleEndian>()? as usize;

        let mut bytes = vec![0; m.div_ceil(8)];
        reader.read_exact(&mut bytes)?;

        Ok(Self {
            bits: BitArray::from_bytes(bytes.into_boxed_slice()),
            m,
            k,
        })
    }
}

impl Encode for BloomFilter {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(BLOOM_MAGIC)?;
        writer.write_u32::<LittleEndian>(BLOOM_VERSION)?;

        #[allow(clippy::cast_possible_truncation)]
        {
            writer.write_u32::<LittleEndian>(self.m as u32)?;
            writer.write_u32::<LittleEndian>(self.k as u32)?;
        }

        writer.write_all(self.bits.bytes())?;
        Ok(())
    }
}

/// Builds a [`BloomFilter`] by inserting one key at a time
#[derive(Debug)]
pub struct Builder {
    bits: BitArray,
    m: usize,
    k: usize,
}

impl Builder {
    /// Sizes a filter for `n` items at false positive rate `fpr`.
    #[must_use]
    pub fn with_fp_rate(n: usize, fpr: f64) -> Self {
        use std::f64::consts::LN_2;

        let n = n.max(1);

        // NOTE: Some sensible minimum
        let fpr = fpr.max(0.000_000_1);

        let m = Self::calculate_m(n, fpr);
        let bpk = m / n;

        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let k = (((bpk as f64) * LN_2) as usize).max(1);

        Self {
            bits: BitArray::with_capacity(m / 8),
            m,
            k,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_m(n: usize, fp_rate: f64) -> usize {
        use std::f64::consts::LN_2;

        let n = n as f64;
        let ln2_squared = LN_2.powi(2);

        let numerator = n * fp_rate.ln();
        let m = -(numerator / ln2_squared);

        // Round up to next byte
        ((m / 8.0).ceil() * 8.0) as usize
    }

    /// Adds a key to the filter.
    pub fn set(&mut self, key: &[u8]) {
        let mut h1 = crate::hash::hash64(key);
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h1 % (self.m as u64)) as usize;

            self.bits.enable(idx);

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }
    }

    #[must_use]
    pub fn build(self) -> BloomFilter {
        BloomFilter {
            bits: self.bits,
            m: self.m,
            k: self.k,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bloom_calculate_m() {
        assert_eq!(9_592, Builder::calculate_m(1_000, 0.01));
        assert_eq!(4_800, Builder::calculate_m(1_000, 0.1));
        assert_eq!(4_792_536, Builder::calculate_m(1_000_000, 0.1));
    }

    #[test]
    fn bloom_no_false_negatives() {
        let mut builder = Builder::with_fp_rate(10, 0.0001);

        let keys: &[&[u8]] = &[
            b"item0", b"item1", b"item2", b"item3", b"item4", b"item5", b"item6", b"item7",
            b"item8", b"item9",
        ];

        for key in keys {
            builder.set(key);
        }

        let filter = builder.build();

        for key in keys {
            assert!(filter.contains(key));
        }

        assert!(!filter.contains(b"asdasdasdasdasd"));
    }

    #[test]
    fn bloom_serde_round_trip() -> crate::Result<()> {
        let mut builder = Builder::with_fp_rate(50, 0.001);
        for i in 0..50_u32 {
            builder.set(&i.to_le_bytes());
        }
        let filter = builder.build();

        let bytes = filter.encode_into_vec();
        let copy = BloomFilter::decode_from(&mut &bytes[..])?;

        assert_eq!(filter, copy);
        for i in 0..50_u32 {
            assert!(copy.contains(&i.to_le_bytes()));
        }

        Ok(())
    }

    #[test]
    fn bloom_rejects_bad_magic() {
        let mut builder = Builder::with_fp_rate(5, 0.01);
        builder.set(b"x");

        let mut bytes = builder.build().encode_into_vec();
        bytes[0] ^= 0xFF;

        assert!(BloomFilter::decode_from(&mut &bytes[..]).is_err());
    }

    #[test]
    fn bloom_rejects_bad_version() {
        let builder = Builder::with_fp_rate(5, 0.01);

        let mut bytes = builder.build().encode_into_vec();
        bytes[4] = 9;

        assert!(matches!(
            BloomFilter::decode_from(&mut &bytes[..]),
            Err(crate::Error::InvalidVersion(9)),
        ));
    }

    #[test]
    fn bloom_fpr() {
        let item_count = 100_000;
        let wanted_fpr = 0.1;

        let mut builder = Builder::with_fp_rate(item_count, wanted_fpr);

        for key in (0..item_count).map(|_| nanoid::nanoid!()) {
            builder.set(key.as_bytes());
        }

        let filter = builder.build();

        let mut false_positives = 0;

        for key in (0..item_count).map(|_| nanoid::nanoid!()) {
            if filter.contains(key.as_bytes()) {
                false_positives += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let fpr = false_positives as f64 / item_count as f64;
        assert!(fpr > 0.05);
        assert!(fpr < 0.13);
    }
}

use crate::serde::{Deserializable, DeserializeError, Serializable, SerializeError};
use bit_vec::BitVec;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Identifies the hash function a serialized filter was built with.
///
/// The hash is part of the on-disk contract: probing a persisted filter
/// with a different hash would silently produce false negatives, so a
/// filter refuses to load under an unknown identifier.
const HASH_ID_XXH3_64: u8 = 1;

/// A bloom filter over the keys of an SSTable
///
/// Returns `false` only if the key was definitely not inserted;
/// `true` means the key *may* be contained.
#[derive(Debug)]
pub struct BloomFilter {
    /// Raw bytes exposed as bit field
    inner: BitVec,

    /// Bit count
    m: usize,

    /// Number of hash functions
    k: usize,
}

impl Serializable for BloomFilter {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u8(HASH_ID_XXH3_64)?;
        writer.write_u64::<BigEndian>(self.m as u64)?;
        writer.write_u64::<BigEndian>(self.k as u64)?;
        writer.write_all(&self.inner.to_bytes())?;
        Ok(())
    }
}

impl Deserializable for BloomFilter {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let hash_id = reader.read_u8()?;

        if hash_id != HASH_ID_XXH3_64 {
            return Err(DeserializeError::InvalidTag(("BloomHashId", hash_id)));
        }

        let m = reader.read_u64::<BigEndian>()? as usize;
        let k = reader.read_u64::<BigEndian>()? as usize;

        let mut bytes = vec![0; m / 8];
        reader.read_exact(&mut bytes)?;

        Ok(Self::from_raw(m, k, &bytes))
    }
}

impl BloomFilter {
    fn from_raw(m: usize, k: usize, bytes: &[u8]) -> Self {
        Self {
            inner: BitVec::from_bytes(bytes),
            m,
            k,
        }
    }

    /// `m = -n * ln(fpr) / ln(2)^2`, rounded up to a full byte
    pub(crate) fn calculate_m(n: usize, fp_rate: f32) -> usize {
        use std::f32::consts::LN_2;

        let n = n as f32;
        let ln2_squared = LN_2.powi(2);

        let m = -(n * fp_rate.ln() / ln2_squared);
        ((m / 8.0).ceil() * 8.0) as usize
    }

    /// `k = (m / n) * ln(2)`, at least 1
    pub(crate) fn calculate_k(m: usize, n: usize) -> usize {
        use std::f32::consts::LN_2;

        let k = (m as f32 / n as f32) * LN_2;
        (k.round() as usize).max(1)
    }

    /// Constructs a bloom filter that can hold `item_count` items
    /// while maintaining a certain false positive rate.
    #[must_use]
    pub fn with_fp_rate(item_count: usize, fp_rate: f32) -> Self {
        // NOTE: Some sensible minimum
        let fp_rate = fp_rate.max(0.000_001);
        let item_count = item_count.max(1);

        let m = Self::calculate_m(item_count, fp_rate);
        let k = Self::calculate_k(m, item_count);

        Self {
            inner: BitVec::from_elem(m, false),
            m,
            k,
        }
    }

    /// Constructs a bloom filter from a known set of keys.
    pub fn from_keys<'a, I: IntoIterator<Item = &'a [u8]>>(keys: I, fp_rate: f32) -> Self {
        let keys = keys.into_iter().collect::<Vec<_>>();
        let mut filter = Self::with_fp_rate(keys.len(), fp_rate);

        for key in keys {
            filter.set_with_hash(Self::get_hash(key));
        }

        filter
    }

    /// Returns `true` if the item may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::get_hash(key);

        let mut hash = h1;

        for _ in 0..self.k {
            let idx = (hash % self.m as u64) as usize;

            if !self.inner.get(idx).expect("should be in bounds") {
                return false;
            }

            hash = hash.wrapping_add(h2);
        }

        true
    }

    /// Adds the key to the filter
    pub fn set_with_hash(&mut self, (h1, h2): (u64, u64)) {
        let mut hash = h1;

        for _ in 0..self.k {
            let idx = (hash % self.m as u64) as usize;

            self.inner.set(idx, true);
            hash = hash.wrapping_add(h2);
        }
    }

    /// Gets the fixed double hash of a key
    ///
    /// xxh3-64, no per-process seed; the second hash is derived by
    /// folding the key into the running state again.
    #[must_use]
    pub fn get_hash(key: &[u8]) -> (u64, u64) {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();

        hasher.update(key);
        let h1 = hasher.digest();

        hasher.update(key);
        let h2 = hasher.digest();

        (h1, h2)
    }
}

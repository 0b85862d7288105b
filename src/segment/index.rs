use crate::{
    serde::{Deserializable, DeserializeError, Serializable, SerializeError},
    value::UserKey,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Points to a data block inside an SSTable file
///
/// # Disk representation
///
/// \[block offset; 8 bytes] \[key length; 2 bytes] \[key; N bytes]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Byte offset of the block inside the file
    pub offset: u64,

    /// First key of the block
    pub start_key: UserKey,
}

impl Serializable for IndexEntry {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u64::<BigEndian>(self.offset)?;

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.start_key.len() as u16)?;
        writer.write_all(&self.start_key)?;

        Ok(())
    }
}

impl Deserializable for IndexEntry {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let offset = reader.read_u64::<BigEndian>()?;

        let key_len = reader.read_u16::<BigEndian>()?;
        let mut start_key = vec![0; key_len.into()];
        reader.read_exact(&mut start_key)?;

        Ok(Self {
            offset,
            start_key: start_key.into(),
        })
    }
}

/// Sparse block index: one entry per block, keyed by the block's first key
///
/// A point lookup binary-searches for the rightmost entry whose key is
/// less than or equal to the target, then reads exactly that one block.
///
/// # Disk representation
///
/// \[entry count; 4 bytes] followed by the entries
#[derive(Debug, Default)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
}

impl SparseIndex {
    #[must_use]
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].start_key < w[1].start_key));
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the block that may contain the key
    ///
    /// If the key sorts before the first block's key, it cannot be
    /// in the table at all.
    #[must_use]
    pub fn find_block(&self, key: &[u8]) -> Option<&IndexEntry> {
        let idx = self.entries.partition_point(|e| &*e.start_key <= key);

        if idx == 0 {
            None
        } else {
            self.entries.get(idx - 1)
        }
    }

    /// Returns the last block of the table
    #[must_use]
    pub fn last_block(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }
}

impl Serializable for SparseIndex {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.entries.len() as u32)?;

        for entry in &self.entries {
            entry.serialize(writer)?;
        }

        Ok(())
    }
}

impl Deserializable for SparseIndex {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let entry_count = reader.read_u32::<BigEndian>()?;

        let mut entries = Vec::with_capacity(entry_count as usize);

        for _ in 0..entry_count {
            entries.push(IndexEntry::deserialize(reader)?);
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn fixture_index() -> SparseIndex {
        SparseIndex::new(vec![
            IndexEntry {
                offset: 17,
                start_key: b"daa".to_vec().into(),
            },
            IndexEntry {
                offset: 1000,
                start_key: b"m".to_vec().into(),
            },
            IndexEntry {
                offset: 2000,
                start_key: b"x".to_vec().into(),
            },
        ])
    }

    #[test]
    fn index_find_block() {
        let index = fixture_index();

        // Before the first block: cannot be contained
        assert!(index.find_block(b"a").is_none());
        assert!(index.find_block(b"da").is_none());

        assert_eq!(17, index.find_block(b"daa").expect("should find").offset);
        assert_eq!(17, index.find_block(b"ff").expect("should find").offset);
        assert_eq!(1000, index.find_block(b"m").expect("should find").offset);
        assert_eq!(1000, index.find_block(b"w").expect("should find").offset);
        assert_eq!(2000, index.find_block(b"x").expect("should find").offset);
        assert_eq!(2000, index.find_block(b"zzzz").expect("should find").offset);
    }

    #[test]
    fn index_round_trip() -> crate::Result<()> {
        let index = fixture_index();

        let mut bytes = Vec::new();
        index.serialize(&mut bytes)?;

        let decoded = SparseIndex::deserialize(&mut &bytes[..])?;

        assert_eq!(index.entries, decoded.entries);

        Ok(())
    }

    #[test]
    fn index_empty() {
        let index = SparseIndex::default();
        assert!(index.find_block(b"anything").is_none());
    }
}

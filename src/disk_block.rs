use crate::{
    serde::{Deserializable, DeserializeError, Serializable},
    Value,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Size of the block frame header: compressed_size (4) + uncompressed_size (4)
pub const BLOCK_HEADER_SIZE: usize = 8;

/// A run of sorted entries, stored compressed as a unit
///
/// # Disk representation
///
/// \[compressed size; 4 bytes] \[uncompressed size; 4 bytes] \[LZ4 payload] \[crc32; 4 bytes]
///
/// The CRC covers the 8-byte frame header plus the compressed payload and is
/// verified on every read; a mismatch fails the read with a corruption error.
#[derive(Clone, Debug)]
pub struct DiskBlock {
    pub items: Vec<Value>,
}

impl DiskBlock {
    /// Size of the decompressed entry run in bytes
    #[must_use]
    pub fn serialized_size(items: &[Value]) -> usize {
        items.iter().map(Value::serialized_size).sum()
    }

    /// Serializes, compresses and frames the block
    pub fn to_bytes_compressed(&self) -> crate::Result<Vec<u8>> {
        debug_assert!(!self.items.is_empty());

        let mut raw = Vec::with_capacity(Self::serialized_size(&self.items));

        for item in &self.items {
            item.serialize(&mut raw)?;
        }

        let compressed = lz4_flex::block::compress(&raw);

        let mut bytes =
            Vec::with_capacity(BLOCK_HEADER_SIZE + compressed.len() + std::mem::size_of::<u32>());

        // NOTE: Truncation is okay, blocks are tiny
        #[allow(clippy::cast_possible_truncation)]
        bytes.write_u32::<BigEndian>(compressed.len() as u32)?;

        // NOTE: Truncation is okay, blocks are tiny
        #[allow(clippy::cast_possible_truncation)]
        bytes.write_u32::<BigEndian>(raw.len() as u32)?;

        bytes.extend_from_slice(&compressed);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        bytes.write_u32::<BigEndian>(hasher.finalize())?;

        Ok(bytes)
    }

    /// Reads, verifies and decompresses a block from the current reader position
    pub fn from_reader_compressed<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let compressed_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let uncompressed_size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        let mut compressed = vec![0u8; compressed_size as usize];
        reader.read_exact(&mut compressed)?;

        let expected_crc = reader.read_u32::<BigEndian>()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&compressed);
        let crc = hasher.finalize();

        if crc != expected_crc {
            return Err(DeserializeError::CrcCheck(crc).into());
        }

        let raw = lz4_flex::block::decompress(&compressed, uncompressed_size as usize)?;

        if raw.len() != uncompressed_size as usize {
            return Err(DeserializeError::InvalidStructure(
                "block decompressed to unexpected size",
            )
            .into());
        }

        let mut items = Vec::new();
        let mut cursor = Cursor::new(&raw);

        while (cursor.position() as usize) < raw.len() {
            items.push(Value::deserialize(&mut cursor)?);
        }

        Ok(Self { items })
    }

    /// Reads a block at the given file offset
    pub fn from_file_compressed<R: Read + Seek>(reader: &mut R, offset: u64) -> crate::Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        Self::from_reader_compressed(reader)
    }
}

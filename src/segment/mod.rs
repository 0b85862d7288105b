pub mod index;
pub mod meta;
pub mod reader;
pub mod writer;

use self::{index::SparseIndex, meta::Metadata, reader::Reader};
use crate::{
    bloom::BloomFilter,
    disk_block::DiskBlock,
    serde::{Deserializable, DeserializeError, SerializeError},
    value::SeqNo,
    version::Version,
    Value,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Magic bytes at the start of the file header and the end of the footer
pub const SSTABLE_MAGIC: &[u8; 8] = b"SEGMTSST";

/// magic (8) + version (4) + level (1) + entry_count (4)
pub const HEADER_SIZE: usize = 17;

/// index_offset (8) + index_size (4) + bloom_offset (8) + bloom_size (4) + magic (8)
pub const FOOTER_SIZE: usize = 32;

/// Fixed-size SSTable file header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileHeader {
    pub version: Version,
    pub level: u8,
    pub entry_count: u32,
}

impl FileHeader {
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_all(SSTABLE_MAGIC)?;
        writer.write_u32::<BigEndian>(self.version.into())?;
        writer.write_u8(self.level)?;
        writer.write_u32::<BigEndian>(self.entry_count)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let mut magic = [0u8; SSTABLE_MAGIC.len()];
        reader.read_exact(&mut magic)?;

        if &magic != SSTABLE_MAGIC {
            return Err(DeserializeError::BadMagic.into());
        }

        let version = reader.read_u32::<BigEndian>()?;
        let Ok(version) = Version::try_from(version) else {
            return Err(crate::Error::UnsupportedVersion(None));
        };

        let level = reader.read_u8()?;
        let entry_count = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            version,
            level,
            entry_count,
        })
    }
}

/// Fixed-size SSTable file footer
///
/// The footer is read first (seek to EOF - 32) to locate the sparse index
/// and the bloom filter; its trailing magic doubles as a truncation check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_size: u32,
    pub bloom_offset: u64,
    pub bloom_size: u32,
}

impl Footer {
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u64::<BigEndian>(self.index_offset)?;
        writer.write_u32::<BigEndian>(self.index_size)?;
        writer.write_u64::<BigEndian>(self.bloom_offset)?;
        writer.write_u32::<BigEndian>(self.bloom_size)?;
        writer.write_all(SSTABLE_MAGIC)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let index_offset = reader.read_u64::<BigEndian>()?;
        let index_size = reader.read_u32::<BigEndian>()?;
        let bloom_offset = reader.read_u64::<BigEndian>()?;
        let bloom_size = reader.read_u32::<BigEndian>()?;

        let mut magic = [0u8; SSTABLE_MAGIC.len()];
        reader.read_exact(&mut magic)?;

        if &magic != SSTABLE_MAGIC {
            return Err(DeserializeError::BadMagic.into());
        }

        Ok(Self {
            index_offset,
            index_size,
            bloom_offset,
            bloom_size,
        })
    }
}

/// Disk segment (a.k.a. `SSTable`, `sorted string table`) that is located on disk
///
/// A segment is an immutable, sorted list of key-value entries, split into
/// compressed blocks (see [`DiskBlock`]). A sparse index translates a key to
/// the single block that may contain it; a bloom filter short-circuits
/// lookups for keys that are definitely absent.
///
/// Deleted entries are represented by tombstones.
pub struct Segment {
    /// Metadata as registered in the manifest
    pub metadata: Metadata,

    path: PathBuf,

    /// Open file handle, kept for the lifetime of the segment
    file: Mutex<File>,

    sparse_index: SparseIndex,

    bloom_filter: BloomFilter,

    /// Offset of the first byte past the data blocks
    data_end: u64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment:{}", self.metadata.id)
    }
}

impl Segment {
    /// Opens a segment file, validating footer and header and loading
    /// the sparse index and bloom filter into memory.
    pub fn open<P: AsRef<Path>>(path: P, metadata: Metadata) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        log::debug!("Opening segment at {}", path.display());

        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(DeserializeError::InvalidStructure("file too short").into());
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = Footer::deserialize(&mut file)?;

        file.seek(SeekFrom::Start(0))?;
        let header = FileHeader::deserialize(&mut file)?;

        if header.level != metadata.level || u64::from(header.entry_count) != metadata.entry_count {
            return Err(DeserializeError::InvalidStructure(
                "header disagrees with manifest metadata",
            )
            .into());
        }

        file.seek(SeekFrom::Start(footer.index_offset))?;
        let sparse_index =
            SparseIndex::deserialize(&mut (&mut file).take(footer.index_size.into()))?;

        file.seek(SeekFrom::Start(footer.bloom_offset))?;
        let bloom_filter =
            BloomFilter::deserialize(&mut (&mut file).take(footer.bloom_size.into()))?;

        Ok(Self {
            metadata,
            path,
            file: Mutex::new(file),
            sparse_index,
            bloom_filter,
            data_end: footer.index_offset,
        })
    }

    /// Retrieves an entry from the segment.
    ///
    /// Tombstones are returned as-is; the caller interprets them as
    /// "deleted, search no further".
    ///
    /// # Errors
    ///
    /// Will return `Err` if an I/O error or block corruption occurs.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<Value>> {
        let key = key.as_ref();

        if !self.metadata.key_range_contains(key) {
            return Ok(None);
        }

        if !self.bloom_filter.contains(key) {
            return Ok(None);
        }

        let Some(index_entry) = self.sparse_index.find_block(key) else {
            return Ok(None);
        };

        log::trace!(
            "Reading block @ {} of segment {}",
            index_entry.offset,
            self.metadata.id
        );

        let block = {
            let mut file = self.file.lock().expect("lock is poisoned");
            DiskBlock::from_file_compressed(&mut *file, index_entry.offset)?
        };

        // Entries are sorted by key, then seqno descending,
        // so the first match is the latest version
        Ok(block.items.iter().find(|item| &*item.key == key).cloned())
    }

    /// Creates an iterator over the segment's entries, in key order.
    ///
    /// The iterator uses its own file handle, so it does not contend
    /// with point lookups.
    pub fn iter(&self) -> crate::Result<Reader> {
        Reader::new(&self.path, HEADER_SIZE as u64, self.data_end)
    }

    /// Rebuilds a metadata record by scanning the file.
    ///
    /// Used when the manifest is missing or unreadable.
    pub fn recover_metadata<P: AsRef<Path>>(path: P, id: u64) -> crate::Result<Metadata> {
        let path = path.as_ref();

        log::info!("Recovering segment metadata from {}", path.display());

        let mut file = BufReader::new(File::open(path)?);
        let fs_meta = std::fs::metadata(path)?;

        if fs_meta.len() < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(DeserializeError::InvalidStructure("file too short").into());
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = Footer::deserialize(&mut file)?;

        file.seek(SeekFrom::Start(0))?;
        let header = FileHeader::deserialize(&mut file)?;

        let mut entry_count = 0u64;
        let mut min_key = None;
        let mut max_key = None;
        let mut max_seqno: SeqNo = 0;

        let mut pos = HEADER_SIZE as u64;

        while pos < footer.index_offset {
            let block = DiskBlock::from_file_compressed(&mut file, pos)?;

            if min_key.is_none() {
                min_key = block.items.first().map(|item| item.key.clone());
            }
            max_key = block.items.last().map(|item| item.key.clone());

            entry_count += block.items.len() as u64;
            max_seqno = block
                .items
                .iter()
                .map(|item| item.seqno)
                .max()
                .map_or(max_seqno, |seqno| max_seqno.max(seqno));

            pos = file.stream_position()?;
        }

        if entry_count != u64::from(header.entry_count) {
            return Err(DeserializeError::InvalidStructure(
                "entry count disagrees with header",
            )
            .into());
        }

        let (Some(min_key), Some(max_key)) = (min_key, max_key) else {
            return Err(DeserializeError::InvalidStructure("segment has no entries").into());
        };

        let created_at = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        Ok(Metadata {
            id,
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            level: header.level,
            min_key,
            max_key,
            entry_count,
            file_size: fs_meta.len(),
            created_at,
            max_seqno,
        })
    }
}

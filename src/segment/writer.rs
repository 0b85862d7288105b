use super::{
    index::{IndexEntry, SparseIndex},
    meta::Metadata,
    FileHeader, Footer, HEADER_SIZE,
};
use crate::{
    bloom::BloomFilter,
    disk_block::DiskBlock,
    file::{fsync_directory, sstable_file_name, temp_sibling, unix_timestamp_secs},
    serde::Serializable,
    value::{SeqNo, UserKey},
    version::Version,
    Value,
};
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::PathBuf,
};

pub struct Options {
    /// Folder the table is written into
    pub folder: PathBuf,

    /// Table ID, allocated by the manifest
    pub id: u64,

    /// Level the table is written at
    pub level: u8,

    /// Maximum decompressed size of a data block
    pub block_size: u32,

    /// Bloom filter false positive rate
    pub bloom_fp_rate: f32,

    /// Whether to drop tombstones instead of writing them
    /// (only sound at the bottommost level)
    pub evict_tombstones: bool,
}

/// Streams sorted entries into an SSTable file
///
/// Entries are buffered into blocks, compressed and written out together
/// with the sparse index, the bloom filter and the footer. The write goes
/// to a `.tmp` sibling which is fsynced and atomically renamed into place,
/// so readers never observe a partially written table.
pub struct Writer {
    opts: Options,

    sstable_path: PathBuf,
    temp_path: PathBuf,

    block_writer: BufWriter<File>,
    chunk: Vec<Value>,
    chunk_size: usize,

    index_entries: Vec<IndexEntry>,

    /// Hashes for bloom filter
    ///
    /// Using enhanced double hashing, so we got two u64s
    bloom_hash_buffer: Vec<(u64, u64)>,

    pub block_count: usize,
    pub item_count: usize,
    pub file_pos: u64,

    pub first_key: Option<UserKey>,
    pub last_key: Option<UserKey>,
    pub tombstone_count: usize,

    pub highest_seqno: SeqNo,
}

impl Writer {
    /// Sets up a new writer, creating the temp file
    pub fn new(opts: Options) -> crate::Result<Self> {
        std::fs::create_dir_all(&opts.folder)?;

        let sstable_path = opts.folder.join(sstable_file_name(opts.id));
        let temp_path = temp_sibling(&sstable_path);

        let mut block_writer = BufWriter::with_capacity(512_000, File::create(&temp_path)?);

        // Reserve space for the header; entry_count is only known at the
        // end, so the real header is patched in during finish()
        block_writer.write_all(&[0u8; HEADER_SIZE])?;

        Ok(Self {
            opts,

            sstable_path,
            temp_path,

            block_writer,
            chunk: Vec::with_capacity(1_000),
            chunk_size: 0,

            index_entries: Vec::new(),
            bloom_hash_buffer: Vec::with_capacity(1_000),

            block_count: 0,
            item_count: 0,
            file_pos: HEADER_SIZE as u64,

            first_key: None,
            last_key: None,
            tombstone_count: 0,

            highest_seqno: 0,
        })
    }

    /// Writes a compressed block to disk
    fn write_block(&mut self) -> crate::Result<()> {
        debug_assert!(!self.chunk.is_empty());

        let first = self.chunk.first().expect("chunk should not be empty");

        self.index_entries.push(IndexEntry {
            offset: self.file_pos,
            start_key: first.key.clone(),
        });

        let block = DiskBlock {
            items: std::mem::take(&mut self.chunk),
        };
        let bytes = block.to_bytes_compressed()?;

        self.block_writer.write_all(&bytes)?;

        log::trace!(
            "Written data block @ {} ({} bytes on disk)",
            self.file_pos,
            bytes.len()
        );

        self.file_pos += bytes.len() as u64;
        self.item_count += block.items.len();
        self.block_count += 1;
        self.chunk_size = 0;

        Ok(())
    }

    /// Writes an item
    ///
    /// Items must be written in key order, tied keys in seqno-descending order.
    pub fn write(&mut self, item: Value) -> crate::Result<()> {
        if item.is_tombstone() {
            if self.opts.evict_tombstones {
                return Ok(());
            }

            self.tombstone_count += 1;
        }

        self.bloom_hash_buffer.push(BloomFilter::get_hash(&item.key));

        let item_size = item.serialized_size();

        // Greedy partitioning: flush the current chunk if this item would
        // push it over the block size; an item larger than a whole block
        // ends up in a block of its own
        if !self.chunk.is_empty() && self.chunk_size + item_size > self.opts.block_size as usize {
            self.write_block()?;
        }

        if self.first_key.is_none() {
            self.first_key = Some(item.key.clone());
        }
        self.last_key = Some(item.key.clone());

        if self.highest_seqno < item.seqno {
            self.highest_seqno = item.seqno;
        }

        self.chunk_size += item_size;
        self.chunk.push(item);

        Ok(())
    }

    /// Finishes the table, making sure all data is durable, and
    /// atomically publishes the file under its final name.
    ///
    /// Returns `None` if no items were written (the temp file is removed).
    pub fn finish(mut self) -> crate::Result<Option<Metadata>> {
        if !self.chunk.is_empty() {
            self.write_block()?;
        }

        // No items written, just remove the temp file and return nothing
        if self.item_count == 0 {
            log::debug!(
                "Removing empty table file ({}) because no items were written",
                self.temp_path.display()
            );
            std::fs::remove_file(&self.temp_path)?;
            return Ok(None);
        }

        let index_offset = self.file_pos;

        let index = SparseIndex::new(std::mem::take(&mut self.index_entries));
        let mut index_bytes = Vec::new();
        index.serialize(&mut index_bytes)?;
        self.block_writer.write_all(&index_bytes)?;

        let bloom_offset = index_offset + index_bytes.len() as u64;

        let mut filter = BloomFilter::with_fp_rate(self.bloom_hash_buffer.len(), self.opts.bloom_fp_rate);

        for hash in std::mem::take(&mut self.bloom_hash_buffer) {
            filter.set_with_hash(hash);
        }

        let mut bloom_bytes = Vec::new();
        filter.serialize(&mut bloom_bytes)?;
        self.block_writer.write_all(&bloom_bytes)?;

        // NOTE: Truncation is okay, index and filter are small
        #[allow(clippy::cast_possible_truncation)]
        let footer = Footer {
            index_offset,
            index_size: index_bytes.len() as u32,
            bloom_offset,
            bloom_size: bloom_bytes.len() as u32,
        };
        let mut footer_bytes = Vec::new();
        footer.serialize(&mut footer_bytes)?;
        self.block_writer.write_all(&footer_bytes)?;

        // Patch the real header in at the front
        self.block_writer.seek(SeekFrom::Start(0))?;

        let header = FileHeader {
            version: Version::V1,
            level: self.opts.level,
            // NOTE: Truncation is okay and actually needed
            #[allow(clippy::cast_possible_truncation)]
            entry_count: self.item_count as u32,
        };
        let mut header_bytes = Vec::new();
        header.serialize(&mut header_bytes)?;
        self.block_writer.write_all(&header_bytes)?;

        self.block_writer.flush()?;
        self.block_writer.get_mut().sync_all()?;

        fsync_directory(&self.opts.folder)?;

        std::fs::rename(&self.temp_path, &self.sstable_path)?;

        fsync_directory(&self.opts.folder)?;

        let file_size = std::fs::metadata(&self.sstable_path)?.len();

        log::debug!(
            "Written {} items in {} blocks into new table {}, {} KiB",
            self.item_count,
            self.block_count,
            self.sstable_path.display(),
            file_size / 1_024,
        );

        Ok(Some(Metadata {
            id: self.opts.id,
            filename: sstable_file_name(self.opts.id),
            level: self.opts.level,
            min_key: self.first_key.expect("should have written at least one item"),
            max_key: self.last_key.expect("should have written at least one item"),
            entry_count: self.item_count as u64,
            file_size,
            created_at: unix_timestamp_secs(),
            max_seqno: self.highest_seqno,
        }))
    }
}

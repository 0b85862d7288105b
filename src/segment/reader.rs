use crate::{disk_block::DiskBlock, Value};
use std::{
    collections::VecDeque,
    fs::File,
    io::{BufReader, Seek, SeekFrom},
    path::Path,
};

/// Reads through a segment's data blocks sequentially, in key order
///
/// Used by compaction and by manifest recovery; point lookups go through
/// the sparse index instead.
pub struct Reader {
    reader: BufReader<File>,

    /// Offset of the first byte past the data blocks
    data_end: u64,

    pos: u64,

    buffered: VecDeque<Value>,

    error: bool,
}

impl Reader {
    pub fn new<P: AsRef<Path>>(path: P, data_start: u64, data_end: u64) -> crate::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(data_start))?;

        Ok(Self {
            reader,
            data_end,
            pos: data_start,
            buffered: VecDeque::new(),
            error: false,
        })
    }

    fn read_next_block(&mut self) -> crate::Result<()> {
        let block = DiskBlock::from_reader_compressed(&mut self.reader)?;
        self.pos = self.reader.stream_position()?;
        self.buffered.extend(block.items);
        Ok(())
    }
}

impl Iterator for Reader {
    type Item = crate::Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error {
            return None;
        }

        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }

            if self.pos >= self.data_end {
                return None;
            }

            if let Err(e) = self.read_next_block() {
                self.error = true;
                return Some(Err(e));
            }
        }
    }
}

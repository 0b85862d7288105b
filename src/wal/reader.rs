use super::{entry::read_record, header::WalHeader};
use crate::{serde::DeserializeError, Value};
use std::{
    fs::File,
    io::{BufReader, Seek},
    path::{Path, PathBuf},
};

/// Replays the records of a single WAL segment file
///
/// A record with an invalid CRC, or a truncated tail, terminates the
/// iteration at that record: trailing garbage means a record was being
/// written when the process died, and is ignored. `tail_torn` reports
/// whether the segment ended that way.
pub struct WalReader {
    path: PathBuf,
    reader: BufReader<File>,
    file_size: u64,
    done: bool,

    /// `true` if iteration stopped because of a damaged record
    pub tail_torn: bool,
}

impl WalReader {
    /// Opens a segment and validates its header
    ///
    /// The file is opened writable so a torn tail can be chopped off.
    pub fn new<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        let file_size = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        WalHeader::deserialize(&mut reader)?;

        Ok(Self {
            path,
            reader,
            file_size,
            done: false,
            tail_torn: false,
        })
    }

    fn stop(&mut self, record_start: u64, reason: &DeserializeError) {
        // A clean EOF right at a record boundary is the normal end;
        // anything else means a record was being written when we crashed
        if record_start < self.file_size || !matches!(reason, DeserializeError::Io(_)) {
            log::warn!(
                "Torn record in {} @ {record_start}, truncating log tail ({reason:?})",
                self.path.display(),
            );
            self.tail_torn = true;

            // Chop the tail off so the next recovery sees a clean segment
            if let Err(e) = self
                .reader
                .get_mut()
                .set_len(record_start)
                .and_then(|()| self.reader.get_ref().sync_all())
            {
                log::error!("Failed to truncate torn WAL tail: {e:?}");
            }
        }

        self.done = true;
    }
}

impl Iterator for WalReader {
    type Item = crate::Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let record_start = match self.reader.stream_position() {
            Ok(pos) => pos,
            Err(e) => {
                self.done = true;
                return Some(Err(crate::Error::Io(e)));
            }
        };

        match read_record(&mut self.reader) {
            Ok(item) => Some(Ok(item)),
            Err(DeserializeError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.stop(record_start, &DeserializeError::Io(e));
                None
            }
            Err(DeserializeError::Io(e)) => {
                self.done = true;
                Some(Err(crate::Error::Io(e)))
            }
            Err(e) => {
                self.stop(record_start, &e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        version::Version,
        wal::{entry::write_record, header::WalHeader},
        Value, ValueType,
    };
    use std::io::Write;
    use test_log::test;

    fn write_fixture(path: &Path, items: &[Value]) -> crate::Result<()> {
        let mut file = File::create(path)?;

        WalHeader {
            version: Version::V1,
            created_at: 0,
        }
        .serialize(&mut file)?;

        for item in items {
            write_record(&mut file, item)?;
        }

        file.sync_all()?;
        Ok(())
    }

    fn fixture_items() -> Vec<Value> {
        vec![
            Value::new(b"abc".to_vec(), b"def".to_vec(), 1, ValueType::Value),
            Value::new(b"yxc".to_vec(), b"ghj".to_vec(), 2, ValueType::Value),
            Value::new_tombstone(b"abc".to_vec(), 3),
        ]
    }

    #[test]
    fn wal_reader_replays_in_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wal-000001.log");

        let items = fixture_items();
        write_fixture(&path, &items)?;

        let mut reader = WalReader::new(&path)?;
        let replayed = (&mut reader).collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(items, replayed);
        assert!(!reader.tail_torn);

        Ok(())
    }

    #[test]
    fn wal_reader_truncates_mangled_tail() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wal-000001.log");

        let items = fixture_items();
        write_fixture(&path, &items)?;

        let size_before_mangle = std::fs::metadata(&path)?.len();

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
            file.write_all(b"09pmu35w3a9mp53bao9upw3ab5up")?;
            file.sync_all()?;
        }

        for _ in 0..10 {
            let mut reader = WalReader::new(&path)?;
            let replayed = (&mut reader).collect::<crate::Result<Vec<_>>>()?;

            // Should recover all items
            assert_eq!(items, replayed);

            // Should truncate to before-mangled state
            assert_eq!(size_before_mangle, std::fs::metadata(&path)?.len());
        }

        Ok(())
    }

    #[test]
    fn wal_reader_ignores_corrupt_last_record() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wal-000001.log");

        let items = fixture_items();
        write_fixture(&path, &items)?;

        // Flip the last byte (inside the final record's CRC)
        {
            let mut bytes = std::fs::read(&path)?;
            let idx = bytes.len() - 1;
            bytes[idx] ^= 0xFF;
            std::fs::write(&path, bytes)?;
        }

        let mut reader = WalReader::new(&path)?;
        let replayed = (&mut reader).collect::<crate::Result<Vec<_>>>()?;

        // All records before the damaged one are recovered
        assert_eq!(items[..2], replayed[..]);
        assert!(reader.tail_torn);

        Ok(())
    }
}

pub mod entry;
pub mod header;
pub mod reader;
pub mod writer;

use self::{
    reader::WalReader,
    writer::{GroupCommitWriter, Message, SegmentFile},
};
use crate::{file::parse_wal_file_name, value::SeqNo, Value};
use std::{
    path::Path,
    sync::{
        mpsc::{sync_channel, Receiver, Sender},
        Mutex,
    },
    thread::JoinHandle,
};

/// The write-ahead log: a sequence of append-only segment files
///
/// All file state is owned by a single writer thread; this handle talks to
/// it through a channel. Records are made durable with batched group
/// commit (see [`writer::GroupCommitWriter`]).
pub struct Wal {
    tx: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Opens the WAL folder, replaying every intact record, and starts
    /// the writer thread on a fresh segment.
    ///
    /// Returns the handle and the replayed records in write order.
    pub fn recover<P: AsRef<Path>>(folder: P) -> crate::Result<(Self, Vec<Value>)> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder)?;

        let mut segment_numbers = std::fs::read_dir(folder)?
            .filter_map(|dirent| {
                let dirent = dirent.ok()?;
                parse_wal_file_name(&dirent.file_name().to_string_lossy())
            })
            .collect::<Vec<_>>();
        segment_numbers.sort_unstable();

        let mut entries = Vec::new();
        let mut sealed = Vec::new();
        let mut replay_stopped = false;

        for &number in &segment_numbers {
            let path = folder.join(crate::file::wal_file_name(number));

            if replay_stopped {
                // Replay must not proceed past a damaged record; whatever
                // sits in later segments is kept on disk, but never
                // considered checkpointed
                log::warn!("Skipping WAL segment {} after torn record", path.display());

                sealed.push(SegmentFile {
                    path,
                    number,
                    max_seqno: SeqNo::MAX,
                });
                continue;
            }

            let mut max_seqno = 0;

            match WalReader::new(&path) {
                Ok(mut reader) => {
                    for item in &mut reader {
                        let item = item?;
                        max_seqno = max_seqno.max(item.seqno);
                        entries.push(item);
                    }

                    if reader.tail_torn {
                        replay_stopped = true;
                    }

                    sealed.push(SegmentFile {
                        path,
                        number,
                        max_seqno,
                    });
                }
                Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Header never made it to disk: treat like a torn tail
                    log::warn!(
                        "WAL segment {} has a torn header, terminating replay",
                        path.display()
                    );

                    replay_stopped = true;

                    sealed.push(SegmentFile {
                        path,
                        number,
                        max_seqno: SeqNo::MAX,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        log::info!(
            "Recovered {} WAL records from {} segment(s)",
            entries.len(),
            segment_numbers.len()
        );

        let next_number = segment_numbers.last().map_or(1, |n| n + 1);

        let (tx, rx) = std::sync::mpsc::channel();
        let writer = GroupCommitWriter::create(folder.to_path_buf(), next_number, sealed, rx)?;

        let thread = std::thread::spawn(move || writer.run());

        Ok((
            Self {
                tx,
                thread: Mutex::new(Some(thread)),
            },
            entries,
        ))
    }

    /// Enqueues a record for durable append.
    ///
    /// Returns a completion handle that resolves once the record's batch
    /// has been fsynced.
    pub fn append(&self, item: &Value) -> crate::Result<Receiver<crate::Result<()>>> {
        let mut bytes = Vec::with_capacity(item.serialized_size() + 8);
        entry::write_record(&mut bytes, item)?;

        let (ack_tx, ack_rx) = sync_channel(1);

        self.tx
            .send(Message::Record {
                bytes,
                seqno: item.seqno,
                ack: ack_tx,
            })
            .map_err(|_| crate::Error::Closed)?;

        Ok(ack_rx)
    }

    /// Seals the active segment and starts a new one
    pub fn rotate(&self) {
        let _ = self.tx.send(Message::Rotate);
    }

    /// Discards sealed segments whose records all have
    /// `seqno <= checkpoint`
    pub fn truncate_up_to(&self, checkpoint: SeqNo) {
        let _ = self.tx.send(Message::Truncate { up_to: checkpoint });
    }

    /// Flushes the current batch and stops the writer thread.
    ///
    /// Every record enqueued before this call is durable when it returns.
    pub fn close(&self) {
        let Some(thread) = self.thread.lock().expect("lock is poisoned").take() else {
            return;
        };

        let _ = self.tx.send(Message::Shutdown);

        if thread.join().is_err() {
            log::error!("WAL writer thread panicked");
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueType;
    use test_log::test;

    #[test]
    fn wal_append_then_recover() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let items = (0u64..100)
            .map(|i| {
                Value::new(
                    format!("key-{i:03}").into_bytes(),
                    b"value".to_vec(),
                    i + 1,
                    ValueType::Value,
                )
            })
            .collect::<Vec<_>>();

        {
            let (wal, entries) = Wal::recover(dir.path())?;
            assert!(entries.is_empty());

            let acks = items
                .iter()
                .map(|item| wal.append(item))
                .collect::<crate::Result<Vec<_>>>()?;

            for ack in acks {
                ack.recv().expect("writer should be alive")?;
            }

            wal.close();
        }

        {
            let (_wal, entries) = Wal::recover(dir.path())?;
            assert_eq!(items, entries);
        }

        Ok(())
    }

    #[test]
    fn wal_rotation_starts_new_segment() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let item = Value::new(b"a".to_vec(), b"1".to_vec(), 1, ValueType::Value);
        let item2 = Value::new(b"b".to_vec(), b"2".to_vec(), 2, ValueType::Value);

        {
            let (wal, _) = Wal::recover(dir.path())?;
            wal.append(&item)?.recv().expect("writer should be alive")?;
            wal.rotate();
            wal.append(&item2)?.recv().expect("writer should be alive")?;
            wal.close();
        }

        let segments = std::fs::read_dir(dir.path())?
            .filter_map(|d| parse_wal_file_name(&d.ok()?.file_name().to_string_lossy()))
            .count();
        assert_eq!(2, segments);

        let (_wal, entries) = Wal::recover(dir.path())?;
        assert_eq!(vec![item, item2], entries);

        Ok(())
    }

    #[test]
    fn wal_truncation_unlinks_checkpointed_segments() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        {
            let (wal, _) = Wal::recover(dir.path())?;

            let item = Value::new(b"a".to_vec(), b"1".to_vec(), 1, ValueType::Value);
            wal.append(&item)?.recv().expect("writer should be alive")?;
            wal.rotate();

            let item = Value::new(b"b".to_vec(), b"2".to_vec(), 2, ValueType::Value);
            wal.append(&item)?.recv().expect("writer should be alive")?;

            wal.truncate_up_to(1);
            wal.close();
        }

        let (_wal, entries) = Wal::recover(dir.path())?;

        // Only the second segment's record must survive
        assert_eq!(1, entries.len());
        assert_eq!(b"b".as_slice(), &*entries[0].key);

        Ok(())
    }
}

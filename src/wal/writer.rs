use super::header::WalHeader;
use crate::{
    file::{fsync_directory, unix_timestamp_secs, wal_file_name},
    value::SeqNo,
    version::Version,
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{Receiver, SyncSender, TryRecvError},
};

/// Maximum number of records fsynced together
///
/// Entry-count batching keeps memory use predictable and needs no clock.
pub const MAX_BATCH_SIZE: usize = 256;

pub enum Message {
    Record {
        bytes: Vec<u8>,
        seqno: SeqNo,
        ack: SyncSender<crate::Result<()>>,
    },
    Rotate,
    Truncate {
        up_to: SeqNo,
    },
    Shutdown,
}

type PendingRecord = (Vec<u8>, SeqNo, SyncSender<crate::Result<()>>);

/// Bookkeeping for one WAL segment file
pub(crate) struct SegmentFile {
    pub path: PathBuf,
    pub number: u64,

    /// Highest seqno written into the segment; `u64::MAX` marks a segment
    /// whose content is unknown (never eligible for truncation)
    pub max_seqno: SeqNo,
}

/// The single WAL writer: drains the record queue in batches of up to
/// [`MAX_BATCH_SIZE`], writes each batch contiguously, fsyncs once, and
/// only then reports completion for every record in the batch.
pub(crate) struct GroupCommitWriter {
    folder: PathBuf,
    rx: Receiver<Message>,

    active: BufWriter<File>,
    active_segment: SegmentFile,

    sealed: Vec<SegmentFile>,
}

fn create_segment(folder: &Path, number: u64) -> crate::Result<(BufWriter<File>, SegmentFile)> {
    let path = folder.join(wal_file_name(number));

    log::debug!("Starting WAL segment {}", path.display());

    let mut file = BufWriter::new(File::create(&path)?);

    WalHeader {
        version: Version::V1,
        created_at: unix_timestamp_secs(),
    }
    .serialize(&mut file)?;

    file.flush()?;
    file.get_mut().sync_all()?;
    fsync_directory(folder)?;

    Ok((
        file,
        SegmentFile {
            path,
            number,
            max_seqno: 0,
        },
    ))
}

impl GroupCommitWriter {
    pub fn create(
        folder: PathBuf,
        next_number: u64,
        sealed: Vec<SegmentFile>,
        rx: Receiver<Message>,
    ) -> crate::Result<Self> {
        let (active, active_segment) = create_segment(&folder, next_number)?;

        Ok(Self {
            folder,
            rx,
            active,
            active_segment,
            sealed,
        })
    }

    pub fn run(mut self) {
        log::debug!("WAL writer started");

        loop {
            let Ok(msg) = self.rx.recv() else {
                break;
            };

            match msg {
                Message::Shutdown => break,
                Message::Rotate => self.handle_rotate(),
                Message::Truncate { up_to } => self.handle_truncate(up_to),
                record @ Message::Record { .. } => {
                    if self.handle_batch(record) {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.sync() {
            log::error!("WAL writer failed to sync on shutdown: {e:?}");
        }

        log::debug!("WAL writer exiting");
    }

    /// Collects up to [`MAX_BATCH_SIZE`] records without blocking, commits
    /// them with a single fsync, then applies any control message that
    /// ended the batch. Returns `true` on shutdown.
    fn handle_batch(&mut self, first: Message) -> bool {
        let mut batch: Vec<PendingRecord> = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut deferred = None;
        let mut shutdown = false;

        let Message::Record { bytes, seqno, ack } = first else {
            unreachable!("handle_batch is only called with a record");
        };
        batch.push((bytes, seqno, ack));

        while batch.len() < MAX_BATCH_SIZE {
            match self.rx.try_recv() {
                Ok(Message::Record { bytes, seqno, ack }) => {
                    batch.push((bytes, seqno, ack));
                }
                Ok(Message::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Ok(other) => {
                    // Rotation and truncation form a batch boundary:
                    // records behind them belong to the next batch
                    deferred = Some(other);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    shutdown = true;
                    break;
                }
            }
        }

        self.commit(batch);

        match deferred {
            Some(Message::Rotate) => self.handle_rotate(),
            Some(Message::Truncate { up_to }) => self.handle_truncate(up_to),
            _ => {}
        }

        shutdown
    }

    fn write_batch(&mut self, batch: &[PendingRecord]) -> std::io::Result<SeqNo> {
        let mut max_seqno = 0;

        for (bytes, seqno, _) in batch {
            self.active.write_all(bytes)?;
            max_seqno = max_seqno.max(*seqno);
        }

        self.active.flush()?;
        self.active.get_ref().sync_all()?;

        Ok(max_seqno)
    }

    fn commit(&mut self, batch: Vec<PendingRecord>) {
        log::trace!("WAL writer committing batch of {} records", batch.len());

        match self.write_batch(&batch) {
            Ok(max_seqno) => {
                self.active_segment.max_seqno = self.active_segment.max_seqno.max(max_seqno);

                for (_, _, ack) in batch {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                log::error!("WAL batch commit failed: {e:?}");

                let kind = e.kind();
                let msg = e.to_string();

                for (_, _, ack) in batch {
                    let _ = ack.send(Err(crate::Error::Io(std::io::Error::new(
                        kind,
                        msg.clone(),
                    ))));
                }
            }
        }
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.active.flush()?;
        self.active.get_ref().sync_all()
    }

    /// Seals the active segment and starts the next one
    ///
    /// If the new segment cannot be created, the current one stays
    /// active; records keep their durability, only truncation of this
    /// segment is deferred.
    fn handle_rotate(&mut self) {
        if let Err(e) = self.sync() {
            log::error!("WAL rotation failed to sync active segment: {e:?}");
            return;
        }

        match create_segment(&self.folder, self.active_segment.number + 1) {
            Ok((file, segment)) => {
                let old_file = std::mem::replace(&mut self.active, file);
                let old_segment = std::mem::replace(&mut self.active_segment, segment);

                drop(old_file);

                log::debug!(
                    "Sealed WAL segment {} (max seqno {})",
                    old_segment.path.display(),
                    old_segment.max_seqno
                );

                self.sealed.push(old_segment);
            }
            Err(e) => {
                log::error!("WAL rotation failed to start new segment: {e:?}");
            }
        }
    }

    /// Unlinks sealed segments whose entire content is covered by the
    /// checkpoint seqno
    fn handle_truncate(&mut self, up_to: SeqNo) {
        let (discard, keep) = std::mem::take(&mut self.sealed)
            .into_iter()
            .partition::<Vec<_>, _>(|segment| segment.max_seqno <= up_to);

        self.sealed = keep;

        for segment in discard {
            log::debug!(
                "Unlinking checkpointed WAL segment {} (max seqno {} <= checkpoint {up_to})",
                segment.path.display(),
                segment.max_seqno
            );

            if let Err(e) = std::fs::remove_file(&segment.path) {
                log::warn!("Failed to unlink WAL segment: {e:?}");
            }
        }

        if let Err(e) = fsync_directory(&self.folder) {
            log::warn!("Failed to fsync WAL folder after truncation: {e:?}");
        }
    }
}

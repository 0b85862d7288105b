use crate::{
    engine_inner::{SealedMemtable, SstableState},
    memtable::MemTable,
    segment::{
        writer::{Options as WriterOptions, Writer},
        Segment,
    },
    value::SeqNo,
    wal::Wal,
};
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, SyncSender},
        Arc, RwLock,
    },
};

/// A rotated memtable on its way to level 0
pub struct FlushTask {
    pub memtable: Arc<MemTable>,
    pub checkpoint_seqno: SeqNo,

    /// Present for synchronous flushes; resolved once the manifest
    /// update is durable
    pub ack: Option<SyncSender<crate::Result<()>>>,
}

pub enum FlushMessage {
    Task(FlushTask),
    Shutdown,
}

/// State shared with the single flush thread
///
/// Tasks are processed strictly in enqueue order, so publish order equals
/// rotation order. Errors are fatal to the thread; durability of the
/// affected writes is still guaranteed by the WAL.
pub struct FlushWorker {
    pub rx: Receiver<FlushMessage>,
    pub state: Arc<RwLock<SstableState>>,
    pub sealed_memtables: Arc<RwLock<VecDeque<SealedMemtable>>>,
    pub wal: Arc<Wal>,
    pub sstables_folder: PathBuf,
    pub block_size: u32,
    pub bloom_fp_rate: f32,
    pub poisoned: Arc<AtomicBool>,
}

impl FlushWorker {
    pub fn run(self) {
        log::debug!("Flush worker started");

        loop {
            let Ok(msg) = self.rx.recv() else {
                break;
            };

            let task = match msg {
                FlushMessage::Shutdown => break,
                FlushMessage::Task(task) => task,
            };

            match self.flush_task(&task) {
                Ok(()) => {
                    if let Some(ack) = task.ack {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) => {
                    log::error!("Flush failed, stopping flush worker: {e:?}");
                    self.poisoned.store(true, Ordering::Release);

                    if let Some(ack) = task.ack {
                        let _ = ack.send(Err(e));
                    }

                    break;
                }
            }
        }

        log::debug!("Flush worker exiting");
    }

    fn flush_task(&self, task: &FlushTask) -> crate::Result<()> {
        log::debug!(
            "Flushing memtable with {} item(s) up to seqno {}",
            task.memtable.len(),
            task.checkpoint_seqno
        );

        let id = {
            let mut state = self.state.write().expect("lock is poisoned");
            state.manifest.allocate_id()
        };

        let mut writer = Writer::new(WriterOptions {
            folder: self.sstables_folder.clone(),
            id,
            level: 0,
            block_size: self.block_size,
            bloom_fp_rate: self.bloom_fp_rate,
            evict_tombstones: false,
        })?;

        for item in task.memtable.iter_sorted() {
            writer.write(item)?;
        }

        let Some(metadata) = writer.finish()? else {
            // Nothing was written (empty memtable); just retire it
            self.sealed_memtables
                .write()
                .expect("lock is poisoned")
                .pop_front();
            return Ok(());
        };

        let segment = Segment::open(self.sstables_folder.join(&metadata.filename), metadata.clone())?;

        {
            let mut state = self.state.write().expect("lock is poisoned");

            // The manifest save is the durability point of the flush
            state.manifest.add_sstable(metadata)?;
            state.readers.insert(id, Arc::new(segment));

            // Tasks are strictly FIFO, so ours is the front entry;
            // retiring it under the state lock keeps every key visible
            // through either the memtable or the new table
            self.sealed_memtables
                .write()
                .expect("lock is poisoned")
                .pop_front();
        }

        self.wal.truncate_up_to(task.checkpoint_seqno);

        log::debug!("Flushed memtable into table {id}");

        Ok(())
    }
}

use crate::{
    config::Config,
    flush::FlushMessage,
    manifest::Manifest,
    memtable::MemTable,
    segment::Segment,
    seqno::SequenceNumberCounter,
    value::SeqNo,
    wal::Wal,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc, Mutex, RwLock,
    },
    thread::JoinHandle,
};

/// A memtable that has been rotated out and awaits flushing
pub struct SealedMemtable {
    pub memtable: Arc<MemTable>,

    /// Highest seqno contained in the memtable; once the flush is durable,
    /// the WAL may discard everything up to here
    pub checkpoint_seqno: SeqNo,
}

/// The manifest plus an open reader per live table
///
/// Kept under one lock so lookups always see a manifest row together
/// with its reader.
pub struct SstableState {
    pub manifest: Manifest,
    pub readers: HashMap<u64, Arc<Segment>>,
}

pub struct EngineInner {
    /// Engine configuration
    pub config: Config,

    /// Serializes seqno assignment, WAL enqueue and memtable insert/swap;
    /// held for microseconds, never across an fsync
    pub(crate) write_lock: Mutex<()>,

    pub(crate) seqno: SequenceNumberCounter,

    /// Active memtable that is being written to
    pub(crate) active_memtable: Arc<RwLock<Arc<MemTable>>>,

    /// Rotated memtables that await flushing, oldest first
    pub(crate) sealed_memtables: Arc<RwLock<VecDeque<SealedMemtable>>>,

    /// Live tables and their readers
    pub(crate) state: Arc<RwLock<SstableState>>,

    pub(crate) wal: Arc<Wal>,

    pub(crate) flush_tx: Sender<FlushMessage>,
    pub(crate) flush_thread: Mutex<Option<JoinHandle<()>>>,

    pub(crate) closed: AtomicBool,

    /// Set after a failed publication; writes are refused until reopen
    pub(crate) poisoned: Arc<AtomicBool>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        log::debug!("Dropping engine without close(), draining workers");

        let _ = self.flush_tx.send(FlushMessage::Shutdown);

        if let Some(thread) = self.flush_thread.lock().expect("lock is poisoned").take() {
            if thread.join().is_err() {
                log::error!("Flush thread panicked");
            }
        }

        self.wal.close();
    }
}

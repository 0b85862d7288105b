use crate::{
    compaction::{do_compaction, Options as CompactionOptions},
    config::Config,
    engine_inner::{EngineInner, SealedMemtable, SstableState},
    file::{temp_sibling, MANIFEST_FILE, SSTABLES_FOLDER, TEMP_EXT, WAL_FOLDER},
    flush::{FlushMessage, FlushTask},
    manifest::Manifest,
    memtable::MemTable,
    segment::Segment,
    seqno::SequenceNumberCounter,
    value::{UserValue, ValueType},
    wal::Wal,
    Value,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, SyncSender},
        Arc, Mutex, RwLock,
    },
};

fn ignore_tombstone_value(item: Value) -> Option<Value> {
    if item.is_tombstone() {
        None
    } else {
        Some(item)
    }
}

/// An embedded, ordered key-value store
///
/// Writes go through the write-ahead log first, so an acknowledged `put`
/// or `delete` survives a crash. Reads resolve sources in strict recency
/// order: active memtable, sealed memtables (newest first), then the
/// tables the manifest points at.
///
/// The engine is cheap to clone and safe for concurrent readers with a
/// single logical writer.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl std::ops::Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Engine {
    /// Opens a store in the given directory.
    ///
    /// Creates the directory structure if absent, replays the WAL into a
    /// fresh memtable and opens a reader for every table the manifest
    /// references.
    ///
    /// # Errors
    ///
    /// Will return `Err` on I/O errors, or if a referenced table or the
    /// manifest is corrupt beyond recovery.
    pub fn open(config: Config) -> crate::Result<Self> {
        log::info!("Opening store at {}", config.path.display());

        let sstables_folder = config.path.join(SSTABLES_FOLDER);

        std::fs::create_dir_all(&config.path)?;
        std::fs::create_dir_all(&sstables_folder)?;

        // Sweep partial files of a previous run
        let manifest_path = config.path.join(MANIFEST_FILE);
        let manifest_temp = temp_sibling(&manifest_path);

        if manifest_temp.try_exists()? {
            log::debug!("Unlinking leftover {}", manifest_temp.display());
            std::fs::remove_file(&manifest_temp)?;
        }

        let mut has_sstables = false;

        for dirent in std::fs::read_dir(&sstables_folder)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();

            if name.ends_with(TEMP_EXT) {
                log::debug!("Unlinking leftover {name}");
                std::fs::remove_file(dirent.path())?;
            } else if crate::file::parse_sstable_file_name(&name).is_some() {
                has_sstables = true;
            }
        }

        let manifest = if manifest_path.try_exists()? {
            match Manifest::load(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e @ crate::Error::Corruption(_)) => {
                    log::warn!("Manifest unreadable ({e:?})");
                    Manifest::recover(&config.path)?
                }
                Err(e) => return Err(e),
            }
        } else if has_sstables {
            Manifest::recover(&config.path)?
        } else {
            Manifest::create_new(&manifest_path)?
        };

        // A crashed compaction may have left complete but never published
        // tables behind; they are not referenced, so they go
        for dirent in std::fs::read_dir(&sstables_folder)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();

            if let Some(id) = crate::file::parse_sstable_file_name(&name) {
                if !manifest.sstables().iter().any(|meta| meta.id == id) {
                    log::debug!("Unlinking unreferenced table {name}");
                    std::fs::remove_file(dirent.path())?;
                }
            }
        }

        // Open a reader per live table; corruption here fails the open
        // loudly instead of silently dropping user data
        let mut readers = HashMap::with_capacity(manifest.len());

        for meta in manifest.sstables() {
            let segment = Segment::open(sstables_folder.join(&meta.filename), meta.clone())?;
            readers.insert(meta.id, Arc::new(segment));
        }

        // Replay the WAL into a fresh memtable
        let (wal, entries) = Wal::recover(config.path.join(WAL_FOLDER))?;

        let memtable = MemTable::default();
        let mut wal_max_seqno = 0;

        for item in entries {
            wal_max_seqno = wal_max_seqno.max(item.seqno);
            memtable.insert(item);
        }

        log::info!(
            "Recovered {} live memtable item(s), {} table(s)",
            memtable.len(),
            manifest.len()
        );

        // Resume above everything ever written, so seqnos are never reused
        let seqno = SequenceNumberCounter::new(wal_max_seqno.max(manifest.max_seqno()));

        let state = Arc::new(RwLock::new(SstableState { manifest, readers }));
        let sealed_memtables = Arc::new(RwLock::new(VecDeque::new()));
        let wal = Arc::new(wal);
        let poisoned = Arc::new(AtomicBool::new(false));

        let (flush_tx, flush_rx) = std::sync::mpsc::channel();

        let flush_worker = crate::flush::FlushWorker {
            rx: flush_rx,
            state: state.clone(),
            sealed_memtables: sealed_memtables.clone(),
            wal: wal.clone(),
            sstables_folder,
            block_size: config.block_size,
            bloom_fp_rate: config.bloom_fp_rate,
            poisoned: poisoned.clone(),
        };

        let flush_thread = std::thread::spawn(move || flush_worker.run());

        Ok(Self(Arc::new(EngineInner {
            config,
            write_lock: Mutex::new(()),
            seqno,
            active_memtable: Arc::new(RwLock::new(Arc::new(memtable))),
            sealed_memtables,
            state,
            wal,
            flush_tx,
            flush_thread: Mutex::new(Some(flush_thread)),
            closed: AtomicBool::new(false),
            poisoned,
        })))
    }

    /// Inserts a key-value pair.
    ///
    /// Returns once the write is durable (its WAL batch has been fsynced).
    ///
    /// # Errors
    ///
    /// Will return `InvalidArgument` if the key is empty or longer than
    /// 65535 bytes, or the value is larger than 2^32 - 1 bytes.
    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> crate::Result<()> {
        validate_key(key.as_ref())?;
        validate_value(value.as_ref())?;

        self.append_entry(key.as_ref(), value.as_ref(), ValueType::Value)
    }

    /// Removes a key, writing a tombstone.
    ///
    /// Returns once the write is durable.
    ///
    /// # Errors
    ///
    /// Will return `InvalidArgument` for the same key constraints as
    /// [`Engine::put`].
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<()> {
        validate_key(key.as_ref())?;

        self.append_entry(key.as_ref(), &[], ValueType::Tombstone)
    }

    /// Retrieves the latest value for a key.
    ///
    /// Returns `None` for absent keys and observed tombstones.
    ///
    /// # Errors
    ///
    /// Will return `Err` on I/O errors or if a table block fails its
    /// integrity check; the store stays operable.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::Error::Closed);
        }

        let key = key.as_ref();

        {
            let memtable = self.active_memtable.read().expect("lock is poisoned");

            if let Some(item) = memtable.get(key) {
                return Ok(ignore_tombstone_value(item).map(|item| item.value));
            }
        }

        {
            let sealed = self.sealed_memtables.read().expect("lock is poisoned");

            for entry in sealed.iter().rev() {
                if let Some(item) = entry.memtable.get(key) {
                    return Ok(ignore_tombstone_value(item).map(|item| item.value));
                }
            }
        }

        // Table lookups may involve disk I/O
        let state = self.state.read().expect("lock is poisoned");

        for meta in state.manifest.candidates_for(key) {
            let segment = state.readers.get(&meta.id).ok_or_else(|| {
                crate::Error::Internal(format!("no open reader for table {}", meta.id))
            })?;

            if let Some(item) = segment.get(key)? {
                return Ok(ignore_tombstone_value(item).map(|item| item.value));
            }
        }

        Ok(None)
    }

    /// Synchronously flushes the active memtable into a level-0 table.
    ///
    /// The flush is routed through the regular flush thread, so ordering
    /// with previously rotated memtables is preserved. Does nothing if
    /// the active memtable is empty.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the flush fails.
    pub fn flush_active_memtable(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::Error::Closed);
        }

        let (ack_tx, ack_rx) = sync_channel(1);

        let rotated = {
            let _guard = self.write_lock.lock().expect("lock is poisoned");

            if self.closed.load(Ordering::Acquire) {
                return Err(crate::Error::Closed);
            }

            self.rotate_memtable_locked(Some(ack_tx))?
        };

        if rotated {
            ack_rx
                .recv()
                .map_err(|_| crate::Error::Internal("flush thread died".into()))?
        } else {
            Ok(())
        }
    }

    /// Merges the given tables into `target_level`.
    ///
    /// Inputs are deduplicated (the highest seqno per key wins); if the
    /// target level is the bottommost, shadowing tombstones are dropped.
    /// Inputs are unlinked only after the manifest swap is durable.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an input table is unknown or an I/O error
    /// occurs.
    pub fn compact(&self, input_ids: &[u64], target_level: u8) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::Error::Closed);
        }

        do_compaction(&CompactionOptions {
            state: self.state.clone(),
            sstables_folder: self.config.path.join(SSTABLES_FOLDER),
            block_size: self.config.block_size,
            bloom_fp_rate: self.config.bloom_fp_rate,
            target_sstable_size: self.config.target_sstable_size,
            input_ids: input_ids.to_vec(),
            target_level,
        })
    }

    /// Returns the IDs of all live tables at the given level
    #[must_use]
    pub fn sstables_at_level(&self, level: u8) -> Vec<u64> {
        let state = self.state.read().expect("lock is poisoned");

        state
            .manifest
            .sstables()
            .iter()
            .filter(|meta| meta.level == level)
            .map(|meta| meta.id)
            .collect()
    }

    /// Returns the number of live tables
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.state.read().expect("lock is poisoned").manifest.len()
    }

    /// Drains both worker queues, making everything enqueued durable,
    /// then stops the workers and closes the store.
    ///
    /// Subsequent operations fail with `Closed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for sync errors.
    pub fn close(&self) -> crate::Result<()> {
        // Serializes with writers so no record lands behind the sentinels
        let _guard = self.write_lock.lock().expect("lock is poisoned");

        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log::info!("Closing store at {}", self.config.path.display());

        let _ = self.flush_tx.send(FlushMessage::Shutdown);

        if let Some(thread) = self.flush_thread.lock().expect("lock is poisoned").take() {
            if thread.join().is_err() {
                log::error!("Flush thread panicked");
            }
        }

        self.wal.close();

        Ok(())
    }

    fn append_entry(&self, key: &[u8], value: &[u8], value_type: ValueType) -> crate::Result<()> {
        let ack = {
            let _guard = self.write_lock.lock().expect("lock is poisoned");

            if self.closed.load(Ordering::Acquire) {
                return Err(crate::Error::Closed);
            }

            if self.poisoned.load(Ordering::Acquire) {
                return Err(crate::Error::Io(std::io::Error::other(
                    "store is poisoned by an earlier publication failure; reopen it",
                )));
            }

            let seqno = self.seqno.next();
            let item = Value::new(key, value, seqno, value_type);

            let ack = self.wal.append(&item)?;

            let memtable = self.active_memtable.read().expect("lock is poisoned");
            memtable.insert(item);
            let should_rotate = memtable.is_full(self.config.max_memtable_size);
            drop(memtable);

            if should_rotate {
                self.rotate_memtable_locked(None)?;
            }

            ack
        };

        // The engine lock is released; now wait for the group commit
        ack.recv()
            .map_err(|_| crate::Error::Internal("wal writer thread died".into()))?
    }

    /// Swaps the active memtable for a fresh one and hands the retired
    /// store to the flush thread.
    ///
    /// Must be called with the engine write lock held; only the swap
    /// itself takes the memtable lock.
    fn rotate_memtable_locked(
        &self,
        ack: Option<SyncSender<crate::Result<()>>>,
    ) -> crate::Result<bool> {
        let mut active = self.active_memtable.write().expect("lock is poisoned");

        if active.is_empty() {
            return Ok(false);
        }

        let retired = std::mem::take(&mut *active);
        drop(active);

        let checkpoint_seqno = retired.highest_seqno();

        log::debug!(
            "Rotating memtable with {} item(s), checkpoint seqno {checkpoint_seqno}",
            retired.len()
        );

        self.sealed_memtables
            .write()
            .expect("lock is poisoned")
            .push_back(SealedMemtable {
                memtable: retired.clone(),
                checkpoint_seqno,
            });

        // Subsequent records go to a fresh WAL segment, so the old one
        // can be unlinked once the flush checkpoint is durable
        self.wal.rotate();

        self.flush_tx
            .send(FlushMessage::Task(FlushTask {
                memtable: retired,
                checkpoint_seqno,
                ack,
            }))
            .map_err(|_| crate::Error::Internal("flush thread died".into()))?;

        Ok(true)
    }
}

fn validate_key(key: &[u8]) -> crate::Result<()> {
    if key.is_empty() {
        return Err(crate::Error::InvalidArgument("key is empty"));
    }

    if key.len() > u16::MAX.into() {
        return Err(crate::Error::InvalidArgument("key is longer than 65535 bytes"));
    }

    Ok(())
}

fn validate_value(value: &[u8]) -> crate::Result<()> {
    if u32::try_from(value.len()).is_err() {
        return Err(crate::Error::InvalidArgument(
            "value is larger than 2^32 - 1 bytes",
        ));
    }

    Ok(())
}

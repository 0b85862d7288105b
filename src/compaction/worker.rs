use crate::{
    engine_inner::SstableState,
    file::fsync_directory,
    merge::MergeIterator,
    segment::{
        meta::Metadata,
        writer::{Options as WriterOptions, Writer},
        Segment,
    },
    serde::DeserializeError,
};
use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

/// Compaction options
pub struct Options {
    /// Live tables and their readers
    pub state: Arc<RwLock<SstableState>>,

    /// Folder the tables live in
    pub sstables_folder: PathBuf,

    /// Maximum decompressed size of a data block
    pub block_size: u32,

    /// Bloom filter false positive rate of output tables
    pub bloom_fp_rate: f32,

    /// Target size of output tables; a larger merge produces
    /// a run of several outputs
    pub target_sstable_size: u64,

    /// Tables to merge
    pub input_ids: Vec<u64>,

    /// Level the outputs are written at
    pub target_level: u8,
}

/// Runs a compaction, blocking the caller until it is done.
///
/// The merged outputs are written through the normal table writer, then
/// published with a single atomic manifest swap; the input files are
/// unlinked only after that swap is durable.
pub fn do_compaction(opts: &Options) -> crate::Result<()> {
    if opts.input_ids.is_empty() {
        return Err(crate::Error::InvalidArgument("no input tables given"));
    }

    let (inputs, evict_tombstones) = {
        let state = opts.state.read().expect("lock is poisoned");

        let inputs = opts
            .input_ids
            .iter()
            .map(|id| {
                state
                    .readers
                    .get(id)
                    .cloned()
                    .ok_or(crate::Error::InvalidArgument("unknown table id"))
            })
            .collect::<crate::Result<Vec<Arc<Segment>>>>()?;

        // Dropping a tombstone is only sound once nothing older can
        // hide beneath it
        let evict_tombstones = state
            .manifest
            .is_bottommost_level(opts.target_level, &opts.input_ids);

        (inputs, evict_tombstones)
    };

    log::debug!(
        "Compacting {} table(s) into level {} (evict tombstones: {evict_tombstones})",
        inputs.len(),
        opts.target_level,
    );

    let start = Instant::now();

    let merge_iter = MergeIterator::from_segments(&inputs)?.evict_old_versions(true);

    let mut created: Vec<Metadata> = Vec::new();
    let mut writer: Option<Writer> = None;

    for item in merge_iter {
        let item = item?;

        let mut current = match writer.take() {
            Some(writer) => writer,
            None => {
                let id = {
                    let mut state = opts.state.write().expect("lock is poisoned");
                    state.manifest.allocate_id()
                };

                Writer::new(WriterOptions {
                    folder: opts.sstables_folder.clone(),
                    id,
                    level: opts.target_level,
                    block_size: opts.block_size,
                    bloom_fp_rate: opts.bloom_fp_rate,
                    evict_tombstones,
                })?
            }
        };

        current.write(item)?;

        if current.file_pos >= opts.target_sstable_size {
            created.extend(current.finish()?);
        } else {
            writer = Some(current);
        }
    }

    if let Some(current) = writer {
        created.extend(current.finish()?);
    }

    let new_segments = created
        .iter()
        .map(|meta| {
            Ok(Arc::new(Segment::open(
                opts.sstables_folder.join(&meta.filename),
                meta.clone(),
            )?))
        })
        .collect::<crate::Result<Vec<_>>>()?;

    {
        let mut state = opts.state.write().expect("lock is poisoned");

        // Check that no input vanished while we merged; with an external
        // scheduler two overlapping compactions would be a caller bug
        for id in &opts.input_ids {
            if !state.readers.contains_key(id) {
                return Err(DeserializeError::InvalidStructure(
                    "compaction input vanished during merge",
                )
                .into());
            }
        }

        state.manifest.swap(&opts.input_ids, created.clone())?;

        for segment in &new_segments {
            state.readers.insert(segment.metadata.id, segment.clone());
        }

        for id in &opts.input_ids {
            state.readers.remove(id);
        }
    }

    // The manifest no longer references the inputs, so they can go
    for input in &inputs {
        let path = opts.sstables_folder.join(&input.metadata.filename);

        log::trace!("Unlinking compacted table {}", path.display());

        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to unlink compacted table: {e:?}");
        }
    }

    if let Err(e) = fsync_directory(&opts.sstables_folder) {
        log::warn!("Failed to fsync sstables folder after compaction: {e:?}");
    }

    log::debug!(
        "Compacted {} table(s) into {} output(s) in {}ms",
        inputs.len(),
        created.len(),
        start.elapsed().as_millis()
    );

    Ok(())
}

use crate::{
    file::{
        fsync_directory, parse_sstable_file_name, rewrite_atomic, MANIFEST_FILE, SSTABLES_FOLDER,
        TEMP_EXT,
    },
    segment::{meta::Metadata, Segment},
    version::Version,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Serialized manifest document
#[derive(Serialize, Deserialize)]
struct Document {
    version: u32,
    next_sstable_id: u64,
    sstables: Vec<Metadata>,
}

/// The authoritative list of live SSTables
///
/// A table file is live iff its metadata appears here; temp files are
/// never referenced. Every update rewrites the whole file atomically
/// (temp sibling + fsync + rename + directory fsync): manifest changes are
/// rare and the document is small, so a rewrite is simpler to reason about
/// than a log.
pub struct Manifest {
    path: PathBuf,

    next_sstable_id: u64,
    sstables: Vec<Metadata>,

    /// Derived view: tables per level, level 0 sorted newest-first,
    /// deeper levels sorted by min_key
    levels: BTreeMap<u8, Vec<Metadata>>,
}

impl Manifest {
    /// Creates a fresh manifest and persists it immediately
    pub fn create_new<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let mut manifest = Self {
            path: path.as_ref().to_path_buf(),
            next_sstable_id: 1,
            sstables: Vec::new(),
            levels: BTreeMap::new(),
        };
        manifest.save()?;

        Ok(manifest)
    }

    /// Loads the manifest from disk
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let json = std::fs::read_to_string(&path)?;

        let document: Document = serde_json::from_str(&json).map_err(|e| {
            log::error!("Manifest parse error: {e}");
            crate::Error::Corruption(crate::serde::DeserializeError::InvalidStructure(
                "manifest is not valid JSON",
            ))
        })?;

        if Version::try_from(document.version).is_err() {
            return Err(crate::Error::UnsupportedVersion(None));
        }

        let mut manifest = Self {
            path: path.as_ref().to_path_buf(),
            next_sstable_id: document.next_sstable_id,
            sstables: document.sstables,
            levels: BTreeMap::new(),
        };
        manifest.rebuild_levels();

        log::debug!(
            "Loaded manifest with {} live table(s)",
            manifest.sstables.len()
        );

        Ok(manifest)
    }

    /// Rebuilds the manifest by scanning the sstables folder.
    ///
    /// Used when the manifest file is missing or unreadable. Stray `.tmp`
    /// files are unlinked; a successful recovery immediately rewrites a
    /// valid manifest.
    pub fn recover<P: AsRef<Path>>(root: P) -> crate::Result<Self> {
        let root = root.as_ref();
        let folder = root.join(SSTABLES_FOLDER);

        log::warn!(
            "Manifest missing or unreadable, rebuilding from {}",
            folder.display()
        );

        let mut sstables = Vec::new();

        if folder.try_exists()? {
            for dirent in std::fs::read_dir(&folder)? {
                let dirent = dirent?;
                let file_name = dirent.file_name().to_string_lossy().into_owned();

                if file_name.ends_with(TEMP_EXT) {
                    log::debug!("Unlinking partial file {file_name}");
                    std::fs::remove_file(dirent.path())?;
                    continue;
                }

                let Some(id) = parse_sstable_file_name(&file_name) else {
                    continue;
                };

                sstables.push(Segment::recover_metadata(dirent.path(), id)?);
            }

            fsync_directory(&folder)?;
        }

        let next_sstable_id = sstables.iter().map(|meta| meta.id).max().map_or(1, |id| id + 1);

        let mut manifest = Self {
            path: root.join(MANIFEST_FILE),
            next_sstable_id,
            sstables,
            levels: BTreeMap::new(),
        };
        manifest.rebuild_levels();
        manifest.save()?;

        log::info!(
            "Rebuilt manifest with {} live table(s)",
            manifest.sstables.len()
        );

        Ok(manifest)
    }

    fn rebuild_levels(&mut self) {
        self.levels.clear();

        for meta in &self.sstables {
            self.levels
                .entry(meta.level)
                .or_default()
                .push(meta.clone());
        }

        for (level, tables) in &mut self.levels {
            if *level == 0 {
                // Level 0 tables may overlap; lookups go newest-first
                tables.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            } else {
                // Deeper levels are non-overlapping and sorted by key range
                tables.sort_by(|a, b| a.min_key.cmp(&b.min_key));
            }
        }
    }

    fn save(&mut self) -> crate::Result<()> {
        log::trace!("Writing manifest to {}", self.path.display());

        let document = Document {
            version: Version::V1.into(),
            next_sstable_id: self.next_sstable_id,
            sstables: self.sstables.clone(),
        };

        // NOTE: Serialization can't fail here
        #[allow(clippy::expect_used)]
        let json = serde_json::to_string_pretty(&document).expect("should serialize");

        rewrite_atomic(&self.path, json.as_bytes())?;

        Ok(())
    }

    /// Allocates a fresh SSTable ID.
    ///
    /// The bumped counter is persisted alongside the next save.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_sstable_id;
        self.next_sstable_id += 1;
        id
    }

    /// Registers a new table and persists the manifest
    pub fn add_sstable(&mut self, meta: Metadata) -> crate::Result<()> {
        self.sstables.push(meta);
        self.rebuild_levels();
        self.save()
    }

    /// Removes tables and persists the manifest
    pub fn remove_sstables(&mut self, ids: &[u64]) -> crate::Result<()> {
        self.sstables.retain(|meta| !ids.contains(&meta.id));
        self.rebuild_levels();
        self.save()
    }

    /// Removes and adds tables in a single atomic rewrite
    pub fn swap(&mut self, removed_ids: &[u64], added: Vec<Metadata>) -> crate::Result<()> {
        self.sstables.retain(|meta| !removed_ids.contains(&meta.id));
        self.sstables.extend(added);
        self.rebuild_levels();
        self.save()
    }

    /// Returns the metadata of all live tables
    #[must_use]
    pub fn sstables(&self) -> &[Metadata] {
        &self.sstables
    }

    /// Returns the number of live tables
    #[must_use]
    pub fn len(&self) -> usize {
        self.sstables.len()
    }

    /// Returns `true` if no tables are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sstables.is_empty()
    }

    /// Returns the highest seqno across all live tables
    #[must_use]
    pub fn max_seqno(&self) -> u64 {
        self.sstables
            .iter()
            .map(|meta| meta.max_seqno)
            .max()
            .unwrap_or(0)
    }

    /// Returns `true` if no live table (except the given ones) sits
    /// below the level
    #[must_use]
    pub fn is_bottommost_level(&self, level: u8, excluded_ids: &[u64]) -> bool {
        !self
            .sstables
            .iter()
            .filter(|meta| !excluded_ids.contains(&meta.id))
            .any(|meta| meta.level > level)
    }

    /// Returns the candidate tables for a key, in lookup order:
    /// every level-0 table newest-first, then per deeper level the unique
    /// table whose key range contains the key (found by binary search).
    #[must_use]
    pub fn candidates_for(&self, key: &[u8]) -> Vec<&Metadata> {
        let mut candidates = Vec::new();

        for (level, tables) in &self.levels {
            if *level == 0 {
                candidates.extend(tables.iter().filter(|meta| meta.key_range_contains(key)));
            } else {
                let idx = tables.partition_point(|meta| &*meta.min_key <= key);

                if idx > 0 {
                    let meta = &tables[idx - 1];

                    if meta.key_range_contains(key) {
                        candidates.push(meta);
                    }
                }
            }
        }

        candidates
    }
}

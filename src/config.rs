use crate::Engine;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Data directory path
    pub path: PathBuf,

    /// Maximum decompressed size of a data block
    pub block_size: u32,

    /// Size budget of the active memtable; exceeding it triggers rotation
    pub max_memtable_size: u32,

    /// False positive rate of table bloom filters
    pub bloom_fp_rate: f32,

    /// Target size of tables produced by compaction
    pub target_sstable_size: u64,
}

const DEFAULT_FILE_FOLDER: &str = ".segmentdb.data";

impl Default for Config {
    fn default() -> Self {
        Self {
            path: DEFAULT_FILE_FOLDER.into(),
            block_size: 4_096,
            max_memtable_size: 4 * 1_024 * 1_024,
            bloom_fp_rate: 0.01,
            target_sstable_size: 64 * 1_024 * 1_024,
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets the block size.
    ///
    /// Defaults to 4 KiB (4096 bytes).
    ///
    /// # Panics
    ///
    /// Panics if the block size is smaller than 1 KiB (1024 bytes).
    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        assert!(block_size >= 1_024);

        self.block_size = block_size;
        self
    }

    /// Sets the maximum size of the active memtable.
    ///
    /// Defaults to 4 MiB.
    #[must_use]
    pub fn max_memtable_size(mut self, bytes: u32) -> Self {
        self.max_memtable_size = bytes;
        self
    }

    /// Sets the bloom filter false positive rate.
    ///
    /// Defaults to 1%.
    ///
    /// # Panics
    ///
    /// Panics if the rate is not between 0 and 1.
    #[must_use]
    pub fn bloom_fp_rate(mut self, rate: f32) -> Self {
        assert!(rate > 0.0 && rate < 1.0);

        self.bloom_fp_rate = rate;
        self
    }

    /// Sets the target size of tables produced by compaction.
    ///
    /// Defaults to 64 MiB.
    #[must_use]
    pub fn target_sstable_size(mut self, bytes: u64) -> Self {
        self.target_sstable_size = bytes;
        self
    }

    /// Opens an engine using the config.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(self) -> crate::Result<Engine> {
        Engine::open(self)
    }
}

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

pub const MANIFEST_FILE: &str = "MANIFEST";
pub const WAL_FOLDER: &str = "wal";
pub const SSTABLES_FOLDER: &str = "sstables";

pub const SSTABLE_EXT: &str = "sst";
pub const TEMP_EXT: &str = "tmp";

/// Formats the file name of an SSTable, e.g. `sst-000042.sst`
#[must_use]
pub fn sstable_file_name(id: u64) -> String {
    format!("sst-{id:06}.{SSTABLE_EXT}")
}

/// Formats the file name of a WAL segment, e.g. `wal-000001.log`
#[must_use]
pub fn wal_file_name(number: u64) -> String {
    format!("wal-{number:06}.log")
}

/// Parses an SSTable id back out of its file name
#[must_use]
pub fn parse_sstable_file_name(name: &str) -> Option<u64> {
    let id = name.strip_prefix("sst-")?.strip_suffix(".sst")?;
    id.parse().ok()
}

/// Parses a WAL segment number back out of its file name
#[must_use]
pub fn parse_wal_file_name(name: &str) -> Option<u64> {
    let number = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    number.parse().ok()
}

/// Swaps the extension of a path for `.tmp`
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    path.with_extension(TEMP_EXT)
}

/// Unix timestamp in seconds, used for `created_at` stamps
///
/// A clock before the epoch collapses to 0 rather than failing;
/// level-0 ordering falls back to table IDs when stamps tie.
#[must_use]
pub fn unix_timestamp_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Fsyncs a directory, making a previous rename or file creation durable
pub fn fsync_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

/// Atomically rewrites a file
///
/// The content is first written to a `.tmp` sibling which is fsynced and
/// then renamed over the destination; finally the containing directory is
/// fsynced so the rename itself is durable.
pub fn rewrite_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let folder = path.parent().expect("should have parent folder");
    let temp_path = temp_sibling(path);

    {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)?;

    fsync_directory(folder)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn atomic_rewrite() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("test.txt");
        {
            let mut file = File::create(&path)?;
            write!(file, "asdasdasdasdasd")?;
        }

        rewrite_atomic(&path, b"newcontent")?;

        let content = std::fs::read_to_string(&path)?;
        assert_eq!("newcontent", content);

        Ok(())
    }

    #[test]
    fn file_name_round_trip() {
        assert_eq!("sst-000042.sst", sstable_file_name(42));
        assert_eq!(Some(42), parse_sstable_file_name("sst-000042.sst"));
        assert_eq!(None, parse_sstable_file_name("sst-000042.tmp"));

        assert_eq!("wal-000001.log", wal_file_name(1));
        assert_eq!(Some(1), parse_wal_file_name("wal-000001.log"));
        assert_eq!(None, parse_wal_file_name("MANIFEST"));
    }
}

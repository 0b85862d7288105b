use segment_db::Config;
use test_log::test;

fn last_wal_segment(folder: &std::path::Path) -> std::path::PathBuf {
    let mut segments = std::fs::read_dir(folder.join("wal"))
        .expect("wal folder should exist")
        .map(|dirent| dirent.expect("should read dirent").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
        .collect::<Vec<_>>();

    segments.sort();
    segments.pop().expect("should have at least one segment")
}

#[test]
fn torn_wal_tail_replays_prefix() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(folder.path()).open()?;
        db.put("a", "1")?;
        db.put("b", "2")?;
        db.put("c", "3")?;
        db.close()?;
    }

    // Corrupt the last byte of the final WAL segment: the final record's
    // CRC no longer matches
    {
        let path = last_wal_segment(folder.path());
        let mut bytes = std::fs::read(&path)?;
        let idx = bytes.len() - 1;
        bytes[idx] ^= 0xFF;
        std::fs::write(&path, bytes)?;
    }

    {
        let db = Config::new(folder.path()).open()?;

        // Every record before the damaged one is intact
        assert_eq!(Some("1".as_bytes().into()), db.get("a")?);
        assert_eq!(Some("2".as_bytes().into()), db.get("b")?);

        // The damaged record is treated as never written
        assert_eq!(None, db.get("c")?);

        db.close()?;
    }

    Ok(())
}

#[test]
fn garbage_appended_to_wal_is_ignored() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(folder.path()).open()?;
        db.put("a", "1")?;
        db.put("b", "2")?;
        db.close()?;
    }

    {
        let path = last_wal_segment(folder.path());
        let mut bytes = std::fs::read(&path)?;
        bytes.extend_from_slice(b"09pmu35w3a9mp53bao9upw3ab5up");
        std::fs::write(&path, bytes)?;
    }

    {
        let db = Config::new(folder.path()).open()?;

        assert_eq!(Some("1".as_bytes().into()), db.get("a")?);
        assert_eq!(Some("2".as_bytes().into()), db.get("b")?);

        db.close()?;
    }

    Ok(())
}

#[test]
fn writes_keep_working_after_torn_tail_recovery() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(folder.path()).open()?;
        db.put("a", "1")?;
        db.put("b", "2")?;
        db.close()?;
    }

    {
        let path = last_wal_segment(folder.path());
        let mut bytes = std::fs::read(&path)?;
        let idx = bytes.len() - 1;
        bytes[idx] ^= 0xFF;
        std::fs::write(&path, bytes)?;
    }

    {
        let db = Config::new(folder.path()).open()?;
        db.put("c", "3")?;
        db.close()?;
    }

    {
        let db = Config::new(folder.path()).open()?;
        assert_eq!(Some("1".as_bytes().into()), db.get("a")?);
        assert_eq!(Some("3".as_bytes().into()), db.get("c")?);
        db.close()?;
    }

    Ok(())
}

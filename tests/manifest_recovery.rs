use segment_db::Config;
use test_log::test;

fn populate(folder: &std::path::Path) -> segment_db::Result<()> {
    let db = Config::new(folder).open()?;

    for i in 0..500u64 {
        db.put(format!("key-{i:06}"), format!("value-{i}"))?;
    }
    db.flush_active_memtable()?;

    for i in 500..1_000u64 {
        db.put(format!("key-{i:06}"), format!("value-{i}"))?;
    }
    db.flush_active_memtable()?;

    db.close()
}

fn verify(folder: &std::path::Path) -> segment_db::Result<()> {
    let db = Config::new(folder).open()?;

    assert_eq!(2, db.sstable_count());

    for i in 0..1_000u64 {
        assert_eq!(
            Some(format!("value-{i}").as_bytes().into()),
            db.get(format!("key-{i:06}"))?
        );
    }

    db.close()
}

#[test]
fn missing_manifest_is_rebuilt_by_scanning() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    populate(folder.path())?;

    std::fs::remove_file(folder.path().join("MANIFEST"))?;

    verify(folder.path())?;

    // The rebuilt manifest must persist
    assert!(folder.path().join("MANIFEST").try_exists()?);
    verify(folder.path())?;

    Ok(())
}

#[test]
fn unparseable_manifest_is_rebuilt_by_scanning() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    populate(folder.path())?;

    std::fs::write(folder.path().join("MANIFEST"), b"{ not json ")?;

    verify(folder.path())?;

    Ok(())
}

#[test]
fn stray_temp_files_are_unlinked_at_open() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    populate(folder.path())?;

    let stray_sst = folder.path().join("sstables").join("sst-000099.tmp");
    std::fs::write(&stray_sst, b"partial table write")?;

    let stray_manifest = folder.path().join("MANIFEST.tmp");
    std::fs::write(&stray_manifest, b"partial manifest write")?;

    verify(folder.path())?;

    assert!(!stray_sst.try_exists()?);
    assert!(!stray_manifest.try_exists()?);

    Ok(())
}

#[test]
fn no_temp_files_survive_clean_shutdown() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    populate(folder.path())?;

    let mut temp_files = Vec::new();

    for dir in [folder.path().to_path_buf(), folder.path().join("sstables")] {
        for dirent in std::fs::read_dir(dir)? {
            let path = dirent?.path();

            if path.extension().is_some_and(|ext| ext == "tmp") {
                temp_files.push(path);
            }
        }
    }

    assert!(temp_files.is_empty(), "leftover temp files: {temp_files:?}");

    Ok(())
}

#[test]
fn corrupt_sstable_fails_open_loudly() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    populate(folder.path())?;

    // Chop the footer off the first table
    let table = std::fs::read_dir(folder.path().join("sstables"))?
        .map(|dirent| dirent.expect("should read dirent").path())
        .find(|path| path.extension().is_some_and(|ext| ext == "sst"))
        .expect("should have a table");

    let bytes = std::fs::read(&table)?;
    std::fs::write(&table, &bytes[..bytes.len() - 16])?;

    assert!(
        Config::new(folder.path()).open().is_err(),
        "opening with a corrupt referenced table must fail, not drop data"
    );

    Ok(())
}

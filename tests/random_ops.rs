use rand::{rngs::StdRng, Rng, SeedableRng};
use segment_db::Config;
use std::collections::BTreeMap;
use test_log::test;

/// Replays a random sequence of puts and deletes and checks every key
/// against a model, before and after a reopen.
#[test]
fn random_ops_match_model() -> segment_db::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut rng = StdRng::seed_from_u64(0xDEAD_BEEF);
    let mut model = BTreeMap::<Vec<u8>, Option<Vec<u8>>>::new();

    {
        let db = Config::new(&folder).max_memtable_size(8 * 1_024).open()?;

        for _ in 0..2_000 {
            let key = format!("key-{:03}", rng.gen_range(0..250u32)).into_bytes();

            if rng.gen_bool(0.25) {
                db.delete(&key)?;
                model.insert(key, None);
            } else {
                let value = format!("value-{}", rng.gen::<u64>()).into_bytes();
                db.put(&key, &value)?;
                model.insert(key, Some(value));
            }
        }

        for (key, expected) in &model {
            assert_eq!(
                expected.as_ref().map(|v| v.as_slice().into()),
                db.get(key)?,
                "mismatch for {}",
                String::from_utf8_lossy(key)
            );
        }

        db.close()?;
    }

    // The same state must come back after a reopen, whether a key now
    // lives in the memtable, a flushed table, or behind a tombstone
    {
        let db = Config::new(&folder).open()?;

        for (key, expected) in &model {
            assert_eq!(
                expected.as_ref().map(|v| v.as_slice().into()),
                db.get(key)?,
                "mismatch for {} after reopen",
                String::from_utf8_lossy(key)
            );
        }

        db.close()?;
    }

    Ok(())
}

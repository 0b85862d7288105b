use crate::value::{SeqNo, UserKey};
use serde::{Deserialize, Serialize};

mod base64_key {
    use crate::value::UserKey;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &UserKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UserKey, D::Error> {
        let string = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(string).map_err(serde::de::Error::custom)?;
        Ok(bytes.into())
    }
}

/// Metadata of an SSTable, as stored in the manifest
///
/// Keys are stored base64-encoded so the manifest stays valid JSON.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique table ID, allocated by the manifest
    pub id: u64,

    /// File name inside the sstables folder (e.g. `sst-000001.sst`)
    pub filename: String,

    /// Level in the LSM hierarchy
    pub level: u8,

    /// First key in the table
    #[serde(with = "base64_key")]
    pub min_key: UserKey,

    /// Last key in the table
    #[serde(with = "base64_key")]
    pub max_key: UserKey,

    /// Number of entries
    pub entry_count: u64,

    /// File size in bytes
    pub file_size: u64,

    /// Unix timestamp (seconds) of table creation
    pub created_at: u64,

    /// Highest sequence number in the table
    pub max_seqno: SeqNo,
}

impl Metadata {
    /// Returns `true` if the key is contained in the table's key range
    #[must_use]
    pub fn key_range_contains<K: AsRef<[u8]>>(&self, key: K) -> bool {
        let key = key.as_ref();
        &*self.min_key <= key && key <= &*self.max_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn fixture_metadata() -> Metadata {
        Metadata {
            id: 7,
            filename: "sst-000007.sst".into(),
            level: 1,
            min_key: b"abc".to_vec().into(),
            max_key: b"xyz".to_vec().into(),
            entry_count: 100,
            file_size: 4096,
            created_at: 1700000000,
            max_seqno: 1234,
        }
    }

    #[test]
    fn meta_key_range() {
        let meta = fixture_metadata();

        assert!(meta.key_range_contains(b"abc"));
        assert!(meta.key_range_contains(b"def"));
        assert!(meta.key_range_contains(b"xyz"));
        assert!(!meta.key_range_contains(b"ab"));
        assert!(!meta.key_range_contains(b"xyzz"));
    }

    #[test]
    fn meta_json_round_trip() {
        let meta = fixture_metadata();

        let json = serde_json::to_string(&meta).expect("should serialize");

        // Raw key bytes must not leak into the document
        assert!(json.contains("\"min_key\":\"YWJj\""));

        let decoded: Metadata = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(meta, decoded);
    }
}

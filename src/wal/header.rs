use crate::{serde::DeserializeError, version::Version};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Magic bytes at the start of every WAL segment file
pub const WAL_MAGIC: &[u8; 4] = b"WALX";

/// magic (4) + version (4) + created_at (8) + reserved (16)
pub const WAL_HEADER_SIZE: usize = 32;

const RESERVED: [u8; 16] = [0; 16];

/// Fixed-size WAL segment file header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WalHeader {
    pub version: Version,
    pub created_at: u64,
}

impl WalHeader {
    pub fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(WAL_MAGIC)?;
        writer.write_u32::<BigEndian>(self.version.into())?;
        writer.write_u64::<BigEndian>(self.created_at)?;
        writer.write_all(&RESERVED)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let mut magic = [0u8; WAL_MAGIC.len()];
        reader.read_exact(&mut magic)?;

        if &magic != WAL_MAGIC {
            return Err(DeserializeError::BadMagic.into());
        }

        let version = reader.read_u32::<BigEndian>()?;
        let Ok(version) = Version::try_from(version) else {
            return Err(crate::Error::UnsupportedVersion(None));
        };

        let created_at = reader.read_u64::<BigEndian>()?;

        let mut reserved = [0u8; RESERVED.len()];
        reader.read_exact(&mut reserved)?;

        Ok(Self {
            version,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use test_log::test;

    #[test]
    fn wal_header_round_trip() -> crate::Result<()> {
        let header = WalHeader {
            version: Version::V1,
            created_at: 1_700_000_000,
        };

        let mut bytes = Vec::new();
        header.serialize(&mut bytes)?;
        assert_eq!(WAL_HEADER_SIZE, bytes.len());

        let decoded = WalHeader::deserialize(&mut &bytes[..])?;
        assert_eq!(header, decoded);

        Ok(())
    }

    #[test]
    fn wal_header_bad_magic() -> crate::Result<()> {
        let header = WalHeader {
            version: Version::V1,
            created_at: 0,
        };

        let mut bytes = Vec::new();
        header.serialize(&mut bytes)?;
        bytes[0] = b'X';

        match WalHeader::deserialize(&mut &bytes[..]) {
            Err(Error::Corruption(DeserializeError::BadMagic)) => Ok(()),
            other => panic!("should reject bad magic: {other:?}"),
        }
    }

    #[test]
    fn wal_header_future_version() -> crate::Result<()> {
        let header = WalHeader {
            version: Version::V1,
            created_at: 0,
        };

        let mut bytes = Vec::new();
        header.serialize(&mut bytes)?;
        bytes[7] = 99;

        match WalHeader::deserialize(&mut &bytes[..]) {
            Err(Error::UnsupportedVersion(None)) => Ok(()),
            other => panic!("should reject future version: {other:?}"),
        }
    }
}

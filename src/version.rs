/// On-disk format version
///
/// Shared by the SSTable header, the WAL segment header and the manifest.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    /// Version 1
    V1,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl From<Version> for u32 {
    fn from(value: Version) -> Self {
        match value {
            Version::V1 => 1,
        }
    }
}

impl TryFrom<u32> for Version {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trip() {
        assert_eq!(Ok(Version::V1), Version::try_from(1));
        assert_eq!(1u32, u32::from(Version::V1));
    }

    #[test]
    fn version_unknown() {
        assert_eq!(Err(()), Version::try_from(0));
        assert_eq!(Err(()), Version::try_from(2));
    }
}

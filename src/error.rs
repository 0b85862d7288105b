use crate::{
    serde::{DeserializeError, SerializeError},
    version::Version,
};
use lz4_flex::block::DecompressError;

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Serialize(SerializeError),

    /// Data corruption (CRC, magic or structural mismatch)
    Corruption(DeserializeError),

    /// Decompression failed
    Decompress(DecompressError),

    /// Data format version is newer than this build understands
    UnsupportedVersion(Option<Version>),

    /// Invalid user-supplied argument
    InvalidArgument(&'static str),

    /// Operation was issued after close
    Closed,

    /// Invariant violation
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SegmentDbError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SerializeError> for Error {
    fn from(value: SerializeError) -> Self {
        match value {
            SerializeError::Io(e) => Self::Io(e),
        }
    }
}

impl From<DeserializeError> for Error {
    fn from(value: DeserializeError) -> Self {
        match value {
            DeserializeError::Io(e) => Self::Io(e),
            other => Self::Corruption(other),
        }
    }
}

impl From<DecompressError> for Error {
    fn from(value: DecompressError) -> Self {
        Self::Decompress(value)
    }
}

/// Storage engine result
pub type Result<T> = std::result::Result<T, Error>;

use std::io::{Read, Write};

/// Error that can occur while serializing a binary structure
#[derive(Debug)]
pub enum SerializeError {
    /// I/O error
    Io(std::io::Error),
}

impl From<std::io::Error> for SerializeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error that can occur while deserializing a binary structure
#[derive(Debug)]
pub enum DeserializeError {
    /// I/O error
    Io(std::io::Error),

    /// CRC mismatch, contains the computed checksum
    CrcCheck(u32),

    /// Magic bytes of a file, footer or filter did not match
    BadMagic,

    /// A tag or flag byte had an undefined value
    InvalidTag((&'static str, u8)),

    /// A structural rule was violated (e.g. tombstone with payload)
    InvalidStructure(&'static str),
}

impl From<std::io::Error> for DeserializeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub trait Serializable {
    // Serialize to bytes
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError>;
}

pub trait Deserializable {
    // Deserialize from bytes
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError>
    where
        Self: Sized;
}

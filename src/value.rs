use crate::serde::{Deserializable, DeserializeError, Serializable, SerializeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    cmp::Reverse,
    io::{Read, Write},
    sync::Arc,
};

/// User defined key
pub type UserKey = Arc<[u8]>;

/// User defined value (blob of bytes)
pub type UserValue = Arc<[u8]>;

/// Sequence number, a monotonically increasing counter
///
/// A value with a higher sequence number shadows an item with the
/// same key and lower sequence number.
pub type SeqNo = u64;

/// Fixed portion of an entry record: seqno (8) + key_len (2) + val_len (4) + tombstone flag (1)
const ENTRY_HEADER_SIZE: u32 = 15;

/// Value type (regular value or tombstone)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum ValueType {
    /// Existing value
    Value,

    /// Deleted value
    Tombstone,
}

impl TryFrom<u8> for ValueType {
    type Error = DeserializeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Value),
            1 => Ok(Self::Tombstone),
            other => Err(DeserializeError::InvalidTag(("ValueType", other))),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Value => 0,
            ValueType::Tombstone => 1,
        }
    }
}

/// Represents an entry in the LSM-tree
///
/// `key` and `value` are arbitrary user-defined byte arrays
///
/// # Disk representation
///
/// \[entry length; 4 bytes] \[seqno; 8 bytes] \[key length; 2 bytes] \[value length; 4 bytes] \[tombstone; 1 byte] \[key; N bytes] \[value; N bytes]
///
/// A tombstone stores no payload; its value length is always zero.
#[derive(Clone, PartialEq, Eq)]
pub struct Value {
    /// User-defined key - an arbitrary byte array
    ///
    /// Supports up to 2^16 bytes
    pub key: UserKey,

    /// User-defined value - an arbitrary byte array
    ///
    /// Supports up to 2^32 bytes
    pub value: UserValue,

    /// Sequence number
    pub seqno: SeqNo,

    /// Tombstone marker
    pub value_type: ValueType,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{} => {:?}",
            self.key,
            self.seqno,
            match self.value_type {
                ValueType::Value => "V",
                ValueType::Tombstone => "T",
            },
            self.value
        )
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by sequence number
// This is one of the most important functions
// Otherwise queries will not match expected behaviour
impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.key, Reverse(self.seqno)).cmp(&(&other.key, Reverse(other.seqno)))
    }
}

impl Value {
    /// Creates a new [`Value`].
    ///
    /// # Panics
    ///
    /// Panics if the key is empty or longer than 2^16 bytes,
    /// or the value is longer than 2^32 bytes.
    pub fn new<K: Into<UserKey>, V: Into<UserValue>>(
        key: K,
        value: V,
        seqno: SeqNo,
        value_type: ValueType,
    ) -> Self {
        let k = key.into();
        let v = value.into();

        assert!(!k.is_empty());
        assert!(k.len() <= u16::MAX.into());
        assert!(u32::try_from(v.len()).is_ok());
        assert!(value_type != ValueType::Tombstone || v.is_empty());

        Self {
            key: k,
            value: v,
            value_type,
            seqno,
        }
    }

    /// Creates a new tombstone
    pub fn new_tombstone<K: Into<UserKey>>(key: K, seqno: SeqNo) -> Self {
        Self::new(key, vec![], seqno, ValueType::Tombstone)
    }

    #[doc(hidden)]
    #[must_use]
    pub fn size(&self) -> usize {
        let key_size = self.key.len();
        let value_size = self.value.len();
        std::mem::size_of::<Self>() + key_size + value_size
    }

    /// Exact on-disk size of the entry record, including the length prefix
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        std::mem::size_of::<u32>() + ENTRY_HEADER_SIZE as usize + self.key.len() + self.value.len()
    }

    #[doc(hidden)]
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Tombstone
    }
}

impl Serializable for Value {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        let entry_length = ENTRY_HEADER_SIZE + self.key.len() as u32 + self.value.len() as u32;

        writer.write_u32::<BigEndian>(entry_length)?;
        writer.write_u64::<BigEndian>(self.seqno)?;

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.key.len() as u16)?;

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.value.len() as u32)?;

        writer.write_u8(u8::from(self.value_type))?;

        writer.write_all(&self.key)?;
        writer.write_all(&self.value)?;

        Ok(())
    }
}

impl Deserializable for Value {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let entry_length = reader.read_u32::<BigEndian>()?;

        let seqno = reader.read_u64::<BigEndian>()?;
        let key_len = reader.read_u16::<BigEndian>()?;
        let value_len = reader.read_u32::<BigEndian>()?;
        let value_type: ValueType = reader.read_u8()?.try_into()?;

        if entry_length != ENTRY_HEADER_SIZE + u32::from(key_len) + value_len {
            return Err(DeserializeError::InvalidStructure(
                "entry length does not match field lengths",
            ));
        }

        if value_type == ValueType::Tombstone && value_len > 0 {
            return Err(DeserializeError::InvalidStructure(
                "tombstone carries a payload",
            ));
        }

        if key_len == 0 {
            return Err(DeserializeError::InvalidStructure("empty key"));
        }

        let mut key = vec![0; key_len.into()];
        reader.read_exact(&mut key)?;

        let mut value = vec![0; value_len as usize];
        reader.read_exact(&mut value)?;

        Ok(Self::new(key, value, seqno, value_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn value_empty_payload() -> crate::Result<()> {
        let value = Value::new(vec![1, 2, 3], vec![], 42, ValueType::Value);

        let mut serialized = Vec::new();
        value.serialize(&mut serialized)?;

        let deserialized = Value::deserialize(&mut &serialized[..])?;

        assert_eq!(value, deserialized);

        Ok(())
    }

    #[test]
    fn value_tombstone_round_trip() -> crate::Result<()> {
        let value = Value::new_tombstone(vec![9, 9, 9], 7);

        let mut serialized = Vec::new();
        value.serialize(&mut serialized)?;

        let deserialized = Value::deserialize(&mut &serialized[..])?;

        assert_eq!(value, deserialized);
        assert!(deserialized.is_tombstone());

        Ok(())
    }

    #[test]
    fn value_tombstone_with_payload_rejected() -> crate::Result<()> {
        let value = Value::new(vec![1], vec![2, 3], 1, ValueType::Value);

        let mut serialized = Vec::new();
        value.serialize(&mut serialized)?;

        // Flip the tombstone flag, leaving val_len at 2
        serialized[18] = 1;

        match Value::deserialize(&mut &serialized[..]) {
            Err(DeserializeError::InvalidStructure(_)) => Ok(()),
            other => panic!("should reject tombstone with payload: {other:?}"),
        }
    }

    #[test]
    fn value_ordering() {
        let a = Value::new(*b"a", *b"x", 10, ValueType::Value);
        let b = Value::new(*b"a", *b"y", 5, ValueType::Value);
        let c = Value::new(*b"b", *b"z", 1, ValueType::Value);

        // Same key: higher seqno sorts first
        assert!(a < b);
        assert!(b < c);
    }
}

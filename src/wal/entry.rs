use crate::{
    serde::{DeserializeError, SerializeError},
    value::ValueType,
    Value,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Fixed portion of a record payload: seqno (8) + op (1) + key_len (2) + val_len (4)
const RECORD_HEADER_SIZE: u32 = 15;

/// Writes a single WAL record
///
/// # Disk representation
///
/// \[payload length; 4 bytes] \[seqno; 8 bytes] \[op; 1 byte] \[key length; 2 bytes] \[value length; 4 bytes] \[key; N bytes] \[value; N bytes] \[crc32; 4 bytes]
///
/// op 0 = put, 1 = delete; a delete record has a value length of zero.
/// The CRC covers every framed byte preceding it, including the length prefix.
pub fn write_record<W: Write>(writer: &mut W, item: &Value) -> Result<(), SerializeError> {
    // NOTE: Truncation is okay and actually needed
    #[allow(clippy::cast_possible_truncation)]
    let length = RECORD_HEADER_SIZE + item.key.len() as u32 + item.value.len() as u32;

    let mut frame = Vec::with_capacity(length as usize + 2 * std::mem::size_of::<u32>());

    frame.write_u32::<BigEndian>(length)?;
    frame.write_u64::<BigEndian>(item.seqno)?;
    frame.write_u8(u8::from(item.value_type))?;

    // NOTE: Truncation is okay and actually needed
    #[allow(clippy::cast_possible_truncation)]
    frame.write_u16::<BigEndian>(item.key.len() as u16)?;

    // NOTE: Truncation is okay and actually needed
    #[allow(clippy::cast_possible_truncation)]
    frame.write_u32::<BigEndian>(item.value.len() as u32)?;

    frame.write_all(&item.key)?;
    frame.write_all(&item.value)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&frame);
    frame.write_u32::<BigEndian>(hasher.finalize())?;

    writer.write_all(&frame)?;

    Ok(())
}

/// Reads and validates a single WAL record
pub fn read_record<R: Read>(reader: &mut R) -> Result<Value, DeserializeError> {
    let length = reader.read_u32::<BigEndian>()?;

    let mut payload = vec![0; length as usize];
    reader.read_exact(&mut payload)?;

    let expected_crc = reader.read_u32::<BigEndian>()?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length.to_be_bytes());
    hasher.update(&payload);
    let crc = hasher.finalize();

    if crc != expected_crc {
        return Err(DeserializeError::CrcCheck(crc));
    }

    let mut cursor = Cursor::new(payload);

    let seqno = cursor.read_u64::<BigEndian>()?;
    let op: ValueType = cursor.read_u8()?.try_into()?;
    let key_len = cursor.read_u16::<BigEndian>()?;
    let val_len = cursor.read_u32::<BigEndian>()?;

    if length != RECORD_HEADER_SIZE + u32::from(key_len) + val_len {
        return Err(DeserializeError::InvalidStructure(
            "record length does not match field lengths",
        ));
    }

    if key_len == 0 {
        return Err(DeserializeError::InvalidStructure("empty key"));
    }

    if op == ValueType::Tombstone && val_len > 0 {
        return Err(DeserializeError::InvalidStructure(
            "delete record carries a payload",
        ));
    }

    let mut key = vec![0; key_len.into()];
    cursor.read_exact(&mut key)?;

    let mut value = vec![0; val_len as usize];
    cursor.read_exact(&mut value)?;

    Ok(Value::new(key, value, seqno, op))
}

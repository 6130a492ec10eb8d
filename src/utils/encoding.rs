//! Binary encoding helpers shared by the journal and checkpoint formats.

use crate::error::{Result, StoreError};
use std::io::{self, Write};

/// Encode a u32 as a variable-length integer
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a variable-length integer from a slice
/// Returns (value, bytes_consumed)
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 32 {
            return None; // Overflow
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None // Incomplete
}

/// Delta-encode a strictly increasing list of u32s, prefixed with its length
pub fn delta_encode(values: &[u32], buf: &mut Vec<u8>) {
    encode_varint(values.len() as u32, buf);
    let mut prev = 0u32;
    for &value in values {
        encode_varint(value - prev, buf);
        prev = value;
    }
}

/// Write a u16 in little-endian format
pub fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a string prefixed with its u16 byte length
pub fn write_short_str<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than 64 KiB"))?;
    write_u16_le(writer, len)?;
    writer.write_all(value.as_bytes())
}

/// Write a string prefixed with its u32 byte length
pub fn write_long_str<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than 4 GiB"))?;
    write_u32_le(writer, len)?;
    writer.write_all(value.as_bytes())
}

/// Cursor over an in-memory buffer. Every read that runs past the end or
/// meets malformed data reports [`StoreError::Corrupt`].
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    /// `what` names the file or record in error messages
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self) -> StoreError {
        StoreError::corrupt(format!("{} truncated at byte {}", self.what, self.pos))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated());
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn varint(&mut self) -> Result<u32> {
        match decode_varint(&self.buf[self.pos..]) {
            Some((value, consumed)) => {
                self.pos += consumed;
                Ok(value)
            }
            None => Err(StoreError::corrupt(format!(
                "{}: bad varint at byte {}",
                self.what, self.pos
            ))),
        }
    }

    fn utf8(&self, bytes: &'a [u8]) -> Result<&'a str> {
        std::str::from_utf8(bytes)
            .map_err(|_| StoreError::corrupt(format!("{}: invalid UTF-8 string", self.what)))
    }

    pub fn short_str(&mut self) -> Result<&'a str> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        self.utf8(bytes)
    }

    pub fn long_str(&mut self) -> Result<&'a str> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        self.utf8(bytes)
    }

    /// Read a list written by [`delta_encode`]; values must be strictly increasing
    pub fn delta_list(&mut self) -> Result<Vec<u32>> {
        let count = self.varint()? as usize;
        // Every value takes at least one byte
        if count > self.remaining() {
            return Err(self.truncated());
        }
        let mut values = Vec::with_capacity(count);
        let mut prev: Option<u32> = None;
        for _ in 0..count {
            let delta = self.varint()?;
            let value = match prev {
                None => delta,
                Some(p) if delta > 0 => p.checked_add(delta).ok_or_else(|| {
                    StoreError::corrupt(format!("{}: delta overflow", self.what))
                })?,
                Some(_) => {
                    return Err(StoreError::corrupt(format!(
                        "{}: list not strictly increasing",
                        self.what
                    )));
                }
            };
            values.push(value);
            prev = Some(value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let values = [0, 1, 127, 128, 16383, 16384, u32::MAX];
        for value in values {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let (decoded, _) = decode_varint(&buf).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn test_delta_list() {
        let values = vec![0, 5, 10, 15, 100, 1000];
        let mut buf = Vec::new();
        delta_encode(&values, &mut buf);
        let mut reader = ByteReader::new(&buf, "test");
        assert_eq!(reader.delta_list().unwrap(), values);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_delta_list_rejects_repeats() {
        let mut buf = Vec::new();
        encode_varint(2, &mut buf);
        encode_varint(7, &mut buf);
        encode_varint(0, &mut buf);
        let mut reader = ByteReader::new(&buf, "test");
        assert!(reader.delta_list().unwrap_err().is_corruption());
    }

    #[test]
    fn test_reader_truncation_is_corruption() {
        let mut buf = Vec::new();
        write_long_str(&mut buf, "hello").unwrap();
        buf.truncate(buf.len() - 2);
        let mut reader = ByteReader::new(&buf, "test");
        assert!(reader.long_str().unwrap_err().is_corruption());
    }

    #[test]
    fn test_strings() {
        let mut buf = Vec::new();
        write_short_str(&mut buf, "cases/登录.md").unwrap();
        write_u64_le(&mut buf, 42).unwrap();
        let mut reader = ByteReader::new(&buf, "test");
        assert_eq!(reader.short_str().unwrap(), "cases/登录.md");
        assert_eq!(reader.u64().unwrap(), 42);
    }
}

//! Primitive wire encoding.
//!
//! The Bedrock wire format mixes little-endian fixed-width integers with
//! protobuf-style variable-length integers. These extension traits put both
//! behind `Read`/`Write`, next to the length-prefixed strings and byte blobs
//! built on top of them.

use std::io::{Read, Write};

use bedwire_core::error::{DecodingErrorKind, ErrorKind, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Reads wire primitives from any `Read`.
pub trait WireRead: Read {
    /// Reads an unsigned 32-bit varint (at most 5 bytes).
    fn read_varu32(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let b = self.read_u8()?;
            value |= u32::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ErrorKind::DecodingError(DecodingErrorKind::VarInt))
    }

    /// Reads an unsigned 64-bit varint (at most 10 bytes).
    fn read_varu64(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self.read_u8()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ErrorKind::DecodingError(DecodingErrorKind::VarInt))
    }

    /// Reads a zigzag-encoded signed 32-bit varint.
    fn read_vari32(&mut self) -> Result<i32> {
        let v = self.read_varu32()?;
        Ok((v >> 1) as i32 ^ -((v & 1) as i32))
    }

    /// Reads a varuint32-length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String> {
        let data = self.read_byte_slice()?;
        String::from_utf8(data).map_err(|_| ErrorKind::DecodingError(DecodingErrorKind::String))
    }

    /// Reads a varuint32-length-prefixed byte blob.
    fn read_byte_slice(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varu32()? as usize;
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)
            .map_err(|_| ErrorKind::DecodingError(DecodingErrorKind::String))?;
        Ok(data)
    }

    /// Reads every remaining byte.
    fn read_rest(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl<R: Read> WireRead for R {}

/// Writes wire primitives to any `Write`.
pub trait WireWrite: Write {
    /// Writes an unsigned 32-bit varint.
    fn write_varu32(&mut self, mut value: u32) -> Result<()> {
        while value >= 0x80 {
            self.write_u8((value as u8 & 0x7f) | 0x80)?;
            value >>= 7;
        }
        self.write_u8(value as u8)?;
        Ok(())
    }

    /// Writes an unsigned 64-bit varint.
    fn write_varu64(&mut self, mut value: u64) -> Result<()> {
        while value >= 0x80 {
            self.write_u8((value as u8 & 0x7f) | 0x80)?;
            value >>= 7;
        }
        self.write_u8(value as u8)?;
        Ok(())
    }

    /// Writes a zigzag-encoded signed 32-bit varint.
    fn write_vari32(&mut self, value: i32) -> Result<()> {
        self.write_varu32(((value as u32) << 1) ^ ((value >> 31) as u32))
    }

    /// Writes a varuint32-length-prefixed UTF-8 string.
    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_byte_slice(value.as_bytes())
    }

    /// Writes a varuint32-length-prefixed byte blob.
    fn write_byte_slice(&mut self, value: &[u8]) -> Result<()> {
        self.write_varu32(value.len() as u32)?;
        self.write_all(value)?;
        Ok(())
    }
}

impl<W: Write> WireWrite for W {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_varu32_round_trip() {
        for value in [0u32, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX] {
            let mut buf = Vec::new();
            buf.write_varu32(value).unwrap();
            let mut cursor = Cursor::new(buf.as_slice());
            assert_eq!(cursor.read_varu32().unwrap(), value);
        }
    }

    #[test]
    fn test_vari32_round_trip_negative() {
        for value in [0i32, -1, 1, i32::MIN, i32::MAX, -150] {
            let mut buf = Vec::new();
            buf.write_vari32(value).unwrap();
            let mut cursor = Cursor::new(buf.as_slice());
            assert_eq!(cursor.read_vari32().unwrap(), value);
        }
    }

    #[test]
    fn test_varu32_rejects_overlong_encoding() {
        let buf = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut cursor = Cursor::new(buf.as_slice());
        assert!(matches!(
            cursor.read_varu32(),
            Err(ErrorKind::DecodingError(DecodingErrorKind::VarInt))
        ));
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        buf.write_string("resource_pack_\u{00e9}").unwrap();
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(cursor.read_string().unwrap(), "resource_pack_\u{00e9}");
    }

    #[test]
    fn test_truncated_byte_slice_is_a_decode_error() {
        let mut buf = Vec::new();
        buf.write_varu32(16).unwrap();
        buf.extend_from_slice(&[0u8; 4]);
        let mut cursor = Cursor::new(buf.as_slice());
        assert!(cursor.read_byte_slice().is_err());
    }
}

//! Little-endian cursor over on-chain account payloads.
//!
//! All chain layouts are packed little-endian; 128-bit fields are stored
//! as `{lower: u64, upper: u64}` pairs. The cursor fails (never panics) on
//! truncated data.

use crate::core::{Hash32, Pubkey, HASH_LEN};
use crate::error::{Error, Result};

pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::Deserialize(format!(
                    "account data truncated: need {} bytes at offset {}, have {}",
                    len,
                    self.offset,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len 4")))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    /// 64-bit-aligned 128-bit field: `{lower, upper}` composing a
    /// two's-complement signed value.
    pub fn i128_pair(&mut self) -> Result<i128> {
        let lower = self.u64()? as u128;
        let upper = self.u64()? as u128;
        Ok(((upper << 64) | lower) as i128)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey> {
        let bytes: [u8; HASH_LEN] = self.take(HASH_LEN)?.try_into().expect("len 32");
        Ok(Hash32::new(bytes))
    }

    /// Fixed tag bytes (layout magic); mismatch is an integrity failure.
    pub fn expect_bytes(&mut self, expected: &[u8], what: &str) -> Result<()> {
        let actual = self.take(expected.len())?;
        if actual != expected {
            return Err(Error::IntegrityMismatch(format!(
                "bad {}: expected {:?}, got {:?}",
                what, expected, actual
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scalars_in_order() {
        let mut data = Vec::new();
        data.push(7u8);
        data.extend_from_slice(&513u16.to_le_bytes());
        data.extend_from_slice(&70000u32.to_le_bytes());
        data.extend_from_slice(&(u64::MAX - 1).to_le_bytes());

        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.u8().unwrap(), 7);
        assert_eq!(cursor.u16().unwrap(), 513);
        assert_eq!(cursor.u32().unwrap(), 70000);
        assert_eq!(cursor.u64().unwrap(), u64::MAX - 1);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn i128_pair_is_twos_complement() {
        let value = -42i128;
        let bits = value as u128;
        let mut data = Vec::new();
        data.extend_from_slice(&(bits as u64).to_le_bytes());
        data.extend_from_slice(&((bits >> 64) as u64).to_le_bytes());

        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.i128_pair().unwrap(), -42);
    }

    #[test]
    fn truncation_fails_cleanly() {
        let data = [1u8, 2];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.u64().is_err());
        // Failed reads do not advance.
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn expect_bytes_checks_magic() {
        let data = b"serumrest";
        let mut cursor = Cursor::new(data);
        cursor.expect_bytes(b"serum", "prefix").unwrap();
        assert!(cursor.expect_bytes(b"xxxx", "prefix").is_err());
    }
}

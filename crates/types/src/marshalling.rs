//! The canonical, deterministic binary codec for consensus-critical data.
//!
//! Transaction references are the hash of the marshalled request bytes, so
//! this format is part of node identity: two logically equal beans must
//! produce byte-equal output. The stream is big-endian with single-byte
//! type selectors; small non-negative integers get a compact one-byte form.

use crate::error::MarshallingError;
use num_bigint::BigInt;

/// Marker past which the compact integer encoding falls back to four bytes.
const COMPACT_MAX: u8 = 0xFE;
const COMPACT_ESCAPE: u8 = 0xFF;

/// Anything with a canonical byte representation.
///
/// The round-trip law `unmarshal(marshal(x)) == x` holds for every
/// well-formed value of an implementing type.
pub trait Marshallable: Sized {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError>;
    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError>;
}

/// Encodes a bean into its canonical bytes.
pub fn to_bytes<T: Marshallable>(v: &T) -> Result<Vec<u8>, MarshallingError> {
    let mut w = MarshallingContext::new();
    v.marshal(&mut w)?;
    Ok(w.finish())
}

/// Decodes a bean from canonical bytes, failing on trailing garbage.
pub fn from_bytes<T: Marshallable>(bytes: &[u8]) -> Result<T, MarshallingError> {
    let mut r = UnmarshallingContext::new(bytes);
    let v = T::unmarshal(&mut r)?;
    r.expect_end()?;
    Ok(v)
}

/// Write half of the codec. Accumulates into an owned buffer.
#[derive(Default)]
pub struct MarshallingContext {
    buf: Vec<u8>,
}

impl MarshallingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn written(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    /// Unicode scalar, four bytes big-endian.
    pub fn write_char(&mut self, v: char) {
        self.write_u32(v as u32);
    }

    /// Compact integer: one byte for `0..=254`, else an escape byte
    /// followed by the full four-byte big-endian signed value.
    pub fn write_compact_int(&mut self, v: i32) -> Result<(), MarshallingError> {
        if (0..=COMPACT_MAX as i32).contains(&v) {
            self.buf.push(v as u8);
        } else {
            self.buf.push(COMPACT_ESCAPE);
            self.write_i32(v);
        }
        Ok(())
    }

    pub fn write_length(&mut self, len: usize) -> Result<(), MarshallingError> {
        let v = i32::try_from(len)
            .map_err(|_| MarshallingError::ValueOutOfRange(format!("length {len}")))?;
        self.write_compact_int(v)
    }

    /// Compact length followed by the UTF-8 bytes.
    pub fn write_str(&mut self, v: &str) -> Result<(), MarshallingError> {
        self.write_length(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Compact length followed by the raw bytes.
    pub fn write_byte_array(&mut self, v: &[u8]) -> Result<(), MarshallingError> {
        self.write_length(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Raw bytes, no length prefix. Used for fixed-width fields.
    pub fn write_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Compact length followed by the minimal two's-complement big-endian
    /// magnitude, as produced by [`BigInt::to_signed_bytes_be`].
    pub fn write_big_integer(&mut self, v: &BigInt) -> Result<(), MarshallingError> {
        self.write_byte_array(&v.to_signed_bytes_be())
    }
}

/// Read half of the codec. Borrows the input buffer.
pub struct UnmarshallingContext<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> UnmarshallingContext<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MarshallingError> {
        if self.pos + n > self.buf.len() {
            return Err(MarshallingError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn expect_end(&self) -> Result<(), MarshallingError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(MarshallingError::TrailingBytes(self.buf.len() - self.pos))
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, MarshallingError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, MarshallingError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(MarshallingError::ValueOutOfRange(format!("boolean {v}"))),
        }
    }

    pub fn read_i8(&mut self) -> Result<i8, MarshallingError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, MarshallingError> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u16(&mut self) -> Result<u16, MarshallingError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, MarshallingError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, MarshallingError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, MarshallingError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, MarshallingError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32, MarshallingError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, MarshallingError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_char(&mut self) -> Result<char, MarshallingError> {
        let v = self.read_u32()?;
        char::from_u32(v).ok_or_else(|| MarshallingError::ValueOutOfRange(format!("char {v:#x}")))
    }

    pub fn read_compact_int(&mut self) -> Result<i32, MarshallingError> {
        let first = self.read_u8()?;
        if first <= COMPACT_MAX {
            Ok(first as i32)
        } else {
            self.read_i32()
        }
    }

    pub fn read_length(&mut self) -> Result<usize, MarshallingError> {
        let v = self.read_compact_int()?;
        usize::try_from(v).map_err(|_| MarshallingError::ValueOutOfRange(format!("length {v}")))
    }

    pub fn read_str(&mut self) -> Result<String, MarshallingError> {
        let len = self.read_length()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MarshallingError::InvalidUtf8)
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>, MarshallingError> {
        let len = self.read_length()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], MarshallingError> {
        self.take(n)
    }

    pub fn read_big_integer(&mut self) -> Result<BigInt, MarshallingError> {
        let bytes = self.read_byte_array()?;
        Ok(BigInt::from_signed_bytes_be(&bytes))
    }
}

impl<T: Marshallable> Marshallable for Vec<T> {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_length(self.len())?;
        for item in self {
            item.marshal(w)?;
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        let len = r.read_length()?;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(T::unmarshal(r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use proptest::prelude::*;

    #[test]
    fn compact_int_boundaries() {
        for v in [0, 1, 254] {
            let mut w = MarshallingContext::new();
            w.write_compact_int(v).unwrap();
            assert_eq!(w.written(), 1);
        }
        for v in [255, -1, i32::MAX, i32::MIN] {
            let mut w = MarshallingContext::new();
            w.write_compact_int(v).unwrap();
            assert_eq!(w.written(), 5);
        }
    }

    proptest! {
        #[test]
        fn compact_int_roundtrip(v in any::<i32>()) {
            let mut w = MarshallingContext::new();
            w.write_compact_int(v).unwrap();
            let bytes = w.finish();
            let mut r = UnmarshallingContext::new(&bytes);
            prop_assert_eq!(r.read_compact_int().unwrap(), v);
            r.expect_end().unwrap();
        }

        #[test]
        fn big_integer_roundtrip(v in any::<i128>()) {
            let big = BigInt::from(v);
            let mut w = MarshallingContext::new();
            w.write_big_integer(&big).unwrap();
            let bytes = w.finish();
            let mut r = UnmarshallingContext::new(&bytes);
            prop_assert_eq!(r.read_big_integer().unwrap(), big);
        }

        #[test]
        fn string_roundtrip(s in ".*") {
            let mut w = MarshallingContext::new();
            w.write_str(&s).unwrap();
            let bytes = w.finish();
            let mut r = UnmarshallingContext::new(&bytes);
            prop_assert_eq!(r.read_str().unwrap(), s);
        }
    }

    #[test]
    fn truncated_input_fails() {
        let mut w = MarshallingContext::new();
        w.write_str("hello").unwrap();
        let mut bytes = w.finish();
        bytes.pop();
        let mut r = UnmarshallingContext::new(&bytes);
        assert!(r.read_str().is_err());
    }
}

//! Avro-schemaless binary codec and LZMA2 compression wrapper.
//!
//! The encoding here is deliberately narrow: just enough of Apache Avro's
//! schemaless binary representation to round-trip the records this crate
//! actually uses (`int`, `long`, `bytes`, `string`, `array<T>`, `map<string,T>`,
//! and fixed-shape records), matching the reference implementation byte for
//! byte. There is no schema resolution, no union support, and no reader/
//! writer schema reconciliation — none of that is needed when both sides
//! agree on `<record>.<version>` out of band.

use std::io::{Read, Write};

use xz2::read::{XzDecoder, XzEncoder};
use xz2::stream::{Filters, LzmaOptions, Stream};

use crate::error::{CryptoBlobError, Result};

/// LZMA2 raw-stream preset used for every compressed inner record.
const LZMA_PRESET: u32 = 5;

fn lzma2_filters() -> Filters {
    let options = LzmaOptions::new_preset(LZMA_PRESET).expect("preset 5 is valid");
    let mut filters = Filters::new();
    filters.lzma2(&options);
    filters
}

/// Compresses `data` as a raw LZMA2 stream (no container header), preset 5.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let stream =
        Stream::new_raw_encoder(&lzma2_filters()).expect("raw LZMA2 encoder setup cannot fail here");
    let mut encoder = XzEncoder::new_stream(data, stream);
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .expect("in-memory LZMA2 compression cannot fail");
    out
}

/// Reverses [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let stream = Stream::new_raw_decoder(&lzma2_filters()).map_err(|_| {
        CryptoBlobError::SchemaError("failed to initialise LZMA2 raw stream".into())
    })?;
    let mut decoder = XzDecoder::new_stream(data, stream);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoBlobError::SchemaError(format!("LZMA2 decompression failed: {e}")))?;
    Ok(out)
}

/// A minimal writer for Avro-schemaless primitives, in declaration order.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Avro `int`/`long`: zigzag-encoded variable-length quantity.
    pub fn write_long(&mut self, value: i64) {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        let mut v = zigzag;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    pub fn write_int(&mut self, value: i32) {
        self.write_long(value as i64);
    }

    /// Avro `bytes`/`string`: long length prefix followed by raw octets.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_long(value.len() as i64);
        self.buf.extend_from_slice(value);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Avro `array<T>`: one non-empty block of `len` items followed by the
    /// writer's per-item closure, then a terminating zero-length block.
    pub fn write_array<T, F>(&mut self, items: &[T], mut write_item: F)
    where
        F: FnMut(&mut Self, &T),
    {
        if !items.is_empty() {
            self.write_long(items.len() as i64);
            for item in items {
                write_item(self, item);
            }
        }
        self.write_long(0);
    }

    /// Avro `map<string, T>`: one non-empty block of `len` key/value pairs
    /// followed by a terminating zero-length block.
    pub fn write_map<'a, T, F>(&mut self, entries: &[(&'a str, T)], mut write_value: F)
    where
        F: FnMut(&mut Self, &T),
    {
        if !entries.is_empty() {
            self.write_long(entries.len() as i64);
            for (key, value) in entries {
                self.write_string(key);
                write_value(self, value);
            }
        }
        self.write_long(0);
    }
}

/// A minimal cursor-based reader for Avro-schemaless primitives.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| CryptoBlobError::SchemaError("unexpected end of record".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_long(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 70 {
                return Err(CryptoBlobError::SchemaError("varint too long".into()));
            }
        }
        Ok(((result >> 1) as i64) ^ -((result & 1) as i64))
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let value = self.read_long()?;
        i32::try_from(value)
            .map_err(|_| CryptoBlobError::SchemaError("int value out of range".into()))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_long()?;
        if len < 0 {
            return Err(CryptoBlobError::SchemaError("negative byte length".into()));
        }
        let len = len as usize;
        if self.remaining() < len {
            return Err(CryptoBlobError::SchemaError(
                "byte string runs past end of record".into(),
            ));
        }
        let out = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|_| CryptoBlobError::SchemaError("string is not valid UTF-8".into()))
    }

    /// Reads a full blocked `array<T>`, calling `read_item` once per element.
    pub fn read_array<T, F>(&mut self, mut read_item: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let mut out = Vec::new();
        loop {
            let count = self.read_long()?;
            if count == 0 {
                break;
            }
            let (count, _skip_bytes) = if count < 0 {
                let _byte_len = self.read_long()?;
                (-count, true)
            } else {
                (count, false)
            };
            for _ in 0..count {
                out.push(read_item(self)?);
            }
        }
        Ok(out)
    }

    /// Reads a full blocked `map<string, T>`.
    pub fn read_map<T, F>(&mut self, mut read_value: F) -> Result<Vec<(String, T)>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let mut out = Vec::new();
        loop {
            let count = self.read_long()?;
            if count == 0 {
                break;
            }
            let count = if count < 0 {
                let _byte_len = self.read_long()?;
                -count
            } else {
                count
            };
            for _ in 0..count {
                let key = self.read_string()?;
                let value = read_value(self)?;
                out.push((key, value));
            }
        }
        Ok(out)
    }
}

/// Writes the one-field `blob_header` record (`{version: int}`).
pub fn encode_blob_header(version: i32) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_int(version);
    enc.into_bytes()
}

/// Reads the `blob_header` record and returns `(version, bytes_consumed)`.
pub fn decode_blob_header(data: &[u8]) -> Result<(i32, usize)> {
    let mut dec = Decoder::new(data);
    let version = dec.read_int()?;
    Ok((version, dec.pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_long_roundtrip() {
        for value in [0i64, 1, -1, 2, -2, 63, -64, 64, -65, i64::MAX, i64::MIN] {
            let mut enc = Encoder::new();
            enc.write_long(value);
            let bytes = enc.into_bytes();
            let mut dec = Decoder::new(&bytes);
            assert_eq!(dec.read_long().unwrap(), value);
        }
    }

    #[test]
    fn bytes_and_string_roundtrip() {
        let mut enc = Encoder::new();
        enc.write_bytes(b"hello");
        enc.write_string("world");
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_bytes().unwrap(), b"hello");
        assert_eq!(dec.read_string().unwrap(), "world");
    }

    #[test]
    fn array_roundtrip_including_empty() {
        let mut enc = Encoder::new();
        enc.write_array(&[1i64, 2, 3], |e, v| e.write_long(*v));
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let items: Vec<i64> = dec.read_array(|d| d.read_long()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        let mut enc = Encoder::new();
        enc.write_array::<i64, _>(&[], |e, v| e.write_long(*v));
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let items: Vec<i64> = dec.read_array(|d| d.read_long()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn map_roundtrip() {
        let mut enc = Encoder::new();
        enc.write_map(&[("a", 1i64), ("b", 2i64)], |e, v| e.write_long(*v));
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let items = dec.read_map(|d| d.read_long()).unwrap();
        assert_eq!(
            items,
            vec![("a".to_string(), 1i64), ("b".to_string(), 2i64)]
        );
    }

    #[test]
    fn lzma2_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data);
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn blob_header_roundtrip() {
        let encoded = encode_blob_header(1);
        let (version, consumed) = decode_blob_header(&encoded).unwrap();
        assert_eq!(version, 1);
        assert_eq!(consumed, encoded.len());
    }
}

//! Compression support for array files
//!
//! Gzip via flate2, with format detection from the leading magic bytes so
//! plain `.npy` payloads pass through unchanged.

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

/// Gzip member header
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Encoding of an array file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// Plain npy
    None,
    /// One or more concatenated gzip members
    Gzip,
}

impl CompressionAlgorithm {
    /// Detect the format from the payload header
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&GZIP_MAGIC) {
            CompressionAlgorithm::Gzip
        } else {
            CompressionAlgorithm::None
        }
    }
}

/// Gzip level used when writing array files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// Quickest to write; used for test fixtures
    pub const FAST: Self = Self(1);
    /// zlib default
    pub const DEFAULT: Self = Self(6);
    /// What `gzip.open` writes unless told otherwise
    pub const BEST: Self = Self(9);

    /// Level passed to the encoder (1 to 9)
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Gzip `data` into a single member
pub fn compress(data: &[u8], level: CompressionLevel) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(level.value()),
    );
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Undo gzip if the header says so, reading every member; plain data passes through
pub fn decompress(data: Bytes) -> io::Result<Bytes> {
    match CompressionAlgorithm::detect(&data) {
        CompressionAlgorithm::None => Ok(data),
        CompressionAlgorithm::Gzip => {
            // npy payloads are usually several times the gzip size
            let mut output = Vec::with_capacity(data.len() * 4);
            MultiGzDecoder::new(data.as_ref()).read_to_end(&mut output)?;
            Ok(Bytes::from(output))
        }
    }
}

/// Decompressed size over compressed size; 0 for an empty input
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 0.0;
    }
    original as f64 / compressed as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_gzip() {
        let original = b"\x93NUMPY spectral frames spectral frames spectral frames";
        let compressed = compress(original, CompressionLevel::DEFAULT).unwrap();

        assert_eq!(
            CompressionAlgorithm::detect(&compressed),
            CompressionAlgorithm::Gzip
        );
        let decompressed = decompress(compressed).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_ref());
    }

    #[test]
    fn test_plain_payload_passes_through() {
        let data = Bytes::from_static(b"\x93NUMPY\x01\x00");
        assert_eq!(CompressionAlgorithm::detect(&data), CompressionAlgorithm::None);

        let out = decompress(data.clone()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let compressed = compress(&[7u8; 4096], CompressionLevel::FAST).unwrap();
        let truncated = compressed.slice(..compressed.len() / 2);

        assert!(decompress(truncated).is_err());
    }

    #[test]
    fn test_concatenated_members_are_all_read() {
        let mut joined = compress(b"first member, ", CompressionLevel::BEST)
            .unwrap()
            .to_vec();
        joined.extend_from_slice(&compress(b"second member", CompressionLevel::FAST).unwrap());

        let out = decompress(Bytes::from(joined)).unwrap();
        assert_eq!(out.as_ref(), b"first member, second member");
    }

    #[test]
    fn test_ratio() {
        assert_eq!(compression_ratio(100, 25), 4.0);
        assert_eq!(compression_ratio(100, 0), 0.0);
    }
}

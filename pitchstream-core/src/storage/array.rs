//! Lazy npy array loading
//!
//! A [`LazyArray`] holds nothing but a path. Every resolve reads the file,
//! decompresses it and decodes a fresh array; callers that need the array
//! more than once keep the result themselves.

use bytes::Bytes;
use ndarray::{Array, ArrayBase, ArrayD, Data, Dimension};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WriteNpyExt};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::compression::{compress, compression_ratio, decompress, CompressionLevel};
use crate::error::{Result, StreamError};

/// Deferred handle to a compressed array file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyArray {
    path: PathBuf,
}

impl LazyArray {
    /// Bind a loader to a path. No I/O happens here.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path this loader reads from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, decompress and decode the file into an array of any rank
    pub fn resolve_dyn(&self) -> Result<ArrayD<f32>> {
        let raw = fs::read(&self.path).map_err(|source| StreamError::Io {
            path: self.path.clone(),
            source,
        })?;
        let compressed_len = raw.len();

        let payload = decompress(Bytes::from(raw)).map_err(|source| {
            StreamError::Decompression {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!(
            "Read {} ({} bytes, {} decompressed, ratio {:.2})",
            self.path.display(),
            compressed_len,
            payload.len(),
            compression_ratio(payload.len(), compressed_len)
        );

        decode_f32(&payload).map_err(|reason| StreamError::Decode {
            path: self.path.clone(),
            reason,
        })
    }

    /// Resolve and require a fixed rank (`Ix1` for labels, `Ix2` for features)
    pub fn resolve<D: Dimension>(&self) -> Result<Array<f32, D>> {
        let array = self.resolve_dyn()?;
        let actual = array.shape().to_vec();
        array
            .into_dimensionality::<D>()
            .map_err(|_| StreamError::Shape {
                path: self.path.clone(),
                expected: D::NDIM.unwrap_or(actual.len()),
                actual,
            })
    }
}

/// Decode an npy payload, widening or narrowing the stored dtype to f32
fn decode_f32(payload: &[u8]) -> std::result::Result<ArrayD<f32>, String> {
    if let Some(array) = read_as::<f32>(payload)? {
        return Ok(array);
    }
    if let Some(array) = read_as::<f64>(payload)? {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Some(array) = read_as::<i64>(payload)? {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Some(array) = read_as::<i32>(payload)? {
        return Ok(array.mapv(|v| v as f32));
    }
    Err("unsupported dtype (expected float32, float64, int32 or int64)".into())
}

/// `Ok(None)` when the payload holds a different dtype
fn read_as<A: ReadableElement>(payload: &[u8]) -> std::result::Result<Option<ArrayD<A>>, String> {
    match ArrayD::<A>::read_npy(payload) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

/// Serialize an array as gzip-compressed npy, creating parent directories
pub fn write_array<S, D>(
    path: impl AsRef<Path>,
    array: &ArrayBase<S, D>,
    level: CompressionLevel,
) -> Result<()>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let path = path.as_ref();
    let io_error = |source: io::Error| StreamError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut payload = Vec::new();
    array
        .write_npy(&mut payload)
        .map_err(|e| io_error(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;

    let compressed = compress(&payload, level).map_err(io_error)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, &compressed).map_err(io_error)?;

    debug!(
        "Wrote {} (shape {:?}, {} bytes)",
        path.display(),
        array.shape(),
        compressed.len()
    );
    Ok(())
}

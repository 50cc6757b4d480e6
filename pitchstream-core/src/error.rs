//! Error types for pitchstream
//!
//! Covers filesystem, array format, dataset alignment and configuration
//! failures. None of these are retried: the first one ends the stream.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all pitchstream operations
#[derive(Debug, Error)]
pub enum StreamError {
    // ========== Filesystem Errors ==========

    /// Dataset root or subdirectory is missing
    #[error("Dataset directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// Read or listing failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ========== Format Errors ==========

    /// Gzip stream could not be decoded
    #[error("Failed to decompress {}: {source}", path.display())]
    Decompression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Npy payload is invalid or has an unsupported dtype
    #[error("Failed to decode array in {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Array has the wrong number of dimensions
    #[error("Array in {} has shape {actual:?}, expected {expected} dimensions", path.display())]
    Shape {
        path: PathBuf,
        expected: usize,
        actual: Vec<usize>,
    },

    // ========== Alignment Errors ==========

    /// Feature columns and label entries disagree for one file
    #[error("Misaligned file {key}: {columns} feature columns, {labels} labels")]
    Misaligned {
        key: String,
        columns: usize,
        labels: usize,
    },

    /// Feature matrices of different files have different row counts
    #[error("Feature dimension mismatch in {key}: expected {expected}, got {actual}")]
    FeatureDimMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    /// A labelled file has no counterpart in the feature directory
    #[error("Key {key} missing from {subdirectory}")]
    MissingKey { key: String, subdirectory: String },

    // ========== Data Errors ==========

    /// Every label in the dataset is zero
    #[error("Dataset has no samples with a non-zero label")]
    NoSamples,

    // ========== Configuration Errors ==========

    /// Configuration value is invalid
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl StreamError {
    /// Returns true if this error came from the filesystem
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self,
            StreamError::DirectoryNotFound { .. } | StreamError::Io { .. }
        )
    }

    /// Returns true if a file exists but its contents are unusable
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            StreamError::Decompression { .. }
                | StreamError::Decode { .. }
                | StreamError::Shape { .. }
        )
    }

    /// Returns true if the dataset's files disagree with each other
    pub fn is_alignment(&self) -> bool {
        matches!(
            self,
            StreamError::Misaligned { .. }
                | StreamError::FeatureDimMismatch { .. }
                | StreamError::MissingKey { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        StreamError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type alias for pitchstream operations
pub type Result<T> = std::result::Result<T, StreamError>;

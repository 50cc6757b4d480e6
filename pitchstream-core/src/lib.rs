//! Pitchstream Core - Lazy loading and multiplexed minibatch streaming
//!
//! This crate feeds a pitch-estimation training loop from a directory of
//! gzip-compressed npy files:
//! - Lazy per-file array loading
//! - Dataset assembly from label and feature subdirectories
//! - Infinite per-file sample streams
//! - A multiplexed batch generator that approximates global shuffling
//!   while holding only a bounded pool of files in memory

pub mod compression;
pub mod data;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod storage;

pub use data::{Batch, BatchGenerator, Dataset, DatasetConfig, FeatureType, Sample};
pub use error::{Result, StreamError};
pub use generator::{from_dataset, generator, raw_generator, stft_generator, GeneratorConfig};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use storage::{write_array, LazyArray};

/// Suffix shared by every array file of a dataset
pub const ARRAY_SUFFIX: &str = ".npy.gz";

/// Default number of samples per batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default size of the active stream pool
pub const DEFAULT_ACTIVE_STREAMS: usize = 16;

/// Default number of samples drawn from one activation before rotation
pub const DEFAULT_ROTATE_AFTER: usize = 256;

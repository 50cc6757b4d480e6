//! Sampling pipeline
//!
//! Dataset assembly, per-file sample streams, stream multiplexing and batch
//! generation. Everything runs on the caller's thread and advances only when
//! the consumer pulls.

pub mod batch;
pub mod dataset;
pub mod loader;
pub mod multiplexer;
pub mod source;
pub mod stream;

pub use batch::{Batch, BatchBuilder};
pub use dataset::{Dataset, DatasetConfig, FeatureType};
pub use loader::{BatchGenerator, Mode, SequentialSchedule};
pub use multiplexer::{MultiplexConfig, Multiplexer};
pub use source::{FeatureSource, FileSource, SourceSet};
pub use stream::{FileStream, Sample};

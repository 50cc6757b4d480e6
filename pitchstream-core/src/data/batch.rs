//! Batch assembly
//!
//! Samples are stacked row by row into a reusable buffer until a batch is
//! full. Leftover samples stay in the buffer for the next batch.

use ndarray::{Array1, Array2};

use super::stream::Sample;

/// A training minibatch
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Stacked feature vectors, shape (batch_size, feature_dim)
    pub features: Array2<f32>,
    /// Labels, shape (batch_size,)
    pub labels: Array1<f32>,
}

impl Batch {
    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Feature vector length
    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }
}

/// Output buffer owned by a generator
#[derive(Debug)]
pub struct BatchBuilder {
    batch_size: usize,
    feature_dim: usize,
    features: Vec<f32>,
    labels: Vec<f32>,
}

impl BatchBuilder {
    /// Create a builder for batches of `batch_size` rows of `feature_dim` values
    pub fn new(batch_size: usize, feature_dim: usize) -> Self {
        assert!(batch_size > 0, "BatchBuilder: batch_size must be positive");
        Self {
            batch_size,
            feature_dim,
            features: Vec::with_capacity(batch_size * feature_dim),
            labels: Vec::with_capacity(batch_size),
        }
    }

    /// Rows per emitted batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Values per row
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Samples waiting for the next batch
    pub fn pending(&self) -> usize {
        self.labels.len()
    }

    /// Append a sample, returning a batch once `batch_size` rows are buffered.
    ///
    /// # Panics
    /// Panics if the sample's length differs from `feature_dim`.
    pub fn push(&mut self, sample: Sample) -> Option<Batch> {
        assert_eq!(
            sample.features.len(),
            self.feature_dim,
            "BatchBuilder: sample has {} features, expected {}",
            sample.features.len(),
            self.feature_dim
        );

        self.features.extend(sample.features.iter().copied());
        self.labels.push(sample.label);

        if self.labels.len() < self.batch_size {
            return None;
        }

        let features = std::mem::replace(
            &mut self.features,
            Vec::with_capacity(self.batch_size * self.feature_dim),
        );
        let labels = std::mem::replace(&mut self.labels, Vec::with_capacity(self.batch_size));

        let features = Array2::from_shape_vec((self.batch_size, self.feature_dim), features)
            .expect("buffer length is batch_size * feature_dim");
        Some(Batch {
            features,
            labels: Array1::from(labels),
        })
    }
}

//! Per-file sample streams
//!
//! A [`FileStream`] walks the columns of one feature matrix in a fixed order,
//! skipping columns whose label is zero, and wraps around forever.

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

/// One training example: a feature column and its label
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Feature vector of length M (one column of the M x N matrix)
    pub features: Array1<f32>,
    /// Non-zero label
    pub label: f32,
    /// Column the sample was taken from
    pub column: usize,
}

/// Infinite, restartable stream over one file's samples
#[derive(Debug, Clone)]
pub struct FileStream {
    key: String,
    features: Arc<Array2<f32>>,
    labels: Arc<Array1<f32>>,
    /// Columns with a non-zero label, in visiting order
    order: Vec<usize>,
    position: usize,
    passes: u64,
}

impl FileStream {
    /// Build a stream over `features` (M x N) and `labels` (N).
    ///
    /// With `shuffle`, the column order is permuted once here and then kept
    /// for every pass.
    ///
    /// # Panics
    /// Panics if the feature matrix has a different number of columns than
    /// there are labels. A misaligned file must never produce samples.
    pub fn new<R: Rng + ?Sized>(
        key: impl Into<String>,
        features: Arc<Array2<f32>>,
        labels: Arc<Array1<f32>>,
        shuffle: bool,
        rng: &mut R,
    ) -> Self {
        let key = key.into();
        assert_eq!(
            features.ncols(),
            labels.len(),
            "FileStream {key}: feature matrix has {} columns but {} labels",
            features.ncols(),
            labels.len()
        );

        let mut indices: Vec<usize> = (0..labels.len()).collect();
        if shuffle {
            indices.shuffle(rng);
        }
        let order = indices.into_iter().filter(|&i| labels[i] != 0.0).collect();

        Self {
            key,
            features,
            labels,
            order,
            position: 0,
            passes: 0,
        }
    }

    /// File key this stream reads from
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Samples yielded by one full pass (the non-zero label count)
    pub fn samples_per_pass(&self) -> usize {
        self.order.len()
    }

    /// Whether the file contributes nothing
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Length of each feature vector
    pub fn feature_dim(&self) -> usize {
        self.features.nrows()
    }

    /// Visiting order of the accepted columns
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Position within the current pass
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of times the order has wrapped around
    pub fn passes_completed(&self) -> u64 {
        self.passes
    }
}

impl Iterator for FileStream {
    type Item = Sample;

    /// Never returns `None` unless every label of the file is zero.
    fn next(&mut self) -> Option<Sample> {
        let column = *self.order.get(self.position)?;

        self.position += 1;
        if self.position == self.order.len() {
            self.position = 0;
            self.passes += 1;
        }

        Some(Sample {
            features: self.features.column(column).to_owned(),
            label: self.labels[column],
            column,
        })
    }
}

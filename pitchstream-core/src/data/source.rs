//! Per-file stream sources
//!
//! A [`FileSource`] keeps what is needed to instantiate a fresh
//! [`FileStream`] for one file. Labels are always resident since the key set
//! and per-pass sample counts come from them. Features are either resident
//! (shared through `Arc`) or deferred, in which case they are read when a
//! stream is opened and freed when that stream is dropped.

use ndarray::{Array1, Array2, Ix2};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use super::stream::FileStream;
use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::storage::LazyArray;

/// Where a file's feature matrix comes from
#[derive(Debug, Clone)]
pub enum FeatureSource {
    /// Already decoded
    Resident(Arc<Array2<f32>>),
    /// Read from disk every time a stream is opened
    Deferred(LazyArray),
}

/// Inputs for one file's streams
#[derive(Debug, Clone)]
pub struct FileSource {
    key: String,
    labels: Arc<Array1<f32>>,
    features: FeatureSource,
    samples_per_pass: usize,
}

impl FileSource {
    /// Source with features already in memory
    pub fn resident(key: impl Into<String>, features: Array2<f32>, labels: Array1<f32>) -> Self {
        Self::new(key.into(), FeatureSource::Resident(Arc::new(features)), labels)
    }

    /// Source whose features are read when a stream is opened
    pub fn deferred(key: impl Into<String>, features: LazyArray, labels: Array1<f32>) -> Self {
        Self::new(key.into(), FeatureSource::Deferred(features), labels)
    }

    fn new(key: String, features: FeatureSource, labels: Array1<f32>) -> Self {
        let samples_per_pass = labels.iter().filter(|&&y| y != 0.0).count();
        Self {
            key,
            labels: Arc::new(labels),
            features,
            samples_per_pass,
        }
    }

    /// File key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Label vector, one entry per feature column
    pub fn labels(&self) -> &Array1<f32> {
        &self.labels
    }

    /// Resident or deferred feature matrix
    pub fn features(&self) -> &FeatureSource {
        &self.features
    }

    /// Non-zero labels, i.e. samples in one full pass
    pub fn samples_per_pass(&self) -> usize {
        self.samples_per_pass
    }

    /// Whether the features are already in memory
    pub fn is_resident(&self) -> bool {
        matches!(self.features, FeatureSource::Resident(_))
    }

    /// Error out instead of letting `FileStream::new` panic
    fn check_alignment(&self, features: &Array2<f32>) -> Result<()> {
        if features.ncols() != self.labels.len() {
            return Err(StreamError::Misaligned {
                key: self.key.clone(),
                columns: features.ncols(),
                labels: self.labels.len(),
            });
        }
        Ok(())
    }
}

/// All files a generator draws from, plus the checks they must pass
#[derive(Debug)]
pub struct SourceSet {
    sources: Vec<FileSource>,
    feature_dim: Option<usize>,
    metrics: Arc<StreamMetrics>,
}

impl SourceSet {
    /// Validate resident sources and wrap them.
    ///
    /// Fails with `NoSamples` when no file has a non-zero label, and with an
    /// alignment error when a resident feature matrix disagrees with its
    /// labels or with the other files' feature dimension.
    pub fn new(sources: Vec<FileSource>, metrics: Arc<StreamMetrics>) -> Result<Self> {
        let mut feature_dim = None;

        for source in &sources {
            if source.samples_per_pass == 0 {
                warn!("File {} has no non-zero labels and will be skipped", source.key);
            }
            if let FeatureSource::Resident(features) = &source.features {
                source.check_alignment(features)?;
                check_dim(&mut feature_dim, &source.key, features.nrows())?;
            }
        }

        if sources.iter().all(|s| s.samples_per_pass == 0) {
            return Err(StreamError::NoSamples);
        }

        Ok(Self {
            sources,
            feature_dim,
            metrics,
        })
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether there are no files at all
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Source at `index`, in key order
    pub fn get(&self, index: usize) -> &FileSource {
        &self.sources[index]
    }

    /// Sources in key order
    pub fn iter(&self) -> impl Iterator<Item = &FileSource> {
        self.sources.iter()
    }

    /// Feature dimension, once any file's features have been seen
    pub fn feature_dim(&self) -> Option<usize> {
        self.feature_dim
    }

    /// Counters shared by every stream opened from this set
    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Instantiate a fresh stream for the file at `index`
    pub fn open<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<FileStream> {
        let source = &self.sources[index];

        let features = match &source.features {
            FeatureSource::Resident(features) => Arc::clone(features),
            FeatureSource::Deferred(loader) => {
                let features = self
                    .metrics
                    .file_load_seconds
                    .time(|| loader.resolve::<Ix2>())?;
                self.metrics.files_loaded.inc();
                source.check_alignment(&features)?;
                check_dim(&mut self.feature_dim, &source.key, features.nrows())?;
                Arc::new(features)
            }
        };

        self.metrics.streams_activated.inc();
        debug!(
            "Opened stream for {} ({} samples per pass, shuffle={})",
            source.key, source.samples_per_pass, shuffle
        );

        Ok(FileStream::new(
            source.key.clone(),
            features,
            Arc::clone(&source.labels),
            shuffle,
            rng,
        ))
    }
}

fn check_dim(expected: &mut Option<usize>, key: &str, actual: usize) -> Result<()> {
    match *expected {
        None => {
            *expected = Some(actual);
            Ok(())
        }
        Some(dim) if dim == actual => Ok(()),
        Some(dim) => Err(StreamError::FeatureDimMismatch {
            key: key.to_owned(),
            expected: dim,
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionLevel;
    use crate::storage::write_array;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn metrics() -> Arc<StreamMetrics> {
        Arc::new(StreamMetrics::new())
    }

    #[test]
    fn test_samples_per_pass_counts_non_zero() {
        let source = FileSource::resident("a", Array2::zeros((2, 4)), array![0.0, 1.0, 0.0, 2.0]);
        assert_eq!(source.samples_per_pass(), 2);
        assert!(source.is_resident());
    }

    #[test]
    fn test_all_empty_is_no_samples() {
        let sources = vec![
            FileSource::resident("a", Array2::zeros((2, 2)), array![0.0, 0.0]),
            FileSource::resident("b", Array2::zeros((2, 1)), array![0.0]),
        ];
        let err = SourceSet::new(sources, metrics()).unwrap_err();
        assert!(matches!(err, StreamError::NoSamples));
    }

    #[test]
    fn test_resident_misalignment_is_an_error() {
        let sources = vec![FileSource::resident("a", Array2::zeros((2, 10)), Array1::ones(9))];
        let err = SourceSet::new(sources, metrics()).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Misaligned { columns: 10, labels: 9, .. }
        ));
    }

    #[test]
    fn test_feature_dim_mismatch() {
        let sources = vec![
            FileSource::resident("a", Array2::zeros((3, 1)), array![1.0]),
            FileSource::resident("b", Array2::zeros((4, 1)), array![1.0]),
        ];
        let err = SourceSet::new(sources, metrics()).unwrap_err();
        assert!(matches!(
            err,
            StreamError::FeatureDimMismatch { expected: 3, actual: 4, .. }
        ));
    }

    #[test]
    fn test_deferred_open_reads_file_each_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.npy.gz");
        write_array(&path, &array![[1.0f32, 2.0], [3.0, 4.0]], CompressionLevel::FAST).unwrap();

        let metrics = metrics();
        let source = FileSource::deferred("a", LazyArray::new(&path), array![5.0, 0.0]);
        let mut set = SourceSet::new(vec![source], Arc::clone(&metrics)).unwrap();
        assert_eq!(set.feature_dim(), None);

        let mut rng = StdRng::seed_from_u64(0);
        let mut stream = set.open(0, false, &mut rng).unwrap();
        let sample = stream.next().unwrap();
        assert_eq!(sample.features, array![1.0f32, 3.0]);
        assert_eq!(set.feature_dim(), Some(2));

        set.open(0, true, &mut rng).unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_loaded, 2);
        assert_eq!(snapshot.streams_activated, 2);
        assert_eq!(snapshot.file_load_count, 2);
    }

    #[test]
    fn test_deferred_misalignment_surfaces_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.npy.gz");
        write_array(&path, &Array2::<f32>::zeros((2, 3)), CompressionLevel::FAST).unwrap();

        let source = FileSource::deferred("a", LazyArray::new(&path), array![1.0, 1.0]);
        let mut set = SourceSet::new(vec![source], metrics()).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let err = set.open(0, false, &mut rng).unwrap_err();
        assert!(err.is_alignment());
    }
}

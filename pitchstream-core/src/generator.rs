//! Generator facade
//!
//! Turns a dataset location and a handful of knobs into a ready
//! [`BatchGenerator`]: loads the dataset, resolves labels and the selected
//! features, checks that they line up and picks the sampling mode.

use ndarray::{Array, Dimension, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::{
    BatchGenerator, Dataset, DatasetConfig, FeatureType, FileSource, MultiplexConfig, SourceSet,
};
use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::storage::ArrayEntry;
use crate::{DEFAULT_ACTIVE_STREAMS, DEFAULT_BATCH_SIZE, DEFAULT_ROTATE_AFTER};

/// Everything needed to build a generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Dataset location and layout
    pub dataset: DatasetConfig,
    /// Feature representation to sample
    pub feature: FeatureType,
    /// Multiplex shuffled streams instead of walking files in order
    pub shuffle: bool,
    /// Samples per batch
    pub batch_size: usize,
    /// Active stream pool size (shuffled mode)
    pub active_streams: usize,
    /// Samples per activation before a stream is rotated out (shuffled mode)
    pub rotate_after: usize,
    /// Fixed RNG seed; entropy when unset
    pub seed: Option<u64>,
    /// Read features when a stream opens instead of up front
    pub defer_features: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            feature: FeatureType::default(),
            shuffle: true,
            batch_size: DEFAULT_BATCH_SIZE,
            active_streams: DEFAULT_ACTIVE_STREAMS,
            rotate_after: DEFAULT_ROTATE_AFTER,
            seed: None,
            defer_features: false,
        }
    }
}

impl GeneratorConfig {
    /// Defaults for the dataset rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dataset: DatasetConfig::new(root),
            ..Default::default()
        }
    }

    /// Select the feature type
    pub fn with_feature(mut self, feature: FeatureType) -> Self {
        self.feature = feature;
        self
    }

    /// Toggle multiplexed shuffling
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set samples per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Fix the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Toggle reading features on stream activation
    pub fn with_defer_features(mut self, defer: bool) -> Self {
        self.defer_features = defer;
        self
    }

    /// Multiplexer settings derived from this config
    pub fn multiplex(&self) -> MultiplexConfig {
        MultiplexConfig {
            active_streams: self.active_streams,
            rotate_after: self.rotate_after,
            shuffle: self.shuffle,
        }
    }

    /// Reject sizes that would make the generator stall
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(StreamError::invalid_config("batch_size must be positive"));
        }
        if self.active_streams == 0 {
            return Err(StreamError::invalid_config("active_streams must be positive"));
        }
        if self.rotate_after == 0 {
            return Err(StreamError::invalid_config("rotate_after must be positive"));
        }
        Ok(())
    }

    /// Defaults overridden by `PITCHSTREAM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("PITCHSTREAM_DATASET") {
            config.dataset.root = PathBuf::from(root);
        }
        if let Some(feature) = lookup("PITCHSTREAM_FEATURE") {
            config.feature = feature.parse()?;
        }
        if let Some(shuffle) = parse_flag(&lookup, "PITCHSTREAM_SHUFFLE")? {
            config.shuffle = shuffle;
        }
        if let Some(size) = parse_var(&lookup, "PITCHSTREAM_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(active) = parse_var(&lookup, "PITCHSTREAM_ACTIVE_STREAMS")? {
            config.active_streams = active;
        }
        if let Some(rotate) = parse_var(&lookup, "PITCHSTREAM_ROTATE_AFTER")? {
            config.rotate_after = rotate;
        }
        config.seed = parse_var(&lookup, "PITCHSTREAM_SEED")?;
        if let Some(lazy) = parse_flag(&lookup, "PITCHSTREAM_LAZY")? {
            config.dataset = config.dataset.with_lazy(lazy);
        }
        if let Some(defer) = parse_flag(&lookup, "PITCHSTREAM_DEFER_FEATURES")? {
            config.defer_features = defer;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| StreamError::invalid_config(format!("{name}={value}: {e}")))
        })
        .transpose()
}

fn parse_flag<F>(lookup: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(StreamError::invalid_config(format!(
                "{name}={value}: expected a boolean"
            ))),
        })
        .transpose()
}

/// Load the configured dataset and build a generator over it
pub fn generator(config: &GeneratorConfig) -> Result<BatchGenerator> {
    config.validate()?;
    let dataset = Dataset::load(&config.dataset)?;
    from_dataset(dataset, config)
}

/// Build a generator from an already loaded dataset.
///
/// Every label key must have a feature file. Labels are always resolved
/// here; features too unless `defer_features` is set and the entry is lazy.
pub fn from_dataset(dataset: Dataset, config: &GeneratorConfig) -> Result<BatchGenerator> {
    config.validate()?;

    let layout = &config.dataset;
    let feature_dir = layout.feature_dir(config.feature);
    let labels_path = |key: &str| entry_path(&layout.root, &layout.labels_dir, key, &layout.suffix);
    let features_path = |key: &str| entry_path(&layout.root, feature_dir, key, &layout.suffix);

    let (labels, mut features) = dataset.into_parts(config.feature);
    let mut sources = Vec::with_capacity(labels.len());

    for (key, entry) in labels {
        let labels = resolve_entry::<Ix1>(entry, || labels_path(&key))?;

        let Some(entry) = features.remove(&key) else {
            return Err(StreamError::MissingKey {
                key,
                subdirectory: feature_dir.to_owned(),
            });
        };

        let source = match entry {
            ArrayEntry::Lazy(loader) if config.defer_features => {
                FileSource::deferred(key, loader, labels)
            }
            entry => {
                let matrix = resolve_entry::<Ix2>(entry, || features_path(&key))?;
                FileSource::resident(key, matrix, labels)
            }
        };
        sources.push(source);
    }

    if !features.is_empty() {
        debug!(
            "{} {} files have no labels and are ignored",
            features.len(),
            config.feature
        );
    }

    let sources = SourceSet::new(sources, Arc::new(StreamMetrics::new()))?;
    info!(
        "Generator over {} ({} features, {} files, shuffle={})",
        layout.root.display(),
        config.feature,
        sources.len(),
        config.shuffle
    );

    if config.shuffle {
        BatchGenerator::multiplexed(sources, config.batch_size, config.multiplex(), config.seed)
    } else {
        BatchGenerator::sequential(sources, config.batch_size, config.seed)
    }
}

/// Raw-feature generator with default batch settings
pub fn raw_generator(dataset: impl Into<PathBuf>, shuffle: bool) -> Result<BatchGenerator> {
    let config = GeneratorConfig::new(dataset)
        .with_feature(FeatureType::Raw)
        .with_shuffle(shuffle);
    generator(&config)
}

/// Spectral-feature generator with default batch settings
pub fn stft_generator(dataset: impl Into<PathBuf>, shuffle: bool) -> Result<BatchGenerator> {
    let config = GeneratorConfig::new(dataset)
        .with_feature(FeatureType::Transformed)
        .with_shuffle(shuffle);
    generator(&config)
}

fn entry_path(root: &Path, subdirectory: &str, key: &str, suffix: &str) -> PathBuf {
    root.join(subdirectory).join(format!("{key}{suffix}"))
}

/// Resolve an entry to a fixed rank, naming the file on a shape error
fn resolve_entry<D: Dimension>(
    entry: ArrayEntry,
    path: impl FnOnce() -> PathBuf,
) -> Result<Array<f32, D>> {
    match entry {
        ArrayEntry::Lazy(loader) => loader.resolve::<D>(),
        ArrayEntry::Loaded(array) => {
            let actual = array.shape().to_vec();
            array
                .into_dimensionality::<D>()
                .map_err(|_| StreamError::Shape {
                    path: path(),
                    expected: D::NDIM.unwrap_or(actual.len()),
                    actual,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Mode;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GeneratorConfig::default();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.active_streams, 16);
        assert_eq!(config.rotate_after, 256);
        assert_eq!(config.feature, FeatureType::Transformed);
        assert!(config.shuffle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        for config in [
            GeneratorConfig::default().with_batch_size(0),
            GeneratorConfig {
                active_streams: 0,
                ..Default::default()
            },
            GeneratorConfig {
                rotate_after: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(StreamError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GeneratorConfig::from_lookup(lookup(&[
            ("PITCHSTREAM_DATASET", "/data/medley"),
            ("PITCHSTREAM_FEATURE", "raw"),
            ("PITCHSTREAM_SHUFFLE", "false"),
            ("PITCHSTREAM_BATCH_SIZE", "64"),
            ("PITCHSTREAM_SEED", "42"),
            ("PITCHSTREAM_LAZY", "0"),
            ("PITCHSTREAM_DEFER_FEATURES", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.dataset.root, PathBuf::from("/data/medley"));
        assert_eq!(config.feature, FeatureType::Raw);
        assert!(!config.shuffle);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.active_streams, 16);
        assert_eq!(config.seed, Some(42));
        assert!(!config.dataset.lazy);
        assert!(config.defer_features);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = GeneratorConfig::from_lookup(lookup(&[("PITCHSTREAM_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("PITCHSTREAM_BATCH_SIZE"));

        let err = GeneratorConfig::from_lookup(lookup(&[("PITCHSTREAM_SHUFFLE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig { .. }));

        let err = GeneratorConfig::from_lookup(lookup(&[("PITCHSTREAM_ROTATE_AFTER", "0")]))
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig { .. }));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = GeneratorConfig::new("mdb").with_seed(7).with_shuffle(false);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GeneratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: GeneratorConfig = serde_json::from_str(r#"{"feature": "stft"}"#).unwrap();
        assert_eq!(partial.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_loaded_entries_are_checked() {
        use ndarray::{array, ArrayD, IxDyn};

        let mut dataset = Dataset::default();
        dataset.labels.insert(
            "a".into(),
            ArrayEntry::Loaded(array![0.0f32, 1.0, 2.0].into_dyn()),
        );
        dataset.transformed.insert(
            "a".into(),
            ArrayEntry::Loaded(ArrayD::zeros(IxDyn(&[4, 3]))),
        );

        let config = GeneratorConfig::new("mem").with_shuffle(false).with_batch_size(2);
        let generator = from_dataset(dataset.clone(), &config).unwrap();
        assert_eq!(generator.mode(), Mode::Sequential);
        assert_eq!(generator.feature_dim(), Some(4));

        let err = from_dataset(dataset.clone(), &config.clone().with_feature(FeatureType::Raw))
            .unwrap_err();
        assert!(matches!(err, StreamError::MissingKey { ref subdirectory, .. } if subdirectory == "raw"));

        dataset.transformed.insert(
            "a".into(),
            ArrayEntry::Loaded(ArrayD::zeros(IxDyn(&[12]))),
        );
        match from_dataset(dataset, &config).unwrap_err() {
            StreamError::Shape { path, expected, actual } => {
                assert_eq!(path, PathBuf::from("mem/stft/a.npy.gz"));
                assert_eq!(expected, 2);
                assert_eq!(actual, vec![12]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

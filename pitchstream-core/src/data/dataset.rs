//! Dataset layout and assembly
//!
//! A dataset root holds three parallel subdirectories keyed by the same
//! file names: per-sample labels, raw time-domain features and transformed
//! (spectral) features.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::error::{Result, StreamError};
use crate::storage::{load_directory, ArrayMap};
use crate::ARRAY_SUFFIX;

/// Dataset location and naming convention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset root directory
    pub root: PathBuf,
    /// Subdirectory of per-sample labels (fundamental frequencies)
    pub labels_dir: String,
    /// Subdirectory of raw time-domain frames
    pub raw_dir: String,
    /// Subdirectory of spectral frames
    pub transformed_dir: String,
    /// File suffix shared by all array files
    pub suffix: String,
    /// Keep loaders instead of decoding every file on load
    pub lazy: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("mdbsynth"),
            labels_dir: "frequencies".into(),
            raw_dir: "raw".into(),
            transformed_dir: "stft".into(),
            suffix: ARRAY_SUFFIX.into(),
            lazy: true,
        }
    }
}

impl DatasetConfig {
    /// Default layout under the given root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Toggle lazy loading
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Subdirectory holding the given feature type
    pub fn feature_dir(&self, feature: FeatureType) -> &str {
        match feature {
            FeatureType::Raw => &self.raw_dir,
            FeatureType::Transformed => &self.transformed_dir,
        }
    }
}

/// Which feature representation to train on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Time-domain frames
    Raw,
    /// Spectral frames
    #[default]
    #[serde(alias = "stft")]
    Transformed,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureType::Raw => write!(f, "raw"),
            FeatureType::Transformed => write!(f, "transformed"),
        }
    }
}

impl FromStr for FeatureType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(FeatureType::Raw),
            "transformed" | "stft" => Ok(FeatureType::Transformed),
            other => Err(StreamError::invalid_config(format!(
                "unknown feature type '{other}' (expected raw or transformed)"
            ))),
        }
    }
}

/// The three key-aligned mappings of a dataset
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Per-sample labels, one 1-D array per file
    pub labels: ArrayMap,
    /// Raw features, one (M_raw x N) array per file
    pub raw: ArrayMap,
    /// Transformed features, one (M_trans x N) array per file
    pub transformed: ArrayMap,
}

impl Dataset {
    /// Load all three subdirectories under the configured root.
    ///
    /// Key sets are not compared; see [`common_keys`](Self::common_keys).
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let labels = load_directory(&config.root, &config.labels_dir, &config.suffix, config.lazy)?;
        let raw = load_directory(&config.root, &config.raw_dir, &config.suffix, config.lazy)?;
        let transformed = load_directory(
            &config.root,
            &config.transformed_dir,
            &config.suffix,
            config.lazy,
        )?;

        info!(
            "Dataset {} loaded: {} label files, {} raw, {} transformed",
            config.root.display(),
            labels.len(),
            raw.len(),
            transformed.len()
        );

        Ok(Self {
            labels,
            raw,
            transformed,
        })
    }

    /// Feature mapping for the given type
    pub fn features(&self, feature: FeatureType) -> &ArrayMap {
        match feature {
            FeatureType::Raw => &self.raw,
            FeatureType::Transformed => &self.transformed,
        }
    }

    /// Split into labels and the selected features, dropping the other type
    pub fn into_parts(self, feature: FeatureType) -> (ArrayMap, ArrayMap) {
        match feature {
            FeatureType::Raw => (self.labels, self.raw),
            FeatureType::Transformed => (self.labels, self.transformed),
        }
    }

    /// Keys present in all three mappings, sorted
    pub fn common_keys(&self) -> Vec<String> {
        let raw: BTreeSet<&String> = self.raw.keys().collect();
        let transformed: BTreeSet<&String> = self.transformed.keys().collect();
        self.labels
            .keys()
            .filter(|key| raw.contains(key) && transformed.contains(key))
            .cloned()
            .collect()
    }
}

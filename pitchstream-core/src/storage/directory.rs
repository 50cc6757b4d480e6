//! Directory listing into keyed array maps
//!
//! Each file `<key><suffix>` in a subdirectory becomes one entry keyed by
//! `<key>`. Lazy mode stores loaders; eager mode decodes every file up front.

use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::array::LazyArray;
use crate::error::{Result, StreamError};

/// One file of a subdirectory, either deferred or already decoded
#[derive(Debug, Clone)]
pub enum ArrayEntry {
    Lazy(LazyArray),
    Loaded(ArrayD<f32>),
}

impl ArrayEntry {
    /// Whether the file still has to be read
    pub fn is_lazy(&self) -> bool {
        matches!(self, ArrayEntry::Lazy(_))
    }

    /// Owned copy of the array. Lazy entries re-read the file every call.
    pub fn resolve(&self) -> Result<ArrayD<f32>> {
        match self {
            ArrayEntry::Lazy(loader) => loader.resolve_dyn(),
            ArrayEntry::Loaded(array) => Ok(array.clone()),
        }
    }

    /// Like [`resolve`](Self::resolve) without cloning loaded arrays
    pub fn into_resolved(self) -> Result<ArrayD<f32>> {
        match self {
            ArrayEntry::Lazy(loader) => loader.resolve_dyn(),
            ArrayEntry::Loaded(array) => Ok(array),
        }
    }
}

/// Key (file name minus suffix) to entry
pub type ArrayMap = BTreeMap<String, ArrayEntry>;

/// List `root/subdirectory` and map every `*suffix` file by key
pub fn load_directory(
    root: impl AsRef<Path>,
    subdirectory: &str,
    suffix: &str,
    lazy: bool,
) -> Result<ArrayMap> {
    let dir = root.as_ref().join(subdirectory);

    let entries = fs::read_dir(&dir).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            StreamError::DirectoryNotFound { path: dir.clone() }
        } else {
            StreamError::Io {
                path: dir.clone(),
                source,
            }
        }
    })?;

    let mut data = ArrayMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| StreamError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();

        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!("Skipping non UTF-8 file name in {}", dir.display());
            continue;
        };
        let Some(key) = file_name.strip_suffix(suffix) else {
            continue;
        };
        if !path.is_file() {
            warn!("Skipping {}: not a regular file", path.display());
            continue;
        }

        let loader = LazyArray::new(&path);
        let value = if lazy {
            ArrayEntry::Lazy(loader)
        } else {
            ArrayEntry::Loaded(loader.resolve_dyn()?)
        };
        debug!("Mapped {}/{} -> {}", subdirectory, key, path.display());
        data.insert(key.to_owned(), value);
    }

    info!(
        "Loaded {} {} files from {} ({})",
        data.len(),
        subdirectory,
        dir.display(),
        if lazy { "lazy" } else { "eager" }
    );

    Ok(data)
}

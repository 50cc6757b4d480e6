//! Array file storage
//!
//! Lazy loading of gzip-compressed npy files and directory mapping.

pub mod array;
pub mod directory;

pub use array::{write_array, LazyArray};
pub use directory::{load_directory, ArrayEntry, ArrayMap};

//! Randomized stream multiplexing
//!
//! Keeps a bounded pool of active file streams and draws each sample from a
//! uniformly chosen active stream. After `rotate_after` samples from one
//! activation, the stream is retired to the inactive pool and a uniformly
//! chosen inactive file takes its slot with a freshly shuffled stream. With
//! at least as many slots as files, every file stays active and nothing
//! rotates.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::source::SourceSet;
use super::stream::{FileStream, Sample};
use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::{DEFAULT_ACTIVE_STREAMS, DEFAULT_ROTATE_AFTER};

/// Pool size and rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexConfig {
    /// Maximum number of concurrently active streams
    pub active_streams: usize,
    /// Samples drawn from one activation before it is rotated out
    pub rotate_after: usize,
    /// Shuffle each file's column order when its stream is opened
    pub shuffle: bool,
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        Self {
            active_streams: DEFAULT_ACTIVE_STREAMS,
            rotate_after: DEFAULT_ROTATE_AFTER,
            shuffle: true,
        }
    }
}

/// An active stream and how much it has contributed since activation
#[derive(Debug)]
struct Slot {
    index: usize,
    stream: FileStream,
    drawn: usize,
}

/// Scheduler over an active and an inactive pool of files
#[derive(Debug)]
pub struct Multiplexer {
    sources: SourceSet,
    config: MultiplexConfig,
    active: Vec<Slot>,
    inactive: Vec<usize>,
    rng: StdRng,
}

impl Multiplexer {
    /// Fill the active pool with `min(active_streams, files)` streams.
    ///
    /// Files without non-zero labels never enter either pool.
    pub fn new(sources: SourceSet, config: MultiplexConfig, rng: StdRng) -> Result<Self> {
        if config.active_streams == 0 {
            return Err(StreamError::invalid_config("active_streams must be positive"));
        }
        if config.rotate_after == 0 {
            return Err(StreamError::invalid_config("rotate_after must be positive"));
        }

        let inactive: Vec<usize> = (0..sources.len())
            .filter(|&i| sources.get(i).samples_per_pass() > 0)
            .collect();
        let pool_size = config.active_streams.min(inactive.len());

        let mut mux = Self {
            sources,
            config,
            active: Vec::with_capacity(pool_size),
            inactive,
            rng,
        };
        while mux.active.len() < pool_size {
            mux.activate_random()?;
        }
        mux.metrics().active_streams.set(mux.active.len() as i64);

        info!(
            "Multiplexer ready: {} active of {} files, rotate after {} samples",
            mux.active.len(),
            mux.active.len() + mux.inactive.len(),
            config.rotate_after
        );

        Ok(mux)
    }

    /// Pool size and rotation settings
    pub fn config(&self) -> &MultiplexConfig {
        &self.config
    }

    /// Files this multiplexer draws from
    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    fn metrics(&self) -> &Arc<StreamMetrics> {
        self.sources.metrics()
    }

    /// Keys of the files currently being drawn from
    pub fn active_keys(&self) -> Vec<&str> {
        self.active.iter().map(|slot| slot.stream.key()).collect()
    }

    /// Keys of the files waiting for a slot
    pub fn inactive_keys(&self) -> Vec<&str> {
        self.inactive
            .iter()
            .map(|&i| self.sources.get(i).key())
            .collect()
    }

    /// Draw the next sample from a random active stream
    pub fn next_sample(&mut self) -> Result<Sample> {
        loop {
            if self.active.is_empty() {
                return Err(StreamError::NoSamples);
            }

            let pos = self.rng.gen_range(0..self.active.len());
            let slot = &mut self.active[pos];

            let Some(sample) = slot.stream.next() else {
                // labels said otherwise; drop the file for good
                let retired = self.active.swap_remove(pos);
                warn!("Stream {} produced no samples, retiring", retired.stream.key());
                if !self.inactive.is_empty() {
                    self.activate_random()?;
                }
                self.metrics().active_streams.set(self.active.len() as i64);
                continue;
            };

            slot.drawn += 1;
            if slot.drawn >= self.config.rotate_after && !self.inactive.is_empty() {
                self.rotate(pos)?;
            }
            return Ok(sample);
        }
    }

    /// Swap the stream at `pos` for a fresh one from the inactive pool
    fn rotate(&mut self, pos: usize) -> Result<()> {
        let retired = self.active.swap_remove(pos);
        self.activate_random()?;
        self.inactive.push(retired.index);
        self.metrics().rotations.inc();

        debug!(
            "Rotated out {} after {} samples",
            retired.stream.key(),
            retired.drawn
        );
        Ok(())
    }

    /// Move a uniformly chosen inactive file into the active pool
    fn activate_random(&mut self) -> Result<()> {
        let pick = self.rng.gen_range(0..self.inactive.len());
        let index = self.inactive.swap_remove(pick);
        let stream = self
            .sources
            .open(index, self.config.shuffle, &mut self.rng)?;
        self.active.push(Slot {
            index,
            stream,
            drawn: 0,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::FileSource;
    use ndarray::{Array1, Array2};
    use rand::SeedableRng;
    use std::collections::HashSet;

    /// `files` files of `n` samples each; feature row 0 holds the file number
    fn sources(files: usize, n: usize) -> SourceSet {
        let list = (0..files)
            .map(|f| {
                let features = Array2::from_elem((1, n), f as f32);
                FileSource::resident(format!("file{f:02}"), features, Array1::ones(n))
            })
            .collect();
        SourceSet::new(list, Arc::new(StreamMetrics::new())).unwrap()
    }

    fn config(active_streams: usize, rotate_after: usize) -> MultiplexConfig {
        MultiplexConfig {
            active_streams,
            rotate_after,
            shuffle: true,
        }
    }

    #[test]
    fn test_pool_capped_at_file_count() {
        let mux = Multiplexer::new(sources(3, 4), config(10, 5), StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mux.active_keys().len(), 3);
        assert!(mux.inactive_keys().is_empty());
    }

    #[test]
    fn test_no_rotation_when_all_active() {
        let mut mux = Multiplexer::new(sources(3, 4), config(3, 1), StdRng::seed_from_u64(1)).unwrap();
        for _ in 0..100 {
            mux.next_sample().unwrap();
        }
        assert_eq!(mux.metrics().rotations.get(), 0);
        assert_eq!(mux.metrics().streams_activated.get(), 3);
    }

    #[test]
    fn test_rotation_respects_pool_size() {
        let mut mux = Multiplexer::new(sources(6, 10), config(2, 3), StdRng::seed_from_u64(2)).unwrap();
        let mut seen = HashSet::new();

        for _ in 0..600 {
            let sample = mux.next_sample().unwrap();
            seen.insert(sample.features[0] as usize);

            let active: HashSet<&str> = mux.active_keys().into_iter().collect();
            assert_eq!(active.len(), 2);
            assert_eq!(mux.inactive_keys().len(), 4);
        }

        assert!(mux.metrics().rotations.get() > 0);
        assert_eq!(seen.len(), 6, "every file should eventually be drawn");
    }

    #[test]
    fn test_empty_files_are_excluded() {
        let list = vec![
            FileSource::resident("empty", Array2::zeros((1, 3)), Array1::zeros(3)),
            FileSource::resident("full", Array2::ones((1, 3)), Array1::ones(3)),
        ];
        let set = SourceSet::new(list, Arc::new(StreamMetrics::new())).unwrap();
        let mut mux = Multiplexer::new(set, config(2, 1), StdRng::seed_from_u64(3)).unwrap();

        assert_eq!(mux.active_keys(), vec!["full"]);
        for _ in 0..10 {
            assert_eq!(mux.next_sample().unwrap().features[0], 1.0);
        }
    }

    #[test]
    fn test_zero_pool_rejected() {
        let err = Multiplexer::new(sources(2, 2), config(0, 1), StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig { .. }));
    }
}

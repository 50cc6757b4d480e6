//! Batch generation
//!
//! Main interface handed to the training loop: an endless iterator of
//! fixed-size batches drawn either file by file or through the multiplexer.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::batch::{Batch, BatchBuilder};
use super::multiplexer::{MultiplexConfig, Multiplexer};
use super::source::SourceSet;
use super::stream::{FileStream, Sample};
use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;

/// Seeded or entropy-backed RNG
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// How samples are scheduled across files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One full unshuffled pass per file, files in key order
    Sequential,
    /// Random draws from a rotating pool of shuffled streams
    Multiplexed,
}

/// The stream currently being drained in sequential mode
#[derive(Debug)]
struct Pass {
    stream: FileStream,
    remaining: usize,
}

/// Walks files in key order, one full pass each, forever.
///
/// A pass over a file is exactly its number of non-zero labels, so the
/// underlying endless stream is never drained past one lap.
#[derive(Debug)]
pub struct SequentialSchedule {
    sources: SourceSet,
    cursor: usize,
    current: Option<Pass>,
    rng: StdRng,
    rounds: u64,
}

impl SequentialSchedule {
    /// Schedule starting at the first file in key order
    pub fn new(sources: SourceSet, rng: StdRng) -> Self {
        Self {
            sources,
            cursor: 0,
            current: None,
            rng,
            rounds: 0,
        }
    }

    /// Files being walked
    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Key of the file being drained, if a pass is in progress
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|pass| pass.stream.key())
    }

    /// Completed rounds over all files
    pub fn rounds_completed(&self) -> u64 {
        self.rounds
    }

    /// Next sample of the current pass, opening the next file when needed
    pub fn next_sample(&mut self) -> Result<Sample> {
        loop {
            if let Some(pass) = self.current.as_mut() {
                if let Some(sample) = pass.stream.next() {
                    pass.remaining -= 1;
                    if pass.remaining == 0 {
                        self.current = None;
                        self.advance();
                    }
                    return Ok(sample);
                }
                self.current = None;
                self.advance();
                continue;
            }

            let index = self.cursor;
            if self.sources.get(index).samples_per_pass() == 0 {
                self.advance();
                continue;
            }
            let stream = self.sources.open(index, false, &mut self.rng)?;
            self.current = Some(Pass {
                remaining: stream.samples_per_pass(),
                stream,
            });
        }
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.sources.len();
        if self.cursor == 0 {
            self.rounds += 1;
            debug!("Sequential round {} complete", self.rounds);
        }
    }
}

#[derive(Debug)]
enum Schedule {
    Sequential(SequentialSchedule),
    Multiplexed(Multiplexer),
}

impl Schedule {
    fn next_sample(&mut self) -> Result<Sample> {
        match self {
            Schedule::Sequential(s) => s.next_sample(),
            Schedule::Multiplexed(m) => m.next_sample(),
        }
    }

    fn sources(&self) -> &SourceSet {
        match self {
            Schedule::Sequential(s) => s.sources(),
            Schedule::Multiplexed(m) => m.sources(),
        }
    }
}

/// Endless iterator of training batches.
///
/// Yields `Ok(batch)` forever, or one `Err` followed by `None` if a file
/// fails to load. There are no retries.
#[derive(Debug)]
pub struct BatchGenerator {
    schedule: Schedule,
    batch_size: usize,
    builder: Option<BatchBuilder>,
    metrics: Arc<StreamMetrics>,
    finished: bool,
}

impl BatchGenerator {
    /// File-by-file generator over unshuffled streams
    pub fn sequential(sources: SourceSet, batch_size: usize, seed: Option<u64>) -> Result<Self> {
        info!(
            "Sequential generator over {} files, batch size {}",
            sources.len(),
            batch_size
        );
        let schedule = Schedule::Sequential(SequentialSchedule::new(sources, rng_from_seed(seed)));
        Self::new(schedule, batch_size)
    }

    /// Generator drawing from a rotating pool of shuffled streams
    pub fn multiplexed(
        sources: SourceSet,
        batch_size: usize,
        config: MultiplexConfig,
        seed: Option<u64>,
    ) -> Result<Self> {
        let schedule = Schedule::Multiplexed(Multiplexer::new(sources, config, rng_from_seed(seed))?);
        Self::new(schedule, batch_size)
    }

    fn new(schedule: Schedule, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(StreamError::invalid_config("batch_size must be positive"));
        }
        let metrics = Arc::clone(schedule.sources().metrics());
        let builder = schedule
            .sources()
            .feature_dim()
            .map(|dim| BatchBuilder::new(batch_size, dim));

        Ok(Self {
            schedule,
            batch_size,
            builder,
            metrics,
            finished: false,
        })
    }

    /// Scheduling mode
    pub fn mode(&self) -> Mode {
        match self.schedule {
            Schedule::Sequential(_) => Mode::Sequential,
            Schedule::Multiplexed(_) => Mode::Multiplexed,
        }
    }

    /// Rows per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Feature vector length; unknown until the first deferred file is read
    pub fn feature_dim(&self) -> Option<usize> {
        self.builder
            .as_ref()
            .map(BatchBuilder::feature_dim)
            .or_else(|| self.schedule.sources().feature_dim())
    }

    /// Keys of the files samples are currently drawn from
    pub fn active_keys(&self) -> Vec<&str> {
        match &self.schedule {
            Schedule::Sequential(s) => s.current_key().into_iter().collect(),
            Schedule::Multiplexed(m) => m.active_keys(),
        }
    }

    /// Number of files feeding this generator
    pub fn num_files(&self) -> usize {
        self.schedule.sources().len()
    }

    /// Shared handle to this generator's counters
    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Whether an error has ended the stream
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull samples until a batch is full
    pub fn next_batch(&mut self) -> Result<Batch> {
        loop {
            let sample = self.schedule.next_sample()?;
            self.metrics.samples_drawn.inc();

            let dim = sample.features.len();
            let batch_size = self.batch_size;
            let builder = self
                .builder
                .get_or_insert_with(|| BatchBuilder::new(batch_size, dim));

            if let Some(batch) = builder.push(sample) {
                self.metrics.batches_emitted.inc();
                return Ok(batch);
            }
        }
    }
}

impl Iterator for BatchGenerator {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_batch() {
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                error!("Batch generator stopped: {}", e);
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

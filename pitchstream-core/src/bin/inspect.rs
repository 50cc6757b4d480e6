//! Dataset inspection binary
//!
//! Builds a generator from `PITCHSTREAM_*` variables, pulls a few batches and
//! prints the resulting stream metrics as JSON.

use pitchstream_core::{generator, GeneratorConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GeneratorConfig::from_env()?;
    let batches: usize = match std::env::var("PITCHSTREAM_BATCHES") {
        Ok(value) => value.trim().parse()?,
        Err(_) => 10,
    };

    info!(
        "Inspecting {} ({} features, shuffle={}, batch size {})",
        config.dataset.root.display(),
        config.feature,
        config.shuffle,
        config.batch_size
    );

    let mut stream = match generator(&config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to build generator: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Generator ready: {:?} mode over {} files",
        stream.mode(),
        stream.num_files()
    );

    for (i, batch) in stream.by_ref().take(batches).enumerate() {
        let batch = batch?;
        let (lo, hi) = batch
            .labels
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &y| (lo.min(y), hi.max(y)));
        info!(
            "Batch {}: features {:?}, labels {:.2}..{:.2}",
            i,
            batch.features.dim(),
            lo,
            hi
        );
    }

    info!("Active files: {:?}", stream.active_keys());
    println!("{}", serde_json::to_string_pretty(&stream.metrics().snapshot())?);

    Ok(())
}

//! Metrics demo
//!
//! Records three episodes of five steps under one experiment, then prints the
//! exported tree.
//!
//! ```text
//! cargo run --example metrics_demo -- ./runs/demo
//! RUST_LOG=agenttrace=debug cargo run --example metrics_demo
//! ```

use agenttrace::prelude::*;
use agenttrace::{EpisodeArchiveReader, DEFAULT_RUN_DIR};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

const EPISODES: usize = 3;
const STEPS_PER_EPISODE: usize = 5;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "agenttrace=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let run_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_DIR));

    let tracer = Tracer::builder()
        .run_dir(&run_dir)
        .service_name("metrics_demo")
        .build()?;
    println!("run {} -> {}", tracer.run_id(), run_dir.display());

    {
        let _experiment = tracer.start_experiment("demo_experiment");
        for e in 0..EPISODES {
            let _episode = tracer.start_episode(&format!("episode_{}", e), None);
            for i in 0..STEPS_PER_EPISODE {
                tracer.log([
                    ("action", AttributeValue::from(format!("action_{}", i))),
                    ("reward", AttributeValue::from(i as f64 * 0.1)),
                ]);
            }
        }
    }

    tracer.shutdown()?;

    for entry in WalkDir::new(&run_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let depth = entry.depth();
        println!(
            "{}{}",
            "  ".repeat(depth),
            entry.file_name().to_string_lossy()
        );
    }

    let archive = run_dir.join("demo_experiment").join("episode_0.zip");
    for (rank, step) in EpisodeArchiveReader::read_steps(&archive)?.iter().enumerate() {
        let action = step.attributes.get("action").and_then(AttributeValue::as_str);
        let reward = step.attributes.get("reward").and_then(AttributeValue::as_f64);
        println!("step_{}: action={:?} reward={:?}", rank, action, reward);
    }
    Ok(())
}

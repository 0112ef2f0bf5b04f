//! detectctl - operator tool for the wildlife detection store
//!
//! Ingests raw images, runs a batch locally and dumps stored results.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wildlife_detect::config::DetectdConfig;
use wildlife_detect::{
    BatchOrchestrator, ImageStore, ResultCollection, ResultStore, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Database path (overrides DETECT_DB_PATH / config file).
    #[arg(long, env = "DETECT_DB_PATH")]
    db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store image files in raw_images and print their ids.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run detection over stored image ids.
    Run {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Print the full summary, including results, as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Dump stored results as JSON (binary fields base64-encoded).
    Results {
        /// Read the failure collection instead of the success collection.
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DetectdConfig::load()?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    let mut store = SqliteStore::open(&cfg.db_path)?;

    match args.command {
        Command::Ingest { files } => {
            for path in files {
                let data = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))?;
                let id = store.insert_image(filename, &data)?;
                println!("{}\t{}", id, filename);
            }
        }
        Command::Run { ids, json } => {
            let registry = cfg.detector.build_registry()?;
            let detector = registry.require_default()?;
            let summary =
                BatchOrchestrator::new(&mut store, detector, cfg.pipeline_settings()).run(&ids)?;
            if json {
                let value = serde_json::json!({
                    "requested_count": summary.requested,
                    "image_count": summary.image_count,
                    "results": summary.results,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!(
                    "requested={} processed={} success={} failed={} skipped={}",
                    summary.requested,
                    summary.image_count,
                    summary.success_count(),
                    summary.failed_count(),
                    summary.skipped.len()
                );
                for skipped in &summary.skipped {
                    println!("skipped {} ({:?})", skipped.image_id, skipped.reason);
                }
            }
        }
        Command::Results { failed, limit } => {
            let collection = if failed {
                ResultCollection::Failure
            } else {
                ResultCollection::Success
            };
            let results = store.results(collection, limit)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}

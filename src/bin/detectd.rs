//! detectd - batch wildlife detection service
//!
//! This daemon:
//! 1. Loads configuration (`DETECT_CONFIG` file + `DETECT_*` env overrides)
//! 2. Initializes the configured detector backend once
//! 3. Serves `POST /detect` and `GET /health`
//! 4. Shuts down cleanly on Ctrl-C, releasing the listener and database

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use wildlife_detect::api::{ApiConfig, ApiServer};
use wildlife_detect::config::DetectdConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = DetectdConfig::load()?;
    let registry = cfg.detector.build_registry()?;
    registry.warm_up_all()?;
    let detector = registry.require_default()?;
    log::info!(
        "detector backend '{}' ready (threshold={:.2})",
        cfg.detector.backend,
        cfg.confidence_threshold
    );

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        db_path: cfg.db_path.clone(),
        settings: cfg.pipeline_settings(),
        ..ApiConfig::default()
    };
    let handle = ApiServer::new(api_config, detector).spawn()?;
    log::info!("detect api listening on {}", handle.addr);
    log::info!("writing results to {}", cfg.db_path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;

    rx.recv()
        .map_err(|_| anyhow!("signal channel closed unexpectedly"))?;
    log::info!("shutdown requested");
    handle.stop()?;
    Ok(())
}

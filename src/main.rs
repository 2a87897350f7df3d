//! Lookout: camera detection pipeline with event-triggered frame capture

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookout::capture::V4l2Capture;
use lookout::pipeline::{PipelineLoop, StopReason};
use lookout::{detect, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Lookout launching...");

    let config = Config::load()?;
    let kind = config.detector.kind;

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current frame");
                signal_flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    // Capture and detection share one blocking thread; saves run on the worker pool.
    let summary = tokio::task::spawn_blocking(move || -> lookout::Result<_> {
        let detector = detect::build(&config.detector)?;
        let source = V4l2Capture::open(&config.capture)?;
        let mut pipeline = PipelineLoop::new(&config, source, detector)?;
        info!("{} detection running. Press Ctrl+C to stop.", kind);
        pipeline.run(&shutdown)
    })
    .await??;

    info!(
        "Processed {} frames, saved {} images ({} failed, {} dropped)",
        summary.iterations,
        summary.persistence.written,
        summary.persistence.failed,
        summary.persistence.dropped
    );

    match summary.stop_reason {
        StopReason::Interrupted => {
            info!("Camera released. Exiting.");
            Ok(())
        }
        StopReason::CaptureFailed(reason) => Err(eyre!("capture stopped: {}", reason)),
    }
}

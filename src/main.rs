//! framecast demo: capture source -> channel hand-off -> raw file target

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use framecast::capture::{PatternSource, VideoSource};
use framecast::pipeline::ChannelObserver;
use framecast::target::{RawFileTarget, VideoTarget};
use framecast::{Backend, CaptureConfig, Config, Observer};

fn open_source(config: &CaptureConfig) -> Result<Box<dyn VideoSource>> {
    match config.backend {
        Backend::Pattern => Ok(Box::new(PatternSource::start(config)?)),
        #[cfg(feature = "v4l2")]
        Backend::V4l2 => Ok(Box::new(framecast::capture::V4l2Source::open(config)?)),
        #[cfg(not(feature = "v4l2"))]
        Backend::V4l2 => Err(eyre!("framecast was built without the v4l2 feature")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framecast=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("framecast launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!(?config, "Configuration loaded");

    let source = open_source(&config.capture)?;

    // Frames leave the producer thread as owned copies
    let (channel, rx) = ChannelObserver::bounded(config.pipeline.queue_size);
    let channel = Arc::new(channel);
    let handle: Arc<dyn Observer> = channel.clone();
    source.attach(handle.clone())?;

    let mut target = match &config.target.path {
        Some(path) => {
            let mut target = RawFileTarget::new();
            target.init(path, source.frame_rate())?;
            Some(target)
        }
        None => None,
    };

    // Spawn writer task
    let writer = tokio::spawn(async move {
        let mut received = 0u64;
        while let Ok(frame) = rx.recv_async().await {
            received += 1;
            if let Some(target) = target.as_mut() {
                if let Err(e) = target.append(&frame) {
                    error!("Failed to write frame: {}", e);
                    break;
                }
            }
        }
        if let Some(mut target) = target {
            target.finalise()?;
        }
        Ok::<_, framecast::Error>(received)
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(config.pipeline.run_secs)) => {}
    }

    source.detach(&handle)?;
    let dropped = channel.dropped();
    // Last sender gone: the writer drains the channel and stops
    drop(handle);
    drop(channel);

    let received = writer
        .await
        .map_err(|e| eyre!("Writer task failed: {}", e))??;
    info!(
        received,
        dropped,
        dimensions = ?source.frame_dimensions(),
        "framecast shutting down"
    );
    drop(source);
    Ok(())
}

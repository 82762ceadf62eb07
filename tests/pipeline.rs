//! Capture source to file target through an asynchronous hand-off

use std::sync::Arc;
use std::time::Duration;

use framecast::capture::{ColourSpace, PatternSource, Region, VideoSource};
use framecast::pipeline::{ChannelObserver, FrameQueue};
use framecast::target::{RawFileTarget, VideoTarget};
use framecast::{Config, Observer, Publisher};

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn pattern_config(colour: ColourSpace) -> framecast::CaptureConfig {
    let mut config = Config::default().capture;
    config.colour = colour;
    config.width = 32;
    config.height = 16;
    config.fps = 100.0;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn source_frames_end_up_in_raw_file() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.raw");

    let mut source = PatternSource::start(&pattern_config(ColourSpace::I420)).unwrap();
    let (channel, rx) = ChannelObserver::bounded(64);
    let channel = Arc::new(channel);
    let handle: Arc<dyn Observer> = channel.clone();
    source.attach(handle.clone()).unwrap();

    let writer = tokio::spawn({
        let path = path.clone();
        async move {
            let mut target = RawFileTarget::create(&path, 100.0).unwrap();
            let mut written = 0u64;
            while let Ok(frame) = rx.recv_async().await {
                target.append(&frame).unwrap();
                written += 1;
            }
            target.finalise().unwrap();
            written
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    source.detach(&handle).unwrap();
    source.stop();
    let dropped = channel.dropped();
    drop(handle);
    drop(channel);

    let written = writer.await.unwrap();
    assert!(written > 0);
    // Frames produced after the detach reach nobody
    assert!(written + dropped <= source.frames_produced());

    let frame_len = (32 * 16 * 3 / 2) as u64;
    let file_len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(file_len, written * frame_len);
}

#[test]
fn queue_observer_keeps_latest_sub_frames() {
    init_test_tracing();

    let source = PatternSource::start(&pattern_config(ColourSpace::Bgra)).unwrap();
    source.set_sub_frame(Region::new(8, 4, 16, 8)).unwrap();

    let queue = Arc::new(FrameQueue::new(4));
    let handle: Arc<dyn Observer> = queue.clone();
    source.attach(handle.clone()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while queue.stats().0 < 6 {
        assert!(std::time::Instant::now() < deadline, "no frames queued");
        std::thread::sleep(Duration::from_millis(5));
    }
    source.detach(&handle).unwrap();

    assert_eq!(queue.len(), 4);
    let (written, _, dropped) = queue.stats();
    assert_eq!(written - dropped, 4);

    let frame = queue.pop().unwrap();
    let view = frame.structured(0).unwrap();
    assert_eq!(view.shape(), &[8, 16, 4]);
    assert!(view.iter().skip(3).step_by(4).all(|&alpha| alpha == 255));
}

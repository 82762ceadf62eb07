//! Synthetic capture backend producing a moving test pattern

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, instrument};

use crate::broadcast::{Observable, Publisher};
use crate::capture::frame::{ColourSpace, Frame, Region};
use crate::capture::source::{SourceState, VideoSource};
use crate::error::{Error, Result};
use crate::CaptureConfig;

/// Test-pattern source running on its own thread.
///
/// Every tick it repaints an owned frame and publishes it, like a capture
/// card delivering from its driver thread. Stereo configurations get a
/// horizontally shifted pattern per view.
pub struct PatternSource {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: SourceState,
    colour: ColourSpace,
    width: usize,
    height: usize,
    fps: f64,
    running: AtomicBool,
}

impl PatternSource {
    #[instrument(skip_all, fields(colour = %config.colour, width = config.width, height = config.height))]
    pub fn start(config: &CaptureConfig) -> Result<Self> {
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(Error::Source(format!(
                "frame rate must be positive, got {}",
                config.fps
            )));
        }
        let frame = Frame::with_views(config.colour, config.width, config.height, config.views)?;

        let shared = Arc::new(Shared {
            state: SourceState::new(),
            colour: config.colour,
            width: config.width,
            height: config.height,
            fps: config.fps,
            running: AtomicBool::new(true),
        });
        if let Some(region) = config.sub_frame {
            shared
                .state
                .set_sub_frame(region, config.colour, config.width, config.height)?;
        }

        let worker = thread::Builder::new().name("pattern-source".into()).spawn({
            let shared = shared.clone();
            move || run(shared, frame)
        })?;
        info!(fps = config.fps, views = config.views, "Pattern source started");

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Stop producing and wait for the producer thread
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Pattern source thread panicked");
            }
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.state.frames_produced()
    }
}

impl Drop for PatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Publisher for PatternSource {
    fn observable(&self) -> &Observable {
        self.shared.state.observable()
    }
}

impl VideoSource for PatternSource {
    fn colour(&self) -> ColourSpace {
        self.shared.colour
    }

    fn frame_dimensions(&self) -> Option<(usize, usize)> {
        self.shared.state.dimensions()
    }

    fn frame_rate(&self) -> f64 {
        self.shared.fps
    }

    fn get_frame(&self) -> Option<Frame<'static>> {
        self.shared.state.snapshot()
    }

    fn set_sub_frame(&self, region: Region) -> Result<()> {
        let shared = &self.shared;
        shared
            .state
            .set_sub_frame(region, shared.colour, shared.width, shared.height)
    }

    fn get_full_frame(&self) {
        self.shared.state.clear_sub_frame();
    }
}

fn run(shared: Arc<Shared>, mut frame: Frame<'static>) {
    let interval = Duration::from_secs_f64(1.0 / shared.fps);
    let mut tick = 0usize;
    while shared.running.load(Ordering::Acquire) {
        let started = Instant::now();
        paint(&mut frame, tick);
        shared.state.publish(&frame);
        tick += 1;
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    info!(frames = tick, "Pattern source stopped");
}

/// Diagonal ramps scrolling by two pixels per tick
fn paint(frame: &mut Frame<'static>, tick: usize) {
    let (width, height) = (frame.width(), frame.height());
    let colour = frame.colour();
    for view in 0..frame.view_count() {
        let shift = tick * 2 + view * 16;
        let Ok(data) = frame.data_mut(view) else {
            continue;
        };
        match colour {
            ColourSpace::Bgra => {
                for (i, px) in data.chunks_exact_mut(4).enumerate() {
                    let (x, y) = (i % width, i / width);
                    px.copy_from_slice(&[ramp(x + shift), ramp(y + shift), ramp(x + y), 255]);
                }
            }
            ColourSpace::I420 => {
                let luma = width * height;
                let (y_plane, chroma) = data.split_at_mut(luma);
                for (i, sample) in y_plane.iter_mut().enumerate() {
                    *sample = ramp(i % width + i / width + shift);
                }
                let half = chroma.len() / 2;
                let (u_plane, v_plane) = chroma.split_at_mut(half);
                u_plane.fill(ramp(shift));
                v_plane.fill(255 - ramp(shift));
            }
            ColourSpace::Uyvy => {
                for (i, pair) in data.chunks_exact_mut(4).enumerate() {
                    let x = (i * 2) % width.max(1);
                    pair.copy_from_slice(&[ramp(shift), ramp(x + shift), 128, ramp(x + 1 + shift)]);
                }
            }
        }
    }
}

fn ramp(value: usize) -> u8 {
    (value & 0xff) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::broadcast::Observer;
    use crate::Config;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Observer for Counter {
        fn update(&self, frame: &Frame<'_>) -> color_eyre::Result<()> {
            assert!(frame.owns_storage());
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn capture_config(colour: ColourSpace, views: usize) -> CaptureConfig {
        let mut config = Config::default().capture;
        config.colour = colour;
        config.width = 16;
        config.height = 8;
        config.fps = 200.0;
        config.views = views;
        config
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn delivers_frames_until_detached() {
        let mut source = PatternSource::start(&capture_config(ColourSpace::Bgra, 1)).unwrap();
        let counter = Arc::new(Counter::default());
        let handle: Arc<dyn Observer> = counter.clone();
        source.attach(handle.clone()).unwrap();

        wait_for(|| counter.0.load(Ordering::SeqCst) >= 3);
        source.detach(&handle).unwrap();
        let seen = counter.0.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.0.load(Ordering::SeqCst), seen);

        assert_eq!(source.frame_dimensions(), Some((16, 8)));
        assert_eq!(source.frame_rate(), 200.0);
        source.stop();
        assert!(source.frames_produced() >= 3);
    }

    #[test]
    fn stereo_frames_differ_per_view() {
        let source = PatternSource::start(&capture_config(ColourSpace::Uyvy, 2)).unwrap();
        wait_for(|| source.get_frame().is_some());

        let frame = source.get_frame().unwrap();
        assert_eq!(frame.view_count(), 2);
        assert_eq!(frame.byte_length(1).unwrap(), 16 * 8 * 2);
        assert_ne!(frame.data(0).unwrap(), frame.data(1).unwrap());
    }

    #[test]
    fn sub_frame_applies_to_new_frames() {
        let source = PatternSource::start(&capture_config(ColourSpace::I420, 1)).unwrap();
        source.set_sub_frame(Region::new(4, 2, 8, 4)).unwrap();
        wait_for(|| source.frame_dimensions() == Some((8, 4)));

        source.get_full_frame();
        wait_for(|| source.frame_dimensions() == Some((16, 8)));

        assert!(source.set_sub_frame(Region::new(3, 0, 4, 4)).is_err());
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut config = capture_config(ColourSpace::Bgra, 1);
        config.fps = 0.0;
        assert!(matches!(
            PatternSource::start(&config),
            Err(Error::Source(_))
        ));

        let config = capture_config(ColourSpace::Bgra, 0);
        assert!(matches!(PatternSource::start(&config), Err(Error::NoViews)));

        let mut config = capture_config(ColourSpace::Bgra, 1);
        config.width = usize::MAX / 4;
        assert!(matches!(
            PatternSource::start(&config),
            Err(Error::InvalidShape { .. })
        ));
    }
}

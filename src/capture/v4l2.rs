//! V4L2 capture with memory-mapped buffers broadcast without copying

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::broadcast::{Observable, Publisher};
use crate::capture::frame::{ColourSpace, Frame, Region};
use crate::capture::source::{SourceState, VideoSource};
use crate::CaptureConfig;

/// V4L2 device polled on a dedicated thread.
///
/// Each dequeued driver buffer is wrapped in a borrowed [`Frame`] and
/// broadcast before the buffer is handed back to the driver, so observers
/// that keep pixels must copy them.
pub struct V4l2Source {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: SourceState,
    colour: ColourSpace,
    width: usize,
    height: usize,
    frame_rate: f64,
    running: AtomicBool,
}

fn fourcc(colour: ColourSpace) -> FourCC {
    match colour {
        ColourSpace::Bgra => FourCC::new(b"AR24"),
        ColourSpace::I420 => FourCC::new(b"YU12"),
        ColourSpace::Uyvy => FourCC::new(b"UYVY"),
    }
}

impl V4l2Source {
    /// Open the configured device and start streaming
    #[instrument(skip_all, fields(device = %config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width as u32;
        fmt.height = config.height as u32;
        fmt.fourcc = fourcc(config.colour);
        let fmt = device.set_format(&fmt)?;
        if fmt.fourcc != fourcc(config.colour) {
            return Err(eyre!(
                "Device delivers {} instead of {}",
                fmt.fourcc,
                config.colour
            ));
        }

        let frame_rate = match device.params() {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator as f64 / params.interval.numerator as f64
            }
            _ => 0.0,
        };

        let shared = Arc::new(Shared {
            state: SourceState::new(),
            colour: config.colour,
            width: fmt.width as usize,
            height: fmt.height as usize,
            frame_rate,
            running: AtomicBool::new(true),
        });
        if let Some(region) = config.sub_frame {
            shared
                .state
                .set_sub_frame(region, shared.colour, shared.width, shared.height)?;
        }

        // Streaming starts on the capture thread, which reports back once the
        // buffers are mapped
        let (ready_tx, ready_rx) = flume::bounded(1);
        let buffer_count = config.buffer_count;
        let worker = thread::Builder::new().name("v4l2-capture".into()).spawn({
            let shared = shared.clone();
            move || run(device, buffer_count, shared, ready_tx)
        })?;
        ready_rx
            .recv()
            .map_err(|_| eyre!("Capture thread exited during start-up"))??;

        info!(
            width = fmt.width,
            height = fmt.height,
            frame_rate,
            "Capture stream started with {} buffers",
            buffer_count
        );
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Stop streaming and wait for the capture thread.
    ///
    /// Returns once the driver delivers its next buffer.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("V4L2 capture thread panicked");
            }
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Publisher for V4l2Source {
    fn observable(&self) -> &Observable {
        self.shared.state.observable()
    }
}

impl VideoSource for V4l2Source {
    fn colour(&self) -> ColourSpace {
        self.shared.colour
    }

    fn frame_dimensions(&self) -> Option<(usize, usize)> {
        self.shared.state.dimensions()
    }

    fn frame_rate(&self) -> f64 {
        self.shared.frame_rate
    }

    fn get_frame(&self) -> Option<Frame<'static>> {
        self.shared.state.snapshot()
    }

    fn set_sub_frame(&self, region: Region) -> crate::Result<()> {
        let shared = &self.shared;
        shared
            .state
            .set_sub_frame(region, shared.colour, shared.width, shared.height)
    }

    fn get_full_frame(&self) {
        self.shared.state.clear_sub_frame();
    }
}

fn run(device: Device, buffer_count: u32, shared: Arc<Shared>, ready: flume::Sender<Result<()>>) {
    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let required = shared.colour.byte_length(shared.width, shared.height);
    while shared.running.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                error!("Capture error: {}", e);
                break;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used < required {
            warn!(used, required, "Short buffer from driver, skipping");
            continue;
        }
        match Frame::wrap(shared.colour, shared.width, shared.height, &buf[..required]) {
            Ok(frame) => shared.state.publish(&frame),
            Err(e) => warn!("Could not wrap driver buffer: {}", e),
        }
    }
    info!(
        frames = shared.state.frames_produced(),
        "V4L2 capture stopped"
    );
}

//! Contract for capture backends and the publishing state they share

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use crate::broadcast::{Observable, Publisher};
use crate::capture::frame::{ColourSpace, Frame, Region};
use crate::error::Result;

/// A capture backend: produces frames on its own schedule and broadcasts
/// them to attached observers.
///
/// Backends may deliver from a thread they do not control (vendor callback
/// threads), so implementations are `Send + Sync` and broadcast from wherever
/// the frame arrives.
pub trait VideoSource: Publisher + Send + Sync {
    fn colour(&self) -> ColourSpace;

    /// Dimensions of the frames currently delivered, once one has been produced
    fn frame_dimensions(&self) -> Option<(usize, usize)>;

    fn frame_rate(&self) -> f64;

    /// Owned copy of the most recent frame.
    ///
    /// Sources only keep copies once this has been called, so the first call
    /// returns `None` until the next frame arrives.
    fn get_frame(&self) -> Option<Frame<'static>>;

    /// Crop every subsequent frame to `region`
    fn set_sub_frame(&self, region: Region) -> Result<()>;

    /// Undo [`VideoSource::set_sub_frame`]
    fn get_full_frame(&self);
}

/// Observable plus the bookkeeping every backend needs: optional sub-frame,
/// current dimensions, a snapshot of the latest frame, and a produced-frame
/// counter.
///
/// Frames are only copied for snapshots after the first [`snapshot`] call,
/// so borrowed frames stay zero-copy for sources nobody polls.
///
/// [`snapshot`]: SourceState::snapshot
#[derive(Default)]
pub struct SourceState {
    observable: Observable,
    sub_frame: ArcSwapOption<Region>,
    dimensions: ArcSwapOption<(usize, usize)>,
    keep_latest: AtomicBool,
    latest: ArcSwapOption<Frame<'static>>,
    produced: AtomicU64,
}

impl SourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the sub-frame, if any, then snapshot and broadcast `frame`
    pub fn publish(&self, frame: &Frame<'_>) {
        match self.sub_frame.load_full() {
            Some(region) => match frame.crop(*region) {
                Ok(cropped) => self.deliver(&cropped),
                Err(e) => warn!("Dropping frame, sub-frame does not fit: {}", e),
            },
            None => self.deliver(frame),
        }
    }

    fn deliver(&self, frame: &Frame<'_>) {
        let dimensions = (frame.width(), frame.height());
        if (*self.dimensions.load()).as_deref() != Some(&dimensions) {
            self.dimensions.store(Some(Arc::new(dimensions)));
        }
        if self.keep_latest.load(Ordering::Relaxed) {
            self.latest.store(Some(Arc::new(frame.to_owned_frame())));
        }
        self.observable.broadcast(frame);
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> Option<(usize, usize)> {
        (*self.dimensions.load()).as_deref().copied()
    }

    /// Copy of the latest frame; starts snapshotting on first use
    pub fn snapshot(&self) -> Option<Frame<'static>> {
        if !self.keep_latest.swap(true, Ordering::Relaxed) {
            debug!("Keeping snapshots of delivered frames");
        }
        self.latest.load_full().map(|frame| frame.to_owned_frame())
    }

    /// Crop future frames of a `width` x `height` source to `region`
    pub fn set_sub_frame(
        &self,
        region: Region,
        colour: ColourSpace,
        width: usize,
        height: usize,
    ) -> Result<()> {
        region.validate(colour, width, height)?;
        self.sub_frame.store(Some(Arc::new(region)));
        info!(?region, "Sub-frame set");
        Ok(())
    }

    pub fn clear_sub_frame(&self) {
        if self.sub_frame.swap(None).is_some() {
            info!("Restored full frame");
        }
    }
}

impl Publisher for SourceState {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}

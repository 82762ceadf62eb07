//! Frame sinks: file writers and the adapter that lets them observe a source

pub mod raw;

use std::path::Path;

use parking_lot::Mutex;

use crate::broadcast::Observer;
use crate::capture::Frame;
use crate::error::Result;

pub use raw::RawFileTarget;

/// Destination that frames are appended to one at a time
pub trait VideoTarget: Send {
    fn init(&mut self, path: &Path, frame_rate: f64) -> Result<()>;

    fn append(&mut self, frame: &Frame<'_>) -> Result<()>;

    /// Flush and close; no frames can be appended afterwards
    fn finalise(&mut self) -> Result<()>;
}

/// Observer appending every broadcast frame to a target
pub struct TargetObserver<T> {
    target: Mutex<T>,
}

impl<T: VideoTarget> TargetObserver<T> {
    pub fn new(target: T) -> Self {
        Self {
            target: Mutex::new(target),
        }
    }

    pub fn finalise(&self) -> Result<()> {
        self.target.lock().finalise()
    }

    pub fn into_inner(self) -> T {
        self.target.into_inner()
    }
}

impl<T: VideoTarget> Observer for TargetObserver<T> {
    fn update(&self, frame: &Frame<'_>) -> color_eyre::Result<()> {
        self.target.lock().append(frame)?;
        Ok(())
    }
}

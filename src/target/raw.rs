//! Raw frame dump: the bytes of every view, frame after frame, no header

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::VideoTarget;
use crate::capture::frame::{ColourSpace, Frame};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    colour: ColourSpace,
    width: usize,
    height: usize,
    views: usize,
}

impl Shape {
    fn of(frame: &Frame<'_>) -> Self {
        Self {
            colour: frame.colour(),
            width: frame.width(),
            height: frame.height(),
            views: frame.view_count(),
        }
    }
}

/// Writes frames unmodified to a file. All frames of a stream must share
/// one shape so the file can be split back into frames.
///
/// A write error leaves the target failed: further appends are refused and
/// `finalise` cuts the file back to the last complete frame.
#[derive(Default)]
pub struct RawFileTarget {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    frame_rate: f64,
    shape: Option<Shape>,
    frames: u64,
    /// Bytes of complete frames
    committed: u64,
    failed: bool,
}

impl RawFileTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the file at `path` and get ready to append
    pub fn create(path: impl AsRef<Path>, frame_rate: f64) -> Result<Self> {
        let mut target = Self::new();
        target.init(path.as_ref(), frame_rate)?;
        Ok(target)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Bytes of the complete frames among the first `len` bytes of the file
    fn whole_frames(&self, len: u64) -> u64 {
        match self.committed.checked_div(self.frames) {
            Some(frame_len) if frame_len > 0 => len.min(self.committed) / frame_len * frame_len,
            _ => 0,
        }
    }
}

impl VideoTarget for RawFileTarget {
    fn init(&mut self, path: &Path, frame_rate: f64) -> Result<()> {
        if self.writer.is_some() {
            return Err(Error::Target("target already initialised".into()));
        }
        self.writer = Some(BufWriter::new(File::create(path)?));
        self.path = Some(path.to_path_buf());
        self.frame_rate = frame_rate;
        self.shape = None;
        self.frames = 0;
        self.committed = 0;
        self.failed = false;
        info!(path = %path.display(), frame_rate, "Raw file target opened");
        Ok(())
    }

    fn append(&mut self, frame: &Frame<'_>) -> Result<()> {
        if self.failed {
            return Err(Error::Target("target failed on an earlier write".into()));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Target("target not initialised".into()))?;

        let shape = Shape::of(frame);
        match self.shape {
            None => self.shape = Some(shape),
            Some(expected) if expected != shape => {
                return Err(Error::Target(format!(
                    "frame shape changed from {:?} to {:?}",
                    expected, shape
                )));
            }
            Some(_) => {}
        }

        let mut written = 0u64;
        for view in frame.views() {
            if let Err(e) = writer.write_all(view) {
                self.failed = true;
                warn!(frames = self.frames, "Raw file write failed: {}", e);
                return Err(e.into());
            }
            written += view.len() as u64;
        }
        self.committed += written;
        self.frames += 1;
        Ok(())
    }

    fn finalise(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            if self.failed {
                let len = file.metadata()?.len();
                let keep = self.whole_frames(len);
                if len > keep {
                    file.set_len(keep)?;
                }
            }
            info!(
                frames = self.frames,
                path = ?self.path,
                shape = ?self.shape,
                "Raw file target finalised"
            );
        }
        Ok(())
    }
}

impl Drop for RawFileTarget {
    fn drop(&mut self) {
        if let Err(e) = self.finalise() {
            warn!("Failed to finalise raw file target: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broadcast::{Observable, Observer};
    use crate::target::TargetObserver;

    #[test]
    fn writes_every_view_of_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.raw");

        let mut target = RawFileTarget::create(&path, 25.0).unwrap();
        let mut frame = Frame::with_views(ColourSpace::I420, 4, 2, 2).unwrap();
        frame.data_mut(1).unwrap().fill(1);
        target.append(&frame).unwrap();
        target.append(&frame).unwrap();
        target.finalise().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * 2 * 12);
        assert!(bytes[..12].iter().all(|&b| b == 0));
        assert!(bytes[12..24].iter().all(|&b| b == 1));
        assert_eq!(target.frames_written(), 2);
    }

    #[test]
    fn rejects_shape_changes_and_uninitialised_use() {
        let mut target = RawFileTarget::new();
        assert!(matches!(
            target.append(&Frame::new(ColourSpace::Bgra, 2, 2)),
            Err(Error::Target(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        target.init(&dir.path().join("out.raw"), 30.0).unwrap();
        target.append(&Frame::new(ColourSpace::Bgra, 2, 2)).unwrap();
        assert!(matches!(
            target.append(&Frame::new(ColourSpace::Bgra, 4, 2)),
            Err(Error::Target(_))
        ));
        assert!(matches!(
            target.init(&dir.path().join("again.raw"), 30.0),
            Err(Error::Target(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn refuses_appends_after_write_error() {
        let mut target = RawFileTarget::create("/dev/full", 30.0).unwrap();
        // Views larger than the write buffer go straight to the device
        let frame = Frame::with_views(ColourSpace::Bgra, 64, 64, 2).unwrap();

        assert!(matches!(target.append(&frame), Err(Error::Io(_))));
        assert!(matches!(target.append(&frame), Err(Error::Target(_))));
        assert_eq!(target.frames_written(), 0);
        target.finalise().unwrap();
    }

    #[test]
    fn observes_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observed.raw");
        let observable = Observable::new();
        let observer = Arc::new(TargetObserver::new(
            RawFileTarget::create(&path, 30.0).unwrap(),
        ));
        let handle: Arc<dyn Observer> = observer.clone();
        observable.attach(handle.clone()).unwrap();

        let frame = Frame::new(ColourSpace::Uyvy, 8, 2);
        for _ in 0..3 {
            observable.broadcast(&frame);
        }
        observable.detach(&handle).unwrap();
        observer.finalise().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * 8 * 2 * 2);
    }
}

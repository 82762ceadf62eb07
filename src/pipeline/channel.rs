//! Hand-off of frame copies to another thread or task over a flume channel

use std::sync::atomic::{AtomicU64, Ordering};

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, Sender, TrySendError};
use metrics::counter;
use tracing::debug;

use crate::broadcast::Observer;
use crate::capture::Frame;

/// Observer that copies each frame into a bounded channel.
///
/// A full channel drops the frame instead of stalling the producer; a
/// dropped receiver makes `update` fail.
pub struct ChannelObserver {
    tx: Sender<Frame<'static>>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Frame<'static>>) {
        let (tx, rx) = flume::bounded(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Frames dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Observer for ChannelObserver {
    fn update(&self, frame: &Frame<'_>) -> Result<()> {
        match self.tx.try_send(frame.to_owned_frame()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!("framecast_frames_dropped_total").increment(1);
                debug!(dropped, "Channel full, dropping frame");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(eyre!("Frame receiver disconnected")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ColourSpace;

    #[test]
    fn drops_when_full() {
        let (observer, rx) = ChannelObserver::bounded(2);
        let frame = Frame::new(ColourSpace::I420, 4, 4);
        for _ in 0..5 {
            observer.update(&frame).unwrap();
        }
        assert_eq!(observer.dropped(), 3);
        assert_eq!(rx.len(), 2);
        assert!(rx.try_recv().unwrap().owns_storage());
    }

    #[test]
    fn fails_once_receiver_is_gone() {
        let (observer, rx) = ChannelObserver::bounded(1);
        drop(rx);
        assert!(observer
            .update(&Frame::new(ColourSpace::Bgra, 1, 1))
            .is_err());
    }
}

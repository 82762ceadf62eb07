//! Consumer side of frame distribution

use color_eyre::Result;

use super::observable::{Observable, Publisher};
use crate::capture::Frame;

/// Receives every frame an attached [`Observable`] broadcasts.
///
/// `update` runs on the producer's thread while the observable's lock is
/// held, so it should return quickly; hand heavier work to a channel or queue
/// (see [`crate::pipeline`]). The frame is only borrowed for the call and may
/// reference producer memory that is recycled as soon as `update` returns;
/// take [`Frame::to_owned_frame`] to keep it.
///
/// Calling back into the same observable from `update` deadlocks.
pub trait Observer: Send + Sync {
    fn update(&self, frame: &Frame<'_>) -> Result<()>;
}

/// Observer that accepts every frame and does nothing with it
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Observer for Passthrough {
    fn update(&self, _frame: &Frame<'_>) -> Result<()> {
        Ok(())
    }
}

/// Observer that re-publishes what it receives.
///
/// The inner observer sees each frame first; when it succeeds the frame is
/// broadcast to the relay's own observers.
pub struct Relay<O = Passthrough> {
    inner: O,
    observable: Observable,
}

impl Relay<Passthrough> {
    pub fn passthrough() -> Self {
        Self::new(Passthrough)
    }
}

impl<O: Observer> Relay<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            observable: Observable::new(),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: Observer> Observer for Relay<O> {
    fn update(&self, frame: &Frame<'_>) -> Result<()> {
        self.inner.update(frame)?;
        self.observable.broadcast(frame);
        Ok(())
    }
}

impl<O> Publisher for Relay<O> {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use color_eyre::eyre::eyre;

    use super::*;
    use crate::capture::ColourSpace;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Observer for Counter {
        fn update(&self, _frame: &Frame<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Reject;

    impl Observer for Reject {
        fn update(&self, _frame: &Frame<'_>) -> Result<()> {
            Err(eyre!("not interested"))
        }
    }

    #[test]
    fn relay_forwards_to_its_observers() {
        let source = Observable::new();
        let relay = Arc::new(Relay::new(Counter::default()));
        let downstream = Arc::new(Counter::default());

        relay.attach(downstream.clone()).unwrap();
        source.attach(relay.clone()).unwrap();

        let frame = Frame::new(ColourSpace::Bgra, 2, 2);
        source.broadcast(&frame);
        source.broadcast(&frame);

        assert_eq!(relay.inner().0.load(Ordering::SeqCst), 2);
        assert_eq!(downstream.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn relay_stops_when_inner_fails() {
        let relay = Relay::new(Reject);
        let downstream = Arc::new(Counter::default());
        relay.attach(downstream.clone()).unwrap();

        assert!(relay.update(&Frame::new(ColourSpace::Uyvy, 2, 2)).is_err());
        assert_eq!(downstream.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn passthrough_relay_fans_out() {
        let relay = Relay::passthrough();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        relay.attach(a.clone()).unwrap();
        relay.attach(b.clone()).unwrap();

        relay.update(&Frame::new(ColourSpace::I420, 4, 4)).unwrap();
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }
}

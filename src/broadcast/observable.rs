//! Producer side of frame distribution: the observer set and broadcast

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::observer::Observer;
use crate::capture::Frame;
use crate::error::{Error, Result};

/// Set of attached observers that every broadcast frame is delivered to.
///
/// One lock guards the set and is held for the whole of `attach`, `detach`
/// and `broadcast`, so these serialise with each other across threads.
/// Observers are identified by their `Arc` allocation: detaching takes the
/// same handle (or a clone of it) that was attached.
#[derive(Default)]
pub struct Observable {
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for future broadcasts
    pub fn attach(&self, observer: Arc<dyn Observer>) -> Result<()> {
        let mut observers = self.observers.lock();
        if contains(&observers, &observer) {
            return Err(Error::Attachment("observer already attached"));
        }
        observers.push(observer.clone());
        if !contains(&observers, &observer) {
            return Err(Error::Attachment("observer missing after insertion"));
        }
        debug!(count = observers.len(), "Observer attached");
        Ok(())
    }

    /// Stop delivering frames to `observer`
    pub fn detach(&self, observer: &Arc<dyn Observer>) -> Result<()> {
        let mut observers = self.observers.lock();
        let position = observers
            .iter()
            .position(|attached| Arc::ptr_eq(attached, observer))
            .ok_or(Error::Detachment("observer not attached"))?;
        observers.remove(position);
        if contains(&observers, observer) {
            return Err(Error::Detachment("observer still present after removal"));
        }
        debug!(count = observers.len(), "Observer detached");
        Ok(())
    }

    pub fn is_attached(&self, observer: &Arc<dyn Observer>) -> bool {
        contains(&self.observers.lock(), observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver `frame` to every attached observer before returning.
    ///
    /// Failures of individual observers, errors and panics alike, are logged
    /// and do not stop delivery to the others.
    pub fn broadcast(&self, frame: &Frame<'_>) {
        let observers = self.observers.lock();
        for observer in observers.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.update(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    counter!("framecast_observer_failures_total").increment(1);
                    warn!("Observer failed to process frame: {:#}", e);
                }
                Err(_) => {
                    counter!("framecast_observer_failures_total").increment(1);
                    error!("Observer panicked while processing frame");
                }
            }
        }
        counter!("framecast_frames_broadcast_total").increment(1);
    }
}

/// Capability of anything that owns an [`Observable`], such as a capture
/// backend or a [`Relay`](super::Relay).
pub trait Publisher {
    fn observable(&self) -> &Observable;

    fn attach(&self, observer: Arc<dyn Observer>) -> Result<()> {
        self.observable().attach(observer)
    }

    fn detach(&self, observer: &Arc<dyn Observer>) -> Result<()> {
        self.observable().detach(observer)
    }

    fn is_attached(&self, observer: &Arc<dyn Observer>) -> bool {
        self.observable().is_attached(observer)
    }
}

impl Publisher for Observable {
    fn observable(&self) -> &Observable {
        self
    }
}

fn contains(observers: &[Arc<dyn Observer>], observer: &Arc<dyn Observer>) -> bool {
    observers
        .iter()
        .any(|attached| Arc::ptr_eq(attached, observer))
}

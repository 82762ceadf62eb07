//! Ring buffer of frame copies for consumers that poll at their own pace

use std::sync::atomic::{AtomicUsize, Ordering};

use color_eyre::Result;
use crossbeam::utils::CachePadded;
use metrics::counter;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer as _, RingBuffer};
use ringbuf::HeapRb;

use crate::broadcast::Observer;
use crate::capture::Frame;

/// Bounded queue of owned frames that overwrites the oldest frame when full
pub struct FrameQueue {
    ring: Mutex<HeapRb<Frame<'static>>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push frame, dropping the oldest one if the queue is full
    pub fn push(&self, frame: Frame<'static>) {
        if self.ring.lock().push_overwrite(frame).is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            counter!("framecast_frames_dropped_total").increment(1);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: pop the oldest queued frame
    pub fn pop(&self) -> Option<Frame<'static>> {
        let frame = self.ring.lock().try_pop();
        if frame.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.ring.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (written, read, dropped)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}

impl Observer for FrameQueue {
    fn update(&self, frame: &Frame<'_>) -> Result<()> {
        self.push(frame.to_owned_frame());
        Ok(())
    }
}

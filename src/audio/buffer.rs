//! Audio frames and the sample ring between the network and the device
//!
//! `SampleRing` is a single-producer single-consumer queue: the receive
//! thread pushes decoded samples and the cpal output callback pops them.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mono 16-bit audio frame
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Linear samples
    pub samples: Vec<i16>,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u32) -> Self {
        Self { samples, sequence }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Lock-free ring of samples
pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring with the specified capacity in samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push samples; returns how many were dropped because the ring was full
    pub fn push_slice(&self, samples: &[i16]) -> usize {
        let mut dropped = 0;
        for &sample in samples {
            if self.queue.push(sample).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.overflow_count.fetch_add(dropped, Ordering::Relaxed);
        }
        dropped
    }

    /// Pop one sample, counting an underrun when empty
    pub fn pop(&self) -> Option<i16> {
        match self.queue.pop() {
            Some(sample) => Some(sample),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Free slots left
    pub fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

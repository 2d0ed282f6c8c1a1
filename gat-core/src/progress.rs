//! Percentage progress over the bytes moved by one request.
//!
//! The counter turns byte counts into a monotonic 0-100 percentage and emits
//! an event only when the truncated percentage grows. Without a known total
//! nothing is emitted.

use std::sync::{Arc, Mutex, PoisonError};

/// A progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Percentage between 1 and 100.
    pub current: u8,
}

/// Accumulates processed bytes and emits percentage events to a sink.
pub struct ProgressCounter<F> {
    total: u64,
    processed: u64,
    current: u8,
    sink: F,
}

impl<F> ProgressCounter<F>
where
    F: FnMut(ProgressEvent),
{
    pub fn new(total: u64, sink: F) -> Self {
        Self {
            total,
            processed: 0,
            current: 0,
            sink,
        }
    }

    /// Records `len` more processed bytes.
    pub fn work(&mut self, len: u64) {
        self.processed = self.processed.saturating_add(len);
        if self.total == 0 {
            return;
        }

        let next = (u128::from(self.processed) * 100 / u128::from(self.total)).min(100) as u8;
        if next > self.current {
            self.current = next;
            (self.sink)(ProgressEvent { current: next });
        }
    }

    /// Last emitted percentage.
    pub fn current(&self) -> u8 {
        self.current
    }

    #[cfg(test)]
    fn processed(&self) -> u64 {
        self.processed
    }
}

type BoxedSink = Box<dyn FnMut(ProgressEvent) + Send>;

/// Cloneable handle to one counter, shared by the download and extraction taps
/// of a single request.
#[derive(Clone)]
pub struct ProgressTap {
    counter: Arc<Mutex<ProgressCounter<BoxedSink>>>,
}

impl ProgressTap {
    pub fn new<F>(total: u64, sink: F) -> Self
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        Self {
            counter: Arc::new(Mutex::new(ProgressCounter::new(total, Box::new(sink)))),
        }
    }

    pub fn record(&self, len: u64) {
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .work(len);
    }

    pub fn current(&self) -> u8 {
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
    }
}

impl std::fmt::Debug for ProgressTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTap")
            .field("current", &self.current())
            .finish()
    }
}

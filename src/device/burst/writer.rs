//! Write-combining buffer for the output port.
//!
//! The fuse stage produces one value per (pixel, filter). Consecutive
//! values usually land at consecutive addresses, so they are coalesced
//! into runs and written as bursts instead of single-element requests.
//! A run is flushed when it reaches the burst length or when the next
//! address is not contiguous with it.

use crate::fixed::Fixed16;
use crate::device::params::ELEMENT_BYTES;

/// A contiguous run ready to be issued as one burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    /// Address of the first element
    pub addr: u64,
    /// Elements in address order
    pub data: Vec<Fixed16>,
}

/// Output write-combining buffer.
#[derive(Debug, Clone)]
pub struct BurstWriter {
    base: u64,
    pending: Vec<Fixed16>,
    burst_len: usize,
}

impl BurstWriter {
    /// Create a writer that emits runs of at most `burst_len` elements.
    pub fn new(burst_len: usize) -> Self {
        Self {
            base: 0,
            pending: Vec::with_capacity(burst_len),
            burst_len,
        }
    }

    /// Address the next contiguous element would occupy.
    fn next_addr(&self) -> u64 {
        self.base + (self.pending.len() * ELEMENT_BYTES) as u64
    }

    /// Queue one element.
    ///
    /// Returns the runs that became ready: a discontiguous address closes
    /// the open run, and a run that reaches `burst_len` closes itself.
    pub fn push(&mut self, addr: u64, value: Fixed16) -> Vec<PendingRun> {
        let mut ready = Vec::new();

        if !self.pending.is_empty() && addr != self.next_addr() {
            ready.extend(self.take());
        }
        if self.pending.is_empty() {
            self.base = addr;
        }
        self.pending.push(value);
        if self.pending.len() == self.burst_len {
            ready.extend(self.take());
        }

        ready
    }

    /// Close the open run, if any.
    pub fn take(&mut self) -> Option<PendingRun> {
        if self.pending.is_empty() {
            return None;
        }
        let data = std::mem::replace(&mut self.pending, Vec::with_capacity(self.burst_len));
        Some(PendingRun { addr: self.base, data })
    }

    /// Elements waiting in the open run.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

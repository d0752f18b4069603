//! Bounded admission channel between two stage pools.
//!
//! Fixed-capacity FIFO. `send` blocks while the buffer is full, `recv` blocks
//! while it is empty and at least one producer is still registered. The
//! occupancy callbacks run under the channel lock, so an observer counting
//! admissions and takes never sees a take before its matching admission.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Returned by `send` when the channel was closed; carries the rejected value.
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelClosed<T>(pub T);

impl<T> std::fmt::Display for ChannelClosed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("admission channel closed")
    }
}

struct Inner<T> {
    buf: VecDeque<T>,
    producers: usize,
    closed: bool,
}

pub struct AdmissionChannel<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> AdmissionChannel<T> {
    /// Create a channel holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                producers: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a producer. Consumers see end-of-stream once every guard has
    /// been dropped and the buffer is drained.
    pub fn add_producer(&self) -> ProducerGuard<'_, T> {
        self.lock().producers += 1;
        ProducerGuard { channel: self }
    }

    /// Blocking put. `on_admit` runs under the channel lock right after the
    /// value enters the buffer.
    pub fn send(&self, value: T, on_admit: impl FnOnce()) -> Result<(), ChannelClosed<T>> {
        let mut inner = self.lock();
        while inner.buf.len() >= self.capacity && !inner.closed {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(ChannelClosed(value));
        }
        inner.buf.push_back(value);
        on_admit();
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking take. Returns `None` once the buffer is empty and no producer
    /// remains (or the channel was closed). `on_take` runs under the channel
    /// lock right after the value leaves the buffer.
    pub fn recv(&self, on_take: impl FnOnce()) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(value) = inner.buf.pop_front() {
                on_take();
                drop(inner);
                self.not_full.notify_one();
                return Some(value);
            }
            if inner.producers == 0 || inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Reject further sends and wake every blocked producer and consumer.
    /// Buffered values remain available to `recv` and `drain`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Remove everything still buffered.
    pub fn drain(&self, mut on_take: impl FnMut()) -> Vec<T> {
        let mut inner = self.lock();
        let drained: Vec<T> = inner.buf.drain(..).collect();
        for _ in &drained {
            on_take();
        }
        drop(inner);
        self.not_full.notify_all();
        drained
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_producer(&self) {
        let mut inner = self.lock();
        inner.producers = inner.producers.saturating_sub(1);
        let last = inner.producers == 0;
        drop(inner);
        if last {
            self.not_empty.notify_all();
        }
    }
}

/// RAII registration of one producer.
pub struct ProducerGuard<'a, T> {
    channel: &'a AdmissionChannel<T>,
}

impl<T> Drop for ProducerGuard<'_, T> {
    fn drop(&mut self) {
        self.channel.release_producer();
    }
}

//! Bounded drop-oldest audio queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lily_common::AudioFrame;
use tokio::sync::Notify;

/// Single-consumer frame queue. When full, the oldest frame is dropped to
/// make room; frames that survive keep their push order.
pub struct FrameQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

struct Inner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a frame. Returns false if the queue is closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Next frame, or `None` once the queue is closed. Closing discards
    /// whatever was still buffered.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue and discard buffered frames.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
            inner.frames.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames dropped to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

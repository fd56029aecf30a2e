use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// What to do when a connection's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room; queue length is unchanged
    DropOldest,
    /// Reject the frame and have the broker drop the connection
    Disconnect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Result of a single enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    DroppedOldest,
    Overflow,
    Closed,
}

/// Bounded per-connection outbound queue.
///
/// The tick loop pushes, the connection's writer pops. Pushing never waits;
/// a full queue is resolved by the overflow policy.
pub struct OutboundQueue {
    pub(super) frames: Mutex<VecDeque<Arc<str>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: Arc<str>, policy: OverflowPolicy) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Closed;
        }

        let outcome = {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() < self.capacity {
                frames.push_back(frame);
                EnqueueOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        frames.pop_front();
                        frames.push_back(frame);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        EnqueueOutcome::Overflow
                    }
                }
            }
        };

        if outcome != EnqueueOutcome::Overflow {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the queue is closed and fully drained, so a writer
    /// flushes everything queued before shutdown.
    pub async fn next(&self) -> Option<Arc<str>> {
        loop {
            {
                let mut frames = self.frames.lock().unwrap();
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take everything queued, waiting up to `wait` for the first frame
    pub async fn drain_wait(&self, wait: Duration) -> Vec<Arc<str>> {
        if self.is_empty() && !self.is_closed() {
            let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        }
        self.frames.lock().unwrap().drain(..).collect()
    }

    /// Stop accepting frames and wake the writer
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames lost to overflow since the connection opened
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

//! Handoff queues between pipeline stages.
//!
//! Built on crossbeam channels. The sender side never blocks: an unbounded queue
//! always accepts, a drop-oldest queue evicts its oldest item to make room.
//! The receiver side waits with a timeout so it can observe the stop token.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::shutdown::StopToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Always accept. Memory grows without bound if the consumer falls behind.
    Unbounded,
    /// Hold at most `n` items; a full queue discards its oldest item.
    DropOldest(usize),
}

/// The consumer side has gone away.
#[derive(Debug, PartialEq, Eq)]
pub struct Disconnected<T>(pub T);

pub fn handoff<T>(policy: QueuePolicy) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = match policy {
        QueuePolicy::Unbounded => crossbeam_channel::unbounded(),
        QueuePolicy::DropOldest(capacity) => crossbeam_channel::bounded(capacity.max(1)),
    };
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        HandoffSender {
            tx,
            evict: rx.clone(),
            dropped: dropped.clone(),
            closed: closed.clone(),
        },
        HandoffReceiver {
            rx,
            dropped,
            closed,
        },
    )
}

pub struct HandoffSender<T> {
    tx: Sender<T>,
    /// Receiver clone used to evict the oldest item when the queue is full.
    evict: Receiver<T>,
    dropped: Arc<AtomicU64>,
    /// Set when the receiver drops; the eviction handle keeps the channel itself open.
    closed: Arc<AtomicBool>,
}

impl<T> HandoffSender<T> {
    /// Enqueue without blocking. Returns the item evicted to make room, if any.
    pub fn send(&self, item: T) -> Result<Option<T>, Disconnected<T>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Disconnected(item));
        }
        let mut item = item;
        let mut evicted = None;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return Ok(evicted),
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // The consumer may have drained it meanwhile; just retry then.
                    if let Ok(oldest) = self.evict.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = Some(oldest);
                    }
                }
                Err(TrySendError::Disconnected(back)) => return Err(Disconnected(back)),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Items discarded by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct HandoffReceiver<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl<T> Drop for HandoffReceiver<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl<T> HandoffReceiver<T> {
    /// Wait for the next item.
    ///
    /// Returns `None` when `stop` fires or when every sender is gone and the queue
    /// is drained.
    pub fn recv(&self, stop: &StopToken, poll: Duration) -> Option<T> {
        loop {
            if stop.is_stopped() {
                return None;
            }
            match self.rx.recv_timeout(poll) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

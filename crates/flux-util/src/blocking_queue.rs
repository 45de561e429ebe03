use std::time::Duration;

use flux_core::{FluxError, Result};

/// A bounded, FIFO, multi-producer multi-consumer queue with blocking and
/// non-blocking variants of both ends (spec §4.K "LockFreeBlockingQueue").
///
/// Implemented as a thin wrapper over `crossbeam_channel::bounded`: the
/// teacher's workspace has no general-purpose MPMC primitive of its own
/// (its lock-free data structures are all transport-connection-specific),
/// and `crossbeam-channel` is already in this retrieval pack's dependency
/// vocabulary (`fedemagnani-veloce` depends on it for the same
/// bounded-channel role) — see DESIGN.md for the substitution note. The
/// channel's internal implementation is a lock-free ring buffer for
/// bounded capacities, so the "lock-free" half of the name is honored by
/// the backing implementation even though this wrapper's API is the
/// ordinary blocking-queue shape spec.md describes.
pub struct BlockingQueue<T> {
    sender: crossbeam_channel::Sender<T>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<T> BlockingQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Blocks until there is room, then enqueues `item`.
    pub fn put(&self, item: T) -> Result<()> {
        self.sender
            .send(item)
            .map_err(|_| FluxError::queue("BlockingQueue::put: all receivers dropped"))
    }

    /// Blocks until an item is available, then dequeues it.
    pub fn take(&self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| FluxError::queue("BlockingQueue::take: all senders dropped"))
    }

    /// Enqueues `item` without blocking; returns it back on failure
    /// (queue full or disconnected).
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        self.sender.try_send(item).map_err(|err| err.into_inner())
    }

    /// Dequeues without blocking; `None` if the queue is currently empty.
    pub fn poll(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Dequeues, blocking for at most `timeout`.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn sender(&self) -> crossbeam_channel::Sender<T> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> crossbeam_channel::Receiver<T> {
        self.receiver.clone()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

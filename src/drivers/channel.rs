//! Bounded, one-directional snapshot transport between the acquisition worker
//! and the trigger engine.
//!
//! Snapshots are owned values moved through a crossbeam channel, so a reader
//! always gets one whole snapshot. The producer never blocks: when the queue is
//! full the oldest queued snapshot is evicted to make room for the newest.
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use crate::drivers::PipelineError;
use crate::types::Snapshot;
pub fn snapshot_channel(capacity: usize) -> (SnapshotPublisher, SnapshotSubscriber) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    // the subscriber holds the only sender of this channel; once it is dropped
    // the publisher sees a disconnect
    let (alive_tx, alive_rx) = channel::bounded::<()>(0);
    let publisher = SnapshotPublisher {
        tx,
        evict: rx.clone(),
        consumer_alive: alive_rx,
        published: 0,
        evicted: 0,
    };
    let subscriber = SnapshotSubscriber {
        rx,
        _alive: alive_tx,
    };
    (publisher, subscriber)
}
/// Producer end, owned by the acquisition worker.
pub struct SnapshotPublisher {
    tx: Sender<Snapshot>,
    evict: Receiver<Snapshot>,
    consumer_alive: Receiver<()>,
    published: u64,
    evicted: u64,
}
impl SnapshotPublisher {
    pub fn publish(&mut self, snapshot: Snapshot) -> Result<(), PipelineError> {
        if let Err(TryRecvError::Disconnected) = self.consumer_alive.try_recv() {
            return Err(PipelineError::ChannelClosed);
        }
        let mut pending = snapshot;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    self.published += 1;
                    return Ok(());
                }
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    if self.evict.try_recv().is_ok() {
                        self.evicted += 1;
                        log::warn!(
                            "consumer is behind; evicted oldest snapshot ({} so far)",
                            self.evicted
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::ChannelClosed),
            }
        }
    }
    pub fn published(&self) -> u64 {
        self.published
    }
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
/// Consumer end, owned by the trigger engine side.
pub struct SnapshotSubscriber {
    rx: Receiver<Snapshot>,
    _alive: Sender<()>,
}
impl SnapshotSubscriber {
    /// Blocks until a snapshot arrives or the publisher is gone.
    #[cfg(test)]
    pub fn recv(&self) -> Result<Snapshot, PipelineError> {
        self.rx.recv().map_err(|_| PipelineError::ChannelClosed)
    }
    /// Raw receiver, for `select!` against the shutdown signal.
    pub fn receiver(&self) -> &Receiver<Snapshot> {
        &self.rx
    }
    /// Snapshots queued but not yet taken.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::transfer::{ListenerId, Transfer, TransferId, TransferSnapshot, TransferStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Transfers were added or removed.
    Updated,
    /// A transfer's status or byte count changed.
    ProgressReported(TransferId),
}

struct Entry {
    transfer: Arc<Transfer>,
    listener: ListenerId,
}

/// Observed list of transfers, kept in insertion order and shown newest
/// first.
///
/// Mutations and the `Updated` notification they cause happen under the same
/// lock, so subscribers see notifications in mutation order.
pub struct TransferQueue {
    entries: Mutex<Vec<Entry>>,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        TransferQueue {
            entries: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn updated(&self) {
        let _ = self.events.send(QueueEvent::Updated);
    }

    /// Appends a transfer and relays its progress reports to queue
    /// subscribers.
    pub fn add(&self, transfer: impl Into<Arc<Transfer>>) -> Arc<Transfer> {
        let transfer = transfer.into();
        let listener = transfer.add_listener(self.events.clone());

        let mut entries = self.lock();
        entries.push(Entry {
            transfer: Arc::clone(&transfer),
            listener,
        });
        debug!(id = %transfer.id(), queued = entries.len(), "Transfer added");
        self.updated();
        transfer
    }

    /// Newest first.
    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.lock()
            .iter()
            .rev()
            .map(|e| Arc::clone(&e.transfer))
            .collect()
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<TransferSnapshot> {
        self.lock().iter().rev().map(|e| e.transfer.snapshot()).collect()
    }

    pub fn get(&self, id: TransferId) -> Option<Arc<Transfer>> {
        self.lock()
            .iter()
            .find(|e| e.transfer.id() == id)
            .map(|e| Arc::clone(&e.transfer))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a bulk clear would remove anything.
    ///
    /// Never notifies. Observers call this from their `Updated` handler to
    /// refresh a "clear" control, so an update here would loop.
    pub fn has_non_active_items(&self) -> bool {
        self.lock()
            .iter()
            .any(|e| e.transfer.status() != TransferStatus::Active)
    }

    /// Drops every transfer that is not `Active`, with one `Updated`
    /// notification for the whole call. Returns how many were removed.
    pub fn clear_non_active_items(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| {
            let keep = e.transfer.status() == TransferStatus::Active;
            if !keep {
                e.transfer.remove_listener(e.listener);
            }
            keep
        });
        let removed = before - entries.len();
        debug!(removed, "Cleared finished transfers");
        self.updated();
        removed
    }

    /// Takes a transfer out of the queue. A running transfer keeps running.
    pub fn remove(&self, id: TransferId) -> Option<Arc<Transfer>> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|e| e.transfer.id() == id)?;
        let entry = entries.remove(pos);
        entry.transfer.remove_listener(entry.listener);
        self.updated();
        Some(entry.transfer)
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        for entry in entries.drain(..) {
            entry.transfer.remove_listener(entry.listener);
        }
        self.updated();
    }

    /// Cancels a transfer, removes it and deletes whatever it wrote.
    pub async fn abort(&self, id: TransferId) -> Option<TransferSnapshot> {
        let transfer = self.remove(id)?;
        if transfer.status() == TransferStatus::Active {
            transfer.cancel();
            transfer.wait().await;
        }
        // Failures are logged by the transfer.
        let _ = transfer.delete_file().await;
        Some(transfer.snapshot())
    }
}

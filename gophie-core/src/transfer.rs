//! One tracked file download.
//!
//! A [`Transfer`] owns one [`Session`]. Its state is written only by the task
//! consuming that session's events (plus the `Idle`/`Failed` → `Active` edge
//! taken by [`Transfer::start`] while no consumer is running). Everyone else
//! reads [`TransferSnapshot`]s.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{GopherError, TransferError};
use crate::format::format_size;
use crate::item::MenuItem;
use crate::queue::QueueEvent;
use crate::session::{Session, SessionEvent};
use crate::sink::{DesktopOpener, SystemOpener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    fn new() -> Self {
        TransferId(Uuid::new_v4())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Idle,
    Active,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Idle => "idle",
            TransferStatus::Active => "active",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub item: MenuItem,
    pub destination: PathBuf,
    pub status: TransferStatus,
    pub bytes_loaded: u64,
    pub bytes_per_second: u64,
    /// Set by the first progress report of the current attempt.
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<GopherError>,
}

impl TransferSnapshot {
    /// One-line summary for a download list, e.g.
    /// `3.2 KB (1.1 KB/sec) - gopher.example`.
    pub fn status_text(&self) -> String {
        let loaded = format_size(self.bytes_loaded);
        let status = match self.status {
            TransferStatus::Idle => "Download not started".to_string(),
            TransferStatus::Active => {
                format!("{} ({}/sec)", loaded, format_size(self.bytes_per_second))
            }
            TransferStatus::Completed => format!("Completed ({})", loaded),
            TransferStatus::Failed => format!("Failed ({})", loaded),
        };
        format!("{} - {}", status, self.item.host)
    }
}

/// Average rate since the first report: total bytes over whole elapsed
/// seconds. Anything under one second reports 0.
#[derive(Debug, Default)]
pub struct Throughput {
    started: Option<Instant>,
}

impl Throughput {
    pub fn record(&mut self, bytes: u64, now: Instant) -> u64 {
        let started = *self.started.get_or_insert(now);
        let secs = now.saturating_duration_since(started).as_secs();
        if secs == 0 {
            0
        } else {
            bytes / secs
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

pub struct Transfer {
    id: TransferId,
    item: MenuItem,
    destination: PathBuf,
    open_when_done: bool,
    session: Session,
    opener: Arc<dyn DesktopOpener>,
    state: watch::Sender<TransferSnapshot>,
    listeners: Mutex<Vec<(ListenerId, broadcast::Sender<QueueEvent>)>>,
    next_listener: AtomicU64,
}

impl Transfer {
    pub fn new(item: MenuItem, destination: impl Into<PathBuf>) -> Self {
        Self::with_session(item, destination, Session::default())
    }

    pub fn with_session(item: MenuItem, destination: impl Into<PathBuf>, session: Session) -> Self {
        let id = TransferId::new();
        let destination = destination.into();
        let (state, _) = watch::channel(TransferSnapshot {
            id,
            item: item.clone(),
            destination: destination.clone(),
            status: TransferStatus::Idle,
            bytes_loaded: 0,
            bytes_per_second: 0,
            started_at: None,
            error: None,
        });

        Transfer {
            id,
            item,
            destination,
            open_when_done: false,
            session,
            opener: Arc::new(SystemOpener),
            state,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn DesktopOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Open the file with the desktop opener once the download completes.
    pub fn open_when_done(mut self, open: bool) -> Self {
        self.open_when_done = open;
        self
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn item(&self) -> &MenuItem {
        &self.item
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn status(&self) -> TransferStatus {
        self.state.borrow().status
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that sees every state change of this transfer.
    pub fn watch(&self) -> watch::Receiver<TransferSnapshot> {
        self.state.subscribe()
    }

    /// Starts (or retries) the download. Allowed from `Idle` and `Failed`;
    /// the status is `Active` when this returns.
    pub fn start(self: &Arc<Self>) -> Result<(), TransferError> {
        let address = self
            .item
            .address()
            .ok_or_else(|| TransferError::NotDownloadable(self.item.url()))?;

        let mut refused = None;
        self.state.send_if_modified(|s| match s.status {
            TransferStatus::Idle | TransferStatus::Failed => {
                s.status = TransferStatus::Active;
                s.bytes_loaded = 0;
                s.bytes_per_second = 0;
                s.started_at = None;
                s.error = None;
                true
            }
            other => {
                refused = Some(other);
                false
            }
        });
        if let Some(status) = refused {
            return Err(TransferError::InvalidState {
                operation: "start",
                status: status.as_str(),
            });
        }

        debug!(id = %self.id, address = %address, path = %self.destination.display(), "Starting transfer");
        self.notify();

        let events = self.session.download_async(address, self.destination.clone());
        let transfer = Arc::clone(self);
        tokio::spawn(async move { transfer.consume(events).await });
        Ok(())
    }

    /// Requests cancellation. The transfer turns `Failed` once the session
    /// reports back.
    pub fn cancel(&self) {
        self.session.cancel_fetch();
    }

    /// Waits until the transfer is no longer `Active` and returns its state.
    pub async fn wait(&self) -> TransferSnapshot {
        let mut state = self.state.subscribe();
        let finished = state
            .wait_for(|s| s.status != TransferStatus::Active)
            .await
            .map(|s| s.clone());
        finished.unwrap_or_else(|_| self.snapshot())
    }

    /// Removes the destination file. A file that was never created (or is
    /// already gone) counts as deleted.
    pub async fn delete_file(&self) -> Result<(), TransferError> {
        match self.session.sink().remove(&self.destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.destination.display(), "Nothing to delete");
                Ok(())
            }
            Err(e) => {
                error!(path = %self.destination.display(), error = %e, "Failed to delete downloaded file");
                Err(TransferError::from(e))
            }
        }
    }

    pub fn open_file(&self) -> Result<(), TransferError> {
        self.opener.open(&self.destination).map_err(|e| {
            error!(path = %self.destination.display(), error = %e, "Failed to open downloaded file");
            TransferError::from(e)
        })
    }

    pub fn add_listener(&self, listener: broadcast::Sender<QueueEvent>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener, _)| *listener != id);
    }

    fn notify(&self) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, listener) in listeners.iter() {
            // No receivers is fine.
            let _ = listener.send(QueueEvent::ProgressReported(self.id));
        }
    }

    async fn consume(&self, mut events: mpsc::Receiver<SessionEvent>) {
        let mut throughput = Throughput::default();

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Progress { bytes, .. } => {
                    let rate = throughput.record(bytes, Instant::now());
                    self.state.send_modify(|s| {
                        s.bytes_loaded = bytes;
                        s.bytes_per_second = rate;
                        if s.started_at.is_none() {
                            s.started_at = Some(Utc::now());
                        }
                    });
                }
                SessionEvent::Loaded(_) => {
                    debug!(id = %self.id, "Transfer completed");
                    self.state.send_modify(|s| s.status = TransferStatus::Completed);
                    if self.open_when_done {
                        let _ = self.open_file();
                    }
                }
                SessionEvent::Failed { error, .. } => {
                    debug!(id = %self.id, error = %error, "Transfer failed");
                    self.state.send_modify(|s| {
                        s.status = TransferStatus::Failed;
                        s.error = Some(error);
                    });
                }
                // Downloads never sniff their content.
                SessionEvent::Mismatch { .. } => continue,
            }
            self.notify();
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("status", &self.status())
            .finish()
    }
}

//! Background recording of API key usage.
//!
//! The authentication stage submits a key id after every successful
//! authentication. Submissions go through a bounded channel to a single
//! worker task, so the request never waits on the write. A full channel
//! drops the update; the next use of the key records it again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::storage::Storage;

/// Default number of pending updates before submissions are dropped
pub const DEFAULT_CAPACITY: usize = 1024;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct Touch {
    key_id: Uuid,
    used_at: DateTime<Utc>,
}

/// Handle for submitting last-used updates
///
/// Clones share the same channel and worker.
#[derive(Clone)]
pub struct LastUsedRecorder {
    tx: mpsc::Sender<Touch>,
    shutdown_tx: mpsc::Sender<()>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// The consuming side of a [`LastUsedRecorder`]
pub struct LastUsedWorker {
    store: Arc<dyn Storage>,
    rx: mpsc::Receiver<Touch>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl LastUsedRecorder {
    /// Create a recorder and its worker without starting the worker.
    pub fn new(store: Arc<dyn Storage>, capacity: usize) -> (Self, LastUsedWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                tx,
                shutdown_tx,
                worker: Arc::new(Mutex::new(None)),
            },
            LastUsedWorker {
                store,
                rx,
                shutdown_rx,
            },
        )
    }

    /// Create a recorder and spawn its worker on the current runtime.
    pub fn spawn(store: Arc<dyn Storage>, capacity: usize) -> Self {
        let (recorder, worker) = Self::new(store, capacity);
        let handle = tokio::spawn(worker.run());
        Self {
            worker: Arc::new(Mutex::new(Some(handle))),
            ..recorder
        }
    }

    /// Queue an update for `key_id`. Never blocks.
    ///
    /// Returns `false` when the update was dropped.
    pub fn record(&self, key_id: Uuid) -> bool {
        let touch = Touch {
            key_id,
            used_at: Utc::now(),
        };

        match self.tx.try_send(touch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(key_id = %key_id, "Last-used queue full, dropping update");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(key_id = %key_id, "Last-used worker stopped, dropping update");
                false
            }
        }
    }

    /// Stop the worker after it has written every queued update.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Last-used worker panicked");
            }
        }
    }
}

impl LastUsedWorker {
    /// Process updates until shutdown is requested, then drain the queue.
    pub async fn run(mut self) {
        tracing::debug!("Last-used worker started");

        loop {
            tokio::select! {
                biased;
                touch = self.rx.recv() => match touch {
                    Some(touch) => self.apply(touch).await,
                    None => break,
                },
                _ = self.shutdown_rx.recv() => {
                    self.rx.close();
                    while let Some(touch) = self.rx.recv().await {
                        self.apply(touch).await;
                    }
                    break;
                }
            }
        }

        tracing::debug!("Last-used worker stopped");
    }

    async fn apply(&self, touch: Touch) {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.store.touch_api_key(touch.key_id, touch.used_at).await {
                Ok(()) => return,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(key_id = %touch.key_id, attempt, error = %e, "Retrying last-used update");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    tracing::warn!(key_id = %touch.key_id, error = %e, "Failed to record API key use");
                }
            }
        }
    }
}

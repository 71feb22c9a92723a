//! Upload progress, modelled as an explicit state published through a
//! `tokio::sync::watch` channel.
//!
//! A tracker goes `Idle -> InFlight -> Idle`. The percentage never decreases
//! within one upload, and reports that arrive after the upload finished (or
//! from an earlier upload on the same slot) are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::models::DocumentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadProgress {
    #[default]
    Idle,
    InFlight { sent: u64, total: u64, percent: u8 },
}

impl UploadProgress {
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Idle => None,
            Self::InFlight { percent, .. } => Some(*percent),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight { .. })
    }
}

fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u128::from(sent) * 100 / u128::from(total)).min(100);
    pct as u8
}

struct Inner {
    tx: watch::Sender<UploadProgress>,
    epoch: AtomicU64,
}

/// Progress state for one document slot.
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UploadProgress::Idle);
        Self {
            inner: Arc::new(Inner {
                tx,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Reset to 0 % and hand out a reporter bound to this upload.
    pub fn start(&self) -> ProgressReporter {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tx.send_replace(UploadProgress::InFlight {
            sent: 0,
            total: 0,
            percent: 0,
        });
        ProgressReporter {
            inner: Arc::clone(&self.inner),
            epoch,
        }
    }

    /// Return to idle after success or failure. Outstanding reporters go inert.
    pub fn finish(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.tx.send_replace(UploadProgress::Idle);
    }

    pub fn current(&self) -> UploadProgress {
        *self.inner.tx.borrow()
    }

    pub fn is_in_flight(&self) -> bool {
        self.current().is_in_flight()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.inner.tx.subscribe()
    }
}

/// Byte-progress sink handed to the transport for one upload.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
    epoch: u64,
}

impl ProgressReporter {
    /// A reporter attached to nothing. Used where no tracker is wanted.
    pub fn detached() -> Self {
        ProgressTracker::new().start()
    }

    pub fn report(&self, sent: u64, total: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        self.inner.tx.send_if_modified(|state| match state {
            UploadProgress::Idle => false,
            UploadProgress::InFlight {
                sent: prev_sent,
                total: prev_total,
                percent: prev_pct,
            } => {
                let pct = percent_of(sent, total).max(*prev_pct);
                let sent = sent.max(*prev_sent);
                if pct == *prev_pct && sent == *prev_sent && total == *prev_total {
                    return false;
                }
                *state = UploadProgress::InFlight {
                    sent,
                    total,
                    percent: pct,
                };
                true
            }
        });
    }
}

impl ProgressReporter {
    /// Guard that returns the tracker to idle when dropped, so an upload
    /// future cancelled mid-call does not leave the slot in flight.
    pub fn finish_on_drop(&self) -> FinishOnDrop {
        FinishOnDrop {
            inner: Arc::clone(&self.inner),
            epoch: self.epoch,
        }
    }
}

/// See [`ProgressReporter::finish_on_drop`]. Does nothing if the tracker
/// already moved on to another upload.
pub struct FinishOnDrop {
    inner: Arc<Inner>,
    epoch: u64,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        let ended = self.inner.epoch.compare_exchange(
            self.epoch,
            self.epoch + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if ended.is_ok() {
            self.inner.tx.send_replace(UploadProgress::Idle);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// One tracker per document slot.
#[derive(Default)]
pub struct ProgressBoard {
    trackers: HashMap<DocumentType, ProgressTracker>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&mut self, slot: DocumentType) -> &ProgressTracker {
        self.trackers.entry(slot).or_default()
    }

    pub fn progress(&self, slot: DocumentType) -> UploadProgress {
        self.trackers
            .get(&slot)
            .map(ProgressTracker::current)
            .unwrap_or_default()
    }

    pub fn is_busy(&self, slot: DocumentType) -> bool {
        self.progress(slot).is_in_flight()
    }
}

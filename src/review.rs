//! Reviewer side of credential verification.
//!
//! A reviewer opens a decision dialog for one document or for every
//! unverified document of a subject, optionally writes notes, and confirms.
//! Nothing touches the registry until the remote call succeeds; the
//! reconciler then applies the decision locally and the pending queue is
//! refreshed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::BulkReconcileMode;
use crate::models::{
    DecisionError, DecisionTarget, DocumentId, PendingVerification, SubjectId,
    VerificationDecision, VerificationOutcome,
};
use crate::reconcile::{self, ReconcileReport};
use crate::registry::DocumentRegistry;
use crate::transport::{DocumentTransport, TransportError, VerifyRequest};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("A reason is required to reject a document")]
    MissingRejectReason,

    #[error("There are no unverified documents to review")]
    NothingToReview,

    #[error("No decision is open")]
    NoOpenDialog,

    #[error("A decision is already being submitted")]
    DecisionInFlight,

    #[error("Document {0} is already verified")]
    AlreadyVerified(DocumentId),

    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("Decision is for subject {expected}, registry holds {found}")]
    SubjectMismatch { expected: SubjectId, found: SubjectId },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReviewError {
    /// True when the reviewer can fix the problem without a retry.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

impl From<DecisionError> for ReviewError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::MissingRejectReason => Self::MissingRejectReason,
            DecisionError::EmptySnapshot => Self::NothingToReview,
        }
    }
}

// ---------------------------------------------------------------------------
// Decision dialog
// ---------------------------------------------------------------------------

/// An open, not yet confirmed decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionDialog {
    target: DecisionTarget,
    outcome: VerificationOutcome,
    notes: String,
    in_flight: bool,
    last_error: Option<String>,
}

impl DecisionDialog {
    fn new(target: DecisionTarget, outcome: VerificationOutcome) -> Self {
        Self {
            target,
            outcome,
            notes: String::new(),
            in_flight: false,
            last_error: None,
        }
    }

    pub fn target(&self) -> &DecisionTarget {
        &self.target
    }

    pub fn outcome(&self) -> VerificationOutcome {
        self.outcome
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Message of the last failed confirm, kept until the next attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn can_confirm(&self) -> bool {
        !self.in_flight
            && (self.outcome == VerificationOutcome::Verified || !self.notes.trim().is_empty())
    }
}

/// Clears the in-flight flag when the call ends, including when the
/// `confirm` future is dropped mid-call.
struct InFlightGuard<'a>(&'a mut DecisionDialog);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight = false;
    }
}

// ---------------------------------------------------------------------------
// Pending queue
// ---------------------------------------------------------------------------

/// Subjects waiting for review, as last reported by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendingQueue {
    entries: Vec<PendingVerification>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl PendingQueue {
    pub fn entries(&self) -> &[PendingVerification] {
        &self.entries
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn contains(&self, subject_id: &SubjectId) -> bool {
        self.entries.iter().any(|e| &e.subject_id == subject_id)
    }

    /// Replace the queue with the server's list. On failure the previous
    /// entries stay.
    pub async fn refresh<T: DocumentTransport>(
        &mut self,
        transport: &T,
    ) -> Result<(), TransportError> {
        self.entries = transport.pending_verifications().await?;
        self.refreshed_at = Some(Utc::now());
        tracing::debug!(count = self.entries.len(), "Pending verification queue refreshed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct ReviewWorkflow<T: DocumentTransport> {
    transport: T,
    mode: BulkReconcileMode,
    dialog: Option<DecisionDialog>,
    queue: PendingQueue,
}

impl<T: DocumentTransport> ReviewWorkflow<T> {
    pub fn new(transport: T, mode: BulkReconcileMode) -> Self {
        Self {
            transport,
            mode,
            dialog: None,
            queue: PendingQueue::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn mode(&self) -> BulkReconcileMode {
        self.mode
    }

    pub fn dialog(&self) -> Option<&DecisionDialog> {
        self.dialog.as_ref()
    }

    pub fn pending_queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Fetch the subject's full collection into `registry`.
    pub async fn load(&self, registry: &mut DocumentRegistry) -> Result<(), ReviewError> {
        let payload = self
            .transport
            .get_documents_for_subject(registry.subject_id())
            .await?;
        registry.replace_all(payload);
        Ok(())
    }

    pub async fn refresh_queue(&mut self) -> Result<(), ReviewError> {
        self.queue.refresh(&self.transport).await?;
        Ok(())
    }

    /// Whether bulk controls should be offered for this registry.
    pub fn bulk_available(&self, registry: &DocumentRegistry) -> bool {
        registry.documents().iter().any(|d| !d.is_verified())
    }

    pub fn open_single(
        &mut self,
        registry: &DocumentRegistry,
        document_id: &DocumentId,
        outcome: VerificationOutcome,
    ) -> Result<&DecisionDialog, ReviewError> {
        self.ensure_idle()?;
        let document = registry
            .get(document_id)
            .ok_or_else(|| ReviewError::DocumentNotFound(document_id.clone()))?;
        if document.is_verified() {
            return Err(ReviewError::AlreadyVerified(document_id.clone()));
        }

        let dialog = DecisionDialog::new(DecisionTarget::Single(document_id.clone()), outcome);
        Ok(self.dialog.insert(dialog))
    }

    /// Open a decision covering every document not verified right now. The
    /// id list is frozen here; later arrivals are not part of it.
    pub fn open_bulk(
        &mut self,
        registry: &DocumentRegistry,
        outcome: VerificationOutcome,
    ) -> Result<&DecisionDialog, ReviewError> {
        self.ensure_idle()?;
        let snapshot = registry.unverified_ids();
        if snapshot.is_empty() {
            return Err(ReviewError::NothingToReview);
        }

        tracing::debug!(
            subject = %registry.subject_id(),
            outcome = %outcome,
            snapshot = snapshot.len(),
            "Bulk decision opened"
        );
        let target = DecisionTarget::All {
            subject_id: registry.subject_id().clone(),
            snapshot,
        };
        Ok(self.dialog.insert(DecisionDialog::new(target, outcome)))
    }

    pub fn set_notes(&mut self, notes: &str) -> Result<(), ReviewError> {
        let dialog = self.dialog.as_mut().ok_or(ReviewError::NoOpenDialog)?;
        dialog.notes = notes.to_string();
        Ok(())
    }

    pub fn can_confirm(&self) -> bool {
        self.dialog.as_ref().is_some_and(DecisionDialog::can_confirm)
    }

    /// Close the dialog without a call.
    pub fn cancel(&mut self) {
        if self.dialog.take().is_some() {
            tracing::debug!("Decision dialog cancelled");
        }
    }

    /// Submit the open decision. On success the registry reflects it and the
    /// dialog closes; on failure the registry is untouched and the dialog
    /// stays open with the error for a retry.
    pub async fn confirm(
        &mut self,
        registry: &mut DocumentRegistry,
    ) -> Result<ReconcileReport, ReviewError> {
        let dialog = self.dialog.as_mut().ok_or(ReviewError::NoOpenDialog)?;
        if dialog.in_flight {
            return Err(ReviewError::DecisionInFlight);
        }
        if let DecisionTarget::All { subject_id, .. } = &dialog.target {
            if subject_id != registry.subject_id() {
                return Err(ReviewError::SubjectMismatch {
                    expected: subject_id.clone(),
                    found: registry.subject_id().clone(),
                });
            }
        }

        let decision =
            VerificationDecision::new(dialog.target.clone(), dialog.outcome, &dialog.notes)?;
        let mut request = VerifyRequest::single(
            decision.outcome() == VerificationOutcome::Verified,
            decision.notes().map(str::to_string),
        );
        if decision.target().is_bulk() {
            request.document_ids = decision.target().document_ids().to_vec();
        }

        dialog.in_flight = true;
        dialog.last_error = None;

        let mut guard = InFlightGuard(dialog);
        let result = match decision.target() {
            DecisionTarget::Single(id) => self.transport.verify_document(id, &request).await,
            DecisionTarget::All { subject_id, .. } => {
                self.transport
                    .verify_all_documents(subject_id, &request)
                    .await
            }
        };

        if let Err(e) = result {
            guard.0.last_error = Some(e.to_string());
            drop(guard);
            tracing::warn!(
                subject = %registry.subject_id(),
                outcome = %decision.outcome(),
                error = %e,
                "Verification call failed"
            );
            return Err(e.into());
        }

        drop(guard);
        self.dialog = None;
        let mut report = reconcile::apply(registry, &decision);

        if decision.target().is_bulk() && self.mode == BulkReconcileMode::Resync {
            let fetched = self
                .transport
                .get_documents_for_subject(registry.subject_id())
                .await;
            match fetched {
                Ok(payload) => registry.replace_all(payload),
                Err(e) => {
                    tracing::warn!(
                        subject = %registry.subject_id(),
                        error = %e,
                        "Re-fetch after bulk decision failed; keeping local result"
                    );
                    report.stale = true;
                }
            }
        }

        if let Err(e) = self.queue.refresh(&self.transport).await {
            tracing::warn!(error = %e, "Pending queue refresh failed");
        }

        Ok(report)
    }

    fn ensure_idle(&self) -> Result<(), ReviewError> {
        match &self.dialog {
            Some(d) if d.in_flight => Err(ReviewError::DecisionInFlight),
            _ => Ok(()),
        }
    }
}

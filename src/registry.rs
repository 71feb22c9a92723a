//! In-memory document collection for one subject.
//!
//! The registry is the single source of truth the upload and review workflows
//! read from. It is never reached through a global: workflows receive
//! `&mut DocumentRegistry` per call, which keeps a single writer per subject.
//! Gate flags (`has_all_required_document_types`, `all_required_verified`,
//! submission eligibility) are derived on read so they can never go stale
//! relative to the documents.

use serde::Serialize;
use thiserror::Error;

use crate::models::{
    Document, DocumentId, DocumentType, SubjectDocuments, SubjectId, VerificationStatus,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Slot {0} already holds a document")]
    SlotOccupied(DocumentType),

    #[error("Document {document_id} belongs to subject {found}, not {expected}")]
    SubjectMismatch {
        document_id: DocumentId,
        expected: SubjectId,
        found: SubjectId,
    },
}

/// Observable state of one (subject, document type) slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    Submitted {
        document_id: DocumentId,
        status: VerificationStatus,
    },
    Verified {
        document_id: DocumentId,
    },
    Rejected {
        document_id: DocumentId,
        notes: Option<String>,
    },
}

impl SlotState {
    /// Only an empty slot takes a new upload; a rejected document must be
    /// deleted first.
    pub fn accepts_upload(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn allows_delete(&self) -> bool {
        matches!(self, Self::Submitted { .. } | Self::Rejected { .. })
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Empty => None,
            Self::Submitted { document_id, .. }
            | Self::Verified { document_id }
            | Self::Rejected { document_id, .. } => Some(document_id),
        }
    }
}

/// Why documents cannot be submitted for review right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "slots", rename_all = "snake_case")]
pub enum SubmitBlocker {
    MissingRequired(Vec<DocumentType>),
    HasRejected(Vec<DocumentType>),
    AlreadyVerified,
}

impl std::fmt::Display for SubmitBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(slots: &[DocumentType]) -> String {
            slots.iter().map(|s| s.label()).collect::<Vec<_>>().join(", ")
        }
        match self {
            Self::MissingRequired(slots) => write!(f, "missing required documents: {}", join(slots)),
            Self::HasRejected(slots) => {
                write!(f, "rejected documents must be replaced first: {}", join(slots))
            }
            Self::AlreadyVerified => f.write_str("all documents are already verified"),
        }
    }
}

/// Flags the server computed on the last full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ServerFlags {
    has_all_required: bool,
    all_verified: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentRegistry {
    subject_id: SubjectId,
    documents: Vec<Document>,
    server_flags: Option<ServerFlags>,
    revision: u64,
}

impl DocumentRegistry {
    /// Create an empty registry for a subject. Populate with `replace_all`.
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            documents: Vec::new(),
            server_flags: None,
            revision: 0,
        }
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True once a full fetch has been applied.
    pub fn is_loaded(&self) -> bool {
        self.server_flags.is_some()
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| &d.id == id)
    }

    pub fn active_for(&self, slot: DocumentType) -> Option<&Document> {
        self.documents.iter().find(|d| d.document_type == slot)
    }

    pub fn slot_state(&self, slot: DocumentType) -> SlotState {
        match self.active_for(slot) {
            None => SlotState::Empty,
            Some(doc) => match doc.verification_status {
                VerificationStatus::Verified => SlotState::Verified {
                    document_id: doc.id.clone(),
                },
                VerificationStatus::Rejected => SlotState::Rejected {
                    document_id: doc.id.clone(),
                    notes: doc.verification_notes.clone(),
                },
                status => SlotState::Submitted {
                    document_id: doc.id.clone(),
                    status,
                },
            },
        }
    }

    // ── Derived flags ───────────────────────────────────────

    pub fn has_all_required_document_types(&self) -> bool {
        DocumentType::REQUIRED
            .iter()
            .all(|slot| self.active_for(*slot).is_some())
    }

    pub fn all_required_verified(&self) -> bool {
        self.has_all_required_document_types()
            && !self.any_rejected()
            && DocumentType::REQUIRED
                .iter()
                .filter_map(|slot| self.active_for(*slot))
                .all(Document::is_verified)
    }

    pub fn any_rejected(&self) -> bool {
        self.documents.iter().any(Document::is_rejected)
    }

    /// Every document held is verified (and there is at least one).
    pub fn all_documents_verified(&self) -> bool {
        !self.documents.is_empty() && self.documents.iter().all(Document::is_verified)
    }

    /// Ids of every document not yet verified, in registry order.
    pub fn unverified_ids(&self) -> Vec<DocumentId> {
        self.documents
            .iter()
            .filter(|d| !d.is_verified())
            .map(|d| d.id.clone())
            .collect()
    }

    /// Submission is allowed iff all required types are present, none is
    /// rejected, and not everything is already verified.
    pub fn submission_gate(&self) -> Result<(), SubmitBlocker> {
        let missing: Vec<DocumentType> = DocumentType::REQUIRED
            .iter()
            .copied()
            .filter(|slot| self.active_for(*slot).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(SubmitBlocker::MissingRequired(missing));
        }

        let rejected: Vec<DocumentType> = self
            .documents
            .iter()
            .filter(|d| d.is_rejected())
            .map(|d| d.document_type)
            .collect();
        if !rejected.is_empty() {
            return Err(SubmitBlocker::HasRejected(rejected));
        }

        if self.all_documents_verified() {
            return Err(SubmitBlocker::AlreadyVerified);
        }

        Ok(())
    }

    pub fn can_submit_for_review(&self) -> bool {
        self.submission_gate().is_ok()
    }

    // ── Mutation ────────────────────────────────────────────

    /// Replace the whole collection with a full fetch.
    ///
    /// Documents for another subject are dropped. If the server returns two
    /// documents for one slot, the most recently uploaded one is kept.
    pub fn replace_all(&mut self, payload: SubjectDocuments) {
        let mut documents: Vec<Document> = Vec::with_capacity(payload.documents.len());

        for doc in payload.documents {
            if doc.subject_id != self.subject_id {
                tracing::warn!(
                    document_id = %doc.id,
                    subject = %doc.subject_id,
                    expected = %self.subject_id,
                    "Dropping document for another subject"
                );
                continue;
            }
            match documents
                .iter_mut()
                .find(|d| d.document_type == doc.document_type)
            {
                Some(existing) => {
                    let newer = doc.uploaded_at > existing.uploaded_at;
                    let kept = if newer { &doc.id } else { &existing.id };
                    tracing::warn!(
                        slot = %doc.document_type,
                        kept = %kept,
                        "Server returned two documents for one slot"
                    );
                    if newer {
                        *existing = doc;
                    }
                }
                None => documents.push(doc),
            }
        }

        self.documents = documents;
        self.server_flags = Some(ServerFlags {
            has_all_required: payload.has_all_required_documents,
            all_verified: payload.all_documents_verified,
        });
        self.revision += 1;

        if payload.has_all_required_documents != self.has_all_required_document_types()
            || payload.all_documents_verified != self.all_documents_verified()
        {
            tracing::warn!(
                subject = %self.subject_id,
                server_has_all_required = payload.has_all_required_documents,
                server_all_verified = payload.all_documents_verified,
                "Server flags disagree with local derivation; using local"
            );
        }

        tracing::debug!(
            subject = %self.subject_id,
            count = self.documents.len(),
            revision = self.revision,
            "Registry replaced"
        );
    }

    /// Add a newly uploaded document to its (empty) slot.
    pub fn insert(&mut self, document: Document) -> Result<(), RegistryError> {
        if document.subject_id != self.subject_id {
            return Err(RegistryError::SubjectMismatch {
                document_id: document.id,
                expected: self.subject_id.clone(),
                found: document.subject_id,
            });
        }
        if self.active_for(document.document_type).is_some() {
            return Err(RegistryError::SlotOccupied(document.document_type));
        }

        self.documents.push(document);
        self.revision += 1;
        Ok(())
    }

    pub fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        let index = self.documents.iter().position(|d| &d.id == id)?;
        self.revision += 1;
        Some(self.documents.remove(index))
    }

    /// Overwrite a document's verification fields. Returns `false` if the id
    /// is unknown.
    pub(crate) fn set_verification(
        &mut self,
        id: &DocumentId,
        status: VerificationStatus,
        notes: Option<String>,
    ) -> bool {
        match self.documents.iter_mut().find(|d| &d.id == id) {
            Some(doc) => {
                doc.verification_status = status;
                doc.verification_notes = notes;
                self.revision += 1;
                true
            }
            None => false,
        }
    }
}

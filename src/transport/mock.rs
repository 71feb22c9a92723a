//! In-memory document service. Shares state between clones so a test can
//! hand one clone to a workflow and inspect the "server" through another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use super::{DocumentTransport, TransportError, VerifyRequest};
use crate::models::{
    Document, DocumentId, DocumentType, PendingVerification, SubjectDocuments, SubjectId,
    VerificationStatus,
};
use crate::progress::ProgressReporter;
use crate::validator::CandidateFile;

/// Operations the mock counts and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Upload,
    Delete,
    View,
    Download,
    Submit,
    Fetch,
    Verify,
    VerifyAll,
    Pending,
}

/// Chunks the mock upload reports progress in.
const MOCK_UPLOAD_CHUNKS: u64 = 4;

#[derive(Default)]
struct MockState {
    subject_id: Option<SubjectId>,
    documents: Vec<Document>,
    contents: HashMap<DocumentId, Vec<u8>>,
    pending: Vec<PendingVerification>,
    calls: HashMap<MockOp, usize>,
    failures: HashMap<MockOp, TransportError>,
    gates: HashMap<MockOp, Arc<Notify>>,
    submissions: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A mock serving one subject. Uploads and submissions belong to it.
    pub fn new(subject_id: SubjectId) -> Self {
        let mock = Self::default();
        mock.lock().subject_id = Some(subject_id);
        mock
    }

    pub fn with_documents(self, documents: Vec<Document>) -> Self {
        for doc in documents {
            self.seed_document(doc, Vec::new());
        }
        self
    }

    pub fn with_pending(self, pending: Vec<PendingVerification>) -> Self {
        self.lock().pending = pending;
        self
    }

    /// Place a document on the server side without going through a workflow.
    pub fn seed_document(&self, document: Document, contents: Vec<u8>) {
        let mut state = self.lock();
        state.contents.insert(document.id.clone(), contents);
        state.documents.push(document);
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: MockOp, error: TransportError) {
        self.lock().failures.insert(op, error);
    }

    /// Hold the next call of `op` open until the returned gate is notified.
    pub fn gate(&self, op: MockOp) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gates.insert(op, gate.clone());
        gate
    }

    pub fn calls(&self, op: MockOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn documents(&self) -> Vec<Document> {
        self.lock().documents.clone()
    }

    pub fn document(&self, id: &DocumentId) -> Option<Document> {
        self.lock().documents.iter().find(|d| &d.id == id).cloned()
    }

    pub fn submissions(&self) -> Vec<String> {
        self.lock().submissions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pass_gate(&self, op: MockOp) {
        let gate = self.lock().gates.remove(&op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    /// Count the call and return the queued failure, if any.
    fn enter(&self, op: MockOp) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    fn bytes_of(&self, op: MockOp, id: &DocumentId) -> Result<Vec<u8>, TransportError> {
        let state = self.enter(op)?;
        state
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("document {id}")))
    }

    fn apply_decision<'a>(
        documents: impl Iterator<Item = &'a mut Document>,
        request: &VerifyRequest,
    ) {
        let status = if request.verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Rejected
        };
        for doc in documents {
            doc.verification_status = status;
            doc.verification_notes = request.verification_notes.clone();
        }
    }
}

impl DocumentTransport for MockTransport {
    async fn upload_document(
        &self,
        file: &CandidateFile,
        document_type: DocumentType,
        description: Option<&str>,
        progress: ProgressReporter,
    ) -> Result<Document, TransportError> {
        self.pass_gate(MockOp::Upload).await;
        let mut state = self.enter(MockOp::Upload)?;

        let total = file.size_bytes;
        for step in 1..=MOCK_UPLOAD_CHUNKS {
            progress.report(total * step / MOCK_UPLOAD_CHUNKS, total);
        }

        let subject_id = state
            .subject_id
            .clone()
            .ok_or_else(|| TransportError::Server {
                status: 403,
                message: "no subject session".into(),
            })?;

        let document = Document {
            id: DocumentId::new(Uuid::new_v4().to_string()),
            subject_id,
            document_type,
            file_name: file.file_name.clone(),
            file_size_kb: file.size_bytes.div_ceil(1024),
            mime_type: file.media_type(),
            uploaded_at: Utc::now(),
            description: description.map(str::to_string),
            verification_status: VerificationStatus::Pending,
            verification_notes: None,
        };

        state
            .contents
            .insert(document.id.clone(), file.bytes.clone());
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), TransportError> {
        self.pass_gate(MockOp::Delete).await;
        let mut state = self.enter(MockOp::Delete)?;
        let index = state
            .documents
            .iter()
            .position(|d| &d.id == document_id)
            .ok_or_else(|| TransportError::NotFound(format!("document {document_id}")))?;
        if state.documents[index].is_verified() {
            return Err(TransportError::Server {
                status: 409,
                message: "verified documents cannot be deleted".into(),
            });
        }
        state.documents.remove(index);
        state.contents.remove(document_id);
        Ok(())
    }

    async fn view_document(&self, document_id: &DocumentId) -> Result<Vec<u8>, TransportError> {
        self.pass_gate(MockOp::View).await;
        self.bytes_of(MockOp::View, document_id)
    }

    async fn download_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<u8>, TransportError> {
        self.pass_gate(MockOp::Download).await;
        self.bytes_of(MockOp::Download, document_id)
    }

    async fn submit_documents_for_review(&self, notes: &str) -> Result<(), TransportError> {
        self.pass_gate(MockOp::Submit).await;
        let mut state = self.enter(MockOp::Submit)?;
        state.submissions.push(notes.to_string());
        for doc in state
            .documents
            .iter_mut()
            .filter(|d| d.verification_status == VerificationStatus::Uploaded)
        {
            doc.verification_status = VerificationStatus::Pending;
        }
        Ok(())
    }

    async fn get_documents_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<SubjectDocuments, TransportError> {
        self.pass_gate(MockOp::Fetch).await;
        let state = self.enter(MockOp::Fetch)?;
        let documents: Vec<Document> = state
            .documents
            .iter()
            .filter(|d| &d.subject_id == subject_id)
            .cloned()
            .collect();

        let has_all_required_documents = DocumentType::REQUIRED
            .iter()
            .all(|slot| documents.iter().any(|d| d.document_type == *slot));
        let all_documents_verified =
            !documents.is_empty() && documents.iter().all(Document::is_verified);

        Ok(SubjectDocuments {
            documents,
            has_all_required_documents,
            all_documents_verified,
        })
    }

    async fn verify_document(
        &self,
        document_id: &DocumentId,
        request: &VerifyRequest,
    ) -> Result<(), TransportError> {
        self.pass_gate(MockOp::Verify).await;
        let mut state = self.enter(MockOp::Verify)?;
        let doc = state
            .documents
            .iter_mut()
            .find(|d| &d.id == document_id)
            .ok_or_else(|| TransportError::NotFound(format!("document {document_id}")))?;
        Self::apply_decision(std::iter::once(doc), request);
        Ok(())
    }

    async fn verify_all_documents(
        &self,
        subject_id: &SubjectId,
        request: &VerifyRequest,
    ) -> Result<(), TransportError> {
        self.pass_gate(MockOp::VerifyAll).await;
        let mut state = self.enter(MockOp::VerifyAll)?;
        Self::apply_decision(
            state.documents.iter_mut().filter(|d| {
                &d.subject_id == subject_id
                    && !d.is_verified()
                    && request.document_ids.contains(&d.id)
            }),
            request,
        );

        let still_waiting = state.documents.iter().any(|d| {
            &d.subject_id == subject_id
                && matches!(
                    d.verification_status,
                    VerificationStatus::Uploaded | VerificationStatus::Pending
                )
        });
        if !still_waiting {
            state.pending.retain(|p| &p.subject_id != subject_id);
        }
        Ok(())
    }

    async fn pending_verifications(&self) -> Result<Vec<PendingVerification>, TransportError> {
        self.pass_gate(MockOp::Pending).await;
        let state = self.enter(MockOp::Pending)?;
        Ok(state.pending.clone())
    }
}

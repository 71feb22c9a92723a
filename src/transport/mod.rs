//! The document API as seen by the workflows.
//!
//! `DocumentTransport` is the seam: `HttpDocumentTransport` talks to the real
//! backend, `MockTransport` keeps an in-memory server for tests and demos.

pub mod http;
pub mod mock;
pub mod wire;

pub use http::HttpDocumentTransport;
pub use mock::{MockOp, MockTransport};

use std::future::Future;

use serde::Serialize;
use thiserror::Error;

use crate::models::{
    Document, DocumentId, DocumentType, PendingVerification, SubjectDocuments, SubjectId,
};
use crate::progress::ProgressReporter;
use crate::validator::CandidateFile;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Cannot reach document service at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// Body of the verify endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verified: bool,
    pub verification_notes: Option<String>,
    /// Bulk only: the ids the decision covers. Documents outside this list
    /// must not change.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<DocumentId>,
}

impl VerifyRequest {
    pub fn single(verified: bool, verification_notes: Option<String>) -> Self {
        Self {
            verified,
            verification_notes,
            document_ids: Vec::new(),
        }
    }
}

/// Remote document operations. Each call is one request; none is retried.
pub trait DocumentTransport {
    /// Upload a validated file into a slot. Byte progress goes to `progress`.
    fn upload_document(
        &self,
        file: &CandidateFile,
        document_type: DocumentType,
        description: Option<&str>,
        progress: ProgressReporter,
    ) -> impl Future<Output = Result<Document, TransportError>> + Send;

    fn delete_document(
        &self,
        document_id: &DocumentId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Raw bytes for preview.
    fn view_document(
        &self,
        document_id: &DocumentId,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Raw bytes for saving to disk.
    fn download_document(
        &self,
        document_id: &DocumentId,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    fn submit_documents_for_review(
        &self,
        notes: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn get_documents_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> impl Future<Output = Result<SubjectDocuments, TransportError>> + Send;

    fn verify_document(
        &self,
        document_id: &DocumentId,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn verify_all_documents(
        &self,
        subject_id: &SubjectId,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subjects with documents waiting for a reviewer.
    fn pending_verifications(
        &self,
    ) -> impl Future<Output = Result<Vec<PendingVerification>, TransportError>> + Send;
}

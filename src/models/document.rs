use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{DocumentType, MediaType, VerificationStatus};

/// Server-assigned document identifier. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The doctor whose credential documents are being managed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One uploaded credential file, as last confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub subject_id: SubjectId,
    pub document_type: DocumentType,
    pub file_name: String,
    pub file_size_kb: u64,
    /// `None` when the server reported a type outside the supported set.
    pub mime_type: Option<MediaType>,
    pub uploaded_at: DateTime<Utc>,
    pub description: Option<String>,
    pub verification_status: VerificationStatus,
    pub verification_notes: Option<String>,
}

impl Document {
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    pub fn is_rejected(&self) -> bool {
        self.verification_status == VerificationStatus::Rejected
    }
}

/// Full-collection fetch result for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectDocuments {
    pub documents: Vec<Document>,
    pub has_all_required_documents: bool,
    pub all_documents_verified: bool,
}

/// One entry of the reviewer's "doctors awaiting verification" queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingVerification {
    pub subject_id: SubjectId,
    pub display_name: String,
    pub pending_documents: u32,
    pub submitted_at: Option<DateTime<Utc>>,
}

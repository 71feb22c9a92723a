//! JSON shapes of the document API and their narrowing into domain types.
//!
//! The backend is loosely typed: ids arrive as numbers or strings, status may
//! be missing in favour of the legacy `verifiedByAdmin` flag, and media types
//! are free text. Everything is checked here so nothing loosely typed reaches
//! the registry. `verificationStatus` is canonical; `verifiedByAdmin` is read
//! only when the status is absent.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::TransportError;
use crate::models::{
    Document, DocumentId, DocumentType, MediaType, PendingVerification, SubjectDocuments,
    SubjectId, VerificationStatus,
};

/// Identifier that may be sent as a JSON number or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDto {
    pub id: WireId,
    #[serde(default, alias = "subjectId")]
    pub doctor_id: Option<WireId>,
    pub document_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, alias = "fileSizeKB")]
    pub file_size_kb: Option<u64>,
    #[serde(default, alias = "fileType")]
    pub mime_type: Option<String>,
    #[serde(default, alias = "uploadDate")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub verification_status: Option<String>,
    #[serde(default)]
    pub verified_by_admin: Option<bool>,
    #[serde(default)]
    pub verification_notes: Option<String>,
}

impl DocumentDto {
    /// Narrow into a `Document`. `subject` is used when the payload omits the
    /// owner (the subject's own endpoints do).
    pub fn into_document(self, subject: Option<&SubjectId>) -> Result<Document, TransportError> {
        let id = DocumentId::new(self.id.into_string());

        let document_type: DocumentType = self.document_type.trim().parse().map_err(|_| {
            tracing::warn!(
                document_id = %id,
                value = %self.document_type,
                "Unknown document type from server"
            );
            TransportError::Malformed(format!(
                "unknown document type '{}' for document {id}",
                self.document_type
            ))
        })?;

        let verification_status = match (self.verification_status.as_deref(), self.verified_by_admin) {
            (Some(raw), _) => raw.trim().parse::<VerificationStatus>().map_err(|_| {
                tracing::warn!(document_id = %id, value = raw, "Unknown verification status from server");
                TransportError::Malformed(format!(
                    "unknown verification status '{raw}' for document {id}"
                ))
            })?,
            (None, Some(true)) => VerificationStatus::Verified,
            (None, Some(false)) => VerificationStatus::Pending,
            (None, None) => {
                tracing::warn!(document_id = %id, "Document has no verification status");
                return Err(TransportError::Malformed(format!(
                    "missing verification status for document {id}"
                )));
            }
        };

        let mime_type = self.mime_type.as_deref().and_then(|raw| {
            let narrowed = MediaType::from_declared(raw);
            if narrowed.is_none() {
                tracing::debug!(document_id = %id, value = raw, "Unsupported media type from server");
            }
            narrowed
        });

        let subject_id = match (self.doctor_id, subject) {
            (Some(owner), _) => SubjectId::new(owner.into_string()),
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => {
                return Err(TransportError::Malformed(format!(
                    "document {id} has no owner"
                )))
            }
        };

        Ok(Document {
            file_name: self
                .file_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("{}-{}", document_type.as_str().to_lowercase(), id)),
            id,
            subject_id,
            document_type,
            file_size_kb: self.file_size_kb.unwrap_or(0),
            mime_type,
            uploaded_at: self.uploaded_at.unwrap_or_else(Utc::now),
            description: self.description.filter(|d| !d.trim().is_empty()),
            verification_status,
            verification_notes: self.verification_notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDocumentsDto {
    #[serde(default)]
    pub documents: Vec<DocumentDto>,
    #[serde(default)]
    pub has_all_required_documents: bool,
    #[serde(default)]
    pub all_documents_verified: bool,
}

impl SubjectDocumentsDto {
    pub fn into_domain(self, subject: &SubjectId) -> Result<SubjectDocuments, TransportError> {
        let documents = self
            .documents
            .into_iter()
            .map(|d| d.into_document(Some(subject)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SubjectDocuments {
            documents,
            has_all_required_documents: self.has_all_required_documents,
            all_documents_verified: self.all_documents_verified,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerificationDto {
    #[serde(alias = "id")]
    pub doctor_id: WireId,
    #[serde(default, alias = "name", alias = "fullName")]
    pub doctor_name: Option<String>,
    #[serde(default, alias = "pendingCount")]
    pub pending_documents: Option<u32>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<PendingVerificationDto> for PendingVerification {
    fn from(dto: PendingVerificationDto) -> Self {
        let subject_id = SubjectId::new(dto.doctor_id.into_string());
        Self {
            display_name: dto
                .doctor_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| subject_id.to_string()),
            subject_id,
            pending_documents: dto.pending_documents.unwrap_or(0),
            submitted_at: dto.submitted_at,
        }
    }
}

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBodyDto {
    #[serde(alias = "error")]
    pub message: String,
}

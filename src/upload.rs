//! Subject side of credential verification: upload, delete, view and
//! download documents per slot, and submit the set for review.
//!
//! Every operation takes the subject's registry by `&mut` and changes it only
//! after the remote call succeeded.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::blob::BlobStore;
use crate::config::{ClientConfig, ValidationLimits};
use crate::models::{Document, DocumentId, DocumentType};
use crate::preview::{PreviewError, PreviewViewer, Resolution};
use crate::progress::{ProgressBoard, UploadProgress};
use crate::registry::{DocumentRegistry, RegistryError, SlotState, SubmitBlocker};
use crate::transport::{DocumentTransport, TransportError};
use crate::validator::{validate, CandidateFile, ValidationError};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{} already has a document; delete it before uploading again", .0.label())]
    SlotOccupied(DocumentType),

    #[error("An upload for {} is already in progress", .0.label())]
    SlotBusy(DocumentType),

    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("Document {0} is verified and cannot be deleted")]
    DeleteVerified(DocumentId),

    #[error("Cannot submit for review: {0}")]
    SubmitBlocked(SubmitBlocker),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("Could not save download: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// True when the action was refused locally, before or instead of a call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SlotOccupied(_)
                | Self::SlotBusy(_)
                | Self::DocumentNotFound(_)
                | Self::DeleteVerified(_)
                | Self::SubmitBlocked(_)
        )
    }
}

/// Per-slot state for the upload screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub document_type: DocumentType,
    pub label: &'static str,
    pub required: bool,
    pub state: SlotState,
    pub upload_enabled: bool,
    pub delete_enabled: bool,
    pub busy: bool,
    pub progress: UploadProgress,
}

/// Make a server-supplied file name safe to create inside a directory.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|&c| c != '/' && c != '\\' && c != '\0')
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.replace("..", "");
    let sanitized: String = sanitized.trim_start_matches('.').chars().take(100).collect();

    if sanitized.is_empty() {
        "document".into()
    } else {
        sanitized
    }
}

pub struct UploadWorkflow<T: DocumentTransport> {
    transport: T,
    limits: ValidationLimits,
    download_dir: PathBuf,
    board: ProgressBoard,
}

impl<T: DocumentTransport> UploadWorkflow<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport,
            limits: config.limits.clone(),
            download_dir: config.download_dir.clone(),
            board: ProgressBoard::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn progress(&self, slot: DocumentType) -> UploadProgress {
        self.board.progress(slot)
    }

    /// Trackers behind `progress`, for subscribing to live updates.
    pub fn progress_board(&mut self) -> &mut ProgressBoard {
        &mut self.board
    }

    /// Validate `file` and upload it into the empty `document_type` slot.
    pub async fn upload(
        &mut self,
        registry: &mut DocumentRegistry,
        file: Option<&CandidateFile>,
        document_type: DocumentType,
        description: Option<&str>,
    ) -> Result<Document, UploadError> {
        if !registry.slot_state(document_type).accepts_upload() {
            return Err(UploadError::SlotOccupied(document_type));
        }
        if self.board.is_busy(document_type) {
            return Err(UploadError::SlotBusy(document_type));
        }

        let media = validate(file, &self.limits)?;
        let Some(file) = file else {
            return Err(ValidationError::NoFileSelected.into());
        };

        tracing::info!(
            subject = %registry.subject_id(),
            slot = %document_type,
            file = %file.file_name,
            media = %media,
            "Upload started"
        );

        let reporter = self.board.tracker(document_type).start();
        let in_flight = reporter.finish_on_drop();
        let result = self
            .transport
            .upload_document(file, document_type, description, reporter)
            .await;
        drop(in_flight);

        let document = match result {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(slot = %document_type, error = %e, "Upload failed");
                return Err(e.into());
            }
        };

        registry.insert(document.clone())?;
        tracing::info!(
            document_id = %document.id,
            slot = %document_type,
            status = %document.verification_status,
            "Upload complete"
        );
        Ok(document)
    }

    /// Delete a document that is not verified.
    pub async fn delete(
        &self,
        registry: &mut DocumentRegistry,
        document_id: &DocumentId,
    ) -> Result<(), UploadError> {
        let document = registry
            .get(document_id)
            .ok_or_else(|| UploadError::DocumentNotFound(document_id.clone()))?;
        if document.is_verified() {
            return Err(UploadError::DeleteVerified(document_id.clone()));
        }

        self.transport.delete_document(document_id).await?;
        registry.remove(document_id);
        tracing::info!(document_id = %document_id, "Document deleted");
        Ok(())
    }

    /// Show a document of the registry in `viewer`.
    pub async fn view<S: BlobStore>(
        &self,
        registry: &DocumentRegistry,
        viewer: &mut PreviewViewer<S>,
        document_id: &DocumentId,
    ) -> Result<Resolution, UploadError> {
        let document = registry
            .get(document_id)
            .ok_or_else(|| UploadError::DocumentNotFound(document_id.clone()))?;
        Ok(viewer.load(&self.transport, document).await?)
    }

    /// Fetch a document and save it under its sanitised name in `dest_dir`
    /// (the configured download directory when `None`). Returns the path
    /// written.
    pub async fn download(
        &self,
        document: &Document,
        dest_dir: Option<&Path>,
    ) -> Result<PathBuf, UploadError> {
        let bytes = self.transport.download_document(&document.id).await?;

        let mut file_name = sanitize_filename(&document.file_name);
        if Path::new(&file_name).extension().is_none() {
            if let Some(media) = document.mime_type {
                file_name = format!("{file_name}.{}", media.extension());
            }
        }
        let dir = dest_dir.map_or_else(|| self.download_dir.clone(), Path::to_path_buf);
        let target = dir.join(&file_name);

        let path = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(target)
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::info!(
            document_id = %document.id,
            path = %path.display(),
            "Document downloaded"
        );
        Ok(path)
    }

    /// Submit the subject's documents for review, then reload the registry.
    pub async fn submit_for_review(
        &self,
        registry: &mut DocumentRegistry,
        notes: &str,
    ) -> Result<(), UploadError> {
        registry
            .submission_gate()
            .map_err(UploadError::SubmitBlocked)?;

        self.transport.submit_documents_for_review(notes.trim()).await?;
        tracing::info!(subject = %registry.subject_id(), "Documents submitted for review");

        if let Err(e) = self.reload(registry).await {
            tracing::warn!(error = %e, "Reload after submission failed");
        }
        Ok(())
    }

    /// Replace the registry with the server's collection.
    pub async fn reload(&self, registry: &mut DocumentRegistry) -> Result<(), UploadError> {
        let payload = self
            .transport
            .get_documents_for_subject(registry.subject_id())
            .await?;
        registry.replace_all(payload);
        Ok(())
    }

    pub fn slot_views(&self, registry: &DocumentRegistry) -> Vec<SlotView> {
        DocumentType::ALL
            .iter()
            .map(|&slot| {
                let state = registry.slot_state(slot);
                let progress = self.board.progress(slot);
                let busy = progress.is_in_flight();
                SlotView {
                    document_type: slot,
                    label: slot.label(),
                    required: slot.is_required(),
                    upload_enabled: state.accepts_upload() && !busy,
                    delete_enabled: state.allows_delete() && !busy,
                    state,
                    busy,
                    progress,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::models::{MediaType, VerificationStatus};
    use crate::registry::tests::{doc, registry_with, subject};
    use crate::transport::{MockOp, MockTransport};

    const MB: usize = 1024 * 1024;

    fn workflow(mock: &MockTransport) -> UploadWorkflow<MockTransport> {
        UploadWorkflow::new(mock.clone(), &ClientConfig::default())
    }

    fn png(size: usize) -> CandidateFile {
        let mut bytes = vec![0u8; size];
        bytes[..4].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47]);
        CandidateFile::new("board-cert.png", bytes, Some("image/png"))
    }

    #[test]
    fn sanitize_strips_paths_and_specials() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("my license (1).pdf"), "my_license__1_.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "document");
        assert_eq!(sanitize_filename(&"é".repeat(150)).chars().count(), 100);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_without_a_call() {
        let mock = MockTransport::new(subject());
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());
        let big = CandidateFile::new("license.pdf", vec![0u8; 6 * MB], Some("application/pdf"));

        let err = wf
            .upload(&mut registry, Some(&big), DocumentType::License, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Validation(ValidationError::ExceedsSizeLimit { .. })
        ));
        assert!(err.is_validation());
        assert_eq!(mock.calls(MockOp::Upload), 0);
        assert_eq!(registry.slot_state(DocumentType::License), SlotState::Empty);
    }

    #[tokio::test]
    async fn accepted_file_fills_empty_slot() {
        let mock = MockTransport::new(subject());
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());

        let mut rx = wf
            .progress_board()
            .tracker(DocumentType::Certificate)
            .subscribe();
        let document = wf
            .upload(
                &mut registry,
                Some(&png(2 * MB)),
                DocumentType::Certificate,
                Some("board certificate"),
            )
            .await
            .unwrap();

        assert_eq!(document.mime_type, Some(MediaType::Png));
        assert_eq!(
            registry.slot_state(DocumentType::Certificate),
            SlotState::Submitted {
                document_id: document.id.clone(),
                status: VerificationStatus::Pending,
            }
        );
        assert_eq!(wf.progress(DocumentType::Certificate), UploadProgress::Idle);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), UploadProgress::Idle);
        assert_eq!(mock.calls(MockOp::Upload), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_validation_error() {
        let mock = MockTransport::new(subject());
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());

        let err = wf
            .upload(&mut registry, None, DocumentType::License, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Validation(ValidationError::NoFileSelected)
        ));
    }

    #[tokio::test]
    async fn rejected_slot_reopens_only_after_delete() {
        let mut rejected = doc("c", DocumentType::Certificate, VerificationStatus::Rejected);
        rejected.verification_notes = Some("blurry scan".into());
        let mock = MockTransport::new(subject()).with_documents(vec![
            doc("l", DocumentType::License, VerificationStatus::Verified),
            rejected,
        ]);
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());
        wf.reload(&mut registry).await.unwrap();

        assert!(!registry.can_submit_for_review());
        let err = wf
            .upload(&mut registry, Some(&png(1024)), DocumentType::Certificate, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SlotOccupied(DocumentType::Certificate)));

        wf.delete(&mut registry, &DocumentId::new("c")).await.unwrap();
        let view = wf
            .slot_views(&registry)
            .into_iter()
            .find(|v| v.document_type == DocumentType::Certificate)
            .unwrap();
        assert!(view.upload_enabled);

        wf.upload(&mut registry, Some(&png(1024)), DocumentType::Certificate, None)
            .await
            .unwrap();
        assert!(registry.can_submit_for_review());
    }

    #[tokio::test]
    async fn busy_slot_refuses_second_upload() {
        let mock = MockTransport::new(subject());
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());

        let _reporter = wf.progress_board().tracker(DocumentType::License).start();
        let err = wf
            .upload(&mut registry, Some(&png(1024)), DocumentType::License, None)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::SlotBusy(DocumentType::License)));
        assert_eq!(mock.calls(MockOp::Upload), 0);
        let view = &wf.slot_views(&registry)[0];
        assert!(view.busy);
        assert!(!view.upload_enabled);
    }

    #[tokio::test]
    async fn cancelled_upload_frees_the_slot() {
        let mock = MockTransport::new(subject());
        let _gate = mock.gate(MockOp::Upload);
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            wf.upload(&mut registry, Some(&png(1024)), DocumentType::License, None),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(wf.progress(DocumentType::License), UploadProgress::Idle);
        assert!(wf.slot_views(&registry)[0].upload_enabled);

        wf.upload(&mut registry, Some(&png(1024)), DocumentType::License, None)
            .await
            .unwrap();
        assert_eq!(mock.calls(MockOp::Upload), 1);
    }

    #[tokio::test]
    async fn failed_upload_leaves_registry_and_clears_progress() {
        let mock = MockTransport::new(subject());
        mock.fail_next(MockOp::Upload, TransportError::Timeout(60));
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());
        let rev = registry.revision();

        let err = wf
            .upload(&mut registry, Some(&png(1024)), DocumentType::License, None)
            .await
            .unwrap_err();

        assert!(!err.is_validation());
        assert_eq!(registry.revision(), rev);
        assert!(registry.is_empty());
        assert_eq!(wf.progress(DocumentType::License), UploadProgress::Idle);
    }

    #[tokio::test]
    async fn verified_document_cannot_be_deleted() {
        let verified = doc("l", DocumentType::License, VerificationStatus::Verified);
        let mock = MockTransport::new(subject()).with_documents(vec![verified.clone()]);
        let wf = workflow(&mock);
        let mut registry = registry_with(vec![verified]);

        let err = wf
            .delete(&mut registry, &DocumentId::new("l"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::DeleteVerified(_)));
        assert_eq!(mock.calls(MockOp::Delete), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn submit_respects_gate_and_reloads() {
        let mock = MockTransport::new(subject())
            .with_documents(vec![doc("l", DocumentType::License, VerificationStatus::Uploaded)]);
        let mut wf = workflow(&mock);
        let mut registry = DocumentRegistry::new(subject());
        wf.reload(&mut registry).await.unwrap();

        let err = wf
            .submit_for_review(&mut registry, "please review")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::SubmitBlocked(SubmitBlocker::MissingRequired(_))
        ));
        assert_eq!(mock.calls(MockOp::Submit), 0);

        wf.upload(&mut registry, Some(&png(1024)), DocumentType::Certificate, None)
            .await
            .unwrap();
        wf.submit_for_review(&mut registry, "  please review ")
            .await
            .unwrap();

        assert_eq!(mock.submissions(), vec!["please review".to_string()]);
        assert_eq!(mock.calls(MockOp::Fetch), 2);
        assert_eq!(
            registry.get(&DocumentId::new("l")).unwrap().verification_status,
            VerificationStatus::Pending
        );
    }

    #[tokio::test]
    async fn download_saves_under_sanitised_name() {
        let mock = MockTransport::new(subject());
        let mut document = doc("l", DocumentType::License, VerificationStatus::Pending);
        document.file_name = "../state license".into();
        mock.seed_document(document.clone(), b"%PDF-1.7 body".to_vec());
        let wf = workflow(&mock);
        let dir = tempfile::tempdir().unwrap();

        let path = wf.download(&document, Some(dir.path())).await.unwrap();

        assert_eq!(path, dir.path().join("state_license.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 body");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn view_opens_preview_for_registry_document() {
        let document = doc("l", DocumentType::License, VerificationStatus::Pending);
        let mock = MockTransport::new(subject());
        mock.seed_document(document.clone(), b"%PDF".to_vec());
        let wf = workflow(&mock);
        let registry = registry_with(vec![document]);
        let mut viewer = PreviewViewer::new(MemoryBlobStore::new());

        let resolution = wf
            .view(&registry, &mut viewer, &DocumentId::new("l"))
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Displayed);
        assert_eq!(viewer.store().live_count(), 1);

        let err = wf
            .view(&registry, &mut viewer, &DocumentId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DocumentNotFound(_)));
    }
}

//! Document preview viewer.
//!
//! At most one preview handle is live per viewer. Opening a document hands out
//! a `PreviewRequest` ticket; only the ticket from the latest `open` may fill
//! the viewer, so a slow fetch for an earlier document cannot overwrite a newer
//! one. The handle is released on close, on replacement and on drop.

use serde::Serialize;
use thiserror::Error;

use crate::blob::{BlobRef, BlobStore};
use crate::models::{Document, DocumentId, MediaType};
use crate::transport::{DocumentTransport, TransportError};

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Could not fetch document: {0}")]
    Transport(#[from] TransportError),

    #[error("Could not store preview: {0}")]
    Blob(#[from] std::io::Error),
}

/// How the presentation layer should render a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    EmbeddedFrame,
    InlineImage,
    DownloadOnly,
}

impl PreviewKind {
    pub fn for_media(media: Option<MediaType>) -> Self {
        match media {
            Some(MediaType::Pdf) => Self::EmbeddedFrame,
            Some(m) if m.is_image() => Self::InlineImage,
            _ => Self::DownloadOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewHandle {
    pub document_id: DocumentId,
    pub file_name: String,
    pub resource: BlobRef,
    pub kind: PreviewKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PreviewState {
    Closed,
    Loading { document_id: DocumentId },
    Loaded(PreviewHandle),
}

/// Ticket for one pending preview fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    pub document_id: DocumentId,
    pub file_name: String,
    pub media: Option<MediaType>,
    generation: u64,
}

/// What `resolve` did with a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Displayed,
    /// The ticket was superseded; the result was dropped.
    Discarded,
}

pub struct PreviewViewer<S: BlobStore> {
    store: S,
    state: PreviewState,
    generation: u64,
}

impl<S: BlobStore> PreviewViewer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: PreviewState::Closed,
            generation: 0,
        }
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    pub fn handle(&self) -> Option<&PreviewHandle> {
        match &self.state {
            PreviewState::Loaded(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, PreviewState::Closed)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Start previewing `document`. Any live handle is released first.
    pub fn open(&mut self, document: &Document) -> PreviewRequest {
        self.release();
        self.generation += 1;
        self.state = PreviewState::Loading {
            document_id: document.id.clone(),
        };
        tracing::debug!(
            document_id = %document.id,
            generation = self.generation,
            "Preview opened"
        );
        PreviewRequest {
            document_id: document.id.clone(),
            file_name: document.file_name.clone(),
            media: document.mime_type,
            generation: self.generation,
        }
    }

    /// Apply a fetch result for `request`. Results for superseded tickets are
    /// dropped without acquiring anything. A failed fetch closes the viewer.
    pub fn resolve(
        &mut self,
        request: PreviewRequest,
        fetched: Result<Vec<u8>, TransportError>,
    ) -> Result<Resolution, PreviewError> {
        let current = request.generation == self.generation
            && matches!(&self.state, PreviewState::Loading { document_id } if *document_id == request.document_id);
        if !current {
            tracing::debug!(
                document_id = %request.document_id,
                generation = request.generation,
                "Discarding stale preview result"
            );
            return Ok(Resolution::Discarded);
        }

        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(document_id = %request.document_id, error = %e, "Preview fetch failed");
                self.release();
                return Err(e.into());
            }
        };

        let media = request.media.or_else(|| MediaType::sniff(&bytes));
        let resource = match self.store.create(&bytes, media) {
            Ok(resource) => resource,
            Err(e) => {
                self.release();
                return Err(e.into());
            }
        };

        let kind = PreviewKind::for_media(media);
        tracing::info!(
            document_id = %request.document_id,
            kind = ?kind,
            size = bytes.len(),
            "Preview loaded"
        );
        self.state = PreviewState::Loaded(PreviewHandle {
            document_id: request.document_id,
            file_name: request.file_name,
            resource,
            kind,
        });
        Ok(Resolution::Displayed)
    }

    /// Open, fetch and resolve in one go.
    pub async fn load<T: DocumentTransport>(
        &mut self,
        transport: &T,
        document: &Document,
    ) -> Result<Resolution, PreviewError> {
        let request = self.open(document);
        let fetched = transport.view_document(&document.id).await;
        self.resolve(request, fetched)
    }

    /// Release the live handle, if any. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.release();
        self.generation += 1;
    }

    fn release(&mut self) {
        let previous = std::mem::replace(&mut self.state, PreviewState::Closed);
        if let PreviewState::Loaded(handle) = previous {
            if !self.store.revoke(&handle.resource) {
                tracing::warn!(resource = %handle.resource, "Preview resource was already released");
            }
        }
    }
}

impl<S: BlobStore> Drop for PreviewViewer<S> {
    fn drop(&mut self) {
        self.release();
    }
}

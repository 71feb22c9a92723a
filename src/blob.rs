//! Local handles for fetched document bytes.
//!
//! A preview needs the bytes somewhere a renderer can point at. Every handle
//! created here must be revoked exactly once; the viewer owns that duty.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::models::MediaType;

/// Opaque reference to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait BlobStore {
    fn create(&mut self, bytes: &[u8], media: Option<MediaType>) -> std::io::Result<BlobRef>;

    /// Release a handle. Returns false if it was unknown or already released.
    fn revoke(&mut self, blob: &BlobRef) -> bool;

    /// Handles created and not yet revoked.
    fn live_count(&self) -> usize;
}

impl<S: BlobStore + ?Sized> BlobStore for &mut S {
    fn create(&mut self, bytes: &[u8], media: Option<MediaType>) -> std::io::Result<BlobRef> {
        (**self).create(bytes, media)
    }

    fn revoke(&mut self, blob: &BlobRef) -> bool {
        (**self).revoke(blob)
    }

    fn live_count(&self) -> usize {
        (**self).live_count()
    }
}

/// Writes each blob to a file in a private temporary directory. The
/// directory and anything left in it go away when the store is dropped.
pub struct TempDirBlobStore {
    dir: tempfile::TempDir,
    live: HashMap<BlobRef, PathBuf>,
}

impl TempDirBlobStore {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("medconsult-preview-").tempdir()?,
            live: HashMap::new(),
        })
    }

    pub fn path_of(&self, blob: &BlobRef) -> Option<&Path> {
        self.live.get(blob).map(PathBuf::as_path)
    }
}

impl BlobStore for TempDirBlobStore {
    fn create(&mut self, bytes: &[u8], media: Option<MediaType>) -> std::io::Result<BlobRef> {
        let suffix = media
            .map(|m| format!(".{}", m.extension()))
            .unwrap_or_else(|| ".bin".into());
        let mut file = tempfile::Builder::new()
            .prefix("blob-")
            .suffix(&suffix)
            .tempfile_in(self.dir.path())?;
        file.write_all(bytes)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        let blob = BlobRef(format!("file://{}", path.display()));
        tracing::debug!(blob = %blob, size = bytes.len(), "Preview blob created");
        self.live.insert(blob.clone(), path);
        Ok(blob)
    }

    fn revoke(&mut self, blob: &BlobRef) -> bool {
        let Some(path) = self.live.remove(blob) else {
            return false;
        };
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(blob = %blob, error = %e, "Failed to remove preview blob");
        }
        true
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Keeps blobs in memory and counts revocations.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    next: u64,
    live: HashMap<BlobRef, Vec<u8>>,
    revoked: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked
    }

    pub fn bytes(&self, blob: &BlobRef) -> Option<&[u8]> {
        self.live.get(blob).map(Vec::as_slice)
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&mut self, bytes: &[u8], _media: Option<MediaType>) -> std::io::Result<BlobRef> {
        self.next += 1;
        let blob = BlobRef(format!("mem:{}", self.next));
        self.live.insert(blob.clone(), bytes.to_vec());
        Ok(blob)
    }

    fn revoke(&mut self, blob: &BlobRef) -> bool {
        if self.live.remove(blob).is_some() {
            self.revoked += 1;
            true
        } else {
            false
        }
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_blob_lifecycle() {
        let mut store = TempDirBlobStore::new().unwrap();
        let blob = store.create(b"%PDF-1.7", Some(MediaType::Pdf)).unwrap();

        let path = store.path_of(&blob).unwrap().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(store.live_count(), 1);

        assert!(store.revoke(&blob));
        assert!(!path.exists());
        assert!(!store.revoke(&blob));
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn memory_store_counts_each_revocation_once() {
        let mut store = MemoryBlobStore::new();
        let a = store.create(b"a", None).unwrap();
        let b = store.create(b"b", Some(MediaType::Png)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.bytes(&b), Some(&b"b"[..]));

        assert!(store.revoke(&a));
        assert!(!store.revoke(&a));
        assert_eq!(store.revoked_count(), 1);
        assert_eq!(store.live_count(), 1);
    }
}

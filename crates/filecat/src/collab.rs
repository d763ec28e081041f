//! Services the catalog hands work to but does not implement.
//!
//! Preview rendering, metadata extraction, notifications, similarity
//! fingerprints and archive listing all live elsewhere. The catalog only
//! enqueues requests (`PreviewQueue`, `MetadataQueue`, `Notifier`), stores what
//! comes back (`SimilaritySource` → `Catalog::set_fingerprints`) or passes a
//! listing through (`ContainerLister`).

use crate::catalog::{Catalog, Fingerprints};
use crate::error::{CatalogError, Result};
use crate::hashing::ContentHash;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    #[error("receiver is gone: {0}")]
    Closed(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Work handed to a preview or metadata worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub content_hash: ContentHash,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub rule: String,
    pub message: String,
    pub content_hash: ContentHash,
    pub path: String,
}

pub trait PreviewQueue: Send + Sync {
    fn request_preview(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError>;
}

pub trait MetadataQueue: Send + Sync {
    fn request_extraction(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError>;
}

/// Must not block: called from inside rule application.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> std::result::Result<(), CollabError>;
}

/// One member of an archive or disk image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEntry {
    /// Path inside the container
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Lists what a container blob holds. Containment is not stored in the catalog.
pub trait ContainerLister: Send + Sync {
    fn list_entries(&self, content_hash: &ContentHash) -> std::result::Result<Vec<ContainerEntry>, CollabError>;
}

/// Computes opaque similarity fingerprints for one file.
pub trait SimilaritySource: Send + Sync {
    fn fingerprints(
        &self,
        content_hash: &ContentHash,
        path: &str,
    ) -> std::result::Result<Option<Fingerprints>, CollabError>;
}

// ============================================================================
// Implementations
// ============================================================================

/// Logs each request and drops it. The default when nothing is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCollaborator;

impl PreviewQueue for LogCollaborator {
    fn request_preview(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError> {
        info!(%content_hash, path, "Preview requested");
        Ok(())
    }
}

impl MetadataQueue for LogCollaborator {
    fn request_extraction(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError> {
        info!(%content_hash, path, "Metadata extraction requested");
        Ok(())
    }
}

impl ContainerLister for LogCollaborator {
    fn list_entries(&self, content_hash: &ContentHash) -> std::result::Result<Vec<ContainerEntry>, CollabError> {
        info!(%content_hash, "Container listing requested, no lister configured");
        Ok(Vec::new())
    }
}

impl Notifier for LogCollaborator {
    fn notify(&self, notification: Notification) -> std::result::Result<(), CollabError> {
        info!(
            rule = %notification.rule,
            path = %notification.path,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Forwards preview or metadata requests over an mpsc channel to a worker thread.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: Sender<WorkRequest>,
}

impl ChannelQueue {
    pub fn new(tx: Sender<WorkRequest>) -> Self {
        Self { tx }
    }

    fn send(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError> {
        self.tx
            .send(WorkRequest {
                content_hash: content_hash.clone(),
                path: path.to_string(),
            })
            .map_err(|e| CollabError::Closed(e.to_string()))
    }
}

impl PreviewQueue for ChannelQueue {
    fn request_preview(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError> {
        self.send(content_hash, path)
    }
}

impl MetadataQueue for ChannelQueue {
    fn request_extraction(&self, content_hash: &ContentHash, path: &str) -> std::result::Result<(), CollabError> {
        self.send(content_hash, path)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> std::result::Result<(), CollabError> {
        self.tx
            .send(notification)
            .map_err(|e| CollabError::Closed(e.to_string()))
    }
}

/// The collaborators rule actions talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub preview: Arc<dyn PreviewQueue>,
    pub metadata: Arc<dyn MetadataQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub containers: Arc<dyn ContainerLister>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            preview: Arc::new(LogCollaborator),
            metadata: Arc::new(LogCollaborator),
            notifier: Arc::new(LogCollaborator),
            containers: Arc::new(LogCollaborator),
        }
    }
}

impl Collaborators {
    pub fn with_preview(mut self, preview: Arc<dyn PreviewQueue>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataQueue>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_containers(mut self, containers: Arc<dyn ContainerLister>) -> Self {
        self.containers = containers;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Ask `source` for a blob's fingerprints and store whatever it returns.
///
/// Returns `false` when the source had nothing for this content.
pub fn refresh_fingerprints(
    catalog: &Catalog,
    source: &dyn SimilaritySource,
    content_hash: &ContentHash,
) -> Result<bool> {
    let entry = catalog
        .entry_for_content_hash(content_hash)?
        .ok_or_else(|| CatalogError::not_found(format!("available asset for {}", content_hash)))?;

    let prints = source
        .fingerprints(content_hash, &entry.full_path)
        .map_err(|e| CatalogError::invalid_state(format!("similarity source failed: {}", e)))?;

    match prints {
        Some(prints) => {
            catalog.set_fingerprints(content_hash, &prints)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Members of a catalogued container blob, as reported by `lister`.
pub fn list_container(
    catalog: &Catalog,
    lister: &dyn ContainerLister,
    content_hash: &ContentHash,
) -> Result<Vec<ContainerEntry>> {
    if catalog.get_blob(content_hash)?.is_none() {
        return Err(CatalogError::not_found(format!("blob {}", content_hash)));
    }
    lister
        .list_entries(content_hash)
        .map_err(|e| CatalogError::invalid_state(format!("container lister failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AssetLocation, NewBlob};
    use crate::hashing::{fast_probe, full_hash};
    use std::io::Cursor;
    use std::sync::mpsc;

    struct FixedSource(Option<Fingerprints>);

    impl SimilaritySource for FixedSource {
        fn fingerprints(
            &self,
            _content_hash: &ContentHash,
            _path: &str,
        ) -> std::result::Result<Option<Fingerprints>, CollabError> {
            Ok(self.0.clone())
        }
    }

    struct FixedLister(Vec<ContainerEntry>);

    impl ContainerLister for FixedLister {
        fn list_entries(
            &self,
            _content_hash: &ContentHash,
        ) -> std::result::Result<Vec<ContainerEntry>, CollabError> {
            Ok(self.0.clone())
        }
    }

    fn seeded() -> (Catalog, ContentHash) {
        let catalog = Catalog::open_in_memory().unwrap();
        let bytes = b"similar".to_vec();
        let size = bytes.len() as u64;
        let blob = NewBlob {
            content_hash: full_hash(&mut Cursor::new(bytes.clone()), size, None).unwrap(),
            fast_hash: fast_probe(&mut Cursor::new(bytes), size).unwrap(),
            size,
            mime: None,
            primary_type: None,
        };
        catalog
            .record_observation(&blob, &AssetLocation::new("/s/pic.png"))
            .unwrap();
        (catalog, blob.content_hash)
    }

    #[test]
    fn channel_queue_forwards_requests() {
        let (tx, rx) = mpsc::channel();
        let queue = ChannelQueue::new(tx);
        let hash: ContentHash = "a".repeat(64).parse().unwrap();
        queue.request_preview(&hash, "/x.png").unwrap();

        let got = rx.recv().unwrap();
        assert_eq!(got.path, "/x.png");
        assert_eq!(got.content_hash, hash);
    }

    #[test]
    fn closed_channel_is_an_error() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let notifier = ChannelNotifier::new(tx);
        let err = notifier
            .notify(Notification {
                rule: "r".into(),
                message: "m".into(),
                content_hash: "b".repeat(64).parse().unwrap(),
                path: "/p".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CollabError::Closed(_)));
    }

    #[test]
    fn fingerprints_are_stored_on_the_blob() {
        let (catalog, hash) = seeded();
        let source = FixedSource(Some(Fingerprints {
            phash: Some("8f8f".into()),
            ..Fingerprints::default()
        }));
        assert!(refresh_fingerprints(&catalog, &source, &hash).unwrap());
        let blob = catalog.get_blob(&hash).unwrap().unwrap();
        assert_eq!(blob.fingerprints.phash.as_deref(), Some("8f8f"));

        assert!(!refresh_fingerprints(&catalog, &FixedSource(None), &hash).unwrap());
    }

    #[test]
    fn container_listing_passes_through() {
        let (catalog, hash) = seeded();
        let lister = FixedLister(vec![ContainerEntry {
            path: "docs/readme.txt".into(),
            size: 42,
            meta: serde_json::json!({"compressed": 17}),
        }]);
        let entries = list_container(&catalog, &lister, &hash).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "docs/readme.txt");

        let defaults = Collaborators::default();
        assert!(list_container(&catalog, defaults.containers.as_ref(), &hash)
            .unwrap()
            .is_empty());

        let unknown: ContentHash = "c".repeat(64).parse().unwrap();
        assert!(matches!(
            list_container(&catalog, &lister, &unknown),
            Err(CatalogError::NotFound(_))
        ));
    }
}

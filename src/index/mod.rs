//! The content index: a versioned catalogue over raw storage.
//!
//! The index is the authoritative existence oracle. Every stored resource
//! instance has exactly one index document, and `get` consults the index
//! before touching storage. The index can always be rebuilt from scratch
//! by re-reading every stored resource through its serializer.

pub mod engine;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Resource, ResourceUri, Version};
use crate::error::IndexError;
use crate::serializer::SerializerRegistry;

pub use engine::{IndexDocument, JsonSearchEngine, SearchEngine, INDEX_VERSION};

/// Versioned catalogue of resource existence, type, path and revisions.
///
/// Owned exclusively by a single repository instance; the serializer
/// registry is injected at construction.
pub struct ContentIndex {
    engine: Box<dyn SearchEngine>,
    serializers: Arc<SerializerRegistry>,
}

impl ContentIndex {
    pub fn new(engine: Box<dyn SearchEngine>, serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            engine,
            serializers,
        }
    }

    /// Open a JSON-backed index in the given directory.
    pub async fn open(
        dir: impl Into<std::path::PathBuf>,
        serializers: Arc<SerializerRegistry>,
    ) -> Result<Self, IndexError> {
        let engine = JsonSearchEngine::open(dir).await?;
        Ok(Self::new(Box::new(engine), serializers))
    }

    /// The document for an exact (identifier, version) slot
    pub async fn document(
        &self,
        identifier: Uuid,
        version: Version,
    ) -> Result<Option<IndexDocument>, IndexError> {
        self.engine.get(identifier, version).await
    }

    /// Whether the exact (identifier, version) instance exists
    pub async fn exists(&self, uri: &ResourceUri) -> Result<bool, IndexError> {
        Ok(self
            .engine
            .get(uri.identifier(), uri.version())
            .await?
            .is_some())
    }

    /// Whether any version of the identifier exists
    pub async fn exists_in_any_version(&self, uri: &ResourceUri) -> Result<bool, IndexError> {
        let identifier = uri.identifier();
        Ok(self
            .engine
            .documents()
            .await?
            .iter()
            .any(|d| d.identifier == identifier))
    }

    /// The indexed type of the resource, if known
    pub async fn get_type(&self, uri: &ResourceUri) -> Result<Option<String>, IndexError> {
        Ok(self
            .engine
            .get(uri.identifier(), uri.version())
            .await?
            .map(|d| d.resource_type))
    }

    /// The indexed path of the resource, if any
    pub async fn get_path(&self, uri: &ResourceUri) -> Result<Option<String>, IndexError> {
        Ok(self
            .engine
            .get(uri.identifier(), uri.version())
            .await?
            .and_then(|d| d.path))
    }

    /// Resolve the identifier of the live resource published at the uri's
    /// path.
    pub async fn get_identifier(&self, uri: &ResourceUri) -> Result<Option<Uuid>, IndexError> {
        let Some(path) = uri.path() else {
            return Ok(None);
        };
        Ok(self
            .engine
            .documents()
            .await?
            .iter()
            .find(|d| d.version.is_live() && d.path.as_deref() == Some(path))
            .map(|d| d.identifier))
    }

    /// All known versions of the identifier, sorted
    pub async fn get_revisions(&self, uri: &ResourceUri) -> Result<Vec<Version>, IndexError> {
        let identifier = uri.identifier();
        let mut revisions: Vec<Version> = self
            .engine
            .documents()
            .await?
            .iter()
            .filter(|d| d.identifier == identifier)
            .map(|d| d.version)
            .collect();
        revisions.sort();
        Ok(revisions)
    }

    /// Index a new (identifier, version) instance.
    ///
    /// Enforces live path uniqueness: adding a live resource at a path
    /// already published by a different identifier is rejected.
    pub async fn add(&self, resource: &Resource) -> Result<(), IndexError> {
        let doc = self.document_for(resource)?;
        if doc.version.is_live() {
            if let Some(path) = doc.path.as_deref() {
                let conflict = self.engine.documents().await?.into_iter().any(|d| {
                    d.version.is_live()
                        && d.identifier != doc.identifier
                        && d.path.as_deref() == Some(path)
                });
                if conflict {
                    return Err(IndexError::PathConflict(path.to_string()));
                }
            }
        }
        self.engine.put(doc).await
    }

    /// Refresh the document of an existing instance
    pub async fn update(&self, resource: &Resource) -> Result<(), IndexError> {
        if self
            .engine
            .get(resource.identifier(), resource.version())
            .await?
            .is_none()
        {
            debug!(
                "Updating index entry for {} which was not indexed before",
                resource.uri()
            );
        }
        let doc = self.document_for(resource)?;
        self.engine.put(doc).await
    }

    /// Remove the (identifier, version) instance
    pub async fn delete(&self, uri: &ResourceUri) -> Result<bool, IndexError> {
        self.engine.remove(uri.identifier(), uri.version()).await
    }

    /// Record the move of one version from its current path to a new one.
    ///
    /// The uri is expected to carry the old path; callers invoke this once
    /// per revision so the path stays identical across all revisions of an
    /// identifier.
    pub async fn move_to(&self, uri: &ResourceUri, new_path: &str) -> Result<(), IndexError> {
        let Some(mut doc) = self.engine.get(uri.identifier(), uri.version()).await? else {
            warn!("Cannot move unknown resource {}", uri);
            return Ok(());
        };
        debug!(
            "Moving {} from {} to {}",
            uri.identifier(),
            uri.path().unwrap_or("<none>"),
            new_path
        );
        doc.path = Some(new_path.to_string());
        if let Some(source) = doc.source.take() {
            // Keep the cached snapshot consistent with the new path
            let repathed = self.repath_source(&doc, &source, new_path);
            doc.source = repathed;
        }
        self.engine.put(doc).await
    }

    /// Cached serialized snapshot for the read fast path. Snapshots are
    /// kept for live and work versions; numeric revisions fall back to
    /// storage.
    pub async fn cached_document(
        &self,
        identifier: Uuid,
        version: Version,
    ) -> Result<Option<String>, IndexError> {
        Ok(self
            .engine
            .get(identifier, version)
            .await?
            .and_then(|d| d.source))
    }

    /// Live documents carrying the given property value
    pub async fn find_live_by_property(
        &self,
        name: &str,
        value: &str,
    ) -> Result<Vec<IndexDocument>, IndexError> {
        Ok(self
            .engine
            .documents()
            .await?
            .into_iter()
            .filter(|d| {
                d.version.is_live()
                    && d.property(name)
                        .map(|values| values.iter().any(|v| v == value))
                        .unwrap_or(false)
            })
            .collect())
    }

    /// Live documents whose path starts with the given prefix.
    ///
    /// This is a raw string prefix: a prefix of `/a` also matches `/ab/c`.
    /// Kept for compatibility with the original behavior; likely a bug
    /// rather than a contract.
    pub async fn find_live_by_path_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<IndexDocument>, IndexError> {
        Ok(self
            .engine
            .documents()
            .await?
            .into_iter()
            .filter(|d| {
                d.version.is_live()
                    && d.path
                        .as_deref()
                        .map(|p| p.starts_with(prefix))
                        .unwrap_or(false)
            })
            .collect())
    }

    /// All known uris in stable enumeration order
    pub async fn enumerate(&self) -> Result<Vec<ResourceUri>, IndexError> {
        Ok(self
            .engine
            .documents()
            .await?
            .iter()
            .map(IndexDocument::uri)
            .collect())
    }

    /// Number of distinct resources
    pub async fn resource_count(&self) -> Result<u64, IndexError> {
        let documents = self.engine.documents().await?;
        let mut identifiers: Vec<Uuid> = documents.iter().map(|d| d.identifier).collect();
        identifiers.sort();
        identifiers.dedup();
        Ok(identifiers.len() as u64)
    }

    /// Number of stored resource instances across all revisions
    pub async fn revision_count(&self) -> Result<u64, IndexError> {
        Ok(self.engine.documents().await?.len() as u64)
    }

    /// Schema version of the on-disk index
    pub fn index_version(&self) -> u32 {
        self.engine.stored_version()
    }

    /// Drop all documents
    pub async fn clear(&self) -> Result<(), IndexError> {
        self.engine.clear().await
    }

    pub async fn close(&self) -> Result<(), IndexError> {
        self.engine.close().await
    }

    fn document_for(&self, resource: &Resource) -> Result<IndexDocument, IndexError> {
        let serializer = self
            .serializers
            .by_type(resource.type_name())
            .ok_or_else(|| IndexError::NoSerializer(resource.type_name().to_string()))?;
        let metadata = serializer.to_metadata(resource);

        // Snapshots for numeric revisions are not cached; the read path
        // falls back to storage for those.
        let source = match resource.version() {
            Version::Live | Version::Work => Some(serializer.serialize(resource)?),
            Version::Revision(_) => None,
        };

        Ok(IndexDocument {
            site: resource.uri().site().to_string(),
            resource_type: resource.type_name().to_string(),
            identifier: resource.identifier(),
            version: resource.version(),
            path: resource.uri().path().map(str::to_string),
            subjects: metadata.subjects,
            properties: metadata.properties,
            source,
        })
    }

    fn repath_source(
        &self,
        doc: &IndexDocument,
        source: &str,
        new_path: &str,
    ) -> Option<String> {
        let serializer = self.serializers.by_type(&doc.resource_type)?;
        let mut resource = serializer.read(source.as_bytes()).ok()?;
        resource.set_path(Some(new_path.to_string()));
        serializer.serialize(&resource).ok()
    }
}

//! Resource serializers and their registry.
//!
//! A serializer is the per-type codec: it deserializes stored documents,
//! produces index metadata, reconstitutes resources from index fields and
//! knows which preview generator applies to a resource.

pub mod file;
pub mod image;
pub mod movie;
pub mod page;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::domain::{Language, Resource, ResourceContent, ResourceUri};
use crate::error::RepositoryError;
use crate::index::IndexDocument;
use crate::preview::generator::PreviewGenerator;

pub use file::FileSerializer;
pub use image::ImageSerializer;
pub use movie::MovieSerializer;
pub use page::PageSerializer;

/// Index fields extracted from a resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceMetadata {
    pub subjects: Vec<String>,
    pub properties: BTreeMap<String, Vec<String>>,
}

/// A search result entry derived from an index document.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub uri: ResourceUri,
    pub resource_type: String,
    pub subjects: Vec<String>,
}

/// Per-type codec for resources.
pub trait ResourceSerializer: Send + Sync {
    /// The type tag this serializer handles
    fn type_name(&self) -> &'static str;

    /// Whether content of the given MIME type belongs to this type
    fn supports_mime(&self, mimetype: &str) -> bool;

    /// Create an empty resource of this type in the given site
    fn new_resource(&self, site: &str) -> Resource;

    /// Deserialize a stored document
    fn read(&self, bytes: &[u8]) -> Result<Resource, RepositoryError>;

    /// Serialize a resource into its stored document form
    fn serialize(&self, resource: &Resource) -> Result<String, serde_json::Error>;

    /// Extract the index fields for a resource
    fn to_metadata(&self, resource: &Resource) -> ResourceMetadata;

    /// Reconstitute a resource from index fields alone. The result carries
    /// no content entries; it is sufficient for identity-based work such
    /// as preview cleanup.
    fn from_metadata(&self, doc: &IndexDocument) -> Option<Resource>;

    /// Create a content entry for an upload, if this type accepts the
    /// MIME type. Serializers of content-less types return `None`.
    fn new_content(
        &self,
        _language: &Language,
        _filename: &str,
        _mimetype: &str,
    ) -> Option<ResourceContent> {
        None
    }

    /// Map an index document to a search result entry
    fn to_search_hit(&self, doc: &IndexDocument) -> SearchHit {
        SearchHit {
            uri: doc.uri(),
            resource_type: doc.resource_type.clone(),
            subjects: doc.subjects.clone(),
        }
    }

    /// The preview generator applicable to the resource, if any
    fn preview_generator(&self, resource: &Resource) -> Option<Arc<dyn PreviewGenerator>>;

    /// A generator able to scale previews of the given output format.
    /// Only image serializers provide one.
    fn preview_generator_for_format(&self, _format: &str) -> Option<Arc<dyn PreviewGenerator>> {
        None
    }
}

/// Deserialize a stored document, verifying the type tag.
pub(crate) fn read_resource(
    bytes: &[u8],
    expected_type: &str,
) -> Result<Resource, RepositoryError> {
    let resource: Resource = serde_json::from_slice(bytes)?;
    if resource.type_name() != expected_type {
        return Err(RepositoryError::State(format!(
            "document contains a {} resource, expected {}",
            resource.type_name(),
            expected_type
        )));
    }
    Ok(resource)
}

pub(crate) fn serialize_resource(resource: &Resource) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(resource)
}

/// Registry of serializers, looked up by type name or MIME type.
///
/// Constructor-injected wherever lookups are needed; there is no ambient
/// global registry.
pub struct SerializerRegistry {
    serializers: RwLock<Vec<Arc<dyn ResourceSerializer>>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self {
            serializers: RwLock::new(Vec::new()),
        }
    }

    /// Registry with the built-in page, image, movie and file serializers.
    ///
    /// The file serializer claims any MIME type, so it is registered last.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PageSerializer::new()));
        registry.register(Arc::new(ImageSerializer::new()));
        registry.register(Arc::new(MovieSerializer::new()));
        registry.register(Arc::new(FileSerializer::new()));
        registry
    }

    /// Register a serializer. Replacing an existing registration for the
    /// same type is allowed; the replacement keeps the original position.
    pub fn register(&self, serializer: Arc<dyn ResourceSerializer>) {
        let mut serializers = self.serializers.write().expect("registry lock poisoned");
        if let Some(existing) = serializers
            .iter_mut()
            .find(|s| s.type_name() == serializer.type_name())
        {
            warn!(
                "Replacing registered serializer for type '{}'",
                serializer.type_name()
            );
            *existing = serializer;
        } else {
            serializers.push(serializer);
        }
    }

    pub fn by_type(&self, type_name: &str) -> Option<Arc<dyn ResourceSerializer>> {
        let serializers = self.serializers.read().expect("registry lock poisoned");
        serializers
            .iter()
            .find(|s| s.type_name() == type_name)
            .cloned()
    }

    /// First registered serializer claiming the MIME type.
    ///
    /// When several serializers support a type, first-registered wins; the
    /// tie-break order is not otherwise specified.
    pub fn by_mime(&self, mimetype: &str) -> Option<Arc<dyn ResourceSerializer>> {
        let serializers = self.serializers.read().expect("registry lock poisoned");
        serializers
            .iter()
            .find(|s| s.supports_mime(mimetype))
            .cloned()
    }

    /// All registered type names, in registration order
    pub fn types(&self) -> Vec<String> {
        let serializers = self.serializers.read().expect("registry lock poisoned");
        serializers
            .iter()
            .map(|s| s.type_name().to_string())
            .collect()
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

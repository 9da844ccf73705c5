//! Serializer for page resources.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Resource, ResourceKind};
use crate::error::RepositoryError;
use crate::index::IndexDocument;
use crate::preview::generator::PreviewGenerator;

use super::{read_resource, serialize_resource, ResourceMetadata, ResourceSerializer};

/// Property under which a page records the resources it embeds. The
/// referential-integrity check on delete queries this property.
pub const PROPERTY_RESOURCE_ID: &str = "resourceid";

pub struct PageSerializer;

impl PageSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PageSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSerializer for PageSerializer {
    fn type_name(&self) -> &'static str {
        "page"
    }

    fn supports_mime(&self, mimetype: &str) -> bool {
        mimetype == "text/html"
    }

    fn new_resource(&self, site: &str) -> Resource {
        Resource::new(
            site,
            ResourceKind::Page {
                template: "default".to_string(),
                references: Vec::new(),
            },
        )
    }

    fn read(&self, bytes: &[u8]) -> Result<Resource, RepositoryError> {
        read_resource(bytes, self.type_name())
    }

    fn serialize(&self, resource: &Resource) -> Result<String, serde_json::Error> {
        serialize_resource(resource)
    }

    fn to_metadata(&self, resource: &Resource) -> ResourceMetadata {
        let mut metadata = ResourceMetadata {
            subjects: resource.subjects().to_vec(),
            ..Default::default()
        };
        if let ResourceKind::Page {
            template,
            references,
        } = resource.kind()
        {
            metadata
                .properties
                .insert("template".to_string(), vec![template.clone()]);
            if !references.is_empty() {
                metadata.properties.insert(
                    PROPERTY_RESOURCE_ID.to_string(),
                    references.iter().map(|r| r.to_string()).collect(),
                );
            }
        }
        metadata
    }

    fn from_metadata(&self, doc: &IndexDocument) -> Option<Resource> {
        if doc.resource_type != self.type_name() {
            return None;
        }
        let template = doc
            .property("template")
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let references = doc
            .property(PROPERTY_RESOURCE_ID)
            .map(|values| values.iter().filter_map(|v| v.parse().ok()).collect())
            .unwrap_or_default();
        let mut resource = Resource::with_uri(
            doc.uri(),
            ResourceKind::Page {
                template,
                references,
            },
        );
        resource.set_subjects(doc.subjects.clone());
        Some(resource)
    }

    fn preview_generator(&self, _resource: &Resource) -> Option<Arc<dyn PreviewGenerator>> {
        // Page previews would require template rendering
        None
    }
}

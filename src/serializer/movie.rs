//! Serializer for movie resources.

use std::sync::Arc;

use crate::domain::{Resource, ResourceKind};
use crate::error::RepositoryError;
use crate::index::IndexDocument;
use crate::preview::generator::PreviewGenerator;

use super::{read_resource, serialize_resource, ResourceMetadata, ResourceSerializer};

pub struct MovieSerializer;

impl MovieSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MovieSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSerializer for MovieSerializer {
    fn type_name(&self) -> &'static str {
        "movie"
    }

    fn supports_mime(&self, mimetype: &str) -> bool {
        mimetype.starts_with("video/")
    }

    fn new_resource(&self, site: &str) -> Resource {
        Resource::new(
            site,
            ResourceKind::Movie {
                width: 0,
                height: 0,
                duration_ms: 0,
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
        if let ResourceKind::Movie {
            width,
            height,
            duration_ms,
        } = resource.kind()
        {
            metadata
                .properties
                .insert("width".to_string(), vec![width.to_string()]);
            metadata
                .properties
                .insert("height".to_string(), vec![height.to_string()]);
            metadata
                .properties
                .insert("duration".to_string(), vec![duration_ms.to_string()]);
        }
        metadata
    }

    fn from_metadata(&self, doc: &IndexDocument) -> Option<Resource> {
        if doc.resource_type != self.type_name() {
            return None;
        }
        let number = |name: &str| -> u64 {
            doc.property(name)
                .and_then(|v| v.first())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let mut resource = Resource::with_uri(
            doc.uri(),
            ResourceKind::Movie {
                width: number("width") as u32,
                height: number("height") as u32,
                duration_ms: number("duration"),
            },
        );
        resource.set_subjects(doc.subjects.clone());
        Some(resource)
    }

    fn preview_generator(&self, _resource: &Resource) -> Option<Arc<dyn PreviewGenerator>> {
        // Frame extraction would require a video codec
        None
    }
}

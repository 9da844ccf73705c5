//! Serializer for image resources.

use std::sync::Arc;

use crate::domain::{Language, Resource, ResourceContent, ResourceKind};
use crate::error::RepositoryError;
use crate::index::IndexDocument;
use crate::preview::generator::{ImagePreviewGenerator, PreviewGenerator};

use super::{read_resource, serialize_resource, ResourceMetadata, ResourceSerializer};

/// Output formats the image preview generator can encode.
const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

pub struct ImageSerializer {
    generator: Arc<ImagePreviewGenerator>,
}

impl ImageSerializer {
    pub fn new() -> Self {
        Self {
            generator: Arc::new(ImagePreviewGenerator::new()),
        }
    }
}

impl Default for ImageSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSerializer for ImageSerializer {
    fn type_name(&self) -> &'static str {
        "image"
    }

    fn supports_mime(&self, mimetype: &str) -> bool {
        mimetype.starts_with("image/")
    }

    fn new_resource(&self, site: &str) -> Resource {
        Resource::new(
            site,
            ResourceKind::Image {
                width: 0,
                height: 0,
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
        if let ResourceKind::Image { width, height } = resource.kind() {
            metadata
                .properties
                .insert("width".to_string(), vec![width.to_string()]);
            metadata
                .properties
                .insert("height".to_string(), vec![height.to_string()]);
        }
        metadata
    }

    fn from_metadata(&self, doc: &IndexDocument) -> Option<Resource> {
        if doc.resource_type != self.type_name() {
            return None;
        }
        let dimension = |name: &str| -> u32 {
            doc.property(name)
                .and_then(|v| v.first())
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0)
        };
        let mut resource = Resource::with_uri(
            doc.uri(),
            ResourceKind::Image {
                width: dimension("width"),
                height: dimension("height"),
            },
        );
        resource.set_subjects(doc.subjects.clone());
        Some(resource)
    }

    fn new_content(
        &self,
        language: &Language,
        filename: &str,
        mimetype: &str,
    ) -> Option<ResourceContent> {
        if !self.supports_mime(mimetype) {
            return None;
        }
        Some(ResourceContent::new(language.clone(), mimetype, filename))
    }

    fn preview_generator(&self, _resource: &Resource) -> Option<Arc<dyn PreviewGenerator>> {
        Some(self.generator.clone())
    }

    fn preview_generator_for_format(&self, format: &str) -> Option<Arc<dyn PreviewGenerator>> {
        if SUPPORTED_FORMATS.contains(&format.to_ascii_lowercase().as_str()) {
            Some(self.generator.clone())
        } else {
            None
        }
    }
}

//! Serializer for generic file resources.
//!
//! Files are the fallback type for arbitrary uploads. When a file's
//! content happens to be an image, previews are generated through the
//! image preview generator.

use std::sync::Arc;

use crate::domain::{Language, Resource, ResourceContent, ResourceKind};
use crate::error::RepositoryError;
use crate::index::IndexDocument;
use crate::preview::generator::{ImagePreviewGenerator, PreviewGenerator};

use super::{read_resource, serialize_resource, ResourceMetadata, ResourceSerializer};

pub struct FileSerializer {
    image_generator: Arc<ImagePreviewGenerator>,
}

impl FileSerializer {
    pub fn new() -> Self {
        Self {
            image_generator: Arc::new(ImagePreviewGenerator::new()),
        }
    }
}

impl Default for FileSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSerializer for FileSerializer {
    fn type_name(&self) -> &'static str {
        "file"
    }

    fn supports_mime(&self, _mimetype: &str) -> bool {
        // Catch-all; registered last so specific serializers win
        true
    }

    fn new_resource(&self, site: &str) -> Resource {
        Resource::new(site, ResourceKind::File)
    }

    fn read(&self, bytes: &[u8]) -> Result<Resource, RepositoryError> {
        read_resource(bytes, self.type_name())
    }

    fn serialize(&self, resource: &Resource) -> Result<String, serde_json::Error> {
        serialize_resource(resource)
    }

    fn to_metadata(&self, resource: &Resource) -> ResourceMetadata {
        ResourceMetadata {
            subjects: resource.subjects().to_vec(),
            ..Default::default()
        }
    }

    fn from_metadata(&self, doc: &IndexDocument) -> Option<Resource> {
        if doc.resource_type != self.type_name() {
            return None;
        }
        let mut resource = Resource::with_uri(doc.uri(), ResourceKind::File);
        resource.set_subjects(doc.subjects.clone());
        Some(resource)
    }

    fn new_content(
        &self,
        language: &Language,
        filename: &str,
        mimetype: &str,
    ) -> Option<ResourceContent> {
        Some(ResourceContent::new(language.clone(), mimetype, filename))
    }

    fn preview_generator(&self, resource: &Resource) -> Option<Arc<dyn PreviewGenerator>> {
        let has_image_content = resource
            .contents()
            .any(|c| c.mimetype.starts_with("image/"));
        if has_image_content {
            Some(self.image_generator.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceContent;

    #[test]
    fn test_image_content_enables_previews() {
        let serializer = FileSerializer::new();

        let mut with_image = serializer.new_resource("main");
        with_image.add_content(ResourceContent::new("en", "image/jpeg", "scan.jpg"));
        assert!(serializer.preview_generator(&with_image).is_some());

        let mut plain = serializer.new_resource("main");
        plain.add_content(ResourceContent::new("en", "application/pdf", "doc.pdf"));
        assert!(serializer.preview_generator(&plain).is_none());
    }
}

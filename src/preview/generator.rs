//! Preview generators turning resource content into derived images.

use std::io::{Cursor, Read, Write};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

use crate::domain::{Environment, ImageStyle, Language, Resource};
use crate::error::PreviewError;

/// Renders a preview for one (resource, language, style) combination.
///
/// Implementations are synchronous; callers run them off the async
/// executor when the work is CPU-bound.
pub trait PreviewGenerator: Send + Sync {
    /// Whether this generator can handle the resource's content in the
    /// given language
    fn supports(&self, resource: &Resource, language: &Language) -> bool;

    /// File suffix of generated previews
    fn suffix(&self, format: &str) -> String {
        format.to_ascii_lowercase()
    }

    /// Render the content from `input` into `output`, applying the style
    fn create_preview(
        &self,
        resource: &Resource,
        environment: Environment,
        language: &Language,
        style: &ImageStyle,
        format: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), PreviewError>;
}

/// Preview generator for raster images.
///
/// Decodes the content, applies the style's scaling mode and re-encodes
/// into the requested output format.
#[derive(Debug, Default)]
pub struct ImagePreviewGenerator;

impl ImagePreviewGenerator {
    pub fn new() -> Self {
        Self
    }

    fn apply_style(image: DynamicImage, style: &ImageStyle) -> DynamicImage {
        let (width, height) = image.dimensions();
        let (target_w, target_h) = style.scaled_dimensions(width, height);
        if (target_w, target_h) == (width, height) && !style.crops() {
            return image;
        }

        let rgba = image.to_rgba8();
        let resized = imageops::resize(&rgba, target_w, target_h, FilterType::Triangle);

        if style.crops() && style.width > 0 && style.height > 0 {
            let crop_w = style.width.min(target_w);
            let crop_h = style.height.min(target_h);
            let x = (target_w - crop_w) / 2;
            let y = (target_h - crop_h) / 2;
            let cropped = imageops::crop_imm(&resized, x, y, crop_w, crop_h).to_image();
            return DynamicImage::ImageRgba8(cropped);
        }

        DynamicImage::ImageRgba8(resized)
    }
}

impl PreviewGenerator for ImagePreviewGenerator {
    fn supports(&self, resource: &Resource, language: &Language) -> bool {
        resource
            .content(language)
            .map(|c| c.mimetype.starts_with("image/"))
            .unwrap_or(false)
    }

    fn create_preview(
        &self,
        resource: &Resource,
        _environment: Environment,
        language: &Language,
        style: &ImageStyle,
        format: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), PreviewError> {
        let image_format = ImageFormat::from_extension(format)
            .ok_or_else(|| PreviewError::UnsupportedFormat(format.to_string()))?;

        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;

        let image = image::load_from_memory(&bytes)?;
        let styled = Self::apply_style(image, style);
        debug!(
            "Rendered '{}' preview of {} in {}",
            style.identifier,
            resource.uri(),
            language
        );

        let mut encoded = Cursor::new(Vec::new());
        styled.write_to(&mut encoded, image_format)?;
        output.write_all(encoded.get_ref())?;
        Ok(())
    }
}

//! Filesystem layout of generated previews.
//!
//! Previews live below `<site>/images/`, sharded by identifier so no
//! single directory grows unbounded:
//!
//! ```text
//! <site>/images/<n1>/<n2>/<id>/<style>/<language>/<basename>-<style>.<format>
//! ```
//!
//! where `n1` is the identifier's first field modulo 100 and `n2` its
//! second field modulo 10. Style definitions are persisted beside each
//! style's language directories, plus one canonical copy per style under
//! `<site>/images/styles/`.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::domain::{ImageStyle, Language, Resource};

/// Name of the persisted style definition file.
pub const STYLE_DEFINITION_FILE: &str = "style.json";

/// Shard directories for an identifier
pub fn shard_segments(identifier: Uuid) -> (u64, u64) {
    let (first, second, _, _) = identifier.as_fields();
    ((first as u64) % 100, (second as u64) % 10)
}

/// Root of all preview images of a site
pub fn images_root(site_root: &Path) -> PathBuf {
    site_root.join("images")
}

/// Directory holding all previews of one resource
pub fn resource_images_dir(site_root: &Path, identifier: Uuid) -> PathBuf {
    let (n1, n2) = shard_segments(identifier);
    images_root(site_root)
        .join(n1.to_string())
        .join(n2.to_string())
        .join(identifier.to_string())
}

/// Directory holding one style's previews of one resource
pub fn style_dir(site_root: &Path, identifier: Uuid, style_id: &str) -> PathBuf {
    resource_images_dir(site_root, identifier).join(style_id)
}

/// Directory holding one style's previews in one language
pub fn preview_dir(
    site_root: &Path,
    identifier: Uuid,
    style_id: &str,
    language: &Language,
) -> PathBuf {
    style_dir(site_root, identifier, style_id).join(language.as_str())
}

/// Deterministic location of a preview file.
///
/// The basename is taken from the content's filename when present and
/// falls back to the resource identifier.
pub fn preview_file(
    site_root: &Path,
    resource: &Resource,
    language: &Language,
    style: &ImageStyle,
    format: &str,
) -> PathBuf {
    let basename = resource
        .content(language)
        .map(|c| {
            let name = c.filename.rsplit('/').next().unwrap_or(&c.filename);
            match name.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                _ => name.to_string(),
            }
        })
        .unwrap_or_else(|| resource.identifier().to_string());

    preview_dir(site_root, resource.identifier(), &style.identifier, language).join(format!(
        "{}-{}.{}",
        basename, style.identifier, format
    ))
}

/// Directory holding the canonical style definitions of a site
pub fn styles_root(site_root: &Path) -> PathBuf {
    images_root(site_root).join("styles")
}

/// Canonical persisted definition of a style, used for change detection
/// across repository restarts
pub fn canonical_style_file(site_root: &Path, style_id: &str) -> PathBuf {
    styles_root(site_root).join(format!("{}.json", style_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResourceContent, ResourceKind, ScalingMode};

    #[test]
    fn test_shard_segments_are_stable_and_bounded() {
        let id = Uuid::new_v4();
        let (n1, n2) = shard_segments(id);
        assert!(n1 < 100);
        assert!(n2 < 10);
        assert_eq!(shard_segments(id), (n1, n2));
    }

    #[test]
    fn test_preview_file_uses_content_basename() {
        let mut resource = Resource::new(
            "main",
            ResourceKind::Image {
                width: 10,
                height: 10,
            },
        );
        resource.add_content(ResourceContent::new("en", "image/png", "sunset.png"));
        let style = ImageStyle::new("thumbnail", 80, 80, ScalingMode::Crop);

        let path = preview_file(
            Path::new("/data/main"),
            &resource,
            &Language::from("en"),
            &style,
            "png",
        );

        let (n1, n2) = shard_segments(resource.identifier());
        let expected = PathBuf::from("/data/main/images")
            .join(n1.to_string())
            .join(n2.to_string())
            .join(resource.identifier().to_string())
            .join("thumbnail")
            .join("en")
            .join("sunset-thumbnail.png");
        assert_eq!(path, expected);
    }

    #[test]
    fn test_preview_file_falls_back_to_identifier() {
        let resource = Resource::new(
            "main",
            ResourceKind::Image {
                width: 10,
                height: 10,
            },
        );
        let style = ImageStyle::original();
        let path = preview_file(
            Path::new("/data/main"),
            &resource,
            &Language::from("en"),
            &style,
            "png",
        );
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(
            name,
            format!("{}-original.png", resource.identifier())
        );
    }
}

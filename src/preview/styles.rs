//! Persistence and change detection for image style definitions.
//!
//! Each rendered style directory carries a copy of the style definition
//! it was produced with; a canonical copy per style lives under
//! `<site>/images/styles/`. At connect time the canonical copies are
//! compared against the live style objects so outdated previews can be
//! dropped and re-rendered.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::domain::ImageStyle;
use crate::error::IndexError;

use super::paths;

/// Write the style definition into the given directory.
pub(crate) async fn persist_style_definition(
    dir: &Path,
    style: &ImageStyle,
) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    let json = serde_json::to_string_pretty(style)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    fs::write(dir.join(paths::STYLE_DEFINITION_FILE), json).await
}

/// Write the canonical definition used for change detection.
pub(crate) async fn persist_canonical_definition(
    site_root: &Path,
    style: &ImageStyle,
) -> std::io::Result<()> {
    let path = paths::canonical_style_file(site_root, &style.identifier);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(style)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    fs::write(path, json).await
}

/// Load the canonical persisted definition, if readable.
pub(crate) async fn load_canonical_definition(
    site_root: &Path,
    style_id: &str,
) -> Option<ImageStyle> {
    let path = paths::canonical_style_file(site_root, style_id);
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Unreadable style definition at {}: {}",
                    path.display(),
                    e
                );
            }
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(style) => Some(style),
        Err(e) => {
            warn!("Corrupt style definition at {}: {}", path.display(), e);
            None
        }
    }
}

/// Remove every output directory of the style across all resources.
pub(crate) async fn delete_style_outputs(
    site_root: &Path,
    style_id: &str,
) -> Result<u64, IndexError> {
    let mut removed = 0;
    for dir in style_output_dirs(site_root, style_id).await? {
        debug!("Deleting previews in {}", dir.display());
        fs::remove_dir_all(&dir).await?;
        removed += 1;
    }
    Ok(removed)
}

/// Whether any resource has rendered output for the style.
pub(crate) async fn style_has_outputs(site_root: &Path, style_id: &str) -> bool {
    match style_output_dirs(site_root, style_id).await {
        Ok(dirs) => !dirs.is_empty(),
        Err(_) => false,
    }
}

/// All `<images>/<n1>/<n2>/<id>/<style>` directories of one style.
async fn style_output_dirs(
    site_root: &Path,
    style_id: &str,
) -> Result<Vec<std::path::PathBuf>, IndexError> {
    let images_root = paths::images_root(site_root);
    let mut result = Vec::new();

    let mut shards = match fs::read_dir(&images_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(e.into()),
    };

    // Fixed depth: <n1>/<n2>/<id>/<style>
    while let Some(n1) = shards.next_entry().await? {
        if !n1.file_type().await?.is_dir() || n1.file_name() == "styles" {
            continue;
        }
        let mut level2 = fs::read_dir(n1.path()).await?;
        while let Some(n2) = level2.next_entry().await? {
            if !n2.file_type().await?.is_dir() {
                continue;
            }
            let mut resources = fs::read_dir(n2.path()).await?;
            while let Some(resource) = resources.next_entry().await? {
                if !resource.file_type().await?.is_dir() {
                    continue;
                }
                let style_dir = resource.path().join(style_id);
                if fs::metadata(&style_dir).await.is_ok() {
                    result.push(style_dir);
                }
            }
        }
    }
    Ok(result)
}

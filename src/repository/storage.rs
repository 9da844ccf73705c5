//! Filesystem layout and raw storage access for resource documents.
//!
//! Resources are stored below the site root, one directory per type,
//! sharded like the preview tree. The `resources` segment keeps the
//! storage tree apart from the `images` preview tree:
//!
//! ```text
//! <site>/resources/<type>s/<n1>/<n2>/<id>/<raw version>/resource.json
//! <site>/resources/<type>s/<n1>/<n2>/<id>/<raw version>/<language>.<ext>
//! ```

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::error;
use uuid::Uuid;

use crate::domain::{Resource, ResourceContent, Version};
use crate::error::RepositoryError;
use crate::preview::paths::shard_segments;
use crate::serializer::ResourceSerializer;

/// Name of the serialized resource document inside a revision directory.
pub const DOCUMENT_FILE: &str = "resource.json";

/// Name of the index directory below the site root.
pub const INDEX_DIR: &str = "index";

/// Name of the repository lock file below the site root.
pub const LOCK_FILE: &str = ".lock";

/// Name of the storage tree below the site root.
pub const RESOURCES_DIR: &str = "resources";

/// Directory holding all resources of one type
pub fn type_dir(site_root: &Path, type_name: &str) -> PathBuf {
    site_root.join(RESOURCES_DIR).join(format!("{}s", type_name))
}

/// Directory holding all revisions of one resource
pub fn resource_dir(site_root: &Path, type_name: &str, identifier: Uuid) -> PathBuf {
    let (n1, n2) = shard_segments(identifier);
    type_dir(site_root, type_name)
        .join(n1.to_string())
        .join(n2.to_string())
        .join(identifier.to_string())
}

/// Directory holding one stored resource instance
pub fn revision_dir(
    site_root: &Path,
    type_name: &str,
    identifier: Uuid,
    version: Version,
) -> PathBuf {
    resource_dir(site_root, type_name, identifier).join(version.raw().to_string())
}

/// Location of the serialized resource document
pub fn document_path(
    site_root: &Path,
    type_name: &str,
    identifier: Uuid,
    version: Version,
) -> PathBuf {
    revision_dir(site_root, type_name, identifier, version).join(DOCUMENT_FILE)
}

/// Location of one language's content file
pub fn content_path(
    site_root: &Path,
    type_name: &str,
    identifier: Uuid,
    version: Version,
    content: &ResourceContent,
) -> PathBuf {
    let name = match content.extension() {
        Some(ext) => format!("{}.{}", content.language, ext),
        None => content.language.to_string(),
    };
    revision_dir(site_root, type_name, identifier, version).join(name)
}

/// Serialize the resource and write its document to storage.
pub async fn store_document(
    site_root: &Path,
    serializer: &dyn ResourceSerializer,
    resource: &Resource,
) -> Result<(), RepositoryError> {
    let path = document_path(
        site_root,
        resource.type_name(),
        resource.identifier(),
        resource.version(),
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let document = serializer.serialize(resource)?;
    fs::write(&path, document).await?;
    Ok(())
}

/// Stream content bytes into storage, returning size and sha256 digest.
pub async fn store_content_stream(
    path: &Path,
    stream: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<(u64, String), RepositoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut buffer = [0u8; 8192];
    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        file.write_all(&buffer[..read]).await?;
        written += read as u64;
    }
    file.flush().await?;

    Ok((written, hex::encode(hasher.finalize())))
}

/// Delete the given revisions of a resource, pruning directories that
/// become empty up to the type root.
pub async fn delete_revisions(
    site_root: &Path,
    type_name: &str,
    identifier: Uuid,
    revisions: &[Version],
) -> Result<(), RepositoryError> {
    let resource_dir = resource_dir(site_root, type_name, identifier);
    for version in revisions {
        let dir = resource_dir.join(version.raw().to_string());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    prune_empty_dirs(&resource_dir, &type_dir(site_root, type_name)).await;
    Ok(())
}

/// Remove empty directories from `from` upward, stopping at `stop`.
pub async fn prune_empty_dirs(from: &Path, stop: &Path) {
    let mut current = Some(from.to_path_buf());
    while let Some(dir) = current {
        if dir == stop {
            break;
        }
        let is_empty = match fs::read_dir(&dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        };
        if !is_empty {
            break;
        }
        if fs::remove_dir(&dir).await.is_err() {
            break;
        }
        current = dir.parent().map(Path::to_path_buf);
    }
}

/// Collect all resource documents below the given type directory.
///
/// Used when rebuilding the index from storage. I/O failures while
/// walking are fatal; unreadable individual documents are the caller's
/// concern.
pub async fn walk_documents(type_root: &Path) -> Result<Vec<PathBuf>, RepositoryError> {
    let mut documents = Vec::new();
    if fs::metadata(type_root).await.is_err() {
        return Ok(documents);
    }

    let mut stack = vec![type_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if name == DOCUMENT_FILE {
                documents.push(entry.path());
            }
        }
    }
    Ok(documents)
}

/// Join a target path and a path suffix without doubling separators.
pub fn join_paths(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    if suffix.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, suffix)
    }
}

/// Log an index entry whose storage bytes are missing.
pub fn report_inconsistency(uri: &crate::domain::ResourceUri) {
    error!(
        "Index inconsistency detected: version '{}' of {} does not exist on disk",
        uri.version(),
        uri
    );
}

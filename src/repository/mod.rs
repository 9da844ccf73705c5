//! Content repository contracts and the filesystem implementation.

pub mod fs;
pub mod storage;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::domain::{Language, Resource, ResourceContent, ResourceSelector, ResourceUri, Site};
use crate::error::RepositoryError;

pub use fs::FileSystemContentRepository;

/// A byte stream of resource content.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Read access to a versioned content repository.
///
/// All operations complete before their call returns; preview generation
/// is the only work pushed to the background.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Connect the repository to its site, loading or rebuilding the
    /// index as needed
    async fn connect(&self, site: Site) -> Result<(), RepositoryError>;

    /// Disconnect, closing the index and releasing the site lock
    async fn disconnect(&self) -> Result<(), RepositoryError>;

    fn is_connected(&self) -> bool;

    fn is_read_only(&self) -> bool;

    fn is_indexing(&self) -> bool;

    /// Whether the exact (identifier, version) instance exists
    async fn exists(&self, uri: &ResourceUri) -> Result<bool, RepositoryError>;

    /// Whether any version of the identifier exists
    async fn exists_in_any_version(&self, uri: &ResourceUri) -> Result<bool, RepositoryError>;

    /// Resolve a uri to its deserialized resource. Absence, including a
    /// set but mismatching type, yields `None`.
    async fn get(&self, uri: &ResourceUri) -> Result<Option<Resource>, RepositoryError>;

    /// Stream one language's content bytes
    async fn get_content(
        &self,
        uri: &ResourceUri,
        language: &Language,
    ) -> Result<Option<ContentStream>, RepositoryError>;

    /// All known versions of the resource
    async fn get_versions(&self, uri: &ResourceUri) -> Result<Vec<ResourceUri>, RepositoryError>;

    /// Enumerate uris matching the selector, offset/limit applied after
    /// filtering in index order
    async fn list(&self, selector: &ResourceSelector)
        -> Result<Vec<ResourceUri>, RepositoryError>;

    /// Number of distinct resources
    async fn resource_count(&self) -> Result<u64, RepositoryError>;

    /// Number of stored instances across all revisions
    async fn revision_count(&self) -> Result<u64, RepositoryError>;
}

/// Mutation operations on top of the read path.
#[async_trait]
pub trait WritableContentRepository: ContentRepository {
    /// Insert or update a resource at its (identifier, version) slot.
    ///
    /// Inserting a resource that already carries content bodies is
    /// rejected; content is attached through `put_content` once the
    /// resource itself is indexed.
    async fn put(
        &self,
        resource: Resource,
        update_previews: bool,
    ) -> Result<Resource, RepositoryError>;

    /// Attach content for one language to an existing resource
    async fn put_content(
        &self,
        uri: &ResourceUri,
        content: ResourceContent,
        stream: ContentStream,
    ) -> Result<Resource, RepositoryError>;

    /// Remove one language's content
    async fn delete_content(
        &self,
        uri: &ResourceUri,
        language: &Language,
    ) -> Result<Resource, RepositoryError>;

    /// Delete the uri's version, or every revision. Returns false when
    /// the resource is unknown.
    async fn delete(&self, uri: &ResourceUri, all_revisions: bool)
        -> Result<bool, RepositoryError>;

    /// Move the resource, and optionally the resources below its path, to
    /// a new path across all revisions
    async fn move_to(
        &self,
        uri: &ResourceUri,
        target_path: &str,
        move_children: bool,
    ) -> Result<(), RepositoryError>;

    /// Rebuild the index from storage into a fresh instance and swap it
    /// in atomically
    async fn index(&self) -> Result<(), RepositoryError>;

    /// Schedule preview generation for every resource
    async fn create_all_previews(&self) -> Result<(), RepositoryError>;
}

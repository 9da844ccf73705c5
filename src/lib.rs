//! strata - Versioned content repository for a multi-tenant web CMS
//!
//! Stores typed resources (pages, files, images, movies) keyed by site,
//! identifier and version, and maintains a rebuildable search/lookup
//! index over them.
//!
//! # Architecture
//!
//! - Reads consult the index first and fall back to raw storage
//! - Writes go to storage, update the index and invalidate an external
//!   response cache
//! - Successful writes schedule derived image previews on a bounded set
//!   of background workers with de-duplication and supersession
//!
//! # Modules
//!
//! - `domain`: Data structures (ResourceUri, Resource, Site, ImageStyle)
//! - `index`: Content index over a pluggable search engine
//! - `serializer`: Per-type codecs and their registry
//! - `repository`: Read/write repository contracts and the filesystem
//!   implementation
//! - `preview`: Background preview scheduler and generators
//! - `cache`: Response cache collaborator
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata::{
//!     ContentRepository, FileSystemContentRepository, RepositoryConfig, SerializerRegistry,
//!     Site,
//! };
//!
//! # async fn example() -> Result<(), strata::RepositoryError> {
//! let config = RepositoryConfig::new("/var/lib/strata/sites-data");
//! let registry = Arc::new(SerializerRegistry::with_defaults());
//! let repository = FileSystemContentRepository::new(config, registry);
//! repository
//!     .connect(Site::new("main").with_language("en"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod index;
pub mod preview;
pub mod repository;
pub mod serializer;

// Re-export main types at crate root for convenience
pub use cache::{CacheTag, ResponseCache};
pub use config::RepositoryConfig;
pub use domain::{
    Attribution, Environment, ImageStyle, Language, Module, Resource, ResourceContent,
    ResourceKind, ResourceSelector, ResourceUri, ScalingMode, Site, Version,
};
pub use error::{IndexError, PreviewError, RepositoryError};
pub use index::{ContentIndex, IndexDocument, JsonSearchEngine, SearchEngine};
pub use preview::generator::{ImagePreviewGenerator, PreviewGenerator};
pub use repository::{
    ContentRepository, ContentStream, FileSystemContentRepository, WritableContentRepository,
};
pub use serializer::{ResourceMetadata, ResourceSerializer, SearchHit, SerializerRegistry};

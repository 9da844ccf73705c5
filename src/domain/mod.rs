//! Domain types for the content repository.
//!
//! This module contains the core data structures:
//! - ResourceUri / ResourceSelector: identity and filter value objects
//! - Resource / ResourceContent: versioned documents and their localized content
//! - Site / Module / Environment: the tenant a repository serves
//! - ImageStyle: scaling configurations applied when producing previews

pub mod resource;
pub mod site;
pub mod style;
pub mod uri;

// Re-export commonly used types
pub use resource::{Attribution, Language, Resource, ResourceContent, ResourceKind};
pub use site::{Environment, Module, Site};
pub use style::{ImageStyle, ScalingMode, ORIGINAL_STYLE};
pub use uri::{ResourceSelector, ResourceUri, Version};

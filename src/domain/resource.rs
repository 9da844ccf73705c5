//! Versioned resource documents and their localized content entries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::uri::{ResourceUri, Version};

/// A content language tag such as `en` or `de`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Language {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user together with the time an action was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub user: String,
    pub date: DateTime<Utc>,
}

impl Attribution {
    pub fn new(user: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            date,
        }
    }

    pub fn now(user: impl Into<String>) -> Self {
        Self::new(user, Utc::now())
    }
}

/// Type-specific resource data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceKind {
    Page {
        template: String,
        /// Identifiers of resources embedded by this page
        #[serde(default)]
        references: Vec<Uuid>,
    },
    File,
    Image {
        width: u32,
        height: u32,
    },
    Movie {
        width: u32,
        height: u32,
        duration_ms: u64,
    },
}

impl ResourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Page { .. } => "page",
            ResourceKind::File => "file",
            ResourceKind::Image { .. } => "image",
            ResourceKind::Movie { .. } => "movie",
        }
    }
}

/// Localized content attached to a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    pub language: Language,
    pub mimetype: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    /// Remote location for content that is not stored locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Attribution>,
    /// Hex sha256 of the stored bytes, set when the stream is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ResourceContent {
    pub fn new(
        language: impl Into<Language>,
        mimetype: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            mimetype: mimetype.into(),
            filename: filename.into(),
            size: 0,
            external_location: None,
            modified: None,
            digest: None,
        }
    }

    pub fn with_external_location(mut self, url: impl Into<String>) -> Self {
        self.external_location = Some(url.into());
        self
    }

    pub fn with_modified(mut self, modified: Attribution) -> Self {
        self.modified = Some(modified);
        self
    }

    /// File extension derived from the filename
    pub fn extension(&self) -> Option<&str> {
        let name = self.filename.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext)
    }
}

/// A versioned, typed content unit.
///
/// A resource is never mutated in place on disk; each write either updates
/// an existing (identifier, version) slot or creates a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    uri: ResourceUri,
    kind: ResourceKind,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<Attribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<Attribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published: Option<Attribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locked_by: Option<String>,
    #[serde(default)]
    contents: BTreeMap<Language, ResourceContent>,
}

impl Resource {
    /// Create a fresh resource of the given kind in a site.
    ///
    /// A new identifier is assigned; the resource starts as a work version
    /// with no path and no content.
    pub fn new(site: impl Into<String>, kind: ResourceKind) -> Self {
        let identifier = Uuid::new_v4();
        let uri = ResourceUri::new(
            site,
            Some(kind.type_name().to_string()),
            None,
            identifier,
            Version::Work,
        );
        Self {
            uri,
            kind,
            subjects: Vec::new(),
            created: None,
            modified: None,
            published: None,
            locked_by: None,
            contents: BTreeMap::new(),
        }
    }

    /// Create a resource with a fully specified uri.
    pub fn with_uri(uri: ResourceUri, kind: ResourceKind) -> Self {
        Self {
            uri,
            kind,
            subjects: Vec::new(),
            created: None,
            modified: None,
            published: None,
            locked_by: None,
            contents: BTreeMap::new(),
        }
    }

    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }

    pub fn identifier(&self) -> Uuid {
        self.uri.identifier()
    }

    pub fn version(&self) -> Version {
        self.uri.version()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ResourceKind {
        &mut self.kind
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn set_subjects(&mut self, subjects: Vec<String>) {
        self.subjects = subjects;
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.uri.set_path(Some(path.into()));
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.uri = self.uri.with_version(version);
        self
    }

    pub fn created(&self) -> Option<&Attribution> {
        self.created.as_ref()
    }

    pub fn set_created(&mut self, created: Attribution) {
        self.created = Some(created);
    }

    pub fn modified(&self) -> Option<&Attribution> {
        self.modified.as_ref()
    }

    pub fn set_modified(&mut self, modified: Attribution) {
        self.modified = Some(modified);
    }

    pub fn published(&self) -> Option<&Attribution> {
        self.published.as_ref()
    }

    pub fn set_published(&mut self, published: Attribution) {
        self.published = Some(published);
    }

    pub fn locked_by(&self) -> Option<&str> {
        self.locked_by.as_deref()
    }

    pub fn set_locked_by(&mut self, user: Option<String>) {
        self.locked_by = user;
    }

    pub fn set_path(&mut self, path: Option<String>) {
        self.uri.set_path(path);
    }

    pub fn contents(&self) -> impl Iterator<Item = &ResourceContent> {
        self.contents.values()
    }

    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    pub fn content(&self, language: &Language) -> Option<&ResourceContent> {
        self.contents.get(language)
    }

    pub fn languages(&self) -> Vec<Language> {
        self.contents.keys().cloned().collect()
    }

    pub fn add_content(&mut self, content: ResourceContent) {
        self.contents.insert(content.language.clone(), content);
    }

    pub fn remove_content(&mut self, language: &Language) -> Option<ResourceContent> {
        self.contents.remove(language)
    }

    /// Modification date relevant for preview freshness: the content's own
    /// modification time when present, the resource's otherwise.
    pub fn modification_date(&self, language: &Language) -> Option<DateTime<Utc>> {
        if let Some(content) = self.contents.get(language) {
            if let Some(modified) = &content.modified {
                return Some(modified.date);
            }
        }
        self.modified
            .as_ref()
            .or(self.created.as_ref())
            .map(|a| a.date)
    }
}

//! Resource identity and selection value objects.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resource version.
///
/// `Live` is the published revision, `Work` the current draft. Historical
/// revisions carry a monotonically increasing number starting at 2, so the
/// raw encoding (`Live = 0`, `Work = 1`, `Revision(n) = n`) orders all
/// versions of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Live,
    Work,
    Revision(u64),
}

impl Version {
    /// First raw value available for numbered revisions
    pub const FIRST_REVISION: u64 = 2;

    /// Stable numeric encoding used for ordering and on-disk names
    pub fn raw(self) -> u64 {
        match self {
            Version::Live => 0,
            Version::Work => 1,
            Version::Revision(n) => n,
        }
    }

    /// Decode a raw value, normalizing the reserved slots
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            0 => Version::Live,
            1 => Version::Work,
            n => Version::Revision(n),
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Version::Live)
    }

    pub fn is_work(self) -> bool {
        matches!(self, Version::Work)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Live => write!(f, "live"),
            Version::Work => write!(f, "work"),
            Version::Revision(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        if raw == u64::MAX {
            return Err(de::Error::custom("invalid version value"));
        }
        Ok(Version::from_raw(raw))
    }
}

/// Immutable identity of a stored resource instance.
///
/// The identifier is assigned once and stays stable across path moves and
/// versions; identifier plus version uniquely determine a stored instance.
/// The path is a human-facing hierarchy and not part of the identity; it
/// may be absent for unpublished or detached resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUri {
    site: String,
    #[serde(rename = "type")]
    resource_type: Option<String>,
    path: Option<String>,
    identifier: Uuid,
    version: Version,
}

impl ResourceUri {
    pub fn new(
        site: impl Into<String>,
        resource_type: Option<String>,
        path: Option<String>,
        identifier: Uuid,
        version: Version,
    ) -> Self {
        Self {
            site: site.into(),
            resource_type,
            path,
            identifier,
            version,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Same identity at a different version
    pub fn with_version(&self, version: Version) -> Self {
        let mut uri = self.clone();
        uri.version = version;
        uri
    }

    pub fn with_type(&self, resource_type: impl Into<String>) -> Self {
        let mut uri = self.clone();
        uri.resource_type = Some(resource_type.into());
        uri
    }

    pub fn with_path(&self, path: Option<String>) -> Self {
        let mut uri = self.clone();
        uri.path = path;
        uri
    }

    pub(crate) fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.site,
            self.path.as_deref().unwrap_or(""),
            self.version
        )?;
        write!(f, " ({})", self.identifier)
    }
}

/// Filter used by `list` to select a subset of the repository's resources.
///
/// All filters are conjunctive; empty filters match everything. Offset and
/// limit apply after filtering, in enumeration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceSelector {
    types: Vec<String>,
    without_types: Vec<String>,
    identifiers: Vec<Uuid>,
    versions: Vec<Version>,
    offset: usize,
    limit: usize,
}

impl ResourceSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_without_types(
        mut self,
        types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.without_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_identifiers(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.identifiers.extend(ids);
        self
    }

    pub fn with_versions(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.versions.extend(versions);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// A limit of zero means unlimited
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether the uri passes all configured filters
    pub fn matches(&self, uri: &ResourceUri) -> bool {
        if !self.types.is_empty() {
            match uri.resource_type() {
                Some(t) if self.types.iter().any(|s| s == t) => {}
                _ => return false,
            }
        }
        if let Some(t) = uri.resource_type() {
            if self.without_types.iter().any(|s| s == t) {
                return false;
            }
        }
        if !self.identifiers.is_empty() && !self.identifiers.contains(&uri.identifier()) {
            return false;
        }
        if !self.versions.is_empty() && !self.versions.contains(&uri.version()) {
            return false;
        }
        true
    }
}

//! Pluggable search engine backends.
//!
//! The default engine keeps all index documents in memory and persists
//! them to the index directory as JSON. Any backend implementing
//! [`SearchEngine`] can be substituted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ResourceUri, Version};
use crate::error::IndexError;

/// Version of the index document schema. An on-disk index carrying a
/// different version is rebuilt from storage at load time.
pub const INDEX_VERSION: u32 = 1;

/// A single entry of the content index.
///
/// One document exists per stored (identifier, version) instance. The
/// `source` field carries the serialized resource snapshot used by the
/// read fast path; it is kept for live and work versions only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub site: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub identifier: Uuid,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Multi-valued metadata emitted by the resource serializer, e.g.
    /// `resourceid` entries for resources embedded by a page
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl IndexDocument {
    pub fn uri(&self) -> ResourceUri {
        ResourceUri::new(
            self.site.clone(),
            Some(self.resource_type.clone()),
            self.path.clone(),
            self.identifier,
            self.version,
        )
    }

    pub fn property(&self, name: &str) -> Option<&[String]> {
        self.properties.get(name).map(|v| v.as_slice())
    }
}

/// Backend storing and retrieving index documents.
///
/// Documents are keyed by (identifier, version). `documents` returns them
/// in a stable order that defines the repository's enumeration order.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn put(&self, doc: IndexDocument) -> Result<(), IndexError>;

    async fn remove(&self, identifier: Uuid, version: Version) -> Result<bool, IndexError>;

    async fn get(
        &self,
        identifier: Uuid,
        version: Version,
    ) -> Result<Option<IndexDocument>, IndexError>;

    async fn documents(&self) -> Result<Vec<IndexDocument>, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;

    async fn close(&self) -> Result<(), IndexError>;

    /// Schema version found on disk when the engine was opened
    fn stored_version(&self) -> u32;
}

#[derive(Debug, Serialize, Deserialize)]
struct EngineMeta {
    version: u32,
}

/// File-backed engine persisting the document map as JSON.
pub struct JsonSearchEngine {
    dir: PathBuf,
    documents: RwLock<BTreeMap<(Uuid, u64), IndexDocument>>,
    stored_version: AtomicU32,
    closed: AtomicBool,
}

impl JsonSearchEngine {
    const DOCUMENTS_FILE: &'static str = "documents.json";
    const META_FILE: &'static str = "meta.json";

    /// Open or create an engine in the given directory.
    ///
    /// Unreadable or corrupt files are treated as an empty index so the
    /// repository's rebuild path can recover from them.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let meta_path = dir.join(Self::META_FILE);
        let mut stored_version = INDEX_VERSION;
        let mut fresh = true;
        match fs::read(&meta_path).await {
            Ok(content) => match serde_json::from_slice::<EngineMeta>(&content) {
                Ok(meta) => {
                    stored_version = meta.version;
                    fresh = false;
                }
                Err(e) => warn!(
                    "Discarding corrupt index metadata at {}: {}",
                    meta_path.display(),
                    e
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let documents_path = dir.join(Self::DOCUMENTS_FILE);
        let mut documents = BTreeMap::new();
        match fs::read(&documents_path).await {
            Ok(content) => match serde_json::from_slice::<Vec<IndexDocument>>(&content) {
                Ok(docs) => {
                    for doc in docs {
                        documents.insert((doc.identifier, doc.version.raw()), doc);
                    }
                }
                Err(e) => {
                    warn!(
                        "Discarding corrupt index documents at {}: {}",
                        documents_path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let engine = Self {
            dir,
            documents: RwLock::new(documents),
            stored_version: AtomicU32::new(stored_version),
            closed: AtomicBool::new(false),
        };
        if fresh {
            engine.persist().await?;
        }
        Ok(engine)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    /// Write the document map and metadata to disk. The in-memory lock is
    /// only held while taking the snapshot, not during I/O.
    async fn persist(&self) -> Result<(), IndexError> {
        let snapshot: Vec<IndexDocument> = {
            let documents = self.documents.read().expect("index lock poisoned");
            documents.values().cloned().collect()
        };

        let meta = EngineMeta {
            version: self.stored_version.load(Ordering::SeqCst),
        };
        fs::write(
            self.dir.join(Self::META_FILE),
            serde_json::to_string(&meta)?,
        )
        .await?;
        fs::write(
            self.dir.join(Self::DOCUMENTS_FILE),
            serde_json::to_string(&snapshot)?,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SearchEngine for JsonSearchEngine {
    async fn put(&self, doc: IndexDocument) -> Result<(), IndexError> {
        self.ensure_open()?;
        {
            let mut documents = self.documents.write().expect("index lock poisoned");
            documents.insert((doc.identifier, doc.version.raw()), doc);
        }
        self.persist().await
    }

    async fn remove(&self, identifier: Uuid, version: Version) -> Result<bool, IndexError> {
        self.ensure_open()?;
        let removed = {
            let mut documents = self.documents.write().expect("index lock poisoned");
            documents.remove(&(identifier, version.raw())).is_some()
        };
        if removed {
            self.persist().await?;
        } else {
            debug!("No index entry for {} @ {}", identifier, version);
        }
        Ok(removed)
    }

    async fn get(
        &self,
        identifier: Uuid,
        version: Version,
    ) -> Result<Option<IndexDocument>, IndexError> {
        self.ensure_open()?;
        let documents = self.documents.read().expect("index lock poisoned");
        Ok(documents.get(&(identifier, version.raw())).cloned())
    }

    async fn documents(&self) -> Result<Vec<IndexDocument>, IndexError> {
        self.ensure_open()?;
        let documents = self.documents.read().expect("index lock poisoned");
        Ok(documents.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        self.ensure_open()?;
        {
            let mut documents = self.documents.write().expect("index lock poisoned");
            documents.clear();
        }
        self.stored_version.store(INDEX_VERSION, Ordering::SeqCst);
        self.persist().await
    }

    async fn close(&self) -> Result<(), IndexError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        Ok(())
    }

    fn stored_version(&self) -> u32 {
        self.stored_version.load(Ordering::SeqCst)
    }
}

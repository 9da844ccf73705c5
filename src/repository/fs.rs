//! Content repository living on a filesystem.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheTag, ResponseCache};
use crate::config::RepositoryConfig;
use crate::domain::{
    Environment, ImageStyle, Language, Resource, ResourceContent, ResourceSelector, ResourceUri,
    Site, Version,
};
use crate::error::{PreviewError, RepositoryError};
use crate::index::{ContentIndex, INDEX_VERSION};
use crate::preview::generator::PreviewGenerator;
use crate::preview::{paths, styles, PreviewOperation, PreviewScheduler, PREVIEW_FORMAT};
use crate::serializer::{page::PROPERTY_RESOURCE_ID, SerializerRegistry};

use super::{storage, ContentRepository, ContentStream, WritableContentRepository};

struct Inner {
    config: RepositoryConfig,
    serializers: Arc<SerializerRegistry>,
    cache: StdRwLock<Option<Arc<dyn ResponseCache>>>,
    environment: StdRwLock<Environment>,
    site: StdRwLock<Option<Site>>,
    index: RwLock<Option<Arc<ContentIndex>>>,
    connected: AtomicBool,
    initializing: AtomicBool,
    read_only: AtomicBool,
    indexing: AtomicBool,
    scheduler: PreviewScheduler,
    site_lock: StdMutex<Option<std::fs::File>>,
}

/// Repository storing resources, index and previews below a site root on
/// the local filesystem.
///
/// Cloning is cheap; clones share the same underlying repository.
#[derive(Clone)]
pub struct FileSystemContentRepository {
    inner: Arc<Inner>,
}

impl FileSystemContentRepository {
    pub fn new(config: RepositoryConfig, serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                serializers,
                cache: StdRwLock::new(None),
                environment: StdRwLock::new(Environment::Production),
                site: StdRwLock::new(None),
                index: RwLock::new(None),
                connected: AtomicBool::new(false),
                initializing: AtomicBool::new(false),
                read_only: AtomicBool::new(false),
                indexing: AtomicBool::new(false),
                scheduler: PreviewScheduler::new(),
                site_lock: StdMutex::new(None),
            }),
        }
    }

    /// Attach the external response cache notified about mutations.
    pub fn set_response_cache(&self, cache: Arc<dyn ResponseCache>) {
        *self.inner.cache.write().expect("cache lock poisoned") = Some(cache);
    }

    /// Inject the deployment environment. In development, missing or
    /// outdated previews do not trigger an eager rebuild at connect time.
    pub fn set_environment(&self, environment: Environment) {
        *self
            .inner
            .environment
            .write()
            .expect("environment lock poisoned") = environment;
    }

    pub fn environment(&self) -> Environment {
        *self
            .inner
            .environment
            .read()
            .expect("environment lock poisoned")
    }

    fn site(&self) -> Result<Site, RepositoryError> {
        self.inner
            .site
            .read()
            .expect("site lock poisoned")
            .clone()
            .ok_or(RepositoryError::NotConnected)
    }

    fn site_root(&self) -> Result<PathBuf, RepositoryError> {
        let site = self.site()?;
        Ok(self.inner.config.site_root(&site.identifier))
    }

    async fn active_index(&self) -> Result<Arc<ContentIndex>, RepositoryError> {
        self.inner
            .index
            .read()
            .await
            .clone()
            .ok_or(RepositoryError::NotConnected)
    }

    fn ensure_connected(&self) -> Result<(), RepositoryError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(RepositoryError::NotConnected);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), RepositoryError> {
        self.ensure_connected()?;
        if self.inner.read_only.load(Ordering::SeqCst) {
            return Err(RepositoryError::ReadOnly);
        }
        Ok(())
    }

    fn invalidate_cache(&self, tags: Vec<CacheTag>) {
        let cache = self
            .inner
            .cache
            .read()
            .expect("cache lock poisoned")
            .clone();
        if let Some(cache) = cache {
            cache.invalidate(&tags, true);
        }
    }

    /// Rebuild the index from storage into a fresh instance and swap the
    /// directories. The read-only and indexing flags are restored on
    /// every exit path.
    async fn rebuild_index(&self) -> Result<Arc<ContentIndex>, RepositoryError> {
        let was_read_only = self.inner.read_only.swap(true, Ordering::SeqCst);
        self.inner.indexing.store(true, Ordering::SeqCst);
        if !was_read_only {
            info!("Switching repository to read only mode for indexing");
        }

        let result = self.rebuild_index_inner().await;

        self.inner.indexing.store(false, Ordering::SeqCst);
        self.inner.read_only.store(was_read_only, Ordering::SeqCst);
        if !was_read_only {
            info!("Switching repository back to write mode");
        }
        result
    }

    async fn rebuild_index_inner(&self) -> Result<Arc<ContentIndex>, RepositoryError> {
        let site_root = self.site_root()?;
        let index_dir = site_root.join(storage::INDEX_DIR);
        let staging_dir = site_root.join(format!("{}-new-{}", storage::INDEX_DIR, Uuid::new_v4()));

        info!("Creating new index at {}", staging_dir.display());
        fs::create_dir_all(&staging_dir).await?;
        let new_index =
            ContentIndex::open(&staging_dir, self.inner.serializers.clone()).await?;

        match self.replay_storage(&new_index).await {
            Ok((resources, revisions)) => {
                info!(
                    "Populated new index with {} resources and {} revisions",
                    resources, revisions
                );
            }
            Err(e) => {
                // A failed rebuild must not leave a partial index behind
                if let Err(clear_err) = new_index.clear().await {
                    error!("Error clearing incomplete index: {}", clear_err);
                }
                let _ = new_index.close().await;
                if let Err(rm_err) = fs::remove_dir_all(&staging_dir).await {
                    error!(
                        "Error removing incomplete index at {}: {}",
                        staging_dir.display(),
                        rm_err
                    );
                }
                return Err(e);
            }
        }
        new_index.close().await.map_err(RepositoryError::Index)?;

        // Swap the new index into place
        if let Some(active) = self.inner.index.write().await.take() {
            active.close().await.map_err(RepositoryError::Index)?;
        }
        let old_dir = site_root.join(format!("{}-old-{}", storage::INDEX_DIR, Uuid::new_v4()));
        fs::rename(&index_dir, &old_dir).await?;
        fs::rename(&staging_dir, &index_dir).await?;
        let reopened = ContentIndex::open(&index_dir, self.inner.serializers.clone()).await?;
        if let Err(e) = fs::remove_dir_all(&old_dir).await {
            warn!("Error removing old index at {}: {}", old_dir.display(), e);
        }

        Ok(Arc::new(reopened))
    }

    /// Replay every stored resource of every registered type through its
    /// serializer into the given index. Unreadable individual documents
    /// are skipped and counted; I/O errors while walking are fatal.
    async fn replay_storage(
        &self,
        index: &ContentIndex,
    ) -> Result<(u64, u64), RepositoryError> {
        let site_root = self.site_root()?;
        let mut identifiers: Vec<Uuid> = Vec::new();
        let mut revisions = 0u64;
        let mut skipped = 0u64;

        for type_name in self.inner.serializers.types() {
            let Some(serializer) = self.inner.serializers.by_type(&type_name) else {
                continue;
            };
            let type_root = storage::type_dir(&site_root, &type_name);
            let documents = storage::walk_documents(&type_root).await?;
            if documents.is_empty() {
                debug!("No {}s found to index", type_name);
                continue;
            }

            info!("Populating index with {}s", type_name);
            for path in documents {
                let bytes = match fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Error reading {}: {}", path.display(), e);
                        skipped += 1;
                        continue;
                    }
                };
                let resource = match serializer.read(&bytes) {
                    Ok(resource) => resource,
                    Err(e) => {
                        error!("Error loading {}: {}", path.display(), e);
                        skipped += 1;
                        continue;
                    }
                };
                if let Err(e) = index.add(&resource).await {
                    error!("Error indexing {}: {}", resource.uri(), e);
                    skipped += 1;
                    continue;
                }
                revisions += 1;
                if !identifiers.contains(&resource.identifier()) {
                    identifiers.push(resource.identifier());
                }
            }
        }

        if skipped > 0 {
            warn!("Skipped {} unreadable resources while indexing", skipped);
        }
        Ok((identifiers.len() as u64, revisions))
    }

    /// Compare the persisted style definitions against the live styles.
    /// Outputs of changed styles are dropped; a change or entirely
    /// missing previews trigger a full generation pass unless running in
    /// a development environment.
    async fn update_previews(&self) -> Result<(), RepositoryError> {
        let site = self.site()?;
        let site_root = self.site_root()?;
        let resource_count = self.resource_count().await?;

        let mut changed = false;
        let mut missing = false;
        for style in site.image_styles() {
            match styles::load_canonical_definition(&site_root, &style.identifier).await {
                Some(persisted) if persisted == style => {
                    if resource_count > 0
                        && !styles::style_has_outputs(&site_root, &style.identifier).await
                    {
                        debug!("Previews for style '{}' are missing", style.identifier);
                        missing = true;
                    }
                }
                Some(_) => {
                    info!(
                        "Image style '{}' changed, removing outdated previews",
                        style.identifier
                    );
                    styles::delete_style_outputs(&site_root, &style.identifier)
                        .await
                        .map_err(RepositoryError::Index)?;
                    styles::persist_canonical_definition(&site_root, &style).await?;
                    changed = true;
                }
                None => {
                    styles::persist_canonical_definition(&site_root, &style).await?;
                    if resource_count > 0 {
                        missing = true;
                    }
                }
            }
        }

        if changed || missing {
            if self.environment() == Environment::Development {
                info!("Skipping preview generation in development environment");
            } else {
                self.create_all_previews().await?;
            }
        }
        Ok(())
    }

    /// Schedule preview generation for the resource. With no explicit
    /// languages, previews are created for all site languages.
    fn create_previews(&self, resource: &Resource, languages: &[Language]) {
        let Ok(site) = self.site() else {
            return;
        };
        let styles = site.image_styles();
        if styles.is_empty() {
            debug!(
                "Skipping preview generation for {}: no image styles defined",
                resource.uri()
            );
            return;
        }
        let languages = if languages.is_empty() {
            site.languages.clone()
        } else {
            languages.to_vec()
        };

        let operation =
            PreviewOperation::new(resource.clone(), languages, styles, PREVIEW_FORMAT);
        if let Some(operation) = self.inner.scheduler.schedule(operation) {
            self.spawn_worker(operation);
        }
    }

    /// One background task per in-flight operation. When a worker
    /// finishes, its completion handler hands it the next queued
    /// operation, keeping the scheduler work-conserving.
    fn spawn_worker(&self, operation: Arc<PreviewOperation>) {
        let repository = self.clone();
        tokio::spawn(async move {
            let mut current = operation;
            loop {
                if let Err(e) = repository.run_preview_operation(&current).await {
                    warn!(
                        "Preview generation for {} failed: {}",
                        current.resource.uri(),
                        e
                    );
                }
                // Completion bookkeeping runs regardless of the outcome
                match repository.inner.scheduler.complete(&current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        });
    }

    async fn run_preview_operation(
        &self,
        operation: &Arc<PreviewOperation>,
    ) -> Result<(), PreviewError> {
        let resource = &operation.resource;
        let type_name = resource.type_name();

        let Some(serializer) = self.inner.serializers.by_type(type_name) else {
            warn!(
                "Unable to create previews for type '{}': no resource serializer found",
                type_name
            );
            return Ok(());
        };
        let Some(generator) = serializer.preview_generator(resource) else {
            debug!("Resource type '{}' does not support previews", type_name);
            return Ok(());
        };

        // An image serializer handles the scaling of the rendered preview
        let mimetype = format!("image/{}", operation.format);
        let Some(image_serializer) = self.inner.serializers.by_mime(&mimetype) else {
            warn!("No resource serializer found for format '{}'", mimetype);
            return Ok(());
        };
        let Some(scaler) = image_serializer.preview_generator_for_format(&operation.format)
        else {
            warn!(
                "Serializer '{}' does not support output format '{}'",
                image_serializer.type_name(),
                operation.format
            );
            return Ok(());
        };

        let environment = self.environment();
        let site_root = self
            .site_root()
            .map_err(|e| PreviewError::Repository(e.to_string()))?;

        for language in &operation.languages {
            if operation.is_cancelled() {
                debug!("Preview generation for {} cancelled", resource.uri());
                return Ok(());
            }
            if resource.content(language).is_none() {
                continue;
            }
            if !generator.supports(resource, language) {
                debug!(
                    "Previews of {} not supported in {}",
                    resource.uri(),
                    language
                );
                continue;
            }

            let modified = resource.modification_date(language);
            let original_style = ImageStyle::original();
            let original_path =
                paths::preview_file(&site_root, resource, language, &original_style, &operation.format);

            // The unscaled original is rendered once per language. Failing
            // to produce it aborts the operation for this resource.
            self.render_original(
                operation,
                language,
                &original_style,
                &original_path,
                generator.clone(),
                environment,
                modified,
            )
            .await?;

            for style in &operation.styles {
                if operation.is_cancelled() {
                    debug!("Preview generation for {} cancelled", resource.uri());
                    return Ok(());
                }
                if style.is_original() {
                    continue;
                }

                let target =
                    paths::preview_file(&site_root, resource, language, style, &operation.format);
                if is_fresh(&target, modified).await {
                    debug!("Preview at {} is up to date", target.display());
                    continue;
                }

                if let Err(e) = self
                    .scale_preview(
                        operation,
                        language,
                        style,
                        &original_path,
                        &target,
                        scaler.clone(),
                        environment,
                    )
                    .await
                {
                    warn!("Error scaling {}: {}", target.display(), e);
                    continue;
                }

                // Persist the style definition beside the output so the
                // next connect can detect definition changes
                let style_dir =
                    paths::style_dir(&site_root, resource.identifier(), &style.identifier);
                if let Err(e) = styles::persist_style_definition(&style_dir, style).await {
                    warn!("Error persisting style definition: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Render the unscaled preview unless a fresh one already exists.
    #[allow(clippy::too_many_arguments)]
    async fn render_original(
        &self,
        operation: &PreviewOperation,
        language: &Language,
        style: &ImageStyle,
        target: &std::path::Path,
        generator: Arc<dyn PreviewGenerator>,
        environment: Environment,
        modified: Option<DateTime<Utc>>,
    ) -> Result<(), PreviewError> {
        if is_fresh(target, modified).await {
            return Ok(());
        }

        let resource = &operation.resource;
        let input = match self
            .get_content(resource.uri(), language)
            .await
            .map_err(|e| PreviewError::Repository(e.to_string()))?
        {
            Some(mut stream) => {
                let mut bytes = Vec::new();
                stream.read_to_end(&mut bytes).await?;
                bytes
            }
            None => {
                return Err(PreviewError::MissingContent(language.to_string()));
            }
        };

        let rendered = render_blocking(
            generator,
            resource.clone(),
            environment,
            language.clone(),
            style.clone(),
            operation.format.clone(),
            input,
        )
        .await;

        match rendered {
            Ok(bytes) if !bytes.is_empty() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(target, bytes).await?;
                debug!("Created preview of {} at {}", resource.uri(), target.display());
                Ok(())
            }
            Ok(_) => Err(PreviewError::Repository(format!(
                "empty preview rendered for {}",
                resource.uri()
            ))),
            Err(e) => {
                cleanup_failed_preview(target).await;
                Err(e)
            }
        }
    }

    /// Scale the rendered original into the style's target file.
    #[allow(clippy::too_many_arguments)]
    async fn scale_preview(
        &self,
        operation: &PreviewOperation,
        language: &Language,
        style: &ImageStyle,
        original: &std::path::Path,
        target: &std::path::Path,
        scaler: Arc<dyn PreviewGenerator>,
        environment: Environment,
    ) -> Result<(), PreviewError> {
        let input = fs::read(original).await?;
        let rendered = render_blocking(
            scaler,
            operation.resource.clone(),
            environment,
            language.clone(),
            style.clone(),
            operation.format.clone(),
            input,
        )
        .await;

        match rendered {
            Ok(bytes) if !bytes.is_empty() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(target, bytes).await?;
                Ok(())
            }
            Ok(_) => Err(PreviewError::Repository(format!(
                "empty preview scaled for {}",
                operation.resource.uri()
            ))),
            Err(e) => {
                cleanup_failed_preview(target).await;
                Err(e)
            }
        }
    }

    /// Remove every preview of the resource.
    async fn delete_previews(&self, identifier: Uuid) -> Result<(), RepositoryError> {
        let site_root = self.site_root()?;
        let dir = paths::resource_images_dir(&site_root, identifier);
        debug!("Deleting previews in {}", dir.display());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        storage::prune_empty_dirs(
            dir.parent().unwrap_or(&dir),
            &paths::images_root(&site_root),
        )
        .await;
        Ok(())
    }

    /// Load or rebuild the index and run the connect-time style check.
    async fn connect_inner(&self, site_root: &std::path::Path) -> Result<(), RepositoryError> {
        let index = ContentIndex::open(
            site_root.join(storage::INDEX_DIR),
            self.inner.serializers.clone(),
        )
        .await
        .map_err(RepositoryError::Index)?;
        let resource_count = index
            .resource_count()
            .await
            .map_err(RepositoryError::Index)?;
        let index_version = index.index_version();
        *self.inner.index.write().await = Some(Arc::new(index));

        if resource_count == 0 || index_version != INDEX_VERSION {
            if index_version != INDEX_VERSION {
                info!(
                    "Index version {} does not match implementation version {}, triggering reindex",
                    index_version, INDEX_VERSION
                );
            }
            let rebuilt = self.rebuild_index().await?;
            *self.inner.index.write().await = Some(rebuilt);
        }

        self.inner.connected.store(true, Ordering::SeqCst);

        let resources = self.resource_count().await?;
        let revisions = self.revision_count().await?;
        info!(
            "Index holds {} resources and {} revisions",
            resources,
            revisions - resources
        );

        // Detect image style changes since the last run
        self.update_previews().await
    }

    /// Remove one language's previews across all styles.
    async fn delete_previews_for_language(
        &self,
        identifier: Uuid,
        language: &Language,
    ) -> Result<(), RepositoryError> {
        let site = self.site()?;
        let site_root = self.site_root()?;
        let mut styles = site.image_styles();
        styles.push(ImageStyle::original());
        for style in styles {
            let dir = paths::preview_dir(&site_root, identifier, &style.identifier, language);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Deleted previews in {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Run a generator off the async executor; image work is CPU-bound.
async fn render_blocking(
    generator: Arc<dyn PreviewGenerator>,
    resource: Resource,
    environment: Environment,
    language: Language,
    style: ImageStyle,
    format: String,
    input: Vec<u8>,
) -> Result<Vec<u8>, PreviewError> {
    tokio::task::spawn_blocking(move || {
        let mut output = Vec::new();
        generator.create_preview(
            &resource,
            environment,
            &language,
            &style,
            &format,
            &mut Cursor::new(input),
            &mut output,
        )?;
        Ok(output)
    })
    .await
    .map_err(|e| {
        PreviewError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?
}

/// Whether the preview file is newer than the content it derives from,
/// compared at second granularity.
async fn is_fresh(target: &std::path::Path, modified: Option<DateTime<Utc>>) -> bool {
    let Some(modified) = modified else {
        return false;
    };
    let Ok(metadata) = fs::metadata(target).await else {
        return false;
    };
    let Ok(mtime) = metadata.modified() else {
        return false;
    };
    let Ok(elapsed) = mtime.duration_since(UNIX_EPOCH) else {
        return false;
    };
    elapsed.as_secs() as i64 >= modified.timestamp()
}

async fn cleanup_failed_preview(target: &std::path::Path) {
    if fs::remove_file(target).await.is_ok() {
        if let Some(parent) = target.parent() {
            if let Some(grandparent) = parent.parent() {
                storage::prune_empty_dirs(parent, grandparent).await;
            }
        }
    }
}

#[async_trait]
impl ContentRepository for FileSystemContentRepository {
    #[instrument(skip(self, site), fields(site = %site.identifier))]
    async fn connect(&self, site: Site) -> Result<(), RepositoryError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            return Err(RepositoryError::AlreadyConnected);
        }

        let site_root = self.inner.config.site_root(&site.identifier);
        fs::create_dir_all(site_root.join(storage::INDEX_DIR)).await?;

        // One repository instance owns a site's storage at a time
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(site_root.join(storage::LOCK_FILE))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            RepositoryError::State(format!(
                "site '{}' is already owned by another repository instance",
                site.identifier
            ))
        })?;
        *self
            .inner
            .site_lock
            .lock()
            .expect("site lock mutex poisoned") = Some(lock_file);

        *self.inner.site.write().expect("site lock poisoned") = Some(site.clone());
        self.inner.initializing.store(true, Ordering::SeqCst);

        let result = self.connect_inner(&site_root).await;
        self.inner.initializing.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            // Roll back to the disconnected state
            self.inner.connected.store(false, Ordering::SeqCst);
            if let Some(index) = self.inner.index.write().await.take() {
                let _ = index.close().await;
            }
            let lock_file = self
                .inner
                .site_lock
                .lock()
                .expect("site lock mutex poisoned")
                .take();
            if let Some(lock_file) = lock_file {
                let _ = fs2::FileExt::unlock(&lock_file);
            }
            *self.inner.site.write().expect("site lock poisoned") = None;
            return Err(e);
        }

        info!("Content repository connected to site '{}'", site.identifier);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RepositoryError> {
        self.ensure_connected()?;

        self.inner.scheduler.cancel_all();
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(index) = self.inner.index.write().await.take() {
            index.close().await.map_err(RepositoryError::Index)?;
        }

        let lock_file = self
            .inner
            .site_lock
            .lock()
            .expect("site lock mutex poisoned")
            .take();
        if let Some(lock_file) = lock_file {
            let _ = fs2::FileExt::unlock(&lock_file);
        }
        *self.inner.site.write().expect("site lock poisoned") = None;

        info!("Content repository disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::SeqCst)
    }

    fn is_indexing(&self) -> bool {
        self.inner.indexing.load(Ordering::SeqCst)
    }

    async fn exists(&self, uri: &ResourceUri) -> Result<bool, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        index.exists(uri).await.map_err(RepositoryError::Index)
    }

    async fn exists_in_any_version(&self, uri: &ResourceUri) -> Result<bool, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        index
            .exists_in_any_version(uri)
            .await
            .map_err(RepositoryError::Index)
    }

    async fn get(&self, uri: &ResourceUri) -> Result<Option<Resource>, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;

        let Some(doc) = index
            .document(uri.identifier(), uri.version())
            .await
            .map_err(RepositoryError::Index)?
        else {
            return Ok(None);
        };

        // A set but mismatching type is absence, not an error
        if let Some(requested) = uri.resource_type() {
            if requested != doc.resource_type {
                return Ok(None);
            }
        }

        let serializer = self
            .inner
            .serializers
            .by_type(&doc.resource_type)
            .ok_or_else(|| RepositoryError::NoSerializer(doc.resource_type.clone()))?;

        // Fast path: deserialize from the index's cached snapshot
        if let Some(source) = &doc.source {
            return serializer.read(source.as_bytes()).map(Some);
        }

        // Fall back to the raw bytes in storage
        let site_root = self.site_root()?;
        let path = storage::document_path(
            &site_root,
            &doc.resource_type,
            uri.identifier(),
            uri.version(),
        );
        match fs::read(&path).await {
            Ok(bytes) => serializer.read(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                storage::report_inconsistency(&doc.uri());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_content(
        &self,
        uri: &ResourceUri,
        language: &Language,
    ) -> Result<Option<ContentStream>, RepositoryError> {
        let Some(resource) = self.get(uri).await? else {
            return Ok(None);
        };
        let Some(content) = resource.content(language) else {
            return Ok(None);
        };

        let site_root = self.site_root()?;
        let path = storage::content_path(
            &site_root,
            resource.type_name(),
            resource.identifier(),
            resource.version(),
            content,
        );
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Content may live at an external location instead
                if let Some(url) = &content.external_location {
                    let bytes = reqwest::get(url).await?.bytes().await?;
                    Ok(Some(Box::new(Cursor::new(bytes.to_vec()))))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_versions(&self, uri: &ResourceUri) -> Result<Vec<ResourceUri>, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        let revisions = index
            .get_revisions(uri)
            .await
            .map_err(RepositoryError::Index)?;
        Ok(revisions.iter().map(|v| uri.with_version(*v)).collect())
    }

    async fn list(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<ResourceUri>, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        let uris = index.enumerate().await.map_err(RepositoryError::Index)?;

        let mut skipped = 0;
        let mut result = Vec::new();
        for uri in uris {
            if !selector.matches(&uri) {
                continue;
            }
            if skipped < selector.offset() {
                skipped += 1;
                continue;
            }
            result.push(uri);
            if selector.limit() > 0 && result.len() == selector.limit() {
                break;
            }
        }
        Ok(result)
    }

    async fn resource_count(&self) -> Result<u64, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        index.resource_count().await.map_err(RepositoryError::Index)
    }

    async fn revision_count(&self) -> Result<u64, RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        index.revision_count().await.map_err(RepositoryError::Index)
    }
}

#[async_trait]
impl WritableContentRepository for FileSystemContentRepository {
    #[instrument(skip(self, resource), fields(uri = %resource.uri()))]
    async fn put(
        &self,
        resource: Resource,
        update_previews: bool,
    ) -> Result<Resource, RepositoryError> {
        self.ensure_writable()?;
        let index = self.active_index().await?;
        let uri = resource.uri().clone();

        if !index
            .exists_in_any_version(&uri)
            .await
            .map_err(RepositoryError::Index)?
        {
            // Brand new resource
            if resource.content_count() > 0 {
                return Err(RepositoryError::State(
                    "cannot insert a resource that already carries content".to_string(),
                ));
            }
            index.add(&resource).await.map_err(RepositoryError::Index)?;
        } else if index.exists(&uri).await.map_err(RepositoryError::Index)? {
            // Update of an existing version; content is managed through
            // put_content and must not change here
            if let Some(existing) = self.get(&uri).await? {
                if resource.content_count() != existing.content_count() {
                    return Err(RepositoryError::State(
                        "content sections cannot be modified through put".to_string(),
                    ));
                }
            }
            index
                .update(&resource)
                .await
                .map_err(RepositoryError::Index)?;
        } else {
            // New version of an existing resource
            if resource.content_count() > 0 {
                return Err(RepositoryError::State(
                    "cannot insert a resource version that already carries content".to_string(),
                ));
            }
            index.add(&resource).await.map_err(RepositoryError::Index)?;
        }

        // Let the response cache drop everything referencing this resource
        if uri.version().is_live() {
            let mut tags = vec![CacheTag::Resource(uri.identifier())];
            for subject in resource.subjects() {
                tags.push(CacheTag::Subject(subject.clone()));
            }
            self.invalidate_cache(tags);
        }

        let serializer = self
            .inner
            .serializers
            .by_type(resource.type_name())
            .ok_or_else(|| RepositoryError::NoSerializer(resource.type_name().to_string()))?;
        let site_root = self.site_root()?;
        storage::store_document(&site_root, serializer.as_ref(), &resource).await?;

        if update_previews
            && self.inner.connected.load(Ordering::SeqCst)
            && !self.inner.initializing.load(Ordering::SeqCst)
        {
            self.create_previews(&resource, &[]);
        }

        Ok(resource)
    }

    #[instrument(skip(self, content, stream), fields(uri = %uri, language = %content.language))]
    async fn put_content(
        &self,
        uri: &ResourceUri,
        content: ResourceContent,
        mut stream: ContentStream,
    ) -> Result<Resource, RepositoryError> {
        self.ensure_writable()?;
        let index = self.active_index().await?;

        if !index.exists(uri).await.map_err(RepositoryError::Index)? {
            return Err(RepositoryError::State(format!(
                "cannot add content to missing resource {}",
                uri
            )));
        }
        let Some(mut resource) = self.get(uri).await? else {
            return Err(RepositoryError::State(format!(
                "resource {} not found",
                uri
            )));
        };

        let serializer = self
            .inner
            .serializers
            .by_type(resource.type_name())
            .ok_or_else(|| RepositoryError::NoSerializer(resource.type_name().to_string()))?;
        if !serializer.supports_mime(&content.mimetype) {
            return Err(RepositoryError::State(format!(
                "content of type '{}' cannot be added to a {} resource",
                content.mimetype,
                resource.type_name()
            )));
        }

        // Persist the stream, recording size and digest
        let site_root = self.site_root()?;
        let path = storage::content_path(
            &site_root,
            resource.type_name(),
            resource.identifier(),
            resource.version(),
            &content,
        );
        let (size, digest) = storage::store_content_stream(&path, stream.as_mut()).await?;

        let mut content = content;
        content.size = size;
        content.digest = Some(digest);
        if content.modified.is_none() {
            let user = resource
                .modified()
                .or(resource.created())
                .map(|a| a.user.clone())
                .unwrap_or_else(|| "anonymous".to_string());
            content.modified = Some(crate::domain::Attribution::now(user));
        }
        resource.add_content(content);

        storage::store_document(&site_root, serializer.as_ref(), &resource).await?;
        index
            .update(&resource)
            .await
            .map_err(RepositoryError::Index)?;

        self.invalidate_cache(vec![CacheTag::Resource(uri.identifier())]);

        if self.inner.connected.load(Ordering::SeqCst)
            && !self.inner.initializing.load(Ordering::SeqCst)
        {
            self.create_previews(&resource, &[]);
        }

        Ok(resource)
    }

    #[instrument(skip(self), fields(uri = %uri, language = %language))]
    async fn delete_content(
        &self,
        uri: &ResourceUri,
        language: &Language,
    ) -> Result<Resource, RepositoryError> {
        self.ensure_writable()?;
        let index = self.active_index().await?;

        if !index.exists(uri).await.map_err(RepositoryError::Index)? {
            return Err(RepositoryError::State(format!(
                "cannot remove content from missing resource {}",
                uri
            )));
        }
        let Some(mut resource) = self.get(uri).await? else {
            return Err(RepositoryError::State(format!(
                "resource {} not found",
                uri
            )));
        };

        let Some(content) = resource.remove_content(language) else {
            // Absence of the content language is not an error
            return Ok(resource);
        };

        let site_root = self.site_root()?;
        let path = storage::content_path(
            &site_root,
            resource.type_name(),
            resource.identifier(),
            resource.version(),
            &content,
        );
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let serializer = self
            .inner
            .serializers
            .by_type(resource.type_name())
            .ok_or_else(|| RepositoryError::NoSerializer(resource.type_name().to_string()))?;
        storage::store_document(&site_root, serializer.as_ref(), &resource).await?;
        index
            .update(&resource)
            .await
            .map_err(RepositoryError::Index)?;

        // Only this language's previews are affected
        self.delete_previews_for_language(uri.identifier(), language)
            .await?;

        self.invalidate_cache(vec![CacheTag::Resource(uri.identifier())]);
        Ok(resource)
    }

    #[instrument(skip(self), fields(uri = %uri, all_revisions))]
    async fn delete(
        &self,
        uri: &ResourceUri,
        all_revisions: bool,
    ) -> Result<bool, RepositoryError> {
        self.ensure_writable()?;
        let index = self.active_index().await?;

        if !index
            .exists_in_any_version(uri)
            .await
            .map_err(RepositoryError::Index)?
        {
            warn!("Resource {} not found in repository index", uri);
            return Ok(false);
        }

        // Refuse to delete resources still referenced by live content
        if all_revisions || uri.version().is_live() {
            let referencing = index
                .find_live_by_property(PROPERTY_RESOURCE_ID, &uri.identifier().to_string())
                .await
                .map_err(RepositoryError::Index)?;
            if let Some(doc) = referencing
                .iter()
                .find(|d| d.identifier != uri.identifier())
            {
                debug!("Resource {} is still being referenced", uri);
                return Err(RepositoryError::ReferentialIntegrity {
                    referenced_by: doc.identifier,
                });
            }
        }

        let revisions: Vec<Version> = if all_revisions {
            index
                .get_revisions(uri)
                .await
                .map_err(RepositoryError::Index)?
        } else {
            vec![uri.version()]
        };

        // Load the resource once for preview cleanup before storage goes
        let cleanup_uri = uri.with_version(*revisions.first().unwrap_or(&uri.version()));
        let resource = match self.get(&cleanup_uri).await? {
            Some(resource) => Some(resource),
            None => {
                // Reconstitute from index fields when storage is gone
                let doc = index
                    .document(uri.identifier(), cleanup_uri.version())
                    .await
                    .map_err(RepositoryError::Index)?;
                doc.and_then(|doc| {
                    self.inner
                        .serializers
                        .by_type(&doc.resource_type)
                        .and_then(|s| s.from_metadata(&doc))
                })
            }
        };

        let type_name = match &resource {
            Some(resource) => resource.type_name().to_string(),
            None => index
                .get_type(uri)
                .await
                .map_err(RepositoryError::Index)?
                .unwrap_or_else(|| "file".to_string()),
        };

        let site_root = self.site_root()?;
        storage::delete_revisions(&site_root, &type_name, uri.identifier(), &revisions).await?;

        for version in &revisions {
            index
                .delete(&uri.with_version(*version))
                .await
                .map_err(RepositoryError::Index)?;
        }

        self.delete_previews(uri.identifier()).await?;

        if all_revisions || uri.version().is_live() {
            self.invalidate_cache(vec![CacheTag::Resource(uri.identifier())]);
        }

        info!("Deleted {} revisions of {}", revisions.len(), uri);
        Ok(true)
    }

    #[instrument(skip(self), fields(uri = %uri, target = target_path, move_children))]
    async fn move_to(
        &self,
        uri: &ResourceUri,
        target_path: &str,
        move_children: bool,
    ) -> Result<(), RepositoryError> {
        self.ensure_writable()?;
        let index = self.active_index().await?;
        let site = self.site()?;

        let Some(original_path) = uri.path().map(str::to_string) else {
            return Err(RepositoryError::State(
                "cannot move a resource without a path".to_string(),
            ));
        };
        if target_path.trim().is_empty() {
            return Err(RepositoryError::State(
                "cannot move a resource to an empty path".to_string(),
            ));
        }
        if !target_path.starts_with('/') {
            return Err(RepositoryError::State(format!(
                "cannot move a resource to relative path '{}'",
                target_path
            )));
        }
        if original_path == target_path {
            return Ok(());
        }

        // Collect the resources to move, deduplicated by identifier
        let mut documents: Vec<(Uuid, String)> = vec![(uri.identifier(), original_path.clone())];
        if move_children {
            let children = index
                .find_live_by_path_prefix(&original_path)
                .await
                .map_err(RepositoryError::Index)?;
            for doc in children {
                if doc.identifier == uri.identifier() {
                    continue;
                }
                if let Some(path) = doc.path {
                    documents.push((doc.identifier, path));
                }
            }
        }

        for (identifier, old_path) in documents {
            let suffix = old_path[original_path.len()..].to_string();
            let new_path = if suffix.is_empty() {
                target_path.to_string()
            } else {
                storage::join_paths(target_path, &suffix)
            };

            // The path must stay identical across all revisions of one
            // identifier, so every revision is re-pathed individually
            let base = ResourceUri::new(
                site.identifier.clone(),
                None,
                Some(old_path.clone()),
                identifier,
                Version::Live,
            );
            for version in index
                .get_revisions(&base)
                .await
                .map_err(RepositoryError::Index)?
            {
                let candidate = base.with_version(version);
                let Some(mut resource) = self.get(&candidate).await? else {
                    warn!("Skipping missing revision {} of {}", version, identifier);
                    continue;
                };

                resource.set_path(Some(new_path.clone()));
                let serializer = self
                    .inner
                    .serializers
                    .by_type(resource.type_name())
                    .ok_or_else(|| {
                        RepositoryError::NoSerializer(resource.type_name().to_string())
                    })?;
                let site_root = self.site_root()?;
                storage::store_document(&site_root, serializer.as_ref(), &resource).await?;

                // Hand the index the uri at its old path so the move is
                // recorded as old to new
                let old_uri = resource.uri().with_path(Some(old_path.clone()));
                index
                    .move_to(&old_uri, &new_path)
                    .await
                    .map_err(RepositoryError::Index)?;

                if self.inner.connected.load(Ordering::SeqCst)
                    && !self.inner.initializing.load(Ordering::SeqCst)
                {
                    self.create_previews(&resource, &[]);
                }
            }
        }

        self.invalidate_cache(vec![CacheTag::Resource(uri.identifier())]);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn index(&self) -> Result<(), RepositoryError> {
        self.ensure_connected()?;
        if self.inner.indexing.load(Ordering::SeqCst) {
            warn!("Ignoring additional index request");
            return Ok(());
        }

        let rebuilt = self.rebuild_index().await?;
        *self.inner.index.write().await = Some(rebuilt);
        Ok(())
    }

    async fn create_all_previews(&self) -> Result<(), RepositoryError> {
        self.ensure_connected()?;
        let index = self.active_index().await?;
        info!("Starting preview generation for all resources");

        let uris = index.enumerate().await.map_err(RepositoryError::Index)?;

        // One preview pass per resource, preferring the live version
        let mut chosen: Vec<ResourceUri> = Vec::new();
        for uri in uris {
            match chosen.iter_mut().find(|u| u.identifier() == uri.identifier()) {
                Some(existing) => {
                    if uri.version() < existing.version() {
                        *existing = uri;
                    }
                }
                None => chosen.push(uri),
            }
        }

        for uri in chosen {
            let Some(resource) = self.get(&uri).await? else {
                warn!("Skipping missing {} for preview generation", uri);
                continue;
            };
            self.create_previews(&resource, &[]);
        }
        Ok(())
    }
}

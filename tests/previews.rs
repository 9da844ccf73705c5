//! Integration tests for background preview generation: end-to-end
//! rendering, freshness checks and style change detection.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use tempfile::TempDir;

use strata::preview::paths as preview_paths;
use strata::{
    ContentRepository, Environment, FileSystemContentRepository, ImageStyle, Language,
    RepositoryConfig, Resource, ResourceContent, ResourceKind, ScalingMode, SerializerRegistry,
    Site, Version, WritableContentRepository,
};

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

fn site_with_thumbnail(width: u32, height: u32) -> Site {
    Site::new("main")
        .with_language("en")
        .with_style(ImageStyle::new("thumbnail", width, height, ScalingMode::Crop))
}

async fn connected_repository(temp: &TempDir, site: Site) -> FileSystemContentRepository {
    let repository = FileSystemContentRepository::new(
        RepositoryConfig::new(temp.path()),
        Arc::new(SerializerRegistry::with_defaults()),
    );
    repository.connect(site).await.unwrap();
    repository
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([10, 120, 80, 255]),
    ));
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

async fn put_image_with_content(
    repository: &FileSystemContentRepository,
    pixels: u32,
) -> Resource {
    let image = Resource::new(
        "main",
        ResourceKind::Image {
            width: pixels,
            height: pixels,
        },
    )
    .with_version(Version::Live);
    let stored = repository.put(image, true).await.unwrap();
    repository
        .put_content(
            stored.uri(),
            ResourceContent::new("en", "image/png", "photo.png"),
            Box::new(Cursor::new(png_bytes(pixels, pixels))),
        )
        .await
        .unwrap()
}

async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..200 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Wait until the file exists and decodes as a complete image.
async fn wait_for_image(path: &Path) -> Option<DynamicImage> {
    for _ in 0..200 {
        if let Ok(image) = image::open(path) {
            return Some(image);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

fn thumbnail_path(temp: &TempDir, resource: &Resource, width: u32, height: u32) -> PathBuf {
    preview_paths::preview_file(
        &temp.path().join("main"),
        resource,
        &Language::from("en"),
        &ImageStyle::new("thumbnail", width, height, ScalingMode::Crop),
        "png",
    )
}

fn original_path(temp: &TempDir, resource: &Resource) -> PathBuf {
    preview_paths::preview_file(
        &temp.path().join("main"),
        resource,
        &Language::from("en"),
        &ImageStyle::original(),
        "png",
    )
}

#[tokio::test]
async fn test_previews_are_rendered_for_new_content() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let repository = connected_repository(&temp, site_with_thumbnail(8, 8)).await;

    let resource = put_image_with_content(&repository, 16).await;

    let original = original_path(&temp, &resource);
    let thumbnail = thumbnail_path(&temp, &resource, 8, 8);

    // The original keeps its dimensions, the thumbnail is cropped
    let original_image = wait_for_image(&original).await.expect("original preview missing");
    assert_eq!(original_image.dimensions(), (16, 16));
    let thumbnail_image = wait_for_image(&thumbnail).await.expect("thumbnail preview missing");
    assert_eq!(thumbnail_image.dimensions(), (8, 8));

    // The style definition is persisted beside the output directory
    let style_definition = preview_paths::style_dir(
        &temp.path().join("main"),
        resource.identifier(),
        "thumbnail",
    )
    .join(preview_paths::STYLE_DEFINITION_FILE);
    assert!(wait_for_file(&style_definition).await);

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_previews_for_multiple_resources_all_complete() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let repository = connected_repository(&temp, site_with_thumbnail(4, 4)).await;

    let mut resources = Vec::new();
    for _ in 0..3 {
        resources.push(put_image_with_content(&repository, 12).await);
    }

    for resource in &resources {
        let thumbnail = thumbnail_path(&temp, resource, 4, 4);
        assert!(
            wait_for_file(&thumbnail).await,
            "missing thumbnail for {}",
            resource.uri()
        );
    }

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_outdated_preview_is_regenerated() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let repository = connected_repository(&temp, site_with_thumbnail(8, 8)).await;

    let resource = put_image_with_content(&repository, 16).await;
    let thumbnail = thumbnail_path(&temp, &resource, 8, 8);
    assert!(wait_for_file(&thumbnail).await);

    // Backdate the preview so it predates the content modification
    let stale = filetime::FileTime::from_unix_time(1_000_000, 0);
    filetime::set_file_mtime(&thumbnail, stale).unwrap();
    filetime::set_file_mtime(original_path(&temp, &resource), stale).unwrap();

    repository.create_all_previews().await.unwrap();

    let mut regenerated = false;
    for _ in 0..200 {
        let mtime = filetime::FileTime::from_last_modification_time(
            &std::fs::metadata(&thumbnail).unwrap(),
        );
        if mtime.unix_seconds() > stale.unix_seconds() {
            regenerated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(regenerated, "backdated preview was not regenerated");

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_fresh_preview_is_not_regenerated() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let repository = connected_repository(&temp, site_with_thumbnail(8, 8)).await;

    let resource = put_image_with_content(&repository, 16).await;
    let thumbnail = thumbnail_path(&temp, &resource, 8, 8);
    assert!(wait_for_file(&thumbnail).await);

    // Give the file a timestamp safely newer than the content
    let fresh = filetime::FileTime::from_unix_time(
        chrono::Utc::now().timestamp() + 3_600,
        0,
    );
    filetime::set_file_mtime(&thumbnail, fresh).unwrap();

    repository.create_all_previews().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let mtime =
        filetime::FileTime::from_last_modification_time(&std::fs::metadata(&thumbnail).unwrap());
    assert_eq!(mtime.unix_seconds(), fresh.unix_seconds());

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_delete_content_removes_language_previews() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let repository = connected_repository(&temp, site_with_thumbnail(8, 8)).await;

    let resource = put_image_with_content(&repository, 16).await;
    let thumbnail = thumbnail_path(&temp, &resource, 8, 8);
    assert!(wait_for_file(&thumbnail).await);

    repository
        .delete_content(resource.uri(), &"en".into())
        .await
        .unwrap();

    let language_dir = preview_paths::preview_dir(
        &temp.path().join("main"),
        resource.identifier(),
        "thumbnail",
        &Language::from("en"),
    );
    assert!(!language_dir.exists());

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_changed_style_definition_triggers_cleanup_and_rebuild() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    // First run renders thumbnails at 80x80
    let repository = connected_repository(&temp, site_with_thumbnail(80, 80)).await;
    let resource = put_image_with_content(&repository, 160).await;
    let old_thumbnail = thumbnail_path(&temp, &resource, 80, 80);
    assert!(wait_for_file(&old_thumbnail).await);
    // Let the worker finish the operation before shutting down
    tokio::time::sleep(Duration::from_millis(300)).await;
    repository.disconnect().await.unwrap();

    // Restart with the thumbnail style changed to 120x120
    let repository = connected_repository(&temp, site_with_thumbnail(120, 120)).await;

    // The canonical definition now carries the new dimensions
    let canonical =
        preview_paths::canonical_style_file(&temp.path().join("main"), "thumbnail");
    let persisted: ImageStyle =
        serde_json::from_str(&std::fs::read_to_string(&canonical).unwrap()).unwrap();
    assert_eq!((persisted.width, persisted.height), (120, 120));

    // The outdated output was deleted and the full pass re-renders it
    let new_thumbnail = thumbnail_path(&temp, &resource, 120, 120);
    let rendered = wait_for_image(&new_thumbnail)
        .await
        .expect("thumbnail was not re-rendered after the style change");
    assert_eq!(rendered.dimensions(), (120, 120));

    repository.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_development_environment_skips_eager_rebuild() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    let repository = connected_repository(&temp, site_with_thumbnail(80, 80)).await;
    let resource = put_image_with_content(&repository, 160).await;
    assert!(wait_for_file(&thumbnail_path(&temp, &resource, 80, 80)).await);
    // Let the worker finish the operation before shutting down
    tokio::time::sleep(Duration::from_millis(300)).await;
    repository.disconnect().await.unwrap();

    // Restart in development with a changed style definition
    let development = FileSystemContentRepository::new(
        RepositoryConfig::new(temp.path()),
        Arc::new(SerializerRegistry::with_defaults()),
    );
    development.set_environment(Environment::Development);
    development
        .connect(site_with_thumbnail(120, 120))
        .await
        .unwrap();

    // Outdated outputs are still deleted and the definition updated
    let style_dir = preview_paths::style_dir(
        &temp.path().join("main"),
        resource.identifier(),
        "thumbnail",
    );
    assert!(!style_dir.exists());
    let canonical =
        preview_paths::canonical_style_file(&temp.path().join("main"), "thumbnail");
    let persisted: ImageStyle =
        serde_json::from_str(&std::fs::read_to_string(&canonical).unwrap()).unwrap();
    assert_eq!((persisted.width, persisted.height), (120, 120));

    // In development no eager regeneration happens
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(!thumbnail_path(&temp, &resource, 120, 120).exists());

    development.disconnect().await.unwrap();
}

//! Integration tests for the filesystem content repository: round trips,
//! deletes, moves, listing and index rebuilds.

use std::io::Cursor;
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use strata::preview::paths as preview_paths;
use strata::repository::storage;
use strata::{
    Attribution, ContentRepository, FileSystemContentRepository, RepositoryConfig, Resource,
    ResourceContent, ResourceKind, ResourceSelector, ResourceUri, RepositoryError,
    SerializerRegistry, Site, Version, WritableContentRepository,
};

fn site() -> Site {
    // No image styles: repository tests run without preview generation
    Site::new("main").with_language("en")
}

async fn repository() -> (FileSystemContentRepository, TempDir) {
    let temp = TempDir::new().unwrap();
    let repository = FileSystemContentRepository::new(
        RepositoryConfig::new(temp.path()),
        Arc::new(SerializerRegistry::with_defaults()),
    );
    repository.connect(site()).await.unwrap();
    (repository, temp)
}

fn page(path: &str) -> Resource {
    let mut page = Resource::new(
        "main",
        ResourceKind::Page {
            template: "default".to_string(),
            references: Vec::new(),
        },
    )
    .with_path(path)
    .with_version(Version::Live);
    page.set_created(Attribution::now("editor"));
    page
}

fn file_resource() -> Resource {
    Resource::new("main", ResourceKind::File).with_version(Version::Live)
}

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let (repository, _temp) = repository().await;

    let resource = page("/about").with_subject("company");
    let stored = repository.put(resource.clone(), true).await.unwrap();

    let loaded = repository.get(stored.uri()).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.uri().path(), Some("/about"));
}

#[tokio::test]
async fn test_get_resolves_type_from_index() {
    let (repository, _temp) = repository().await;
    let stored = repository.put(page("/typed"), true).await.unwrap();

    // A uri without a type resolves against the index
    let untyped = ResourceUri::new(
        "main",
        None,
        None,
        stored.identifier(),
        Version::Live,
    );
    let loaded = repository.get(&untyped).await.unwrap().unwrap();
    assert_eq!(loaded.type_name(), "page");

    // A set but mismatching type is absence, not an error
    let mismatched = untyped.with_type("image");
    assert!(repository.get(&mismatched).await.unwrap().is_none());
}

#[tokio::test]
async fn test_numeric_revision_is_read_from_storage() {
    let (repository, _temp) = repository().await;

    let live = repository.put(page("/rev"), true).await.unwrap();
    let revision = live.clone().with_version(Version::Revision(2));
    repository.put(revision.clone(), true).await.unwrap();

    let loaded = repository
        .get(&live.uri().with_version(Version::Revision(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.version(), Version::Revision(2));
    assert_eq!(loaded.identifier(), live.identifier());
}

#[tokio::test]
async fn test_index_inconsistency_is_not_found() {
    let (repository, temp) = repository().await;

    let live = repository.put(page("/ghost"), true).await.unwrap();
    let revision = live.clone().with_version(Version::Revision(2));
    repository.put(revision.clone(), true).await.unwrap();

    // Remove the revision's storage bytes behind the repository's back
    let document = storage::document_path(
        &temp.path().join("main"),
        "page",
        live.identifier(),
        Version::Revision(2),
    );
    std::fs::remove_file(&document).unwrap();

    let result = repository
        .get(&live.uri().with_version(Version::Revision(2)))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_put_rejects_new_resource_with_content() {
    let (repository, _temp) = repository().await;

    let mut resource = file_resource();
    resource.add_content(ResourceContent::new("en", "text/plain", "notes.txt"));

    let err = repository.put(resource, true).await.unwrap_err();
    assert!(matches!(err, RepositoryError::State(_)));
}

#[tokio::test]
async fn test_put_content_requires_existing_resource() {
    let (repository, _temp) = repository().await;

    let missing = ResourceUri::new(
        "main",
        Some("file".to_string()),
        None,
        Uuid::new_v4(),
        Version::Live,
    );
    let content = ResourceContent::new("en", "text/plain", "notes.txt");
    let err = repository
        .put_content(&missing, content, Box::new(Cursor::new(b"hello".to_vec())))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::State(_)));
}

#[tokio::test]
async fn test_put_content_round_trip_with_digest() {
    let (repository, _temp) = repository().await;

    let stored = repository.put(file_resource(), true).await.unwrap();
    let content = ResourceContent::new("en", "text/plain", "notes.txt");
    let updated = repository
        .put_content(
            stored.uri(),
            content,
            Box::new(Cursor::new(b"hello world".to_vec())),
        )
        .await
        .unwrap();

    let entry = updated.content(&"en".into()).unwrap();
    assert_eq!(entry.size, 11);
    assert!(entry.digest.is_some());

    let mut stream = repository
        .get_content(stored.uri(), &"en".into())
        .await
        .unwrap()
        .unwrap();
    let mut bytes = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut bytes)
        .await
        .unwrap();
    assert_eq!(bytes, b"hello world");
}

#[tokio::test]
async fn test_put_content_rejects_incompatible_mime_type() {
    let (repository, _temp) = repository().await;

    let image = Resource::new(
        "main",
        ResourceKind::Image {
            width: 10,
            height: 10,
        },
    )
    .with_version(Version::Live);
    let stored = repository.put(image, true).await.unwrap();

    let content = ResourceContent::new("en", "video/mp4", "clip.mp4");
    let err = repository
        .put_content(stored.uri(), content, Box::new(Cursor::new(Vec::new())))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::State(_)));
}

#[tokio::test]
async fn test_delete_content_removes_single_language() {
    let (repository, _temp) = repository().await;

    let stored = repository.put(file_resource(), true).await.unwrap();
    repository
        .put_content(
            stored.uri(),
            ResourceContent::new("en", "text/plain", "notes.txt"),
            Box::new(Cursor::new(b"english".to_vec())),
        )
        .await
        .unwrap();
    repository
        .put_content(
            stored.uri(),
            ResourceContent::new("de", "text/plain", "notizen.txt"),
            Box::new(Cursor::new(b"deutsch".to_vec())),
        )
        .await
        .unwrap();

    let updated = repository
        .delete_content(stored.uri(), &"en".into())
        .await
        .unwrap();
    assert!(updated.content(&"en".into()).is_none());
    assert!(updated.content(&"de".into()).is_some());

    assert!(repository
        .get_content(stored.uri(), &"en".into())
        .await
        .unwrap()
        .is_none());
    assert!(repository
        .get_content(stored.uri(), &"de".into())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let (repository, _temp) = repository().await;

    let live = repository.put(page("/gone"), true).await.unwrap();
    let work = live.clone().with_version(Version::Work);
    repository.put(work, true).await.unwrap();

    assert!(repository.delete(live.uri(), true).await.unwrap());
    assert!(repository.get(live.uri()).await.unwrap().is_none());
    assert!(!repository
        .exists_in_any_version(live.uri())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_delete_single_revision_keeps_others() {
    let (repository, _temp) = repository().await;

    let live = repository.put(page("/partial"), true).await.unwrap();
    let work = live.clone().with_version(Version::Work);
    repository.put(work.clone(), true).await.unwrap();

    assert!(repository.delete(work.uri(), false).await.unwrap());
    assert!(repository.get(work.uri()).await.unwrap().is_none());
    assert!(repository.get(live.uri()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_unknown_resource_returns_false() {
    let (repository, _temp) = repository().await;
    let unknown = ResourceUri::new(
        "main",
        Some("page".to_string()),
        None,
        Uuid::new_v4(),
        Version::Live,
    );
    assert!(!repository.delete(&unknown, false).await.unwrap());
}

#[tokio::test]
async fn test_delete_of_referenced_resource_is_refused() {
    let (repository, _temp) = repository().await;

    let image = Resource::new(
        "main",
        ResourceKind::Image {
            width: 10,
            height: 10,
        },
    )
    .with_version(Version::Live);
    let image = repository.put(image, true).await.unwrap();

    let mut embedding = Resource::new(
        "main",
        ResourceKind::Page {
            template: "default".to_string(),
            references: vec![image.identifier()],
        },
    )
    .with_path("/embeds")
    .with_version(Version::Live);
    embedding.set_created(Attribution::now("editor"));
    let embedding = repository.put(embedding, true).await.unwrap();

    let err = repository.delete(image.uri(), false).await.unwrap_err();
    match err {
        RepositoryError::ReferentialIntegrity { referenced_by } => {
            assert_eq!(referenced_by, embedding.identifier());
        }
        other => panic!("expected referential integrity error, got {:?}", other),
    }
    // The refused delete must not have touched the index
    assert!(repository.exists(image.uri()).await.unwrap());

    // Dropping the embedding page unblocks the delete
    assert!(repository.delete(embedding.uri(), true).await.unwrap());
    assert!(repository.delete(image.uri(), false).await.unwrap());
}

#[tokio::test]
async fn test_get_versions_lists_all_revisions() {
    let (repository, _temp) = repository().await;

    let live = repository.put(page("/versions"), true).await.unwrap();
    repository
        .put(live.clone().with_version(Version::Work), true)
        .await
        .unwrap();
    repository
        .put(live.clone().with_version(Version::Revision(2)), true)
        .await
        .unwrap();

    let versions = repository.get_versions(live.uri()).await.unwrap();
    let mut found: Vec<Version> = versions.iter().map(|u| u.version()).collect();
    found.sort();
    assert_eq!(
        found,
        vec![Version::Live, Version::Work, Version::Revision(2)]
    );
}

#[tokio::test]
async fn test_move_preserves_identifier_and_content_across_revisions() {
    let (repository, _temp) = repository().await;

    let live = repository.put(page("/docs"), true).await.unwrap();
    repository
        .put(live.clone().with_version(Version::Work), true)
        .await
        .unwrap();

    let child = repository.put(page("/docs/setup"), true).await.unwrap();

    repository.move_to(live.uri(), "/manual", true).await.unwrap();

    let moved_live = repository.get(live.uri()).await.unwrap().unwrap();
    assert_eq!(moved_live.identifier(), live.identifier());
    assert_eq!(moved_live.uri().path(), Some("/manual"));

    let moved_work = repository
        .get(&live.uri().with_version(Version::Work))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved_work.uri().path(), Some("/manual"));

    let moved_child = repository.get(child.uri()).await.unwrap().unwrap();
    assert_eq!(moved_child.uri().path(), Some("/manual/setup"));

    // The old paths are gone from the repository's listing
    let paths: Vec<String> = repository
        .list(&ResourceSelector::new())
        .await
        .unwrap()
        .into_iter()
        .filter_map(|u| u.path().map(str::to_string))
        .collect();
    assert!(!paths.contains(&"/docs".to_string()));
    assert!(!paths.contains(&"/docs/setup".to_string()));
    assert!(paths.contains(&"/manual".to_string()));
    assert!(paths.contains(&"/manual/setup".to_string()));
}

#[tokio::test]
async fn test_move_validates_target_path() {
    let (repository, _temp) = repository().await;
    let live = repository.put(page("/source"), true).await.unwrap();

    assert!(matches!(
        repository.move_to(live.uri(), "", false).await.unwrap_err(),
        RepositoryError::State(_)
    ));
    assert!(matches!(
        repository
            .move_to(live.uri(), "relative/path", false)
            .await
            .unwrap_err(),
        RepositoryError::State(_)
    ));
    // Moving onto itself is a no-op
    repository.move_to(live.uri(), "/source", false).await.unwrap();
}

#[tokio::test]
async fn test_list_applies_filters_offset_and_limit() {
    let (repository, _temp) = repository().await;

    for i in 0..10 {
        repository
            .put(page(&format!("/page-{}", i)), true)
            .await
            .unwrap();
    }
    for _ in 0..3 {
        let image = Resource::new(
            "main",
            ResourceKind::Image {
                width: 10,
                height: 10,
            },
        )
        .with_version(Version::Live);
        repository.put(image, true).await.unwrap();
    }

    let all_pages = repository
        .list(&ResourceSelector::new().with_types(["page"]))
        .await
        .unwrap();
    assert_eq!(all_pages.len(), 10);

    let selector = ResourceSelector::new()
        .with_types(["page"])
        .with_offset(2)
        .with_limit(3);
    let window = repository.list(&selector).await.unwrap();

    // Offset and limit apply after filtering, in enumeration order
    assert_eq!(window.len(), 3);
    assert_eq!(window, all_pages[2..5].to_vec());
}

#[tokio::test]
async fn test_list_filters_by_identifier_and_version() {
    let (repository, _temp) = repository().await;

    let first = repository.put(page("/one"), true).await.unwrap();
    repository
        .put(first.clone().with_version(Version::Work), true)
        .await
        .unwrap();
    repository.put(page("/two"), true).await.unwrap();

    let by_id = repository
        .list(&ResourceSelector::new().with_identifiers([first.identifier()]))
        .await
        .unwrap();
    assert_eq!(by_id.len(), 2);

    let live_only = repository
        .list(
            &ResourceSelector::new()
                .with_identifiers([first.identifier()])
                .with_versions([Version::Live]),
        )
        .await
        .unwrap();
    assert_eq!(live_only.len(), 1);
    assert_eq!(live_only[0].version(), Version::Live);
}

#[tokio::test]
async fn test_online_reindex_preserves_counts() {
    let (repository, _temp) = repository().await;

    for i in 0..4 {
        let live = repository
            .put(page(&format!("/reindex-{}", i)), true)
            .await
            .unwrap();
        repository
            .put(live.clone().with_version(Version::Work), true)
            .await
            .unwrap();
    }
    let resources = repository.resource_count().await.unwrap();
    let revisions = repository.revision_count().await.unwrap();
    assert_eq!(resources, 4);
    assert_eq!(revisions, 8);

    repository.index().await.unwrap();

    assert_eq!(repository.resource_count().await.unwrap(), resources);
    assert_eq!(repository.revision_count().await.unwrap(), revisions);
    assert!(!repository.is_read_only());
    assert!(!repository.is_indexing());
}

#[tokio::test]
async fn test_rebuild_after_index_corruption() {
    let temp = TempDir::new().unwrap();
    let config = RepositoryConfig::new(temp.path());

    let repository = FileSystemContentRepository::new(
        config.clone(),
        Arc::new(SerializerRegistry::with_defaults()),
    );
    repository.connect(site()).await.unwrap();

    let mut expected_paths = Vec::new();
    for i in 0..5 {
        let live = repository
            .put(page(&format!("/fixture-{}", i)), true)
            .await
            .unwrap();
        repository
            .put(live.clone().with_version(Version::Work), true)
            .await
            .unwrap();
        expected_paths.push(format!("/fixture-{}", i));
    }
    let resources = repository.resource_count().await.unwrap();
    let revisions = repository.revision_count().await.unwrap();
    repository.disconnect().await.unwrap();

    // Simulate a corrupted index file
    let index_file = temp
        .path()
        .join("main")
        .join("index")
        .join("documents.json");
    std::fs::write(&index_file, b"\0\0 not an index \0").unwrap();

    let reopened = FileSystemContentRepository::new(
        config,
        Arc::new(SerializerRegistry::with_defaults()),
    );
    reopened.connect(site()).await.unwrap();

    assert_eq!(reopened.resource_count().await.unwrap(), resources);
    assert_eq!(reopened.revision_count().await.unwrap(), revisions);

    let listed: Vec<String> = reopened
        .list(&ResourceSelector::new().with_versions([Version::Live]))
        .await
        .unwrap()
        .into_iter()
        .filter_map(|u| u.path().map(str::to_string))
        .collect();
    for path in expected_paths {
        assert!(listed.contains(&path), "missing {} after rebuild", path);
    }
}

#[tokio::test]
async fn test_operations_require_connection() {
    let temp = TempDir::new().unwrap();
    let repository = FileSystemContentRepository::new(
        RepositoryConfig::new(temp.path()),
        Arc::new(SerializerRegistry::with_defaults()),
    );

    let uri = ResourceUri::new(
        "main",
        Some("page".to_string()),
        None,
        Uuid::new_v4(),
        Version::Live,
    );
    assert!(matches!(
        repository.get(&uri).await.unwrap_err(),
        RepositoryError::NotConnected
    ));
    assert!(matches!(
        repository.put(page("/x"), true).await.unwrap_err(),
        RepositoryError::NotConnected
    ));
}

#[tokio::test]
async fn test_second_instance_cannot_own_the_same_site() {
    let (repository, temp) = repository().await;

    let second = FileSystemContentRepository::new(
        RepositoryConfig::new(temp.path()),
        Arc::new(SerializerRegistry::with_defaults()),
    );
    assert!(matches!(
        second.connect(site()).await.unwrap_err(),
        RepositoryError::State(_)
    ));

    repository.disconnect().await.unwrap();
    second.connect(site()).await.unwrap();
    second.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_deleted_resource_previews_directory_is_removed() {
    let (repository, temp) = repository().await;

    let live = repository.put(page("/with-previews"), true).await.unwrap();

    // Simulate previously rendered previews for the resource
    let preview_dir = preview_paths::preview_dir(
        &temp.path().join("main"),
        live.identifier(),
        "thumbnail",
        &"en".into(),
    );
    std::fs::create_dir_all(&preview_dir).unwrap();
    std::fs::write(preview_dir.join("x-thumbnail.png"), b"png").unwrap();

    repository.delete(live.uri(), true).await.unwrap();
    assert!(!preview_paths::resource_images_dir(
        &temp.path().join("main"),
        live.identifier()
    )
    .exists());
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use store::{MemoryStore, StoreError};

fn create_test_service() -> FileService {
    FileService::new(Box::new(MemoryStore::new()))
}

fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[tokio::test]
async fn test_create_and_get_file() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    let created = service
        .create_file(
            &ctx,
            "dept/service.yaml",
            "kind: rule".to_string(),
            metadata(&[("owner", "infra")]),
        )
        .await
        .unwrap();
    assert_eq!(created.path, "/dept/service.yaml");
    assert_eq!(created.revision, 1);

    let fetched = service.get_file(&ctx, "/dept/service.yaml").await.unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_file_is_stored_under_raw_key() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    service
        .create_file(&ctx, "/a/b", "x".to_string(), BTreeMap::new())
        .await
        .unwrap();

    let (value, _) = service.store().get(&ctx, "/a/b:raw").await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&value).unwrap();
    assert_eq!(json["path"], "/a/b");
    assert_eq!(json["contents"], "x");
    assert!(json.get("revision").is_none());
}

#[tokio::test]
async fn test_create_existing_file_fails() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    service
        .create_file(&ctx, "/a", "one".to_string(), BTreeMap::new())
        .await
        .unwrap();
    let err = service
        .create_file(&ctx, "/a", "two".to_string(), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyExists { ref path } if path == "/a"));

    let file = service.get_file(&ctx, "/a").await.unwrap();
    assert_eq!(file.contents, "one");
}

#[tokio::test]
async fn test_update_missing_file_fails() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    let err = service
        .update_file(&ctx, "/missing", "x".to_string(), BTreeMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { ref path } if path == "/missing"));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_with_stale_revision_conflicts() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    let first = service
        .create_file(&ctx, "/a", "one".to_string(), BTreeMap::new())
        .await
        .unwrap();
    // Any other write moves the store past the revision the caller saw.
    service
        .create_file(&ctx, "/b", "other".to_string(), BTreeMap::new())
        .await
        .unwrap();

    let err = service
        .update_file(
            &ctx,
            "/a",
            "two".to_string(),
            BTreeMap::new(),
            Some(first.revision),
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::Store(StoreError::RevisionMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, first.revision);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    let current = service.get_file(&ctx, "/a").await.unwrap();
    let updated = service
        .update_file(
            &ctx,
            "/a",
            "two".to_string(),
            metadata(&[("v", "2")]),
            Some(current.revision),
        )
        .await
        .unwrap();
    assert_eq!(updated.revision, 3);
    assert_eq!(updated.metadata, metadata(&[("v", "2")]));
}

#[tokio::test]
async fn test_list_files_only_returns_raw_documents() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    for path in ["/dept/b", "/dept/a", "/other/c"] {
        service
            .create_file(&ctx, path, path.to_string(), BTreeMap::new())
            .await
            .unwrap();
    }
    service
        .store()
        .set(&ctx, "/dept/a:parsed", Bytes::from("not json"), None)
        .await
        .unwrap();

    let (files, revision) = service.list_files(&ctx, "/dept").await.unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/dept/a", "/dept/b"]);
    assert_eq!(revision, 4);
    assert!(files.iter().all(|f| f.revision == revision));
}

#[tokio::test]
async fn test_list_reports_malformed_documents() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    service
        .store()
        .set(&ctx, "/broken:raw", Bytes::from("{"), None)
        .await
        .unwrap();

    let err = service.list_files(&ctx, "/").await.unwrap_err();
    assert!(matches!(err, ServiceError::Encoding { ref key, .. } if key == "/broken:raw"));
}

#[tokio::test]
async fn test_delete_file_is_idempotent() {
    let service = create_test_service();
    let ctx = CancellationToken::new();

    service
        .create_file(&ctx, "/a", "x".to_string(), BTreeMap::new())
        .await
        .unwrap();
    let first = service.delete_file(&ctx, "/a").await.unwrap();
    let second = service.delete_file(&ctx, "/a").await.unwrap();
    assert!(second > first);
    assert!(service.get_file(&ctx, "/a").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_cancelled_request_is_reported() {
    let service = create_test_service();
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = service.get_file(&ctx, "/a").await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::Cancelled)));
}

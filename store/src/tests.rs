#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::registry::{BuildFuture, Builder};
use crate::testutil::{self, TestManager};
use crate::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("store=debug")
        .with_test_writer()
        .try_init();
}

async fn memory_manager() -> Result<TestManager> {
    Ok(TestManager::new(Box::new(MemoryStore::new())))
}

#[tokio::test]
async fn test_memory_conformance() {
    init_tracing();
    testutil::run_all(memory_manager).await;
}

#[tokio::test]
async fn test_memory_conformance_through_registry() {
    init_tracing();
    testutil::run_all(|| async {
        let store = default_registrar()
            .new_store("mem:///conformance?watch_buffer=16")
            .await?;
        Ok::<_, StoreError>(TestManager::new(store))
    })
    .await;
}

#[tokio::test]
async fn test_cleanup_hook_runs_after_close() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let manager = TestManager::with_cleanup(Box::new(MemoryStore::new()), move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    manager.cleanup().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// `ETCD_SERVER` takes `host:port`, optionally with an `http://` prefix.
#[cfg(feature = "etcd")]
fn etcd_url() -> Option<String> {
    let server = std::env::var("ETCD_SERVER").ok()?;
    let server = server
        .trim_start_matches("http://")
        .trim_start_matches("etcd://");
    Some(format!("etcd://{server}"))
}

#[cfg(feature = "etcd")]
#[tokio::test]
async fn test_etcd_conformance() {
    init_tracing();
    let Some(url) = etcd_url() else {
        eprintln!("ETCD_SERVER not set, skipping etcd conformance");
        return;
    };
    testutil::run_all(|| {
        let url = url.clone();
        async move {
            let store = default_registrar().new_store(&url).await?;
            Ok::<_, StoreError>(TestManager::new(store))
        }
    })
    .await;
}

#[tokio::test]
async fn test_registrar_resolves_memory() {
    let registrar = default_registrar();
    let store = registrar.new_store("mem:///anything").await.unwrap();
    let ctx = CancellationToken::new();

    let revision = store
        .set(&ctx, "/k", bytes::Bytes::from("v"), None)
        .await
        .unwrap();
    assert_eq!(revision, 1);
    assert_eq!(store.to_string(), "mem:///anything");
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_registrar_rejects_unknown_scheme() {
    let registrar = default_registrar();
    match registrar.new_store("unknown://x").await {
        Err(StoreError::UnknownScheme { scheme, url }) => {
            assert_eq!(scheme, "unknown");
            assert_eq!(url, "unknown://x");
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(store) => panic!("unexpectedly built {store}"),
    }
}

#[tokio::test]
async fn test_registrar_rejects_bad_url() {
    let registrar = default_registrar();
    for connection in ["/tmp/testdata/configroot", "", "::"] {
        match registrar.new_store(connection).await {
            Err(StoreError::InvalidUrl { url, .. }) => assert_eq!(url, connection),
            Err(err) => panic!("{connection:?}: unexpected error: {err}"),
            Ok(store) => panic!("{connection:?}: unexpectedly built {store}"),
        }
    }
}

#[tokio::test]
async fn test_registrar_rejects_bad_options() {
    let registrar = default_registrar();
    let err = registrar
        .new_store("mem:///?watch_buffer=0")
        .await
        .err()
        .expect("zero watch buffer accepted");
    assert!(matches!(err, StoreError::InvalidOption { ref name, .. } if name == "watch_buffer"));
}

fn register_fake(builders: &mut HashMap<String, Builder>) {
    builders.insert("fake".to_string(), build_fake);
}

fn build_fake(url: Url) -> BuildFuture {
    Box::pin(async move {
        let store = MemoryStore::with_options(url.as_str(), StoreOptions::default());
        Ok(Box::new(store) as Box<dyn Store>)
    })
}

#[tokio::test]
async fn test_registrar_uses_custom_builder() {
    let registrar = Registrar::new(&[register_fake]);
    assert_eq!(registrar.schemes(), vec!["fake"]);

    let store = registrar.new_store("fake:///x").await.unwrap();
    assert_eq!(store.to_string(), "fake:///x");

    let err = registrar.new_store("mem:///").await.err().unwrap();
    assert!(matches!(err, StoreError::UnknownScheme { .. }));
}

#[test]
fn test_default_schemes() {
    let registrar = default_registrar();
    let schemes = registrar.schemes();
    assert!(schemes.contains(&"mem"));
    #[cfg(feature = "etcd")]
    assert!(schemes.contains(&"etcd"));
    assert!(format!("{registrar:?}").contains("mem"));
}

#[test]
fn test_key_normalization() {
    assert_eq!(normalize_key("a/b"), "/a/b");
    assert_eq!(normalize_key("/a/b"), "/a/b");
    assert_eq!(prefix_boundary("/test"), "/test/");
    assert_eq!(prefix_boundary("/test/"), "/test/");
    assert_eq!(prefix_boundary(""), "/");
}

#[cfg(feature = "etcd")]
#[tokio::test]
async fn test_etcd_watch_reports_compaction() {
    use futures::StreamExt;
    use std::time::Duration;

    init_tracing();
    let Some(url) = etcd_url() else {
        eprintln!("ETCD_SERVER not set, skipping etcd compaction");
        return;
    };
    let url = Url::parse(&url).unwrap();
    let store = EtcdStore::connect(&url).await.unwrap();
    let ctx = CancellationToken::new();
    let key = "/compaction/key";

    let first = store
        .set(&ctx, key, bytes::Bytes::from("v1"), None)
        .await
        .unwrap();
    store
        .set(&ctx, key, bytes::Bytes::from("v2"), None)
        .await
        .unwrap();
    let last = store
        .set(&ctx, key, bytes::Bytes::from("v3"), None)
        .await
        .unwrap();

    let endpoint = crate::etcd::endpoint(&url).unwrap();
    let mut client = etcd_client::Client::connect([endpoint], None).await.unwrap();
    client.compact(last, None).await.unwrap();

    let mut stream = store.watch(&ctx, "/compaction/", first).await.unwrap();
    let end = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("watch on a compacted revision stayed open");
    assert!(end.is_none(), "unexpected event {end:?}");

    match stream.termination().await {
        Err(StoreError::Compacted {
            requested,
            compacted,
        }) => {
            assert_eq!(requested, first);
            assert!(compacted >= first, "compacted {compacted} < {first}");
        }
        other => panic!("unexpected termination: {other:?}"),
    }

    store.delete(&ctx, key).await.unwrap();
    store.close().await.unwrap();
}

//! Backend-neutral conformance suite.
//!
//! Every backend registered for production use must pass [`run_all`]. Each
//! check asks the factory for a fresh [`TestManager`], so the same suite runs
//! unchanged against an in-process store or a shared etcd cluster. Checks
//! delete the keys they create, and failures panic like any other assertion.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::{Event, EventType, Revision, Store, WatchStream};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A store under test plus whatever must happen after it is closed.
pub struct TestManager {
    store: Box<dyn Store>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl TestManager {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            cleanup: None,
        }
    }

    pub fn with_cleanup(store: Box<dyn Store>, cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            store,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Close the store, then run the extra cleanup even if closing failed.
    pub async fn cleanup(self) -> Result<()> {
        let result = self.store.close().await;
        if let Some(cleanup) = self.cleanup {
            cleanup();
        }
        result
    }
}

/// Run every conformance check against stores produced by `new_manager`.
pub async fn run_all<F, Fut>(new_manager: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    run_store_test(&new_manager).await;
    run_optimistic_concurrency(&new_manager).await;
    run_watcher_test(&new_manager).await;
    run_delete_idempotence(&new_manager).await;
    run_revision_monotonicity(&new_manager).await;
    run_end_to_end(&new_manager).await;
    run_cancellation_test(&new_manager).await;
    run_watch_cancellation(&new_manager).await;
    run_close_test(&new_manager).await;
}

async fn manager<F, Fut>(new_manager: &F) -> TestManager
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    match new_manager().await {
        Ok(manager) => manager,
        Err(err) => panic!("failed to create a new manager: {err}"),
    }
}

async fn finish(manager: TestManager) {
    if let Err(err) = manager.cleanup().await {
        panic!("failure on cleanup: {err}");
    }
}

const GOOD_KEYS: [&str; 4] = [
    "/scopes/global/adapters",
    "/scopes/global/descriptors",
    "/scopes/global/subjects/global/rules",
    "/scopes/global/subjects/svc1.ns.cluster.local/rules",
];

/// CRUD round trips and prefix listing, including a stale optimistic write.
pub async fn run_store_test<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let cases = [
        (
            "subjects",
            "/scopes/global/subjects",
            vec![GOOD_KEYS[2], GOOD_KEYS[3]],
        ),
        ("scopes", "/scopes/", GOOD_KEYS.to_vec()),
    ];

    for (desc, list_prefix, list_keys) in cases {
        let manager = manager(new_manager).await;
        let store = manager.store();
        let ctx = CancellationToken::new();

        let bad_key = "a/b";
        let err = store.get(&ctx, bad_key).await.expect_err("unexpectedly found a/b");
        assert!(err.is_not_found(), "{desc}: unexpected error: {err}");
        let (_, stale) = store.list(&ctx, "").await.unwrap();

        for key in GOOD_KEYS {
            let contents = Bytes::from(key);
            store.set(&ctx, key, contents.clone(), None).await.unwrap();
            let (value, _) = store.get(&ctx, key).await.unwrap();
            assert_eq!(value, contents, "{desc}: wrong value for {key}");
        }

        let err = store
            .set(&ctx, GOOD_KEYS[0], Bytes::from("wrong_data"), Some(stale))
            .await
            .expect_err("set with a stale revision succeeded");
        assert!(err.is_revision_mismatch(), "{desc}: unexpected error: {err}");

        let (original, revision) = store.get(&ctx, GOOD_KEYS[0]).await.unwrap();
        let revision = store
            .set(&ctx, GOOD_KEYS[0], Bytes::from("new data"), Some(revision))
            .await
            .unwrap();
        store
            .set(&ctx, GOOD_KEYS[0], original, Some(revision))
            .await
            .unwrap();

        // Listing twice must give the same answer.
        for _ in 0..2 {
            let (entries, _) = store.list(&ctx, list_prefix).await.unwrap();
            let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
            assert_eq!(keys, list_keys, "{desc}: wrong listing for {list_prefix}");
        }

        store.delete(&ctx, list_keys[1]).await.unwrap();
        let err = store
            .get(&ctx, list_keys[1])
            .await
            .expect_err("deleted key still present");
        assert!(err.is_not_found(), "{desc}: unexpected error: {err}");

        for key in GOOD_KEYS {
            store.delete(&ctx, key).await.unwrap();
        }
        finish(manager).await;
    }
}

#[derive(Debug, Clone, Copy)]
enum Interference {
    SetSameKey,
    SetOtherKey,
    DeleteSameKey,
    GetSameKey,
}

impl Interference {
    fn name(self) -> &'static str {
        match self {
            Self::SetSameKey => "set-foo",
            Self::SetOtherKey => "set-bar",
            Self::DeleteSameKey => "delete-foo",
            Self::GetSameKey => "get-foo",
        }
    }

    /// Whether a write checked against the revision read before this
    /// operation still succeeds afterwards.
    fn keeps_revision(self) -> bool {
        matches!(self, Self::GetSameKey)
    }

    async fn apply(self, store: &dyn Store, ctx: &CancellationToken, prefix: &str) -> Revision {
        let foo = format!("{prefix}foo");
        let result = match self {
            Self::SetSameKey => store.set(ctx, &foo, Bytes::from("foobar"), None).await,
            Self::SetOtherKey => {
                store
                    .set(ctx, &format!("{prefix}bar"), Bytes::from("bar"), None)
                    .await
            }
            Self::DeleteSameKey => store.delete(ctx, &foo).await,
            Self::GetSameKey => store.get(ctx, &foo).await.map(|(_, revision)| revision),
        };
        match result {
            Ok(revision) => revision,
            Err(err) => panic!("{}: failure on other operation: {err}", self.name()),
        }
    }
}

/// Any mutation, on any key, invalidates a previously read revision.
pub async fn run_optimistic_concurrency<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    for op in [
        Interference::SetSameKey,
        Interference::SetOtherKey,
        Interference::DeleteSameKey,
        Interference::GetSameKey,
    ] {
        let manager = manager(new_manager).await;
        let store = manager.store();
        let ctx = CancellationToken::new();
        let prefix = format!("/occ/{}/", op.name());
        let foo = format!("{prefix}foo");

        store.set(&ctx, &foo, Bytes::from("foo"), None).await.unwrap();
        let (value, revision) = store.get(&ctx, &foo).await.unwrap();
        assert_eq!(value, Bytes::from("foo"));

        let revision2 = op.apply(store, &ctx, &prefix).await;
        let result = store.set(&ctx, &foo, Bytes::from("bar"), Some(revision)).await;

        if op.keeps_revision() {
            if let Err(err) = result {
                panic!("{}: expected to succeed, but failed: {err}", op.name());
            }
        } else {
            let actual = match result {
                Err(StoreError::RevisionMismatch {
                    expected, actual, ..
                }) => {
                    assert_eq!(expected, revision, "{}: wrong expected revision", op.name());
                    actual
                }
                Err(err) => panic!("{}: unexpected error: {err}", op.name()),
                Ok(rev) => panic!(
                    "{}: set with revision {revision} succeeded at {rev} (revision2: {revision2})",
                    op.name()
                ),
            };
            assert!(actual >= revision2, "{}: actual {actual} < {revision2}", op.name());

            let written = store
                .set(&ctx, &foo, Bytes::from("bar"), Some(actual))
                .await
                .unwrap();
            assert!(written > actual);
        }

        let (value, _) = store.get(&ctx, &foo).await.unwrap();
        assert_eq!(value, Bytes::from("bar"), "{}: wrong value", op.name());

        store.delete(&ctx, &foo).await.unwrap();
        store.delete(&ctx, &format!("{prefix}bar")).await.unwrap();
        finish(manager).await;
    }

    // The largest expected revision is never behind the key.
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();
    let key = "/occ/max/foo";
    let revision = store
        .set(&ctx, key, Bytes::from("foo"), None)
        .await
        .unwrap();
    match store
        .set(&ctx, key, Bytes::from("bar"), Some(Revision::MAX))
        .await
    {
        Ok(written) => assert!(written > revision, "max: {written} <= {revision}"),
        Err(err) => panic!("max: set with Revision::MAX failed: {err}"),
    }
    let (value, _) = store.get(&ctx, key).await.unwrap();
    assert_eq!(value, Bytes::from("bar"));
    store.delete(&ctx, key).await.unwrap();
    finish(manager).await;
}

async fn next_event(stream: &mut WatchStream) -> Event {
    match tokio::time::timeout(EVENT_TIMEOUT, stream.next()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("watch on {} closed early", stream.prefix()),
        Err(_) => panic!("timed out waiting for an event on {}", stream.prefix()),
    }
}

async fn expect_closed(stream: &mut WatchStream) {
    match tokio::time::timeout(EVENT_TIMEOUT, stream.next()).await {
        Ok(None) => {}
        Ok(Some(event)) => panic!("unexpected event after cancel: {event:?}"),
        Err(_) => panic!("watch on {} was not closed", stream.prefix()),
    }
}

/// Watch delivers put/put/overwrite/delete under the prefix in commit order
/// and skips keys outside it.
pub async fn run_watcher_test<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();

    for key in ["/test/k1", "/test/k2", "/test2/k1"] {
        store.delete(&ctx, key).await.unwrap();
    }
    let (_, rv) = store.list(&ctx, "").await.unwrap();

    let watch_ctx = ctx.child_token();
    let mut stream = store.watch(&watch_ctx, "/test/", rv + 1).await.unwrap();

    let rv = store
        .set(&ctx, "/test/k1", Bytes::from("v1"), Some(rv))
        .await
        .unwrap();
    let rv = store
        .set(&ctx, "/test2/k1", Bytes::from("v21"), Some(rv))
        .await
        .unwrap();
    let rv = store
        .set(&ctx, "/test/k2", Bytes::from("v2"), Some(rv))
        .await
        .unwrap();
    store
        .set(&ctx, "/test/k1", Bytes::from("v11"), Some(rv))
        .await
        .unwrap();
    store.delete(&ctx, "/test/k2").await.unwrap();

    let expected = [
        (EventType::Put, "/test/k1", "v1", None),
        (EventType::Put, "/test/k2", "v2", None),
        (EventType::Put, "/test/k1", "v11", Some("v1")),
        (EventType::Delete, "/test/k2", "", Some("v2")),
    ];
    let mut events = Vec::with_capacity(expected.len());
    while events.len() < expected.len() {
        events.push(next_event(&mut stream).await);
    }

    for (event, (event_type, key, value, previous)) in events.iter().zip(expected) {
        assert_eq!(event.event_type, event_type, "wrong type in {event:?}");
        assert_eq!(event.key, key, "wrong key in {event:?}");
        assert_eq!(event.value, Bytes::from(value), "wrong value in {event:?}");
        assert_eq!(
            event.previous_value,
            previous.map(Bytes::from),
            "wrong previous value in {event:?}"
        );
    }
    for pair in events.windows(2) {
        assert!(pair[0].revision < pair[1].revision, "out of order: {pair:?}");
    }

    watch_ctx.cancel();
    expect_closed(&mut stream).await;
    assert!(stream.termination().await.is_ok());

    for key in ["/test/k1", "/test2/k1"] {
        store.delete(&ctx, key).await.unwrap();
    }
    finish(manager).await;
}

/// Deleting an absent key succeeds and still advances the revision.
pub async fn run_delete_idempotence<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();
    let key = "/idempotence/absent";

    let (_, before) = store.list(&ctx, "").await.unwrap();
    let first = store.delete(&ctx, key).await.unwrap();
    let second = store.delete(&ctx, key).await.unwrap();
    assert!(first > before, "delete did not advance {before} -> {first}");
    assert!(second > first, "delete did not advance {first} -> {second}");
    assert!(store.get(&ctx, key).await.unwrap_err().is_not_found());

    finish(manager).await;
}

/// Mutation revisions never go backwards and reads never lag behind them.
pub async fn run_revision_monotonicity<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();

    let (_, mut last) = store.list(&ctx, "").await.unwrap();
    for i in 0..10 {
        let key = format!("/monotonic/{}", i % 3);
        let revision = if i % 4 == 3 {
            store.delete(&ctx, &key).await.unwrap()
        } else {
            store
                .set(&ctx, &key, Bytes::from(format!("{i}")), Some(last))
                .await
                .unwrap()
        };
        assert!(revision > last, "revision went from {last} to {revision}");
        let (_, observed) = store.list(&ctx, "/monotonic").await.unwrap();
        assert!(observed >= revision, "list at {observed} lags write at {revision}");
        last = revision;
    }

    for i in 0..3 {
        store.delete(&ctx, &format!("/monotonic/{i}")).await.unwrap();
    }
    finish(manager).await;
}

/// Create, read, stale overwrite, overwrite, delete, read.
pub async fn run_end_to_end<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();
    let key = "/a/b";

    let created = store.set(&ctx, key, Bytes::from("one"), None).await.unwrap();
    let (value, revision) = store.get(&ctx, key).await.unwrap();
    assert_eq!(value, Bytes::from("one"));
    assert!(revision >= created);

    let err = store
        .set(&ctx, key, Bytes::from("stale"), Some(created - 1))
        .await
        .unwrap_err();
    assert!(err.is_revision_mismatch(), "unexpected error: {err}");

    let updated = store
        .set(&ctx, key, Bytes::from("two"), Some(revision))
        .await
        .unwrap();
    assert!(updated > revision);
    let (value, _) = store.get(&ctx, key).await.unwrap();
    assert_eq!(value, Bytes::from("two"));

    let deleted = store.delete(&ctx, key).await.unwrap();
    assert!(deleted > updated);
    assert!(store.get(&ctx, key).await.unwrap_err().is_not_found());

    finish(manager).await;
}

/// A cancelled context fails every operation with `Cancelled` and writes
/// nothing.
pub async fn run_cancellation_test<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let live = CancellationToken::new();
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let key = "/cancelled/key";

    assert!(store.get(&cancelled, key).await.unwrap_err().is_cancelled());
    assert!(store.list(&cancelled, "/").await.unwrap_err().is_cancelled());
    assert!(store
        .set(&cancelled, key, Bytes::from("v"), None)
        .await
        .unwrap_err()
        .is_cancelled());
    assert!(store.delete(&cancelled, key).await.unwrap_err().is_cancelled());
    assert!(store
        .watch(&cancelled, "/", 0)
        .await
        .unwrap_err()
        .is_cancelled());

    assert!(store.get(&live, key).await.unwrap_err().is_not_found());
    finish(manager).await;
}

/// Cancelling the subscriber's context closes the stream gracefully.
pub async fn run_watch_cancellation<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();

    let watch_ctx = ctx.child_token();
    let mut stream = store.watch(&watch_ctx, "/cancel/", 0).await.unwrap();
    store
        .set(&ctx, "/cancel/k", Bytes::from("v"), None)
        .await
        .unwrap();
    let event = next_event(&mut stream).await;
    assert_eq!(event.key, "/cancel/k");

    watch_ctx.cancel();
    expect_closed(&mut stream).await;
    assert!(stream.termination().await.is_ok());

    store.delete(&ctx, "/cancel/k").await.unwrap();
    finish(manager).await;
}

/// Every operation fails with `Closed` once the store is closed.
pub async fn run_close_test<F, Fut>(new_manager: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<TestManager>>,
{
    let manager = manager(new_manager).await;
    let store = manager.store();
    let ctx = CancellationToken::new();
    let key = "/closed/key";

    store.close().await.unwrap();

    assert!(matches!(store.get(&ctx, key).await, Err(StoreError::Closed)));
    assert!(matches!(store.list(&ctx, "/").await, Err(StoreError::Closed)));
    assert!(matches!(
        store.set(&ctx, key, Bytes::from("v"), None).await,
        Err(StoreError::Closed)
    ));
    assert!(matches!(store.delete(&ctx, key).await, Err(StoreError::Closed)));
    assert!(matches!(
        store.watch(&ctx, "/", 0).await,
        Err(StoreError::Closed)
    ));

    finish(manager).await;
}

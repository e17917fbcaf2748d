//! In-process store, used as the reference backend and as a test double.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::registry::{BuildFuture, Builder};
use crate::watch::{Delivery, WatchSender, WatchStream};
use crate::{cancellable, normalize_key, prefix_boundary, Event, Revision, Store};

pub const SCHEME: &str = "mem";

/// A map and a revision counter behind one reader/writer lock.
///
/// The conflict check, the mutation, the counter bump and the fan-out to
/// watchers all happen under the same write guard, so watchers observe
/// mutations in exactly the order they committed.
pub struct MemoryStore {
    url: String,
    options: StoreOptions,
    inner: Arc<RwLock<State>>,
}

struct Subscriber {
    /// First revision this subscriber is entitled to.
    start: Revision,
    sender: WatchSender,
}

struct State {
    data: BTreeMap<String, Bytes>,
    revision: Revision,
    closed: bool,
    history: VecDeque<Event>,
    history_limit: usize,
    /// Revision of the newest event evicted from `history`.
    compacted: Revision,
    subscribers: HashMap<u64, Subscriber>,
    next_watch_id: u64,
}

impl State {
    fn new(history_limit: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            revision: 0,
            closed: false,
            history: VecDeque::new(),
            history_limit,
            compacted: 0,
            subscribers: HashMap::new(),
            next_watch_id: 0,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, event: &Event) {
        if self.history_limit == 0 {
            self.compacted = event.revision;
            return;
        }
        self.history.push_back(event.clone());
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compacted = evicted.revision;
            }
        }
    }

    /// Hand a committed event to every matching subscriber. Must be called
    /// with the write lock held, before it is released.
    fn publish(&mut self, event: Event) {
        self.record(&event);

        let mut gone = Vec::new();
        let mut overflowed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            if subscriber.sender.is_cancelled() {
                gone.push(*id);
                continue;
            }
            if event.revision < subscriber.start
                || !event.key.starts_with(subscriber.sender.prefix())
            {
                continue;
            }
            match subscriber.sender.deliver(event.clone()) {
                Delivery::Sent => {}
                Delivery::Gone => gone.push(*id),
                Delivery::Overflow => overflowed.push(*id),
            }
        }

        for id in gone {
            if let Some(subscriber) = self.subscribers.remove(&id) {
                subscriber.sender.finish(Ok(()));
            }
        }
        for id in overflowed {
            if let Some(subscriber) = self.subscribers.remove(&id) {
                subscriber.sender.overflow();
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_options("mem:///", StoreOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: StoreOptions) -> Self {
        let inner = Arc::new(RwLock::new(State::new(options.history)));
        Self {
            url: url.into(),
            options,
            inner,
        }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let options = StoreOptions::from_url(url)?;
        Ok(Self::with_options(url.as_str(), options))
    }

    /// Current revision without touching any key.
    pub async fn revision(&self) -> Revision {
        self.inner.read().await.revision
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<(Bytes, Revision)> {
        let key = normalize_key(key);
        let state = cancellable(ctx, async { Ok(self.inner.read().await) }).await?;
        state.check_open()?;
        let value = state.data.get(&key).cloned();
        value
            .map(|value| (value, state.revision))
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn list(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
    ) -> Result<(BTreeMap<String, Bytes>, Revision)> {
        let prefix = prefix_boundary(prefix);
        let state = cancellable(ctx, async { Ok(self.inner.read().await) }).await?;
        state.check_open()?;
        let entries = state
            .data
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok((entries, state.revision))
    }

    async fn set(
        &self,
        ctx: &CancellationToken,
        key: &str,
        value: Bytes,
        expected_revision: Option<Revision>,
    ) -> Result<Revision> {
        let key = normalize_key(key);
        let mut state = cancellable(ctx, async { Ok(self.inner.write().await) }).await?;
        state.check_open()?;

        if let Some(expected) = expected_revision.filter(|rev| *rev >= 0) {
            if state.revision > expected {
                return Err(StoreError::RevisionMismatch {
                    key,
                    expected,
                    actual: state.revision,
                });
            }
        }

        state.revision += 1;
        let revision = state.revision;
        let previous = state.data.insert(key.clone(), value.clone());
        debug!(%key, revision, "set");
        state.publish(Event::put(key, value, previous, revision));
        Ok(revision)
    }

    async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<Revision> {
        let key = normalize_key(key);
        let mut state = cancellable(ctx, async { Ok(self.inner.write().await) }).await?;
        state.check_open()?;

        state.revision += 1;
        let revision = state.revision;
        debug!(%key, revision, "delete");
        if let Some(previous) = state.data.remove(&key) {
            state.publish(Event::delete(key, Some(previous), revision));
        }
        Ok(revision)
    }

    async fn watch(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
        from_revision: Revision,
    ) -> Result<WatchStream> {
        let prefix = prefix_boundary(prefix);
        let mut state = cancellable(ctx, async { Ok(self.inner.write().await) }).await?;
        state.check_open()?;

        let start = if from_revision > 0 {
            from_revision
        } else {
            state.revision + 1
        };
        if start <= state.compacted {
            return Err(StoreError::Compacted {
                requested: from_revision,
                compacted: state.compacted,
            });
        }

        let replay: Vec<Event> = state
            .history
            .iter()
            .filter(|event| event.revision >= start && event.key.starts_with(&prefix))
            .cloned()
            .collect();

        let (sender, stream) = WatchStream::channel(
            prefix.clone(),
            self.options.watch_buffer + replay.len(),
            ctx.child_token(),
        );
        for event in replay {
            // Capacity covers the replay, so this cannot overflow.
            sender.deliver(event);
        }

        let token = sender.token().clone();
        let id = state.next_watch_id;
        state.next_watch_id += 1;
        state.subscribers.insert(id, Subscriber { start, sender });
        drop(state);

        debug!(%prefix, start, "watch started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            token.cancelled().await;
            let subscriber = inner.write().await.subscribers.remove(&id);
            if let Some(subscriber) = subscriber {
                subscriber.sender.finish(Ok(()));
            }
        });

        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.write().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.data.clear();
        state.history.clear();
        for (_, subscriber) in state.subscribers.drain() {
            // Lets the per-watch cleanup task exit without waiting for the consumer.
            subscriber.sender.token().cancel();
            subscriber.sender.finish(Err(StoreError::Closed));
        }
        info!(store = %self.url, "closed in-memory store");
        Ok(())
    }
}

pub fn register(builders: &mut HashMap<String, Builder>) {
    builders.insert(SCHEME.to_string(), build);
}

fn build(url: Url) -> BuildFuture {
    Box::pin(async move {
        let store = MemoryStore::from_url(&url)?;
        Ok(Box::new(store) as Box<dyn Store>)
    })
}

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::Event;

/// Ordered stream of change events for one subscription.
///
/// Every backend applies the same backpressure policy: events are buffered up
/// to the configured capacity and the producer never waits on a slow consumer.
/// If the buffer fills, the subscription is cut and [`termination`] reports
/// `StoreError::WatchOverflow`. Events are never silently dropped, so a
/// consumer either sees every event in commit order or learns it fell behind.
///
/// Dropping the stream cancels the subscription.
///
/// [`termination`]: WatchStream::termination
pub struct WatchStream {
    prefix: String,
    events: mpsc::Receiver<Event>,
    outcome: oneshot::Receiver<Result<()>>,
    guard: DropGuard,
}

impl WatchStream {
    /// Create a subscription whose producer stops when `cancel` fires.
    pub(crate) fn channel(
        prefix: impl Into<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (WatchSender, WatchStream) {
        let prefix = prefix.into();
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let sender = WatchSender {
            prefix: prefix.clone(),
            capacity: capacity.max(1),
            events: events_tx,
            outcome: outcome_tx,
            cancel: cancel.clone(),
        };
        let stream = WatchStream {
            prefix,
            events: events_rx,
            outcome: outcome_rx,
            guard: cancel.drop_guard(),
        };
        (sender, stream)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next event, or `None` once the producer has closed the stream.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Why the stream ended.
    ///
    /// `Ok(())` for a graceful end: the subscriber cancelled, or the backend's
    /// own watch finished. `Err` for failures such as `WatchOverflow`,
    /// `Compacted`, `Closed` or a backend error. Calling this before the stream
    /// is exhausted cancels the subscription first.
    pub async fn termination(self) -> Result<()> {
        let Self {
            events,
            outcome,
            guard,
            ..
        } = self;
        drop(events);
        drop(guard);
        outcome.await.unwrap_or(Ok(()))
    }
}

impl Stream for WatchStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

pub(crate) enum Delivery {
    Sent,
    /// The subscriber dropped its stream.
    Gone,
    /// The buffer is full; the subscription must be cut.
    Overflow,
}

/// Producer half of a [`WatchStream`].
pub(crate) struct WatchSender {
    prefix: String,
    capacity: usize,
    events: mpsc::Sender<Event>,
    outcome: oneshot::Sender<Result<()>>,
    cancel: CancellationToken,
}

impl WatchSender {
    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }

    pub(crate) fn deliver(&self, event: Event) -> Delivery {
        match self.events.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Overflow,
        }
    }

    pub(crate) fn overflow(self) {
        warn!(
            prefix = %self.prefix,
            capacity = self.capacity,
            "watch subscriber fell behind, cutting subscription"
        );
        let err = StoreError::WatchOverflow {
            prefix: self.prefix.clone(),
            capacity: self.capacity,
        };
        self.finish(Err(err));
    }

    /// Close the stream and publish why.
    pub(crate) fn finish(self, outcome: Result<()>) {
        debug!(prefix = %self.prefix, ok = outcome.is_ok(), "watch finished");
        // The subscriber may already be gone; nobody is left to tell.
        let _ = self.outcome.send(outcome);
    }
}

#![forbid(unsafe_code)]

//! Complaint change feed.
//!
//! Every committed store mutation is published once to every subscriber that is
//! registered at publish time. Each subscriber owns an unbounded channel, so a
//! slow reader never loses events and never stalls the writer. There is no replay:
//! a subscriber only sees events published after it registered, and is expected
//! to take a snapshot query first.
//!
//! Releasing a subscription is mandatory. [`FeedSubscription::cancel`] does it
//! explicitly, and dropping the handle does it implicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use nomorenoise_kernel_contracts::complaint::ComplaintRecord;
use nomorenoise_kernel_contracts::feed::{ChangeEvent, ChangeEventKind, COMPLAINTS_TOPIC};
use tokio::sync::mpsc;
use tokio_stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("unknown feed topic: {0}")]
    UnknownTopic(String),
    #[error("subscription closed")]
    Closed,
    #[error("subscription cancelled")]
    Cancelled,
}

#[derive(Debug, Default)]
struct FeedRegistry {
    subscribers: BTreeMap<SubscriptionId, mpsc::UnboundedSender<ChangeEvent>>,
    next_subscription_id: u64,
    last_seq: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeFeed {
    registry: Arc<Mutex<FeedRegistry>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, FeedRegistry> {
        // The registry holds no invariant a panicking holder could break halfway.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, topic: &str) -> Result<FeedSubscription, FeedError> {
        if topic != COMPLAINTS_TOPIC {
            return Err(FeedError::UnknownTopic(topic.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry();
        registry.next_subscription_id = registry.next_subscription_id.saturating_add(1);
        let id = SubscriptionId(registry.next_subscription_id);
        registry.subscribers.insert(id, tx);
        let subscribers = registry.subscribers.len();
        drop(registry);

        tracing::debug!(subscription_id = %id, subscribers, "feed subscription opened");
        Ok(FeedSubscription {
            id,
            receiver: rx,
            feed: self.clone(),
            cancelled: false,
        })
    }

    /// Fans one event out to every live subscriber and returns its sequence number.
    ///
    /// Callers publish while holding the store's write lock, so sequence order is
    /// commit order.
    pub fn publish(&self, kind: ChangeEventKind, record: ComplaintRecord) -> u64 {
        let mut registry = self.registry();
        registry.last_seq = registry.last_seq.saturating_add(1);
        let event = ChangeEvent::v1(registry.last_seq, kind, record);

        let mut gone = Vec::new();
        for (id, tx) in &registry.subscribers {
            if tx.send(event.clone()).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            registry.subscribers.remove(&id);
            tracing::debug!(subscription_id = %id, "pruned feed subscriber with dropped receiver");
        }

        tracing::trace!(
            seq = event.seq,
            kind = event.kind.as_str(),
            complaint_id = %event.record.complaint_id,
            subscribers = registry.subscribers.len(),
            "feed event published"
        );
        event.seq
    }

    /// Closes a subscription without its handle. The holder still drains events
    /// delivered before the call, then sees [`FeedError::Closed`].
    pub fn revoke(&self, id: SubscriptionId) -> bool {
        let revoked = self.cancel(id);
        if revoked {
            tracing::info!(subscription_id = %id, "feed subscription revoked");
        }
        revoked
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    pub fn last_seq(&self) -> u64 {
        self.registry().last_seq
    }

    fn cancel(&self, id: SubscriptionId) -> bool {
        let removed = self.registry().subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription_id = %id, "feed subscription released");
        }
        removed
    }
}

/// Owned handle to one feed subscription.
///
/// Events arrive in publish order. Dropping the handle releases the subscription.
#[derive(Debug)]
pub struct FeedSubscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    feed: ChangeFeed,
    cancelled: bool,
}

impl FeedSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        if self.cancelled {
            return Err(FeedError::Cancelled);
        }
        self.receiver.recv().await.ok_or(FeedError::Closed)
    }

    /// Returns `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Result<ChangeEvent, FeedError>> {
        if self.cancelled {
            return Some(Err(FeedError::Cancelled));
        }
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(Err(FeedError::Closed)),
        }
    }

    /// Releases the subscription. Events still buffered are discarded.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.feed.cancel(self.id);
            self.receiver.close();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Stream for FeedSubscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

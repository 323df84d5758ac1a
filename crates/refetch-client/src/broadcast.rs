//! Refetch signal publish/subscribe keyed by query ID.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::ClientError;
use crate::fingerprint::QueryId;

/// Completion returned by a subscriber when asked to refetch.
pub type RefetchFuture = BoxFuture<'static, Result<(), ClientError>>;

type Handler = Arc<dyn Fn(QueryId) -> RefetchFuture + Send + Sync>;

#[derive(Default)]
struct Topics {
    next_id: u64,
    subscribers: HashMap<QueryId, Vec<(u64, Handler)>>,
}

/// Topic bus delivering refetch signals to query subscribers.
#[derive(Clone, Default)]
pub struct RefetchBroadcaster {
    topics: Arc<Mutex<Topics>>,
}

impl std::fmt::Debug for RefetchBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock();
        f.debug_struct("RefetchBroadcaster")
            .field("topics", &topics.subscribers.len())
            .finish()
    }
}

impl RefetchBroadcaster {
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for refetch signals on `query_id`.
    pub fn subscribe<F>(&self, query_id: QueryId, handler: F) -> Subscription
    where
        F: Fn(QueryId) -> RefetchFuture + Send + Sync + 'static,
    {
        let mut topics = self.topics.lock();
        topics.next_id += 1;
        let id = topics.next_id;
        topics
            .subscribers
            .entry(query_id)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            query_id,
            id,
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// Invoke every subscriber of `query_id` and return their completions.
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe.
    #[must_use]
    pub fn publish(&self, query_id: QueryId) -> Vec<RefetchFuture> {
        let handlers: Vec<Handler> = self
            .topics
            .lock()
            .subscribers
            .get(&query_id)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect()
            })
            .unwrap_or_default();
        handlers.iter().map(|handler| handler(query_id)).collect()
    }

    /// Number of live subscribers for `query_id`.
    #[must_use]
    pub fn subscriber_count(&self, query_id: QueryId) -> usize {
        self.topics
            .lock()
            .subscribers
            .get(&query_id)
            .map_or(0, Vec::len)
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.topics.lock().subscribers.clear();
    }
}

/// Handle for one subscription.
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    query_id: QueryId,
    id: u64,
    topics: Weak<Mutex<Topics>>,
}

impl Subscription {
    /// Query this subscription listens to.
    #[must_use]
    pub const fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Stop receiving signals. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.lock();
        if let Some(subscribers) = topics.subscribers.get_mut(&self.query_id) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                topics.subscribers.remove(&self.query_id);
            }
        }
    }
}

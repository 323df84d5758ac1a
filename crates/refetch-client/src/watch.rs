//! Live query results that follow refetch signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::Subscription;
use crate::client::{Client, FetchPolicy, QueryOptions};
use crate::document::Document;
use crate::error::ClientError;
use crate::fingerprint::QueryId;
use crate::merge::{merge_pages, merge_variables};

/// Observable state of a watched query.
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    /// Latest data, possibly folded across pages.
    pub data: Option<Value>,
    /// Error of the initial fetch.
    pub error: Option<ClientError>,
    /// `true` until the first result or error arrives.
    pub is_loading: bool,
    /// `true` while a `fetch_more` call is in flight.
    pub is_fetching_more: bool,
}

struct WatchShared {
    client: Client,
    document: Document,
    variables: Value,
    options: QueryOptions,
    state: watch::Sender<WatchState>,
    generation: AtomicU64,
    inflight: Mutex<Option<CancellationToken>>,
}

impl WatchShared {
    /// Cancel the previous fetch and hand out a token for the next one.
    fn begin(&self) -> (u64, CancellationToken) {
        let token = self
            .options
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let mut inflight = self.inflight.lock();
        if let Some(previous) = inflight.replace(token.clone()) {
            previous.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, token)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn fetch(&self, policy: FetchPolicy, refetch: bool) -> Result<(), ClientError> {
        let (generation, token) = self.begin();
        let options = self
            .options
            .clone()
            .with_fetch_policy(policy)
            .with_cancel(token);
        let result = self
            .client
            .execute_query(&self.document, &self.variables, options)
            .await;

        if !self.is_current(generation) {
            return Ok(());
        }
        match result {
            Ok(data) => {
                self.state.send_modify(|state| {
                    state.data = Some(data);
                    state.error = None;
                    state.is_loading = false;
                });
                Ok(())
            }
            Err(ClientError::Canceled) => Ok(()),
            Err(err) if refetch => Err(err),
            Err(err) => {
                self.state.send_modify(|state| {
                    state.data = None;
                    state.error = Some(err);
                    state.is_loading = false;
                });
                Ok(())
            }
        }
    }

    fn cancel_inflight(&self) {
        if let Some(token) = self.inflight.lock().take() {
            token.cancel();
        }
    }
}

/// Handle to a watched query.
///
/// The query refetches whenever a mutation publishes a signal for it.
/// Dropping the handle unsubscribes and cancels any in-flight fetch.
pub struct QueryWatch {
    shared: Arc<WatchShared>,
    subscription: Subscription,
    receiver: watch::Receiver<WatchState>,
}

impl std::fmt::Debug for QueryWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryWatch")
            .field("query_id", &self.subscription.query_id())
            .field("state", &*self.receiver.borrow())
            .finish()
    }
}

impl QueryWatch {
    /// Must be called from within a tokio runtime; the initial fetch is spawned.
    pub(crate) fn start(
        client: Client,
        document: Document,
        variables: Value,
        options: QueryOptions,
    ) -> Self {
        let query_id = client.query_id(&document);
        let cached = client.cached_for(&document, &variables, options.cache);
        let (state, receiver) = watch::channel(WatchState {
            is_loading: cached.is_none(),
            data: cached,
            ..WatchState::default()
        });
        let initial_policy = options.fetch_policy;
        let shared = Arc::new(WatchShared {
            client,
            document,
            variables,
            options,
            state,
            generation: AtomicU64::new(0),
            inflight: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let subscription = shared.client.subscribe_to_query(query_id, move |query_id| {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return Ok(());
                };
                debug!(%query_id, "watched query refetching");
                shared.fetch(FetchPolicy::NetworkOnly, true).await
            }
            .boxed()
        });

        let initial = Arc::clone(&shared);
        tokio::spawn(async move {
            let _ = initial.fetch(initial_policy, false).await;
        });

        Self {
            shared,
            subscription,
            receiver,
        }
    }

    /// Query ID of the watched document.
    #[must_use]
    pub fn query_id(&self) -> QueryId {
        self.subscription.query_id()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        self.receiver.borrow().clone()
    }

    /// New receiver for state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.shared.state.subscribe()
    }

    /// Wait for the next state change.
    pub async fn changed(&mut self) -> Result<WatchState, ClientError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| ClientError::Canceled)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&WatchState) -> bool,
    ) -> Result<WatchState, ClientError> {
        let state = self
            .receiver
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::Canceled)?;
        Ok(state.clone())
    }

    /// Refetch from the network, cancelling any previous in-flight fetch.
    pub async fn refetch(&self) -> Result<(), ClientError> {
        self.shared.fetch(FetchPolicy::NetworkOnly, true).await
    }

    /// Fetch another page and concatenate it into the current data.
    pub async fn fetch_more(&self, variables: Value) -> Result<(), ClientError> {
        self.fetch_more_with(variables, merge_pages).await
    }

    /// Fetch another page and fold it in with `merge(previous, next)`.
    pub async fn fetch_more_with<M>(&self, variables: Value, merge: M) -> Result<(), ClientError>
    where
        M: FnOnce(Value, Value) -> Value,
    {
        let shared = &self.shared;
        let variables = merge_variables(&shared.variables, &variables);
        shared
            .state
            .send_modify(|state| state.is_fetching_more = true);
        let result = shared
            .client
            .execute_query(&shared.document, &variables, shared.options.clone())
            .await;
        shared.state.send_modify(|state| {
            state.is_fetching_more = false;
            if let Ok(next) = &result {
                state.data = Some(match state.data.take() {
                    Some(previous) if !next.is_null() => merge(previous, next.clone()),
                    Some(previous) => previous,
                    None => next.clone(),
                });
            }
        });
        result.map(|_| ())
    }
}

impl Drop for QueryWatch {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        self.shared.cancel_inflight();
    }
}

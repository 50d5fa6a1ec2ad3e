//! Fan-in of asynchronous replies.
//!
//! A caller opens a [`JoinGroup`], adds one open query per request it hands
//! to a proxy and then joins the group with a timeout. Proxies complete their
//! [`QueryTicket`] from whatever task receives the reply.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Tracks all open queries of one NetMeshBase.
pub struct ReturnSynchronizer<K, R> {
    outstanding: Arc<AtomicUsize>,
    _marker: std::marker::PhantomData<fn(K) -> R>,
}

impl<K, R> ReturnSynchronizer<K, R>
where
    K: Eq + Hash + Clone + Send + 'static,
    R: Send + 'static,
{
    /// Creates a synchronizer without open queries.
    pub fn new() -> Self {
        Self {
            outstanding: Arc::new(AtomicUsize::new(0)),
            _marker: std::marker::PhantomData,
        }
    }

    /// Starts a new group of queries that will be joined together.
    pub fn begin_group(&self) -> JoinGroup<K, R> {
        JoinGroup {
            inner: Arc::new(GroupInner {
                open: AtomicUsize::new(0),
                results: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                outstanding: self.outstanding.clone(),
            }),
        }
    }

    /// Number of queries not yet completed, across all groups. Queries of a
    /// group whose tickets are all gone no longer count.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

impl<K, R> Default for ReturnSynchronizer<K, R>
where
    K: Eq + Hash + Clone + Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

struct GroupInner<K, R> {
    open: AtomicUsize,
    results: Mutex<HashMap<K, R>>,
    notify: Notify,
    outstanding: Arc<AtomicUsize>,
}

impl<K, R> Drop for GroupInner<K, R> {
    fn drop(&mut self) {
        // queries nobody can complete any more
        let abandoned = *self.open.get_mut();
        if abandoned > 0 {
            self.outstanding.fetch_sub(abandoned, Ordering::Relaxed);
        }
    }
}

/// A set of queries joined together.
pub struct JoinGroup<K, R> {
    inner: Arc<GroupInner<K, R>>,
}

impl<K, R> JoinGroup<K, R>
where
    K: Eq + Hash + Clone + Send + 'static,
    R: Send + 'static,
{
    /// Registers a query and returns the ticket that completes it.
    pub fn add_open_query(&self, key: K) -> QueryTicket<K, R> {
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        QueryTicket {
            key,
            group: self.inner.clone(),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of queries of this group not yet completed.
    pub fn open_queries(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// True if the query with this key has completed.
    pub fn is_query_complete(&self, key: &K) -> bool {
        self.inner.results.lock().contains_key(key)
    }

    /// Takes the result of a completed query.
    pub fn take_result_for(&self, key: &K) -> Option<R> {
        self.inner.results.lock().remove(key)
    }

    /// Waits until every query of the group has completed.
    ///
    /// `None` waits forever and `Some(Duration::ZERO)` does not wait at all.
    /// Returns true if all queries completed.
    pub async fn join(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.open_queries() == 0 {
                return true;
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        debug!("Join gave up with {} open queries", self.open_queries());
                        return false;
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.open_queries() == 0;
                    }
                }
            }
        }
    }
}

/// Completes one query of a [`JoinGroup`]. Clones share the same query.
pub struct QueryTicket<K, R> {
    key: K,
    group: Arc<GroupInner<K, R>>,
    done: Arc<AtomicBool>,
}

impl<K, R> Clone for QueryTicket<K, R>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            group: self.group.clone(),
            done: self.done.clone(),
        }
    }
}

impl<K, R> QueryTicket<K, R>
where
    K: Eq + Hash + Clone + Send + 'static,
    R: Send + 'static,
{
    /// The key of the query.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Completes the query. Only the first completion counts; returns false
    /// for later ones.
    pub fn complete(&self, result: R) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.group.results.lock().insert(self.key.clone(), result);
        self.group.open.fetch_sub(1, Ordering::SeqCst);
        self.group.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.group.notify.notify_waiters();
        true
    }

    /// True once the query has been completed.
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl<K, R> std::fmt::Debug for QueryTicket<K, R>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTicket")
            .field("key", &self.key)
            .field("done", &self.done.load(Ordering::SeqCst))
            .finish()
    }
}

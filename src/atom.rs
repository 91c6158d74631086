//! A shared value that streams its latest state to every subscriber.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
};

use futures::{
    future::BoxFuture,
    stream::{self, BoxStream},
    FutureExt, Stream, StreamExt,
};
use serde::Serialize;
use tokio::sync::Notify;

use crate::{Emitter, RequestContext, StreamError};

/// A concurrency-safe value cell with update-and-broadcast semantics.
///
/// Every subscriber first receives the value current at the time it subscribed and then each
/// later version. Delivery never blocks the writer: a subscriber holds at most one undelivered
/// version and a newer one replaces it. A slow subscriber therefore observes the latest state,
/// not every intermediate one.
///
/// ```rust
/// use rpcflow::Atom;
///
/// let counter = Atom::new(0u64);
/// counter.update(|n| n + 1);
/// assert_eq!(*counter.get(), 1);
/// ```
pub struct Atom<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    current: Mutex<Current<T>>,
    subscribers: Mutex<HashMap<u64, Arc<Slot<T>>>>,
    next_id: AtomicU64,
}

struct Current<T> {
    version: u64,
    value: Arc<T>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.inner.current();
        f.debug_struct("Atom")
            .field("version", &current.version)
            .field("value", &current.value)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T: Default> Default for Atom<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Inner<T> {
    fn current(&self) -> std::sync::MutexGuard<'_, Current<T>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Slot<T>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Atom<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(Current {
                    version: 0,
                    value: Arc::new(value),
                }),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// A snapshot of the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.current().value.clone()
    }

    /// Incremented by every update, starting at zero.
    pub fn version(&self) -> u64 {
        self.inner.current().version
    }

    /// Replace the value with `f(current)` and broadcast it.
    ///
    /// Updates are serialized. `f` runs while the value is locked so it should be quick and must
    /// not call back into this atom.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Arc<T> {
        let mut current = self.inner.current();
        let value = Arc::new(f(&current.value));
        current.version += 1;
        current.value = value.clone();

        // Offering is non-blocking so it is done under the lock, keeping offers in version order.
        for slot in self.inner.subscribers().values() {
            slot.offer(current.version, value.clone());
        }
        value
    }

    pub fn set(&self, value: T) -> Arc<T> {
        self.update(move |_| value)
    }

    /// How many subscriptions are currently open.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

impl<T: Send + Sync + 'static> Atom<T> {
    /// Subscribe to the value: the current one first, then every later version (coalesced).
    ///
    /// The subscription is removed when the returned stream is dropped.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new());
        self.inner.subscribers().insert(id, slot.clone());

        {
            let current = self.inner.current();
            slot.offer(current.version, current.value.clone());
        }

        let guard = Unsubscribe {
            inner: self.inner.clone(),
            id,
        };
        Subscription {
            stream: stream::unfold((slot, guard), |(slot, guard)| async move {
                let value = slot.next().await;
                Some((value, (slot, guard)))
            })
            .boxed(),
        }
    }
}

impl<T: Serialize + Send + Sync + 'static> Atom<T> {
    /// A stream handler that keeps a client in sync with this atom.
    ///
    /// [`ProcedureBuilder::atom`](crate::procedure::ProcedureBuilder::atom) registers it for you.
    pub fn handler<TCtx: Send + Sync + 'static>(
        &self,
    ) -> impl Fn(RequestContext<TCtx>, (), Emitter<T>) -> BoxFuture<'static, Result<(), StreamError>>
           + Send
           + Sync
           + 'static {
        let atom = self.clone();
        move |ctx: RequestContext<TCtx>, (): (), tx: Emitter<T>| {
            let mut updates = atom.subscribe();
            async move {
                loop {
                    let value = tokio::select! {
                        biased;
                        _ = ctx.cancelled() => return Ok(()),
                        value = updates.next() => value,
                    };
                    let Some(value) = value else { return Ok(()) };

                    tx.emit(None, &*value).await?;
                }
            }
            .boxed()
        }
    }
}

/// The updates of an [`Atom`], starting with its value at subscribe time.
pub struct Subscription<T> {
    stream: BoxStream<'static, Arc<T>>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

/// A subscriber's single-slot mailbox.
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

struct SlotState<T> {
    pending: Option<Arc<T>>,
    // Newest version offered, delivered or not. Older offers are stale.
    version: Option<u64>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                version: None,
            }),
            notify: Notify::new(),
        }
    }

    fn offer(&self, version: u64, value: Arc<T>) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.version.is_some_and(|seen| seen >= version) {
                return;
            }
            state.version = Some(version);
            state.pending = Some(value);
        }
        self.notify.notify_one();
    }

    async fn next(&self) -> Arc<T> {
        loop {
            let pending = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pending
                .take();
            if let Some(value) = pending {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

struct Unsubscribe<T> {
    inner: Arc<Inner<T>>,
    id: u64,
}

impl<T> Drop for Unsubscribe<T> {
    fn drop(&mut self) {
        self.inner.subscribers().remove(&self.id);
    }
}

//! Event dispatcher: fans decoded events out to subscribers.
//!
//! Every subscriber owns a bounded queue and a worker task that feeds the
//! queue to its listener one event at a time. This gives:
//!
//! - per-listener ordering (a listener sees events in arrival order),
//! - isolation (a slow or failing listener never stalls the connection
//!   reader or other listeners),
//! - bounded memory (a full queue applies the configured
//!   [`BackpressurePolicy`]).
//!
//! ```rust,ignore
//! let dispatcher = EventDispatcher::new(DispatchConfig::default());
//!
//! let handle = dispatcher.subscribe(EventFilter::Category(EventCategory::Message), |event| async move {
//!     println!("{}", event.name());
//!     Ok(())
//! });
//!
//! dispatcher.dispatch(Arc::new(event)).await;
//! handle.unsubscribe();
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::{self, Stream};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::config::{BackpressurePolicy, DispatchConfig};
use crate::model::event::{Event, EventCategory};

// =============================================================================
// Listener
// =============================================================================

/// Receives events from the dispatcher.
///
/// Implemented for any `Fn(Arc<Event>) -> impl Future<Output = anyhow::Result<()>>`.
/// Errors and panics are logged and counted; they never reach the
/// connection.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// Which events a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    Any,
    /// Events of one category.
    Category(EventCategory),
}

impl EventFilter {
    /// Returns whether `event` passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Any => true,
            Self::Category(category) => event.category() == *category,
        }
    }
}

impl From<EventCategory> for EventFilter {
    fn from(category: EventCategory) -> Self {
        Self::Category(category)
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    Queued,
    DroppedOldest,
    DroppedNewest,
    Closed,
}

struct QueueState {
    buffer: VecDeque<Arc<Event>>,
    closed: bool,
}

/// Bounded single-consumer queue with pluggable overflow handling.
struct EventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    items: Notify,
    space: Notify,
}

impl EventQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            capacity: capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    async fn push(&self, event: Arc<Event>, policy: BackpressurePolicy) -> Enqueued {
        match policy {
            BackpressurePolicy::DropOldest => {
                let outcome = {
                    let mut state = self.state.lock();
                    if state.closed {
                        return Enqueued::Closed;
                    }
                    let outcome = if state.buffer.len() >= self.capacity {
                        state.buffer.pop_front();
                        Enqueued::DroppedOldest
                    } else {
                        Enqueued::Queued
                    };
                    state.buffer.push_back(event);
                    outcome
                };
                self.items.notify_one();
                outcome
            }
            BackpressurePolicy::DropNewest => self.try_push(event),
            BackpressurePolicy::Block { timeout } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let mut notified = pin!(self.space.notified());
                    notified.as_mut().enable();

                    match self.try_push(Arc::clone(&event)) {
                        Enqueued::DroppedNewest => {}
                        outcome => return outcome,
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_push(event);
                    }
                }
            }
        }
    }

    fn try_push(&self, event: Arc<Event>) -> Enqueued {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Enqueued::Closed;
            }
            if state.buffer.len() >= self.capacity {
                return Enqueued::DroppedNewest;
            }
            state.buffer.push_back(event);
        }
        self.items.notify_one();
        Enqueued::Queued
    }

    async fn pop(&self) -> Option<Arc<Event>> {
        loop {
            let mut notified = pin!(self.items.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(event) = state.buffer.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting events. With `discard`, queued events are dropped;
    /// otherwise the consumer drains them first.
    fn close(&self, discard: bool) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            if discard {
                let n = state.buffer.len();
                state.buffer.clear();
                n
            } else {
                0
            }
        };
        self.items.notify_waiters();
        self.items.notify_one();
        self.space.notify_waiters();
        discarded
    }

    fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events accepted by `dispatch`.
    pub dispatched: u64,
    /// Events lost to backpressure, summed over subscribers.
    pub dropped: u64,
    /// Listener invocations that returned an error or panicked.
    pub listener_failures: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    listener_failures: AtomicU64,
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    queue: Arc<EventQueue>,
    worker: Option<JoinHandle<()>>,
}

struct DispatcherInner {
    config: DispatchConfig,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    counters: Counters,
    closed: AtomicBool,
}

impl DispatcherInner {
    fn remove(&self, id: u64) -> Option<Subscriber> {
        let mut subscribers = self.subscribers.write();
        let index = subscribers.iter().position(|s| s.id == id)?;
        Some(subscribers.remove(index))
    }
}

/// Fans events out to subscribers.
///
/// Cheap to clone; clones share subscribers and counters.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a listener and spawns its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<L: EventListener>(&self, filter: EventFilter, listener: L) -> SubscriptionHandle {
        self.subscribe_arc(filter, Arc::new(listener))
    }

    /// Registers a shared listener and spawns its worker.
    pub fn subscribe_arc(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(EventQueue::new(self.inner.config.queue_capacity));
        let worker = tokio::spawn(run_listener(
            id,
            Arc::clone(&queue),
            listener,
            Arc::downgrade(&self.inner),
        ));
        self.insert(Subscriber {
            id,
            filter,
            queue,
            worker: Some(worker),
        });
        debug!(subscriber = id, filter = ?filter, "Listener subscribed");

        SubscriptionHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a pull-based subscription.
    pub fn stream(&self, filter: EventFilter) -> EventStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(EventQueue::new(self.inner.config.queue_capacity));
        self.insert(Subscriber {
            id,
            filter,
            queue: Arc::clone(&queue),
            worker: None,
        });
        debug!(subscriber = id, filter = ?filter, "Event stream opened");

        EventStream {
            id,
            queue,
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn insert(&self, subscriber: Subscriber) {
        if self.inner.closed.load(Ordering::Acquire) {
            subscriber.queue.close(true);
        }
        self.inner.subscribers.write().push(subscriber);
    }

    /// Enqueues `event` for every matching subscriber.
    ///
    /// Returns the number of subscribers that accepted it. Only waits when a
    /// matching queue is full under [`BackpressurePolicy::Block`].
    pub async fn dispatch(&self, event: Arc<Event>) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            trace!("Dispatcher closed, event discarded");
            return 0;
        }

        let targets: Vec<(u64, Arc<EventQueue>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(&event))
            .map(|s| (s.id, Arc::clone(&s.queue)))
            .collect();
        trace!(event = %event.name(), targets = targets.len(), "Dispatching event");

        self.inner.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let policy = self.inner.config.policy;
        let mut accepted = 0;
        for (id, queue) in targets {
            match queue.push(Arc::clone(&event), policy).await {
                Enqueued::Queued => accepted += 1,
                Enqueued::DroppedOldest => {
                    accepted += 1;
                    self.record_drop(id, "oldest");
                }
                Enqueued::DroppedNewest => self.record_drop(id, "newest"),
                Enqueued::Closed => {}
            }
        }
        accepted
    }

    fn record_drop(&self, id: u64, which: &'static str) {
        let total = self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(subscriber = id, dropped = which, total, "Listener queue full, event dropped");
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        let counters = &self.inner.counters;
        DispatchStats {
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            listener_failures: counters.listener_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops accepting events and lets workers drain their queues.
    ///
    /// Waits up to `grace` for the workers; those still running afterwards
    /// are aborted. Streams see the end of their queue.
    pub async fn close(&self, grace: Duration) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let workers: Vec<JoinHandle<()>> = {
            let mut subscribers = self.inner.subscribers.write();
            subscribers
                .iter_mut()
                .filter_map(|s| {
                    s.queue.close(false);
                    s.worker.take()
                })
                .collect()
        };

        let deadline = Instant::now() + grace;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                warn!("Listener still busy after shutdown grace period, aborting");
                worker.abort();
            }
        }
        debug!("Dispatcher closed");
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .field("policy", &self.inner.config.policy)
            .finish()
    }
}

async fn run_listener(
    id: u64,
    queue: Arc<EventQueue>,
    listener: Arc<dyn EventListener>,
    inner: Weak<DispatcherInner>,
) {
    while let Some(event) = queue.pop().await {
        let outcome = AssertUnwindSafe(listener.on_event(Arc::clone(&event)))
            .catch_unwind()
            .await;

        let failed = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(subscriber = id, event = %event.name(), error = %e, "Listener failed");
                true
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(subscriber = id, event = %event.name(), panic = %message, "Listener panicked");
                true
            }
        };

        if failed && let Some(inner) = inner.upgrade() {
            inner.counters.listener_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
    trace!(subscriber = id, "Listener worker finished");
}

// =============================================================================
// Handles
// =============================================================================

/// Handle to a listener subscription.
///
/// Dropping the handle leaves the listener subscribed; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    inner: Weak<DispatcherInner>,
}

impl SubscriptionHandle {
    /// Returns the subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. Events still queued for it are discarded; an
    /// invocation already running completes.
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Some(subscriber) = inner.remove(self.id) {
            let discarded = subscriber.queue.close(true);
            debug!(subscriber = self.id, discarded, "Listener unsubscribed");
        }
    }
}

/// Pull-based subscription. Dropping it unsubscribes.
pub struct EventStream {
    id: u64,
    queue: Arc<EventQueue>,
    inner: Weak<DispatcherInner>,
}

impl EventStream {
    /// Returns the next event, or `None` once the dispatcher is closed and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.queue.pop().await
    }

    /// Returns the number of events waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send {
        stream::unfold(self, |mut events| async move {
            let event = events.recv().await?;
            Some((event, events))
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.id);
        }
        self.queue.close(true);
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").field("id", &self.id).finish()
    }
}

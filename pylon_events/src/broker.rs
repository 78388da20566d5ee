//! Priority fan-out event broker.
//!
//! Distributes every published event to every live subscriber while
//! preserving (priority, sequence) order within each subscriber, and
//! runs registered server-side callbacks on a tracked background task.
//!
//! Subscriber queues are owned by their [`Subscription`]; the broker
//! keeps only weak handles for fan-out, so a dropped subscription can
//! never leak or stall the publish path.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::error;
use uuid::Uuid;

use pylon_common::background::BackgroundTasks;

use crate::event::{Event, EventId, EvtPriority};

/// String-keyed event payload.
pub type EventPayload = serde_json::Map<String, serde_json::Value>;

/// Boxed future returned by an event callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An in-process event callback. Receives the trigger payload merged
/// over the callback's default arguments.
pub type EventCallback = Arc<dyn Fn(EventPayload) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as an [`EventCallback`].
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(EventPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Process-wide sequence counter; gives every queued event a unique,
/// monotonically increasing tiebreaker within a priority class.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The callback was not registered for the event.
    #[error("callback not registered for event id {0}")]
    CallbackNotFound(u16),
}

/// An event instance queued toward a subscriber.
///
/// Ordering (and equality) consider only the `(priority, seq)` sort
/// key; the payload does not participate.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// The event type descriptor.
    pub event: Event,
    /// Message identifier, shared by every subscriber's copy.
    pub uuid: Uuid,
    /// The event payload.
    pub payload: EventPayload,
    /// Enqueue sequence number.
    pub seq: u64,
}

impl QueuedEvent {
    #[inline]
    fn sort_key(&self) -> (EvtPriority, u64) {
        (self.event.priority, self.seq)
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Serialize for QueuedEvent {
    /// Wire shape: `{uuid, event_id, priority, payload}`.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("QueuedEvent", 4)?;
        state.serialize_field("uuid", &self.uuid)?;
        state.serialize_field("event_id", &self.event.id)?;
        state.serialize_field("priority", &self.event.priority)?;
        state.serialize_field("payload", &self.payload)?;
        state.end()
    }
}

#[derive(Clone)]
struct RegisteredCallback {
    priority: EvtPriority,
    callback: EventCallback,
    defaults: EventPayload,
}

struct SubscriberQueue {
    heap: Mutex<BinaryHeap<Reverse<QueuedEvent>>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn push(&self, event: QueuedEvent) {
        self.heap.lock().push(Reverse(event));
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedEvent> {
        self.heap.lock().pop().map(|Reverse(event)| event)
    }
}

struct BrokerInner {
    subscriber_id: AtomicU64,
    connections: Mutex<HashMap<u64, Weak<SubscriberQueue>>>,
    callbacks: Mutex<HashMap<EventId, Vec<RegisteredCallback>>>,
    tasks: BackgroundTasks,
}

/// The event broker, shared by handle.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<BrokerInner>,
}

impl EventBroker {
    /// Create a broker that runs callback batches on `tasks`.
    pub fn new(tasks: BackgroundTasks) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscriber_id: AtomicU64::new(0),
                connections: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(HashMap::new()),
                tasks,
            }),
        }
    }

    /// Push the event to all subscribed clients.
    ///
    /// Never blocks and never drops; a slow subscriber backpressures
    /// only itself by letting its queue grow. Returns the message uuid
    /// (generated when `uuid` is `None`).
    pub fn publish(&self, event: Event, payload: EventPayload, uuid: Option<Uuid>) -> Uuid {
        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let queued = QueuedEvent {
            event,
            uuid,
            payload,
            seq: SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
        };

        let mut connections = self.inner.connections.lock();
        connections.retain(|_, weak| match weak.upgrade() {
            Some(queue) => {
                queue.push(queued.clone());
                true
            }
            None => false,
        });

        uuid
    }

    /// Publish the event and schedule all callbacks registered for its
    /// id on a background task.
    ///
    /// Callbacks run sequentially in registration-priority order, each
    /// receiving `defaults ∪ payload` (payload keys win). A panicking
    /// callback is logged and does not prevent the remaining callbacks
    /// from running.
    pub fn trigger(&self, event: Event, payload: EventPayload, uuid: Option<Uuid>) -> Uuid {
        let uuid = self.publish(event, payload.clone(), uuid);

        let callbacks = self
            .inner
            .callbacks
            .lock()
            .get(&event.id)
            .cloned()
            .unwrap_or_default();

        if !callbacks.is_empty() {
            let event_id = event.id;
            self.inner.tasks.spawn(async move {
                run_callbacks(event_id, callbacks, payload).await;
            });
        }

        uuid
    }

    /// Register a callback to run when an event is triggered.
    ///
    /// The callback list stays sorted by ascending priority; equal
    /// priorities keep registration order.
    pub fn register_event_callback(
        &self,
        event: Event,
        callback: EventCallback,
        priority: EvtPriority,
        default_kwargs: EventPayload,
    ) {
        let registered = RegisteredCallback {
            priority,
            callback,
            defaults: default_kwargs,
        };

        let mut callbacks = self.inner.callbacks.lock();
        let list = callbacks.entry(event.id).or_default();
        let at = list.partition_point(|c| c.priority <= priority);
        list.insert(at, registered);
    }

    /// Unregister an event callback by identity.
    pub fn unregister_event_callback(
        &self,
        event: Event,
        callback: &EventCallback,
    ) -> Result<(), BrokerError> {
        let mut callbacks = self.inner.callbacks.lock();
        let list = callbacks
            .get_mut(&event.id)
            .ok_or(BrokerError::CallbackNotFound(event.id.0))?;

        match list
            .iter()
            .position(|c| Arc::ptr_eq(&c.callback, callback))
        {
            Some(at) => {
                list.remove(at);
                Ok(())
            }
            None => Err(BrokerError::CallbackNotFound(event.id.0)),
        }
    }

    /// Subscribe to receive server events.
    ///
    /// Each call allocates a fresh unbounded queue. Dropping the
    /// returned [`Subscription`] removes it from the fan-out set.
    pub fn subscribe(&self) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        });
        let id = self
            .inner
            .subscriber_id
            .fetch_add(1, AtomicOrdering::Relaxed);
        self.inner
            .connections
            .lock()
            .insert(id, Arc::downgrade(&queue));

        Subscription {
            id,
            queue,
            broker: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers (for diagnostics and tests).
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

async fn run_callbacks(
    event_id: EventId,
    callbacks: Vec<RegisteredCallback>,
    payload: EventPayload,
) {
    for registered in callbacks {
        let mut kwargs = registered.defaults.clone();
        kwargs.extend(payload.clone());

        // Each callback runs as its own task so a panic is contained
        // without losing the rest of the batch.
        let handle = tokio::spawn((registered.callback)(kwargs));
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(event_id = event_id.0, "event callback panicked: {e}");
            }
        }
    }
}

/// A live subscription to the broker's event stream.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    broker: Weak<BrokerInner>,
}

impl Subscription {
    /// Wait for the next event in (priority, sequence) order.
    pub async fn next(&mut self) -> QueuedEvent {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.pop() {
                return event;
            }
            notified.await;
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<QueuedEvent> {
        self.queue.pop()
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.queue.heap.lock().len()
    }

    /// True when no events are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broker.upgrade() {
            inner.connections.lock().remove(&self.id);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_common::clock::MonotonicClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn broker() -> EventBroker {
        EventBroker::new(BackgroundTasks::new(MonotonicClock::new()))
    }

    fn payload(key: &str, value: i64) -> EventPayload {
        let mut map = EventPayload::new();
        map.insert(key.to_string(), value.into());
        map
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let broker = broker();
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        broker.publish(Event::HEARTBEAT, EventPayload::new(), None);

        assert_eq!(a.next().await.event, Event::HEARTBEAT);
        assert_eq!(b.next().await.event, Event::HEARTBEAT);
    }

    #[tokio::test]
    async fn same_uuid_on_every_copy() {
        let broker = broker();
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        let uuid = broker.publish(Event::PILOT_ADD, EventPayload::new(), None);

        assert_eq!(a.next().await.uuid, uuid);
        assert_eq!(b.next().await.uuid, uuid);
    }

    #[tokio::test]
    async fn drains_by_priority_then_sequence() {
        let broker = broker();
        let mut sub = broker.subscribe();

        broker.publish(Event::PILOT_ADD, payload("n", 1), None);
        broker.publish(Event::RACE_START, EventPayload::new(), None);
        broker.publish(Event::PILOT_ADD, payload("n", 2), None);
        broker.publish(Event::PILOT_ADD, payload("n", 3), None);

        assert_eq!(sub.next().await.event, Event::RACE_START);
        assert_eq!(sub.next().await.payload["n"], 1);
        assert_eq!(sub.next().await.payload["n"], 2);
        assert_eq!(sub.next().await.payload["n"], 3);
    }

    #[tokio::test]
    async fn yielded_sort_keys_are_non_decreasing() {
        let broker = broker();
        let mut sub = broker.subscribe();

        let events = [
            Event::HEARTBEAT,
            Event::RACE_START,
            Event::PILOT_ADD,
            Event::SHUTDOWN,
            Event::PERMISSIONS_UPDATE,
            Event::PILOT_DELETE,
            Event::RACE_STOP,
            Event::HEARTBEAT,
        ];
        for event in events {
            broker.publish(event, EventPayload::new(), None);
        }

        let mut last_key = None;
        for _ in 0..events.len() {
            let queued = sub.next().await;
            let key = (queued.event.priority, queued.seq);
            if let Some(last) = last_key {
                assert!(key >= last, "order violated: {key:?} after {last:?}");
            }
            last_key = Some(key);
        }
        assert!(sub.is_empty());
    }

    #[tokio::test]
    async fn dropped_subscription_leaves_fanout() {
        let broker = broker();
        let sub = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);

        // Publishing to nobody is fine.
        broker.publish(Event::HEARTBEAT, EventPayload::new(), None);
    }

    #[tokio::test]
    async fn callbacks_run_in_priority_order() {
        let clock = MonotonicClock::new();
        let tasks = BackgroundTasks::new(clock);
        let broker = EventBroker::new(tasks.clone());

        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        broker.register_event_callback(
            Event::RACE_START,
            callback(move |_| {
                let order = Arc::clone(&first);
                async move { order.lock().push("high") }
            }),
            EvtPriority::High,
            EventPayload::new(),
        );

        let second = Arc::clone(&order);
        broker.register_event_callback(
            Event::RACE_START,
            callback(move |_| {
                let order = Arc::clone(&second);
                async move { order.lock().push("low") }
            }),
            EvtPriority::Low,
            EventPayload::new(),
        );

        broker.trigger(Event::RACE_START, EventPayload::new(), None);
        tasks.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(*order.lock(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn payload_keys_override_defaults() {
        let tasks = BackgroundTasks::new(MonotonicClock::new());
        let broker = EventBroker::new(tasks.clone());

        let seen = Arc::new(Mutex::new(None));
        let probe = Arc::clone(&seen);
        broker.register_event_callback(
            Event::RACE_STOP,
            callback(move |kwargs| {
                let seen = Arc::clone(&probe);
                async move {
                    *seen.lock() = Some(kwargs);
                }
            }),
            EvtPriority::Lowest,
            payload("laps", 10),
        );

        broker.trigger(Event::RACE_STOP, payload("laps", 3), None);
        tasks.shutdown(Duration::from_secs(1)).await.unwrap();

        let kwargs = seen.lock().clone().unwrap();
        assert_eq!(kwargs["laps"], 3);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_the_rest() {
        let tasks = BackgroundTasks::new(MonotonicClock::new());
        let broker = EventBroker::new(tasks.clone());

        broker.register_event_callback(
            Event::SHUTDOWN,
            callback(|_| async { panic!("callback failure") }),
            EvtPriority::Highest,
            EventPayload::new(),
        );

        let ran = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&ran);
        broker.register_event_callback(
            Event::SHUTDOWN,
            callback(move |_| {
                let ran = Arc::clone(&probe);
                async move {
                    ran.fetch_add(1, AtomicOrdering::SeqCst);
                }
            }),
            EvtPriority::Lowest,
            EventPayload::new(),
        );

        broker.trigger(Event::SHUTDOWN, EventPayload::new(), None);
        tasks.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_by_identity() {
        let broker = broker();

        let cb = callback(|_| async {});
        broker.register_event_callback(
            Event::HEARTBEAT,
            Arc::clone(&cb),
            EvtPriority::Lowest,
            EventPayload::new(),
        );

        broker.unregister_event_callback(Event::HEARTBEAT, &cb).unwrap();
        assert!(matches!(
            broker.unregister_event_callback(Event::HEARTBEAT, &cb),
            Err(BrokerError::CallbackNotFound(_))
        ));
    }

    #[test]
    fn wire_shape() {
        let queued = QueuedEvent {
            event: Event::RACE_START,
            uuid: Uuid::nil(),
            payload: EventPayload::new(),
            seq: 7,
        };
        let wire = serde_json::to_value(&queued).unwrap();
        assert_eq!(wire["event_id"], Event::RACE_START.id.0);
        assert_eq!(wire["priority"], "highest");
        assert!(wire["payload"].as_object().unwrap().is_empty());
        assert!(wire.get("seq").is_none());
    }
}

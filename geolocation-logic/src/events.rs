use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context as TaskContext, Poll},
};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    codes::{AuthorizationStatus, ErrorCode},
    location::{Heading, HeadingFields, Location, LocationFields},
    prelude::*,
};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Handler<T> = Arc<dyn Fn(u64, &T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

struct ChannelInner<T> {
    subscribers: Mutex<Subscribers<T>>,
    clock: Arc<AtomicU64>,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<T: Send + Sync> Unsubscribe for ChannelInner<T> {
    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers)
            .handlers
            .retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Handle to a live subscription, the handler is removed when this is dropped
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    channel: Weak<dyn Unsubscribe>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// A typed fan-out channel.
///
/// Delivery is synchronous, in subscription order, and never buffered: a subscriber only sees
/// values published while it is attached. Handlers are snapshotted before delivery so they may
/// freely subscribe, unsubscribe or publish from inside a callback.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T: Send + Sync + 'static> Channel<T> {
    fn with_clock(clock: Arc<AtomicU64>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    handlers: Vec::new(),
                }),
                clock,
            }),
        }
    }

    fn attach(&self, handler: Handler<T>) -> Subscription {
        let mut subs = lock(&self.inner.subscribers);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.handlers.push((id, handler));
        drop(subs);

        let inner: Arc<dyn Unsubscribe> = self.inner.clone();
        Subscription {
            id,
            channel: Arc::downgrade(&inner),
        }
    }

    /// Call `handler` for every value published until the returned [Subscription] is dropped
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.attach(Arc::new(move |_: u64, value: &T| handler(value)))
    }

    /// Subscribe for exactly one value.
    ///
    /// The subscription is made right away, not on first poll, so anything published after this
    /// returns is observed.
    pub fn once(&self) -> Once<T>
    where
        T: Clone,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let fired_at = Arc::new(AtomicU64::new(NOT_FIRED));
        let stamp = fired_at.clone();

        let subscription = self.attach(Arc::new(move |seq: u64, value: &T| {
            if let Some(tx) = lock(&tx).take() {
                stamp.store(seq, Ordering::SeqCst);
                tx.send(value.clone()).ok();
            }
        }));

        Once {
            rx,
            fired_at,
            _subscription: subscription,
        }
    }

    /// Deliver `value` to every current subscriber, returns how many were called
    pub fn publish(&self, value: T) -> usize {
        let seq = self.inner.clock.fetch_add(1, Ordering::SeqCst);
        let handlers = lock(&self.inner.subscribers)
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect::<Vec<_>>();

        for handler in handlers.iter() {
            handler(seq, &value);
        }

        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).handlers.len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() != 0
    }
}

impl<T: Send + Sync + 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::with_clock(Arc::new(AtomicU64::new(0)))
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = lock(&self.inner.subscribers).handlers.len();
        f.debug_struct("Channel")
            .field("subscribers", &count)
            .finish()
    }
}

const NOT_FIRED: u64 = u64::MAX;

/// A one-shot subscription, resolves to the first value published after it was created.
///
/// Resolves to [None] only if the channel went away. The underlying subscription lives as long as
/// this value, so dropping it (for example when it loses a `select!`) cleans up.
pub struct Once<T> {
    rx: oneshot::Receiver<T>,
    fired_at: Arc<AtomicU64>,
    _subscription: Subscription,
}

impl<T> Once<T> {
    /// Bus sequence number of the value that resolved this, if one has arrived yet
    pub fn fired_at(&self) -> Option<u64> {
        match self.fired_at.load(Ordering::SeqCst) {
            NOT_FIRED => None,
            seq => Some(seq),
        }
    }

    /// Take the value if it already arrived, without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Future for Once<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| res.ok())
    }
}

/// The error channel.
///
/// Every code delivered through it is also kept as the bus's last error, whoever publishes it.
pub struct ErrorChannel {
    channel: Channel<ErrorCode>,
    last: Mutex<Option<ErrorCode>>,
}

impl ErrorChannel {
    fn with_clock(clock: Arc<AtomicU64>) -> Self {
        Self {
            channel: Channel::with_clock(clock),
            last: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&ErrorCode) + Send + Sync + 'static) -> Subscription {
        self.channel.subscribe(handler)
    }

    pub fn once(&self) -> Once<ErrorCode> {
        self.channel.once()
    }

    /// Record `code` as the last error, then deliver it
    pub fn publish(&self, code: ErrorCode) -> usize {
        *lock(&self.last) = Some(code);
        self.channel.publish(code)
    }

    pub fn last(&self) -> Option<ErrorCode> {
        *lock(&self.last)
    }

    pub fn subscriber_count(&self) -> usize {
        self.channel.subscriber_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.channel.has_subscribers()
    }
}

impl fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("subscribers", &self.subscriber_count())
            .field("last", &self.last())
            .finish()
    }
}

/// Raw inbound signal from the native binding, before conversion into typed events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", content = "payload", rename_all = "snake_case")]
pub enum NativeSignal {
    Log(String),
    Error(i32),
    LocationUpdate(LocationFields),
    HeadingUpdate(HeadingFields),
    AuthorizationChanged(i32),
    LocationCapabilityResult(bool),
}

/// The six channels the native binding feeds and everything else listens on.
///
/// Every channel shares one sequence clock so deliveries on different channels can be ordered.
pub struct EventBus {
    pub log: Channel<String>,
    pub error: ErrorChannel,
    pub authorization_changed: Channel<AuthorizationStatus>,
    pub location_update: Channel<Location>,
    pub heading_update: Channel<Heading>,
    pub location_capability_result: Channel<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        let clock = Arc::new(AtomicU64::new(0));
        Self {
            log: Channel::with_clock(clock.clone()),
            error: ErrorChannel::with_clock(clock.clone()),
            authorization_changed: Channel::with_clock(clock.clone()),
            location_update: Channel::with_clock(clock.clone()),
            heading_update: Channel::with_clock(clock.clone()),
            location_capability_result: Channel::with_clock(clock),
        }
    }

    pub fn emit_error(&self, code: ErrorCode) {
        self.error.publish(code);
    }

    /// The most recent error published on this bus, if any
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.error.last()
    }

    /// Convert a raw native signal and publish it on the matching channel
    pub fn dispatch(&self, signal: NativeSignal) -> Result {
        match signal {
            NativeSignal::Log(message) => {
                self.log.publish(message);
            }
            NativeSignal::Error(raw) => self.emit_error(ErrorCode::from_raw(raw)),
            NativeSignal::LocationUpdate(fields) => {
                let location = Location::try_from(fields).context("Bad location payload")?;
                self.location_update.publish(location);
            }
            NativeSignal::HeadingUpdate(fields) => {
                self.heading_update.publish(fields.into());
            }
            NativeSignal::AuthorizationChanged(raw) => {
                self.authorization_changed
                    .publish(AuthorizationStatus::from_raw(raw));
            }
            NativeSignal::LocationCapabilityResult(capable) => {
                self.location_capability_result.publish(capable);
            }
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("error", &self.error)
            .field("authorization_changed", &self.authorization_changed)
            .field("location_update", &self.location_update)
            .field("heading_update", &self.heading_update)
            .field("location_capability_result", &self.location_capability_result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_fan_out_in_subscription_order() {
        let channel = Channel::<u32>::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = seen.clone();
            channel.subscribe(move |v| lock(&seen).push(("a", *v)))
        };
        let b = {
            let seen = seen.clone();
            channel.subscribe(move |v| lock(&seen).push(("b", *v)))
        };

        assert_eq!(channel.publish(1), 2);
        drop(a);
        assert_eq!(channel.publish(2), 1);
        drop(b);
        assert_eq!(channel.publish(3), 0);

        assert_eq!(*lock(&seen), vec![("a", 1), ("b", 1), ("b", 2)]);
    }

    #[test]
    fn test_late_subscriber_misses_history() {
        let channel = Channel::<u32>::default();
        channel.publish(7);

        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let hits = hits.clone();
            channel.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let channel = Arc::new(Channel::<u32>::default());
        let slot = Arc::new(Mutex::new(None::<Subscription>));

        let sub = {
            let slot = slot.clone();
            channel.subscribe(move |_| {
                lock(&slot).take();
            })
        };
        *lock(&slot) = Some(sub);

        assert_eq!(channel.publish(1), 1);
        assert!(!channel.has_subscribers());
    }

    #[tokio::test]
    async fn test_once_takes_first_value_and_cleans_up() {
        let channel = Channel::<u32>::default();
        let once = channel.once();
        assert_eq!(channel.subscriber_count(), 1);

        channel.publish(1);
        channel.publish(2);
        assert_eq!(once.fired_at(), Some(0));
        assert_eq!(once.await, Some(1));
        assert!(!channel.has_subscribers());
    }

    #[test]
    fn test_dropped_once_unsubscribes() {
        let channel = Channel::<u32>::default();
        let once = channel.once();
        drop(once);
        assert_eq!(channel.publish(1), 0);
    }

    #[test]
    fn test_bus_sequence_spans_channels() {
        let bus = EventBus::new();
        let err = bus.error.once();
        let loc = bus.location_capability_result.once();

        bus.location_capability_result.publish(true);
        bus.emit_error(ErrorCode::Network);

        assert!(loc.fired_at() < err.fired_at());
        assert_eq!(bus.last_error(), Some(ErrorCode::Network));
    }

    #[test]
    fn test_direct_error_publish_records_last_error() {
        let bus = EventBus::new();
        let err = bus.error.once();

        assert_eq!(bus.error.publish(ErrorCode::Timeout), 1);
        assert_eq!(bus.last_error(), Some(ErrorCode::Timeout));
        assert_eq!(err.fired_at(), Some(0));
    }

    #[test]
    fn test_dispatch_bad_location_publishes_nothing() {
        let bus = EventBus::new();
        let once = bus.location_update.once();
        let res = bus.dispatch(NativeSignal::LocationUpdate(LocationFields {
            latitude_string: "abc".into(),
            longitude_string: "7.96".into(),
            accuracy: 1.0,
            altitude: 0.0,
            altitude_accuracy: 0.0,
            course: 0.0,
            course_accuracy: 0.0,
            speed: 0.0,
            speed_accuracy: 0.0,
            timestamp: 0,
        }));
        assert!(res.is_err());
        assert_eq!(once.fired_at(), None);
    }

    #[test]
    fn test_dispatch_raw_error_sets_last_error() {
        let bus = EventBus::new();
        assert_eq!(bus.last_error(), None);
        bus.dispatch(NativeSignal::Error(16)).unwrap();
        assert_eq!(bus.last_error(), Some(ErrorCode::Timeout));
    }

    #[test]
    fn test_signal_json_shape() {
        let signal: NativeSignal =
            serde_json::from_str(r#"{"signal":"authorization_changed","payload":4}"#).unwrap();
        assert!(matches!(signal, NativeSignal::AuthorizationChanged(4)));
    }
}

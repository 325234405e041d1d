use std::{
    marker::PhantomData,
    mem,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    awaiter::{Next, ReusableAwaiter},
    codes::ErrorCode,
    events::{Channel, EventBus, Subscription, lock},
    geolocation::Geolocation,
    location::{Heading, Location},
};

/// The two kinds of native watch an [Updater] can drive
pub trait WatchKind: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    const NAME: &'static str;

    fn channel(events: &EventBus) -> &Channel<Self::Item>;

    fn stop_native(geo: &Geolocation);
}

pub struct LocationWatch;

impl WatchKind for LocationWatch {
    type Item = Location;

    const NAME: &'static str = "LocationUpdate";

    fn channel(events: &EventBus) -> &Channel<Location> {
        &events.location_update
    }

    fn stop_native(geo: &Geolocation) {
        geo.stop_updating_location();
    }
}

pub struct HeadingWatch;

impl WatchKind for HeadingWatch {
    type Item = Heading;

    const NAME: &'static str = "HeadingUpdate";

    fn channel(events: &EventBus) -> &Channel<Heading> {
        &events.heading_update
    }

    fn stop_native(geo: &Geolocation) {
        geo.stop_updating_heading();
    }
}

pub type LocationUpdater = Updater<LocationWatch>;
pub type HeadingUpdater = Updater<HeadingWatch>;

struct UpdaterState<T> {
    updating: bool,
    has_error: bool,
    last_error: Option<ErrorCode>,
    /// A value that arrived before anyone asked for it (the first fix)
    primed: Option<T>,
    subscriptions: Vec<Subscription>,
}

struct UpdaterInner<K: WatchKind> {
    geo: Geolocation,
    awaiter: ReusableAwaiter<K::Item>,
    state: Mutex<UpdaterState<K::Item>>,
    _kind: PhantomData<K>,
}

impl<K: WatchKind> UpdaterInner<K> {
    fn deliver(&self, value: K::Item) {
        self.awaiter.try_set_result(value);
    }

    fn fail(&self, code: ErrorCode) {
        self.geo.log(format!("++ error has occurred: {code}"));
        let mut state = lock(&self.state);
        state.has_error = true;
        state.last_error = Some(code);
        drop(state);
        self.stop();
    }

    fn stop(&self) {
        let subscriptions = {
            let mut state = lock(&self.state);
            if !state.updating {
                return;
            }
            state.updating = false;
            mem::take(&mut state.subscriptions)
        };

        self.geo.log("# stop and sending final sentinel");
        drop(subscriptions);
        self.release_native();
        self.awaiter.try_finish();
    }

    /// The native watch is shared, leave it running while anyone else still listens
    fn release_native(&self) {
        if !K::channel(self.geo.events()).has_subscribers() {
            self.geo
                .log(format!("{} has no listeners, stop watching!", K::NAME));
            K::stop_native(&self.geo);
        }
    }
}

/// A restartable stream of location or heading updates.
///
/// Consumers loop on [next](Updater::next) until it yields [None], which marks the end of the stream
/// (after [stop](Updater::stop), an error, or a failed start). Values that arrive while nobody is
/// waiting on `next` are dropped, only the most recent request is ever served.
///
/// Dropping an updater stops it.
pub struct Updater<K: WatchKind> {
    inner: Arc<UpdaterInner<K>>,
}

impl<K: WatchKind> Updater<K> {
    pub fn new(geo: Geolocation) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                geo,
                awaiter: ReusableAwaiter::new(),
                state: Mutex::new(UpdaterState {
                    updating: false,
                    has_error: false,
                    last_error: None,
                    primed: None,
                    subscriptions: Vec::new(),
                }),
                _kind: PhantomData,
            }),
        }
    }

    /// Claim the updating flag, false if this updater is already running
    fn begin(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if state.updating {
            return false;
        }
        state.updating = true;
        state.has_error = false;
        state.last_error = None;
        true
    }

    /// Listen to raw updates and errors directly.
    ///
    /// Takes the state guard so a concurrent stop either sees these subscriptions or wins before them.
    fn attach(&self, state: &mut UpdaterState<K::Item>) {
        let events = self.inner.geo.events();

        let weak = Arc::downgrade(&self.inner);
        let updates = K::channel(events).subscribe(move |value: &K::Item| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.deliver(value.clone());
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let errors = events.error.subscribe(move |code: &ErrorCode| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.fail(*code);
            }
        });

        state.subscriptions.extend([updates, errors]);
    }

    /// Arm the next value.
    ///
    /// The returned handle resolves to the next update, or [None] once the stream has ended. Calling
    /// this again before the previous handle resolved abandons that handle (it resolves to [None]).
    pub fn next(&self) -> Next<K::Item> {
        let mut state = lock(&self.inner.state);
        if let Some(value) = state.primed.take() {
            return Next::ready(Some(value));
        }
        if !state.updating {
            return Next::ready(None);
        }
        self.inner.awaiter.reset()
    }

    /// Stop listening, stop the native watch if nothing else listens, and end the stream
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_updating(&self) -> bool {
        lock(&self.inner.state).updating
    }

    /// Whether the last run ended because of an error on the bus
    pub fn has_error(&self) -> bool {
        lock(&self.inner.state).has_error
    }

    pub fn last_error(&self) -> Option<ErrorCode> {
        lock(&self.inner.state).last_error
    }
}

impl Updater<LocationWatch> {
    /// Run the full request workflow in watch mode and keep listening once the first fix is in.
    ///
    /// Returns false if already updating, or if no first fix could be obtained.
    pub async fn start(&self) -> bool {
        if !self.begin() {
            return false;
        }

        let first = self.inner.geo.request_location_internal(true).await;

        let mut state = lock(&self.inner.state);
        // A stop while the first fix was pending wins over the fix
        let Some(first) = first.filter(|_| state.updating) else {
            state.updating = false;
            drop(state);
            self.inner.geo.log("# start failed");
            self.inner.release_native();
            self.inner.awaiter.try_finish();
            return false;
        };

        if self.inner.awaiter.is_armed() {
            self.inner.deliver(first);
        } else {
            state.primed = Some(first);
        }

        self.attach(&mut state);
        true
    }
}

impl Updater<HeadingWatch> {
    /// Start heading updates, false if already updating or heading isn't supported
    pub fn start(&self) -> bool {
        if !self.inner.geo.supports("start_updating_heading") {
            return false;
        }
        if !self.begin() {
            return false;
        }

        {
            let mut state = lock(&self.inner.state);
            if !state.updating {
                return false;
            }
            self.attach(&mut state);
        }

        self.inner.geo.log("# begin start");
        self.inner.geo.start_updating_heading();

        // A stop that landed before the native start couldn't stop it
        if !self.is_updating() {
            self.inner.release_native();
            return false;
        }
        true
    }
}

impl<K: WatchKind> Drop for Updater<K> {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl<K: WatchKind> std::fmt::Debug for Updater<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Updater")
            .field("kind", &K::NAME)
            .field("updating", &state.updating)
            .field("has_error", &state.has_error)
            .field("last_error", &state.last_error)
            .finish()
    }
}

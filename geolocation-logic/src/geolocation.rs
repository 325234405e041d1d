use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::time::Instant;

use crate::{
    codes::{AuthorizationStatus, DesiredAccuracy, ErrorCode},
    events::{EventBus, lock},
    location::Location,
    permissions::PermissionDebouncer,
    platform::{Backend, NativeBinding, Platform},
    settings::GeolocationOptions,
    updater::{HeadingUpdater, LocationUpdater},
};

struct GeolocationInner {
    backend: Backend,
    events: Arc<EventBus>,
    debouncer: Mutex<PermissionDebouncer>,
}

/// Entry point for location and heading, turns the signal-driven native plugin into awaitable
/// requests and update streams.
///
/// Cheap to clone, every clone shares the same [EventBus] and native binding.
#[derive(Clone)]
pub struct Geolocation {
    inner: Arc<GeolocationInner>,
}

impl Geolocation {
    pub fn new(backend: Backend, options: &GeolocationOptions) -> Self {
        Self::with_event_bus(backend, options, Arc::new(EventBus::new()))
    }

    /// Create a context that publishes on (and listens to) an existing bus
    pub fn with_event_bus(
        backend: Backend,
        options: &GeolocationOptions,
        events: Arc<EventBus>,
    ) -> Self {
        if let Some(binding) = backend.binding() {
            binding.set_return_string_coordinates(true);
            options.apply(binding, backend.platform() == Platform::Android);
        }

        Self {
            inner: Arc::new(GeolocationInner {
                backend,
                events,
                debouncer: Mutex::new(PermissionDebouncer::new()),
            }),
        }
    }

    pub fn unsupported() -> Self {
        Self::new(Backend::Unsupported, &GeolocationOptions::default())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn platform(&self) -> Platform {
        self.inner.backend.platform()
    }

    pub fn is_supported(&self) -> bool {
        self.inner.backend.is_supported()
    }

    pub fn last_error(&self) -> Option<ErrorCode> {
        self.inner.events.last_error()
    }

    fn binding(&self) -> Option<&dyn NativeBinding> {
        self.inner.backend.binding()
    }

    pub(crate) fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{message}");
        self.inner.events.log.publish(message);
    }

    pub fn supports(&self, method: &str) -> bool {
        self.inner.backend.supports(method)
    }

    pub fn authorization_status(&self) -> AuthorizationStatus {
        self.binding()
            .map_or(AuthorizationStatus::Denied, |b| b.authorization_status())
    }

    pub fn allows_full_accuracy(&self) -> bool {
        self.binding().is_some_and(|b| b.allows_full_accuracy())
    }

    pub fn can_request_permissions(&self) -> bool {
        self.binding().is_some_and(|b| b.can_request_permissions())
    }

    pub fn is_updating_location(&self) -> bool {
        self.binding().is_some_and(|b| b.is_updating_location())
    }

    pub fn is_updating_heading(&self) -> bool {
        self.binding().is_some_and(|b| b.is_updating_heading())
    }

    pub fn should_show_permission_requirement_explanation(&self) -> bool {
        self.binding()
            .is_some_and(|b| b.should_show_permission_requirement_explanation())
    }

    pub fn should_check_location_capability(&self) -> bool {
        self.binding()
            .is_some_and(|b| b.should_check_location_capability())
    }

    pub fn request_permissions(&self) {
        self.inner.backend.authorize();
    }

    pub fn request_location_capability(&self) {
        self.inner.backend.check_capability();
    }

    pub fn start_updating_location(&self) {
        if let Some(binding) = self.binding() {
            binding.start_updating_location();
        }
    }

    pub fn stop_updating_location(&self) {
        if let Some(binding) = self.binding() {
            binding.stop_updating_location();
        }
    }

    pub fn start_updating_heading(&self) {
        if let Some(binding) = self.binding() {
            binding.start_updating_heading();
        }
    }

    pub fn stop_updating_heading(&self) {
        if let Some(binding) = self.binding() {
            binding.stop_updating_heading();
        }
    }

    pub fn set_distance_filter(&self, meters: f32) {
        if let Some(binding) = self.binding() {
            binding.set_distance_filter(meters);
        }
    }

    pub fn set_desired_accuracy(&self, accuracy: DesiredAccuracy) {
        if let Some(binding) = self.binding() {
            binding.set_desired_accuracy(accuracy);
        }
    }

    /// No-op outside Android
    pub fn set_update_interval(&self, seconds: u32) {
        if let Backend::Android { binding, .. } = &self.inner.backend {
            binding.set_update_interval(seconds);
        }
    }

    /// No-op outside Android
    pub fn set_max_wait_time(&self, seconds: u32) {
        if let Backend::Android { binding, .. } = &self.inner.backend {
            binding.set_max_wait_time(seconds);
        }
    }

    pub fn set_failure_timeout(&self, seconds: u32) {
        if let Some(binding) = self.binding() {
            binding.set_failure_timeout(seconds);
        }
    }

    pub fn set_debug_log_signal(&self, send: bool) {
        if let Some(binding) = self.binding() {
            binding.set_debug_log_signal(send);
        }
    }

    pub fn set_auto_check_location_capability(&self, auto: bool) {
        if let Some(binding) = self.binding() {
            binding.set_auto_check_location_capability(auto);
        }
    }

    /// Feed one Android permission callback (one arrives per requested scope).
    ///
    /// Publishes at most one authorization change per physical prompt, see [PermissionDebouncer].
    pub fn on_permissions_result(&self, permission: &str, granted: bool) {
        if self.platform() != Platform::Android {
            warn!("Ignoring permission result for {permission} on {:?}", self.platform());
            return;
        }

        let status = lock(&self.inner.debouncer).process(permission, granted, Instant::now());

        if let Some(status) = status {
            self.inner.events.authorization_changed.publish(status);
        }
    }

    /// Ask for location permission and wait for the resulting authorization change
    pub async fn request_authorization(&self) -> AuthorizationStatus {
        let changed = self.inner.events.authorization_changed.once();

        if !self.inner.backend.authorize() {
            return AuthorizationStatus::Denied;
        }

        changed.await.unwrap_or(AuthorizationStatus::Unknown)
    }

    /// Ask whether location services are currently usable and wait for the answer
    pub async fn location_capability(&self) -> bool {
        let result = self.inner.events.location_capability_result.once();

        if !self.inner.backend.check_capability() {
            return false;
        }

        result.await.unwrap_or(false)
    }

    /// Get a single location fix, [None] if it couldn't be obtained for any reason
    pub async fn request_location(&self) -> Option<Location> {
        self.request_location_internal(false).await
    }

    /// Authorize, check capability, then request a fix (or start watching), whichever of that chain
    /// or an error on the bus finishes first decides the result.
    pub(crate) async fn request_location_internal(&self, watch: bool) -> Option<Location> {
        if !self.is_supported() {
            self.log("AUTO unsupported");
            return None;
        }

        let mut errors = self.inner.events.error.once();

        let fix = tokio::select! {
            biased;

            Some(code) = &mut errors => {
                self.log(format!("AUTO error has occurred: {code}"));
                return None;
            }

            fix = self.authorize_then_request(watch) => fix,
        };

        let (seq, location) = fix?;

        // Both may have landed before this task was resumed, the earlier publish wins
        if errors.fired_at().is_some_and(|err_seq| err_seq < seq) {
            if let Some(code) = errors.try_recv() {
                self.log(format!("AUTO error has occurred: {code}"));
            }
            return None;
        }

        Some(location)
    }

    async fn authorize_then_request(&self, watch: bool) -> Option<(u64, Location)> {
        if self.authorization_status() != AuthorizationStatus::Allowed {
            self.log("AUTO authorize");
            if self.request_authorization().await != AuthorizationStatus::Allowed {
                return None;
            }
        }

        if self.should_check_location_capability() {
            self.log("AUTO check capability");
            if !self.location_capability().await {
                return None;
            }
        }

        self.log("AUTO actually request location");
        let mut update = self.inner.events.location_update.once();

        if watch {
            self.start_updating_location();
        } else if let Some(binding) = self.binding() {
            binding.request_location();
        }

        let location = (&mut update).await?;
        Some((update.fired_at()?, location))
    }

    /// Start a location watch, [None] if the first fix couldn't be obtained
    pub async fn location_updater(&self) -> Option<LocationUpdater> {
        let updater = LocationUpdater::new(self.clone());
        updater.start().await.then_some(updater)
    }

    /// Start a heading watch, [None] if heading updates aren't supported
    pub fn heading_updater(&self) -> Option<HeadingUpdater> {
        let updater = HeadingUpdater::new(self.clone());
        updater.start().then_some(updater)
    }
}

impl std::fmt::Debug for Geolocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geolocation")
            .field("backend", &self.inner.backend)
            .field("events", &self.inner.events)
            .finish()
    }
}

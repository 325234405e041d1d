use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use geolocation_logic::{
    AuthorizationStatus, Backend, DesiredAccuracy, EventBus, Geolocation, GeolocationOptions,
    NativeBinding, NativeSignal, PermissionPrompt, Platform, Subscription,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

/// A command the orchestration layer issued to the scripted plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    RequestLocation,
    StartUpdatingLocation,
    StopUpdatingLocation,
    StartUpdatingHeading,
    StopUpdatingHeading,
    RequestPermission,
    RequestLocationCapability,
    /// The Android OS permission prompt
    PromptPermissions,
}

/// Something the simulated native side delivers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimEvent {
    Native(NativeSignal),
    AndroidPermission { permission: String, granted: bool },
}

/// An event delivered `after_ms` after a watch started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub after_ms: u64,
    pub event: SimEvent,
}

fn default_platform() -> Platform {
    Platform::Ios
}

fn default_authorization() -> AuthorizationStatus {
    AuthorizationStatus::Allowed
}

/// How the simulated plugin behaves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "default_platform")]
    pub platform: Platform,
    #[serde(default)]
    pub options: GeolocationOptions,
    #[serde(default = "default_authorization")]
    pub authorization: AuthorizationStatus,
    #[serde(default)]
    pub should_check_capability: bool,
    /// Methods the plugin implements, everything when absent
    #[serde(default)]
    pub supports: Option<Vec<String>>,
    /// Events emitted every time a command is issued
    #[serde(default)]
    pub reactions: HashMap<Command, Vec<SimEvent>>,
    /// Events emitted over time once a watch is running
    #[serde(default)]
    pub stream: Vec<TimedEvent>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse script")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&contents)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [NativeBinding] driven by a [Script].
///
/// Events it emits are queued and delivered by [pump], never synchronously from a command.
pub struct ScriptedBinding {
    script: Script,
    events: mpsc::UnboundedSender<SimEvent>,
    commands: Mutex<Vec<Command>>,
    authorization: Arc<Mutex<AuthorizationStatus>>,
    updating_location: AtomicBool,
    updating_heading: AtomicBool,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    _authorization_sub: Subscription,
}

impl ScriptedBinding {
    pub fn new(script: Script, bus: &EventBus, events: mpsc::UnboundedSender<SimEvent>) -> Self {
        let authorization = Arc::new(Mutex::new(script.authorization));

        // Keep the reported status in line with whatever was last announced
        let sub = {
            let authorization = authorization.clone();
            bus.authorization_changed
                .subscribe(move |status| *lock(&authorization) = *status)
        };

        Self {
            script,
            events,
            commands: Mutex::new(Vec::new()),
            authorization,
            updating_location: AtomicBool::new(false),
            updating_heading: AtomicBool::new(false),
            stream_task: Mutex::new(None),
            _authorization_sub: sub,
        }
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.commands).clone()
    }

    fn send(&self, event: SimEvent) {
        if self.events.send(event).is_err() {
            warn!("Simulation pump is gone, dropping event");
        }
    }

    fn issue(&self, command: Command) {
        debug!("Plugin received {command:?}");
        lock(&self.commands).push(command);
        for event in self.script.reactions.get(&command).into_iter().flatten() {
            self.send(event.clone());
        }
    }

    fn watch_started(&self) {
        let mut task = lock(&self.stream_task);
        if task.is_some() || self.script.stream.is_empty() {
            return;
        }

        let mut stream = self.script.stream.clone();
        stream.sort_by_key(|e| e.after_ms);
        let events = self.events.clone();

        *task = Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            for TimedEvent { after_ms, event } in stream {
                tokio::time::sleep_until(started + Duration::from_millis(after_ms)).await;
                if events.send(event).is_err() {
                    break;
                }
            }
        }));
    }

    fn watch_stopped(&self) {
        if self.is_updating_location() || self.is_updating_heading() {
            return;
        }
        if let Some(task) = lock(&self.stream_task).take() {
            task.abort();
        }
    }
}

impl NativeBinding for ScriptedBinding {
    fn request_location(&self) {
        self.issue(Command::RequestLocation);
    }

    fn start_updating_location(&self) {
        self.updating_location.store(true, Ordering::SeqCst);
        self.issue(Command::StartUpdatingLocation);
        self.watch_started();
    }

    fn stop_updating_location(&self) {
        self.updating_location.store(false, Ordering::SeqCst);
        self.issue(Command::StopUpdatingLocation);
        self.watch_stopped();
    }

    fn start_updating_heading(&self) {
        self.updating_heading.store(true, Ordering::SeqCst);
        self.issue(Command::StartUpdatingHeading);
        self.watch_started();
    }

    fn stop_updating_heading(&self) {
        self.updating_heading.store(false, Ordering::SeqCst);
        self.issue(Command::StopUpdatingHeading);
        self.watch_stopped();
    }

    fn request_permission(&self) {
        self.issue(Command::RequestPermission);
    }

    fn request_location_capability(&self) {
        self.issue(Command::RequestLocationCapability);
    }

    fn set_distance_filter(&self, meters: f32) {
        debug!("Distance filter set to {meters}m");
    }

    fn set_desired_accuracy(&self, accuracy: DesiredAccuracy) {
        debug!("Desired accuracy set to {accuracy:?}");
    }

    fn set_update_interval(&self, seconds: u32) {
        debug!("Update interval set to {seconds}s");
    }

    fn set_max_wait_time(&self, seconds: u32) {
        debug!("Max wait time set to {seconds}s");
    }

    fn set_failure_timeout(&self, seconds: u32) {
        debug!("Failure timeout set to {seconds}s");
    }

    fn set_debug_log_signal(&self, send: bool) {
        debug!("Debug log signal set to {send}");
    }

    fn set_auto_check_location_capability(&self, auto: bool) {
        debug!("Auto capability check set to {auto}");
    }

    fn set_return_string_coordinates(&self, enabled: bool) {
        debug!("String coordinates set to {enabled}");
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        *lock(&self.authorization)
    }

    fn allows_full_accuracy(&self) -> bool {
        self.authorization_status() == AuthorizationStatus::Allowed
    }

    fn can_request_permissions(&self) -> bool {
        self.authorization_status() == AuthorizationStatus::Unknown
    }

    fn is_updating_location(&self) -> bool {
        self.updating_location.load(Ordering::SeqCst)
    }

    fn is_updating_heading(&self) -> bool {
        self.updating_heading.load(Ordering::SeqCst)
    }

    fn should_show_permission_requirement_explanation(&self) -> bool {
        self.authorization_status() == AuthorizationStatus::Denied
    }

    fn should_check_location_capability(&self) -> bool {
        self.script.should_check_capability
    }

    fn supports(&self, method: &str) -> bool {
        self.script
            .supports
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == method))
    }
}

impl PermissionPrompt for ScriptedBinding {
    fn request_permissions(&self) {
        self.issue(Command::PromptPermissions);
    }
}

impl Drop for ScriptedBinding {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.stream_task).take() {
            task.abort();
        }
    }
}

/// Deliver queued events into `geo` until the queue closes
pub async fn pump(geo: Geolocation, mut events: mpsc::UnboundedReceiver<SimEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SimEvent::Native(signal) => {
                debug!("Delivering {signal:?}");
                if let Err(why) = geo.events().dispatch(signal) {
                    warn!("Dropped native signal: {why:?}");
                }
            }
            SimEvent::AndroidPermission {
                permission,
                granted,
            } => {
                debug!("Delivering permission result {permission} = {granted}");
                geo.on_permissions_result(&permission, granted);
            }
        }
    }
}

/// A [Geolocation] wired to a [ScriptedBinding], with its pump running.
///
/// Must be created inside a tokio runtime.
pub struct Simulation {
    pub geo: Geolocation,
    pub binding: Arc<ScriptedBinding>,
    pump: JoinHandle<()>,
}

impl Simulation {
    pub fn new(script: Script) -> Self {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let platform = script.platform;
        let options = script.options.clone();
        let binding = Arc::new(ScriptedBinding::new(script, &bus, tx));

        let backend = match platform {
            Platform::Ios => Backend::Ios(binding.clone()),
            Platform::Android => Backend::Android {
                binding: binding.clone(),
                prompt: binding.clone(),
            },
            Platform::Other => Backend::Unsupported,
        };

        info!("Simulating {platform:?}");
        let geo = Geolocation::with_event_bus(backend, &options, bus);
        let pump = tokio::spawn(pump(geo.clone(), rx));

        Self { geo, binding, pump }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use geolocation_logic::{ErrorCode, Location};
    use tokio::test;

    use super::*;

    fn location_signal(lat: &str, long: &str) -> String {
        format!(
            r#"{{"signal": "location_update", "payload": {{"latitude_string": "{lat}", "longitude_string": "{long}", "accuracy": 5.0, "timestamp": 1700000000}}}}"#
        )
    }

    #[test]
    async fn test_parse_script() {
        let script = Script::from_json(&format!(
            r#"{{
                "platform": "android",
                "authorization": "unknown",
                "options": {{ "distance_filter": 10.0 }},
                "reactions": {{
                    "prompt_permissions": [
                        {{ "permission": "android.permission.ACCESS_FINE_LOCATION", "granted": true }}
                    ],
                    "request_location": [{}]
                }},
                "stream": [{{ "after_ms": 50, "event": {{ "signal": "error", "payload": 2 }} }}]
            }}"#,
            location_signal("1.5", "2.5")
        ))
        .expect("Failed to parse");

        assert_eq!(script.platform, Platform::Android);
        assert_eq!(script.authorization, AuthorizationStatus::Unknown);
        assert_eq!(script.options.distance_filter, Some(10.0));
        assert!(!script.should_check_capability);
        assert!(matches!(
            script.reactions[&Command::PromptPermissions][0],
            SimEvent::AndroidPermission { granted: true, .. }
        ));
        assert!(matches!(
            script.reactions[&Command::RequestLocation][0],
            SimEvent::Native(NativeSignal::LocationUpdate(_))
        ));
        assert_eq!(script.stream[0].after_ms, 50);
    }

    #[test]
    async fn test_locate() {
        let script = Script::from_json(&format!(
            r#"{{ "reactions": {{ "request_location": [{}] }} }}"#,
            location_signal("51.83", "7.96")
        ))
        .expect("Failed to parse");
        let sim = Simulation::new(script);

        let loc = sim.geo.request_location().await.expect("No location");
        assert_eq!(loc.latitude(), 51.83);
        assert_eq!(sim.binding.commands(), vec![Command::RequestLocation]);
    }

    #[test]
    async fn test_android_authorization_follows_permission_results() {
        let script = Script::from_json(&format!(
            r#"{{
                "platform": "android",
                "authorization": "unknown",
                "reactions": {{
                    "prompt_permissions": [
                        {{ "permission": "android.permission.ACCESS_COARSE_LOCATION", "granted": true }},
                        {{ "permission": "android.permission.ACCESS_FINE_LOCATION", "granted": true }}
                    ],
                    "request_location": [{}]
                }}
            }}"#,
            location_signal("1.0", "2.0")
        ))
        .expect("Failed to parse");
        let sim = Simulation::new(script);

        assert!(sim.geo.request_location().await.is_some());
        assert_eq!(
            sim.binding.commands(),
            vec![Command::PromptPermissions, Command::RequestLocation]
        );
        assert_eq!(sim.geo.authorization_status(), AuthorizationStatus::Allowed);
    }

    #[test]
    async fn test_error_reaction() {
        let script = Script::from_json(
            r#"{ "reactions": { "request_location": [{ "signal": "error", "payload": 4 }] } }"#,
        )
        .expect("Failed to parse");
        let sim = Simulation::new(script);

        assert_eq!(sim.geo.request_location().await, None);
        assert_eq!(sim.geo.last_error(), Some(ErrorCode::from_raw(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_watch() {
        let stream = ["1.1", "1.2", "1.3"]
            .iter()
            .enumerate()
            .map(|(i, lat)| {
                format!(
                    r#"{{ "after_ms": {}, "event": {} }}"#,
                    (i + 1) * 100,
                    location_signal(lat, "0.0")
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        let script = Script::from_json(&format!(
            r#"{{ "reactions": {{ "start_updating_location": [{}] }}, "stream": [{stream}] }}"#,
            location_signal("1.0", "0.0")
        ))
        .expect("Failed to parse");
        let sim = Simulation::new(script);

        let updater = sim.geo.location_updater().await.expect("Failed to start");
        let mut seen = Vec::new();
        while seen.len() < 4 {
            let loc: Location = updater.next().await.expect("Stream ended early");
            seen.push(loc.latitude());
        }
        updater.stop();

        assert_eq!(seen, vec![1.0, 1.1, 1.2, 1.3]);
        assert_eq!(updater.next().await, None);
        assert!(!sim.geo.is_updating_location());
        assert_eq!(
            sim.binding.commands(),
            vec![Command::StartUpdatingLocation, Command::StopUpdatingLocation]
        );
    }

    #[test]
    async fn test_unsupported_methods() {
        let script = Script::from_json(r#"{ "supports": ["request_location"] }"#)
            .expect("Failed to parse");
        let sim = Simulation::new(script);

        assert!(sim.geo.heading_updater().is_none());
        assert!(sim.binding.commands().is_empty());

        let sim = Simulation::new(
            Script::from_json(r#"{ "platform": "other" }"#).expect("Failed to parse"),
        );
        assert!(!sim.geo.is_supported());
        assert_eq!(sim.geo.request_location().await, None);
    }
}

mod awaiter;
mod codes;
mod events;
mod geolocation;
mod location;
mod permissions;
mod platform;
mod settings;
mod updater;

pub use awaiter::{Next, ReusableAwaiter};
pub use codes::{AuthorizationStatus, DesiredAccuracy, ErrorCode};
pub use events::{Channel, ErrorChannel, EventBus, NativeSignal, Once, Subscription};
pub use geolocation::Geolocation;
pub use location::{Heading, HeadingFields, Location, LocationFields};
pub use permissions::{COARSE_LOCATION, DEBOUNCE_WINDOW, FINE_LOCATION, PermissionDebouncer};
pub use platform::{Backend, NativeBinding, PermissionPrompt, Platform};
pub use settings::GeolocationOptions;
pub use updater::{HeadingUpdater, HeadingWatch, LocationUpdater, LocationWatch, Updater, WatchKind};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}

use std::time::Duration;

use tokio::time::Instant;

use crate::codes::AuthorizationStatus;

pub const COARSE_LOCATION: &str = "android.permission.ACCESS_COARSE_LOCATION";
pub const FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";

/// Two permission results closer together than this belong to the same prompt
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Collapses the paired Android permission callbacks into one authorization change.
///
/// Android reports one result per requested scope (coarse, then fine) for a single prompt. The first
/// result of a pair is evaluated and forwarded, a second one inside [DEBOUNCE_WINDOW] is swallowed.
/// A result arriving later than that (the user upgrading to fine location afterwards, say) is
/// forwarded as a fresh change.
///
/// Time is passed in rather than read so the window is deterministic under test.
#[derive(Debug, Default)]
pub struct PermissionDebouncer {
    last_signal: Option<Instant>,
}

impl PermissionDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one permission callback received at `now`.
    ///
    /// Returns the authorization change to publish, or [None] if this callback was the duplicate half
    /// of a pair.
    pub fn process(
        &mut self,
        permission: &str,
        granted: bool,
        now: Instant,
    ) -> Option<AuthorizationStatus> {
        match self.last_signal.take() {
            None => self.last_signal = Some(now),
            Some(first) if now.saturating_duration_since(first) < DEBOUNCE_WINDOW => return None,
            Some(_) => {}
        }

        Some(Self::evaluate(permission, granted))
    }

    fn evaluate(permission: &str, granted: bool) -> AuthorizationStatus {
        if granted && (permission == COARSE_LOCATION || permission == FINE_LOCATION) {
            AuthorizationStatus::Allowed
        } else {
            AuthorizationStatus::Denied
        }
    }
}

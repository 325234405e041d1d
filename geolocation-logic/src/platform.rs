use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::codes::{AuthorizationStatus, DesiredAccuracy};

/// The native location plugin.
///
/// Commands are fire-and-forget, their outcome comes back later as signals on the
/// [EventBus](crate::EventBus). Queries are answered synchronously.
pub trait NativeBinding: Send + Sync {
    fn request_location(&self);
    fn start_updating_location(&self);
    fn stop_updating_location(&self);
    fn start_updating_heading(&self);
    fn stop_updating_heading(&self);
    /// Ask the user for location permission (iOS only, Android goes through [PermissionPrompt])
    fn request_permission(&self);
    fn request_location_capability(&self);

    fn set_distance_filter(&self, meters: f32);
    fn set_desired_accuracy(&self, accuracy: DesiredAccuracy);
    fn set_update_interval(&self, seconds: u32);
    fn set_max_wait_time(&self, seconds: u32);
    fn set_failure_timeout(&self, seconds: u32);
    fn set_debug_log_signal(&self, send: bool);
    fn set_auto_check_location_capability(&self, auto: bool);
    /// Send coordinates as decimal strings instead of floats
    fn set_return_string_coordinates(&self, enabled: bool);

    fn authorization_status(&self) -> AuthorizationStatus;
    fn allows_full_accuracy(&self) -> bool;
    fn can_request_permissions(&self) -> bool;
    fn is_updating_location(&self) -> bool;
    fn is_updating_heading(&self) -> bool;
    fn should_show_permission_requirement_explanation(&self) -> bool;
    fn should_check_location_capability(&self) -> bool;
    /// Whether the plugin implements the method called `method`
    fn supports(&self, method: &str) -> bool;
}

/// The OS-level permission prompt on Android, results come back through
/// [Geolocation::on_permissions_result](crate::Geolocation::on_permissions_result)
pub trait PermissionPrompt: Send + Sync {
    fn request_permissions(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Other,
}

impl Platform {
    pub fn from_os_name(name: &str) -> Self {
        match name {
            "iOS" => Self::Ios,
            "Android" => Self::Android,
            _ => Self::Other,
        }
    }
}

/// What the current platform can do.
///
/// Every operation on [Backend::Unsupported] short-circuits to its failure value without touching
/// any native code.
#[derive(Clone)]
pub enum Backend {
    Unsupported,
    Ios(Arc<dyn NativeBinding>),
    Android {
        binding: Arc<dyn NativeBinding>,
        prompt: Arc<dyn PermissionPrompt>,
    },
}

impl Backend {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Unsupported => Platform::Other,
            Self::Ios(_) => Platform::Ios,
            Self::Android { .. } => Platform::Android,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    pub(crate) fn binding(&self) -> Option<&dyn NativeBinding> {
        match self {
            Self::Unsupported => None,
            Self::Ios(binding) | Self::Android { binding, .. } => Some(binding.as_ref()),
        }
    }

    /// Issue a permission request, returns false if there is nothing to ask
    pub(crate) fn authorize(&self) -> bool {
        match self {
            Self::Unsupported => false,
            Self::Ios(binding) => {
                binding.request_permission();
                true
            }
            Self::Android { prompt, .. } => {
                prompt.request_permissions();
                true
            }
        }
    }

    /// Issue a location capability check, returns false if there is nothing to ask
    pub(crate) fn check_capability(&self) -> bool {
        let Some(binding) = self.binding() else {
            return false;
        };
        binding.request_location_capability();
        true
    }

    pub(crate) fn supports(&self, method: &str) -> bool {
        self.binding()
            .is_some_and(|binding| binding.supports(method))
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({:?})", self.platform())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_os_name() {
        assert_eq!(Platform::from_os_name("iOS"), Platform::Ios);
        assert_eq!(Platform::from_os_name("Android"), Platform::Android);
        assert_eq!(Platform::from_os_name("Linux"), Platform::Other);
        assert_eq!(Platform::from_os_name("ios"), Platform::Other);
    }

    #[test]
    fn test_unsupported_short_circuits() {
        let backend = Backend::Unsupported;
        assert!(!backend.is_supported());
        assert!(!backend.authorize());
        assert!(!backend.check_capability());
        assert!(!backend.supports("start_updating_heading"));
        assert_eq!(backend.platform(), Platform::Other);
    }
}

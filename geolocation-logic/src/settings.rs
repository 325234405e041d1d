use serde::{Deserialize, Serialize};

use crate::{codes::DesiredAccuracy, platform::NativeBinding};

/// Options pushed to the native layer when a [Geolocation](crate::Geolocation) is created.
/// Anything left as [None] keeps whatever the native layer defaults to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationOptions {
    /// Minimum distance in meters the device must move before a new update is sent
    pub distance_filter: Option<f32>,
    pub desired_accuracy: Option<DesiredAccuracy>,
    /// Seconds between updates while watching (Android only)
    pub update_interval: Option<u32>,
    /// Seconds updates may be batched for before delivery (Android only)
    pub max_wait_time: Option<u32>,
    /// Seconds before a pending request gives up with a timeout error
    pub failure_timeout: Option<u32>,
    /// Have the native layer send its own debug messages over the log signal
    pub debug_log_signal: Option<bool>,
    /// Let the native layer check location capability on its own before each request
    pub auto_check_location_capability: Option<bool>,
}

impl GeolocationOptions {
    pub(crate) fn apply(&self, binding: &dyn NativeBinding, android: bool) {
        if let Some(meters) = self.distance_filter {
            binding.set_distance_filter(meters);
        }
        if let Some(accuracy) = self.desired_accuracy {
            binding.set_desired_accuracy(accuracy);
        }
        if android {
            if let Some(seconds) = self.update_interval {
                binding.set_update_interval(seconds);
            }
            if let Some(seconds) = self.max_wait_time {
                binding.set_max_wait_time(seconds);
            }
        }
        if let Some(seconds) = self.failure_timeout {
            binding.set_failure_timeout(seconds);
        }
        if let Some(send) = self.debug_log_signal {
            binding.set_debug_log_signal(send);
        }
        if let Some(auto) = self.auto_check_location_capability {
            binding.set_auto_check_location_capability(auto);
        }
    }
}

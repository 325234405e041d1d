use std::fmt;

use serde::{Deserialize, Serialize};

/// Last known permission state, only ever updated through the authorization changed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Unknown,
    Denied,
    Allowed,
}

impl AuthorizationStatus {
    /// Convert the bit flag the native layer sends, anything unrecognised is [AuthorizationStatus::Unknown]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            2 => Self::Denied,
            4 => Self::Allowed,
            _ => Self::Unknown,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Unknown => 1,
            Self::Denied => 2,
            Self::Allowed => 4,
        }
    }
}

/// Failure codes carried on the error channel.
///
/// The orchestration layer treats every code the same way (the current workflow or stream ends),
/// the code is only kept around so callers can find a best-effort explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Denied,
    Network,
    HeadingFailure,
    LocationUnknown,
    Timeout,
    Unsupported,
    LocationDisabled,
    Unknown,
}

impl ErrorCode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Denied,
            2 => Self::Network,
            4 => Self::HeadingFailure,
            8 => Self::LocationUnknown,
            16 => Self::Timeout,
            32 => Self::Unsupported,
            64 => Self::LocationDisabled,
            _ => Self::Unknown,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Denied => 1,
            Self::Network => 2,
            Self::HeadingFailure => 4,
            Self::LocationUnknown => 8,
            Self::Timeout => 16,
            Self::Unsupported => 32,
            Self::LocationDisabled => 64,
            Self::Unknown => 128,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Denied => "denied",
            Self::Network => "network",
            Self::HeadingFailure => "heading failure",
            Self::LocationUnknown => "location unknown",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::LocationDisabled => "location disabled",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Accuracy level requested from the native location provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredAccuracy {
    BestForNavigation,
    Best,
    NearestTenMeters,
    HundredMeters,
    Kilometer,
    ThreeKilometers,
    /// Approximate location only (iOS 14+ reduced accuracy)
    Reduced,
}

impl DesiredAccuracy {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::BestForNavigation => 1 << 0,
            Self::Best => 1 << 1,
            Self::NearestTenMeters => 1 << 2,
            Self::HundredMeters => 1 << 3,
            Self::Kilometer => 1 << 4,
            Self::ThreeKilometers => 1 << 5,
            Self::Reduced => 1 << 6,
        }
    }
}

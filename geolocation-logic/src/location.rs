use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Mean earth radius used for great-circle distances, in kilometers
const EARTH_RADIUS_KM: f64 = 6367.0;

/// Raw location payload as delivered by the native layer.
///
/// Coordinates arrive as decimal strings so no precision is lost crossing the native boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFields {
    pub latitude_string: String,
    pub longitude_string: String,
    pub accuracy: f32,
    #[serde(default)]
    pub altitude: f32,
    #[serde(default)]
    pub altitude_accuracy: f32,
    #[serde(default)]
    pub course: f32,
    #[serde(default)]
    pub course_accuracy: f32,
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub speed_accuracy: f32,
    pub timestamp: i64,
}

/// Raw heading payload as delivered by the native layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingFields {
    pub magnetic_heading: f32,
    pub true_heading: f32,
    pub heading_accuracy: f32,
    pub timestamp: i64,
}

fn local_time(timestamp: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp(timestamp, 0).map(|utc| utc.with_timezone(&Local))
}

/// An immutable location fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    latitude: f64,
    longitude: f64,
    accuracy: f32,
    altitude: f32,
    altitude_accuracy: f32,
    course: f32,
    course_accuracy: f32,
    /// m/s
    speed: f32,
    speed_accuracy: f32,
    timestamp: i64,
}

impl Location {
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn accuracy(&self) -> f32 {
        self.accuracy
    }

    pub fn altitude(&self) -> f32 {
        self.altitude
    }

    pub fn altitude_accuracy(&self) -> f32 {
        self.altitude_accuracy
    }

    pub fn course(&self) -> f32 {
        self.course
    }

    pub fn course_accuracy(&self) -> f32 {
        self.course_accuracy
    }

    /// Speed in meters per second
    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn speed_accuracy(&self) -> f32 {
        self.speed_accuracy
    }

    pub fn speed_kph(&self) -> f32 {
        self.speed * 3.6
    }

    pub fn speed_mph(&self) -> f32 {
        self.speed * 2.237
    }

    /// Unix timestamp (seconds) of the fix
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The fix time in the local timezone, [None] if the timestamp is out of range
    pub fn time(&self) -> Option<DateTime<Local>> {
        local_time(self.timestamp)
    }

    /// Great-circle (haversine) distance to `other` in kilometers
    pub fn distance_to_kilometers(&self, other: &Location) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    pub fn distance_to_meters(&self, other: &Location) -> f64 {
        self.distance_to_kilometers(other) * 1000.0
    }
}

impl TryFrom<LocationFields> for Location {
    type Error = anyhow::Error;

    fn try_from(fields: LocationFields) -> Result<Self> {
        let latitude = fields
            .latitude_string
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid latitude {:?}", fields.latitude_string))?;
        let longitude = fields
            .longitude_string
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid longitude {:?}", fields.longitude_string))?;

        Ok(Self {
            latitude,
            longitude,
            accuracy: fields.accuracy,
            altitude: fields.altitude,
            altitude_accuracy: fields.altitude_accuracy,
            course: fields.course,
            course_accuracy: fields.course_accuracy,
            speed: fields.speed,
            speed_accuracy: fields.speed_accuracy,
            timestamp: fields.timestamp,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latitude: {}", self.latitude)?;
        writeln!(f, "Longitude: {}", self.longitude)?;
        writeln!(f, "Accuracy: {}", self.accuracy)?;
        writeln!(
            f,
            "Altitude: {}m (+/- {}m)",
            self.altitude, self.altitude_accuracy
        )?;
        writeln!(f, "Course: {} (+/- {})", self.course, self.course_accuracy)?;
        writeln!(f, "Speed: {} (+/- {}m/s)", self.speed, self.speed_accuracy)?;
        write!(f, "Timestamp: {}", self.timestamp)?;
        if let Some(time) = self.time() {
            write!(f, " {time}")?;
        }
        Ok(())
    }
}

fn haversine_km(lat1: f64, long1: f64, lat2: f64, long2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlong = (long2 - long1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlong / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// An immutable compass heading reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    magnetic_heading: f32,
    true_heading: f32,
    heading_accuracy: f32,
    timestamp: i64,
}

impl Heading {
    pub fn magnetic_heading(&self) -> f32 {
        self.magnetic_heading
    }

    pub fn true_heading(&self) -> f32 {
        self.true_heading
    }

    pub fn heading_accuracy(&self) -> f32 {
        self.heading_accuracy
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn time(&self) -> Option<DateTime<Local>> {
        local_time(self.timestamp)
    }
}

impl From<HeadingFields> for Heading {
    fn from(fields: HeadingFields) -> Self {
        Self {
            magnetic_heading: fields.magnetic_heading,
            true_heading: fields.true_heading,
            heading_accuracy: fields.heading_accuracy,
            timestamp: fields.timestamp,
        }
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Magnetic Heading: {}", self.magnetic_heading)?;
        writeln!(f, "True Heading: {}", self.true_heading)?;
        writeln!(f, "Heading Accuracy: {}", self.heading_accuracy)?;
        write!(f, "Timestamp: {}", self.timestamp)?;
        if let Some(time) = self.time() {
            write!(f, " {time}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(lat: &str, long: &str) -> LocationFields {
        LocationFields {
            latitude_string: lat.to_string(),
            longitude_string: long.to_string(),
            accuracy: 4.44,
            altitude: 111.11,
            altitude_accuracy: 1.2,
            course: 120.5,
            course_accuracy: 12.3,
            speed: 2.5,
            speed_accuracy: 0.5,
            timestamp: 123456789,
        }
    }

    #[test]
    fn test_parse_string_coordinates() {
        let loc = Location::try_from(fields("51.83", "7.96")).unwrap();
        assert_eq!(loc.latitude(), 51.83);
        assert_eq!(loc.longitude(), 7.96);
        assert_eq!(loc.accuracy(), 4.44);
        assert_eq!(loc.timestamp(), 123456789);
        assert_eq!(loc.speed_kph(), loc.speed() * 3.6);
        assert_eq!(loc.speed_mph(), loc.speed() * 2.237);
        assert!(loc.time().is_some());
    }

    #[test]
    fn test_parse_keeps_full_precision() {
        let loc = Location::try_from(fields("51.830000123456789", "-7.960000987654321")).unwrap();
        assert_eq!(loc.latitude(), 51.830000123456789);
        assert_eq!(loc.longitude(), -7.960000987654321);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Location::try_from(fields("north", "7.96")).is_err());
        assert!(Location::try_from(fields("51.83", "")).is_err());
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let loc = Location::try_from(fields("51.83", "7.96")).unwrap();
        assert_eq!(loc.distance_to_kilometers(&loc), 0.0);
        assert_eq!(loc.distance_to_meters(&loc), 0.0);
    }

    #[test]
    fn test_distance_one_hundredth_degree_latitude() {
        let a = Location::try_from(fields("51.83", "7.96")).unwrap();
        let b = Location::try_from(fields("51.84", "7.96")).unwrap();

        let expected = EARTH_RADIUS_KM * 0.01_f64.to_radians();
        let km = a.distance_to_kilometers(&b);
        assert!((km - expected).abs() < 1e-9);
        assert!((km - 1.111).abs() < 0.001);
        assert!((a.distance_to_meters(&b) - km * 1000.0).abs() < 1e-9);
        assert!((b.distance_to_kilometers(&a) - km).abs() < 1e-12);
    }

    #[test]
    fn test_heading_from_fields() {
        let heading = Heading::from(HeadingFields {
            magnetic_heading: 90.0,
            true_heading: 92.5,
            heading_accuracy: 3.0,
            timestamp: 1_700_000_000,
        });
        assert_eq!(heading.magnetic_heading(), 90.0);
        assert_eq!(heading.true_heading(), 92.5);
        assert!(heading.to_string().contains("True Heading: 92.5"));
    }
}

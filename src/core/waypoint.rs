use serde::{Deserialize, Serialize};
use std::fmt;

/// A single route point in the native coordinate system
///
/// Field names match the persisted route format, so a `Waypoint`
/// serializes directly as `{"longitude": .., "latitude": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Longitude in degrees
    pub longitude: f64,

    /// Latitude in degrees
    pub latitude: f64,
}

impl Waypoint {
    /// Create a new waypoint from a longitude/latitude pair
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Point at `fraction` of the way from `self` to `other`
    pub fn lerp(&self, other: &Waypoint, fraction: f64) -> Waypoint {
        Waypoint {
            longitude: self.longitude + (other.longitude - self.longitude) * fraction,
            latitude: self.latitude + (other.latitude - self.latitude) * fraction,
        }
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

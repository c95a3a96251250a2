use crate::core::Waypoint;

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic collaborator used by the playback engine
///
/// Implementations must be pure: the same inputs always give the same
/// outputs and nothing is mutated. Two providers ship with the crate:
/// - [`Wgs84`](crate::geo::Wgs84) when the route is already in WGS-84
/// - [`Bd09`](crate::geo::Bd09) for routes picked on a Baidu map
pub trait GeoTransform: Send + Sync {
    /// Distance between two native-system points, in metres
    fn distance(&self, a: &Waypoint, b: &Waypoint) -> f64;

    /// Convert a native-system point to the external system as `(lng, lat)`
    fn to_external(&self, point: &Waypoint) -> (f64, f64);
}

/// Haversine great-circle distance in metres between two lng/lat points
pub fn haversine_m(a_lng: f64, a_lat: f64, b_lng: f64, b_lat: f64) -> f64 {
    let d_lat = (b_lat - a_lat).to_radians();
    let d_lng = (b_lng - a_lng).to_radians();

    let lat1 = a_lat.to_radians();
    let lat2 = b_lat.to_radians();

    let h = (d_lat * 0.5).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng * 0.5).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

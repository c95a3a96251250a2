//! Baidu BD-09 native coordinates with WGS-84 output.
//!
//! BD-09 is GCJ-02 with an extra rotation/offset. Going back to WGS-84 is
//! done in two steps (BD-09 -> GCJ-02 -> WGS-84); the second step is the
//! usual single-iteration approximation, good to a few metres inside China.
//! Points outside mainland China carry no GCJ-02 offset.

use crate::core::Waypoint;
use crate::geo::geo_transform::{haversine_m, GeoTransform};
use std::f64::consts::PI;
use tracing::{debug, warn};

const X_PI: f64 = PI * 3000.0 / 180.0;

/// Krasovsky 1940 semi-major axis
const KRASOVSKY_A: f64 = 6_378_245.0;
/// Krasovsky 1940 eccentricity squared
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943;

/// Largest BD-09 -> WGS-84 -> BD-09 drift accepted by [`validate_round_trip`]
pub const ROUND_TRIP_TOLERANCE_M: f64 = 1.0;

/// Routes picked on a Baidu map (BD-09), emitted as WGS-84
#[derive(Debug, Clone, Copy, Default)]
pub struct Bd09;

impl GeoTransform for Bd09 {
    fn distance(&self, a: &Waypoint, b: &Waypoint) -> f64 {
        haversine_m(a.longitude, a.latitude, b.longitude, b.latitude)
    }

    fn to_external(&self, point: &Waypoint) -> (f64, f64) {
        let (gcj_lng, gcj_lat) = bd09_to_gcj02(point.longitude, point.latitude);
        gcj02_to_wgs84(gcj_lng, gcj_lat)
    }
}

/// Remove the BD-09 rotation/offset, giving GCJ-02
pub fn bd09_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng - 0.0065;
    let y = lat - 0.006;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

/// Apply the BD-09 rotation/offset to a GCJ-02 point
pub fn gcj02_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let z = (lng * lng + lat * lat).sqrt() + 0.00002 * (lat * X_PI).sin();
    let theta = lat.atan2(lng) + 0.000003 * (lng * X_PI).cos();
    (z * theta.cos() + 0.0065, z * theta.sin() + 0.006)
}

/// Approximate inverse of the GCJ-02 obfuscation
pub fn gcj02_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lng, lat) {
        return (lng, lat);
    }
    let (d_lng, d_lat) = gcj02_offset(lng, lat);
    (lng - d_lng, lat - d_lat)
}

/// Forward GCJ-02 obfuscation of a WGS-84 point
pub fn wgs84_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lng, lat) {
        return (lng, lat);
    }
    let (d_lng, d_lat) = gcj02_offset(lng, lat);
    (lng + d_lng, lat + d_lat)
}

pub fn wgs84_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let (gcj_lng, gcj_lat) = wgs84_to_gcj02(lng, lat);
    gcj02_to_bd09(gcj_lng, gcj_lat)
}

/// Metres lost converting a BD-09 point to WGS-84 and back
pub fn round_trip_error_m(point: &Waypoint) -> f64 {
    let (wgs_lng, wgs_lat) = Bd09.to_external(point);
    let (lng, lat) = wgs84_to_bd09(wgs_lng, wgs_lat);
    haversine_m(point.longitude, point.latitude, lng, lat)
}

/// Check that a BD-09 point survives the round trip within
/// [`ROUND_TRIP_TOLERANCE_M`]; returns the drift in metres either way
pub fn validate_round_trip(point: &Waypoint) -> (bool, f64) {
    let error_m = round_trip_error_m(point);
    let ok = error_m < ROUND_TRIP_TOLERANCE_M;
    if ok {
        debug!("Round trip at {}: {:.3} m", point, error_m);
    } else {
        warn!("Round trip at {} drifted {:.3} m", point, error_m);
    }
    (ok, error_m)
}

/// GCJ-02 shift `(d_lng, d_lat)` in degrees around `(lng, lat)`
fn gcj02_offset(lng: f64, lat: f64) -> (f64, f64) {
    let d_lat = transform_lat(lng - 105.0, lat - 35.0);
    let d_lng = transform_lng(lng - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin().powi(2);
    let sqrt_magic = magic.sqrt();

    (
        (d_lng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI),
        (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI),
    )
}

fn out_of_china(lng: f64, lat: f64) -> bool {
    !(72.004..=137.8347).contains(&lng) || !(0.8293..=55.8271).contains(&lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

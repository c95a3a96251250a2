use crate::core::Waypoint;
use crate::geo::geo_transform::{haversine_m, GeoTransform};

/// Routes already expressed in WGS-84: conversion is the identity
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84;

impl GeoTransform for Wgs84 {
    fn distance(&self, a: &Waypoint, b: &Waypoint) -> f64 {
        haversine_m(a.longitude, a.latitude, b.longitude, b.latitude)
    }

    fn to_external(&self, point: &Waypoint) -> (f64, f64) {
        (point.longitude, point.latitude)
    }
}

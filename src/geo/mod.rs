pub mod geo_transform;
pub mod wgs84;
pub mod bd09;

pub use geo_transform::{haversine_m, GeoTransform};
pub use wgs84::Wgs84;
pub use bd09::{validate_round_trip, Bd09};

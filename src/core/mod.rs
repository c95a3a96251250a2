pub mod waypoint;
pub mod store;

pub use waypoint::Waypoint;
pub use store::WaypointStore;

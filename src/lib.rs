//! Simulated movement along a waypoint route.
//!
//! A [`RouteManager`] owns one [`PlaybackEngine`] on a tokio task. Callers
//! add waypoints, then start, pause, resume or stop playback; every 100 ms
//! the engine interpolates a new position between the current pair of
//! waypoints and hands it to a [`RouteListener`]. Routes can be saved to and
//! loaded from a small JSON file.

pub mod config;
pub mod core;
pub mod error;
pub mod geo;
pub mod persistence;
pub mod playback;
pub mod render;

pub use crate::core::{Waypoint, WaypointStore};
pub use config::Settings;
pub use error::{RouteError, RouteResult};
pub use geo::{validate_round_trip, Bd09, GeoTransform, Wgs84};
pub use persistence::RouteFile;
pub use playback::{
    Cursor, PlaybackConfig, PlaybackEngine, PlaybackState, RouteListener, RouteManager,
    RouteStateEvent, RouteStatus, TICK_INTERVAL,
};
pub use render::{LogRenderer, RecordingRenderer, RenderCall, RouteRenderer};

pub mod engine;
pub mod manager;

pub use engine::{Cursor, PlaybackEngine};
pub use manager::{RouteManager, RouteStatus};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Period of the movement timer, in milliseconds
pub const TICK_INTERVAL_MS: u64 = 100;

/// Period of the movement timer
pub const TICK_INTERVAL: Duration = Duration::from_millis(TICK_INTERVAL_MS);

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
}

/// Playback configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub speed: f64, // metres per second
    pub loop_mode: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_mode: true,
        }
    }
}

/// State transition broadcast to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStateEvent {
    pub state: PlaybackState,
    pub message: String,
}

impl RouteStateEvent {
    pub fn new(state: PlaybackState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Receiver of playback callbacks
///
/// Callbacks run on the engine's own task, so they must return quickly.
/// Only `on_position_update` is required; lifecycle hooks default to no-ops.
pub trait RouteListener: Send {
    /// New interpolated position, in the external coordinate system
    fn on_position_update(&mut self, longitude: f64, latitude: f64);

    fn on_route_started(&mut self) {}

    fn on_route_resumed(&mut self) {}

    fn on_route_paused(&mut self) {}

    fn on_route_stopped(&mut self) {}

    /// The last waypoint was reached with loop mode off
    fn on_route_finished(&mut self) {}
}

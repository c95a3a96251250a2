use crate::core::Waypoint;
use crate::render::RouteRenderer;
use tracing::{debug, info};

/// Renderer for headless runs: reports route geometry through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRenderer;

impl RouteRenderer for LogRenderer {
    fn point_added(&mut self, point: &Waypoint, route: &[Waypoint]) {
        debug!("Waypoint {} added at {}", route.len(), point);
    }

    fn redraw(&mut self, route: &[Waypoint]) {
        info!("Route redrawn with {} waypoints", route.len());
    }

    fn clear(&mut self) {
        debug!("Route cleared");
    }
}

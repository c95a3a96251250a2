use crate::core::Waypoint;
use crate::render::RouteRenderer;
use std::sync::{Arc, Mutex};

/// A render hook as seen by [`RecordingRenderer`]
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    PointAdded(Waypoint),
    Redraw(Vec<Waypoint>),
    Clear,
}

/// Renderer that records every hook instead of drawing
///
/// Clones share the same call log, so one clone can be handed to the
/// engine while another is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<RenderCall>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all calls recorded so far
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Take all recorded calls, leaving the log empty
    pub fn take_calls(&self) -> Vec<RenderCall> {
        self.calls.lock().map(|mut c| std::mem::take(&mut *c)).unwrap_or_default()
    }

    fn record(&self, call: RenderCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl RouteRenderer for RecordingRenderer {
    fn point_added(&mut self, point: &Waypoint, _route: &[Waypoint]) {
        self.record(RenderCall::PointAdded(*point));
    }

    fn redraw(&mut self, route: &[Waypoint]) {
        self.record(RenderCall::Redraw(route.to_vec()));
    }

    fn clear(&mut self) {
        self.record(RenderCall::Clear);
    }
}

use crate::core::Waypoint;

/// Ordered, mutable sequence of route waypoints
///
/// Insertion order is path order and duplicates are allowed. None of the
/// operations fail; removing from an empty store simply does nothing.
#[derive(Debug, Clone, Default)]
pub struct WaypointStore {
    points: Vec<Waypoint>,
}

impl WaypointStore {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Add a waypoint to the end of the route
    pub fn append(&mut self, point: Waypoint) {
        self.points.push(point);
    }

    /// Remove the last waypoint, returning it if there was one
    pub fn remove_last(&mut self) -> Option<Waypoint> {
        self.points.pop()
    }

    /// Remove every waypoint
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Substitute the whole sequence at once
    pub fn replace_all(&mut self, points: Vec<Waypoint>) {
        self.points = points;
    }

    /// Owned copy of the current route
    pub fn snapshot(&self) -> Vec<Waypoint> {
        self.points.clone()
    }

    pub fn as_slice(&self) -> &[Waypoint] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<Waypoint> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

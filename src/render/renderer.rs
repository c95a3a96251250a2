use crate::core::Waypoint;

/// Drawing surface the engine keeps in sync with its waypoint store
///
/// The engine calls these hooks after every store mutation:
/// - `point_added` after an append (cheap incremental update)
/// - `redraw` when geometry must be rebuilt (undo, load)
/// - `clear` when the route is emptied
///
/// Hooks run on the engine's task and must not block.
pub trait RouteRenderer: Send {
    /// A point was appended; `route` is the full route including it
    fn point_added(&mut self, point: &Waypoint, route: &[Waypoint]);

    /// Rebuild everything from `route`
    fn redraw(&mut self, route: &[Waypoint]);

    /// Remove every overlay
    fn clear(&mut self);
}

use crate::core::{Waypoint, WaypointStore};
use crate::error::{RouteError, RouteResult};
use crate::geo::GeoTransform;
use crate::persistence::RouteFile;
use crate::playback::{
    PlaybackConfig, PlaybackState, RouteListener, RouteStateEvent, TICK_INTERVAL_MS,
};
use crate::render::RouteRenderer;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the state-change broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Position of playback within the route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// Index of the current segment's origin waypoint
    pub origin: usize,
    /// Current segment is the loop-closing one (last -> first); the next
    /// advance lands on waypoint 0
    pub wrapping: bool,
    /// Time already travelled on this segment, in ms
    pub elapsed_ms: u64,
    /// Time needed for this segment at the current speed, in ms
    pub total_ms: u64,
}

impl Cursor {
    /// Fraction of the segment covered, clamped to `[0, 1]`
    ///
    /// A zero-length segment counts as already complete.
    pub fn progress(&self) -> f64 {
        if self.total_ms == 0 {
            return 1.0;
        }
        (self.elapsed_ms as f64 / self.total_ms as f64).clamp(0.0, 1.0)
    }
}

/// Endpoints of the segment in flight, captured when it begins
///
/// Later edits to the waypoint store do not reach an in-flight segment.
#[derive(Debug, Clone, Copy)]
struct Segment {
    from: Waypoint,
    to: Waypoint,
    from_ext: (f64, f64),
    to_ext: (f64, f64),
    distance_m: f64,
}

impl Segment {
    fn new(geo: &dyn GeoTransform, from: Waypoint, to: Waypoint) -> Self {
        Self {
            from,
            to,
            from_ext: geo.to_external(&from),
            to_ext: geo.to_external(&to),
            distance_m: geo.distance(&from, &to),
        }
    }

    /// Interpolated external position; exactly `to_ext` once complete
    fn position_at(&self, progress: f64) -> (f64, f64) {
        if progress >= 1.0 {
            return self.to_ext;
        }
        (
            self.from_ext.0 + (self.to_ext.0 - self.from_ext.0) * progress,
            self.from_ext.1 + (self.to_ext.1 - self.from_ext.1) * progress,
        )
    }

    /// Remaining part of the segment, starting where `progress` left off
    fn remainder(&self, progress: f64) -> Segment {
        let (from_lng, from_lat) = self.position_at(progress);
        Segment {
            from: self.from.lerp(&self.to, progress),
            to: self.to,
            from_ext: (from_lng, from_lat),
            to_ext: self.to_ext,
            distance_m: self.distance_m * (1.0 - progress),
        }
    }
}

fn travel_time_ms(distance_m: f64, speed: f64) -> u64 {
    (distance_m / speed * 1000.0) as u64
}

fn check_speed(speed: f64) -> RouteResult<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(RouteError::InvalidSpeed(speed))
    }
}

/// Route playback engine
///
/// Owns the waypoints, the RUNNING/PAUSED/IDLE state machine and the
/// interpolation cursor. The engine itself has no clock: whoever drives it
/// calls [`tick`](Self::tick) every [`TICK_INTERVAL`](crate::playback::TICK_INTERVAL)
/// while it is running. [`RouteManager`](crate::playback::RouteManager) does
/// exactly that from a tokio task.
pub struct PlaybackEngine {
    store: WaypointStore,
    defaults: PlaybackConfig,
    config: PlaybackConfig,
    state: PlaybackState,
    cursor: Cursor,
    segment: Option<Segment>,
    speed_changed: bool,
    geo: Arc<dyn GeoTransform>,
    renderer: Option<Box<dyn RouteRenderer>>,
    listener: Option<Box<dyn RouteListener>>,
    events: broadcast::Sender<RouteStateEvent>,
}

impl PlaybackEngine {
    pub fn new(geo: Arc<dyn GeoTransform>) -> Self {
        Self::with_config(geo, PlaybackConfig::default())
    }

    pub fn with_config(geo: Arc<dyn GeoTransform>, config: PlaybackConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: WaypointStore::new(),
            defaults: config,
            config,
            state: PlaybackState::Idle,
            cursor: Cursor::default(),
            segment: None,
            speed_changed: false,
            geo,
            renderer: None,
            listener: None,
            events,
        }
    }

    /// Attach the rendering surface and reset everything else
    ///
    /// Point and playback operations fail with `NotInitialized` until this
    /// has been called.
    pub fn initialize(&mut self, renderer: Box<dyn RouteRenderer>) {
        self.renderer = Some(renderer);
        self.reset();
        info!("Route engine initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.renderer.is_some()
    }

    /// Stop playback and return to a freshly initialized state
    ///
    /// Drops the listener and restores the default loop mode; the current
    /// speed is kept.
    pub fn reset(&mut self) {
        self.stop();
        self.store.clear();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.clear();
        }
        self.cursor = Cursor::default();
        self.segment = None;
        self.listener = None;
        self.config.loop_mode = self.defaults.loop_mode;
        self.speed_changed = false;
        self.state = PlaybackState::Idle;
    }

    /// Tear down: stop, drop all points and detach collaborators
    pub fn destroy(&mut self) {
        self.stop();
        self.store.clear();
        if let Some(mut renderer) = self.renderer.take() {
            renderer.clear();
        }
        self.listener = None;
        info!("Route engine destroyed");
    }

    /// Replace the listener; `None` detaches it
    pub fn set_listener(&mut self, listener: Option<Box<dyn RouteListener>>) {
        self.listener = listener;
    }

    /// Receive every future state transition
    pub fn subscribe(&self) -> broadcast::Receiver<RouteStateEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<RouteStateEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlaybackState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    pub fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn speed(&self) -> f64 {
        self.config.speed
    }

    /// Change speed, effective from the next tick even mid-segment
    pub fn set_speed(&mut self, speed: f64) -> RouteResult<()> {
        check_speed(speed)?;
        debug!("Speed={}", speed);
        self.config.speed = speed;
        if self.segment.is_some() {
            self.speed_changed = true;
        }
        Ok(())
    }

    pub fn loop_mode(&self) -> bool {
        self.config.loop_mode
    }

    pub fn set_loop_mode(&mut self, loop_mode: bool) {
        self.config.loop_mode = loop_mode;
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        self.store.as_slice()
    }

    pub fn snapshot(&self) -> Vec<Waypoint> {
        self.store.snapshot()
    }

    fn check_initialized(&self) -> RouteResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RouteError::NotInitialized)
        }
    }

    fn notify(&mut self, callback: impl FnOnce(&mut dyn RouteListener)) {
        if let Some(listener) = self.listener.as_mut() {
            callback(listener.as_mut());
        }
    }

    fn redraw(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.redraw(self.store.as_slice());
        }
    }

    fn set_state(&mut self, new_state: PlaybackState, message: &str) {
        debug!("State changed: {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        // Nobody subscribed is fine
        let _ = self.events.send(RouteStateEvent::new(new_state, message));
    }

    // ---- waypoint editing ----

    pub fn add_point(&mut self, point: Waypoint) -> RouteResult<()> {
        self.check_initialized()?;
        self.store.append(point);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.point_added(&point, self.store.as_slice());
        }
        Ok(())
    }

    /// Remove the last waypoint; an empty route is left untouched
    pub fn undo_last_point(&mut self) -> RouteResult<Option<Waypoint>> {
        self.check_initialized()?;
        let removed = self.store.remove_last();
        if removed.is_some() {
            self.redraw();
        }
        Ok(removed)
    }

    pub fn clear_points(&mut self) -> RouteResult<()> {
        self.check_initialized()?;
        self.store.clear();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.clear();
        }
        Ok(())
    }

    /// Stop playback, then clear the route
    pub fn delete_all_points(&mut self) -> RouteResult<()> {
        self.check_initialized()?;
        self.stop();
        self.clear_points()?;
        self.cursor = Cursor::default();
        Ok(())
    }

    // ---- state machine ----

    /// Start from `Idle`, or resume from `Paused`
    ///
    /// A fresh start needs at least two waypoints; otherwise, and when
    /// already running, nothing happens.
    pub fn start(&mut self) -> RouteResult<()> {
        self.check_initialized()?;
        match self.state {
            PlaybackState::Idle if self.store.len() < 2 => {}
            PlaybackState::Idle => {
                debug!("Speed={}", self.config.speed);
                self.cursor = Cursor::default();
                if !self.begin_segment(0) {
                    return Ok(());
                }
                self.set_state(PlaybackState::Running, "started");
                self.notify(|l| l.on_route_started());
            }
            PlaybackState::Paused => self.resume()?,
            PlaybackState::Running => {}
        }
        Ok(())
    }

    /// Set the speed, then [`start`](Self::start)
    pub fn start_with_speed(&mut self, speed: f64) -> RouteResult<()> {
        self.check_initialized()?;
        check_speed(speed)?;
        match self.state {
            PlaybackState::Running => return Ok(()),
            PlaybackState::Idle if self.store.len() < 2 => return Ok(()),
            _ => {}
        }
        self.set_speed(speed)?;
        self.start()
    }

    /// Continue a paused route from where it stopped
    pub fn resume(&mut self) -> RouteResult<()> {
        self.check_initialized()?;
        if self.state != PlaybackState::Paused {
            return Ok(());
        }
        self.set_state(PlaybackState::Running, "resumed");
        self.notify(|l| l.on_route_resumed());
        Ok(())
    }

    /// Freeze playback; the cursor keeps its elapsed time
    pub fn pause(&mut self) -> RouteResult<()> {
        self.check_initialized()?;
        if self.state != PlaybackState::Running {
            return Ok(());
        }
        self.set_state(PlaybackState::Paused, "paused");
        self.notify(|l| l.on_route_paused());
        Ok(())
    }

    /// Abandon the current run and rewind to the first segment
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Idle {
            return;
        }
        self.cursor = Cursor::default();
        self.segment = None;
        self.speed_changed = false;
        self.set_state(PlaybackState::Idle, "stopped");
        self.notify(|l| l.on_route_stopped());
    }

    fn finish(&mut self) {
        self.notify(|l| l.on_route_finished());
        self.cursor = Cursor::default();
        self.segment = None;
        self.speed_changed = false;
        self.set_state(PlaybackState::Idle, "finished");
    }

    // ---- movement ----

    /// Set up the segment leaving waypoint `origin`
    ///
    /// From the last waypoint (or beyond, if the route shrank) this is the
    /// closing segment back to waypoint 0 in loop mode. Returns false when
    /// there is no segment to travel.
    fn begin_segment(&mut self, origin: usize) -> bool {
        let last = match self.store.len() {
            0 | 1 => return false,
            n => n - 1,
        };

        let (origin, target, wrapping) = if origin < last {
            (origin, origin + 1, false)
        } else if self.config.loop_mode {
            (last, 0, true)
        } else {
            return false;
        };

        let (Some(from), Some(to)) = (self.store.get(origin), self.store.get(target)) else {
            return false;
        };

        let segment = Segment::new(self.geo.as_ref(), from, to);
        self.cursor = Cursor {
            origin,
            wrapping,
            elapsed_ms: 0,
            total_ms: travel_time_ms(segment.distance_m, self.config.speed),
        };
        self.segment = Some(segment);
        self.speed_changed = false;

        debug!(
            "Segment {} -> {}: {:.1} m in {} ms",
            origin, target, segment.distance_m, self.cursor.total_ms
        );
        true
    }

    /// Move on after the current segment completed
    fn advance(&mut self) -> bool {
        let next = if self.cursor.wrapping { 0 } else { self.cursor.origin + 1 };

        if !self.config.loop_mode && next + 1 >= self.store.len() {
            self.finish();
            return false;
        }

        if !self.begin_segment(next) {
            self.finish();
            return false;
        }
        true
    }

    /// Run one timer step
    ///
    /// Emits exactly one position update while running. Returns whether
    /// the engine is still running and wants another tick in
    /// [`TICK_INTERVAL`](crate::playback::TICK_INTERVAL).
    pub fn tick(&mut self) -> bool {
        if self.state != PlaybackState::Running {
            return false;
        }

        let Some(mut segment) = self.segment else {
            self.finish();
            return false;
        };

        if self.speed_changed {
            self.speed_changed = false;
            segment = segment.remainder(self.cursor.progress());
            self.segment = Some(segment);
            self.cursor.elapsed_ms = 0;
            self.cursor.total_ms = travel_time_ms(segment.distance_m, self.config.speed);
            debug!(
                "Speed change: {:.1} m left, now {} ms",
                segment.distance_m, self.cursor.total_ms
            );
        }

        let progress = self.cursor.progress();
        let (lng, lat) = segment.position_at(progress);
        self.notify(|l| l.on_position_update(lng, lat));

        if progress < 1.0 {
            self.cursor.elapsed_ms += TICK_INTERVAL_MS;
            return true;
        }

        if !self.advance() {
            return false;
        }
        // The new origin was just emitted as the previous endpoint
        self.cursor.elapsed_ms = TICK_INTERVAL_MS;
        true
    }

    // ---- persistence ----

    /// Snapshot the route for saving
    pub fn record(&self) -> RouteResult<RouteFile> {
        if self.store.is_empty() {
            return Err(RouteError::EmptyRoute);
        }
        Ok(RouteFile::capture(
            self.store.snapshot(),
            self.config.loop_mode,
            self.config.speed,
        ))
    }

    /// Replace the route with a loaded one
    ///
    /// Playback always ends up `Idle`. Nothing changes if the record is
    /// rejected.
    pub fn apply(&mut self, file: RouteFile) -> RouteResult<()> {
        self.check_initialized()?;
        if let Some(speed) = file.speed {
            check_speed(speed)?;
        }

        self.stop();
        self.store.replace_all(file.points);
        if let Some(loop_mode) = file.loop_mode {
            self.config.loop_mode = loop_mode;
        }
        if let Some(speed) = file.speed {
            self.config.speed = speed;
        }
        self.redraw();

        info!(
            "Loaded route: {} points, loop={}, speed={}",
            self.store.len(),
            self.config.loop_mode,
            self.config.speed
        );
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> RouteResult<()> {
        let result = self.record().and_then(|file| file.write(path.as_ref()));
        if let Err(e) = &result {
            warn!("Failed to save route: {}", e);
        }
        result
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> RouteResult<()> {
        let result = RouteFile::read(path.as_ref()).and_then(|file| self.apply(file));
        if let Err(e) = &result {
            warn!("Failed to load route: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::testing::Planar;
    use crate::playback::testing::{ListenerEvent, RecordingListener};
    use crate::render::{RecordingRenderer, RenderCall};

    fn engine_with(points: &[(f64, f64)]) -> (PlaybackEngine, RecordingListener, RecordingRenderer) {
        let renderer = RecordingRenderer::new();
        let listener = RecordingListener::default();

        let mut engine = PlaybackEngine::new(Arc::new(Planar::unit()));
        engine.initialize(Box::new(renderer.clone()));
        engine.set_listener(Some(Box::new(listener.clone())));
        for &(lng, lat) in points {
            engine.add_point(Waypoint::new(lng, lat)).unwrap();
        }
        renderer.take_calls();
        (engine, listener, renderer)
    }

    /// Tick until the engine stops asking for more, with a safety cap
    fn run_to_end(engine: &mut PlaybackEngine) -> usize {
        let mut ticks = 0;
        while engine.tick() {
            ticks += 1;
            assert!(ticks < 100_000, "playback never finished");
        }
        ticks + 1
    }

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-9 && (actual.1 - expected.1).abs() < 1e-9,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    const THREE_POINTS: [(f64, f64); 3] = [(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)];

    #[test]
    fn test_cursor_progress() {
        let cursor = Cursor { origin: 0, wrapping: false, elapsed_ms: 300, total_ms: 1000 };
        assert!((cursor.progress() - 0.3).abs() < 1e-12);

        let overshoot = Cursor { elapsed_ms: 1100, ..cursor };
        assert_eq!(overshoot.progress(), 1.0);

        let zero = Cursor { elapsed_ms: 0, total_ms: 0, ..cursor };
        assert_eq!(zero.progress(), 1.0);
    }

    #[test]
    fn test_three_points_finish() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);

        engine.start().unwrap();
        assert!(engine.is_running());
        let ticks = run_to_end(&mut engine);

        assert_eq!(ticks, 21);
        assert!(engine.is_idle());
        assert_eq!(
            listener.lifecycle(),
            vec![ListenerEvent::Started, ListenerEvent::Finished]
        );

        let positions = listener.positions();
        assert_eq!(positions.len(), 21);
        assert_eq!(positions[0], (0.0, 0.0));
        assert_eq!(positions[10], (0.0, 1.0));
        assert_close(positions[11], (0.0, 1.1));
        assert_close(positions[15], (0.0, 1.5));
        assert_eq!(positions[20], (0.0, 2.0));

        for pair in positions.windows(2) {
            assert!(pair[1].1 >= pair[0].1, "latitude went backwards: {:?}", pair);
        }
        assert!(positions.iter().all(|&(lng, lat)| lng == 0.0 && lat <= 2.0));
    }

    #[test]
    fn test_finish_is_reported_before_idle() {
        let (mut engine, _, _) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);
        let mut events = engine.subscribe();

        engine.start().unwrap();
        run_to_end(&mut engine);

        assert_eq!(
            events.try_recv().unwrap(),
            RouteStateEvent::new(PlaybackState::Running, "started")
        );
        assert_eq!(
            events.try_recv().unwrap(),
            RouteStateEvent::new(PlaybackState::Idle, "finished")
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_loop_returns_to_first_waypoint() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(true);
        engine.start().unwrap();

        // 11 + 10 ticks out, the closing segment then targets waypoint 0
        for _ in 0..21 {
            assert!(engine.tick());
        }
        assert_eq!(engine.cursor().origin, 2);
        assert!(engine.cursor().wrapping);

        // 2 m back to the start takes 20 ticks, then 0 -> 1 again
        for _ in 0..21 {
            assert!(engine.tick());
        }

        let positions = listener.positions();
        assert_eq!(positions[20], (0.0, 2.0));
        assert_close(positions[21], (0.0, 1.9));
        assert_eq!(positions[40], (0.0, 0.0));
        assert_close(positions[41], (0.0, 0.1));

        assert_eq!(engine.cursor().origin, 0);
        assert!(!engine.cursor().wrapping);
        assert!(engine.is_running());
        assert!(!listener.lifecycle().contains(&ListenerEvent::Finished));
    }

    #[test]
    fn test_two_point_loop_bounces() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0), (1.0, 0.0)]);
        engine.set_loop_mode(true);
        engine.start().unwrap();

        for _ in 0..31 {
            assert!(engine.tick());
        }

        let positions = listener.positions();
        assert_eq!(positions[10], (1.0, 0.0));
        assert_close(positions[11], (0.9, 0.0));
        assert_eq!(positions[20], (0.0, 0.0));
        assert_close(positions[21], (0.1, 0.0));
        assert_eq!(positions[30], (1.0, 0.0));
        assert_eq!(positions.len(), 31);
    }

    #[test]
    fn test_waypoints_add_no_dwell() {
        // Ten 1 m segments at 1 m/s: 10 s, so 100 ticks after the first update
        let points: Vec<(f64, f64)> = (0..=10).map(|i| (0.0, i as f64)).collect();
        let (mut engine, listener, _) = engine_with(&points);
        engine.set_loop_mode(false);
        engine.start().unwrap();

        assert_eq!(run_to_end(&mut engine), 101);
        let positions = listener.positions();
        for (i, &(_, lat)) in positions.iter().enumerate() {
            assert!((lat - i as f64 * 0.1).abs() < 1e-9, "tick {} at {}", i, lat);
        }
    }

    #[test]
    fn test_start_resumes_after_undo_while_paused() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0), (0.0, 1.0)]);
        engine.start().unwrap();
        engine.tick();
        engine.pause().unwrap();

        engine.undo_last_point().unwrap();
        engine.start().unwrap();

        assert!(engine.is_running());
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Resumed));
    }

    #[test]
    fn test_start_needs_two_points() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0)]);
        engine.start().unwrap();

        assert!(engine.is_idle());
        assert!(!engine.tick());
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_uninitialized_use_fails() {
        let mut engine = PlaybackEngine::new(Arc::new(Planar::unit()));

        assert!(matches!(
            engine.add_point(Waypoint::new(0.0, 0.0)),
            Err(RouteError::NotInitialized)
        ));
        assert!(matches!(engine.start(), Err(RouteError::NotInitialized)));
        assert!(matches!(engine.pause(), Err(RouteError::NotInitialized)));
        assert!(matches!(engine.undo_last_point(), Err(RouteError::NotInitialized)));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_wrong_state_transitions_are_silent() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        let mut events = engine.subscribe();

        engine.pause().unwrap();
        engine.resume().unwrap();
        engine.stop();
        assert!(engine.is_idle());

        engine.start().unwrap();
        engine.start().unwrap();
        engine.resume().unwrap();
        assert!(engine.is_running());

        assert_eq!(listener.lifecycle(), vec![ListenerEvent::Started]);
        assert_eq!(events.try_recv().unwrap().state, PlaybackState::Running);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_pause_freezes_cursor() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.start().unwrap();
        for _ in 0..4 {
            engine.tick();
        }

        engine.pause().unwrap();
        let frozen = engine.cursor();
        assert_eq!(frozen.elapsed_ms, 400);
        assert!(engine.is_paused());

        let updates = listener.positions().len();
        assert!(!engine.tick());
        assert_eq!(listener.positions().len(), updates);
        assert_eq!(engine.cursor(), frozen);
    }

    #[test]
    fn test_pause_resume_matches_uninterrupted_run() {
        let (mut straight, straight_listener, _) = engine_with(&THREE_POINTS);
        straight.set_loop_mode(false);
        straight.start().unwrap();
        run_to_end(&mut straight);

        let (mut interrupted, listener, _) = engine_with(&THREE_POINTS);
        interrupted.set_loop_mode(false);
        interrupted.start().unwrap();
        for pause_after in [3, 9, 2] {
            for _ in 0..pause_after {
                assert!(interrupted.tick());
            }
            interrupted.pause().unwrap();
            interrupted.tick();
            interrupted.start().unwrap();
        }
        run_to_end(&mut interrupted);

        assert_eq!(listener.positions(), straight_listener.positions());
        assert_eq!(
            listener.lifecycle(),
            vec![
                ListenerEvent::Started,
                ListenerEvent::Paused,
                ListenerEvent::Resumed,
                ListenerEvent::Paused,
                ListenerEvent::Resumed,
                ListenerEvent::Paused,
                ListenerEvent::Resumed,
                ListenerEvent::Finished,
            ]
        );
    }

    #[test]
    fn test_stop_rewinds() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.start().unwrap();
        for _ in 0..15 {
            engine.tick();
        }
        engine.set_speed(3.0).unwrap();
        engine.pause().unwrap();
        engine.stop();

        assert!(engine.is_idle());
        assert_eq!(engine.cursor(), Cursor::default());
        assert!(!engine.speed_changed);
        assert!(!engine.tick());
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Stopped));

        // A fresh start begins at the first waypoint again
        engine.start().unwrap();
        engine.tick();
        assert_eq!(listener.positions().last(), Some(&(0.0, 0.0)));
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Started));
    }

    #[test]
    fn test_speed_change_mid_segment() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0), (0.0, 10.0)]);
        engine.set_loop_mode(false);
        engine.start().unwrap();
        for _ in 0..31 {
            assert!(engine.tick());
        }
        assert_close(*listener.positions().last().unwrap(), (0.0, 3.0));

        engine.set_speed(2.0).unwrap();
        assert!(engine.tick());

        // Continues from 3.1 (where the next tick would have been), not 0
        assert_close(*listener.positions().last().unwrap(), (0.0, 3.1));
        assert_eq!(engine.cursor().elapsed_ms, 100);
        // 6.9 m left at 2 m/s
        assert!((3449..=3450).contains(&engine.cursor().total_ms));

        run_to_end(&mut engine);
        let positions = listener.positions();
        for pair in positions.windows(2) {
            assert!(pair[1].1 >= pair[0].1, "latitude went backwards: {:?}", pair);
        }
        assert_eq!(*positions.last().unwrap(), (0.0, 10.0));
        assert!(positions.iter().all(|&(_, lat)| lat <= 10.0));
        // 31 updates at 1 m/s, then 36 covering the remaining 6.9 m
        assert_eq!(positions.len(), 31 + 36);
    }

    #[test]
    fn test_speed_change_while_paused_applies_on_resume() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0), (0.0, 10.0)]);
        engine.set_loop_mode(false);
        engine.start().unwrap();
        for _ in 0..50 {
            engine.tick();
        }
        engine.pause().unwrap();
        engine.set_speed(5.0).unwrap();
        engine.resume().unwrap();
        engine.tick();

        assert_close(*listener.positions().last().unwrap(), (0.0, 5.0));
        assert_eq!(engine.cursor().total_ms, 1000);
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let (mut engine, _, _) = engine_with(&THREE_POINTS);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(engine.set_speed(bad), Err(RouteError::InvalidSpeed(_))));
        }
        assert_eq!(engine.speed(), 1.0);
    }

    #[test]
    fn test_start_with_speed() {
        let (mut engine, _, _) = engine_with(&THREE_POINTS);
        engine.start_with_speed(4.0).unwrap();

        assert!(engine.is_running());
        assert_eq!(engine.speed(), 4.0);
        assert_eq!(engine.cursor().total_ms, 250);
    }

    #[test]
    fn test_coincident_points_do_not_divide_by_zero() {
        let (mut engine, listener, _) = engine_with(&[(0.0, 0.0), (0.0, 0.0), (0.0, 1.0)]);
        engine.set_loop_mode(false);
        engine.start().unwrap();
        assert_eq!(engine.cursor().total_ms, 0);

        run_to_end(&mut engine);
        let positions = listener.positions();
        assert_eq!(positions[0], (0.0, 0.0));
        // The zero-length segment takes one tick, the next picks up at 0.1
        assert_eq!(positions.len(), 1 + 10);
        assert_close(positions[1], (0.0, 0.1));
        assert!(positions.iter().all(|p| p.0.is_finite() && p.1.is_finite()));
    }

    #[test]
    fn test_edits_while_running_only_affect_future_segments() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);
        engine.start().unwrap();
        for _ in 0..3 {
            engine.tick();
        }

        engine.undo_last_point().unwrap();
        engine.add_point(Waypoint::new(5.0, 5.0)).unwrap();
        engine.undo_last_point().unwrap();
        run_to_end(&mut engine);

        let positions = listener.positions();
        assert_eq!(positions.len(), 11);
        assert_eq!(*positions.last().unwrap(), (0.0, 1.0));
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Finished));
    }

    #[test]
    fn test_render_hooks() {
        let (mut engine, _, renderer) = engine_with(&[]);

        assert_eq!(engine.undo_last_point().unwrap(), None);
        assert!(renderer.calls().is_empty());

        engine.add_point(Waypoint::new(1.0, 1.0)).unwrap();
        engine.add_point(Waypoint::new(2.0, 2.0)).unwrap();
        assert_eq!(engine.undo_last_point().unwrap(), Some(Waypoint::new(2.0, 2.0)));
        engine.clear_points().unwrap();

        assert_eq!(
            renderer.take_calls(),
            vec![
                RenderCall::PointAdded(Waypoint::new(1.0, 1.0)),
                RenderCall::PointAdded(Waypoint::new(2.0, 2.0)),
                RenderCall::Redraw(vec![Waypoint::new(1.0, 1.0)]),
                RenderCall::Clear,
            ]
        );
    }

    #[test]
    fn test_delete_all_points_stops_playback() {
        let (mut engine, listener, _) = engine_with(&THREE_POINTS);
        engine.start().unwrap();
        engine.tick();

        engine.delete_all_points().unwrap();
        assert!(engine.is_idle());
        assert!(engine.waypoints().is_empty());
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Stopped));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (mut engine, listener, renderer) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);
        engine.set_speed(2.0).unwrap();
        engine.start().unwrap();

        engine.reset();
        assert!(engine.is_idle());
        assert!(engine.waypoints().is_empty());
        assert!(engine.loop_mode());
        assert_eq!(engine.speed(), 2.0);
        assert_eq!(renderer.calls().last(), Some(&RenderCall::Clear));

        // Listener was detached by the reset
        let before = listener.events().len();
        engine.add_point(Waypoint::new(0.0, 0.0)).unwrap();
        engine.add_point(Waypoint::new(0.0, 1.0)).unwrap();
        engine.start().unwrap();
        engine.tick();
        assert_eq!(listener.events().len(), before);
    }

    #[test]
    fn test_destroy_detaches_renderer() {
        let (mut engine, _, renderer) = engine_with(&THREE_POINTS);
        engine.destroy();

        assert!(!engine.is_initialized());
        assert!(engine.waypoints().is_empty());
        assert_eq!(renderer.calls(), vec![RenderCall::Clear]);
    }

    #[test]
    fn test_apply_replaces_route_and_lands_idle() {
        let (mut engine, listener, renderer) = engine_with(&THREE_POINTS);
        engine.start().unwrap();
        engine.tick();

        let file = RouteFile {
            points: vec![Waypoint::new(9.0, 9.0), Waypoint::new(8.0, 8.0)],
            loop_mode: Some(false),
            speed: None,
            timestamp: None,
        };
        engine.apply(file).unwrap();

        assert!(engine.is_idle());
        assert_eq!(engine.waypoints(), &[Waypoint::new(9.0, 9.0), Waypoint::new(8.0, 8.0)]);
        assert!(!engine.loop_mode());
        assert_eq!(engine.speed(), 1.0);
        assert_eq!(listener.lifecycle().last(), Some(&ListenerEvent::Stopped));
        assert_eq!(
            renderer.calls().last(),
            Some(&RenderCall::Redraw(engine.snapshot()))
        );
    }

    #[test]
    fn test_apply_bad_speed_changes_nothing() {
        let (mut engine, _, _) = engine_with(&THREE_POINTS);
        engine.start().unwrap();

        let file = RouteFile {
            points: vec![Waypoint::new(9.0, 9.0)],
            loop_mode: Some(false),
            speed: Some(-2.0),
            timestamp: None,
        };
        assert!(matches!(engine.apply(file), Err(RouteError::InvalidSpeed(_))));
        assert!(engine.is_running());
        assert_eq!(engine.waypoints().len(), 3);
        assert!(engine.loop_mode());
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "route-sim-{}-engine-roundtrip.json",
            std::process::id()
        ));
        let (mut engine, _, _) = engine_with(&[(116.404, 39.915), (116.41, 39.92), (116.42, 39.9)]);
        engine.set_loop_mode(false);
        engine.set_speed(7.5).unwrap();
        engine.save(&path).unwrap();

        let (mut restored, _, _) = engine_with(&[(0.0, 0.0)]);
        restored.load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(restored.snapshot(), engine.snapshot());
        assert_eq!(restored.loop_mode(), false);
        assert_eq!(restored.speed(), 7.5);
        assert!(restored.is_idle());
    }

    #[test]
    fn test_save_empty_route_fails() {
        let (engine, _, _) = engine_with(&[]);
        let path = std::env::temp_dir().join("route-sim-never-written.json");
        assert!(matches!(engine.save(&path), Err(RouteError::EmptyRoute)));
    }

    #[test]
    fn test_load_malformed_file_leaves_state() {
        let path = std::env::temp_dir().join(format!(
            "route-sim-{}-engine-malformed.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"points": 5}"#).unwrap();

        let (mut engine, _, renderer) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);
        engine.start().unwrap();

        let result = engine.load(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(RouteError::Parse { .. })));
        assert!(engine.is_running());
        assert_eq!(engine.waypoints().len(), 3);
        assert!(!engine.loop_mode());
        assert!(renderer.calls().is_empty());
    }

    #[test]
    fn test_load_missing_file_leaves_state() {
        let (mut engine, _, renderer) = engine_with(&THREE_POINTS);
        engine.set_loop_mode(false);
        engine.start().unwrap();

        let missing = std::env::temp_dir().join("route-sim-definitely-missing.json");
        assert!(matches!(engine.load(&missing), Err(RouteError::NotFound(_))));

        assert!(engine.is_running());
        assert_eq!(engine.waypoints().len(), 3);
        assert!(!engine.loop_mode());
        assert!(renderer.calls().is_empty());
    }
}

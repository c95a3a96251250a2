use crate::core::Waypoint;
use crate::error::{RouteError, RouteResult};
use crate::geo::GeoTransform;
use crate::persistence::RouteFile;
use crate::playback::engine::{Cursor, PlaybackEngine};
use crate::playback::{PlaybackConfig, PlaybackState, RouteListener, RouteStateEvent, TICK_INTERVAL};
use crate::render::RouteRenderer;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

type Reply<T> = oneshot::Sender<RouteResult<T>>;

/// Requests from the handle to the engine task
enum Command {
    Initialize(Box<dyn RouteRenderer>, Reply<()>),
    Reset(Reply<()>),
    SetListener(Option<Box<dyn RouteListener>>, Reply<()>),
    AddPoint(Waypoint, Reply<()>),
    UndoLastPoint(Reply<Option<Waypoint>>),
    ClearPoints(Reply<()>),
    DeleteAllPoints(Reply<()>),
    Snapshot(Reply<Vec<Waypoint>>),
    Start(Option<f64>, Reply<()>),
    Resume(Reply<()>),
    Pause(Reply<()>),
    Stop(Reply<()>),
    SetSpeed(f64, Reply<()>),
    SetLoopMode(bool, Reply<()>),
    Status(Reply<RouteStatus>),
    Record(Reply<RouteFile>),
    Apply(RouteFile, Reply<()>),
    Shutdown(Reply<()>),
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStatus {
    pub state: PlaybackState,
    pub speed: f64,
    pub loop_mode: bool,
    pub cursor: Cursor,
    pub waypoint_count: usize,
    pub initialized: bool,
}

/// Async handle to a [`PlaybackEngine`] running on its own tokio task
///
/// The task is the engine's only execution context: every call made
/// through this handle is queued to it, and it also drives the 100 ms
/// movement timer. A pause or stop therefore always lands between two
/// ticks, and once it has been acknowledged no further updates from the
/// cancelled run are delivered.
pub struct RouteManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RouteStateEvent>,
    task: JoinHandle<()>,
}

impl RouteManager {
    /// Spawn the engine task; must be called inside a tokio runtime
    pub fn spawn(geo: Arc<dyn GeoTransform>) -> Self {
        Self::spawn_with_config(geo, PlaybackConfig::default())
    }

    pub fn spawn_with_config(geo: Arc<dyn GeoTransform>, config: PlaybackConfig) -> Self {
        let engine = PlaybackEngine::with_config(geo, config);
        let events = engine.event_sender();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(Self::run(engine, command_rx));

        Self {
            commands,
            events,
            task,
        }
    }

    /// Engine loop: serve commands, tick while running
    async fn run(mut engine: PlaybackEngine, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut next_tick = Instant::now();

        loop {
            let running = engine.is_running();

            tokio::select! {
                biased;

                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown(reply)) => {
                            engine.destroy();
                            let _ = reply.send(Ok(()));
                            return;
                        }
                        Some(command) => {
                            Self::handle(&mut engine, command);
                            if !running && engine.is_running() {
                                // Fresh start or resume: first update right away
                                next_tick = Instant::now();
                            }
                        }
                        None => break,
                    }
                }

                _ = time::sleep_until(next_tick), if running => {
                    if engine.tick() {
                        next_tick = Instant::now() + TICK_INTERVAL;
                    }
                }
            }
        }

        debug!("Route manager handle dropped, shutting down engine task");
        engine.destroy();
    }

    fn handle(engine: &mut PlaybackEngine, command: Command) {
        // A dropped reply receiver just means the caller stopped waiting
        match command {
            Command::Initialize(renderer, reply) => {
                engine.initialize(renderer);
                let _ = reply.send(Ok(()));
            }
            Command::Reset(reply) => {
                engine.reset();
                let _ = reply.send(Ok(()));
            }
            Command::SetListener(listener, reply) => {
                engine.set_listener(listener);
                let _ = reply.send(Ok(()));
            }
            Command::AddPoint(point, reply) => {
                let _ = reply.send(engine.add_point(point));
            }
            Command::UndoLastPoint(reply) => {
                let _ = reply.send(engine.undo_last_point());
            }
            Command::ClearPoints(reply) => {
                let _ = reply.send(engine.clear_points());
            }
            Command::DeleteAllPoints(reply) => {
                let _ = reply.send(engine.delete_all_points());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(engine.snapshot()));
            }
            Command::Start(speed, reply) => {
                let result = match speed {
                    Some(speed) => engine.start_with_speed(speed),
                    None => engine.start(),
                };
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let _ = reply.send(engine.resume());
            }
            Command::Pause(reply) => {
                let _ = reply.send(engine.pause());
            }
            Command::Stop(reply) => {
                engine.stop();
                let _ = reply.send(Ok(()));
            }
            Command::SetSpeed(speed, reply) => {
                let _ = reply.send(engine.set_speed(speed));
            }
            Command::SetLoopMode(loop_mode, reply) => {
                engine.set_loop_mode(loop_mode);
                let _ = reply.send(Ok(()));
            }
            Command::Status(reply) => {
                let _ = reply.send(Ok(RouteStatus {
                    state: engine.state(),
                    speed: engine.speed(),
                    loop_mode: engine.loop_mode(),
                    cursor: engine.cursor(),
                    waypoint_count: engine.waypoints().len(),
                    initialized: engine.is_initialized(),
                }));
            }
            Command::Record(reply) => {
                let _ = reply.send(engine.record());
            }
            Command::Apply(file, reply) => {
                let _ = reply.send(engine.apply(file));
            }
            Command::Shutdown(reply) => {
                // Handled by the run loop before dispatch
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> RouteResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| RouteError::EngineClosed)?;
        response.await.map_err(|_| RouteError::EngineClosed)?
    }

    /// Receive every future state transition; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<RouteStateEvent> {
        self.events.subscribe()
    }

    // ---- lifecycle ----

    /// Attach the rendering surface; required before editing or playback
    pub async fn initialize(&self, renderer: Box<dyn RouteRenderer>) -> RouteResult<()> {
        self.request(|r| Command::Initialize(renderer, r)).await
    }

    pub async fn reset(&self) -> RouteResult<()> {
        self.request(Command::Reset).await
    }

    /// Stop playback, release collaborators and end the engine task
    pub async fn destroy(self) -> RouteResult<()> {
        self.request(Command::Shutdown).await?;
        self.task.await.map_err(|_| RouteError::EngineClosed)
    }

    pub async fn set_listener(&self, listener: Box<dyn RouteListener>) -> RouteResult<()> {
        self.request(|r| Command::SetListener(Some(listener), r)).await
    }

    pub async fn clear_listener(&self) -> RouteResult<()> {
        self.request(|r| Command::SetListener(None, r)).await
    }

    // ---- waypoints ----

    pub async fn add_point(&self, point: Waypoint) -> RouteResult<()> {
        self.request(|r| Command::AddPoint(point, r)).await
    }

    pub async fn undo_last_point(&self) -> RouteResult<Option<Waypoint>> {
        self.request(Command::UndoLastPoint).await
    }

    pub async fn clear_points(&self) -> RouteResult<()> {
        self.request(Command::ClearPoints).await
    }

    pub async fn delete_all_points(&self) -> RouteResult<()> {
        self.request(Command::DeleteAllPoints).await
    }

    pub async fn points(&self) -> RouteResult<Vec<Waypoint>> {
        self.request(Command::Snapshot).await
    }

    // ---- playback ----

    pub async fn start(&self) -> RouteResult<()> {
        self.request(|r| Command::Start(None, r)).await
    }

    pub async fn start_with_speed(&self, speed: f64) -> RouteResult<()> {
        self.request(|r| Command::Start(Some(speed), r)).await
    }

    pub async fn resume(&self) -> RouteResult<()> {
        self.request(Command::Resume).await
    }

    pub async fn pause(&self) -> RouteResult<()> {
        self.request(Command::Pause).await
    }

    pub async fn stop(&self) -> RouteResult<()> {
        self.request(Command::Stop).await
    }

    pub async fn set_speed(&self, speed: f64) -> RouteResult<()> {
        self.request(|r| Command::SetSpeed(speed, r)).await
    }

    pub async fn set_loop_mode(&self, loop_mode: bool) -> RouteResult<()> {
        self.request(|r| Command::SetLoopMode(loop_mode, r)).await
    }

    pub async fn status(&self) -> RouteResult<RouteStatus> {
        self.request(Command::Status).await
    }

    pub async fn state(&self) -> RouteResult<PlaybackState> {
        Ok(self.status().await?.state)
    }

    // ---- persistence ----

    /// Save the route; the file is written off the engine task
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> RouteResult<()> {
        let path = path.as_ref().to_path_buf();
        let file = self.request(Command::Record).await.inspect_err(|e| {
            warn!("Failed to save route to {:?}: {}", path, e);
        })?;

        tokio::task::spawn_blocking(move || file.write(&path))
            .await
            .map_err(|_| RouteError::EngineClosed)?
            .inspect_err(|e| warn!("Failed to save route: {}", e))
    }

    /// Load a route; the file is parsed before the engine is touched
    pub async fn load<P: AsRef<Path>>(&self, path: P) -> RouteResult<()> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::task::spawn_blocking(move || RouteFile::read(&path))
            .await
            .map_err(|_| RouteError::EngineClosed)?
            .inspect_err(|e| warn!("Failed to load route: {}", e))?;

        self.request(|r| Command::Apply(file, r)).await
    }
}

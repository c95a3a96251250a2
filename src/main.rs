use anyhow::{bail, Context, Result};
use route_sim::{
    validate_round_trip, Bd09, GeoTransform, LogRenderer, PlaybackState, RouteListener,
    RouteManager, Settings, Wgs84,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: route-sim [--wgs84] [--remember] <route.json> [speed-m/s]";

/// Reports playback through `tracing`
struct LogListener {
    updates: u64,
}

impl RouteListener for LogListener {
    fn on_position_update(&mut self, longitude: f64, latitude: f64) {
        self.updates += 1;
        debug!("Position #{}: {:.7}, {:.7}", self.updates, longitude, latitude);
        if self.updates % 10 == 0 {
            info!("At {:.7}, {:.7}", longitude, latitude);
        }
    }

    fn on_route_started(&mut self) {
        info!("Route started");
    }

    fn on_route_resumed(&mut self) {
        info!("Route resumed");
    }

    fn on_route_paused(&mut self) {
        info!("Route paused");
    }

    fn on_route_stopped(&mut self) {
        info!("Route stopped after {} updates", self.updates);
    }

    fn on_route_finished(&mut self) {
        info!("Route finished after {} updates", self.updates);
    }
}

struct Args {
    route: PathBuf,
    speed: Option<f64>,
    wgs84: bool,
    /// Store `speed` as the new default
    remember: bool,
}

fn parse_args() -> Result<Args> {
    let mut route = None;
    let mut speed = None;
    let mut wgs84 = false;
    let mut remember = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--wgs84" => wgs84 = true,
            "--remember" => remember = true,
            "-h" | "--help" => bail!(USAGE),
            _ if route.is_none() => route = Some(PathBuf::from(arg)),
            _ if speed.is_none() => {
                speed = Some(
                    arg.parse::<f64>()
                        .with_context(|| format!("Invalid speed: {}", arg))?,
                )
            }
            _ => bail!(USAGE),
        }
    }

    Ok(Args {
        route: route.context(USAGE)?,
        speed,
        wgs84,
        remember,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;
    let settings = Settings::load();

    let geo: Arc<dyn GeoTransform> = if args.wgs84 { Arc::new(Wgs84) } else { Arc::new(Bd09) };
    let manager = RouteManager::spawn_with_config(geo, settings.playback_config());

    manager.initialize(Box::new(LogRenderer)).await?;
    manager.set_listener(Box::new(LogListener { updates: 0 })).await?;
    manager
        .load(&args.route)
        .await
        .with_context(|| format!("Failed to load route {:?}", args.route))?;

    if !args.wgs84 {
        if let Some(first) = manager.points().await?.first() {
            let (_, error_m) = validate_round_trip(first);
            info!("BD-09 round trip near the start: {:.2} m", error_m);
        }
    }

    let mut events = manager.subscribe();
    match args.speed {
        Some(speed) => manager.start_with_speed(speed).await?,
        None => manager.start().await?,
    }
    if let (true, Some(speed)) = (args.remember, args.speed) {
        Settings { default_speed: speed, ..settings }
            .save()
            .context("Failed to save settings")?;
        info!("Default speed is now {} m/s", speed);
    }

    let status = manager.status().await?;
    if status.state != PlaybackState::Running {
        warn!("Route has {} waypoints, need at least 2", status.waypoint_count);
        manager.destroy().await?;
        return Ok(());
    }
    info!(
        "Playing {} waypoints at {} m/s (loop: {})",
        status.waypoint_count, status.speed, status.loop_mode
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                manager.stop().await?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) if event.state == PlaybackState::Idle => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Missed {} state events", skipped),
                Err(RecvError::Closed) => {
                    warn!("State events unavailable");
                    break;
                }
            }
        }
    }

    manager.destroy().await?;
    Ok(())
}

use crate::core::Waypoint;
use crate::error::{RouteError, RouteResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};

/// On-disk route document
///
/// ```json
/// { "points": [ {"longitude": 116.40, "latitude": 39.91}, ... ],
///   "loopMode": true, "speed": 1.5, "timestamp": 1700000000000 }
/// ```
///
/// Only `points` is required when reading; a missing `loopMode` or `speed`
/// leaves the engine's current value in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteFile {
    pub points: Vec<Waypoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_mode: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Capture time, milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl RouteFile {
    /// Snapshot a route, stamped with the current time
    pub fn capture(points: Vec<Waypoint>, loop_mode: bool, speed: f64) -> Self {
        Self {
            points,
            loop_mode: Some(loop_mode),
            speed: Some(speed),
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }

    /// Capture time as a UTC datetime
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }

    /// Parse a route document, rejecting a stored speed that is not usable
    pub fn parse(content: &str, path: &Path) -> RouteResult<Self> {
        let file: RouteFile = serde_json::from_str(content).map_err(|source| RouteError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(speed) = file.speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(RouteError::InvalidSpeed(speed));
            }
        }

        Ok(file)
    }

    /// Read and parse a route file
    pub fn read<P: AsRef<Path>>(path: P) -> RouteResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RouteError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| RouteError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let file = Self::parse(&content, path)?;
        debug!("Read route file {:?}: {} points", path, file.points.len());
        Ok(file)
    }

    /// Write the document in one atomic step
    ///
    /// The JSON goes to a hidden temp file beside the destination which is
    /// then renamed over it, so readers never see a half-written route.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> RouteResult<()> {
        let path = path.as_ref();
        if self.points.is_empty() {
            return Err(RouteError::EmptyRoute);
        }

        let json = serde_json::to_vec(self).map_err(|source| RouteError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;

        write_atomic(path, &json).map_err(|source| RouteError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Saved route with {} points to {:?}", self.points.len(), path);
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?;

    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

//! Error types for route playback and persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for route operations
pub type RouteResult<T> = Result<T, RouteError>;

/// Errors surfaced by the route engine.
///
/// Calling a transition from the wrong state is not an error; those calls
/// are silently ignored.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Route engine must be initialized with a renderer before use")]
    NotInitialized,

    #[error("Cannot save an empty route")]
    EmptyRoute,

    #[error("Invalid speed {0}: must be a positive, finite number of m/s")]
    InvalidSpeed(f64),

    #[error("Route file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Route file I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed route file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not encode route for {path:?}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Route engine task has shut down")]
    EngineClosed,
}

//! # Server Error Types
//!
//! Everything the server reports to callers. A ray that hits nothing is not
//! an error.

use rtserver_core::{JobId, SessionId};
use rtserver_geometry::LoadError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the raytrace server.
#[derive(Error, Debug)]
pub enum RtServerError {
    /// No geometry has been loaded.
    #[error("no geometry loaded")]
    NoGeometry,

    /// The session id is not open.
    #[error("invalid session id: {0}")]
    InvalidSession(SessionId),

    /// The queue index is out of range.
    #[error("invalid queue index {index}, server has {count} queues")]
    InvalidQueue {
        /// Requested index.
        index: usize,
        /// Number of queues.
        count: usize,
    },

    /// The instance index is out of range for the session.
    #[error("invalid instance index {index} for session {session}")]
    InvalidInstance {
        /// Session addressed.
        session: SessionId,
        /// Requested index.
        index: usize,
    },

    /// A ray array needs at least one row and one column.
    #[error("invalid array dimensions: {rows} rows x {cols} columns")]
    InvalidArray {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
    },

    /// A transform could not be inverted.
    #[error("transform matrix is singular")]
    SingularTransform,

    /// A synchronous caller is already waiting on this job.
    #[error("job {id} on session {session} is already being waited on")]
    DuplicateJob {
        /// Job id.
        id: JobId,
        /// Session id.
        session: SessionId,
    },

    /// The worker threads are not running.
    #[error("worker threads are not running")]
    NotRunning,

    /// The worker threads are already running.
    #[error("worker threads are already running")]
    AlreadyRunning,

    /// No result arrived before the deadline.
    #[error("timed out after {0:?} waiting for a job result")]
    Timeout(Duration),

    /// The server shut down while the caller was waiting.
    #[error("server shut down before the job completed")]
    ShuttingDown,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Geometry could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type for server operations.
pub type RtResult<T> = Result<T, RtServerError>;

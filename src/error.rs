use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the tracking containers, the video/tracker matcher and
/// the calibration routines.
///
/// Expected timing conditions (a frame recorded before the first tracking
/// sample, for instance) are not errors; they are reported through the
/// `in_bounds` flag of the lookup results instead.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("container is empty")]
    EmptyContainer,
    #[error("index {index} out of range for container of size {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} (line {line}): {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("no tracking matrix directories found under {0}")]
    NoTrackingData(PathBuf),
    #[error("no frame map (*.framemap.log) found under {0}")]
    NoFrameMap(PathBuf),
    #[error("video tracker matching has not been initialised")]
    NotInitialised,
    #[error("frame number {0} is not in the frame map")]
    InvalidFrameNumber(u32),
    #[error("tracker index {index} is invalid, {count} tracker(s) loaded")]
    InvalidTrackerIndex { index: usize, count: usize },
    #[error("no camera to tracker matrix set for tracker {0}")]
    MissingCameraToTracker(usize),
    #[error("given {got} parameters, but was expecting {expected}")]
    ParameterCountMismatch { expected: usize, got: usize },
    #[error("{0} parameters is not a supported configuration (6, 8, 9 or 11)")]
    UnsupportedParameterCount(usize),
    #[error("no {0} available")]
    EmptyInput(&'static str),
    #[error("the number of {what} differs ({left} vs {right})")]
    SizeMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },
    #[error("degenerate configuration: {0}")]
    Degenerate(String),
    #[error("solver failed: {0}")]
    SolverFailed(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

impl TrackingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> TrackingError {
        TrackingError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(
        path: impl Into<PathBuf>,
        line: usize,
        message: impl Into<String>,
    ) -> TrackingError {
        TrackingError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Metadata extraction failed; the file stays out of rotation until a later
/// write event triggers a fresh attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe binary could not be started.
    #[error("failed to spawn probe for {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The probe did not finish within its budget.
    #[error("probe for {} timed out after {timeout:?}", .path.display())]
    Timeout { path: PathBuf, timeout: Duration },

    /// The probe ran but rejected the file.
    #[error("probe rejected {} ({status}): {stderr}", .path.display())]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    /// The probe output could not be decoded.
    #[error("unreadable probe output for {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ProbeError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Spawn { path, .. }
            | Self::Timeout { path, .. }
            | Self::Failed { path, .. }
            | Self::Parse { path, .. } => path,
        }
    }
}

/// A player or viewer command failed. Non-fatal: the display loop retries fast.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to connect to player socket {}: {source}", .socket.display())]
    Connect {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("player connection closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("player rejected `{command}`: {reason}")]
    Rejected { command: String, reason: String },

    #[error("no reply from player within {0:?}")]
    ReplyTimeout(Duration),

    #[error("failed to launch image viewer for {}: {source}", .path.display())]
    ViewerSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode player command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A watched root could not be set up at startup. Fatal.
#[derive(Debug, Error)]
pub enum WatchSetupError {
    #[error("failed to create filesystem watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("media folder {} does not exist or is not a directory", .0.display())]
    MissingRoot(PathBuf),

    #[error("failed to watch {}: {source}", .root.display())]
    Notify {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },
}

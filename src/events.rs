use std::path::{Path, PathBuf};

/// What happened to a path, reduced from the watcher's event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
    Rename,
    Other,
}

impl ChangeKind {
    /// Remove and rename both mean the path is gone from rotation.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Remove | Self::Rename)
    }

    /// Create and write both mean the path should be (re)probed.
    pub fn is_upsert(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }
}

/// Raw notification straight from the watcher, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl RawChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Emitted once per burst after the quiet window; carries the last kind seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A probed media file. Immutable once created; a changed file is removed and
/// re-added rather than updated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub probe_failed: bool,
}

impl MediaRecord {
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        Self {
            path: path.into(),
            duration_secs,
            probe_failed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Asynchronous notification from the external player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEvent {
    pub name: String,
    pub reason: Option<String>,
    pub raw: serde_json::Value,
}

impl PlayerEvent {
    /// Playback of the current file ended because the player could not play it.
    pub fn is_error(&self) -> bool {
        self.name == "end-file" && self.reason.as_deref() == Some("error")
    }
}

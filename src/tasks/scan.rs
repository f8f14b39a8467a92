//! Initial directory walk feeding the ingestion worker.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// Roots waiting to be walked, and roots already walked.
///
/// A root moves from pending to scanned exactly once and is never walked
/// again automatically.
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    pending: Vec<PathBuf>,
    scanned: Vec<PathBuf>,
}

impl DirectoryScan {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut scan = Self::default();
        scan.add_directories(roots);
        scan
    }

    /// Queues roots that are neither pending nor scanned. Returns how many
    /// were queued.
    pub fn add_directories<I, P>(&mut self, roots: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = 0;
        for root in roots {
            let root = root.into();
            if self.pending.contains(&root) || self.scanned.contains(&root) {
                debug!(root = %root.display(), "scan: duplicate root ignored");
                continue;
            }
            self.pending.push(root);
            added += 1;
        }
        added
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub fn scanned(&self) -> &[PathBuf] {
        &self.scanned
    }

    /// Walks every pending root and returns the regular files found.
    pub fn discover(&mut self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in std::mem::take(&mut self.pending) {
            let before = found.len();
            for entry in WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| !is_hidden_below_root(e))
            {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        found.push(entry.into_path());
                    }
                    Ok(_) => {}
                    Err(err) => warn!(root = %root.display(), "scan: skipping entry: {err}"),
                }
            }
            info!(
                root = %root.display(),
                files = found.len() - before,
                "scan: root walked"
            );
            self.scanned.push(root);
        }
        found
    }
}

/// Hidden files and directories (dot-names) under a root are not media.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Whether `path` sits at or beneath a dot-named entry inside whichever of
/// `roots` contains it. The roots themselves may be dot-dirs. Paths outside
/// every root fall back to their own name.
pub fn is_hidden_under(path: &Path, roots: &[PathBuf]) -> bool {
    match roots.iter().find_map(|root| path.strip_prefix(root).ok()) {
        Some(relative) => relative.components().any(|c| match c {
            Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
            _ => false,
        }),
        None => is_hidden(path),
    }
}

fn is_hidden_below_root(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    entry.depth() > 0 && is_hidden(entry.path())
}

/// Walks the pending roots off the async runtime and streams every file to
/// the ingestion worker.
#[instrument(skip_all, fields(roots = scan.pending().len()))]
pub async fn run(
    mut scan: DirectoryScan,
    to_ingest: Sender<PathBuf>,
    cancel: CancellationToken,
) -> Result<DirectoryScan> {
    let (scan, found) = tokio::task::spawn_blocking(move || {
        let found = scan.discover();
        (scan, found)
    })
    .await
    .context("directory walk panicked")?;

    let total = found.len();
    for path in found {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; abandoning startup scan");
                return Ok(scan);
            }
            sent = to_ingest.send(path) => {
                if sent.is_err() {
                    warn!("ingest channel closed; abandoning startup scan");
                    return Ok(scan);
                }
            }
        }
    }
    info!(discovered = total, "startup recursive scan complete");
    Ok(scan)
}

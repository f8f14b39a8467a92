use crate::error::ProbeError;
use crate::events::{ChangeKind, MediaRecord, SettledChange};
use crate::pool::RotationPool;
use crate::tasks::resolver::MediaProbe;
use crate::tasks::scan::DirectoryScan;
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a path came from decides which pool it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A settled create/write from the watcher; shown next.
    Live,
    /// Found by the startup walk; joins the random rotation.
    Scan,
}

type ProbeResult = (PathBuf, u64, Origin, Result<MediaRecord, ProbeError>);

/// Tracks which probe is the current one for each path. A removal or a newer
/// probe invalidates the outstanding ticket so its result is discarded.
#[derive(Debug, Default)]
struct Tickets {
    current: HashMap<PathBuf, u64>,
    next: u64,
}

impl Tickets {
    fn issue(&mut self, path: PathBuf) -> u64 {
        let ticket = self.next;
        self.next += 1;
        if self.current.contains_key(&path) {
            debug!(path = %path.display(), "superseding in-flight probe");
        }
        self.current.insert(path, ticket);
        ticket
    }

    /// Revokes `prefix` and every path beneath it. Returns how many were
    /// outstanding.
    fn revoke_under(&mut self, prefix: &Path) -> usize {
        let before = self.current.len();
        self.current.retain(|path, _| !path.starts_with(prefix));
        before - self.current.len()
    }

    /// Consumes the ticket if it is still current.
    fn redeem(&mut self, path: &Path, ticket: u64) -> bool {
        if self.current.get(path) == Some(&ticket) {
            self.current.remove(path);
            true
        } else {
            false
        }
    }
}

/// Applies settled changes and startup discoveries to the pool.
///
/// Probes run concurrently up to `max_in_flight`; their results are applied
/// one at a time from this loop. Removals are applied immediately and never
/// wait behind probes. A removed directory takes everything beneath it; a
/// directory that appears is walked and its files queued as live.
#[instrument(skip_all, fields(max_in_flight = max_in_flight))]
pub async fn run<P: MediaProbe>(
    pool: Arc<RotationPool>,
    probe: Arc<P>,
    mut settled: Receiver<SettledChange>,
    mut discovered: Receiver<PathBuf>,
    max_in_flight: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let max_in_flight = max_in_flight.max(1);
    let mut probes: JoinSet<ProbeResult> = JoinSet::new();
    let mut walks: JoinSet<(PathBuf, Vec<PathBuf>)> = JoinSet::new();
    let mut backlog: VecDeque<(PathBuf, Origin)> = VecDeque::new();
    let mut tickets = Tickets::default();
    let mut settled_open = true;
    let mut discovered_open = true;

    loop {
        while probes.len() < max_in_flight {
            let Some((path, origin)) = backlog.pop_front() else {
                break;
            };
            let ticket = tickets.issue(path.clone());
            let probe = Arc::clone(&probe);
            debug!(path = %path.display(), ?origin, "probing");
            probes.spawn(async move {
                let result = probe.resolve(&path).await;
                (path, ticket, origin, result)
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(joined) = probes.join_next(), if !probes.is_empty() => match joined {
                Ok((path, ticket, origin, result)) => {
                    if !tickets.redeem(&path, ticket) {
                        debug!(path = %path.display(), "discarding superseded probe result");
                        continue;
                    }
                    apply(&pool, origin, result);
                }
                Err(err) => warn!("probe task failed: {err}"),
            },
            change = settled.recv(), if settled_open => match change {
                Some(change) => {
                    if let Some(dir) = on_settled(&pool, &mut backlog, &mut tickets, change) {
                        walks.spawn_blocking(move || {
                            let files = DirectoryScan::new([dir.clone()]).discover();
                            (dir, files)
                        });
                    }
                }
                None => {
                    debug!("settled change channel closed");
                    settled_open = false;
                }
            },
            Some(walked) = walks.join_next(), if !walks.is_empty() => match walked {
                Ok((dir, files)) => {
                    let found = files.len();
                    for file in files {
                        queue_live(&mut backlog, file);
                    }
                    info!(dir = %dir.display(), files = found, "directory arrived");
                }
                Err(err) => warn!("directory walk failed: {err}"),
            },
            path = discovered.recv(),
                if discovered_open && backlog.is_empty() && probes.len() < max_in_flight =>
            {
                match path {
                    Some(path) => backlog.push_back((path, Origin::Scan)),
                    None => {
                        debug!("discovery channel closed");
                        discovered_open = false;
                    }
                }
            }
            else => {
                cancel.cancelled().await;
                break;
            }
        }
    }

    probes.abort_all();
    walks.abort_all();
    info!(abandoned = probes.len(), queued = backlog.len(), "ingest stopped");
    Ok(())
}

/// Applies one settled change. Returns a directory whose contents still need
/// walking.
fn on_settled(
    pool: &RotationPool,
    backlog: &mut VecDeque<(PathBuf, Origin)>,
    tickets: &mut Tickets,
    change: SettledChange,
) -> Option<PathBuf> {
    let SettledChange { path, kind } = change;
    if kind.is_removal() {
        // The path may have been a directory; it is gone, so match by prefix.
        backlog.retain(|(queued, _)| !queued.starts_with(&path));
        let cancelled = tickets.revoke_under(&path);
        let removed = pool.remove_under(&path);
        info!(path = %path.display(), ?kind, removed, cancelled, "media removed");
        return None;
    }
    if !kind.is_upsert() {
        debug!(path = %path.display(), ?kind, "ignoring change");
        return None;
    }
    if path.is_dir() {
        if kind == ChangeKind::Create {
            return Some(path);
        }
        debug!(path = %path.display(), ?kind, "ignoring directory change");
        return None;
    }
    queue_live(backlog, path);
    None
}

fn queue_live(backlog: &mut VecDeque<(PathBuf, Origin)>, path: PathBuf) {
    match backlog.iter_mut().find(|(queued, _)| queued == &path) {
        Some(entry) => entry.1 = Origin::Live,
        None => backlog.push_back((path, Origin::Live)),
    }
}

fn apply(pool: &RotationPool, origin: Origin, result: Result<MediaRecord, ProbeError>) {
    let record = match result {
        Ok(record) => record,
        Err(err) => {
            warn!(path = %err.path().display(), "skipping unprobeable media: {err}");
            return;
        }
    };
    let path = record.path.clone();
    let duration = record.duration_secs;
    match origin {
        Origin::Live => pool.insert_as_new(record),
        Origin::Scan => pool.insert_as_unseen(record),
    }
    let stats = pool.stats();
    info!(
        path = %path.display(),
        duration,
        ?origin,
        all = stats.all,
        unseen = stats.unseen,
        new = stats.new,
        "media added"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn newer_ticket_supersedes_older() {
        let mut tickets = Tickets::default();
        let path = PathBuf::from("/m/a.mp4");
        let first = tickets.issue(path.clone());
        let second = tickets.issue(path.clone());
        assert!(!tickets.redeem(&path, first));
        assert!(tickets.redeem(&path, second));
        assert!(!tickets.redeem(&path, second));
    }

    #[test]
    fn removal_revokes_and_unqueues() {
        let pool = RotationPool::with_seed(1);
        pool.insert_as_unseen(MediaRecord::new("/m/a.jpg", 0.0));
        let mut tickets = Tickets::default();
        let mut backlog = VecDeque::from([(PathBuf::from("/m/a.jpg"), Origin::Scan)]);
        let ticket = tickets.issue(PathBuf::from("/m/a.jpg"));

        on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: PathBuf::from("/m/a.jpg"),
                kind: ChangeKind::Remove,
            },
        );
        assert!(backlog.is_empty());
        assert!(!tickets.redeem(Path::new("/m/a.jpg"), ticket));
        assert!(pool.is_empty());
    }

    #[test]
    fn directory_removal_clears_everything_beneath_it() {
        let pool = RotationPool::with_seed(2);
        pool.insert_as_unseen(MediaRecord::new("/m/album/a.jpg", 0.0));
        pool.insert_as_new(MediaRecord::new("/m/album/deep/b.mp4", 3.0));
        pool.insert_as_unseen(MediaRecord::new("/m/album2/c.jpg", 0.0));
        let mut tickets = Tickets::default();
        let in_flight = tickets.issue(PathBuf::from("/m/album/d.jpg"));
        let mut backlog = VecDeque::from([
            (PathBuf::from("/m/album/e.jpg"), Origin::Scan),
            (PathBuf::from("/m/album2/f.jpg"), Origin::Scan),
        ]);

        let walk = on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: PathBuf::from("/m/album"),
                kind: ChangeKind::Rename,
            },
        );
        assert_eq!(walk, None);
        assert!(!tickets.redeem(Path::new("/m/album/d.jpg"), in_flight));
        assert_eq!(backlog, VecDeque::from([(PathBuf::from("/m/album2/f.jpg"), Origin::Scan)]));
        assert!(!pool.contains(Path::new("/m/album/a.jpg")));
        assert!(!pool.contains(Path::new("/m/album/deep/b.mp4")));
        assert!(pool.contains(Path::new("/m/album2/c.jpg")));
    }

    #[test]
    fn created_directory_is_handed_back_for_walking() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("album2");
        fs::create_dir(&dir).unwrap();
        let pool = RotationPool::new();
        let mut tickets = Tickets::default();
        let mut backlog = VecDeque::new();

        let walk = on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: dir.clone(),
                kind: ChangeKind::Create,
            },
        );
        assert_eq!(walk, Some(dir.clone()));
        assert!(backlog.is_empty());

        let walk = on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: dir,
                kind: ChangeKind::Write,
            },
        );
        assert_eq!(walk, None);
        assert!(backlog.is_empty());
    }

    #[test]
    fn live_change_promotes_queued_scan_entry() {
        let pool = RotationPool::new();
        let mut tickets = Tickets::default();
        let mut backlog = VecDeque::from([(PathBuf::from("/m/b.jpg"), Origin::Scan)]);
        on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: PathBuf::from("/m/b.jpg"),
                kind: ChangeKind::Write,
            },
        );
        assert_eq!(backlog, VecDeque::from([(PathBuf::from("/m/b.jpg"), Origin::Live)]));
    }

    #[test]
    fn other_changes_are_ignored() {
        let pool = RotationPool::new();
        let mut tickets = Tickets::default();
        let mut backlog = VecDeque::new();
        on_settled(
            &pool,
            &mut backlog,
            &mut tickets,
            SettledChange {
                path: PathBuf::from("/m/c.jpg"),
                kind: ChangeKind::Other,
            },
        );
        assert!(backlog.is_empty());
    }
}

use crate::error::WatchSetupError;
use crate::events::{ChangeKind, RawChange};
use crate::tasks::scan::is_hidden_under;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::path::PathBuf;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info};

/// Starts a recursive watch on every root and bridges notify's callback into
/// `to_debounce`. The returned watcher must be kept alive for events to flow.
pub fn start(
    roots: &[PathBuf],
    to_debounce: Sender<RawChange>,
) -> Result<RecommendedWatcher, WatchSetupError> {
    for root in roots {
        if !root.is_dir() {
            return Err(WatchSetupError::MissingRoot(root.clone()));
        }
    }

    // Backends may report canonical paths, so match against both spellings.
    let watched: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| [Some(root.clone()), root.canonicalize().ok()])
        .flatten()
        .collect();
    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
            for change in classify(&event, &watched) {
                if to_debounce.blocking_send(change).is_err() {
                    debug!("debounce channel closed; dropping watch event");
                    return;
                }
            }
        }
        Err(err) => error!("watch error: {err}"),
    })
    .map_err(WatchSetupError::Init)?;

    for root in roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchSetupError::Notify {
                root: root.clone(),
                source,
            })?;
        match root.canonicalize() {
            Ok(abs) => info!(watching = %abs.display(), "notify watcher initialized (recursive)"),
            Err(_) => info!(watching = %root.display(), "notify watcher initialized (recursive)"),
        }
    }
    Ok(watcher)
}

/// Maps one notify event onto per-path changes. Access events are not
/// changes and produce nothing. Anything under a dot-named entry below one of
/// `roots` is ignored, matching what the startup walk skips.
pub fn classify(event: &Event, roots: &[PathBuf]) -> Vec<RawChange> {
    let kinds: Vec<(PathBuf, ChangeKind)> = match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => tag(&event.paths, ChangeKind::Create),
        EventKind::Remove(_) => tag(&event.paths, ChangeKind::Remove),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            tag(&event.paths, ChangeKind::Write)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tag(&event.paths, ChangeKind::Rename)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tag(&event.paths, ChangeKind::Create)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), ChangeKind::Rename));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), ChangeKind::Create));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Direction unknown: a path still on disk arrived, a missing one left.
            event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Create
                    } else {
                        ChangeKind::Rename
                    };
                    (p.clone(), kind)
                })
                .collect()
        }
        _ => tag(&event.paths, ChangeKind::Other),
    };

    kinds
        .into_iter()
        .filter(|(path, _)| !is_hidden_under(path, roots))
        .map(|(path, kind)| RawChange { path, kind })
        .collect()
}

fn tag(paths: &[PathBuf], kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.iter().map(|p| (p.clone(), kind)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn roots() -> Vec<PathBuf> {
        vec![PathBuf::from("/m")]
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut ev = Event::new(kind);
        for p in paths {
            ev = ev.add_path(PathBuf::from(p));
        }
        ev
    }

    #[test]
    fn maps_basic_kinds() {
        let cases = [
            (EventKind::Create(CreateKind::File), ChangeKind::Create),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                ChangeKind::Write,
            ),
            (EventKind::Remove(RemoveKind::File), ChangeKind::Remove),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                ChangeKind::Rename,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                ChangeKind::Create,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                ChangeKind::Other,
            ),
        ];
        for (kind, expected) in cases {
            let changes = classify(&event(kind, &["/m/a.jpg"]), &roots());
            assert_eq!(changes, vec![RawChange::new("/m/a.jpg", expected)], "{kind:?}");
        }
    }

    #[test]
    fn rename_both_splits_old_and_new() {
        let changes = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/m/old.jpg", "/m/new.jpg"],
            ),
            &roots(),
        );
        assert_eq!(
            changes,
            vec![
                RawChange::new("/m/old.jpg", ChangeKind::Rename),
                RawChange::new("/m/new.jpg", ChangeKind::Create),
            ]
        );
    }

    #[test]
    fn access_and_hidden_paths_are_dropped() {
        let roots = roots();
        assert!(
            classify(&event(EventKind::Access(AccessKind::Any), &["/m/a.jpg"]), &roots).is_empty()
        );
        assert!(
            classify(&event(EventKind::Create(CreateKind::File), &["/m/.a.jpg.part"]), &roots)
                .is_empty()
        );
    }

    #[test]
    fn files_inside_hidden_directories_are_dropped() {
        let roots = roots();
        for path in ["/m/.thumbnails/t.jpg", "/m/album/.cache/x/t.jpg"] {
            for kind in [
                EventKind::Create(CreateKind::File),
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                EventKind::Remove(RemoveKind::File),
            ] {
                assert!(classify(&event(kind, &[path]), &roots).is_empty(), "{path} {kind:?}");
            }
        }
        // Only the hidden half of a rename is dropped.
        let changes = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/m/.incoming/a.jpg", "/m/album/a.jpg"],
            ),
            &roots,
        );
        assert_eq!(changes, vec![RawChange::new("/m/album/a.jpg", ChangeKind::Create)]);
    }

    #[test]
    fn missing_root_fails_setup() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let Err(err) = start(&[PathBuf::from("/nonexistent/media/root")], tx) else {
            panic!("missing root was accepted");
        };
        assert!(matches!(err, WatchSetupError::MissingRoot(_)));
    }
}

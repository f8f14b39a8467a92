use crate::events::MediaRecord;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Owns the three selection pools and hands out the next file to show.
///
/// Rules:
/// - `all` is the universe of live records, keyed by path.
/// - `unseen` holds what is left of the current rotation cycle; draws from it
///   are uniform and without replacement.
/// - `fresh` is a FIFO of live-discovered records that jump the queue once.
/// - A path is never in both `unseen` and `fresh`; removal purges all three.
///
/// Every operation completes under a single lock and never blocks on I/O.
#[derive(Debug)]
pub struct RotationPool {
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    all: HashMap<PathBuf, Arc<MediaRecord>>,
    unseen: Vec<Arc<MediaRecord>>,
    fresh: VecDeque<Arc<MediaRecord>>,
    rng: StdRng,
}

/// Pool sizes at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub all: usize,
    pub unseen: usize,
    pub new: usize,
}

impl Default for RotationPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationPool {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic draws for reproducible rotations.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(PoolState {
                all: HashMap::new(),
                unseen: Vec::new(),
                fresh: VecDeque::new(),
                rng,
            }),
        }
    }

    /// Live-discovered file: show it promptly, ahead of the current cycle.
    pub fn insert_as_new(&self, record: MediaRecord) {
        let mut state = self.lock();
        let record = state.admit(record);
        debug!(path = %record.path.display(), "pool: queued new");
        state.fresh.push_back(record);
    }

    /// Bulk-scanned file: joins the current cycle with no urgency.
    pub fn insert_as_unseen(&self, record: MediaRecord) {
        let mut state = self.lock();
        let record = state.admit(record);
        state.unseen.push(record);
    }

    /// Purges `path` from every pool. Absent paths are a no-op.
    pub fn remove(&self, path: &Path) -> bool {
        let mut state = self.lock();
        let removed = state.purge(path);
        if removed {
            debug!(path = %path.display(), "pool: removed");
        }
        removed
    }

    /// Purges `prefix` and everything beneath it, for a directory that was
    /// removed or moved away. Returns the number of records dropped.
    pub fn remove_under(&self, prefix: &Path) -> usize {
        let mut state = self.lock();
        let doomed: Vec<PathBuf> = state
            .all
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        for path in &doomed {
            state.purge(path);
        }
        if !doomed.is_empty() {
            debug!(prefix = %prefix.display(), removed = doomed.len(), "pool: removed tree");
        }
        doomed.len()
    }

    /// Next record to show, or `None` when nothing is known.
    pub fn select_next(&self) -> Option<MediaRecord> {
        let mut state = self.lock();
        state.select().map(|record| (*record).clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().all.contains_key(path)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            all: state.all.len(),
            unseen: state.unseen.len(),
            new: state.fresh.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().all.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PoolState {
    fn admit(&mut self, record: MediaRecord) -> Arc<MediaRecord> {
        self.purge(&record.path);
        let record = Arc::new(record);
        self.all.insert(record.path.clone(), Arc::clone(&record));
        record
    }

    fn purge(&mut self, path: &Path) -> bool {
        if self.all.remove(path).is_none() {
            return false;
        }
        self.fresh.retain(|r| r.path != path);
        if let Some(pos) = self.unseen.iter().position(|r| r.path == path) {
            self.unseen.swap_remove(pos);
        }
        true
    }

    fn select(&mut self) -> Option<Arc<MediaRecord>> {
        if let Some(record) = self.fresh.pop_front() {
            return Some(record);
        }
        if self.unseen.is_empty() {
            if self.all.is_empty() {
                return None;
            }
            // Cycle exhausted: every live record becomes eligible again.
            self.unseen = self.all.values().cloned().collect();
            debug!(records = self.unseen.len(), "pool: new rotation cycle");
        }
        let idx = self.rng.random_range(0..self.unseen.len());
        Some(self.unseen.swap_remove(idx))
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        use std::collections::HashSet;
        let unseen: HashSet<&Path> = self.unseen.iter().map(|r| r.path.as_path()).collect();
        assert_eq!(unseen.len(), self.unseen.len(), "duplicate in unseen");
        for r in &self.unseen {
            assert!(self.all.contains_key(&r.path), "unseen not in all");
        }
        let mut fresh = HashSet::new();
        for r in &self.fresh {
            assert!(self.all.contains_key(&r.path), "new not in all");
            assert!(!unseen.contains(r.path.as_path()), "new overlaps unseen");
            assert!(fresh.insert(r.path.as_path()), "duplicate in new");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn rec(name: &str) -> MediaRecord {
        MediaRecord::new(format!("/media/{name}"), 0.0)
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool = RotationPool::with_seed(1);
        assert!(pool.select_next().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn new_files_come_first_in_fifo_order() {
        let pool = RotationPool::with_seed(2);
        for name in ["u1", "u2", "u3"] {
            pool.insert_as_unseen(rec(name));
        }
        pool.insert_as_new(rec("n1"));
        pool.insert_as_new(rec("n2"));

        assert_eq!(pool.select_next().unwrap(), rec("n1"));
        assert_eq!(pool.select_next().unwrap(), rec("n2"));
        let rest: HashSet<PathBuf> = (0..3).map(|_| pool.select_next().unwrap().path).collect();
        assert_eq!(rest.len(), 3);
        assert!(!rest.contains(Path::new("/media/n1")));
    }

    #[test]
    fn cycle_shows_each_record_once_then_restarts() {
        let pool = RotationPool::with_seed(3);
        let names: Vec<String> = (0..7).map(|i| format!("f{i}.jpg")).collect();
        for name in &names {
            pool.insert_as_unseen(rec(name));
        }
        for _ in 0..3 {
            let cycle: HashSet<PathBuf> =
                (0..names.len()).map(|_| pool.select_next().unwrap().path).collect();
            assert_eq!(cycle.len(), names.len());
        }
    }

    #[test]
    fn removing_head_of_new_queue_skips_it() {
        let pool = RotationPool::with_seed(4);
        pool.insert_as_unseen(rec("old"));
        pool.insert_as_new(rec("gone"));
        assert!(pool.remove(Path::new("/media/gone")));
        assert_eq!(pool.select_next().unwrap(), rec("old"));
        pool.lock().check_invariants();
    }

    #[test]
    fn remove_is_idempotent() {
        let pool = RotationPool::with_seed(5);
        assert!(!pool.remove(Path::new("/media/ghost")));
        pool.insert_as_unseen(rec("a"));
        assert!(pool.remove(Path::new("/media/a")));
        assert!(!pool.remove(Path::new("/media/a")));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn remove_under_drops_a_whole_directory() {
        let pool = RotationPool::with_seed(8);
        pool.insert_as_unseen(MediaRecord::new("/media/album/a.jpg", 0.0));
        pool.insert_as_new(MediaRecord::new("/media/album/deep/b.mp4", 4.0));
        pool.insert_as_unseen(MediaRecord::new("/media/album2/c.jpg", 0.0));
        pool.insert_as_new(MediaRecord::new("/media/albumx.jpg", 0.0));

        assert_eq!(pool.remove_under(Path::new("/media/album")), 2);
        pool.lock().check_invariants();
        assert!(!pool.contains(Path::new("/media/album/a.jpg")));
        assert!(!pool.contains(Path::new("/media/album/deep/b.mp4")));
        // Siblings sharing a name prefix are untouched.
        assert!(pool.contains(Path::new("/media/album2/c.jpg")));
        assert!(pool.contains(Path::new("/media/albumx.jpg")));
        assert_eq!(
            pool.stats(),
            PoolStats {
                all: 2,
                unseen: 1,
                new: 1
            }
        );

        // A plain file path behaves like `remove`.
        assert_eq!(pool.remove_under(Path::new("/media/albumx.jpg")), 1);
        assert_eq!(pool.remove_under(Path::new("/media/ghost")), 0);
    }

    #[test]
    fn reinserting_a_live_path_moves_it_between_pools() {
        let pool = RotationPool::with_seed(6);
        pool.insert_as_unseen(MediaRecord::new("/media/a", 1.0));
        pool.insert_as_new(MediaRecord::new("/media/a", 2.0));
        assert_eq!(
            pool.stats(),
            PoolStats {
                all: 1,
                unseen: 0,
                new: 1
            }
        );
        pool.lock().check_invariants();
        assert_eq!(pool.select_next().unwrap().duration_secs, 2.0);
    }

    #[test]
    fn invariants_hold_across_mixed_operations() {
        let pool = RotationPool::with_seed(7);
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..2_000 {
            let name = format!("f{}", rng.random_range(0..12));
            match rng.random_range(0..4) {
                0 => pool.insert_as_new(rec(&name)),
                1 => pool.insert_as_unseen(rec(&name)),
                2 => {
                    pool.remove(Path::new(&format!("/media/{name}")));
                }
                _ => {
                    if let Some(picked) = pool.select_next() {
                        assert!(pool.contains(&picked.path));
                    }
                }
            }
            pool.lock().check_invariants();
        }
    }

    #[test]
    fn draws_are_roughly_uniform_over_first_position() {
        let mut firsts: HashMap<PathBuf, usize> = HashMap::new();
        for seed in 0..2_000 {
            let pool = RotationPool::with_seed(seed);
            for name in ["a", "b", "c", "d"] {
                pool.insert_as_unseen(rec(name));
            }
            *firsts.entry(pool.select_next().unwrap().path).or_default() += 1;
        }
        assert_eq!(firsts.len(), 4);
        for count in firsts.values() {
            assert!((350..=650).contains(count), "biased first draw: {firsts:?}");
        }
    }
}

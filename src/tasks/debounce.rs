//! Per-path quiet-window debouncing of raw watcher events.
//!
//! Each path owns at most one pending timer. A new event for the path cancels
//! that timer and starts a fresh one carrying the newer kind, so a burst
//! settles exactly once, one full window after its last event.

use crate::events::{RawChange, SettledChange};
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

struct Timer {
    id: u64,
    handle: AbortHandle,
}

/// Keyed one-shot timers where scheduling a key replaces its pending timer.
pub struct TimerRegistry<K> {
    timers: Mutex<HashMap<K, Timer>>,
    next_id: AtomicU64,
}

impl<K> Default for TimerRegistry<K> {
    fn default() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K> TimerRegistry<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `on_fire` after `delay` unless `key` is rescheduled or the
    /// registry is abandoned first. Returns true when a pending timer for the
    /// key was replaced.
    pub fn schedule<F>(self: &Arc<Self>, key: K, delay: Duration, on_fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let fire_key = key.clone();

        // Held across spawn and insert so the task cannot retire itself
        // before its entry exists.
        let mut timers = self.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.retire(&fire_key, id) {
                on_fire.await;
            }
        })
        .abort_handle();

        match timers.insert(key, Timer { id, handle }) {
            Some(previous) => {
                previous.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer. Returns how many were dropped.
    pub fn abandon_all(&self) -> usize {
        let mut timers = self.lock();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn retire(&self, key: &K, id: u64) -> bool {
        let mut timers = self.lock();
        match timers.get(key) {
            Some(timer) if timer.id == id => {
                timers.remove(key);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Timer>> {
        self.timers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Collapses raw changes into settled ones until cancelled. Changes still
/// inside their window at shutdown are dropped.
#[instrument(skip_all, fields(window = %humantime::format_duration(window)))]
pub async fn run(
    mut raw: Receiver<RawChange>,
    settled: Sender<SettledChange>,
    window: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let timers: Arc<TimerRegistry<PathBuf>> = TimerRegistry::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = raw.recv() => {
                let Some(RawChange { path, kind }) = change else {
                    debug!("raw change channel closed; waiting for shutdown");
                    cancel.cancelled().await;
                    break;
                };
                let out = settled.clone();
                let stop = cancel.clone();
                let settled_change = SettledChange { path: path.clone(), kind };
                let fire = async move {
                    let path = settled_change.path.clone();
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        sent = out.send(settled_change) => {
                            if sent.is_err() {
                                debug!(path = %path.display(), "settled channel closed");
                            }
                        }
                    }
                };
                if timers.schedule(path.clone(), window, fire) {
                    debug!(path = %path.display(), ?kind, "debounce window reset");
                }
            }
        }
    }

    let dropped = timers.abandon_all();
    info!(dropped, "debounce stopped");
    Ok(())
}

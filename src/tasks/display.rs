use crate::events::{MediaRecord, PlayerEvent};
use crate::playback::{self, ImageDisplay, MediaPlayer, PlaybackAction, SlideTiming};
use crate::pool::RotationPool;
use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Everything the display cycle needs besides the pool.
pub struct DisplayDriver<P, V> {
    pub player: P,
    pub viewer: V,
    pub timing: SlideTiming,
    /// Shown whenever the pool is empty; never part of the rotation.
    pub splash: Option<MediaRecord>,
    /// Seeds clip offsets; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl<P, V> DisplayDriver<P, V>
where
    P: MediaPlayer + Send + Sync,
    V: ImageDisplay + Send + Sync,
{
    /// Self-paced display loop. The first cycle runs immediately; each cycle's
    /// outcome sets the wait before the next one. Player events are drained
    /// and logged while waiting.
    #[instrument(skip_all, name = "display")]
    pub async fn run(
        self,
        pool: Arc<RotationPool>,
        mut player_events: Receiver<PlayerEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut events_open = true;
        let mut cycles: u64 = 0;

        loop {
            let record = pool.select_next().or_else(|| self.splash.clone());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = playback::execute(
                    record.as_ref(),
                    &self.timing,
                    &self.player,
                    &self.viewer,
                    &mut rng,
                ) => outcome,
            };
            cycles += 1;
            if matches!(outcome.decision.action, PlaybackAction::NoMedia) {
                debug!("rotation pool empty and no splash configured");
            }
            debug!(
                delay = %humantime::format_duration(outcome.delay),
                failed = outcome.error.is_some(),
                "display cycle complete"
            );

            let sleep = tokio::time::sleep(outcome.delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(cycles, "display stopped");
                        return Ok(());
                    }
                    _ = &mut sleep => break,
                    event = player_events.recv(), if events_open => match event {
                        Some(event) => log_player_event(&event),
                        None => events_open = false,
                    },
                }
            }
        }

        info!(cycles, "display stopped");
        Ok(())
    }
}

fn log_player_event(event: &PlayerEvent) {
    if event.is_error() {
        error!(event = %event.name, detail = %event.raw, "player failed to play media");
    } else {
        debug!(event = %event.name, reason = ?event.reason, "player event");
    }
}

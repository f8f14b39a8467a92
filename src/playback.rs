//! Per-cycle playback policy.
//!
//! [`decide`] maps the selected record to an action and the delay before the
//! next cycle; [`execute`] issues the action against the player or viewer and
//! swaps in the fast-retry delay when that fails.

use crate::error::PlaybackError;
use crate::events::MediaRecord;
use rand::Rng;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Files shorter than this are treated as still images.
pub const STILL_IMAGE_MAX_SECS: f64 = 0.1;
/// Video slot length relative to the slide duration.
pub const VIDEO_DURATION_MULTIPLIER: f64 = 1.5;
/// Short clips stay on screen for at least `video / SHORT_CLIP_FLOOR_DIVISOR`.
pub const SHORT_CLIP_FLOOR_DIVISOR: f64 = 4.0;
/// Delay after a failed player or viewer command.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);
/// Delay while there is nothing to show.
pub const NO_MEDIA_DELAY: Duration = Duration::from_secs(1);
/// Characters that cannot appear in a clip descriptor path.
pub const CLIP_RESERVED_CHARS: [char; 3] = [',', ';', '='];

/// Slide and video slot lengths, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTiming {
    pub slide_secs: f64,
    pub video_secs: f64,
}

impl SlideTiming {
    pub fn new(slide_secs: f64) -> Self {
        Self {
            slide_secs,
            video_secs: slide_secs * VIDEO_DURATION_MULTIPLIER,
        }
    }
}

/// Sub-range of a longer video.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipDescriptor {
    pub path: PathBuf,
    pub start_secs: f64,
    pub length_secs: f64,
}

impl ClipDescriptor {
    /// `None` when the path contains a character the descriptor syntax reserves.
    pub fn new(path: &Path, start_secs: f64, length_secs: f64) -> Option<Self> {
        if !is_clip_safe(path) {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            start_secs,
            length_secs,
        })
    }

    /// mpv EDL form: `edl://<path>,start=<s>,length=<l>`.
    pub fn to_edl(&self) -> String {
        format!(
            "edl://{},start={:.3},length={:.3}",
            self.path.display(),
            self.start_secs,
            self.length_secs
        )
    }
}

pub fn is_clip_safe(path: &Path) -> bool {
    !path.to_string_lossy().contains(CLIP_RESERVED_CHARS)
}

/// What the player should open.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadTarget {
    File(PathBuf),
    Clip(ClipDescriptor),
}

impl LoadTarget {
    pub fn to_player_arg(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Clip(clip) => clip.to_edl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    NoMedia,
    ShowImage { path: PathBuf, duration: Duration },
    PlayClip(ClipDescriptor),
    PlayFull(PathBuf),
}

/// Action for this cycle plus the delay to wait when it succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: PlaybackAction,
    pub delay: Duration,
}

/// Result of one display cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    pub decision: Decision,
    pub delay: Duration,
    pub error: Option<PlaybackError>,
}

/// The long-running external player.
pub trait MediaPlayer {
    fn load(
        &self,
        target: &LoadTarget,
    ) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn set_playing(
        &self,
        playing: bool,
    ) -> impl Future<Output = Result<(), PlaybackError>> + Send;
}

/// Short-lived image viewer, fire-and-forget.
pub trait ImageDisplay {
    fn display(&self, path: &Path, duration: Duration) -> Result<(), PlaybackError>;
}

/// Pure transition: selected record to (action, delay).
pub fn decide<R: Rng>(
    record: Option<&MediaRecord>,
    timing: &SlideTiming,
    rng: &mut R,
) -> Decision {
    let Some(record) = record else {
        return Decision {
            action: PlaybackAction::NoMedia,
            delay: NO_MEDIA_DELAY,
        };
    };

    let duration = record.duration_secs;
    let video = timing.video_secs;

    if duration < STILL_IMAGE_MAX_SECS {
        let slide = secs(timing.slide_secs);
        return Decision {
            action: PlaybackAction::ShowImage {
                path: record.path.clone(),
                duration: slide,
            },
            delay: slide,
        };
    }

    if duration > video {
        let span = duration - video;
        let start = if span > 0.0 {
            rng.random_range(0.0..=span)
        } else {
            0.0
        };
        if let Some(clip) = ClipDescriptor::new(&record.path, start, video) {
            return Decision {
                action: PlaybackAction::PlayClip(clip),
                delay: secs(video),
            };
        }
    }

    Decision {
        action: PlaybackAction::PlayFull(record.path.clone()),
        delay: secs(duration.max(video / SHORT_CLIP_FLOOR_DIVISOR)),
    }
}

/// Runs one cycle: decide, issue the command, settle the next delay.
pub async fn execute<P, V, R>(
    record: Option<&MediaRecord>,
    timing: &SlideTiming,
    player: &P,
    viewer: &V,
    rng: &mut R,
) -> CycleOutcome
where
    P: MediaPlayer,
    V: ImageDisplay,
    R: Rng,
{
    let decision = decide(record, timing, rng);
    let result = match &decision.action {
        PlaybackAction::NoMedia => {
            warn!("no media available");
            Ok(())
        }
        PlaybackAction::ShowImage { path, duration } => {
            info!(path = %path.display(), "showing image");
            viewer.display(path, *duration)
        }
        PlaybackAction::PlayClip(clip) => {
            info!(
                path = %clip.path.display(),
                start = clip.start_secs,
                length = clip.length_secs,
                "playing video clip"
            );
            play(player, &LoadTarget::Clip(clip.clone())).await
        }
        PlaybackAction::PlayFull(path) => {
            info!(path = %path.display(), "playing video");
            play(player, &LoadTarget::File(path.clone())).await
        }
    };

    match result {
        Ok(()) => CycleOutcome {
            delay: decision.delay,
            decision,
            error: None,
        },
        Err(err) => {
            warn!(error = %err, "playback command failed; retrying shortly");
            CycleOutcome {
                delay: RETRY_DELAY,
                decision,
                error: Some(err),
            }
        }
    }
}

async fn play<P: MediaPlayer>(player: &P, target: &LoadTarget) -> Result<(), PlaybackError> {
    player.load(target).await?;
    player.set_playing(true).await
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

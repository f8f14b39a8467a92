use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::playback::SlideTiming;

pub const DEFAULT_MEDIA_DURATION_SECS: f64 = 12.0;
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Roots walked once at startup and watched recursively afterwards.
    #[serde(default = "Configuration::default_media_folders")]
    pub media_folders: Vec<PathBuf>,
    /// Shown whenever the rotation pool is empty.
    #[serde(default)]
    pub splash_screen: Option<PathBuf>,
    /// Seconds each still image stays on screen; videos get 1.5x this.
    #[serde(default = "Configuration::default_media_duration")]
    pub media_duration: f64,
    /// mpv `--input-ipc-server` socket.
    #[serde(default = "Configuration::default_player_socket")]
    pub player_socket: PathBuf,
    #[serde(default)]
    pub image_viewer: ImageViewerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Quiet period before a burst of filesystem events settles.
    #[serde(
        default = "Configuration::default_debounce_window",
        with = "humantime_serde"
    )]
    pub debounce_window: Duration,
    /// Optional deterministic seed for rotation draws and clip offsets.
    #[serde(default)]
    pub rotation_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageViewerConfig {
    /// Program and leading arguments; the image path is appended.
    #[serde(default = "ImageViewerConfig::default_command")]
    pub command: Vec<String>,
    /// Exported as `DISPLAY` for the viewer process.
    #[serde(default = "ImageViewerConfig::default_display")]
    pub display: Option<String>,
    /// Extra time past the slide before the viewer is killed.
    #[serde(default = "ImageViewerConfig::default_grace", with = "humantime_serde")]
    pub grace: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default = "ProbeConfig::default_command")]
    pub command: String,
    #[serde(default = "ProbeConfig::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound on probes running at the same time.
    #[serde(default = "ProbeConfig::default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_yaml_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.media_folders.is_empty(),
            "media-folders must name at least one directory"
        );
        ensure!(
            self.media_folders
                .iter()
                .all(|p| !p.as_os_str().is_empty()),
            "media-folders must not contain empty paths"
        );
        ensure!(
            self.media_duration.is_finite() && self.media_duration > 0.0,
            "media-duration must be a positive number of seconds"
        );
        ensure!(
            !self.player_socket.as_os_str().is_empty(),
            "player-socket must not be empty"
        );
        ensure!(
            !self.debounce_window.is_zero(),
            "debounce-window must be greater than zero"
        );
        ensure!(
            !self.image_viewer.command.is_empty(),
            "image-viewer.command must name a program"
        );
        ensure!(
            !self.probe.command.trim().is_empty(),
            "probe.command must name a program"
        );
        ensure!(
            !self.probe.timeout.is_zero(),
            "probe.timeout must be greater than zero"
        );
        ensure!(
            self.probe.max_concurrent > 0,
            "probe.max-concurrent must be greater than zero"
        );
        Ok(self)
    }

    pub fn timing(&self) -> SlideTiming {
        SlideTiming::new(self.media_duration)
    }

    fn default_media_folders() -> Vec<PathBuf> {
        vec![PathBuf::from(".")]
    }

    const fn default_media_duration() -> f64 {
        DEFAULT_MEDIA_DURATION_SECS
    }

    fn default_player_socket() -> PathBuf {
        PathBuf::from("/tmp/mpv_socket")
    }

    const fn default_debounce_window() -> Duration {
        DEFAULT_DEBOUNCE_WINDOW
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            media_folders: Self::default_media_folders(),
            splash_screen: None,
            media_duration: Self::default_media_duration(),
            player_socket: Self::default_player_socket(),
            image_viewer: ImageViewerConfig::default(),
            probe: ProbeConfig::default(),
            debounce_window: Self::default_debounce_window(),
            rotation_seed: None,
        }
    }
}

impl ImageViewerConfig {
    fn default_command() -> Vec<String> {
        ["feh", "-Z", "-Y", "-F"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn default_display() -> Option<String> {
        Some(":0".to_string())
    }

    const fn default_grace() -> Duration {
        Duration::from_millis(500)
    }
}

impl Default for ImageViewerConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            display: Self::default_display(),
            grace: Self::default_grace(),
        }
    }
}

impl ProbeConfig {
    fn default_command() -> String {
        "ffprobe".to_string()
    }

    const fn default_timeout() -> Duration {
        DEFAULT_PROBE_TIMEOUT
    }

    const fn default_max_concurrent() -> usize {
        4
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            timeout: Self::default_timeout(),
            max_concurrent: Self::default_max_concurrent(),
        }
    }
}

use crate::config::ImageViewerConfig;
use crate::error::PlaybackError;
use crate::playback::ImageDisplay;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Launches an external viewer per image and lets it run for the slide.
///
/// The process is reaped by a background task that kills it once its budget
/// (`duration + grace`) runs out. Only a failure to start is reported.
#[derive(Debug, Clone)]
pub struct ProcessImageViewer {
    command: Vec<String>,
    display: Option<String>,
    grace: Duration,
}

impl ProcessImageViewer {
    pub fn new(command: Vec<String>, display: Option<String>, grace: Duration) -> Self {
        Self {
            command,
            display,
            grace,
        }
    }

    pub fn from_config(cfg: &ImageViewerConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.display.clone(), cfg.grace)
    }
}

impl ImageDisplay for ProcessImageViewer {
    fn display(&self, path: &Path, duration: Duration) -> Result<(), PlaybackError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(PlaybackError::ViewerSpawn {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty viewer command"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(display) = &self.display {
            cmd.env("DISPLAY", display);
        }

        let mut child = cmd.spawn().map_err(|source| PlaybackError::ViewerSpawn {
            path: path.to_path_buf(),
            source,
        })?;

        let budget = duration + self.grace;
        let path = path.to_path_buf();
        tokio::spawn(async move {
            match tokio::time::timeout(budget, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(path = %path.display(), %status, "image viewer exited");
                }
                Ok(Err(err)) => {
                    warn!(path = %path.display(), "waiting on image viewer failed: {err}");
                }
                Err(_) => {
                    debug!(
                        path = %path.display(),
                        budget = %humantime::format_duration(budget),
                        "image viewer budget elapsed; stopping"
                    );
                    if let Err(err) = child.kill().await {
                        debug!(path = %path.display(), "image viewer already gone: {err}");
                    }
                }
            }
        });
        Ok(())
    }
}

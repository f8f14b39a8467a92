use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::events::MediaRecord;
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Turns a path into a classified [`MediaRecord`].
pub trait MediaProbe: Send + Sync + 'static {
    fn resolve(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<MediaRecord, ProbeError>> + Send;
}

/// Runs `ffprobe` once per call, bounded by a timeout. The child is killed
/// when the timeout abandons it.
#[derive(Debug, Clone)]
pub struct FfprobeResolver {
    command: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

impl FfprobeResolver {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.timeout)
    }
}

impl MediaProbe for FfprobeResolver {
    async fn resolve(&self, path: &Path) -> Result<MediaRecord, ProbeError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::Spawn {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(_) => {
                return Err(ProbeError::Timeout {
                    path: path.to_path_buf(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let record = parse_probe_output(path, &output.stdout)?;
        debug!(
            path = %path.display(),
            duration = record.duration_secs,
            probe_failed = record.probe_failed,
            "probed media"
        );
        Ok(record)
    }
}

/// Reads `format.duration` from ffprobe's JSON. A missing or unparsable
/// duration yields a zero-length record flagged `probe_failed`.
pub fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<MediaRecord, ProbeError> {
    let parsed: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|source| ProbeError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(match duration {
        Some(secs) => MediaRecord::new(path, secs),
        None => MediaRecord {
            path: path.to_path_buf(),
            duration_secs: 0.0,
            probe_failed: true,
        },
    })
}

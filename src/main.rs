use anyhow::{Context, Result};
use clap::Parser;
use rust_media_frame::config::Configuration;
use rust_media_frame::events::{MediaRecord, PlayerEvent, RawChange, SettledChange};
use rust_media_frame::platform::image_viewer::ProcessImageViewer;
use rust_media_frame::platform::mpv::MpvClient;
use rust_media_frame::pool::RotationPool;
use rust_media_frame::tasks::display::DisplayDriver;
use rust_media_frame::tasks::resolver::{FfprobeResolver, MediaProbe};
use rust_media_frame::tasks::scan::DirectoryScan;
use rust_media_frame::tasks::{debounce, ingest, scan, watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[derive(Debug, Parser)]
#[command(
    name = "media-frame",
    version,
    about = "Rotates photos and video clips from watched folders"
)]
struct Args {
    /// Path to YAML config (optional; every key has a default)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Folders to scan and watch, comma separated
    #[arg(long = "media-folders", value_name = "DIRS", value_delimiter = ',')]
    media_folders: Option<Vec<PathBuf>>,
    /// Media shown while nothing else is available
    #[arg(long = "splash-screen", value_name = "PATH")]
    splash_screen: Option<PathBuf>,
    /// Seconds per still image; videos get 1.5x this
    #[arg(long = "media-duration", value_name = "SECS")]
    media_duration: Option<f64>,
    /// Log level used when RUST_LOG is unset
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        media_folders,
        splash_screen,
        media_duration,
        log_level,
    } = Args::parse();

    // RUST_LOG wins; otherwise --log-level, falling back to info.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        .with_target(false)
        .compact()
        .init();

    let mut cfg = match &config {
        Some(path) => Configuration::from_yaml_file(path)?,
        None => Configuration::default(),
    };
    if let Some(folders) = media_folders {
        cfg.media_folders = folders;
    }
    if splash_screen.is_some() {
        cfg.splash_screen = splash_screen;
    }
    if let Some(secs) = media_duration {
        cfg.media_duration = secs;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!("Loaded configuration:\n{:#?}", cfg);

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sigterm.recv() => {
                            tracing::info!("SIGTERM received; initiating shutdown");
                            cancel.cancel();
                        }
                    }
                }
                Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
            }
        });
    }

    // Channels (bounded)
    let (player_events_tx, player_events_rx) = mpsc::channel::<PlayerEvent>(64); // Player -> Display
    let (raw_tx, raw_rx) = mpsc::channel::<RawChange>(512); // Watcher -> Debounce
    let (settled_tx, settled_rx) = mpsc::channel::<SettledChange>(512); // Debounce -> Ingest
    let (discovered_tx, discovered_rx) = mpsc::channel::<PathBuf>(512); // Scan -> Ingest

    let player = MpvClient::connect(&cfg.player_socket, player_events_tx)
        .await
        .context("failed to connect to the media player")?;
    let viewer = ProcessImageViewer::from_config(&cfg.image_viewer);
    let resolver = Arc::new(FfprobeResolver::from_config(&cfg.probe));
    let pool = Arc::new(match cfg.rotation_seed {
        Some(seed) => RotationPool::with_seed(seed),
        None => RotationPool::new(),
    });

    let roots = DirectoryScan::new(cfg.media_folders.iter().cloned());
    // Keep the watcher alive for the lifetime of the process.
    let _watcher =
        watcher::start(roots.pending(), raw_tx).context("failed to watch media folders")?;

    let splash = match &cfg.splash_screen {
        Some(path) => resolve_splash(resolver.as_ref(), path).await,
        None => None,
    };

    let mut tasks = JoinSet::new();

    // Debounce
    tasks.spawn({
        let cancel = cancel.clone();
        let window = cfg.debounce_window;
        async move {
            debounce::run(raw_rx, settled_tx, window, cancel)
                .await
                .context("debounce task failed")
        }
    });

    // Startup scan
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            scan::run(roots, discovered_tx, cancel)
                .await
                .map(|_| ())
                .context("scan task failed")
        }
    });

    // Ingest
    tasks.spawn({
        let pool = Arc::clone(&pool);
        let resolver = Arc::clone(&resolver);
        let cancel = cancel.clone();
        let max_in_flight = cfg.probe.max_concurrent;
        async move {
            ingest::run(pool, resolver, settled_rx, discovered_rx, max_in_flight, cancel)
                .await
                .context("ingest task failed")
        }
    });

    // Display
    tasks.spawn({
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        let driver = DisplayDriver {
            player,
            viewer,
            timing: cfg.timing(),
            splash,
            // Offset so clip starts do not mirror the pool's draws.
            seed: cfg.rotation_seed.map(|s| s.wrapping_add(1)),
        };
        async move {
            driver
                .run(pool, player_events_rx, cancel)
                .await
                .context("display task failed")
        }
    });

    // Drain JoinSet (wait for tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("task error: {e:?}");
                cancel.cancel();
            }
            Err(e) => {
                tracing::error!("join error: {e}");
                cancel.cancel();
            }
        }
    }

    Ok(())
}

async fn resolve_splash<P: MediaProbe>(probe: &P, path: &Path) -> Option<MediaRecord> {
    match probe.resolve(path).await {
        Ok(record) => {
            tracing::info!(
                path = %path.display(),
                duration = record.duration_secs,
                "splash screen ready"
            );
            Some(record)
        }
        Err(err) => {
            tracing::warn!("splash screen unavailable: {err}");
            None
        }
    }
}

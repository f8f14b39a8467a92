pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod pool;
pub mod platform {
    pub mod image_viewer;
    pub mod mpv;
}
pub mod tasks {
    pub mod debounce;
    pub mod display;
    pub mod ingest;
    pub mod resolver;
    pub mod scan;
    pub mod watcher;
}

//! JSON IPC client for a long-running mpv instance.
//!
//! mpv must be started with an IPC socket, for example:
//! `mpv --image-display-duration=inf --idle=once --keep-open=yes --input-ipc-server=/tmp/mpv_socket`
//!
//! Commands go out as JSON lines tagged with a `request_id`; a reader task
//! routes replies back to their callers and forwards events.

use crate::error::PlaybackError;
use crate::events::PlayerEvent;
use crate::playback::{LoadTarget, MediaPlayer};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = Result<Value, String>;
type PendingReplies = Arc<StdMutex<HashMap<u64, oneshot::Sender<Reply>>>>;

#[derive(Debug)]
pub struct MpvClient {
    socket: PathBuf,
    conn: Mutex<Option<Connection>>,
    next_request: AtomicU64,
    events: Sender<PlayerEvent>,
    reply_timeout: Duration,
}

#[derive(Debug)]
struct Connection {
    writer: OwnedWriteHalf,
    pending: PendingReplies,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Serialize)]
struct Request<'a> {
    command: &'a [Value],
    request_id: u64,
}

impl MpvClient {
    /// Opens the initial connection. Failing here is fatal for the caller.
    pub async fn connect(
        socket: impl AsRef<Path>,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, PlaybackError> {
        let socket = socket.as_ref().to_path_buf();
        let conn = Connection::open(&socket, events.clone()).await?;
        info!(socket = %socket.display(), "connected to player");
        Ok(Self {
            socket,
            conn: Mutex::new(Some(conn)),
            next_request: AtomicU64::new(1),
            events,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Sends one command, reconnecting once if the channel turned out closed.
    pub async fn command(&self, args: &[Value]) -> Result<Value, PlaybackError> {
        match self.send_once(args).await {
            Err(PlaybackError::Closed | PlaybackError::Io(_)) => {
                warn!(socket = %self.socket.display(), "player channel closed; reconnecting");
                self.reconnect().await?;
                self.send_once(args).await
            }
            other => other,
        }
    }

    async fn reconnect(&self) -> Result<(), PlaybackError> {
        let mut guard = self.conn.lock().await;
        *guard = None;
        *guard = Some(Connection::open(&self.socket, self.events.clone()).await?);
        info!(socket = %self.socket.display(), "reconnected to player");
        Ok(())
    }

    async fn send_once(&self, args: &[Value]) -> Result<Value, PlaybackError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_vec(&Request {
            command: args,
            request_id,
        })?;
        line.push(b'\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = {
            let mut guard = self.conn.lock().await;
            let conn = match guard.as_mut() {
                Some(conn) if !conn.closed.load(Ordering::Acquire) => conn,
                _ => return Err(PlaybackError::Closed),
            };
            if !register(&conn.pending, &conn.closed, request_id, reply_tx) {
                return Err(PlaybackError::Closed);
            }
            if let Err(err) = conn.writer.write_all(&line).await {
                forget(&conn.pending, request_id);
                conn.closed.store(true, Ordering::Release);
                return Err(err.into());
            }
            Arc::clone(&conn.pending)
        };

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(reason))) => Err(PlaybackError::Rejected {
                command: describe(args),
                reason,
            }),
            Ok(Err(_)) => Err(PlaybackError::Closed),
            Err(_) => {
                forget(&pending, request_id);
                Err(PlaybackError::ReplyTimeout(self.reply_timeout))
            }
        }
    }
}

impl MediaPlayer for MpvClient {
    async fn load(&self, target: &LoadTarget) -> Result<(), PlaybackError> {
        self.command(&[json!("loadfile"), json!(target.to_player_arg())])
            .await
            .map(|_| ())
    }

    async fn set_playing(&self, playing: bool) -> Result<(), PlaybackError> {
        self.command(&[json!("set_property"), json!("pause"), json!(!playing)])
            .await
            .map(|_| ())
    }
}

impl Connection {
    async fn open(socket: &Path, events: Sender<PlayerEvent>) -> Result<Self, PlaybackError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|source| PlaybackError::Connect {
                socket: socket.to_path_buf(),
                source,
            })?;
        let (read_half, writer) = stream.into_split();
        let pending: PendingReplies = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_replies(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&closed),
            events,
        ));
        Ok(Self {
            writer,
            pending,
            closed,
            reader,
        })
    }
}

async fn read_replies(
    read_half: OwnedReadHalf,
    pending: PendingReplies,
    closed: Arc<AtomicBool>,
    events: Sender<PlayerEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch(&line, &pending, &events),
            Ok(None) => {
                debug!("player closed the IPC socket");
                break;
            }
            Err(err) => {
                warn!("player IPC read failed: {err}");
                break;
            }
        }
    }
    close_pending(&pending, &closed);
}

/// Marks the connection closed and wakes every waiter with a closed-channel
/// error. Holds the pending lock so no request can register in between.
fn close_pending(pending: &PendingReplies, closed: &AtomicBool) {
    let mut waiters = lock_pending(pending);
    closed.store(true, Ordering::Release);
    waiters.clear();
}

fn dispatch(line: &str, pending: &PendingReplies, events: &Sender<PlayerEvent>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            debug!(line, "ignoring malformed player message: {err}");
            return;
        }
    };

    if let Some(request_id) = value.get("request_id").and_then(Value::as_u64) {
        let Some(waiter) = lock_pending(pending).remove(&request_id) else {
            debug!(request_id, "reply for unknown request");
            return;
        };
        let status = value.get("error").and_then(Value::as_str).unwrap_or("success");
        let reply = if status == "success" {
            Ok(value.get("data").cloned().unwrap_or(Value::Null))
        } else {
            Err(status.to_string())
        };
        let _ = waiter.send(reply);
        return;
    }

    if let Some(name) = value.get("event").and_then(Value::as_str) {
        let event = PlayerEvent {
            name: name.to_string(),
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw: value.clone(),
        };
        if events.try_send(event).is_err() {
            debug!(event = name, "player event dropped; listener busy or gone");
        }
    }
}

fn lock_pending(
    pending: &PendingReplies,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Parks a waiter for `request_id`. Refuses once the reader has shut down.
fn register(
    pending: &PendingReplies,
    closed: &AtomicBool,
    request_id: u64,
    waiter: oneshot::Sender<Reply>,
) -> bool {
    let mut waiters = lock_pending(pending);
    if closed.load(Ordering::Acquire) {
        return false;
    }
    waiters.insert(request_id, waiter);
    true
}

fn forget(pending: &PendingReplies, request_id: u64) {
    lock_pending(pending).remove(&request_id);
}

fn describe(args: &[Value]) -> String {
    args.iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

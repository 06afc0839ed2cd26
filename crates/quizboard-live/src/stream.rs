// Long-lived server-push connection with unbounded jittered reconnects.
//
// A `StreamConnection` owns one spawned task that repeatedly opens the
// transport, decodes every message as JSON into the caller's payload type and
// hands it to the event handler. Transport failures, server-initiated closes
// and idle timeouts all lead to the same backoff-then-reopen path; only
// `close()` (or dropping the connection) ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use quizboard_core::config::StreamConfig;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Connection-level failure of one attempt. Always followed by a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("stream closed by server")]
    Ended,

    #[error("no data received for {0:?}")]
    Idle(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message that is not valid JSON or does not have the expected shape.
    /// The connection stays open.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The backend reported a failure in-band on the stream.
    #[error("server reported: {0}")]
    Server(String),
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// What one connection attempt yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake completed.
    Open,
    /// Raw data of one pushed message.
    Message(String),
}

pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Opens one connection attempt to an API-relative stream path.
///
/// The returned stream ends (or yields an error) when the attempt is over;
/// dropping it must release the underlying connection.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, path: &str) -> FrameStream;
}

// ---------------------------------------------------------------------------
// Observable state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Snapshot of a connection's health, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    pub attempt: u32,
    /// Most recent problem seen; cleared when a connection opens.
    pub last_error: Option<StreamError>,
}

impl StreamStatus {
    fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            last_error: None,
        }
    }

    /// True while the consumer should show a "connection issue" indicator.
    pub fn is_degraded(&self) -> bool {
        matches!(self.state, ConnectionState::Reconnecting)
            || (self.state == ConnectionState::Connecting && self.attempt > 0)
    }
}

/// Delivered to the handler for every decoded message and every problem.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Message(T),
    Error(StreamError),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter: f64,
    /// Treat an attempt as dead when no frame arrives for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl StreamOptions {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            jitter: config.jitter,
            idle_timeout: config.idle_timeout(),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_max, self.jitter)
    }
}

// ---------------------------------------------------------------------------
// StreamConnection
// ---------------------------------------------------------------------------

/// Handle to one reconnecting push stream. Dropping it closes the stream.
pub struct StreamConnection {
    path: String,
    closed: Arc<AtomicBool>,
    status: Arc<watch::Sender<StreamStatus>>,
    task: JoinHandle<()>,
}

impl StreamConnection {
    /// Start connecting to `path` on a new task. Must be called from within a
    /// tokio runtime.
    ///
    /// Every message is decoded as JSON into `T`. Decoding failures are
    /// reported to `handler` as `StreamError::MalformedEvent` and recorded on
    /// the status; the connection stays open. A handler may reject a decoded
    /// message by returning an error, which is recorded the same way.
    pub fn open<T, F>(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        options: StreamOptions,
        handler: F,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(StreamEvent<T>) -> Result<(), StreamError> + Send + 'static,
    {
        let path = path.into();
        let closed = Arc::new(AtomicBool::new(false));
        let (status_tx, _) = watch::channel(StreamStatus::connecting());
        let status = Arc::new(status_tx);

        let worker = Worker {
            transport,
            path: path.clone(),
            backoff: options.backoff(),
            options,
            handler,
            closed: Arc::clone(&closed),
            status: Arc::clone(&status),
            _payload: std::marker::PhantomData,
        };
        let task = tokio::spawn(worker.run());

        Self {
            path,
            closed,
            status,
            task,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the stream. Idempotent; cancels any in-flight attempt or backoff
    /// timer and moves the status to `Closed`. The worker checks the closed
    /// flag before every handler call, so no new event is delivered once this
    /// returns. [`LeaderboardHub`](crate::LeaderboardHub) cancels its cache
    /// subscription before closing, so its listeners stop at once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
        self.status.send_modify(|s| s.state = ConnectionState::Closed);
        info!(path = %self.path, "stream closed");
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct Worker<T, F> {
    transport: Arc<dyn Transport>,
    path: String,
    options: StreamOptions,
    backoff: Backoff,
    handler: F,
    closed: Arc<AtomicBool>,
    status: Arc<watch::Sender<StreamStatus>>,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> Worker<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(StreamEvent<T>) -> Result<(), StreamError> + Send + 'static,
{
    async fn run(mut self) {
        loop {
            self.update(|s| s.state = ConnectionState::Connecting);
            debug!(path = %self.path, attempt = self.backoff.attempt(), "opening stream");

            let failure = self.drive_attempt().await;
            if self.is_closed() {
                return;
            }

            warn!(path = %self.path, error = %failure, "stream interrupted, reconnecting");
            let error = StreamError::Transport(failure);
            self.deliver(StreamEvent::Error(error.clone()));

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            self.update(|s| {
                s.state = ConnectionState::Reconnecting;
                s.attempt = attempt;
                s.last_error = Some(error);
            });
            debug!(path = %self.path, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }
    }

    /// Consume one connection attempt until it fails. Returns why it ended.
    async fn drive_attempt(&mut self) -> TransportError {
        let mut frames = self.transport.open(&self.path);

        loop {
            let next = match self.options.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
                    Ok(next) => next,
                    Err(_) => return TransportError::Idle(limit),
                },
                None => frames.next().await,
            };

            match next {
                Some(Ok(Frame::Open)) => self.mark_open(),
                Some(Ok(Frame::Message(data))) => {
                    // Some servers skip the handshake event; data proves the
                    // connection is up.
                    if self.status.borrow().state != ConnectionState::Open {
                        self.mark_open();
                    }
                    self.handle_message(&data);
                }
                Some(Err(e)) => return e,
                None => return TransportError::Ended,
            }

            if self.is_closed() {
                return TransportError::Ended;
            }
        }
    }

    fn mark_open(&mut self) {
        if self.backoff.attempt() > 0 {
            info!(path = %self.path, attempts = self.backoff.attempt(), "stream reconnected");
        } else {
            info!(path = %self.path, "stream open");
        }
        self.backoff.reset();
        self.update(|s| {
            s.state = ConnectionState::Open;
            s.attempt = 0;
            s.last_error = None;
        });
    }

    fn handle_message(&mut self, data: &str) {
        let rejection = match serde_json::from_str::<T>(data) {
            Ok(payload) => match self.deliver(StreamEvent::Message(payload)) {
                Some(Err(e)) => Some(e),
                _ => None,
            },
            Err(e) => {
                warn!(path = %self.path, error = %e, "skipping malformed stream event");
                let error = StreamError::MalformedEvent(e.to_string());
                self.deliver(StreamEvent::Error(error.clone()));
                Some(error)
            }
        };

        if let Some(error) = rejection {
            self.update(|s| s.last_error = Some(error));
        }
    }

    /// Hand an event to the handler unless the connection was closed.
    fn deliver(&mut self, event: StreamEvent<T>) -> Option<Result<(), StreamError>> {
        if self.is_closed() {
            return None;
        }
        Some((self.handler)(event))
    }

    fn update(&self, change: impl FnOnce(&mut StreamStatus)) {
        self.status.send_if_modified(|s| {
            if s.state == ConnectionState::Closed {
                return false;
            }
            change(s);
            true
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

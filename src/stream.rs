//! Real-time delivery of Opus frames.
//!
//! A [`StreamingSession`] pulls frames from a [`FrameSource`] and hands them
//! to a [`FrameSink`] one at a time. A sink that does not take a frame within
//! the timeout ends the session, so a stalled transport can never wedge the
//! producer behind it.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::instrument::WithSubscriber;
use tracing::{debug, info_span, warn, Dispatch, Instrument, Span};

use crate::error::{DcaError, Result};

/// How long the sink gets to accept a frame
pub const SINK_TIMEOUT: Duration = Duration::from_secs(1);

/// Anything that yields Opus frames of a fixed duration.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next frame payload, or `DcaError::EndOfStream` once exhausted.
    async fn opus_frame(&self) -> Result<Bytes>;

    fn frame_duration(&self) -> Duration;

    /// Called once delivery has ended, to free whatever produces the frames.
    async fn release(&self) {}
}

/// Accepts frames for transmission.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Bytes) -> Result<()>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<Bytes> {
    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.send(frame).await.map_err(|_| DcaError::SinkClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    /// Forwarding has not begun yet
    Idle,
    Running,
    Paused,
    Finished,
}

#[derive(Default)]
struct Flags {
    started: bool,
    paused: bool,
    running: bool,
    finished: bool,
    frames_sent: u32,
    error: Option<Arc<DcaError>>,
}

struct Inner {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    timeout: Duration,
    flags: Mutex<Flags>,
    done: watch::Sender<bool>,
    span: Span,
    dispatch: Dispatch,
}

/// Forwards frames from a source to a sink until the source runs dry.
///
/// Forwarding starts as soon as the session is created. Pausing makes the
/// forwarding task exit after the frame in flight; resuming starts a new task
/// that carries on counting from where the previous one stopped.
pub struct StreamingSession {
    inner: Arc<Inner>,
}

impl StreamingSession {
    /// Start forwarding with the default sink timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: Arc<dyn FrameSource>, sink: Arc<dyn FrameSink>) -> Self {
        Self::with_timeout(source, sink, SINK_TIMEOUT)
    }

    pub fn with_timeout(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        timeout: Duration,
    ) -> Self {
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        Self::with_logger(source, sink, timeout, dispatch)
    }

    /// Like [`StreamingSession::with_timeout`], with the session's log output
    /// going to `logger` instead of the current dispatcher.
    pub fn with_logger(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        timeout: Duration,
        logger: Dispatch,
    ) -> Self {
        let span = tracing::dispatcher::with_default(&logger, || {
            info_span!("streaming_session", timeout_ms = timeout.as_millis() as u64)
        });
        let (done, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            source,
            sink,
            timeout,
            flags: Mutex::new(Flags {
                running: true,
                ..Default::default()
            }),
            done,
            span,
            dispatch: logger,
        });
        Inner::spawn(&inner);
        Self { inner }
    }

    /// Pause or resume forwarding. Repeating the current state does nothing,
    /// and a finished session cannot be resumed.
    pub fn set_paused(&self, paused: bool) {
        let mut flags = self.inner.flags.lock();
        if flags.finished {
            return;
        }
        flags.paused = paused;
        if !paused && !flags.running {
            flags.running = true;
            drop(flags);
            Inner::spawn(&self.inner);
        }
    }

    pub fn set_running(&self, running: bool) {
        self.set_paused(!running);
    }

    pub fn paused(&self) -> bool {
        self.inner.flags.lock().paused
    }

    /// Frames forwarded so far times the source frame duration.
    pub fn playback_position(&self) -> Duration {
        let frames = self.inner.flags.lock().frames_sent;
        self.inner.source.frame_duration().saturating_mul(frames)
    }

    /// Whether forwarding has ended, and the error that ended it. The error
    /// is `None` when the source simply ran out of frames.
    pub fn finished(&self) -> (bool, Option<Arc<DcaError>>) {
        let flags = self.inner.flags.lock();
        (flags.finished, flags.error.clone())
    }

    pub fn state(&self) -> StreamingState {
        let flags = self.inner.flags.lock();
        if flags.finished {
            StreamingState::Finished
        } else if flags.paused {
            StreamingState::Paused
        } else if !flags.started {
            StreamingState::Idle
        } else {
            StreamingState::Running
        }
    }

    /// Wait until forwarding has finished and return its error, if any.
    pub async fn wait(&self) -> Option<Arc<DcaError>> {
        let mut done = self.inner.done.subscribe();
        // The sender lives in `inner`, so this cannot fail while we hold it.
        let _ = done.wait_for(|finished| *finished).await;
        self.inner.flags.lock().error.clone()
    }
}

impl Inner {
    fn spawn(this: &Arc<Self>) {
        let inner = Arc::clone(this);
        let span = this.span.clone();
        let dispatch = this.dispatch.clone();
        tokio::spawn(inner.forward().instrument(span).with_subscriber(dispatch));
    }

    async fn forward(self: Arc<Self>) {
        debug!("forwarding started");
        loop {
            {
                let mut flags = self.flags.lock();
                if flags.paused {
                    flags.running = false;
                    debug!(frames = flags.frames_sent, "forwarding paused");
                    return;
                }
                flags.started = true;
            }

            if let Err(err) = self.forward_one().await {
                self.finish(err).await;
                return;
            }
        }
    }

    async fn forward_one(&self) -> Result<()> {
        let frame = self.source.opus_frame().await?;

        tokio::time::timeout(self.timeout, self.sink.send_frame(frame))
            .await
            .map_err(|_| DcaError::SinkTimeout(self.timeout))??;

        self.flags.lock().frames_sent += 1;
        Ok(())
    }

    async fn finish(&self, err: DcaError) {
        if err.is_end_of_stream() {
            debug!("source exhausted");
        } else {
            warn!(error = %err, "forwarding stopped");
        }

        self.source.release().await;

        {
            let mut flags = self.flags.lock();
            flags.finished = true;
            flags.running = false;
            if !err.is_end_of_stream() {
                flags.error = Some(Arc::new(err));
            }
        }
        self.done.send_replace(true);
    }
}

//! Encoding sessions.
//!
//! An [`EncodeSession`] runs the transcoder on a file or a byte stream and
//! turns its Ogg output into DCA frames on a bounded queue. Three tasks run
//! per session: the producer (probe, launch, page pump), the diagnostic
//! reader (progress stats) and, for stream sources, the input copier. They
//! share a small snapshot behind a lock that is never held across an await.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Notify};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, trace, warn, Dispatch, Instrument};
use uuid::Uuid;

use crate::config::EncodeOptions;
use crate::container::{PacketAssembler, PageReader};
use crate::error::{DcaError, Result};
use crate::format::metadata::Metadata;
use crate::format::{encode_frame, encode_prologue};
use crate::stream::FrameSource;

use super::command::{transcoder_command, ToolPaths, STDIN_INPUT};
use super::probe;
use super::stats::{is_progress_line, parse_progress_line, read_diagnostic_line, EncodeStats};

/// Lifecycle of the transcoder process behind a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    NotStarted,
    /// The process is alive and its output has not been fully drained
    Running,
    /// The process was killed
    Stopped,
    /// The output ended on its own, or the process never launched
    Exhausted,
}

enum Input {
    File(String),
    Reader(Box<dyn AsyncRead + Unpin + Send>),
}

impl Input {
    fn describe(&self) -> &str {
        match self {
            Input::File(path) => path,
            Input::Reader(_) => STDIN_INPUT,
        }
    }
}

#[derive(Default)]
struct Snapshot {
    state: SessionState,
    killed: bool,
    cancelled: bool,
    stats: EncodeStats,
    frames_produced: u64,
}

/// State shared between the session handle and its tasks. The producer owns
/// the process; everyone else asks for it to be killed through `kill_switch`.
#[derive(Default)]
struct Shared {
    snapshot: Mutex<Snapshot>,
    kill_switch: Notify,
}

impl Shared {
    /// Mark a freshly launched process as running, unless the session was
    /// cancelled in the meantime.
    fn attach(&self) -> bool {
        let mut snap = self.snapshot.lock();
        if snap.cancelled {
            snap.killed = true;
            return false;
        }
        snap.state = SessionState::Running;
        true
    }

    /// Record the final state once the process is gone, or never started.
    fn settle(&self) -> SessionState {
        let mut snap = self.snapshot.lock();
        snap.state = if snap.killed || snap.cancelled {
            SessionState::Stopped
        } else {
            SessionState::Exhausted
        };
        snap.state
    }

    fn kill(&self) -> Result<()> {
        let mut snap = self.snapshot.lock();
        if snap.state != SessionState::Running {
            return Err(DcaError::NotRunning);
        }
        snap.killed = true;
        // Stores a permit if the producer is not waiting yet
        self.kill_switch.notify_one();
        Ok(())
    }

    fn cancel(&self) {
        self.snapshot.lock().cancelled = true;
    }

    fn cancelled(&self) -> bool {
        self.snapshot.lock().cancelled
    }
}

struct FrameQueue {
    rx: mpsc::Receiver<Bytes>,
    delivered: u64,
}

/// Configures and starts an [`EncodeSession`].
#[derive(Default)]
pub struct SessionBuilder {
    options: Option<EncodeOptions>,
    tools: ToolPaths,
    logger: Option<Dispatch>,
}

impl SessionBuilder {
    pub fn options(mut self, options: EncodeOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Route the session's log output to this dispatcher instead of the one
    /// current where the session is started.
    pub fn logger(mut self, logger: Dispatch) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Encode a file path or URI the transcoder can open.
    pub fn encode_file(self, path: impl Into<String>) -> Result<EncodeSession> {
        self.start(Input::File(path.into()))
    }

    /// Encode a byte stream, fed to the transcoder through its stdin.
    pub fn encode_reader<R>(self, reader: R) -> Result<EncodeSession>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.start(Input::Reader(Box::new(reader)))
    }

    fn start(self, input: Input) -> Result<EncodeSession> {
        let options = self.options.unwrap_or_default();
        options.validate()?;

        let id = Uuid::new_v4();
        let dispatch = self
            .logger
            .unwrap_or_else(|| tracing::dispatcher::get_default(|d| d.clone()));
        let span = tracing::dispatcher::with_default(&dispatch, || {
            info_span!("encode_session", %id, source = %input.describe())
        });

        let (tx, rx) = mpsc::channel(options.buffered_frames);
        let shared = Arc::new(Shared::default());

        let producer = Producer {
            shared: Arc::clone(&shared),
            options: options.clone(),
            tools: self.tools,
            tx,
        };
        tokio::spawn(producer.run(input).instrument(span).with_subscriber(dispatch));

        Ok(EncodeSession {
            id,
            options,
            shared,
            frames: tokio::sync::Mutex::new(FrameQueue { rx, delivered: 0 }),
        })
    }
}

/// A running transcode.
///
/// Work starts as soon as the session is created. Frames are pulled with
/// [`EncodeSession::read_frame`] until it returns `DcaError::EndOfStream`.
/// A consumer that gives up early must call [`EncodeSession::truncate`] so
/// the process is not left behind.
pub struct EncodeSession {
    id: Uuid,
    options: EncodeOptions,
    shared: Arc<Shared>,
    frames: tokio::sync::Mutex<FrameQueue>,
}

impl EncodeSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Encode a file with the given options, or the defaults.
    pub fn encode_file(path: impl Into<String>, options: Option<EncodeOptions>) -> Result<Self> {
        Self::builder()
            .options(options.unwrap_or_default())
            .encode_file(path)
    }

    /// Encode a byte stream with the given options, or the defaults.
    pub fn encode_reader<R>(reader: R, options: Option<EncodeOptions>) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::builder()
            .options(options.unwrap_or_default())
            .encode_reader(reader)
    }

    /// Next item on the queue: the prologue first unless raw output was
    /// requested, then length-prefixed audio frames in order.
    pub async fn read_frame(&self) -> Result<Bytes> {
        let mut queue = self.frames.lock().await;
        let frame = queue.rx.recv().await.ok_or(DcaError::EndOfStream)?;
        queue.delivered += 1;
        Ok(frame)
    }

    /// True while the transcoder is alive and its output not yet drained.
    pub fn running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Kill the transcoder. Fails with `NotRunning` when there is no process
    /// to kill, including after it already finished.
    pub fn stop(&self) -> Result<()> {
        self.shared.kill()
    }

    /// Stop the session and throw away everything still queued.
    pub async fn truncate(&self) {
        self.shared.cancel();
        if let Err(e) = self.stop() {
            trace!(session = %self.id, "truncate: {}", e);
        }

        // Drain until the producer lets go of the queue, which it does only
        // after the process has been reaped
        let mut queue = self.frames.lock().await;
        while queue.rx.recv().await.is_some() {}
    }

    pub fn stats(&self) -> EncodeStats {
        self.shared.snapshot.lock().stats
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Audio frames put on the queue so far.
    pub fn frames_produced(&self) -> u64 {
        self.shared.snapshot.lock().frames_produced
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.lock().state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        self.shared.cancel();
        let _ = self.shared.kill();
    }
}

#[async_trait]
impl FrameSource for EncodeSession {
    /// Next audio payload, with the prologue skipped and the length prefix
    /// removed.
    async fn opus_frame(&self) -> Result<Bytes> {
        let mut queue = self.frames.lock().await;
        loop {
            let item = queue.rx.recv().await.ok_or(DcaError::EndOfStream)?;
            queue.delivered += 1;
            if queue.delivered == 1 && !self.options.raw_output {
                continue;
            }
            // Everything on the queue went through encode_frame
            return Ok(item.slice(2..));
        }
    }

    fn frame_duration(&self) -> Duration {
        self.options.frame_duration()
    }

    async fn release(&self) {
        self.truncate().await;
    }
}

struct Producer {
    shared: Arc<Shared>,
    options: EncodeOptions,
    tools: ToolPaths,
    tx: mpsc::Sender<Bytes>,
}

impl Producer {
    async fn run(self, input: Input) {
        let child = match self.produce(input).await {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "encode session failed");
                None
            }
        };
        self.finish(child).await;
        // Dropping the sender closes the queue
    }

    /// Probe, launch and pump. Returns the process, still to be reaped.
    async fn produce(&self, input: Input) -> Result<Option<Child>> {
        if !self.options.raw_output {
            let file = match &input {
                Input::File(path) => Some(path.clone()),
                Input::Reader(_) => None,
            };
            let metadata = match file {
                Some(path) => probe::build_metadata(&self.tools, &path, &self.options).await?,
                None => Metadata::for_pipe(&self.options),
            };
            if self.tx.send(encode_prologue(&metadata)?).await.is_err() {
                return Ok(None);
            }
        }
        if self.shared.cancelled() {
            debug!("cancelled before launch");
            return Ok(None);
        }

        let mut child = transcoder_command(&self.tools, input.describe(), &self.options)
            .spawn()
            .map_err(|e| {
                DcaError::Process(format!("launching {}: {}", self.tools.ffmpeg.display(), e))
            })?;
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DcaError::Process("transcoder stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DcaError::Process("transcoder stderr not piped".to_string()))?;
        let stdin = child.stdin.take();

        if !self.shared.attach() {
            debug!("cancelled during launch");
            kill_process(&mut child);
            return Ok(Some(child));
        }
        info!(pid, "transcoder started");

        if let (Input::Reader(reader), Some(stdin)) = (input, stdin) {
            tokio::spawn(
                copy_input(reader, stdin)
                    .in_current_span()
                    .with_current_subscriber(),
            );
        }
        tokio::spawn(
            read_stats(Arc::clone(&self.shared), stderr)
                .in_current_span()
                .with_current_subscriber(),
        );

        // A kill while pumping stops the process; what it already wrote is
        // still drained
        let pump = self.pump(stdout);
        tokio::pin!(pump);
        let clean = tokio::select! {
            clean = &mut pump => clean,
            _ = self.shared.kill_switch.notified() => {
                kill_process(&mut child);
                pump.await
            }
        };
        if !clean {
            // Consumer gone or output unusable, the process has no reader left
            self.shared.snapshot.lock().killed = true;
            kill_process(&mut child);
        }
        Ok(Some(child))
    }

    /// Move packets from the transcoder output onto the queue. Returns false
    /// when pumping stopped before the output ended cleanly.
    async fn pump(&self, stdout: ChildStdout) -> bool {
        let mut pages = PageReader::new(BufReader::new(stdout));
        let mut assembler = PacketAssembler::new();

        let clean = loop {
            match pages.next_page().await {
                Ok(Some(page)) => {
                    for packet in assembler.push(&page) {
                        if !self.emit(packet).await {
                            return false;
                        }
                    }
                }
                Ok(None) => break true,
                Err(e) => {
                    warn!(error = %e, "malformed transcoder output, treating as end of input");
                    break false;
                }
            }
        };

        if let Some(tail) = assembler.finish() {
            debug!(len = tail.len(), "flushing trailing partial packet");
            if !self.emit(tail).await {
                return false;
            }
        }
        clean
    }

    /// Queue one packet. Returns false once the queue has no receiver.
    async fn emit(&self, packet: Bytes) -> bool {
        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping packet");
                return true;
            }
        };
        if self.tx.send(frame).await.is_err() {
            debug!("frame queue closed");
            return false;
        }
        self.shared.snapshot.lock().frames_produced += 1;
        true
    }

    /// Reap the process, if there is one, then settle the session state.
    /// A process that closed its output but lingers is killed on request.
    async fn finish(&self, child: Option<Child>) {
        if let Some(mut child) = child {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = self.shared.kill_switch.notified() => {
                    kill_process(&mut child);
                    child.wait().await
                }
            };
            let killed = self.shared.snapshot.lock().killed;
            match status {
                Ok(_) if killed => info!("transcoder killed"),
                Ok(status) if status.success() => info!("transcoder finished"),
                Ok(status) => warn!(%status, "transcoder exited with an error"),
                Err(e) => warn!(error = %e, "waiting for transcoder failed"),
            }
        }
        let state = self.shared.settle();
        debug!(?state, "session settled");
    }
}

fn kill_process(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "killing transcoder");
    }
}

async fn copy_input(mut reader: Box<dyn AsyncRead + Unpin + Send>, mut stdin: ChildStdin) {
    match tokio::io::copy(&mut reader, &mut stdin).await {
        Ok(bytes) => debug!(bytes, "input copied"),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => debug!("transcoder closed its input"),
        Err(e) => warn!(error = %e, "copying input to transcoder failed"),
    }
}

async fn read_stats(shared: Arc<Shared>, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    loop {
        match read_diagnostic_line(&mut reader).await {
            Ok(Some(line)) if is_progress_line(&line) => match parse_progress_line(&line) {
                Some(stats) => shared.snapshot.lock().stats = stats,
                None => debug!(%line, "unparseable progress line"),
            },
            Ok(Some(line)) => trace!(%line, "transcoder"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "reading transcoder diagnostics failed");
                break;
            }
        }
    }
}

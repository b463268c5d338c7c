//! Test fixtures for integration tests
//!
//! Builds Ogg streams in memory and scripted `ffmpeg`/`ffprobe` stand-ins,
//! so sessions can run end to end without a real encoder.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::Dispatch;

use crate::container::ogg::{Page, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, MAX_SEGMENT_LEN};
use crate::error::{DcaError, Result};
use crate::stream::FrameSource;

/// Small pages so packets regularly span page boundaries
const SEGMENTS_PER_PAGE: usize = 7;

/// Packets whose lengths hit the interesting lacing cases: short, one below
/// a full segment, exactly one and two full segments, and spanning several.
pub fn packets(count: usize) -> Vec<Vec<u8>> {
    const LENGTHS: [usize; 8] = [1, 60, 254, 255, 300, 510, 1000, 3];
    (0..count)
        .map(|i| {
            let len = LENGTHS[i % LENGTHS.len()];
            (0..len).map(|j| (i + j) as u8).collect()
        })
        .collect()
}

/// Lace packets into an Ogg page stream.
pub fn ogg_stream(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut segments: Vec<&[u8]> = Vec::new();
    for packet in packets {
        segments.extend(packet.chunks(MAX_SEGMENT_LEN));
        if packet.len() % MAX_SEGMENT_LEN == 0 {
            segments.push(&[]);
        }
    }

    let pages: Vec<&[&[u8]]> = segments.chunks(SEGMENTS_PER_PAGE).collect();
    let mut out = Vec::new();
    let mut continued = false;
    for (sequence, segs) in pages.iter().enumerate() {
        let mut flags = 0;
        if sequence == 0 {
            flags |= FLAG_BOS;
        }
        if continued {
            flags |= FLAG_CONTINUED;
        }
        if sequence + 1 == pages.len() {
            flags |= FLAG_EOS;
        }

        let table = segs.iter().map(|s| s.len() as u8).collect();
        let page = Page::new(
            flags,
            sequence as i64 * 960,
            0x5eed,
            sequence as u32,
            table,
            Bytes::from(segs.concat()),
        )
        .unwrap();
        out.extend_from_slice(&page.to_bytes());
        continued = segs.last().map_or(false, |s| s.len() == MAX_SEGMENT_LEN);
    }
    out
}

/// Poll until `cond` holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A frame source fed by the test through a channel.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    frame_duration: Duration,
    released: AtomicBool,
}

impl ChannelSource {
    pub fn new(frame_duration: Duration) -> (mpsc::UnboundedSender<Bytes>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx: tokio::sync::Mutex::new(rx),
            frame_duration,
            released: AtomicBool::new(false),
        };
        (tx, source)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn opus_frame(&self) -> Result<Bytes> {
        self.rx.lock().await.recv().await.ok_or(DcaError::EndOfStream)
    }

    fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Collects the output of a dedicated tracing subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn dispatch(&self) -> Dispatch {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
pub use scripted::{alive, FakeTools, Transcoder, COVER_BYTES, PROGRESS_LINE};

#[cfg(unix)]
mod scripted {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    use crate::transcode::ToolPaths;

    /// What the fake transcoder does with its output
    #[derive(Debug, Clone, Copy)]
    pub enum Transcoder {
        /// Copy stdin to stdout
        Passthrough,
        /// Write the prepared Ogg stream and exit
        Emit,
        /// Write the prepared Ogg stream, then keep stdout open
        EmitAndHang,
        /// Write the prepared Ogg stream, close stdout and keep running
        EmitAndLinger,
        /// Complain and exit with an error, writing nothing
        Fail,
    }

    pub const COVER_BYTES: &str = "JPEG";
    pub const PROGRESS_LINE: &str =
        "size=       2kB time=00:00:01.50 bitrate=  64.0kbits/s speed=10.0x";

    const PID_FILE: &str = "ffmpeg.pid";
    const PROBE_DELAY_FILE: &str = "probe.delay";

    pub struct FakeTools {
        dir: TempDir,
        pub tools: ToolPaths,
    }

    impl FakeTools {
        /// `probe_json` of `None` makes the prober fail.
        pub fn new(transcoder: Transcoder, ogg: &[u8], probe_json: Option<&str>) -> Self {
            let dir = TempDir::new().unwrap();
            let ogg_path = dir.path().join("out.ogg");
            std::fs::write(&ogg_path, ogg).unwrap();

            let body = match transcoder {
                Transcoder::Passthrough => "exec cat".to_string(),
                Transcoder::Emit => format!("cat '{}'", ogg_path.display()),
                Transcoder::EmitAndHang => {
                    format!("cat '{}'\nexec sleep 30", ogg_path.display())
                }
                Transcoder::EmitAndLinger => {
                    format!("cat '{}'\nexec 1>&-\nexec sleep 30", ogg_path.display())
                }
                Transcoder::Fail => {
                    "echo 'Invalid data found when processing input' >&2\nexit 1".to_string()
                }
            };
            let ffmpeg = format!(
                "#!/bin/sh\ncase \" $* \" in\n  *\" -an \"*) printf '{}'; exit 0 ;;\nesac\n\
                 echo $$ > '{}'\nprintf '{}\\r' >&2\n{}\n",
                COVER_BYTES,
                dir.path().join(PID_FILE).display(),
                PROGRESS_LINE,
                body
            );

            let ffprobe = match probe_json {
                Some(json) => {
                    let json_path = dir.path().join("probe.json");
                    std::fs::write(&json_path, json).unwrap();
                    format!(
                        "#!/bin/sh\nsleep \"$(cat '{}' 2>/dev/null || echo 0)\"\ncat '{}'\n",
                        dir.path().join(PROBE_DELAY_FILE).display(),
                        json_path.display()
                    )
                }
                None => "#!/bin/sh\nexit 1\n".to_string(),
            };

            let tools = ToolPaths {
                ffmpeg: script(dir.path(), "ffmpeg", &ffmpeg),
                ffprobe: script(dir.path(), "ffprobe", &ffprobe),
            };
            Self { dir, tools }
        }

        /// Tools whose transcoder does not exist.
        pub fn missing() -> Self {
            let dir = TempDir::new().unwrap();
            let tools = ToolPaths {
                ffmpeg: dir.path().join("no-such-ffmpeg"),
                ffprobe: dir.path().join("no-such-ffprobe"),
            };
            Self { dir, tools }
        }

        /// Make the prober take this many seconds before answering.
        pub fn delay_probe(&self, seconds: u32) {
            std::fs::write(self.dir.path().join(PROBE_DELAY_FILE), seconds.to_string()).unwrap();
        }

        /// Process id of the transcoder, once it has been launched.
        pub fn pid(&self) -> Option<u32> {
            let pid = std::fs::read_to_string(self.dir.path().join(PID_FILE)).ok()?;
            pid.trim().parse().ok()
        }

        pub fn launched(&self) -> bool {
            self.pid().is_some()
        }
    }

    /// True while a process with this id exists, zombies included.
    pub fn alive(pid: u32) -> bool {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -0 {} 2>/dev/null", pid))
            .status()
            .map_or(false, |status| status.success())
    }

    fn script(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{PacketAssembler, PageReader};

    #[tokio::test]
    async fn test_ogg_stream_reassembles() {
        let packets = packets(20);
        let data = ogg_stream(&packets);

        let mut reader = PageReader::new(&data[..]);
        let mut assembler = PacketAssembler::new();
        let mut out = Vec::new();
        while let Some(page) = reader.next_page().await.unwrap() {
            out.extend(assembler.push(&page).into_iter().map(|p| p.to_vec()));
        }
        assert!(assembler.finish().is_none());
        assert_eq!(out, packets);
    }
}

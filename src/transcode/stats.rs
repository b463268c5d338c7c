//! Transcoder progress reporting
//!
//! The transcoder prints lines such as
//! `size=     256kB time=00:00:16.32 bitrate= 128.5kbits/s speed=32.6x`
//! on its diagnostic stream, terminated by `\r` while in progress.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Transcode progress as last reported by the transcoder.
///
/// This is transcode progress, not playback position: to know how far into
/// playback a consumer is, count the frames it has delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncodeStats {
    /// Output size in kilobytes
    pub size: u64,
    /// Amount of audio transcoded
    pub duration: Duration,
    /// Measured output bitrate in kb/s
    pub bitrate: f32,
    /// Processing speed relative to real time
    pub speed: f32,
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^size=\s*(\d+)\s*(?:kB|KiB) time=(\d+):(\d+):(\d+(?:\.\d+)?) bitrate=\s*(\d+(?:\.\d+)?)kbits/s speed=\s*(\d+(?:\.\d+)?)x",
        )
        .expect("progress pattern is valid")
    })
}

/// True if the line is meant to be a progress report.
pub fn is_progress_line(line: &str) -> bool {
    line.starts_with("size=")
}

/// Parse a progress line; `None` if it does not have the expected shape.
pub fn parse_progress_line(line: &str) -> Option<EncodeStats> {
    let caps = progress_regex().captures(line)?;

    let size = caps[1].parse().ok()?;
    let hours: u64 = caps[2].parse().ok()?;
    let minutes: u64 = caps[3].parse().ok()?;
    let seconds: f64 = caps[4].parse().ok()?;
    let bitrate = caps[5].parse().ok()?;
    let speed = caps[6].parse().ok()?;

    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    let fraction = Duration::try_from_secs_f64(seconds).ok()?;
    let duration = Duration::from_secs(whole).checked_add(fraction)?;

    Some(EncodeStats {
        size,
        duration,
        bitrate,
        speed,
    })
}

/// Read one line ended by `\n` or `\r`, skipping empty lines.
/// Returns `None` at end of input.
pub async fn read_diagnostic_line<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!line.is_empty()).then(|| String::from_utf8_lossy(&line).into_owned()));
        }

        match available.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(end) => {
                line.extend_from_slice(&available[..end]);
                reader.consume(end + 1);
                if !line.is_empty() {
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
            }
            None => {
                let len = available.len();
                line.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

//! External tool invocation
//!
//! Builds the argument lists for the transcoder (`ffmpeg`) and the prober
//! (`ffprobe`). The audio itself is never touched in-process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::EncodeOptions;

/// Transcoder input name for a source fed through stdin
pub const STDIN_INPUT: &str = "pipe:0";

/// Volume value that leaves the audio unchanged
const UNITY_VOLUME: u16 = 256;

/// Locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Arguments that make the transcoder write Ogg/Opus to stdout.
pub fn transcoder_args(input: &str, options: &EncodeOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-stats".into(),
        "-i".into(),
        input.into(),
        "-map".into(),
        "0:a".into(),
        "-acodec".into(),
        "libopus".into(),
        "-f".into(),
        "ogg".into(),
        "-vbr".into(),
        if options.vbr { "on" } else { "off" }.into(),
        "-compression_level".into(),
        options.compression_level.to_string(),
    ];

    if options.volume != UNITY_VOLUME {
        args.push("-af".into());
        args.push(format!(
            "volume={:.4}",
            options.volume as f64 / UNITY_VOLUME as f64
        ));
    }

    args.extend([
        "-ar".into(),
        options.sample_rate.to_string(),
        "-ac".into(),
        options.channels.to_string(),
        "-b:a".into(),
        options.bitrate_bps().to_string(),
        "-application".into(),
        options.application.to_string(),
        "-frame_duration".into(),
        options.frame_duration.to_string(),
        "-packet_loss".into(),
        options.packet_loss.to_string(),
        "pipe:1".into(),
    ]);
    args
}

/// Arguments that make the prober print the container format as JSON.
pub fn probe_args(path: &str) -> Vec<String> {
    ["-v", "quiet", "-print_format", "json", "-show_format", path]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Arguments that extract the embedded cover picture as a JPEG on stdout.
pub fn cover_art_args(path: &str) -> Vec<String> {
    [
        "-loglevel", "0", "-i", path, "-an", "-frames:v", "1", "-f", "mjpeg", "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The transcoder command with all three standard streams piped.
pub fn transcoder_command(tools: &ToolPaths, input: &str, options: &EncodeOptions) -> Command {
    let mut command = Command::new(&tools.ffmpeg);
    command
        .args(transcoder_args(input, options))
        .stdin(if input == STDIN_INPUT {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

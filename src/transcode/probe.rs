//! Source inspection with the external prober.
//!
//! A file source is probed once before transcoding starts. The result feeds
//! the `info` and `origin` sections of the prologue metadata.

use base64::Engine;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::config::EncodeOptions;
use crate::error::{DcaError, Result};
use crate::format::metadata::{non_empty, Metadata, OriginMetadata, SongMetadata, SourceKind};

use super::command::{cover_art_args, probe_args, ToolPaths};

#[derive(Debug, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeFormat {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub format_name: Option<String>,
    #[serde(default)]
    pub format_long_name: Option<String>,
    /// Seconds, as a decimal string
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default, alias = "bitrate")]
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: ProbeTags,
}

/// Container tags. Some formats report them in upper case.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeTags {
    #[serde(default, alias = "TITLE")]
    pub title: Option<String>,
    #[serde(default, alias = "ARTIST")]
    pub artist: Option<String>,
    #[serde(default, alias = "ALBUM")]
    pub album: Option<String>,
    #[serde(default, alias = "GENRE")]
    pub genre: Option<String>,
}

impl ProbeFormat {
    /// Source bitrate in bits per second.
    pub fn bitrate(&self) -> Result<u64> {
        let raw = self
            .bit_rate
            .as_deref()
            .ok_or_else(|| DcaError::Probe("no bitrate reported".to_string()))?;
        raw.trim()
            .parse()
            .map_err(|_| DcaError::Probe(format!("bitrate {:?} is not an integer", raw)))
    }
}

pub fn parse_probe_output(json: &[u8]) -> Result<ProbeOutput> {
    serde_json::from_slice(json).map_err(|e| DcaError::Probe(format!("bad prober output: {}", e)))
}

/// Run the prober on a file.
pub async fn probe(tools: &ToolPaths, path: &str) -> Result<ProbeOutput> {
    let output = Command::new(&tools.ffprobe)
        .args(probe_args(path))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DcaError::Probe(format!("{}: {}", tools.ffprobe.display(), e)))?;

    if !output.status.success() {
        return Err(DcaError::Probe(format!(
            "{} exited with {}",
            tools.ffprobe.display(),
            output.status
        )));
    }
    parse_probe_output(&output.stdout)
}

/// Embedded cover picture as base64 JPEG, if the file has one.
pub async fn cover_art(tools: &ToolPaths, path: &str) -> Option<String> {
    let output = Command::new(&tools.ffmpeg)
        .args(cover_art_args(path))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() && !output.stdout.is_empty() => {
            Some(base64::engine::general_purpose::STANDARD.encode(&output.stdout))
        }
        Ok(output) => {
            debug!("no cover art in {} ({})", path, output.status);
            None
        }
        Err(e) => {
            debug!("cover art extraction failed for {}: {}", path, e);
            None
        }
    }
}

/// Complete prologue metadata for a file source.
pub async fn build_metadata(
    tools: &ToolPaths,
    path: &str,
    options: &EncodeOptions,
) -> Result<Metadata> {
    let probed = probe(tools, path).await?;
    let mut metadata = file_metadata(&probed, options)?;

    if options.cover_art {
        if let Some(info) = metadata.info.as_mut() {
            info.cover = cover_art(tools, path).await;
        }
    }
    Ok(metadata)
}

fn file_metadata(probed: &ProbeOutput, options: &EncodeOptions) -> Result<Metadata> {
    let format = &probed.format;
    let bitrate = format.bitrate()?;

    let mut metadata = Metadata::new(options);
    metadata.info = Some(SongMetadata {
        title: format.tags.title.clone(),
        artist: format.tags.artist.clone(),
        album: format.tags.album.clone(),
        genre: format.tags.genre.clone(),
        comments: non_empty(&options.comment),
        cover: None,
    });
    metadata.origin = Some(OriginMetadata {
        source: SourceKind::File,
        bitrate: Some(bitrate),
        channels: Some(options.channels),
        encoding: format.format_long_name.clone(),
        url: None,
    });

    if let Some(seconds) = format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
        metadata
            .extra
            .insert("duration".to_string(), serde_json::json!(seconds));
    }
    Ok(metadata)
}

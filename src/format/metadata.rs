//! DCA metadata document
//!
//! Written once as the prologue of a non-raw stream. Every optional field is
//! an `Option` and is omitted from the JSON when absent.

use serde::{Deserialize, Serialize};

use crate::config::EncodeOptions;

use super::{FORMAT_VERSION, LIBRARY_VERSION};

/// Name recorded in `dca.tool.name`
pub const TOOL_NAME: &str = "dca";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub dca: DcaMetadata,
    pub opus: OpusMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SongMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginMetadata>,
    /// Open extension slot
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Format identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaMetadata {
    pub version: i8,
    pub tool: ToolMetadata,
}

/// The tool that wrote the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ToolMetadata {
    fn this_tool() -> Self {
        Self {
            name: TOOL_NAME.to_string(),
            version: LIBRARY_VERSION.to_string(),
            url: non_empty(env!("CARGO_PKG_REPOSITORY")),
            author: non_empty(env!("CARGO_PKG_AUTHORS")),
        }
    }
}

/// Parameters the Opus stream was encoded with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpusMetadata {
    /// Bitrate in bits per second
    #[serde(rename = "abr")]
    pub bitrate: u32,
    pub sample_rate: u32,
    /// Application profile
    #[serde(rename = "mode")]
    pub application: String,
    /// Samples per frame across all channels
    pub frame_size: u32,
    pub channels: u16,
    pub vbr: bool,
}

/// Song tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Base64 encoded cover image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

/// Where the audio came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginMetadata {
    pub source: SourceKind,
    /// Source bitrate in bits per second
    #[serde(rename = "abr", default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    /// Container or sample encoding name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Metadata {
    /// Metadata carrying only what the options know about the output.
    pub fn new(options: &EncodeOptions) -> Self {
        Self {
            dca: DcaMetadata {
                version: FORMAT_VERSION,
                tool: ToolMetadata::this_tool(),
            },
            opus: OpusMetadata {
                bitrate: options.bitrate_bps(),
                sample_rate: options.sample_rate,
                application: options.application.to_string(),
                frame_size: options.pcm_frame_len(),
                channels: options.channels,
                vbr: options.vbr,
            },
            info: None,
            origin: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Metadata for a live stream source, which cannot be probed.
    pub fn for_pipe(options: &EncodeOptions) -> Self {
        let mut metadata = Self::new(options);
        metadata.info = Some(SongMetadata {
            comments: non_empty(&options.comment),
            ..Default::default()
        });
        metadata.origin = Some(OriginMetadata {
            source: SourceKind::Pipe,
            bitrate: None,
            channels: Some(options.channels),
            encoding: Some("pcm16/s16le".to_string()),
            url: None,
        });
        metadata
    }

    /// Duration of one frame as described by the `opus` section, if derivable.
    pub fn frame_duration(&self) -> Option<std::time::Duration> {
        let opus = &self.opus;
        if opus.sample_rate == 0 || opus.channels == 0 || opus.frame_size == 0 {
            return None;
        }
        let samples = opus.frame_size as u64 / opus.channels as u64;
        Some(std::time::Duration::from_micros(
            samples * 1_000_000 / opus.sample_rate as u64,
        ))
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_json_keys() {
        let metadata = Metadata::for_pipe(&EncodeOptions::default());
        let json: serde_json::Value = serde_json::to_value(&metadata).unwrap();

        assert_eq!(json["dca"]["version"], 1);
        assert_eq!(json["dca"]["tool"]["name"], "dca");
        assert_eq!(json["opus"]["abr"], 64000);
        assert_eq!(json["opus"]["mode"], "audio");
        assert_eq!(json["opus"]["frame_size"], 1920);
        assert_eq!(json["origin"]["source"], "pipe");
        assert_eq!(json["origin"]["encoding"], "pcm16/s16le");
        assert!(json["info"].get("title").is_none());
    }

    #[test]
    fn test_missing_optional_sections() {
        let json = r#"{
            "dca": {"version": 1, "tool": {"name": "other", "version": "9"}},
            "opus": {"abr": 96000, "sample_rate": 48000, "mode": "voip",
                     "frame_size": 960, "channels": 1, "vbr": false}
        }"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        assert!(metadata.info.is_none());
        assert!(metadata.origin.is_none());
        assert!(metadata.extra.is_empty());
        assert_eq!(metadata.opus.application, "voip");
    }

    #[test]
    fn test_frame_duration_from_opus_section() {
        let options = EncodeOptions {
            frame_duration: 40,
            ..Default::default()
        };
        let metadata = Metadata::new(&options);
        assert_eq!(metadata.frame_duration(), Some(Duration::from_millis(40)));

        let mut broken = metadata.clone();
        broken.opus.sample_rate = 0;
        assert_eq!(broken.frame_duration(), None);
    }
}

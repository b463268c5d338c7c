//! Encode options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ValidationError;

/// Sample rates the Opus encoder accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Frame durations (ms) the wire format supports
pub const SUPPORTED_FRAME_DURATIONS: [u32; 3] = [20, 40, 60];

/// Opus application profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioApplication {
    /// Favor improved speech intelligibility
    Voip,
    /// Favor faithfulness to the input
    #[default]
    Audio,
    /// Restrict to only the lowest delay modes
    LowDelay,
}

impl AudioApplication {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioApplication::Voip => "voip",
            AudioApplication::Audio => "audio",
            AudioApplication::LowDelay => "lowdelay",
        }
    }
}

impl fmt::Display for AudioApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for one encode session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Volume scalar, 256 is unchanged
    pub volume: u16,

    /// Audio channels
    pub channels: u16,

    /// Sampling rate in Hz
    pub sample_rate: u32,

    /// Frame duration in milliseconds (20, 40 or 60)
    pub frame_duration: u32,

    /// Target bitrate in kb/s
    pub bitrate: u32,

    /// Expected packet loss percentage
    pub packet_loss: u8,

    /// Emit bare frames without the metadata prologue
    pub raw_output: bool,

    /// Opus application profile
    pub application: AudioApplication,

    /// Embed the source's cover art in the metadata (file sources only)
    pub cover_art: bool,

    /// Encoder effort, higher is better quality but slower (0-10)
    pub compression_level: u8,

    /// Capacity of the frame queue
    pub buffered_frames: usize,

    /// Variable bitrate
    pub vbr: bool,

    /// Free-text comment recorded in the metadata
    pub comment: String,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            volume: 256,
            channels: 2,
            sample_rate: 48000,
            frame_duration: 20,
            bitrate: 64,
            packet_loss: 1,
            raw_output: false,
            application: AudioApplication::Audio,
            cover_art: true,
            compression_level: 10,
            buffered_frames: 100, // 2s at 20ms frames
            vbr: true,
            comment: String::new(),
        }
    }
}

impl EncodeOptions {
    /// Check every field against its constraint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.volume > 512 {
            return Err(ValidationError::Volume(self.volume));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ValidationError::Channels(self.channels));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ValidationError::SampleRate(self.sample_rate));
        }
        if !SUPPORTED_FRAME_DURATIONS.contains(&self.frame_duration) {
            return Err(ValidationError::FrameDuration(self.frame_duration));
        }
        if !(1..=512).contains(&self.bitrate) {
            return Err(ValidationError::Bitrate(self.bitrate));
        }
        if self.packet_loss > 100 {
            return Err(ValidationError::PacketLoss(self.packet_loss));
        }
        if self.compression_level > 10 {
            return Err(ValidationError::CompressionLevel(self.compression_level));
        }
        if self.buffered_frames == 0 {
            return Err(ValidationError::BufferedFrames);
        }
        Ok(())
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> u32 {
        self.sample_rate / 1000 * self.frame_duration
    }

    /// Samples in one frame across all channels
    pub fn pcm_frame_len(&self) -> u32 {
        self.frame_size() * self.channels as u32
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration as u64)
    }

    /// Bitrate in bits per second
    pub fn bitrate_bps(&self) -> u32 {
        self.bitrate * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(edit: impl FnOnce(&mut EncodeOptions)) -> EncodeOptions {
        let mut options = EncodeOptions::default();
        edit(&mut options);
        options
    }

    #[test]
    fn test_default_options_are_valid() {
        let options = EncodeOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.volume, 256);
        assert_eq!(options.buffered_frames, 100);
    }

    #[test]
    fn test_boundary_values_are_valid() {
        for options in [
            with(|o| o.volume = 0),
            with(|o| o.volume = 512),
            with(|o| o.channels = 1),
            with(|o| o.sample_rate = 8000),
            with(|o| o.frame_duration = 60),
            with(|o| o.bitrate = 512),
            with(|o| o.packet_loss = 100),
            with(|o| o.compression_level = 0),
            with(|o| o.buffered_frames = 1),
        ] {
            assert!(options.validate().is_ok(), "{:?}", options);
        }
    }

    #[test]
    fn test_each_field_is_checked() {
        let cases = [
            (with(|o| o.volume = 513), ValidationError::Volume(513)),
            (with(|o| o.channels = 0), ValidationError::Channels(0)),
            (with(|o| o.channels = 3), ValidationError::Channels(3)),
            (with(|o| o.sample_rate = 44100), ValidationError::SampleRate(44100)),
            (with(|o| o.frame_duration = 30), ValidationError::FrameDuration(30)),
            (with(|o| o.bitrate = 0), ValidationError::Bitrate(0)),
            (with(|o| o.packet_loss = 101), ValidationError::PacketLoss(101)),
            (with(|o| o.compression_level = 11), ValidationError::CompressionLevel(11)),
            (with(|o| o.buffered_frames = 0), ValidationError::BufferedFrames),
        ];

        for (options, expected) in cases {
            assert_eq!(options.validate(), Err(expected));
        }
    }

    #[test]
    fn test_error_names_constraint() {
        let err = with(|o| o.frame_duration = 10).validate().unwrap_err();
        assert!(err.to_string().contains("20, 40 or 60"));
    }

    #[test]
    fn test_frame_lengths() {
        let options = EncodeOptions::default();
        assert_eq!(options.frame_size(), 960);
        assert_eq!(options.pcm_frame_len(), 1920);
        assert_eq!(options.frame_duration(), Duration::from_millis(20));

        let options = EncodeOptions {
            channels: 1,
            frame_duration: 60,
            ..Default::default()
        };
        assert_eq!(options.pcm_frame_len(), 2880);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let options: EncodeOptions =
            toml::from_str("bitrate = 128\napplication = \"lowdelay\"\n").unwrap();
        assert_eq!(options.bitrate, 128);
        assert_eq!(options.application, AudioApplication::LowDelay);
        assert_eq!(options.channels, 2);
    }
}

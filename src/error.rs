use std::time::Duration;
use thiserror::Error;

/// Main error type for DCA encoding, decoding and streaming
#[derive(Error, Debug)]
pub enum DcaError {
    /// The encode options failed validation and never reached the transcoder
    #[error("Invalid encode options: {0}")]
    Validation(#[from] ValidationError),

    /// The stream does not start with the DCA magic header
    #[error("DCA magic header not found, either not dca or raw dca frames")]
    NotDca,

    /// The prologue was recognised but could not be parsed
    #[error("Malformed DCA data: {0}")]
    Format(String),

    /// The stream ended in the middle of a frame or prologue
    #[error("Short read: expected {expected} bytes, got {read}")]
    ShortRead { expected: usize, read: usize },

    /// A frame length that cannot be represented in the wire format
    #[error("Invalid frame length: {0}")]
    FrameLength(i64),

    /// The transcoder emitted a container page that could not be parsed
    #[error("Malformed ogg page: {0}")]
    Page(String),

    /// Launching or wiring up the transcoder process failed
    #[error("Transcoder process error: {0}")]
    Process(String),

    /// Probing a file source for tags failed
    #[error("Probe error: {0}")]
    Probe(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Normal end of the frame stream
    #[error("End of stream")]
    EndOfStream,

    /// The frame sink did not accept a frame in time
    #[error("Frame sink did not accept a frame within {0:?}")]
    SinkTimeout(Duration),

    /// The frame sink was closed by its owner
    #[error("Frame sink closed")]
    SinkClosed,

    /// `stop` was called without an active transcoder process
    #[error("Not running")]
    NotRunning,

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DcaError {
    /// True for the normal termination signal of a frame stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DcaError::EndOfStream)
    }
}

/// Encode option constraint violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("volume {0} out of bounds (0-512)")]
    Volume(u16),

    #[error("channel count {0} out of bounds (1-2)")]
    Channels(u16),

    #[error("sample rate {0} must be one of 8000, 12000, 16000, 24000 or 48000")]
    SampleRate(u32),

    #[error("frame duration {0}ms must be 20, 40 or 60")]
    FrameDuration(u32),

    #[error("bitrate {0}kb/s out of bounds (1-512)")]
    Bitrate(u32),

    #[error("packet loss {0}% out of bounds (0-100)")]
    PacketLoss(u8),

    #[error("compression level {0} out of bounds (0-10)")]
    CompressionLevel(u8),

    #[error("frame buffer must hold at least one frame")]
    BufferedFrames,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DcaError>;

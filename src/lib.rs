//! DCA audio streaming
//!
//! Transcodes audio into length-prefixed Opus frame streams (DCA) with an
//! external encoder, and paces delivery of those frames to a real-time sink.

pub(crate) mod config;
pub(crate) mod config_file;
pub mod container;
pub(crate) mod error;
pub mod format;
pub(crate) mod stream;
pub mod transcode;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{
    AudioApplication, EncodeOptions, SUPPORTED_FRAME_DURATIONS, SUPPORTED_SAMPLE_RATES,
};
pub use config_file::{ConfigFile, LoggingSettings};
pub use error::{DcaError, Result, ValidationError};
pub use format::decoder::Decoder;
pub use format::metadata::Metadata;
pub use format::{
    decode_frame, decode_frame_async, decode_prologue, decode_prologue_async, encode_frame,
    encode_prologue, Prologue, FORMAT_VERSION, LIBRARY_VERSION,
};
pub use stream::{FrameSink, FrameSource, StreamingSession, StreamingState, SINK_TIMEOUT};
pub use transcode::{
    EncodeSession, EncodeStats, SessionBuilder, SessionReader, SessionState, ToolPaths,
};

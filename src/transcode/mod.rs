//! Transcoding module
//!
//! This module drives the external transcoder:
//! - argument construction for the transcoder and prober
//! - source probing for tags, bitrate and cover art
//! - progress parsing from the diagnostic stream
//! - the encode session that turns the Ogg output into DCA frames
//! - a byte-stream reader over a session's output

pub mod command;
pub mod probe;
pub mod reader;
pub mod session;
pub mod stats;

pub use command::ToolPaths;
pub use reader::SessionReader;
pub use session::{EncodeSession, SessionBuilder, SessionState};
pub use stats::EncodeStats;

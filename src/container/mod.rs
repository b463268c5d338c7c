//! Container handling for the transcoder output
//!
//! The transcoder writes Ogg; only page framing and the segment tables are
//! interpreted, the Opus packets themselves are passed through untouched.

pub mod ogg;

pub use ogg::{Page, PacketAssembler, PageReader};

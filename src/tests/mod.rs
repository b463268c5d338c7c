//! Integration testing module
//!
//! End-to-end tests for encoding and delivery:
//! - Encode sessions against scripted stand-ins for the transcoder and prober
//! - Truncation, backpressure and launch failures
//! - Streaming delivery pacing, pause/resume and sink timeouts

pub mod fixtures;

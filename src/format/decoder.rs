//! Reads a DCA stream back into Opus frames.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::stream::FrameSource;

use super::metadata::Metadata;
use super::{decode_frame_async, decode_prologue_async};

/// Frame duration assumed until metadata says otherwise
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Header {
    metadata: Option<Metadata>,
    format_version: Option<i32>,
    frame_duration: Duration,
}

/// Decoder for a DCA stream, with or without a prologue.
///
/// Call [`Decoder::read_metadata`] first when the stream carries a prologue;
/// raw streams go straight to [`FrameSource::opus_frame`].
pub struct Decoder<R> {
    reader: tokio::sync::Mutex<R>,
    header: Mutex<Header>,
}

impl<R> Decoder<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: tokio::sync::Mutex::new(reader),
            header: Mutex::new(Header {
                metadata: None,
                format_version: None,
                frame_duration: DEFAULT_FRAME_DURATION,
            }),
        }
    }

    /// Override the frame duration, for raw streams.
    pub fn with_frame_duration(self, frame_duration: Duration) -> Self {
        self.header.lock().frame_duration = frame_duration;
        self
    }

    /// Read the prologue. The frame duration is taken from the metadata when
    /// it describes one.
    pub async fn read_metadata(&self) -> Result<Metadata> {
        let prologue = {
            let mut reader = self.reader.lock().await;
            decode_prologue_async(&mut *reader).await?
        };

        let mut header = self.header.lock();
        if let Some(duration) = prologue.metadata.frame_duration() {
            header.frame_duration = duration;
        }
        header.format_version = Some(prologue.version);
        header.metadata = Some(prologue.metadata.clone());
        Ok(prologue.metadata)
    }

    /// Metadata read by [`Decoder::read_metadata`], if any.
    pub fn metadata(&self) -> Option<Metadata> {
        self.header.lock().metadata.clone()
    }

    pub fn format_version(&self) -> Option<i32> {
        self.header.lock().format_version
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

#[async_trait]
impl<R> FrameSource for Decoder<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn opus_frame(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock().await;
        decode_frame_async(&mut *reader).await
    }

    fn frame_duration(&self) -> Duration {
        self.header.lock().frame_duration
    }
}

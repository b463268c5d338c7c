//! Byte-stream view of an encode session.

use bytes::{Buf, Bytes};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use super::session::EncodeSession;
use crate::error::Result;

type PendingFrame = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Reads the queued DCA output as one continuous byte stream: the prologue
/// (unless raw output was requested) followed by length-prefixed frames.
///
/// A frame larger than the caller's buffer is handed out over several reads.
/// End of the queue is end of file.
pub struct SessionReader {
    session: Arc<EncodeSession>,
    buf: Bytes,
    pending: Option<PendingFrame>,
    eof: bool,
}

impl SessionReader {
    pub fn new(session: Arc<EncodeSession>) -> Self {
        Self {
            session,
            buf: Bytes::new(),
            pending: None,
            eof: false,
        }
    }

    pub fn session(&self) -> &Arc<EncodeSession> {
        &self.session
    }
}

impl AsyncRead for SessionReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let Self {
            session,
            buf,
            pending,
            eof,
        } = self.get_mut();

        while !buf.has_remaining() {
            if *eof {
                return Poll::Ready(Ok(()));
            }
            let next = pending.get_or_insert_with(|| {
                let session = Arc::clone(session);
                Box::pin(async move { session.read_frame().await })
            });
            let frame = ready!(next.as_mut().poll(cx));
            *pending = None;
            match frame {
                Ok(frame) => *buf = frame,
                Err(e) if e.is_end_of_stream() => *eof = true,
                Err(e) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
            }
        }

        let n = buf.len().min(out.remaining());
        out.put_slice(&buf[..n]);
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl EncodeSession {
    /// Read the session's output with `AsyncRead`, e.g. through
    /// `tokio::io::copy`.
    pub fn reader(self: &Arc<Self>) -> SessionReader {
        SessionReader::new(Arc::clone(self))
    }
}

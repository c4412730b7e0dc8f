//! Framed reads and writes over byte streams.
//!
//! Reads go through a [`BytesMut`] buffer filled with `read_buf` and are
//! split into frames with [`Frame::split_from`]. A read that is cancelled
//! (for example by losing a `select!` race or hitting a receive timeout)
//! leaves any partial frame in the buffer, so the next read resumes where the
//! previous one stopped.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dgr_proto::{Frame, Payload};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::{error::SyncError, fanout::SlaveQueue, mailbox::Received};

const INITIAL_BUFFER: usize = 8 * 1024;

async fn read_frame_into<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    peer: &str,
) -> Result<Option<Frame>, SyncError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = Frame::split_from(buf)? {
            return Ok(Some(frame));
        }

        let read = stream.read_buf(buf).await.map_err(|e| SyncError::lost(peer, e))?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(SyncError::lost(peer, "connection closed mid-frame"));
        }
    }
}

async fn write_bytes<W>(stream: &mut W, bytes: &[u8], peer: &str) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(|e| SyncError::lost(peer, e))?;
    stream.flush().await.map_err(|e| SyncError::lost(peer, e))
}

async fn receive_with_timeout<F>(timeout: Duration, read: F) -> Result<Received<Frame>, SyncError>
where
    F: Future<Output = Result<Option<Frame>, SyncError>>,
{
    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(Some(frame))) => Ok(Received::Ready(frame)),
        Ok(Ok(None)) => Ok(Received::Closed),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(Received::Timeout),
    }
}

/// Read half of a framed connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    peer: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader. `peer` names the remote end in errors.
    pub fn new(inner: R, peer: impl Into<String>) -> Self {
        Self { inner, buf: BytesMut::with_capacity(INITIAL_BUFFER), peer: peer.into() }
    }

    /// Read the next frame. `Ok(None)` on a clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, SyncError> {
        read_frame_into(&mut self.inner, &mut self.buf, &self.peer).await
    }

    /// Read the next frame, giving up after `timeout`.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Received<Frame>, SyncError> {
        receive_with_timeout(timeout, read_frame_into(&mut self.inner, &mut self.buf, &self.peer))
            .await
    }

    /// Remote end of the connection.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Write half of a framed connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    peer: String,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer. `peer` names the remote end in errors.
    pub fn new(inner: W, peer: impl Into<String>) -> Self {
        Self { inner, peer: peer.into() }
    }

    /// Encode and write one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SyncError> {
        let bytes = frame.to_bytes()?;
        write_bytes(&mut self.inner, &bytes, &self.peer).await
    }

    /// Write an already encoded frame.
    pub async fn send_bytes(&mut self, bytes: &Bytes) -> Result<(), SyncError> {
        write_bytes(&mut self.inner, bytes, &self.peer).await
    }

    /// Encode a control payload (sequence and origin zero) and write it.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<(), SyncError> {
        self.send(&payload.into_frame(0, 0)?).await
    }

    /// Shut down the write direction.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(peer = %self.peer, error = %e, "shutdown failed");
        }
    }

    /// Write every frame from `queue` until it is closed and empty, then shut
    /// down the write direction.
    pub async fn drain(&mut self, queue: &SlaveQueue) -> Result<(), SyncError> {
        while let Some(bytes) = queue.next().await {
            self.send_bytes(&bytes).await?;
        }
        self.shutdown().await;
        Ok(())
    }
}

/// Both directions of a framed connection.
///
/// Used during the handshake, before the connection is split into a reader
/// and a writer that run independently.
#[derive(Debug)]
pub struct FramedStream<S> {
    inner: S,
    buf: BytesMut,
    peer: String,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream. `peer` names the remote end in errors.
    pub fn new(inner: S, peer: impl Into<String>) -> Self {
        Self { inner, buf: BytesMut::with_capacity(INITIAL_BUFFER), peer: peer.into() }
    }

    /// Remote end of the connection.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Encode and write one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SyncError> {
        let bytes = frame.to_bytes()?;
        write_bytes(&mut self.inner, &bytes, &self.peer).await
    }

    /// Encode a control payload (sequence and origin zero) and write it.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<(), SyncError> {
        self.send(&payload.into_frame(0, 0)?).await
    }

    /// Read the next frame. `Ok(None)` on a clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, SyncError> {
        read_frame_into(&mut self.inner, &mut self.buf, &self.peer).await
    }

    /// Read the next frame, giving up after `timeout`.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Received<Frame>, SyncError> {
        receive_with_timeout(timeout, read_frame_into(&mut self.inner, &mut self.buf, &self.peer))
            .await
    }

    /// Split into independently usable halves. Buffered bytes stay with the
    /// reader.
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        let (read, write) = tokio::io::split(self.inner);
        let reader = FrameReader { inner: read, buf: self.buf, peer: self.peer.clone() };
        (reader, FrameWriter::new(write, self.peer))
    }
}

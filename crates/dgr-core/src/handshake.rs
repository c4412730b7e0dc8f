//! Connection handshake.
//!
//! The initiator sends `HELLO` and waits for the acceptor's answer: a `HELLO`
//! accepts, a `BYE` rejects with a reason. Acceptors refuse peers whose
//! protocol version or per-variable size limit differ from their own, since
//! such nodes were built or configured differently.

use std::time::Duration;

use dgr_proto::{Goodbye, Hello, Payload};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{codec::FramedStream, error::SyncError, mailbox::Received};

/// Reason a remote `HELLO` cannot join the session, if any.
pub fn incompatibility(local: &Hello, remote: &Hello) -> Option<String> {
    if local.version != remote.version {
        return Some(format!(
            "protocol version {} does not match {}",
            remote.version, local.version
        ));
    }
    if local.max_variable_size != remote.max_variable_size {
        return Some(format!(
            "max variable size {} does not match {}",
            remote.max_variable_size, local.max_variable_size
        ));
    }
    None
}

async fn next_payload<S>(
    stream: &mut FramedStream<S>,
    timeout: Duration,
) -> Result<Payload, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match stream.receive(timeout).await? {
        Received::Ready(frame) => Ok(Payload::from_frame(&frame)?),
        Received::Timeout => Err(SyncError::Timeout { waited: timeout }),
        Received::Closed => Err(SyncError::lost(stream.peer(), "closed during handshake")),
    }
}

/// Send `hello` and wait for the acceptor's answer.
///
/// Returns the acceptor's `HELLO`.
pub async fn initiate<S>(
    stream: &mut FramedStream<S>,
    hello: Hello,
    timeout: Duration,
) -> Result<Hello, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.send_payload(Payload::Hello(hello.clone())).await?;

    match next_payload(stream, timeout).await? {
        Payload::Hello(remote) => match incompatibility(&hello, &remote) {
            Some(reason) => Err(SyncError::HandshakeRejected { reason }),
            None => Ok(remote),
        },
        Payload::Bye(Goodbye { reason }) => Err(SyncError::HandshakeRejected { reason }),
        other => Err(SyncError::ProtocolViolation(format!(
            "expected HELLO or BYE, got {:?}",
            other.opcode()
        ))),
    }
}

/// Wait for the initiator's `HELLO`.
pub async fn await_hello<S>(
    stream: &mut FramedStream<S>,
    timeout: Duration,
) -> Result<Hello, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match next_payload(stream, timeout).await? {
        Payload::Hello(hello) => Ok(hello),
        other => {
            Err(SyncError::ProtocolViolation(format!("expected HELLO, got {:?}", other.opcode())))
        },
    }
}

/// Accept the connection by answering with our own `HELLO`.
pub async fn accept<S>(stream: &mut FramedStream<S>, local: Hello) -> Result<(), SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.send_payload(Payload::Hello(local)).await
}

/// Refuse the connection with a `BYE`.
///
/// Best effort: the peer may already be gone.
pub async fn reject<S>(stream: &mut FramedStream<S>, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::warn!(peer = stream.peer(), reason, "rejecting connection");
    if let Err(e) = stream.send_payload(Payload::Bye(Goodbye::new(reason))).await {
        tracing::debug!(peer = stream.peer(), error = %e, "could not deliver rejection");
    }
}

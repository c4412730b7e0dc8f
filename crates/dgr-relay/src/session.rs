//! Per-connection relay tasks.
//!
//! Each accepted connection runs one task. A master task reads `STATE`
//! frames and pushes them into every slave queue; a slave task drains its
//! queue to the socket and passes the slave's `REPORT` frames to the master.

use std::{sync::Arc, time::Duration};

use dgr_core::{FrameReader, FramedStream, SyncError, handshake};
use dgr_proto::{Hello, Opcode, PeerRole};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::registry::Registry;

/// Shared per-connection settings.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Relay's own `HELLO`.
    pub hello: Hello,
    /// Deadline for the peer's `HELLO`.
    pub handshake_timeout: Duration,
    /// Connection registry.
    pub registry: Arc<Registry>,
}

async fn admit<S>(
    stream: &mut FramedStream<S>,
    expected: PeerRole,
    ctx: &SessionContext,
) -> Option<Hello>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let remote = match handshake::await_hello(stream, ctx.handshake_timeout).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::debug!(peer = stream.peer(), error = %e, "handshake failed");
            return None;
        },
    };

    if remote.role != expected {
        let violation = SyncError::ProtocolViolation(format!(
            "{:?} connected to the {expected:?} port",
            remote.role
        ));
        tracing::warn!(peer = stream.peer(), error = %violation, "wrong role");
        handshake::reject(stream, &violation.to_string()).await;
        return None;
    }
    if let Some(reason) = handshake::incompatibility(&ctx.hello, &remote) {
        handshake::reject(stream, &reason).await;
        return None;
    }
    Some(remote)
}

/// Serve one connection on the master port.
pub async fn serve_master<S>(mut stream: FramedStream<S>, ctx: SessionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(remote) = admit(&mut stream, PeerRole::Master, &ctx).await else { return };

    let id = ctx.registry.next_id();
    let Some(mut reports) = ctx.registry.claim_master(id) else {
        handshake::reject(&mut stream, "master already connected").await;
        return;
    };
    if let Err(e) = handshake::accept(&mut stream, ctx.hello.clone()).await {
        tracing::debug!(peer = stream.peer(), error = %e, "handshake failed");
        ctx.registry.release_master(id);
        return;
    }

    let peer = stream.peer().to_owned();
    tracing::info!(master = id, %peer, node = remote.node_id, "master connected");

    let (mut reader, mut writer) = stream.into_split();
    let mut last_sequence = None;

    let result: Result<(), SyncError> = loop {
        tokio::select! {
            read = reader.read_frame() => {
                let frame = match read {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                match frame.opcode() {
                    Some(Opcode::State) => {
                        let sequence = frame.header.sequence();
                        if last_sequence.is_some_and(|last| sequence <= last) {
                            tracing::warn!(
                                master = id,
                                sequence,
                                ?last_sequence,
                                "non-increasing sequence, dropping frame"
                            );
                            continue;
                        }
                        last_sequence = Some(sequence);
                        match frame.to_bytes() {
                            Ok(bytes) => ctx.registry.forward_state(&bytes),
                            Err(e) => break Err(e.into()),
                        }
                    },
                    Some(Opcode::Bye) => break Ok(()),
                    other => {
                        break Err(SyncError::ProtocolViolation(format!(
                            "unexpected {other:?} frame from master"
                        )));
                    },
                }
            },

            report = reports.recv() => {
                let Some(report) = report else {
                    // registry closed: the last message was our BYE
                    writer.shutdown().await;
                    break Ok(());
                };
                if let Err(e) = writer.send_bytes(&report).await {
                    break Err(e);
                }
            },
        }
    };

    ctx.registry.release_master(id);
    match result {
        Ok(()) => tracing::info!(master = id, %peer, "master offline"),
        Err(e) => tracing::warn!(master = id, %peer, error = %e, "master link failed"),
    }
}

/// Serve one connection on the slave port.
pub async fn serve_slave<S>(mut stream: FramedStream<S>, ctx: SessionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(remote) = admit(&mut stream, PeerRole::Slave, &ctx).await else { return };

    // registered before the answer so the slave gets every frame after it
    let id = ctx.registry.next_id();
    let queue = ctx.registry.register_slave(id);
    if let Err(e) = handshake::accept(&mut stream, ctx.hello.clone()).await {
        tracing::debug!(peer = stream.peer(), error = %e, "handshake failed");
        ctx.registry.unregister_slave(id);
        return;
    }
    let peer = stream.peer().to_owned();
    tracing::info!(slave = id, %peer, node = remote.node_id, "slave connected");

    let (mut reader, mut writer) = stream.into_split();
    let result = tokio::select! {
        r = writer.drain(&queue) => r,
        r = forward_reports(&mut reader, &ctx.registry, id, remote.node_id) => r,
    };

    let dropped = queue.dropped();
    ctx.registry.unregister_slave(id);
    match result {
        Ok(()) => tracing::info!(slave = id, %peer, dropped, "slave offline"),
        Err(e) => tracing::warn!(slave = id, %peer, dropped, error = %e, "slave link failed"),
    }
}

/// Pass the slave's reports to the master, attributed to the node id it
/// announced in its `HELLO` whatever origin the frame claims.
async fn forward_reports<R>(
    reader: &mut FrameReader<R>,
    registry: &Registry,
    slave: u64,
    node: u64,
) -> Result<(), SyncError>
where
    R: AsyncRead + Unpin,
{
    while let Some(mut frame) = reader.read_frame().await? {
        match frame.opcode() {
            Some(Opcode::Report) => {
                frame.header.set_origin(node);
                frame.reseal();
                registry.forward_report(slave, frame.to_bytes()?);
            },
            Some(Opcode::Bye) => return Ok(()),
            other => {
                return Err(SyncError::ProtocolViolation(format!(
                    "unexpected {other:?} frame from slave"
                )));
            },
        }
    }
    Ok(())
}

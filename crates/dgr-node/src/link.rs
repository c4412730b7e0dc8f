//! Link drivers running on the I/O thread.
//!
//! The render thread and the link talk through [`LinkHandle`] and
//! [`LinkEndpoints`]:
//!
//! ```text
//! render thread                      I/O thread
//!   outbound  (mpsc, bounded)  --->  frames to write
//!   inbound   (Mailbox)        <---  newest STATE frame
//!   reports   (mpsc, bounded)  <---  REPORT payloads from slaves
//!   rejected  (watch)          <---  why the peer refused our HELLO, if it did
//!   shutdown  (oneshot)        --->  BYE reason, then exit
//! ```
//!
//! Two drivers exist. [`connect_loop`] dials a master or relay and redials
//! with exponential backoff whenever the connection drops. [`accept_loop`] is
//! a master serving slaves directly, with one bounded queue per slave.

use std::{sync::Arc, time::Duration};

use dgr_core::{
    Backoff, BackoffConfig, FanOut, FrameReader, FrameWriter, FramedStream, Listener, Mailbox,
    SyncConfig, SyncError, Transport, env::Environment, handshake,
};
use dgr_proto::{Frame, Goodbye, Hello, Opcode, PROTOCOL_VERSION, Payload, PeerRole};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
};

/// Capacity of the report channel towards the render thread.
const REPORT_CAPACITY: usize = 64;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Reverse-channel message received from a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReport {
    /// Node id of the slave that sent it.
    pub origin: u64,
    /// Application bytes.
    pub bytes: Vec<u8>,
}

/// Parameters shared by both link drivers.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Our handshake message.
    pub hello: Hello,
    /// Deadline for connect plus handshake, for writing one frame, and for
    /// flushing `BYE`.
    pub handshake_timeout: Duration,
    /// Reconnect backoff for [`connect_loop`].
    pub backoff: BackoffConfig,
    /// Per-slave queue depth for [`accept_loop`].
    pub queue_depth: usize,
}

impl LinkConfig {
    /// Link parameters for a node configured with `config`, announcing
    /// itself to peers as `role`.
    pub fn for_node(config: &SyncConfig, role: PeerRole, node_id: u64) -> Self {
        Self {
            hello: Hello {
                version: PROTOCOL_VERSION,
                role,
                node_id,
                max_variable_size: config.wire_max_variable_size(),
            },
            handshake_timeout: config.handshake_timeout,
            backoff: config.backoff,
            queue_depth: config.queue_depth,
        }
    }
}

/// Render-thread side of the link.
#[derive(Debug)]
pub struct LinkHandle {
    /// Frames for the link to send.
    pub outbound: mpsc::Sender<Frame>,
    /// Newest `STATE` frame from the master.
    pub inbound: Mailbox<Frame>,
    /// Reports from slaves.
    pub reports: mpsc::Receiver<InboundReport>,
    /// Reason the peer gave for refusing our handshake; `None` once accepted.
    pub rejected: watch::Receiver<Option<String>>,
    /// Asks the link to say `BYE` and stop.
    pub shutdown: Option<oneshot::Sender<String>>,
}

impl LinkHandle {
    /// Ask the link to send `BYE` with `reason` and stop. Idempotent.
    pub fn close(&mut self, reason: &str) {
        if let Some(shutdown) = self.shutdown.take() {
            // the link may already be gone
            let _ = shutdown.send(reason.to_owned());
        }
    }
}

/// I/O-thread side of the link.
#[derive(Debug)]
pub struct LinkEndpoints {
    /// Frames to send.
    pub outbound: mpsc::Receiver<Frame>,
    /// Where received `STATE` frames go.
    pub inbound: Mailbox<Frame>,
    /// Where received reports go.
    pub reports: mpsc::Sender<InboundReport>,
    /// Outcome of the latest handshake.
    pub rejected: watch::Sender<Option<String>>,
    /// Resolves when the session closes.
    pub shutdown: oneshot::Receiver<String>,
}

/// Create both sides of a link. `outbound_capacity` bounds the frames the
/// render thread may queue before it starts dropping.
pub fn channel(outbound_capacity: usize) -> (LinkHandle, LinkEndpoints) {
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
    let (reports_tx, reports_rx) = mpsc::channel(REPORT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (rejected_tx, rejected_rx) = watch::channel(None);
    let inbound = Mailbox::new();

    let handle = LinkHandle {
        outbound: outbound_tx,
        inbound: inbound.clone(),
        reports: reports_rx,
        rejected: rejected_rx,
        shutdown: Some(shutdown_tx),
    };
    let endpoints = LinkEndpoints {
        outbound: outbound_rx,
        inbound,
        reports: reports_tx,
        rejected: rejected_tx,
        shutdown: shutdown_rx,
    };
    (handle, endpoints)
}

/// Why a connected session ended.
enum Ended {
    /// The render thread closed the session.
    Shutdown,
    /// The connection failed; reconnect.
    Lost(SyncError),
}

fn forward_report(reports: &mpsc::Sender<InboundReport>, frame: &Frame) -> Result<(), SyncError> {
    let Payload::Report(report) = Payload::from_frame(frame)? else {
        return Err(SyncError::ProtocolViolation("REPORT frame without report payload".into()));
    };
    let report = InboundReport { origin: frame.header.origin(), bytes: report.bytes };
    if reports.try_send(report).is_err() {
        tracing::debug!(origin = frame.header.origin(), "report queue full, dropping report");
    }
    Ok(())
}

async fn say_goodbye<W>(writer: &mut FrameWriter<W>, reason: String, timeout: Duration)
where
    W: AsyncWrite + Unpin,
{
    let bye = writer.send_payload(Payload::Bye(Goodbye::new(reason)));
    match tokio::time::timeout(timeout, bye).await {
        Ok(Ok(())) => writer.shutdown().await,
        Ok(Err(e)) => tracing::debug!(error = %e, "could not send BYE"),
        Err(_) => tracing::debug!("timed out sending BYE"),
    }
}

/// Dial `addr`, handshake, and keep the session alive until shutdown.
///
/// Used by slaves (direct or through a relay) and by masters behind a relay.
/// A lost connection is retried with exponential backoff; a successful
/// handshake resets the backoff. Frames queued by the render thread while
/// disconnected are dropped, since the next tick supersedes them.
pub async fn connect_loop<T, E>(
    transport: T,
    addr: String,
    env: E,
    config: LinkConfig,
    mut endpoints: LinkEndpoints,
) where
    T: Transport,
    E: Environment,
{
    let mut backoff = Backoff::new(config.backoff);

    loop {
        let attempt = connect_once(&transport, &addr, &config);
        let connected = tokio::select! {
            _ = &mut endpoints.shutdown => break,
            connected = attempt => connected,
        };

        match connected {
            Ok((remote, stream)) => {
                backoff.reset();
                endpoints.rejected.send_replace(None);
                tracing::info!(
                    %addr,
                    peer_role = ?remote.role,
                    peer_id = remote.node_id,
                    "link established"
                );

                match run_connection(stream, &config, &mut endpoints).await {
                    Ended::Shutdown => break,
                    Ended::Lost(e) => tracing::warn!(%addr, error = %e, "link lost"),
                }
            },
            Err(SyncError::HandshakeRejected { reason }) => {
                tracing::error!(%addr, %reason, "handshake rejected");
                endpoints.rejected.send_replace(Some(reason));
            },
            Err(e) => tracing::warn!(%addr, error = %e, "connect failed"),
        }

        let delay = backoff.next_delay();
        tracing::debug!(%addr, ?delay, attempt = backoff.attempts(), "reconnecting after backoff");

        let sleep = env.sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                _ = &mut endpoints.shutdown => {
                    endpoints.inbound.close();
                    return;
                },
                frame = endpoints.outbound.recv() => {
                    if frame.is_none() {
                        endpoints.inbound.close();
                        return;
                    }
                    tracing::trace!("not connected, dropping outbound frame");
                },
            }
        }
    }

    endpoints.inbound.close();
}

async fn connect_once<T: Transport>(
    transport: &T,
    addr: &str,
    config: &LinkConfig,
) -> Result<(Hello, FramedStream<T::Stream>), SyncError> {
    let handshake = async {
        let stream = transport.connect(addr).await.map_err(|e| SyncError::lost(addr, e))?;
        let mut framed = FramedStream::new(stream, addr);
        let remote =
            handshake::initiate(&mut framed, config.hello.clone(), config.handshake_timeout).await?;
        Ok((remote, framed))
    };

    match tokio::time::timeout(config.handshake_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout { waited: config.handshake_timeout }),
    }
}

async fn run_connection<S>(
    stream: FramedStream<S>,
    config: &LinkConfig,
    endpoints: &mut LinkEndpoints,
) -> Ended
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = stream.into_split();

    loop {
        tokio::select! {
            biased;

            reason = &mut endpoints.shutdown => {
                let reason = reason.unwrap_or_else(|_| "session dropped".into());
                say_goodbye(&mut writer, reason, config.handshake_timeout).await;
                return Ended::Shutdown;
            },

            frame = endpoints.outbound.recv() => {
                let Some(frame) = frame else {
                    say_goodbye(&mut writer, "session dropped".into(), config.handshake_timeout)
                        .await;
                    return Ended::Shutdown;
                };
                // a peer that stopped reading must not hold shutdown hostage
                match tokio::time::timeout(config.handshake_timeout, writer.send(&frame)).await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => return Ended::Lost(e),
                    Err(_) => {
                        return Ended::Lost(SyncError::Timeout { waited: config.handshake_timeout });
                    },
                }
            },

            read = reader.read_frame() => {
                match on_frame(read, &config.hello, &reader, endpoints) {
                    Ok(()) => {},
                    Err(e) => return Ended::Lost(e),
                }
            },
        }
    }
}

fn on_frame<R>(
    read: Result<Option<Frame>, SyncError>,
    local: &Hello,
    reader: &FrameReader<R>,
    endpoints: &LinkEndpoints,
) -> Result<(), SyncError>
where
    R: AsyncRead + Unpin,
{
    let Some(frame) = read? else {
        return Err(SyncError::lost(reader.peer(), "connection closed"));
    };

    match (frame.opcode(), local.role) {
        (Some(Opcode::State), PeerRole::Slave) => {
            if endpoints.inbound.put(frame) {
                tracing::trace!("render thread behind, replaced pending frame");
            }
            Ok(())
        },
        (Some(Opcode::Report), PeerRole::Master) => forward_report(&endpoints.reports, &frame),
        (Some(Opcode::Bye), _) => {
            let reason = match Payload::from_frame(&frame)? {
                Payload::Bye(Goodbye { reason }) => reason,
                _ => String::new(),
            };
            Err(SyncError::lost(reader.peer(), format!("peer said goodbye: {reason}")))
        },
        (opcode, role) => Err(SyncError::ProtocolViolation(format!(
            "unexpected {opcode:?} frame on a {role:?} link"
        ))),
    }
}

/// Serve slaves that connect directly to this master.
///
/// Every broadcast frame is encoded once and pushed into each slave's
/// bounded queue. A slave whose queue is full loses its oldest frame, so a
/// stalled slave never delays the render thread or any other slave.
///
/// On shutdown every slave is sent `BYE` and the loop waits up to the
/// handshake timeout for the writers to drain.
pub async fn accept_loop<L, E>(
    listener: L,
    env: E,
    config: LinkConfig,
    mut endpoints: LinkEndpoints,
)
where
    L: Listener,
    E: Environment,
{
    let fanout = Arc::new(FanOut::new(config.queue_depth));
    let mut slaves = JoinSet::new();
    let mut next_id = 0u64;

    let reason = loop {
        tokio::select! {
            reason = &mut endpoints.shutdown => {
                break reason.unwrap_or_else(|_| "session dropped".into());
            },

            frame = endpoints.outbound.recv() => {
                let Some(frame) = frame else { break "session dropped".into() };
                match frame.to_bytes() {
                    Ok(bytes) => {
                        fanout.broadcast(&bytes);
                    },
                    Err(e) => tracing::warn!(error = %e, "cannot encode frame"),
                }
            },

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    slaves.spawn(serve_slave(
                        FramedStream::new(stream, peer),
                        next_id,
                        Arc::clone(&fanout),
                        config.clone(),
                        endpoints.reports.clone(),
                    ));
                },
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    env.sleep(ACCEPT_RETRY).await;
                },
            },

            Some(_) = slaves.join_next(), if !slaves.is_empty() => {},
        }
    };

    tracing::info!(slaves = fanout.len(), %reason, "closing slave links");
    match Payload::Bye(Goodbye::new(reason)).into_frame(0, 0).and_then(|f| f.to_bytes()) {
        Ok(bye) => {
            fanout.broadcast(&bye);
        },
        Err(e) => tracing::warn!(error = %e, "cannot encode BYE"),
    }
    fanout.close_all();

    let drain = async { while slaves.join_next().await.is_some() {} };
    if tokio::time::timeout(config.handshake_timeout, drain).await.is_err() {
        tracing::warn!("slave links did not drain in time");
        slaves.abort_all();
    }
}

async fn serve_slave<S>(
    mut stream: FramedStream<S>,
    id: u64,
    fanout: Arc<FanOut>,
    config: LinkConfig,
    reports: mpsc::Sender<InboundReport>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let remote = match handshake::await_hello(&mut stream, config.handshake_timeout).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::debug!(peer = stream.peer(), error = %e, "handshake failed");
            return;
        },
    };

    match remote.role {
        PeerRole::Slave => {},
        PeerRole::Master => return handshake::reject(&mut stream, "master already active").await,
        PeerRole::Relay => {
            return handshake::reject(&mut stream, "relays cannot connect to a master").await;
        },
    }
    if let Some(reason) = handshake::incompatibility(&config.hello, &remote) {
        return handshake::reject(&mut stream, &reason).await;
    }

    // registered before the answer so the slave gets every frame after it
    let queue = fanout.register(id);
    if let Err(e) = handshake::accept(&mut stream, config.hello.clone()).await {
        tracing::debug!(peer = stream.peer(), error = %e, "handshake failed");
        fanout.unregister(id);
        return;
    }

    let peer = stream.peer().to_owned();
    tracing::info!(slave = id, %peer, node = remote.node_id, "slave connected");

    let (mut reader, mut writer) = stream.into_split();
    let result = tokio::select! {
        r = writer.drain(&queue) => r,
        r = read_reports(&mut reader, &reports, remote.node_id) => r,
    };

    let dropped = queue.dropped();
    fanout.unregister(id);
    match result {
        Ok(()) => tracing::info!(slave = id, %peer, dropped, "slave disconnected"),
        Err(e) => tracing::warn!(slave = id, %peer, dropped, error = %e, "slave link failed"),
    }
}

/// Pass a directly connected slave's reports on, attributed to the node id it
/// declared in its `HELLO`.
async fn read_reports<R>(
    reader: &mut FrameReader<R>,
    reports: &mpsc::Sender<InboundReport>,
    slave: u64,
) -> Result<(), SyncError>
where
    R: AsyncRead + Unpin,
{
    while let Some(mut frame) = reader.read_frame().await? {
        match frame.opcode() {
            Some(Opcode::Report) => {
                frame.header.set_origin(slave);
                forward_report(reports, &frame)?;
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

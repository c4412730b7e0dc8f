//! Process-level synchronization context.
//!
//! [`SyncContext`] is the object a render loop owns for its whole lifetime.
//! It wraps a [`SyncSession`] and, unless standalone, a dedicated `dgr-io`
//! thread running a single-threaded tokio runtime with the link driver. The
//! render thread never blocks on a socket; at most it waits the configured
//! receive timeout for the next frame.

use std::{
    future::Future,
    pin::Pin,
    sync::mpsc::{self, RecvTimeoutError},
    thread::JoinHandle,
    time::Duration,
};

use dgr_core::{
    LinkHealth, LinkPlan, Listener, Role, SyncConfig, SyncError, TcpTransport, Transport,
    env::Environment,
};
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    SystemEnv,
    link::{self, InboundReport, LinkConfig},
    session::{SyncSession, Tick},
};

type LinkTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Synchronization context for one process.
///
/// Dropping the context closes the session: peers are sent `BYE` and the I/O
/// thread is joined. A thread that does not finish within twice the
/// handshake timeout is detached.
#[derive(Debug)]
pub struct SyncContext<E: Environment = SystemEnv> {
    session: SyncSession<E>,
    io_thread: Option<IoThread>,
    local_addr: Option<String>,
}

#[derive(Debug)]
struct IoThread {
    handle: JoinHandle<()>,
    // disconnects when the thread exits
    done: mpsc::Receiver<()>,
    grace: Duration,
}

impl SyncContext<SystemEnv> {
    /// Start synchronization over TCP with `config`.
    pub fn init(config: SyncConfig) -> Result<Self, SyncError> {
        Self::with_transport(config, TcpTransport, SystemEnv::new())
    }

    /// Start synchronization configured from `DGR_*` environment variables.
    ///
    /// With no variables set the node is standalone.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::init(SyncConfig::from_env()?)
    }
}

impl<E: Environment> SyncContext<E> {
    /// Start synchronization over an arbitrary transport.
    ///
    /// # Errors
    ///
    /// - `Config` if the configuration is inconsistent.
    /// - `Runtime` if the I/O thread cannot start or a master cannot bind its
    ///   listen address.
    pub fn with_transport<T: Transport>(
        config: SyncConfig,
        transport: T,
        env: E,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let plan = config.link_plan()?;
        let node_id = env.random_u64();

        let Some(peer_role) = config.role.peer_role() else {
            tracing::debug!("standalone, synchronization disabled");
            let session = SyncSession::new(&config, env, node_id, None);
            return Ok(Self { session, io_thread: None, local_addr: None });
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SyncError::Runtime(format!("cannot build I/O runtime: {e}")))?;

        let (handle, endpoints) = link::channel(config.outbound_capacity);
        let link_config = LinkConfig::for_node(&config, peer_role, node_id);

        let mut local_addr = None;
        let task: LinkTask = match plan {
            LinkPlan::Offline => {
                return Err(SyncError::Runtime("networked role without a link plan".into()));
            },
            LinkPlan::Accept { listen } => {
                let listener = runtime
                    .block_on(transport.bind(&listen))
                    .map_err(|e| SyncError::Runtime(format!("cannot listen on {listen}: {e}")))?;
                let bound = listener.local_addr().unwrap_or(listen);
                tracing::info!(addr = %bound, "master accepting slaves");
                local_addr = Some(bound);
                Box::pin(link::accept_loop(listener, env.clone(), link_config, endpoints))
            },
            LinkPlan::Connect { addr, role } => {
                tracing::info!(%addr, ?role, "connecting");
                Box::pin(link::connect_loop(transport, addr, env.clone(), link_config, endpoints))
            },
        };

        let (finished, done) = mpsc::channel::<()>();
        let io_handle = std::thread::Builder::new()
            .name("dgr-io".into())
            .spawn(move || {
                let _finished = finished;
                runtime.block_on(task);
            })
            .map_err(|e| SyncError::Runtime(format!("cannot start I/O thread: {e}")))?;
        let io_thread = IoThread { handle: io_handle, done, grace: config.handshake_timeout * 2 };

        tracing::info!(role = ?config.role, node_id, "synchronization started");

        let session = SyncSession::new(&config, env, node_id, Some(handle));
        Ok(Self { session, io_thread: Some(io_thread), local_addr })
    }

    /// Synchronize once per render tick.
    ///
    /// Master: sends the current state. Slave: waits up to the receive
    /// timeout for the master's state and applies it.
    pub fn update(&mut self) -> Result<Tick, SyncError> {
        self.session.update()
    }

    /// Read or write a synchronized variable.
    pub fn set_or_get(&mut self, name: &str, value: &mut [u8]) -> Result<(), SyncError> {
        self.session.set_or_get(name, value)
    }

    /// Read or write a plain-old-data synchronized variable.
    pub fn set_or_get_value<T>(&mut self, name: &str, value: &mut T) -> Result<(), SyncError>
    where
        T: FromBytes + IntoBytes,
    {
        self.session.set_or_get_value(name, value)
    }

    /// Role of this process.
    pub fn role(&self) -> Role {
        self.session.role()
    }

    /// True on the master.
    pub fn is_master(&self) -> bool {
        self.session.is_master()
    }

    /// True unless standalone.
    pub fn is_enabled(&self) -> bool {
        self.session.is_enabled()
    }

    /// Slave link health.
    pub fn health(&self) -> LinkHealth {
        self.session.health()
    }

    /// Random id of this node.
    pub fn node_id(&self) -> u64 {
        self.session.node_id()
    }

    /// Address the master is accepting slaves on, when serving them directly.
    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    /// Send a reverse-channel report to the master (slave only).
    pub fn report(&mut self, bytes: Vec<u8>) -> Result<(), SyncError> {
        self.session.report(bytes)
    }

    /// Reports received from slaves since the last call (master only).
    pub fn take_reports(&mut self) -> Vec<InboundReport> {
        self.session.take_reports()
    }

    /// Say `BYE` to peers and stop the I/O thread.
    pub fn shutdown(mut self) {
        self.stop("shutdown");
    }

    fn stop(&mut self, reason: &str) {
        self.session.close(reason);
        let Some(thread) = self.io_thread.take() else { return };
        match thread.done.recv_timeout(thread.grace) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(grace = ?thread.grace, "I/O thread did not stop, detaching it");
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.handle.join().is_err() {
                    tracing::error!("I/O thread panicked");
                }
                tracing::debug!("I/O thread stopped");
            },
        }
    }
}

impl<E: Environment> Drop for SyncContext<E> {
    fn drop(&mut self) {
        self.stop("shutdown");
    }
}

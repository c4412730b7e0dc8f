//! Nodes running inside a simulation host.
//!
//! Production nodes run their link on a dedicated thread. Inside Turmoil
//! every host already has its own runtime, so the link driver is spawned on
//! it instead and the session is ticked with a zero receive timeout.

use std::time::Duration;

use dgr_core::{LinkPlan, Listener, SyncConfig, SyncError, Transport, env::Environment};
use dgr_node::{
    SyncSession, Tick,
    link::{self, LinkConfig},
};

use crate::{SimEnv, SimTransport};

/// Build a session for `config` and spawn its link on the current host.
///
/// # Errors
///
/// - `Config` if the configuration is inconsistent.
/// - `Runtime` if a master cannot bind its listen address.
pub async fn spawn_node(
    config: SyncConfig,
    env: SimEnv,
) -> Result<SyncSession<SimEnv>, SyncError> {
    config.validate()?;
    let node_id = env.random_u64();

    let Some(peer_role) = config.role.peer_role() else {
        return Ok(SyncSession::new(&config, env, node_id, None));
    };

    let (handle, endpoints) = link::channel(config.outbound_capacity);
    let link_config = LinkConfig::for_node(&config, peer_role, node_id);

    match config.link_plan()? {
        LinkPlan::Offline => {
            return Err(SyncError::Runtime("networked role without a link plan".into()));
        },
        LinkPlan::Accept { listen } => {
            let listener = SimTransport
                .bind(&listen)
                .await
                .map_err(|e| SyncError::Runtime(format!("cannot listen on {listen}: {e}")))?;
            tracing::debug!(addr = ?listener.local_addr().ok(), node_id, "master accepting");
            tokio::spawn(link::accept_loop(listener, env.clone(), link_config, endpoints));
        },
        LinkPlan::Connect { addr, .. } => {
            let driver =
                link::connect_loop(SimTransport, addr, env.clone(), link_config, endpoints);
            tokio::spawn(driver);
        },
    }

    Ok(SyncSession::new(&config, env, node_id, Some(handle)))
}

/// Tick `session` without blocking the host.
///
/// # Errors
///
/// Same as [`SyncSession::update_within`].
pub fn tick(session: &mut SyncSession<SimEnv>) -> Result<Tick, SyncError> {
    session.update_within(Duration::ZERO)
}

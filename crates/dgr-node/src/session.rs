//! Render-thread side of a synchronized node.
//!
//! A [`SyncSession`] owns the store, the frame synchronizer and the role
//! manager. The render loop calls [`SyncSession::set_or_get`] for every
//! synchronized variable and [`SyncSession::update`] once per tick. Nothing
//! here touches a socket: frames move to and from the I/O thread through a
//! [`LinkHandle`].

use std::time::Duration;

use dgr_core::{
    ApplyOutcome, FrameSynchronizer, LinkHealth, Received, Role, RoleManager, Store, SyncConfig,
    SyncError, env::Environment,
};
use dgr_proto::{Payload, Report};
use tokio::sync::mpsc::error::TrySendError;
use zerocopy::{FromBytes, IntoBytes};

use crate::link::{InboundReport, LinkHandle};

/// What one call to [`SyncSession::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Standalone node; nothing to synchronize.
    Standalone,
    /// Master handed a `STATE` frame to the link.
    Sent {
        /// Sequence number of the frame.
        sequence: u64,
    },
    /// Master dropped this tick's frame because the link was still busy.
    Dropped {
        /// Sequence number of the dropped frame.
        sequence: u64,
    },
    /// Slave applied a frame.
    Applied {
        /// Sequence number of the frame.
        sequence: u64,
        /// Frames missed since the previous one.
        skipped: u64,
    },
    /// Slave received a frame it had already moved past.
    Stale {
        /// Sequence number of the frame.
        sequence: u64,
    },
    /// Slave received nothing this tick and kept its current values.
    Missed {
        /// Link health after this tick.
        health: LinkHealth,
    },
}

/// Store, synchronizer and link for one node.
#[derive(Debug)]
pub struct SyncSession<E: Environment> {
    env: E,
    node_id: u64,
    store: Store,
    synchronizer: FrameSynchronizer,
    roles: RoleManager,
    receive_timeout: Duration,
    link: Option<LinkHandle>,
}

impl<E: Environment> SyncSession<E> {
    /// Create a session. `link` is `None` for standalone nodes.
    pub fn new(config: &SyncConfig, env: E, node_id: u64, link: Option<LinkHandle>) -> Self {
        let role = config.role;
        let roles = RoleManager::new(role, config.degraded_after, env.now());
        Self {
            node_id,
            store: Store::new(role.store_mode(), config.max_variable_size),
            synchronizer: FrameSynchronizer::new(role, node_id),
            roles,
            receive_timeout: config.receive_timeout,
            link,
            env,
        }
    }

    /// Role of this node.
    pub fn role(&self) -> Role {
        self.roles.role()
    }

    /// True on the master.
    pub fn is_master(&self) -> bool {
        self.role().is_master()
    }

    /// True unless standalone.
    pub fn is_enabled(&self) -> bool {
        self.role().is_enabled()
    }

    /// Random id of this node. Masters stamp it on every `STATE` frame.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Link health: whether a slave is receiving state, and whether the peer
    /// refused this node's handshake.
    pub fn health(&self) -> LinkHealth {
        self.roles.health()
    }

    /// Read-only view of the store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Read or write a synchronized variable.
    ///
    /// On the master and standalone nodes `value` is stored. On a slave
    /// `value` is overwritten with the master's value once one has arrived.
    pub fn set_or_get(&mut self, name: &str, value: &mut [u8]) -> Result<(), SyncError> {
        Ok(self.store.set_or_get(name, value)?)
    }

    /// [`SyncSession::set_or_get`] for plain-old-data values.
    pub fn set_or_get_value<T>(&mut self, name: &str, value: &mut T) -> Result<(), SyncError>
    where
        T: FromBytes + IntoBytes,
    {
        Ok(self.store.set_or_get_value(name, value)?)
    }

    /// Synchronize once, waiting up to the configured receive timeout on a
    /// slave.
    pub fn update(&mut self) -> Result<Tick, SyncError> {
        self.update_within(self.receive_timeout)
    }

    /// Synchronize once, waiting at most `timeout` for a frame on a slave.
    ///
    /// A zero timeout never blocks.
    ///
    /// # Errors
    ///
    /// Fatal errors (`SizeExceeded`, `SchemaMismatch`) mean this node and the
    /// master disagree on the variable set; the session cannot continue.
    /// `ConnectionLost` means the I/O thread has stopped.
    pub fn update_within(&mut self, timeout: Duration) -> Result<Tick, SyncError> {
        self.observe_handshake();
        match self.role() {
            Role::Standalone => Ok(Tick::Standalone),
            Role::Master => self.transmit(),
            Role::Slave => self.receive(timeout),
        }
    }

    fn observe_handshake(&mut self) {
        let Some(link) = &mut self.link else { return };
        if !link.rejected.has_changed().unwrap_or(false) {
            return;
        }
        let rejection = link.rejected.borrow_and_update().clone();
        self.roles.on_handshake(rejection.as_deref(), self.env.now());
    }

    fn transmit(&mut self) -> Result<Tick, SyncError> {
        let frame = self.synchronizer.gather(&self.store)?;
        let sequence = frame.header.sequence();

        let Some(link) = &self.link else {
            self.synchronizer.transmitted();
            return Ok(Tick::Sent { sequence });
        };

        let tick = match link.outbound.try_send(frame) {
            Ok(()) => Tick::Sent { sequence },
            Err(TrySendError::Full(_)) => {
                tracing::warn!(sequence, "link busy, dropping frame");
                Tick::Dropped { sequence }
            },
            Err(TrySendError::Closed(_)) => {
                return Err(SyncError::lost("link", "I/O thread stopped"));
            },
        };
        self.synchronizer.transmitted();
        Ok(tick)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Tick, SyncError> {
        self.synchronizer.begin_receive();

        let received = match &self.link {
            Some(link) => link.inbound.recv_timeout(timeout),
            None => Received::Timeout,
        };

        let frame = match received {
            Received::Ready(frame) => frame,
            Received::Timeout | Received::Closed => return Ok(self.missed()),
        };

        match self.synchronizer.apply(&mut self.store, &frame) {
            Ok(ApplyOutcome::Applied { sequence, skipped, .. }) => {
                self.roles.on_frame(self.env.now());
                Ok(Tick::Applied { sequence, skipped })
            },
            Ok(ApplyOutcome::Stale { sequence, .. }) => Ok(Tick::Stale { sequence }),
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "master state does not fit this node");
                Err(e)
            },
            Err(e) => {
                tracing::warn!(error = %e, "discarding bad frame");
                Ok(self.missed())
            },
        }
    }

    fn missed(&mut self) -> Tick {
        self.synchronizer.receive_timed_out();
        Tick::Missed { health: self.roles.on_missed_tick(self.env.now()) }
    }

    /// Send a reverse-channel report to the master.
    ///
    /// Slave only. Reports are best effort: dropped when the link is busy or
    /// down.
    pub fn report(&mut self, bytes: Vec<u8>) -> Result<(), SyncError> {
        if self.role() != Role::Slave {
            return Err(SyncError::WrongRole { operation: "report", role: self.role() });
        }
        let Some(link) = &self.link else { return Ok(()) };

        let frame = Payload::Report(Report { bytes }).into_frame(0, self.node_id)?;
        match link.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("link busy, dropping report");
                Ok(())
            },
            Err(TrySendError::Closed(_)) => Err(SyncError::lost("link", "I/O thread stopped")),
        }
    }

    /// Reports received from slaves since the last call.
    ///
    /// Master only; always empty on other roles.
    pub fn take_reports(&mut self) -> Vec<InboundReport> {
        let mut reports = Vec::new();
        if let Some(link) = &mut self.link {
            while let Ok(report) = link.reports.try_recv() {
                reports.push(report);
            }
        }
        reports
    }

    /// Tell peers we are leaving. Idempotent.
    pub fn close(&mut self, reason: &str) {
        if let Some(link) = &mut self.link {
            link.close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use dgr_proto::{Frame, Opcode};

    use super::*;
    use crate::{SystemEnv, link};

    fn config(role: Role) -> SyncConfig {
        SyncConfig { role, receive_timeout: Duration::ZERO, ..SyncConfig::default() }
    }

    #[test]
    fn standalone_is_a_pass_through() {
        let mut session = SyncSession::new(&config(Role::Standalone), SystemEnv, 1, None);
        let mut value = [4u8; 3];
        session.set_or_get("x", &mut value).unwrap();

        assert_eq!(session.update().unwrap(), Tick::Standalone);
        assert_eq!(value, [4, 4, 4]);
        assert!(!session.is_enabled());
    }

    #[test]
    fn master_hands_frames_to_link() {
        let (handle, mut ends) = link::channel(2);
        let mut session = SyncSession::new(&config(Role::Master), SystemEnv, 9, Some(handle));
        session.set_or_get("ball", &mut [1u8; 12]).unwrap();

        assert_eq!(session.update().unwrap(), Tick::Sent { sequence: 1 });
        assert_eq!(session.update().unwrap(), Tick::Sent { sequence: 2 });
        assert_eq!(session.update().unwrap(), Tick::Dropped { sequence: 3 });

        let frame: Frame = ends.outbound.try_recv().unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::State));
        assert_eq!(frame.header.origin(), 9);
    }

    #[test]
    fn master_reports_closed_link() {
        let (handle, ends) = link::channel(2);
        drop(ends);
        let mut session = SyncSession::new(&config(Role::Master), SystemEnv, 9, Some(handle));

        let err = session.update().unwrap_err();
        assert!(matches!(err, SyncError::ConnectionLost { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn slave_applies_newest_frame() {
        let (handle, ends) = link::channel(2);
        let mut slave = SyncSession::new(&config(Role::Slave), SystemEnv, 2, Some(handle));
        let mut ball = [0u8; 12];
        slave.set_or_get("ball", &mut ball).unwrap();

        let mut master_store = Store::new(dgr_core::StoreMode::Authoritative, 64);
        let mut master = FrameSynchronizer::new(Role::Master, 1);
        master_store.set_or_get("ball", &mut [5u8; 12]).unwrap();
        let old = master.gather(&master_store).unwrap();
        master_store.set_or_get("ball", &mut [6u8; 12]).unwrap();
        let new = master.gather(&master_store).unwrap();

        ends.inbound.put(old);
        ends.inbound.put(new);

        // first frame after joining: nothing counts as skipped
        assert_eq!(slave.update().unwrap(), Tick::Applied { sequence: 2, skipped: 0 });
        slave.set_or_get("ball", &mut ball).unwrap();
        assert_eq!(ball, [6u8; 12]);
        assert_eq!(slave.health(), LinkHealth::Live);

        assert!(matches!(slave.update().unwrap(), Tick::Missed { .. }));

        master_store.set_or_get("ball", &mut [7u8; 12]).unwrap();
        let lost = master.gather(&master_store).unwrap();
        master_store.set_or_get("ball", &mut [8u8; 12]).unwrap();
        let next = master.gather(&master_store).unwrap();
        drop(lost);
        ends.inbound.put(next);

        assert_eq!(slave.update().unwrap(), Tick::Applied { sequence: 4, skipped: 1 });
        slave.set_or_get("ball", &mut ball).unwrap();
        assert_eq!(ball, [8u8; 12]);
    }

    #[test]
    fn large_variable_fits_one_frame() {
        let config = SyncConfig { max_variable_size: 12 << 20, ..config(Role::Master) };
        let (handle, mut ends) = link::channel(2);
        let mut session = SyncSession::new(&config, SystemEnv, 9, Some(handle));
        let mut frame = vec![0xFF; 9 << 20];
        session.set_or_get("frame", &mut frame).unwrap();

        assert_eq!(session.update().unwrap(), Tick::Sent { sequence: 1 });
        let sent = ends.outbound.try_recv().unwrap();
        assert!(sent.payload.len() < (9 << 20) + 1024);
    }

    #[test]
    fn variable_that_cannot_be_sent_fails_at_registration() {
        let config = SyncConfig { max_variable_size: 12 << 20, ..config(Role::Master) };
        let mut session = SyncSession::new(&config, SystemEnv, 9, None);
        session.set_or_get("left", &mut vec![0xFF; 9 << 20]).unwrap();

        let err = session.set_or_get("right", &mut vec![0xFF; 9 << 20]).unwrap_err();
        assert!(matches!(err, SyncError::SizeExceeded { .. }));
        assert!(err.is_fatal());
        assert_eq!(session.update().unwrap(), Tick::Sent { sequence: 1 });
    }

    #[test]
    fn report_is_slave_only() {
        let mut master = SyncSession::new(&config(Role::Master), SystemEnv, 1, None);
        assert!(matches!(master.report(vec![1]), Err(SyncError::WrongRole { .. })));

        let (handle, mut ends) = link::channel(2);
        let mut slave = SyncSession::new(&config(Role::Slave), SystemEnv, 2, Some(handle));
        slave.report(vec![1, 2]).unwrap();

        let frame = ends.outbound.try_recv().unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::Report));
        assert_eq!(frame.header.origin(), 2);
    }
}

//! Relay smoke tests over loopback TCP.

use std::time::Duration;

use dgr_core::{FramedStream, SyncError, TcpTransport, Transport, handshake};
use dgr_proto::{
    Frame, Hello, Opcode, PROTOCOL_VERSION, Payload, PeerRole, Report, StateSnapshot,
    WireVariable,
};
use dgr_relay::{Relay, RelayConfig, RelayStats};
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle};

const TIMEOUT: Duration = Duration::from_secs(5);

fn hello(role: PeerRole, node_id: u64) -> Hello {
    Hello { version: PROTOCOL_VERSION, role, node_id, max_variable_size: 64 * 1024 }
}

struct Running {
    master_addr: String,
    slave_addr: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<RelayStats>,
}

async fn start(queue_depth: usize) -> Running {
    let config = RelayConfig {
        master_listen: "127.0.0.1:0".into(),
        slave_listen: "127.0.0.1:0".into(),
        queue_depth,
        ..RelayConfig::default()
    };
    let relay = Relay::bind(config, TcpTransport).await.unwrap();
    let (master_addr, slave_addr) = relay.local_addrs().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(relay.run(async move {
        let _ = stopped.await;
    }));
    Running { master_addr, slave_addr, stop, task }
}

async fn join(
    addr: &str,
    role: PeerRole,
    node_id: u64,
) -> Result<FramedStream<TcpStream>, SyncError> {
    let stream = TcpTransport.connect(addr).await.unwrap();
    let mut framed = FramedStream::new(stream, addr);
    let relay = handshake::initiate(&mut framed, hello(role, node_id), TIMEOUT).await?;
    assert_eq!(relay.role, PeerRole::Relay);
    Ok(framed)
}

async fn next_state_sequence(slave: &mut FramedStream<TcpStream>) -> Option<u64> {
    loop {
        let frame = tokio::time::timeout(TIMEOUT, slave.read_frame()).await.ok()?.ok()??;
        match frame.opcode() {
            Some(Opcode::State) => return Some(frame.header.sequence()),
            Some(Opcode::Bye) => return None,
            _ => {},
        }
    }
}

#[tokio::test]
async fn state_reaches_every_slave() {
    let running = start(8).await;
    let mut master = join(&running.master_addr, PeerRole::Master, 1).await.unwrap();
    let mut a = join(&running.slave_addr, PeerRole::Slave, 2).await.unwrap();
    let mut b = join(&running.slave_addr, PeerRole::Slave, 3).await.unwrap();

    // slaves are registered before their handshake completes
    for sequence in 1..=3 {
        master.send(&state_frame(sequence, 1, 12)).await.unwrap();
    }

    for slave in [&mut a, &mut b] {
        for expected in 1..=3 {
            assert_eq!(next_state_sequence(slave).await, Some(expected));
        }
    }

    running.stop.send(()).unwrap();
    let stats = running.task.await.unwrap();
    assert_eq!(stats.frames_in, 3);
    assert_eq!(stats.frames_forwarded, 6);

    // everyone hears the shutdown
    assert_eq!(next_state_sequence(&mut a).await, None);
}

#[tokio::test]
async fn second_master_is_rejected_until_the_first_leaves() {
    let running = start(8).await;
    let first = join(&running.master_addr, PeerRole::Master, 1).await.unwrap();

    let second = join(&running.master_addr, PeerRole::Master, 2).await;
    assert!(matches!(second, Err(SyncError::HandshakeRejected { .. })));

    drop(first);
    let third = tokio::time::timeout(TIMEOUT, async {
        loop {
            match join(&running.master_addr, PeerRole::Master, 3).await {
                Ok(master) => return master,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(third.is_ok());

    running.stop.send(()).unwrap();
    let stats = running.task.await.unwrap();
    assert!(stats.masters_rejected >= 1);
}

#[tokio::test]
async fn wrong_role_on_endpoint_is_rejected() {
    let running = start(8).await;

    let slave_on_master_port = join(&running.master_addr, PeerRole::Slave, 1).await;
    assert!(matches!(slave_on_master_port, Err(SyncError::HandshakeRejected { .. })));

    let master_on_slave_port = join(&running.slave_addr, PeerRole::Master, 2).await;
    assert!(matches!(master_on_slave_port, Err(SyncError::HandshakeRejected { .. })));

    running.stop.send(()).unwrap();
    running.task.await.unwrap();
}

#[tokio::test]
async fn reports_flow_back_to_the_master() {
    let running = start(8).await;
    let mut master = join(&running.master_addr, PeerRole::Master, 1).await.unwrap();
    let mut slave = join(&running.slave_addr, PeerRole::Slave, 42).await.unwrap();

    let report = Payload::Report(Report { bytes: b"fps=59".to_vec() }).into_frame(0, 42).unwrap();
    slave.send(&report).await.unwrap();

    let received = tokio::time::timeout(TIMEOUT, master.read_frame()).await.unwrap().unwrap();
    let received = received.unwrap();
    assert_eq!(received.opcode(), Some(Opcode::Report));
    assert_eq!(received.header.origin(), 42);
    assert_eq!(received, report);

    running.stop.send(()).unwrap();
    assert_eq!(running.task.await.unwrap().reports_forwarded, 1);
}

#[tokio::test]
async fn report_origin_is_the_slave_node_id() {
    let running = start(8).await;
    let mut master = join(&running.master_addr, PeerRole::Master, 1).await.unwrap();
    let mut slave = join(&running.slave_addr, PeerRole::Slave, 42).await.unwrap();

    // claims to come from another node
    let forged = Payload::Report(Report { bytes: b"fps=1".to_vec() }).into_frame(0, 999).unwrap();
    slave.send(&forged).await.unwrap();

    let received = tokio::time::timeout(TIMEOUT, master.read_frame()).await.unwrap().unwrap();
    let received = received.unwrap();
    assert_eq!(received.header.origin(), 42);
    assert_eq!(
        Payload::from_frame(&received).unwrap(),
        Payload::Report(Report { bytes: b"fps=1".to_vec() })
    );

    running.stop.send(()).unwrap();
    running.task.await.unwrap();
}

#[tokio::test]
async fn stalled_slave_does_not_hold_back_others() {
    const FRAMES: u64 = 400;

    let running = start(4).await;
    let mut master = join(&running.master_addr, PeerRole::Master, 1).await.unwrap();
    let mut healthy = join(&running.slave_addr, PeerRole::Slave, 2).await.unwrap();
    // handshakes and then never reads again
    let _stalled = join(&running.slave_addr, PeerRole::Slave, 3).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut last = 0;
        while let Some(sequence) = next_state_sequence(&mut healthy).await {
            assert!(sequence > last);
            last = sequence;
            if sequence == FRAMES {
                break;
            }
        }
        last
    });

    for sequence in 1..=FRAMES {
        master.send(&state_frame(sequence, 1, 60 * 1024)).await.unwrap();
    }

    let last = tokio::time::timeout(Duration::from_secs(20), reader).await.unwrap().unwrap();
    assert_eq!(last, FRAMES);

    running.stop.send(()).unwrap();
    let stats = running.task.await.unwrap();
    assert_eq!(stats.frames_in, FRAMES);
    assert!(stats.frames_dropped > 0);
}

fn state_frame(sequence: u64, origin: u64, size: usize) -> Frame {
    Payload::State(StateSnapshot {
        variables: vec![WireVariable {
            name: "ball".into(),
            generation: sequence,
            bytes: vec![7; size],
        }],
    })
    .into_frame(sequence, origin)
    .unwrap()
}

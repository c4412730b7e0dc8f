//! The bouncing-ball scenario over an in-memory stream.
//!
//! The master writes a 12-byte `ball` variable whose tick counter runs 0..9,
//! one value per tick. A slave that joins at tick 3 must see every value from
//! 3 on, in order, exactly once. When the frame for tick 6 is lost the slave
//! must skip 6 and carry on, without repeating 5 or failing.

use std::time::Duration;

use dgr_core::{
    ApplyOutcome, FrameSynchronizer, FramedStream, Received, Role, Store, StoreMode,
    store::Variable,
};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[derive(Debug, Clone, Copy, Default, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Ball {
    tick: u32,
    xpos: f32,
    ypos: f32,
}

const JOIN_TICK: u32 = 3;
const LAST_TICK: u32 = 9;

/// Run the scenario, dropping the frames whose tick is in `lost`. Returns the
/// tick values the slave rendered from applied frames.
async fn run(lost: &[u32]) -> Vec<u32> {
    let (master_end, slave_end) = tokio::io::duplex(64 * 1024);
    let mut master_link = FramedStream::new(master_end, "slave");
    let mut slave_link = FramedStream::new(slave_end, "master");

    let mut master_store = Store::new(StoreMode::Authoritative, 64);
    let mut master = FrameSynchronizer::new(Role::Master, 0x5EED);

    let mut slave_store = Store::new(StoreMode::Mirror, 64);
    let mut slave = FrameSynchronizer::new(Role::Slave, 0x51A7);
    let mut observed = Vec::new();

    for tick in 0..=LAST_TICK {
        #[allow(clippy::cast_precision_loss)]
        let mut ball = Ball { tick, xpos: tick as f32 * 0.1, ypos: 0.5 };
        master_store.set_or_get_value("ball", &mut ball).unwrap();
        let frame = master.gather(&master_store).unwrap();
        master.transmitted();

        if tick < JOIN_TICK {
            continue;
        }
        if !lost.contains(&tick) {
            master_link.send(&frame).await.unwrap();
        }

        slave.begin_receive();
        match slave_link.receive(Duration::from_millis(20)).await.unwrap() {
            Received::Ready(frame) => {
                let outcome = slave.apply(&mut slave_store, &frame).unwrap();
                assert!(matches!(outcome, ApplyOutcome::Applied { .. }));

                let mut rendered = Ball::default();
                slave_store.set_or_get_value("ball", &mut rendered).unwrap();
                observed.push(rendered.tick);
            },
            Received::Timeout => slave.receive_timed_out(),
            Received::Closed => panic!("master link closed"),
        }
    }

    observed
}

#[tokio::test]
async fn late_joiner_sees_every_tick_from_join() {
    assert_eq!(run(&[]).await, vec![3, 4, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn lost_frame_is_skipped_not_repeated() {
    assert_eq!(run(&[6]).await, vec![3, 4, 5, 7, 8, 9]);
}

#[test]
fn slave_renders_bootstrap_value_before_first_frame() {
    let mut store = Store::new(StoreMode::Mirror, 64);
    let mut ball = Ball { tick: 0, xpos: 0.0, ypos: 0.0 };
    store.set_or_get_value("ball", &mut ball).unwrap();
    assert_eq!(ball.tick, 0);

    store.apply_canonical(&[Variable {
        name: "ball".into(),
        bytes: Ball { tick: 4, xpos: 0.4, ypos: 0.5 }.as_bytes().to_vec(),
        generation: 5,
    }])
    .unwrap();

    store.set_or_get_value("ball", &mut ball).unwrap();
    assert_eq!(ball.tick, 4);
}

//! Performance benchmarks for the session hot paths

use rand::rngs::StdRng;
use rand::SeedableRng;
use server::color_pool::ColorPool;
use server::game::{GameState, SessionConfig, SessionEvent};
use server::replication::Delivery;
use shared::{Color, Notification, Packet, Vec3, MASTER_COLORS};
use std::time::Instant;
use tokio::sync::mpsc;

fn full_session() -> (GameState, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
    let mut state =
        GameState::with_rng(SessionConfig::default(), tx, StdRng::seed_from_u64(42)).unwrap();
    for peer in 1..=MASTER_COLORS.len() as u32 {
        state.apply(SessionEvent::PeerConnected { peer }).unwrap();
    }
    (state, rx)
}

/// Benchmarks color reassignment on a full pool
#[test]
fn benchmark_pool_acquire_release() {
    let mut pool = ColorPool::new(&MASTER_COLORS);
    for peer in 1..=5 {
        pool.acquire(peer).unwrap();
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let peer = (i % 5) + 1;
        let _ = pool.acquire(peer);
    }

    let duration = start.elapsed();
    println!(
        "Pool acquire: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(pool.is_conserved());
    // Should complete in under 500ms for 100k iterations
    assert!(duration.as_millis() < 500);
}

/// Benchmarks join/leave churn through the whole session
#[test]
fn benchmark_connect_disconnect_churn() {
    let (mut state, mut rx) = full_session();

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let leaving = (i % 6) + 1;
        state
            .apply(SessionEvent::PeerDisconnected { peer: leaving })
            .unwrap();
        state
            .apply(SessionEvent::PeerConnected { peer: leaving })
            .unwrap();
        while rx.try_recv().is_ok() {}
    }

    let duration = start.elapsed();
    println!(
        "Connect/disconnect churn: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(state.peer_count(), 6);
    assert!(state.pool().is_conserved());
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks write fan-out to every connected peer
#[test]
fn benchmark_move_fan_out() {
    let (mut state, mut rx) = full_session();
    while rx.try_recv().is_ok() {}

    let iterations = 50_000;
    let start = Instant::now();
    let mut delivered = 0;

    for i in 0..iterations {
        let issuer = (i % 6) + 1;
        state.handle_move(issuer).unwrap();
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Move fan-out: {} moves, {} deliveries in {:?} ({:.2} μs/move)",
        iterations,
        delivered,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(delivered, iterations as usize * 6);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks notification packet encoding
#[test]
fn benchmark_notification_serialization() {
    use bincode::{deserialize, serialize};

    let packets = [
        Packet::Notify(Notification::EntityPositionChanged {
            entity: 3,
            position: Vec3::new(1.5, 1.0, -2.25),
            seq: 17,
        }),
        Packet::Notify(Notification::EntityColorChanged {
            entity: 3,
            color: Color::Magenta,
            seq: 4,
        }),
    ];

    let iterations = 50_000;
    let start = Instant::now();

    for i in 0..iterations {
        let packet = &packets[i % packets.len()];
        let serialized = serialize(packet).unwrap();
        let _deserialized: Packet = deserialize(&serialized).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Notification serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests the client replica with a stream of updates
#[test]
fn stress_test_replica_updates() {
    use client::replica::ReplicaWorld;

    let (mut state, mut rx) = full_session();
    let mut world = ReplicaWorld::new();
    world.set_local_peer(Some(1));

    let iterations = 20_000;
    let start = Instant::now();

    for i in 0..iterations {
        if i % 3 == 0 {
            state.handle_color_change((i % 6) + 1).unwrap();
        } else {
            state.handle_move((i % 6) + 1).unwrap();
        }
        while let Ok(delivery) = rx.try_recv() {
            if delivery.peer == 1 {
                world.apply(delivery.notification);
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Replica updates: {} requests in {:?}",
        iterations, duration
    );

    for peer in 1..=6 {
        let entity = state.store().entity_of(peer).unwrap();
        assert_eq!(world.get(entity).unwrap().color(), state.color_of(peer));
    }
    // Should complete in under 3 seconds
    assert!(duration.as_millis() < 3000);
}

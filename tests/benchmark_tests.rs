//! Performance benchmarks for the codecs and the simulation step

use shared::frame::{encode_frame, FrameDecoder, Opcode, Role};
use shared::message::{decode_key_records, encode_key_records};
use shared::{default_tick_interval, step_millis, Game, IdentityKey, KeySet, KeyStates, Snapshot, MAX_LOBBY_SIZE};
use std::time::Instant;

fn lobby_keys() -> Vec<IdentityKey> {
    (0..MAX_LOBBY_SIZE)
        .map(|n| IdentityKey::new(format!("{:0>24}", n)).unwrap())
        .collect()
}

fn busy_game() -> Game {
    let mut game = Game::new(&lobby_keys(), 99);
    for n in 0..200 {
        game.spawn_physical(
            shared::Vector2::new(100.0 + n as f32, 300.0),
            shared::Vector2::new(0.1, -0.1),
        );
    }
    game
}

/// Benchmarks snapshot encoding of a full lobby plus extra bodies
#[test]
fn benchmark_snapshot_encode() {
    let game = busy_game();
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = game.snapshot().encode().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encode: {} iterations in {:?} ({:.2} µs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks snapshot decoding
#[test]
fn benchmark_snapshot_decode() {
    let encoded = busy_game().snapshot().encode().unwrap();
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let snapshot = Snapshot::decode(&encoded).unwrap();
        assert_eq!(snapshot.len(), MAX_LOBBY_SIZE + 200);
    }

    let duration = start.elapsed();
    println!("Snapshot decode: {} iterations in {:?}", iterations, duration);
    assert!(duration.as_secs() < 5);
}

/// Benchmarks one simulation step with every player holding keys
#[test]
fn benchmark_simulation_step() {
    let mut game = busy_game();
    let mut held = KeyStates::new();
    for key in lobby_keys() {
        held.insert(key, KeySet::parse("WD").unwrap());
    }

    let dt = step_millis(default_tick_interval());
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        game.update(&held, dt);
    }

    let duration = start.elapsed();
    println!(
        "Simulation step: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks frame encoding and decoding of snapshot-sized payloads
#[test]
fn benchmark_frame_codec() {
    let payload = busy_game().snapshot().encode().unwrap();
    let decoder = FrameDecoder::new(Role::Server);
    let iterations = 10_000;
    let start = Instant::now();

    for n in 0..iterations {
        let mask = (n as u32).to_be_bytes();
        let mut buffer = encode_frame(Opcode::Binary, &payload, Some(mask)).unwrap();
        let frame = decoder.decode_next(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.payload.len(), payload.len());
        assert!(buffer.is_empty());
    }

    let duration = start.elapsed();
    println!("Frame codec: {} iterations in {:?}", iterations, duration);
    assert!(duration.as_secs() < 5);
}

/// Benchmarks the per-tick key relay body
#[test]
fn benchmark_key_relay() {
    let mut held = KeyStates::new();
    for key in lobby_keys() {
        held.insert(key, KeySet::parse("WASD").unwrap());
    }

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let body = encode_key_records(&held);
        let decoded = decode_key_records(&body).unwrap();
        assert_eq!(decoded.len(), MAX_LOBBY_SIZE);
    }

    let duration = start.elapsed();
    println!("Key relay: {} iterations in {:?}", iterations, duration);
    assert!(duration.as_secs() < 5);
}

//! Criterion benchmarks for the tilechain engine.
//!
//! Two benchmark groups:
//! - `placement`: fill a 64x64 grid with conveyors, then clear it
//! - `payload_flow`: step a grid of parallel conveyor lanes carrying payloads

use criterion::{Criterion, criterion_group, criterion_main};
use tilechain_core::engine::Engine;
use tilechain_core::grid::Direction;
use tilechain_core::test_utils::*;

// ===========================================================================
// Builders
// ===========================================================================

/// `lanes` rows of `length` East-facing conveyors, one payload per lane.
fn build_lanes(lanes: i32, length: i32) -> Engine {
    let mut engine = make_engine(64, 64);
    for y in 0..lanes {
        let head = place_facing(&mut engine, "conveyor", 0, y, Direction::East);
        for x in 1..length {
            place_facing(&mut engine, "conveyor", x, y, Direction::East);
        }
        engine.spawn_payload(head, strawberry()).unwrap();
    }
    engine
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("placement");
    group.bench_function("fill_and_clear_64x64", |b| {
        b.iter(|| {
            let mut engine = make_engine(64, 64);
            for y in 0..64 {
                for x in 0..64 {
                    place_facing(&mut engine, "conveyor", x, y, Direction::East);
                }
            }
            for y in 0..64 {
                for x in 0..64 {
                    engine.remove(x, y).unwrap();
                }
            }
            engine
        });
    });
    group.finish();
}

fn bench_payload_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_flow");
    group.bench_function("64_lanes_x_32", |b| {
        let mut engine = build_lanes(64, 32);
        b.iter(|| {
            engine.step();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_placement, bench_payload_flow);
criterion_main!(benches);

//! Property-based tests for the tilechain core engine.
//!
//! Uses proptest to generate random placement, removal and simulation
//! sequences, then verify occupancy and ownership invariants hold.

use std::collections::BTreeSet;

use proptest::prelude::*;
use tilechain_core::engine::Engine;
use tilechain_core::grid::Direction;
use tilechain_core::test_utils::*;

const NAMES: [&str; 6] = ["conveyor", "wide_conveyor", "station", "table", "fence", "powered_conveyor"];

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum Op {
    Place { kind: usize, x: i32, y: i32, facing: u8 },
    Remove { x: i32, y: i32 },
    Spawn { x: i32, y: i32 },
    Step(u8),
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (0..NAMES.len(), -1..9i32, -1..9i32, 0..4u8)
                .prop_map(|(kind, x, y, facing)| Op::Place { kind, x, y, facing }),
            1 => (0..8i32, 0..8i32).prop_map(|(x, y)| Op::Remove { x, y }),
            1 => (0..8i32, 0..8i32).prop_map(|(x, y)| Op::Spawn { x, y }),
            1 => (1..40u8).prop_map(Op::Step),
        ],
        1..=max_ops,
    )
}

fn facing(i: u8) -> Direction {
    Direction::all()[usize::from(i % 4)]
}

fn apply(engine: &mut Engine, op: &Op) {
    match *op {
        Op::Place { kind, x, y, facing: f } => {
            let id = engine.catalog().id(NAMES[kind]).unwrap();
            let _ = engine.place_facing(id, x, y, facing(f));
        }
        Op::Remove { x, y } => {
            let _ = engine.remove(x, y);
        }
        Op::Spawn { x, y } => {
            if let Some(s) = engine.structure_at(x, y) {
                let _ = engine.spawn_payload(s, strawberry());
            }
        }
        Op::Step(n) => run(engine, u64::from(n)),
    }
}

// ===========================================================================
// Invariant checks
// ===========================================================================

fn check_occupancy(engine: &Engine) {
    let mut covered = 0usize;
    for id in engine.structure_ids() {
        let s = engine.structure(id).unwrap();
        assert!(!s.group().is_none());
        assert_eq!(s.occupying().len(), (s.footprint().width * s.footprint().height) as usize);
        for &i in s.occupying() {
            let tile = engine.grid().tile(i).unwrap();
            assert_eq!(tile.occupant(), Some(id));
            assert_eq!(tile.group(), s.group());
        }
        covered += s.occupying().len();
    }
    let occupied = engine.grid().tiles().filter(|t| t.is_occupied()).count();
    assert_eq!(occupied, covered);
    for tile in engine.grid().tiles() {
        assert_eq!(tile.is_occupied(), !tile.group().is_none());
    }
}

fn check_payload_ownership(engine: &Engine) {
    for pid in engine.payload_ids() {
        let p = engine.payload(pid).unwrap();
        let mover = engine.mover(p.owner()).expect("owner is a live mover");
        let slots = mover.queued().filter(|&q| q == pid).count()
            + mover.moving().iter().filter(|&&m| m == pid).count()
            + mover.held().iter().filter(|&&h| h == pid).count();
        assert_eq!(slots, 1);
    }
    let tracked: usize = engine
        .structure_ids()
        .filter_map(|id| engine.mover(id))
        .map(|m| m.payload_count())
        .sum();
    assert_eq!(tracked, engine.payload_count());
}

/// A conveyor's next hop always reaches past its own leading edge.
fn check_no_backtrack(engine: &Engine) {
    for id in engine.structure_ids() {
        let Some(facing) = engine.mover(id).and_then(|m| m.facing()) else {
            continue;
        };
        let Some(next) = engine.next_mover(id) else {
            continue;
        };
        let own = engine.occupying_positions(id);
        let theirs = engine.occupying_positions(next);
        let progressed = match facing {
            Direction::North => theirs.iter().map(|p| p.y).max() > own.iter().map(|p| p.y).max(),
            Direction::East => theirs.iter().map(|p| p.x).max() > own.iter().map(|p| p.x).max(),
            Direction::South => theirs.iter().map(|p| p.y).min() < own.iter().map(|p| p.y).min(),
            Direction::West => theirs.iter().map(|p| p.x).min() < own.iter().map(|p| p.x).min(),
        };
        assert!(progressed, "{id:?} facing {facing:?} links back to {next:?}");
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every structure's tiles carry its group, and nothing else is occupied.
    #[test]
    fn occupancy_stays_consistent(ops in arb_ops(60)) {
        let mut engine = make_engine(8, 8);
        for op in &ops {
            apply(&mut engine, op);
            check_occupancy(&engine);
        }
    }

    /// Each payload is owned by one live mover, listed exactly once.
    #[test]
    fn payloads_have_one_owner(ops in arb_ops(60)) {
        let mut engine = make_engine(8, 8);
        for op in &ops {
            apply(&mut engine, op);
            check_payload_ownership(&engine);
        }
    }

    /// Conveyor chains only ever point forward.
    #[test]
    fn chains_never_backtrack(ops in arb_ops(60)) {
        let mut engine = make_engine(8, 8);
        for op in &ops {
            apply(&mut engine, op);
            check_no_backtrack(&engine);
        }
    }

    /// Group ids are never reissued, even after removal.
    #[test]
    fn group_ids_never_reused(ops in arb_ops(60)) {
        let mut engine = make_engine(8, 8);
        let mut seen = BTreeSet::new();
        let mut live = BTreeSet::new();
        for op in &ops {
            apply(&mut engine, op);
            for id in engine.structure_ids() {
                let g = engine.structure(id).unwrap().group().0;
                if live.insert((id, g)) {
                    prop_assert!(seen.insert(g), "group {g:#x} issued twice");
                }
            }
        }
    }

    /// A rejected placement changes no tile.
    #[test]
    fn failed_placement_is_atomic(ops in arb_ops(30), kind in 0..NAMES.len(), x in -2..10i32, y in -2..10i32) {
        let mut engine = make_engine(8, 8);
        for op in &ops {
            apply(&mut engine, op);
        }
        let before: Vec<_> = engine.grid().tiles().map(|t| (t.occupant(), t.group())).collect();
        let id = engine.catalog().id(NAMES[kind]).unwrap();
        if engine.place(id, x, y).is_err() {
            let after: Vec<_> = engine.grid().tiles().map(|t| (t.occupant(), t.group())).collect();
            prop_assert_eq!(before, after);
        }
    }

    /// Identical inputs produce identical state hashes.
    #[test]
    fn simulation_is_deterministic(ops in arb_ops(40)) {
        let mut a = make_engine(8, 8);
        let mut b = make_engine(8, 8);
        for op in &ops {
            apply(&mut a, op);
            apply(&mut b, op);
        }
        run(&mut a, 50);
        run(&mut b, 50);
        prop_assert_eq!(a.state_hash(), b.state_hash());
        prop_assert_eq!(a.payload_count(), b.payload_count());
    }
}

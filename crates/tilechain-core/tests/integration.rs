//! Integration tests for the tilechain engine.
//!
//! These exercise end-to-end behaviour through the public API: placement,
//! chain resolution, payload flow through breaks and rescues, power gating,
//! events and snapshots.

use tilechain_core::catalog::Item;
use tilechain_core::config::EngineConfig;
use tilechain_core::engine::Engine;
use tilechain_core::event::{Event, EventKind};
use tilechain_core::grid::{Direction, PlacementError, RemovalError};
use tilechain_core::payload::{PayloadError, PayloadState};
use tilechain_core::test_utils::*;

fn kinds_for(events: &[Event], payload: tilechain_core::id::PayloadId) -> Vec<EventKind> {
    events
        .iter()
        .filter(|e| e.payload() == Some(payload))
        .map(Event::kind)
        .collect()
}

// ===========================================================================
// Scenario 1: two conveyors facing East link up
// ===========================================================================

#[test]
fn adjacent_east_conveyors_form_a_chain() {
    let mut engine = make_engine(4, 4);
    let first = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
    let second = place_facing(&mut engine, "conveyor", 1, 0, Direction::East);
    assert_eq!(engine.find_next_mover(first), Some(second));
    assert_eq!(engine.find_next_mover(second), None);
}

// ===========================================================================
// Scenario 2: a receiver placed during the grace period rescues the payload
// ===========================================================================

#[test]
fn payload_rescued_within_grace_period() {
    let mut engine = make_engine(4, 4);
    let events = record_events(&mut engine);
    let first = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
    let payload = engine.spawn_payload(first, strawberry()).unwrap();

    // 8 steps x 4 ticks to arrive, then the first re-poll.
    run(&mut engine, 38);
    assert_eq!(engine.payload(payload).unwrap().state(), PayloadState::Breaking);

    let second = place_facing(&mut engine, "conveyor", 1, 0, Direction::East);
    run(&mut engine, 8);
    let p = engine.payload(payload).unwrap();
    assert_eq!(p.owner(), second);
    assert_ne!(p.state(), PayloadState::Broken);

    let kinds = kinds_for(&events.borrow(), payload);
    assert!(kinds.contains(&EventKind::PayloadRescued));
    assert!(kinds.contains(&EventKind::PayloadHandedOff));
    assert!(!kinds.contains(&EventKind::PayloadBroken));
}

#[test]
fn receiver_after_grace_period_is_too_late() {
    let mut engine = make_engine(4, 4);
    let first = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
    let payload = engine.spawn_payload(first, strawberry()).unwrap();

    let grace = EngineConfig::default().grace_ticks();
    run(&mut engine, 33 + grace);
    assert_eq!(engine.payload(payload).unwrap().state(), PayloadState::Broken);

    let second = place_facing(&mut engine, "conveyor", 1, 0, Direction::East);
    run(&mut engine, 20);
    assert!(engine.payload(payload).is_none());
    assert!(engine.payloads_on(second).is_empty());
}

// ===========================================================================
// Scenario 3: overlapping placement is rejected atomically
// ===========================================================================

#[test]
fn overlapping_placement_mutates_nothing() {
    let mut engine = make_engine(4, 4);
    place(&mut engine, "fence", 1, 1);
    let before: Vec<_> = engine
        .grid()
        .tiles()
        .map(|t| (t.occupant(), t.group()))
        .collect();

    let table = engine.catalog().id("table").unwrap();
    assert_eq!(
        engine.place(table, 0, 2).unwrap_err(),
        PlacementError::TileOccupied { x: 1, y: 1 }
    );
    let after: Vec<_> = engine
        .grid()
        .tiles()
        .map(|t| (t.occupant(), t.group()))
        .collect();
    assert_eq!(before, after);
}

// ===========================================================================
// Occupancy and removal
// ===========================================================================

#[test]
fn removing_any_tile_of_a_station_clears_all() {
    let mut engine = make_engine(6, 6);
    let events = record_events(&mut engine);
    let station = place(&mut engine, "cut_station", 1, 4);
    assert_eq!(engine.occupying_positions(station).len(), 6);

    engine.remove(3, 3).unwrap();
    assert!(engine.grid().tiles().all(|t| !t.is_occupied()));
    let teardowns = events
        .borrow()
        .iter()
        .filter(|e| e.kind() == EventKind::StructureRemoved)
        .count();
    assert_eq!(teardowns, 1);
    assert_eq!(
        engine.remove(3, 3).unwrap_err(),
        RemovalError::NotOccupied { x: 3, y: 3 }
    );
}

#[test]
fn north_conveyor_never_links_backward() {
    let mut engine = make_engine(6, 6);
    let m = place_facing(&mut engine, "conveyor", 2, 2, Direction::North);
    place_facing(&mut engine, "conveyor", 2, 1, Direction::North);
    place_facing(&mut engine, "conveyor", 1, 2, Direction::North);
    place_facing(&mut engine, "conveyor", 3, 2, Direction::North);
    assert_eq!(engine.find_next_mover(m), None);

    let up = place_facing(&mut engine, "conveyor", 2, 3, Direction::East);
    assert_eq!(engine.find_next_mover(m), Some(up));
}

// ===========================================================================
// Long chains and stations
// ===========================================================================

#[test]
fn payload_travels_a_long_chain_then_breaks() {
    let mut engine = make_engine(8, 2);
    let events = record_events(&mut engine);
    let movers: Vec<_> = (0..6)
        .map(|x| place_facing(&mut engine, "conveyor", x, 0, Direction::East))
        .collect();
    let payload = engine.spawn_payload(movers[0], broccoli()).unwrap();

    run(&mut engine, 33 * 5);
    assert_eq!(engine.payload(payload).unwrap().owner(), movers[5]);

    run(&mut engine, 200);
    assert!(engine.payload(payload).is_none());
    let handoffs = kinds_for(&events.borrow(), payload)
        .into_iter()
        .filter(|k| *k == EventKind::PayloadHandedOff)
        .count();
    assert_eq!(handoffs, 5);
}

#[test]
fn station_feeds_out_to_conveyor() {
    let mut engine = make_engine(8, 6);
    let feeder = place_facing(&mut engine, "conveyor", 0, 3, Direction::East);
    let station = place(&mut engine, "station", 1, 3);
    let out = place_facing(&mut engine, "conveyor", 3, 2, Direction::East);
    let payload = engine.spawn_payload(feeder, Item::Plate { servings: 2 }).unwrap();

    run(&mut engine, 33);
    assert_eq!(engine.payload(payload).unwrap().owner(), station);
    run(&mut engine, 33);
    assert_eq!(engine.payload(payload).unwrap().owner(), out);
}

// ===========================================================================
// Power gating
// ===========================================================================

#[test]
fn power_off_is_idempotent_and_does_not_restart_animation() {
    let mut engine = make_engine(4, 4);
    let events = record_events(&mut engine);
    let c = place_facing(&mut engine, "powered_conveyor", 0, 0, Direction::East);

    assert!(!engine.set_powered(c, false).unwrap());
    assert!(!engine.mover(c).unwrap().is_animating());
    let started = events
        .borrow()
        .iter()
        .filter(|e| e.kind() == EventKind::MovementStarted)
        .count();
    assert_eq!(started, 0);
}

#[test]
fn queued_payloads_flush_on_power() {
    let mut engine = make_engine(4, 4);
    let c = place_facing(&mut engine, "powered_conveyor", 0, 0, Direction::East);
    let a = engine.spawn_payload(c, strawberry()).unwrap();
    let b = engine.spawn_payload(c, broccoli()).unwrap();
    run(&mut engine, 50);
    assert_eq!(engine.mover(c).unwrap().queued().collect::<Vec<_>>(), vec![a, b]);

    engine.set_powered(c, true).unwrap();
    assert_eq!(engine.mover(c).unwrap().moving(), &[a, b]);
}

// ===========================================================================
// Redirect contract
// ===========================================================================

#[test]
fn redirect_of_unknown_payload_fails() {
    let mut engine = make_engine(4, 4);
    let c = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
    let payload = engine.spawn_payload(c, strawberry()).unwrap();
    engine.destroy_payload(payload).unwrap();
    assert_eq!(
        engine.redirect_payload(payload, c).unwrap_err(),
        PayloadError::Unknown(payload)
    );
}

// ===========================================================================
// Snapshots
// ===========================================================================

#[test]
fn snapshot_mid_break_restores_countdown() {
    let mut engine = make_engine(4, 4);
    let c = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
    let payload = engine.spawn_payload(c, strawberry()).unwrap();
    run(&mut engine, 42);
    let left = engine.payload(payload).unwrap().break_steps_left();
    assert!(left.is_some());

    let bytes = engine.snapshot().unwrap();
    let mut restored = Engine::restore(test_catalog(), EngineConfig::default(), &bytes).unwrap();
    let rp = restored.payload_ids().next().unwrap();
    assert_eq!(restored.payload(rp).unwrap().break_steps_left(), left);

    run(&mut restored, 100);
    assert_eq!(restored.payload_count(), 0);
}

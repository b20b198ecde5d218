//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so other crates
//! reach them through the `test-utils` feature.

use std::cell::RefCell;
use std::rc::Rc;

use crate::catalog::{Catalog, CatalogBuilder, Descriptor, Item, Role};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::event::Event;
use crate::fixed::Fixed64;
use crate::grid::{Direction, Footprint};
use crate::id::StructureId;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Catalog
// ===========================================================================

fn conveyor(needs_power: bool) -> Role {
    Role::Conveyor {
        facing: Direction::East,
        needs_power,
        move_steps: None,
    }
}

/// Descriptors used across the test suites:
///
/// | name               | footprint | role                               |
/// |--------------------|-----------|------------------------------------|
/// | `conveyor`         | 1x1       | conveyor, free running             |
/// | `powered_conveyor` | 1x1       | conveyor, needs power, connectable |
/// | `wide_conveyor`    | 2x1       | conveyor, free running             |
/// | `station`          | 2x2       | station, holds items               |
/// | `cut_station`      | 3x2       | station, needs power, connectable  |
/// | `power_cell`       | 1x1       | power source, 3 lines, range 2     |
/// | `table`            | 2x2       | fixture                            |
/// | `fence`            | 1x1       | fixture                            |
/// | `relay_conveyor`   | 1x1       | conveyor, 1 line, range 4          |
pub fn test_catalog() -> Catalog {
    let mut b = CatalogBuilder::new();
    b.register(Descriptor::new("conveyor", Footprint::single(), conveyor(false)));
    b.register(Descriptor::new("powered_conveyor", Footprint::single(), conveyor(true)).connectable());
    b.register(Descriptor::new("wide_conveyor", Footprint::new(2, 1), conveyor(false)));
    b.register(Descriptor::new(
        "station",
        Footprint::new(2, 2),
        Role::Station {
            needs_power: false,
            hold_items: true,
        },
    ));
    b.register(
        Descriptor::new(
            "cut_station",
            Footprint::new(3, 2),
            Role::Station {
                needs_power: true,
                hold_items: false,
            },
        )
        .connectable()
        .with_animation_frames(6),
    );
    b.register(Descriptor::new("power_cell", Footprint::single(), Role::PowerSource).with_connector(3, 2));
    b.register(Descriptor::new("table", Footprint::new(2, 2), Role::Fixture));
    b.register(Descriptor::new("fence", Footprint::single(), Role::Fixture));
    b.register(Descriptor::new("relay_conveyor", Footprint::single(), conveyor(false)).with_connector(1, 4));
    b.build().expect("test catalog is valid")
}

// ===========================================================================
// Engine builders
// ===========================================================================

/// Engine over a `width` x `height` grid with unit cells and default config.
pub fn make_engine(width: i32, height: i32) -> Engine {
    make_engine_with(width, height, EngineConfig::default())
}

pub fn make_engine_with(width: i32, height: i32, config: EngineConfig) -> Engine {
    Engine::with_grid(width, height, fixed(1.0), test_catalog(), config).expect("valid grid")
}

/// Place a descriptor by name, panicking on failure.
pub fn place(engine: &mut Engine, name: &str, x: i32, y: i32) -> StructureId {
    let id = engine.catalog().id(name).expect("descriptor in test catalog");
    engine.place(id, x, y).expect("placement succeeds")
}

pub fn place_facing(engine: &mut Engine, name: &str, x: i32, y: i32, facing: Direction) -> StructureId {
    let id = engine.catalog().id(name).expect("descriptor in test catalog");
    engine
        .place_facing(id, x, y, facing)
        .expect("placement succeeds")
}

// ===========================================================================
// Simulation helpers
// ===========================================================================

/// Step the engine `ticks` times.
pub fn run(engine: &mut Engine, ticks: u64) {
    for _ in 0..ticks {
        engine.step();
    }
}

/// Record every delivered event.
pub fn record_events(engine: &mut Engine) -> Rc<RefCell<Vec<Event>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    engine.on_passive(Box::new(move |e| sink.borrow_mut().push(e.clone())));
    events
}

pub fn strawberry() -> Item {
    Item::Strawberry { sliced: false }
}

pub fn broccoli() -> Item {
    Item::Broccoli { roasted: false }
}

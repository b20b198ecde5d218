//! Synchronous event delivery.
//!
//! Events are handed to passive listeners at the state transition that
//! produced them; nothing is buffered and no history is kept. Event kinds
//! can be suppressed, in which case emitting them costs a flag check.

use crate::catalog::Item;
use crate::fixed::Ticks;
use crate::grid::{Direction, GridPosition};
use crate::id::{DescriptorId, OccupancyGroupId, PayloadId, StructureId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Structures --
    StructurePlaced {
        structure: StructureId,
        descriptor: DescriptorId,
        anchor: GridPosition,
        tick: Ticks,
    },
    /// Teardown: fired exactly once per removed structure.
    StructureRemoved {
        structure: StructureId,
        descriptor: DescriptorId,
        group: OccupancyGroupId,
        tick: Ticks,
    },

    // -- Payloads --
    PayloadSpawned {
        payload: PayloadId,
        mover: StructureId,
        item: Item,
        tick: Ticks,
    },
    PayloadStartedMoving {
        payload: PayloadId,
        mover: StructureId,
        tick: Ticks,
    },
    PayloadHandedOff {
        payload: PayloadId,
        from: StructureId,
        to: StructureId,
        tick: Ticks,
    },
    PayloadHeld {
        payload: PayloadId,
        mover: StructureId,
        tick: Ticks,
    },
    PayloadEnteredBreak {
        payload: PayloadId,
        mover: StructureId,
        tick: Ticks,
    },
    PayloadRescued {
        payload: PayloadId,
        mover: StructureId,
        to: StructureId,
        tick: Ticks,
    },
    PayloadBroken {
        payload: PayloadId,
        tick: Ticks,
    },
    PayloadDestroyed {
        payload: PayloadId,
        tick: Ticks,
    },

    // -- Movers --
    /// The receiving mover's controller accepted a payload.
    MoverAccepted {
        mover: StructureId,
        payload: PayloadId,
        tick: Ticks,
    },
    MovementStarted {
        mover: StructureId,
        tick: Ticks,
    },
    MovementStopped {
        mover: StructureId,
        tick: Ticks,
    },
    MoverFrame {
        mover: StructureId,
        frame: u32,
        tick: Ticks,
    },
    MoverRotated {
        mover: StructureId,
        facing: Direction,
        tick: Ticks,
    },

    // -- Power --
    PowerChanged {
        structure: StructureId,
        powered: bool,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StructurePlaced,
    StructureRemoved,
    PayloadSpawned,
    PayloadStartedMoving,
    PayloadHandedOff,
    PayloadHeld,
    PayloadEnteredBreak,
    PayloadRescued,
    PayloadBroken,
    PayloadDestroyed,
    MoverAccepted,
    MovementStarted,
    MovementStopped,
    MoverFrame,
    MoverRotated,
    PowerChanged,
}

const EVENT_KIND_COUNT: usize = 16;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StructurePlaced { .. } => EventKind::StructurePlaced,
            Event::StructureRemoved { .. } => EventKind::StructureRemoved,
            Event::PayloadSpawned { .. } => EventKind::PayloadSpawned,
            Event::PayloadStartedMoving { .. } => EventKind::PayloadStartedMoving,
            Event::PayloadHandedOff { .. } => EventKind::PayloadHandedOff,
            Event::PayloadHeld { .. } => EventKind::PayloadHeld,
            Event::PayloadEnteredBreak { .. } => EventKind::PayloadEnteredBreak,
            Event::PayloadRescued { .. } => EventKind::PayloadRescued,
            Event::PayloadBroken { .. } => EventKind::PayloadBroken,
            Event::PayloadDestroyed { .. } => EventKind::PayloadDestroyed,
            Event::MoverAccepted { .. } => EventKind::MoverAccepted,
            Event::MovementStarted { .. } => EventKind::MovementStarted,
            Event::MovementStopped { .. } => EventKind::MovementStopped,
            Event::MoverFrame { .. } => EventKind::MoverFrame,
            Event::MoverRotated { .. } => EventKind::MoverRotated,
            Event::PowerChanged { .. } => EventKind::PowerChanged,
        }
    }

    /// Payload this event concerns, if any.
    pub fn payload(&self) -> Option<PayloadId> {
        match *self {
            Event::PayloadSpawned { payload, .. }
            | Event::PayloadStartedMoving { payload, .. }
            | Event::PayloadHandedOff { payload, .. }
            | Event::PayloadHeld { payload, .. }
            | Event::PayloadEnteredBreak { payload, .. }
            | Event::PayloadRescued { payload, .. }
            | Event::PayloadBroken { payload, .. }
            | Event::PayloadDestroyed { payload, .. }
            | Event::MoverAccepted { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

struct Listener {
    filter: Option<EventKind>,
    callback: PassiveListener,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Listener registry with per-kind suppression.
pub struct EventBus {
    listeners: Vec<Listener>,
    suppressed: [bool; EVENT_KIND_COUNT],
    emitted: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("suppressed", &self.suppressed)
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            suppressed: [false; EVENT_KIND_COUNT],
            emitted: 0,
        }
    }

    /// Register a listener for every event kind.
    pub fn on_passive(&mut self, listener: PassiveListener) {
        self.listeners.push(Listener {
            filter: None,
            callback: listener,
        });
    }

    /// Register a listener for one event kind.
    pub fn on_kind(&mut self, kind: EventKind, listener: PassiveListener) {
        self.listeners.push(Listener {
            filter: Some(kind),
            callback: listener,
        });
    }

    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Deliver `event` to every matching listener, in registration order.
    pub fn emit(&mut self, event: Event) {
        let kind = event.kind();
        if self.suppressed[kind.index()] {
            return;
        }
        self.emitted += 1;
        for listener in &mut self.listeners {
            if listener.filter.is_none_or(|k| k == kind) {
                (listener.callback)(&event);
            }
        }
    }

    /// Events delivered so far (suppressed ones excluded).
    pub fn emitted_count(&self) -> u64 {
        self.emitted
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }
}

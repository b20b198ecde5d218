//! Mover state: conveyors and stations.
//!
//! Mover behaviour is enum-dispatched through [`MoverKind`]. A conveyor
//! forwards along its facing; a station forwards to any adjacent receiver.
//! The chain-resolution and payload-flow algorithms that need the whole
//! engine live in `chain.rs`; this module holds the per-mover bookkeeping
//! and the pure directional test.

use std::collections::VecDeque;

use crate::catalog::Role;
use crate::grid::{Direction, Footprint, GridPosition};
use crate::id::{PayloadId, StructureId, TaskId};
use crate::payload::PayloadError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoverError {
    #[error("unknown structure {0:?}")]
    Unknown(StructureId),
    #[error("structure {0:?} is not a mover")]
    NotAMover(StructureId),
    #[error("mover {0:?} is transferring payloads")]
    Busy(StructureId),
    #[error("mover {0:?} movement animation is not running")]
    NotRunning(StructureId),
    #[error("mover {0:?} movement animation is already running")]
    AlreadyRunning(StructureId),
    #[error("mover {0:?} has no facing to rotate")]
    NotRotatable(StructureId),
    #[error("mover {0:?} cannot be linked to itself")]
    SelfLink(StructureId),
    #[error("unknown payload {0:?}")]
    UnknownPayload(PayloadId),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Variant-specific mover data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoverKind {
    Conveyor { facing: Direction },
    /// Receivers are every adjacent mover that does not feed back into the
    /// station, in tile order.
    Station { receivers: Vec<StructureId> },
}

/// Whether a move onto `pos` progresses along `facing` past `edge`.
///
/// `edge` is the coordinate of the mover's leading edge on the facing axis
/// (see [`leading_edge`]). Only the primary axis is compared, so callers must
/// restrict `pos` to tiles adjacent to the mover.
pub fn makes_progress(facing: Direction, edge: i32, pos: GridPosition) -> bool {
    match facing {
        Direction::North => pos.y > edge,
        Direction::East => pos.x > edge,
        Direction::South => pos.y < edge,
        Direction::West => pos.x < edge,
    }
}

/// Coordinate of the footprint's outermost row or column toward `facing`.
pub fn leading_edge(anchor: GridPosition, footprint: Footprint, facing: Direction) -> i32 {
    match facing {
        Direction::North => anchor.y,
        Direction::South => anchor.y - footprint.height as i32 + 1,
        Direction::East => anchor.x + footprint.width as i32 - 1,
        Direction::West => anchor.x,
    }
}

#[derive(Debug, Clone)]
pub struct MoverState {
    pub(crate) kind: MoverKind,
    /// Cached next hop. Validated against the structure table on use.
    pub(crate) next: Option<StructureId>,
    /// Next hop pinned by a connector line; wins over the grid chain.
    pub(crate) link: Option<StructureId>,
    pub(crate) queued: VecDeque<PayloadId>,
    pub(crate) moving: Vec<PayloadId>,
    pub(crate) held: Vec<PayloadId>,
    pub(crate) needs_power: bool,
    pub(crate) hold_items: bool,
    pub(crate) move_steps: Option<u32>,
    pub(crate) animation: Option<TaskId>,
    pub(crate) frame: u32,
    pub(crate) frame_count: u32,
}

impl MoverState {
    /// Mover state for a role, or `None` for non-mover roles.
    pub fn from_role(role: &Role, frame_count: u32) -> Option<Self> {
        let (kind, needs_power, hold_items, move_steps) = match *role {
            Role::Conveyor {
                facing,
                needs_power,
                move_steps,
            } => (MoverKind::Conveyor { facing }, needs_power, false, move_steps),
            Role::Station {
                needs_power,
                hold_items,
            } => (
                MoverKind::Station {
                    receivers: Vec::new(),
                },
                needs_power,
                hold_items,
                None,
            ),
            Role::PowerSource | Role::Fixture => return None,
        };
        Some(Self {
            kind,
            next: None,
            link: None,
            queued: VecDeque::new(),
            moving: Vec::new(),
            held: Vec::new(),
            needs_power,
            hold_items,
            move_steps,
            animation: None,
            frame: 0,
            frame_count: frame_count.max(1),
        })
    }

    pub fn kind(&self) -> &MoverKind {
        &self.kind
    }

    /// Facing of a conveyor; stations have none.
    pub fn facing(&self) -> Option<Direction> {
        match self.kind {
            MoverKind::Conveyor { facing } => Some(facing),
            MoverKind::Station { .. } => None,
        }
    }

    pub fn is_station(&self) -> bool {
        matches!(self.kind, MoverKind::Station { .. })
    }

    pub fn receivers(&self) -> &[StructureId] {
        match &self.kind {
            MoverKind::Station { receivers } => receivers,
            MoverKind::Conveyor { .. } => &[],
        }
    }

    /// Raw cached next hop. May name a removed structure.
    pub fn cached_next(&self) -> Option<StructureId> {
        self.next
    }

    pub fn link(&self) -> Option<StructureId> {
        self.link
    }

    pub fn queued(&self) -> impl Iterator<Item = PayloadId> + '_ {
        self.queued.iter().copied()
    }

    pub fn moving(&self) -> &[PayloadId] {
        &self.moving
    }

    pub fn held(&self) -> &[PayloadId] {
        &self.held
    }

    pub fn needs_power(&self) -> bool {
        self.needs_power
    }

    pub fn holds_items(&self) -> bool {
        self.hold_items
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Whether any payload is queued, moving or held here.
    pub fn is_busy(&self) -> bool {
        !self.queued.is_empty() || !self.moving.is_empty() || !self.held.is_empty()
    }

    pub fn payload_count(&self) -> usize {
        self.queued.len() + self.moving.len() + self.held.len()
    }

    /// Detach `payload` from whichever list holds it.
    pub(crate) fn detach(&mut self, payload: PayloadId) -> bool {
        if let Some(i) = self.queued.iter().position(|&p| p == payload) {
            self.queued.remove(i);
            return true;
        }
        if let Some(i) = self.moving.iter().position(|&p| p == payload) {
            self.moving.remove(i);
            return true;
        }
        if let Some(i) = self.held.iter().position(|&p| p == payload) {
            self.held.remove(i);
            return true;
        }
        false
    }

    /// Every payload owned by this mover.
    pub(crate) fn all_payloads(&self) -> Vec<PayloadId> {
        self.queued
            .iter()
            .chain(self.moving.iter())
            .chain(self.held.iter())
            .copied()
            .collect()
    }

    pub(crate) fn advance_frame(&mut self) -> u32 {
        self.frame = (self.frame + 1) % self.frame_count;
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn conveyor_role(facing: Direction) -> Role {
        Role::Conveyor {
            facing,
            needs_power: false,
            move_steps: None,
        }
    }

    // -----------------------------------------------------------------------
    // Directional test
    // -----------------------------------------------------------------------

    #[test]
    fn progress_is_strict_on_primary_axis() {
        let here = GridPosition::new(2, 2);
        assert!(makes_progress(Direction::North, 2, GridPosition::new(2, 3)));
        assert!(!makes_progress(Direction::North, 2, here));
        assert!(!makes_progress(Direction::North, 2, GridPosition::new(2, 1)));
        assert!(makes_progress(Direction::East, 2, GridPosition::new(3, 2)));
        assert!(!makes_progress(Direction::East, 2, GridPosition::new(1, 2)));
        assert!(makes_progress(Direction::South, 2, GridPosition::new(2, 1)));
        assert!(makes_progress(Direction::West, 2, GridPosition::new(1, 2)));
        assert!(!makes_progress(Direction::West, 2, GridPosition::new(2, 5)));
    }

    #[test]
    fn leading_edge_of_wide_footprint() {
        let anchor = GridPosition::new(1, 4);
        let fp = Footprint::new(3, 2);
        assert_eq!(leading_edge(anchor, fp, Direction::North), 4);
        assert_eq!(leading_edge(anchor, fp, Direction::South), 3);
        assert_eq!(leading_edge(anchor, fp, Direction::East), 3);
        assert_eq!(leading_edge(anchor, fp, Direction::West), 1);
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    #[test]
    fn roles_map_to_kinds() {
        let c = MoverState::from_role(&conveyor_role(Direction::West), 4).unwrap();
        assert_eq!(c.facing(), Some(Direction::West));
        assert!(!c.holds_items());

        let s = MoverState::from_role(
            &Role::Station {
                needs_power: true,
                hold_items: true,
            },
            4,
        )
        .unwrap();
        assert!(s.is_station());
        assert!(s.facing().is_none());
        assert!(s.needs_power());
        assert!(s.holds_items());

        assert!(MoverState::from_role(&Role::Fixture, 4).is_none());
        assert!(MoverState::from_role(&Role::PowerSource, 4).is_none());
    }

    #[test]
    fn detach_finds_payload_in_any_list() {
        let mut ids = SlotMap::<PayloadId, ()>::with_key();
        let (a, b, c) = (ids.insert(()), ids.insert(()), ids.insert(()));
        let mut m = MoverState::from_role(&conveyor_role(Direction::East), 4).unwrap();
        m.queued.push_back(a);
        m.moving.push(b);
        m.held.push(c);
        assert!(m.is_busy());
        assert_eq!(m.payload_count(), 3);
        assert_eq!(m.all_payloads(), vec![a, b, c]);

        assert!(m.detach(b));
        assert!(!m.detach(b));
        assert!(m.detach(a));
        assert!(m.detach(c));
        assert!(!m.is_busy());
    }

    #[test]
    fn frames_wrap() {
        let mut m = MoverState::from_role(&conveyor_role(Direction::East), 3).unwrap();
        assert_eq!(m.advance_frame(), 1);
        assert_eq!(m.advance_frame(), 2);
        assert_eq!(m.advance_frame(), 0);
    }
}

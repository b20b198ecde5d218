//! Placed structures.
//!
//! A structure is owned by the engine's structure table and exists exactly as
//! long as its occupying tiles reference it. It caches its surrounding set
//! (4-neighbour tiles outside its own group), which is refreshed when it or
//! a neighbour is placed.

use crate::grid::{Footprint, GridPosition};
use crate::id::{DescriptorId, OccupancyGroupId, StructureId};
use crate::mover::MoverState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("unknown structure {0:?}")]
    Unknown(StructureId),
}

#[derive(Debug, Clone)]
pub struct Structure {
    pub(crate) id: StructureId,
    pub(crate) descriptor: DescriptorId,
    pub(crate) anchor: GridPosition,
    pub(crate) footprint: Footprint,
    pub(crate) group: OccupancyGroupId,
    /// Tile indices, sorted.
    pub(crate) occupying: Vec<usize>,
    /// Tile indices adjacent to `occupying`, sorted.
    pub(crate) surrounding: Vec<usize>,
    pub(crate) powered: bool,
    pub(crate) mover: Option<MoverState>,
}

impl Structure {
    pub fn id(&self) -> StructureId {
        self.id
    }

    pub fn descriptor(&self) -> DescriptorId {
        self.descriptor
    }

    pub fn anchor(&self) -> GridPosition {
        self.anchor
    }

    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    pub fn group(&self) -> OccupancyGroupId {
        self.group
    }

    pub fn occupying(&self) -> &[usize] {
        &self.occupying
    }

    pub fn surrounding(&self) -> &[usize] {
        &self.surrounding
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn mover(&self) -> Option<&MoverState> {
        self.mover.as_ref()
    }

    pub fn is_mover(&self) -> bool {
        self.mover.is_some()
    }
}

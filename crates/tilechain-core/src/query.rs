//! Read-only query API for renderers and controllers.
//!
//! All view types are owned copies; nothing borrows engine storage.

use crate::catalog::Item;
use crate::engine::Engine;
use crate::fixed::{Fixed64, WorldPos};
use crate::grid::{Direction, Footprint, GridPosition};
use crate::id::{OccupancyGroupId, PayloadId, StructureId};
use crate::payload::PayloadState;

// ---------------------------------------------------------------------------
// Tile view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileView {
    pub position: GridPosition,
    pub world: WorldPos,
    pub occupant: Option<StructureId>,
    pub group: OccupancyGroupId,
}

// ---------------------------------------------------------------------------
// Structure view
// ---------------------------------------------------------------------------

/// A placed structure as a renderer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureView {
    pub id: StructureId,
    /// Descriptor name the structure was placed from.
    pub name: String,
    pub anchor: GridPosition,
    pub footprint: Footprint,
    pub group: OccupancyGroupId,
    pub center: WorldPos,
    pub powered: bool,
    pub mover: Option<MoverView>,
}

/// Chain state of a mover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverView {
    /// `None` for stations.
    pub facing: Option<Direction>,
    /// Next hop, if it is still alive.
    pub next: Option<StructureId>,
    pub receivers: Vec<StructureId>,
    pub queued: Vec<PayloadId>,
    pub moving: Vec<PayloadId>,
    pub held: Vec<PayloadId>,
    pub animating: bool,
    pub frame: u32,
}

// ---------------------------------------------------------------------------
// Payload view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadView {
    pub id: PayloadId,
    pub item: Item,
    pub state: PayloadState,
    pub owner: StructureId,
    pub position: WorldPos,
    /// 1 at full size, shrinking toward 0 while breaking.
    pub scale: Fixed64,
    pub redirectable: bool,
}

impl Engine {
    pub fn tile_view(&self, x: i32, y: i32) -> Option<TileView> {
        let tile = self.grid.tile_at(x, y)?;
        Some(TileView {
            position: tile.position(),
            world: self.grid.world_pos(tile.position()),
            occupant: tile.occupant(),
            group: tile.group(),
        })
    }

    pub fn structure_view(&self, id: StructureId) -> Option<StructureView> {
        let s = self.structures.get(id)?;
        let name = self
            .catalog
            .get(s.descriptor)
            .map(|d| d.name.clone())
            .unwrap_or_default();
        let mover = s.mover.as_ref().map(|m| MoverView {
            facing: m.facing(),
            next: self.next_mover(id),
            receivers: m.receivers().to_vec(),
            queued: m.queued().collect(),
            moving: m.moving().to_vec(),
            held: m.held().to_vec(),
            animating: m.is_animating(),
            frame: m.frame(),
        });
        Some(StructureView {
            id,
            name,
            anchor: s.anchor,
            footprint: s.footprint,
            group: s.group,
            center: self.grid.footprint_center(s.anchor, s.footprint),
            powered: s.powered,
            mover,
        })
    }

    /// Every structure, in placement-table order.
    pub fn structure_views(&self) -> Vec<StructureView> {
        self.structures
            .keys()
            .filter_map(|id| self.structure_view(id))
            .collect()
    }

    pub fn payload_view(&self, id: PayloadId) -> Option<PayloadView> {
        let p = self.payloads.get(id)?;
        Some(PayloadView {
            id,
            item: p.item,
            state: p.state,
            owner: p.owner,
            position: p.position,
            scale: p.scale,
            redirectable: p.redirectable,
        })
    }

    pub fn payload_views(&self) -> Vec<PayloadView> {
        self.payloads
            .keys()
            .filter_map(|id| self.payload_view(id))
            .collect()
    }
}

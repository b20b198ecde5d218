//! Tile grid: spatial index, neighbour links and occupancy bookkeeping.
//!
//! Tiles are created once at construction and stored row-major
//! (`index = y * width + x`). North is +y. Each tile carries its four
//! neighbour links (N/E/S/W), fixed at construction; edge tiles have `None`
//! in the missing directions.
//!
//! A structure footprint anchored at `(x, y)` with `w x h` tiles covers the
//! rectangle `[x, x + w) x [y - h + 1, y]`: the anchor is the top-left tile
//! and the footprint extends east and south from it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, WorldPos};
use crate::id::{DescriptorId, OccupancyGroupId, StructureId};
use crate::rng::SimRng;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A position on the 2D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The position one tile away in `dir`.
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.offset();
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Size of a structure on the grid, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    pub width: u32,
    pub height: u32,
}

impl Footprint {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A 1x1 footprint.
    pub fn single() -> Self {
        Self::new(1, 1)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether both sides fit the signed coordinate range.
    pub fn fits_coordinates(&self) -> bool {
        i32::try_from(self.width).is_ok() && i32::try_from(self.height).is_ok()
    }

    /// Every position covered when anchored at `anchor`, row by row from
    /// the anchor row southwards.
    ///
    /// Positions past the `i32` range clamp to its edge, which lies outside
    /// any grid.
    pub fn tiles(&self, anchor: GridPosition) -> impl Iterator<Item = GridPosition> {
        let w = i32::try_from(self.width).unwrap_or(i32::MAX);
        let h = i32::try_from(self.height).unwrap_or(i32::MAX);
        (0..h).flat_map(move |dy| {
            (0..w).map(move |dx| {
                GridPosition::new(anchor.x.saturating_add(dx), anchor.y.saturating_sub(dy))
            })
        })
    }
}

/// Cardinal directions, in neighbour-slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All four cardinal directions.
    pub fn all() -> [Direction; 4] {
        [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ]
    }

    /// Grid offset for one step in this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::East => (1, 0),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    /// Slot of this direction in a tile's neighbour array.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Errors from grid construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("grid dimensions {width}x{height} must be positive and even")]
    InvalidDimension { width: i32, height: i32 },
    #[error("cell size must be positive")]
    InvalidCellSize,
}

/// Errors from structure placement. A failed placement mutates nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("footprint leaves the grid at ({x}, {y})")]
    OutOfBounds { x: i32, y: i32 },
    #[error("tile ({x}, {y}) is already occupied")]
    TileOccupied { x: i32, y: i32 },
    #[error("unknown descriptor {0:?}")]
    UnknownDescriptor(DescriptorId),
}

/// Errors from structure removal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemovalError {
    #[error("tile ({x}, {y}) has no occupant")]
    NotOccupied { x: i32, y: i32 },
}

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// One grid cell.
///
/// Invariant: `group` is non-zero iff `occupant` is `Some`.
#[derive(Debug, Clone)]
pub struct Tile {
    pos: GridPosition,
    occupant: Option<StructureId>,
    group: OccupancyGroupId,
    neighbors: [Option<usize>; 4],
}

impl Tile {
    pub fn position(&self) -> GridPosition {
        self.pos
    }

    pub fn occupant(&self) -> Option<StructureId> {
        self.occupant
    }

    pub fn group(&self) -> OccupancyGroupId {
        self.group
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// Index of the neighbouring tile in `dir`, if the grid extends there.
    pub fn neighbor(&self, dir: Direction) -> Option<usize> {
        self.neighbors[dir.index()]
    }
}

/// Per-tile availability returned by [`Grid::highlight_footprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAvailability {
    pub pos: GridPosition,
    pub in_bounds: bool,
    pub available: bool,
}

/// Read-only preview of a candidate placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootprintPreview {
    pub anchor: GridPosition,
    pub tiles: Vec<TileAvailability>,
}

impl FootprintPreview {
    /// True when every covered tile is inside the grid and free.
    pub fn placeable(&self) -> bool {
        self.tiles.iter().all(|t| t.available)
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Owns every tile and the set of occupancy group ids ever issued.
#[derive(Debug, Clone)]
pub struct Grid {
    width: u32,
    height: u32,
    cell_size: Fixed64,
    tiles: Vec<Tile>,
    issued_groups: BTreeSet<u64>,
    rng: SimRng,
}

impl Grid {
    /// Build a grid and wire neighbour links. Width and height must be
    /// positive and even; cell size must be positive.
    pub fn new(width: i32, height: i32, cell_size: Fixed64) -> Result<Self, GridError> {
        Self::with_seed(width, height, cell_size, 0)
    }

    /// Like [`Grid::new`] with an explicit group-id seed.
    pub fn with_seed(
        width: i32,
        height: i32,
        cell_size: Fixed64,
        seed: u64,
    ) -> Result<Self, GridError> {
        if width <= 0 || height <= 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(GridError::InvalidDimension { width, height });
        }
        if cell_size <= Fixed64::ZERO {
            return Err(GridError::InvalidCellSize);
        }
        let (w, h) = (width as u32, height as u32);
        let mut tiles = Vec::with_capacity((w * h) as usize);
        for y in 0..height {
            for x in 0..width {
                tiles.push(Tile {
                    pos: GridPosition::new(x, y),
                    occupant: None,
                    group: OccupancyGroupId::NONE,
                    neighbors: [None; 4],
                });
            }
        }
        let mut grid = Self {
            width: w,
            height: h,
            cell_size,
            tiles,
            issued_groups: BTreeSet::new(),
            rng: SimRng::new(seed),
        };
        for i in 0..grid.tiles.len() {
            let pos = grid.tiles[i].pos;
            for dir in Direction::all() {
                grid.tiles[i].neighbors[dir.index()] = grid.index_of(pos.step(dir));
            }
        }
        Ok(grid)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cell_size(&self) -> Fixed64 {
        self.cell_size
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn in_bounds(&self, pos: GridPosition) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    /// Row-major index of `pos`, or `None` outside the grid.
    pub fn index_of(&self, pos: GridPosition) -> Option<usize> {
        if !self.in_bounds(pos) {
            return None;
        }
        Some(pos.y as usize * self.width as usize + pos.x as usize)
    }

    /// O(1) tile lookup. Out-of-range coordinates yield `None`.
    pub fn tile_at(&self, x: i32, y: i32) -> Option<&Tile> {
        self.index_of(GridPosition::new(x, y)).map(|i| &self.tiles[i])
    }

    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// World-space centre of a tile.
    pub fn world_pos(&self, pos: GridPosition) -> WorldPos {
        WorldPos::new(
            Fixed64::from_num(pos.x) * self.cell_size,
            Fixed64::from_num(pos.y) * self.cell_size,
        )
    }

    /// World-space centre of a footprint anchored at `anchor`.
    pub fn footprint_center(&self, anchor: GridPosition, footprint: Footprint) -> WorldPos {
        let half = Fixed64::from_num(1) / 2;
        let dx = Fixed64::from_num(footprint.width.saturating_sub(1)) * half;
        let dy = Fixed64::from_num(footprint.height.saturating_sub(1)) * half;
        let base = self.world_pos(anchor);
        WorldPos::new(
            base.x + dx * self.cell_size,
            base.y - dy * self.cell_size,
        )
    }

    // -- Occupancy --

    /// Tile indices covered by a footprint, or the first position outside
    /// the grid.
    pub fn footprint_indices(
        &self,
        anchor: GridPosition,
        footprint: Footprint,
    ) -> Result<Vec<usize>, PlacementError> {
        footprint
            .tiles(anchor)
            .map(|pos| {
                self.index_of(pos)
                    .ok_or(PlacementError::OutOfBounds { x: pos.x, y: pos.y })
            })
            .collect()
    }

    /// Fails with the first occupied tile among `indices`.
    pub fn check_free(&self, indices: &[usize]) -> Result<(), PlacementError> {
        match indices.iter().map(|&i| &self.tiles[i]).find(|t| t.is_occupied()) {
            Some(t) => Err(PlacementError::TileOccupied {
                x: t.pos.x,
                y: t.pos.y,
            }),
            None => Ok(()),
        }
    }

    /// Pure availability query for a candidate placement.
    pub fn highlight_footprint(&self, anchor: GridPosition, footprint: Footprint) -> FootprintPreview {
        let tiles = footprint
            .tiles(anchor)
            .map(|pos| match self.index_of(pos) {
                Some(i) => TileAvailability {
                    pos,
                    in_bounds: true,
                    available: !self.tiles[i].is_occupied(),
                },
                None => TileAvailability {
                    pos,
                    in_bounds: false,
                    available: false,
                },
            })
            .collect();
        FootprintPreview { anchor, tiles }
    }

    /// Draw a fresh group id, never zero and never issued before on this grid.
    pub fn allocate_group(&mut self) -> OccupancyGroupId {
        loop {
            let id = self.rng.next_nonzero_u64();
            if self.issued_groups.insert(id) {
                return OccupancyGroupId(id);
            }
        }
    }

    /// Record a group id that was issued elsewhere (snapshot restore).
    pub(crate) fn reserve_group(&mut self, group: OccupancyGroupId) {
        if !group.is_none() {
            self.issued_groups.insert(group.0);
        }
    }

    pub fn issued_groups(&self) -> impl Iterator<Item = OccupancyGroupId> + '_ {
        self.issued_groups.iter().map(|&g| OccupancyGroupId(g))
    }

    pub fn is_issued(&self, group: OccupancyGroupId) -> bool {
        self.issued_groups.contains(&group.0)
    }

    pub(crate) fn group_rng_state(&self) -> u64 {
        self.rng.state()
    }

    pub(crate) fn set_group_rng_state(&mut self, state: u64) {
        self.rng = SimRng::new(state);
    }

    /// Mark every tile in `indices` as occupied. Callers validate first.
    pub(crate) fn claim(&mut self, indices: &[usize], occupant: StructureId, group: OccupancyGroupId) {
        for &i in indices {
            let tile = &mut self.tiles[i];
            debug_assert!(tile.occupant.is_none() && tile.group.is_none());
            tile.occupant = Some(occupant);
            tile.group = group;
        }
    }

    /// Empty every tile reachable from `start` through neighbour links
    /// whose group matches the start tile's group. Returns the cleared
    /// indices, sorted. An unoccupied start clears nothing.
    pub(crate) fn clear_group(&mut self, start: usize) -> Vec<usize> {
        let group = self.tiles[start].group;
        if group.is_none() {
            return Vec::new();
        }
        let mut cleared = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if self.tiles[i].group != group {
                continue;
            }
            self.tiles[i].group = OccupancyGroupId::NONE;
            self.tiles[i].occupant = None;
            cleared.push(i);
            stack.extend(self.tiles[i].neighbors.iter().flatten().copied());
        }
        cleared.sort_unstable();
        cleared
    }

    /// Tiles within `thickness` 4-neighbour steps of `occupying`, excluding
    /// tiles of `group` itself. Sorted by index.
    pub fn surrounding(
        &self,
        occupying: &[usize],
        group: OccupancyGroupId,
        thickness: u32,
    ) -> Vec<usize> {
        let own: BTreeSet<usize> = occupying.iter().copied().collect();
        let mut seen = own.clone();
        let mut result = BTreeSet::new();
        let mut frontier: Vec<usize> = occupying.to_vec();
        for _ in 0..thickness {
            let mut next = Vec::new();
            for &i in &frontier {
                for n in self.tiles[i].neighbors.iter().flatten().copied() {
                    if !seen.insert(n) {
                        continue;
                    }
                    if !group.is_none() && self.tiles[n].group == group {
                        continue;
                    }
                    result.insert(n);
                    next.push(n);
                }
            }
            frontier = next;
        }
        result.into_iter().collect()
    }
}

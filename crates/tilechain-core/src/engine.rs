//! The simulation engine: owns the grid, the structure and payload tables,
//! the scheduler and the event bus.
//!
//! # Architecture
//!
//! Placement and removal are synchronous, all-or-nothing calls. Everything
//! timed (payload motion, break grace periods, settle delays, mover
//! animation) runs as scheduler tasks resumed by [`Engine::step`].
//!
//! # Step pipeline
//!
//! Each `step()` runs:
//! 1. **Tasks** -- resume every task due at the current tick, in
//!    `(due, scheduling order)` order. Each task performs one atomic step and
//!    may schedule follow-ups for later ticks only, so a payload's step always
//!    finishes before any task it triggers begins.
//! 2. **Bookkeeping** -- advance the tick counter and recompute the state hash.

use slotmap::SlotMap;

use crate::catalog::{Catalog, Descriptor, Item};
use crate::config::EngineConfig;
use crate::event::{Event, EventBus, EventKind, PassiveListener};
use crate::fixed::{Fixed64, Ticks, WorldPos};
use crate::grid::{
    Direction, Footprint, FootprintPreview, Grid, GridError, GridPosition, PlacementError,
    RemovalError, Tile,
};
use crate::id::{DescriptorId, OccupancyGroupId, PayloadId, StructureId};
use crate::mover::{MoverError, MoverKind, MoverState};
use crate::payload::{Payload, PayloadError};
use crate::scheduler::{Scheduler, Task};
use crate::sim::{AdvanceResult, SimState, SimulationStrategy, StateHash};
use crate::structure::{Structure, StructureError};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Engine {
    pub(crate) grid: Grid,
    pub(crate) catalog: Catalog,
    pub(crate) config: EngineConfig,

    pub(crate) structures: SlotMap<StructureId, Structure>,
    pub(crate) payloads: SlotMap<PayloadId, Payload>,
    pub(crate) scheduler: Scheduler,

    /// Simulation state (tick counter, accumulator).
    pub sim_state: SimState,
    pub(crate) paused: bool,
    pub(crate) last_state_hash: u64,

    /// Synchronous event delivery to renderers and controllers.
    pub event_bus: EventBus,
}

impl Engine {
    pub fn new(grid: Grid, catalog: Catalog, config: EngineConfig) -> Self {
        Self {
            grid,
            catalog,
            config,
            structures: SlotMap::with_key(),
            payloads: SlotMap::with_key(),
            scheduler: Scheduler::new(),
            sim_state: SimState::new(),
            paused: false,
            last_state_hash: 0,
            event_bus: EventBus::new(),
        }
    }

    /// Build the grid from dimensions, seeding group ids from the config.
    pub fn with_grid(
        width: i32,
        height: i32,
        cell_size: Fixed64,
        catalog: Catalog,
        config: EngineConfig,
    ) -> Result<Self, GridError> {
        let grid = Grid::with_seed(width, height, cell_size, config.group_seed)?;
        Ok(Self::new(grid, catalog, config))
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tick(&self) -> Ticks {
        self.sim_state.tick
    }

    pub fn strategy(&self) -> &SimulationStrategy {
        &self.config.strategy
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// O(1) tile lookup; `None` outside the grid.
    pub fn tile_at(&self, x: i32, y: i32) -> Option<&Tile> {
        self.grid.tile_at(x, y)
    }

    /// Occupant of the tile at `(x, y)`.
    pub fn structure_at(&self, x: i32, y: i32) -> Option<StructureId> {
        self.grid.tile_at(x, y).and_then(Tile::occupant)
    }

    pub fn structure(&self, id: StructureId) -> Option<&Structure> {
        self.structures.get(id)
    }

    pub fn is_alive(&self, id: StructureId) -> bool {
        self.structures.contains_key(id)
    }

    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    pub fn structure_ids(&self) -> impl Iterator<Item = StructureId> + '_ {
        self.structures.keys()
    }

    /// Descriptor that spawned a structure.
    pub fn descriptor_of(&self, id: StructureId) -> Option<&Descriptor> {
        self.structures
            .get(id)
            .and_then(|s| self.catalog.get(s.descriptor))
    }

    pub fn payload(&self, id: PayloadId) -> Option<&Payload> {
        self.payloads.get(id)
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.len()
    }

    pub fn payload_ids(&self) -> impl Iterator<Item = PayloadId> + '_ {
        self.payloads.keys()
    }

    /// Positions covered by a structure.
    pub fn occupying_positions(&self, id: StructureId) -> Vec<GridPosition> {
        self.tile_positions(self.structures.get(id).map_or(&[][..], |s| &s.occupying))
    }

    /// Positions of a structure's cached surrounding set.
    pub fn surrounding_positions(&self, id: StructureId) -> Vec<GridPosition> {
        self.tile_positions(self.structures.get(id).map_or(&[][..], |s| &s.surrounding))
    }

    fn tile_positions(&self, indices: &[usize]) -> Vec<GridPosition> {
        indices
            .iter()
            .filter_map(|&i| self.grid.tile(i).map(Tile::position))
            .collect()
    }

    /// World-space centre of a structure.
    pub fn structure_center(&self, id: StructureId) -> Option<WorldPos> {
        self.structures
            .get(id)
            .map(|s| self.grid.footprint_center(s.anchor, s.footprint))
    }

    /// Whether a live structure is a power source.
    pub fn is_power_source(&self, id: StructureId) -> bool {
        self.descriptor_of(id).is_some_and(Descriptor::is_power_source)
    }

    /// Whether `to` occupies a tile within `range` 4-neighbour steps of
    /// `from`'s footprint.
    pub fn within_reach(&self, from: StructureId, to: StructureId, range: u32) -> bool {
        let Some(s) = self.structures.get(from) else {
            return false;
        };
        if !self.structures.contains_key(to) {
            return false;
        }
        self.grid
            .surrounding(&s.occupying, s.group, range)
            .into_iter()
            .any(|i| self.grid.tile(i).and_then(Tile::occupant) == Some(to))
    }

    /// Distinct structures occupying a structure's surrounding tiles, in
    /// tile order.
    pub fn neighbor_structures(&self, id: StructureId) -> Vec<StructureId> {
        let Some(s) = self.structures.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<StructureId> = Vec::new();
        for &i in &s.surrounding {
            if let Some(occ) = self.grid.tile(i).and_then(Tile::occupant) {
                if occ != id && !out.contains(&occ) {
                    out.push(occ);
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Read-only availability of every tile a placement would cover.
    pub fn highlight_footprint(
        &self,
        descriptor: DescriptorId,
        x: i32,
        y: i32,
    ) -> Result<FootprintPreview, PlacementError> {
        let desc = self
            .catalog
            .get(descriptor)
            .ok_or(PlacementError::UnknownDescriptor(descriptor))?;
        Ok(self
            .grid
            .highlight_footprint(GridPosition::new(x, y), desc.footprint))
    }

    /// Place a structure anchored at `(x, y)` using the descriptor's
    /// default facing. All-or-nothing: on error no tile changes.
    pub fn place(
        &mut self,
        descriptor: DescriptorId,
        x: i32,
        y: i32,
    ) -> Result<StructureId, PlacementError> {
        self.place_at(descriptor, GridPosition::new(x, y), None)
    }

    /// Like [`Engine::place`] with an explicit conveyor facing.
    pub fn place_facing(
        &mut self,
        descriptor: DescriptorId,
        x: i32,
        y: i32,
        facing: Direction,
    ) -> Result<StructureId, PlacementError> {
        self.place_at(descriptor, GridPosition::new(x, y), Some(facing))
    }

    fn place_at(
        &mut self,
        descriptor: DescriptorId,
        anchor: GridPosition,
        facing: Option<Direction>,
    ) -> Result<StructureId, PlacementError> {
        let desc = self
            .catalog
            .get(descriptor)
            .ok_or(PlacementError::UnknownDescriptor(descriptor))?;
        let footprint = desc.footprint;
        let mover = MoverState::from_role(&desc.role, desc.animation_frames);

        let indices = self.grid.footprint_indices(anchor, footprint)?;
        self.grid.check_free(&indices)?;

        // Validated; from here on nothing fails.
        let group = self.grid.allocate_group();
        let id = self.insert_structure(descriptor, anchor, footprint, group, indices, mover, facing);
        log::debug!(
            "placed {:?} '{}' at ({}, {}) group {:#x}",
            id,
            self.catalog.get(descriptor).map_or("", |d| d.name.as_str()),
            anchor.x,
            anchor.y,
            group.0
        );
        self.event_bus.emit(Event::StructurePlaced {
            structure: id,
            descriptor,
            anchor,
            tick: self.sim_state.tick,
        });
        self.on_place(id);
        Ok(id)
    }

    /// Claim tiles and build the structure record. Callers have validated
    /// the footprint.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_structure(
        &mut self,
        descriptor: DescriptorId,
        anchor: GridPosition,
        footprint: Footprint,
        group: OccupancyGroupId,
        indices: Vec<usize>,
        mut mover: Option<MoverState>,
        facing: Option<Direction>,
    ) -> StructureId {
        if let (Some(m), Some(dir)) = (mover.as_mut(), facing) {
            if let MoverKind::Conveyor { facing } = &mut m.kind {
                *facing = dir;
            }
        }
        let mut occupying = indices;
        occupying.sort_unstable();
        let surrounding = self.grid.surrounding(&occupying, group, 1);
        let id = self.structures.insert_with_key(|id| Structure {
            id,
            descriptor,
            anchor,
            footprint,
            group,
            occupying: Vec::new(),
            surrounding,
            powered: false,
            mover,
        });
        self.grid.claim(&occupying, id, group);
        if let Some(s) = self.structures.get_mut(id) {
            s.occupying = occupying;
        }
        id
    }

    /// Recompute a structure's cached surrounding set.
    pub fn refresh_surrounding(&mut self, id: StructureId) {
        let Some(s) = self.structures.get(id) else {
            return;
        };
        let surrounding = self.grid.surrounding(&s.occupying, s.group, 1);
        if let Some(s) = self.structures.get_mut(id) {
            s.surrounding = surrounding;
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove the structure occupying `(x, y)`, clearing every tile of its
    /// occupancy group. Payloads it owns are destroyed and the teardown
    /// event fires once.
    pub fn remove(&mut self, x: i32, y: i32) -> Result<StructureId, RemovalError> {
        let pos = GridPosition::new(x, y);
        let index = self
            .grid
            .index_of(pos)
            .ok_or(RemovalError::NotOccupied { x, y })?;
        let id = self
            .grid
            .tile(index)
            .and_then(Tile::occupant)
            .ok_or(RemovalError::NotOccupied { x, y })?;
        let neighbors = self.neighbor_structures(id);

        let cleared = self.grid.clear_group(index);
        let Some(structure) = self.structures.remove(id) else {
            return Err(RemovalError::NotOccupied { x, y });
        };
        if cleared.len() != structure.occupying.len() {
            log::warn!(
                "removal of {:?} cleared {} tiles, expected {}",
                id,
                cleared.len(),
                structure.occupying.len()
            );
        }

        if let Some(mover) = &structure.mover {
            if let Some(task) = mover.animation {
                if self.scheduler.cancel(task).is_err() {
                    log::warn!("animation task of {:?} was not live", id);
                }
            }
            for payload in mover.all_payloads() {
                self.discard_payload(payload);
            }
        }

        log::debug!("removed {:?} group {:#x}", id, structure.group.0);
        self.event_bus.emit(Event::StructureRemoved {
            structure: id,
            descriptor: structure.descriptor,
            group: structure.group,
            tick: self.sim_state.tick,
        });

        let linked: Vec<StructureId> = self
            .structures
            .iter()
            .filter(|(_, s)| s.mover.as_ref().is_some_and(|m| m.link == Some(id)))
            .map(|(k, _)| k)
            .collect();
        for n in neighbors.into_iter().chain(linked) {
            if self.is_mover(n) {
                self.refresh_chain(n);
            }
        }
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Power
    // -----------------------------------------------------------------------

    /// Set a structure's power flag. Returns whether anything changed;
    /// setting the current value again is a no-op. Movers that need power
    /// start animating and flush their queue on power-on, and stop
    /// animating on power-off.
    pub fn set_powered(&mut self, id: StructureId, powered: bool) -> Result<bool, StructureError> {
        let s = self
            .structures
            .get_mut(id)
            .ok_or(StructureError::Unknown(id))?;
        if s.powered == powered {
            return Ok(false);
        }
        s.powered = powered;
        let gated = s.mover.as_ref().is_some_and(|m| m.needs_power);
        let animating = s.mover.as_ref().is_some_and(MoverState::is_animating);

        log::debug!("{:?} powered = {}", id, powered);
        self.event_bus.emit(Event::PowerChanged {
            structure: id,
            powered,
            tick: self.sim_state.tick,
        });

        if gated {
            if powered {
                if !animating {
                    self.begin_animation(id);
                }
                self.release_queue(id);
                self.release_held(id);
            } else if animating {
                self.end_animation(id);
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Payload lifecycle
    // -----------------------------------------------------------------------

    /// Create a payload holding `item` at a mover's position and hand it
    /// to the mover.
    pub fn spawn_payload(&mut self, mover: StructureId, item: Item) -> Result<PayloadId, MoverError> {
        if !self.structures.contains_key(mover) {
            return Err(MoverError::Unknown(mover));
        }
        if !self.is_mover(mover) {
            return Err(MoverError::NotAMover(mover));
        }
        let position = self.structure_center(mover).unwrap_or(WorldPos::ORIGIN);
        let id = self
            .payloads
            .insert_with_key(|id| Payload::new(id, item, mover, position));
        self.event_bus.emit(Event::PayloadSpawned {
            payload: id,
            mover,
            item,
            tick: self.sim_state.tick,
        });
        self.take_item(mover, id)?;
        Ok(id)
    }

    /// Detach a payload from its owner, cancel its pending work and drop it.
    pub fn destroy_payload(&mut self, id: PayloadId) -> Result<(), PayloadError> {
        let owner = self
            .payloads
            .get(id)
            .map(Payload::owner)
            .ok_or(PayloadError::Unknown(id))?;
        if let Some(m) = self.structures.get_mut(owner).and_then(|s| s.mover.as_mut()) {
            m.detach(id);
        }
        self.discard_payload(id);
        Ok(())
    }

    /// Drop a payload whose owner no longer tracks it.
    pub(crate) fn discard_payload(&mut self, id: PayloadId) {
        let Some(payload) = self.payloads.remove(id) else {
            return;
        };
        for task in payload.pending_tasks() {
            if self.scheduler.is_live(task) {
                let _ = self.scheduler.cancel(task);
            }
        }
        log::debug!("destroyed payload {:?}", id);
        self.event_bus.emit(Event::PayloadDestroyed {
            payload: id,
            tick: self.sim_state.tick,
        });
    }

    // -----------------------------------------------------------------------
    // Event system
    // -----------------------------------------------------------------------

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    pub fn on_passive(&mut self, listener: PassiveListener) {
        self.event_bus.on_passive(listener);
    }

    /// Emit an event stamped with the current tick.
    pub(crate) fn emit_now(&mut self, make: impl FnOnce(Ticks) -> Event) {
        let tick = self.sim_state.tick;
        self.event_bus.emit(make(tick));
    }

    // -----------------------------------------------------------------------
    // State hash
    // -----------------------------------------------------------------------

    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    fn compute_state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.sim_state.tick);
        h.write_u64(self.structures.len() as u64);
        for s in self.structures.values() {
            h.write_u64(s.group.0);
            h.write_u32(u32::from(s.powered));
            if let Some(m) = &s.mover {
                h.write_u32(m.payload_count() as u32);
                h.write_u32(m.frame);
            }
        }
        for p in self.payloads.values() {
            h.write_u32(p.state as u32);
            h.write_fixed64(p.position.x);
            h.write_fixed64(p.position.y);
            h.write_fixed64(p.scale);
        }
        h.finish()
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// While paused, `advance()` and `step()` are no-ops. Placement and
    /// power changes still apply immediately.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // -----------------------------------------------------------------------
    // Advance
    // -----------------------------------------------------------------------

    /// Advance according to the configured strategy.
    ///
    /// - **Tick mode**: `dt` is ignored; exactly one step runs.
    /// - **Delta mode**: `dt` is accumulated; as many fixed steps run as fit.
    pub fn advance(&mut self, dt: Ticks) -> AdvanceResult {
        if self.paused {
            return AdvanceResult::default();
        }
        let mut result = AdvanceResult::default();
        match self.config.strategy {
            SimulationStrategy::Tick => self.step_internal(&mut result),
            SimulationStrategy::Delta { fixed_timestep } => {
                self.sim_state.accumulator += dt;
                let step_size = fixed_timestep.max(1);
                while self.sim_state.accumulator >= step_size {
                    self.sim_state.accumulator -= step_size;
                    self.step_internal(&mut result);
                }
            }
        }
        result
    }

    /// Run a single simulation step.
    pub fn step(&mut self) -> AdvanceResult {
        if self.paused {
            return AdvanceResult::default();
        }
        let mut result = AdvanceResult::default();
        self.step_internal(&mut result);
        result
    }

    /// Run `n` steps.
    pub fn run(&mut self, n: u64) -> AdvanceResult {
        let mut total = AdvanceResult::default();
        for _ in 0..n {
            let r = self.step();
            total.steps_run += r.steps_run;
            total.tasks_run += r.tasks_run;
        }
        total
    }

    fn step_internal(&mut self, result: &mut AdvanceResult) {
        let now = self.sim_state.tick;
        while let Some((_, task)) = self.scheduler.pop_due(now) {
            result.tasks_run += 1;
            self.run_task(task);
        }
        self.sim_state.tick += 1;
        self.last_state_hash = self.compute_state_hash();
        result.steps_run += 1;
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Advance { payload } => self.advance_payload(payload),
            Task::BreakStep { payload } => self.break_step(payload),
            Task::Settle { payload } => {
                if let Err(e) = self.destroy_payload(payload) {
                    log::warn!("settle dropped: {e}");
                }
            }
            Task::AnimationFrame { mover } => self.animation_frame(mover),
        }
    }

    /// Schedule `task` `delay` ticks from now (at least one).
    pub(crate) fn schedule_in(&mut self, delay: Ticks, task: Task) -> crate::id::TaskId {
        self.scheduler
            .schedule(self.sim_state.tick + delay.max(1), task)
    }

    /// Number of pending scheduler tasks.
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }
}

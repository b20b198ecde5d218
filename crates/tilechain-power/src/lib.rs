//! Connector line network for the tilechain engine.
//!
//! Structures with a connector own numbered lines that the player drags onto
//! other structures. A structure is powered iff at least one line attached
//! to it comes from a power source. Power changes are pushed into the core
//! through [`Engine::set_powered`], which starts or stops movers and flushes
//! their queues.
//!
//! # Design
//!
//! - Connector state lives here, keyed by [`StructureId`]; the core knows
//!   nothing about lines.
//! - Each line is a [`LineSlot`]: a pair of adjacent endpoint numbers
//!   `(2i, 2i + 1)`, so line `i` always occupies the same pair.
//! - A line not attached to anything is "at home": it maps to its owner.
//! - At most one line is being dragged across the whole network, held in
//!   [`ConnectorNetwork::dragging`].
//! - A line from a mover's connector to another mover pins the owner's next
//!   hop to that mover ([`Engine::link_mover`]); picking the line up
//!   releases the pin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use tilechain_core::catalog::Connectable;
use tilechain_core::engine::Engine;
use tilechain_core::grid::{Direction, PlacementError, RemovalError};
use tilechain_core::id::{DescriptorId, StructureId};
use tilechain_core::mover::MoverError;
use tilechain_core::structure::StructureError;

// ---------------------------------------------------------------------------
// Line slots
// ---------------------------------------------------------------------------

/// Endpoint pair reserved by one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineSlot {
    pub start: u32,
    pub end: u32,
}

impl LineSlot {
    /// Slot of the `index`-th line.
    pub fn from_index(index: u32) -> Self {
        Self {
            start: index * 2,
            end: index * 2 + 1,
        }
    }

    pub fn new(start: u32, end: u32) -> Result<Self, ConnectorError> {
        let slot = Self { start, end };
        if !slot.is_valid() {
            return Err(ConnectorError::InvalidSlot { start, end });
        }
        Ok(slot)
    }

    pub fn is_valid(&self) -> bool {
        self.end == self.start + 1
    }

    pub fn index(&self) -> u32 {
        self.start / 2
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("structure {0:?} is not part of the connector network")]
    NotRegistered(StructureId),
    #[error("structure {0:?} has no connector")]
    NoConnector(StructureId),
    #[error("no line is being dragged")]
    NotDragging,
    #[error("a line from {0:?} is already being dragged")]
    AlreadyDragging(StructureId),
    #[error("structure {0:?} does not accept lines")]
    NotConnectable(StructureId),
    #[error("{target:?} is out of range of connector {connector:?}")]
    OutOfRange {
        connector: StructureId,
        target: StructureId,
    },
    #[error("connector {connector:?} already has a line on {target:?}")]
    AlreadyAttached {
        connector: StructureId,
        target: StructureId,
    },
    #[error("connector {0:?} has no free lines")]
    LineLimitReached(StructureId),
    #[error("no line is attached to {0:?}")]
    NoLine(StructureId),
    #[error("invalid line slot ({start}, {end})")]
    InvalidSlot { start: u32, end: u32 },
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Removal(#[from] RemovalError),
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error(transparent)]
    Mover(#[from] MoverError),
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Lines owned by one structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub owner: StructureId,
    pub max_lines: u32,
    pub range: u32,
    connections: BTreeMap<LineSlot, StructureId>,
}

impl Connector {
    fn new(owner: StructureId, max_lines: u32, range: u32) -> Self {
        Self {
            owner,
            max_lines,
            range,
            connections: BTreeMap::new(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.connections.len()
    }

    /// Every line and the structure it currently ends on.
    pub fn lines(&self) -> impl Iterator<Item = (LineSlot, StructureId)> + '_ {
        self.connections.iter().map(|(&s, &t)| (s, t))
    }

    pub fn target(&self, slot: LineSlot) -> Option<StructureId> {
        self.connections.get(&slot).copied()
    }

    /// Lines attached to another structure.
    pub fn attached(&self) -> impl Iterator<Item = (LineSlot, StructureId)> + '_ {
        self.lines().filter(move |&(_, t)| t != self.owner)
    }

    fn home_line(&self) -> Option<LineSlot> {
        self.lines().find(|&(_, t)| t == self.owner).map(|(s, _)| s)
    }

    fn line_to(&self, target: StructureId) -> Option<LineSlot> {
        self.lines().find(|&(_, t)| t == target).map(|(s, _)| s)
    }

    fn free_slot(&self) -> Option<LineSlot> {
        (0..self.max_lines)
            .map(LineSlot::from_index)
            .find(|s| !self.connections.contains_key(s))
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The line currently following the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragSession {
    pub connector: StructureId,
    pub slot: LineSlot,
}

/// Result of a click on a structure or tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// A new line was created and is being dragged.
    Created(DragSession),
    /// A home line was lifted and is being dragged.
    Lifted(DragSession),
    /// A line was detached from `from` and is being dragged.
    PickedUp { session: DragSession, from: StructureId },
    /// The dragged line was attached to `target`.
    Attached { session: DragSession, target: StructureId },
    /// The dragged line went back home.
    Dropped(DragSession),
    /// Nothing to do.
    Ignored,
}

#[derive(Debug, Default)]
pub struct ConnectorNetwork {
    connectors: SecondaryMap<StructureId, Connector>,
    /// Lines attached to each registered structure: `(owner, slot)`, oldest
    /// first.
    attached: SecondaryMap<StructureId, Vec<(StructureId, LineSlot)>>,
    accepts: SecondaryMap<StructureId, bool>,
    dragging: Option<DragSession>,
}

impl ConnectorNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dragging(&self) -> Option<DragSession> {
        self.dragging
    }

    pub fn connector(&self, id: StructureId) -> Option<&Connector> {
        self.connectors.get(id)
    }

    /// Lines attached to `id`, as `(owner, slot)`.
    pub fn attached_to(&self, id: StructureId) -> &[(StructureId, LineSlot)] {
        self.attached.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn is_registered(&self, id: StructureId) -> bool {
        self.accepts.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Track a placed structure. Structures whose descriptor neither owns a
    /// connector nor accepts lines are ignored.
    pub fn register(&mut self, engine: &Engine, id: StructureId) -> bool {
        let Some(desc) = engine.descriptor_of(id) else {
            return false;
        };
        let spec = desc.connector();
        let accepts = desc.accepts_lines();
        if spec.is_none() && !accepts {
            return false;
        }
        if let Some(spec) = spec {
            self.connectors
                .insert(id, Connector::new(id, spec.max_lines, spec.range));
        }
        self.accepts.insert(id, accepts);
        self.attached.insert(id, Vec::new());
        true
    }

    /// Forget a structure that is about to be removed. Its own lines are
    /// deleted and its former targets lose that power; lines attached to it
    /// return to their owners.
    pub fn unregister(&mut self, engine: &mut Engine, id: StructureId) -> Result<(), ConnectorError> {
        if self.dragging.is_some_and(|d| d.connector == id) {
            self.dragging = None;
        }
        if let Some(connector) = self.connectors.remove(id) {
            let targets: Vec<(LineSlot, StructureId)> = connector.attached().collect();
            for (slot, target) in targets {
                if let Some(list) = self.attached.get_mut(target) {
                    list.retain(|&(o, s)| !(o == id && s == slot));
                }
                self.update_power(engine, target)?;
            }
        }
        if let Some(list) = self.attached.remove(id) {
            for (owner, slot) in list {
                if let Some(c) = self.connectors.get_mut(owner) {
                    c.connections.insert(slot, owner);
                }
                unlink_from(engine, owner, id)?;
            }
        }
        self.accepts.remove(id);
        Ok(())
    }

    /// Place through the engine and register the new structure.
    pub fn place(
        &mut self,
        engine: &mut Engine,
        descriptor: DescriptorId,
        x: i32,
        y: i32,
    ) -> Result<StructureId, ConnectorError> {
        let id = engine.place(descriptor, x, y)?;
        self.register(engine, id);
        Ok(id)
    }

    pub fn place_facing(
        &mut self,
        engine: &mut Engine,
        descriptor: DescriptorId,
        x: i32,
        y: i32,
        facing: Direction,
    ) -> Result<StructureId, ConnectorError> {
        let id = engine.place_facing(descriptor, x, y, facing)?;
        self.register(engine, id);
        Ok(id)
    }

    /// Unregister and remove the structure occupying `(x, y)`.
    pub fn remove(&mut self, engine: &mut Engine, x: i32, y: i32) -> Result<StructureId, ConnectorError> {
        let id = engine
            .structure_at(x, y)
            .ok_or(RemovalError::NotOccupied { x, y })?;
        self.unregister(engine, id)?;
        Ok(engine.remove(x, y)?)
    }

    // -----------------------------------------------------------------------
    // Click protocol
    // -----------------------------------------------------------------------

    /// Single entry point for a click on a structure.
    ///
    /// While dragging: clicking the dragging connector drops the line,
    /// clicking a structure that accepts lines attaches it. Otherwise: a
    /// structure with lines attached gives up its oldest one, and a
    /// structure with a connector creates or lifts one of its own.
    pub fn on_click(&mut self, engine: &mut Engine, id: StructureId) -> Result<ClickOutcome, ConnectorError> {
        if let Some(session) = self.dragging {
            if session.connector == id {
                return self.drop_line().map(ClickOutcome::Dropped);
            }
            self.attach_line(engine, id)?;
            return Ok(ClickOutcome::Attached {
                session,
                target: id,
            });
        }
        if !self.attached_to(id).is_empty() {
            let session = self.pickup_line(engine, id)?;
            return Ok(ClickOutcome::PickedUp { session, from: id });
        }
        let Some(connector) = self.connectors.get(id) else {
            return Ok(ClickOutcome::Ignored);
        };
        if (connector.line_count() as u32) < connector.max_lines {
            return self.create_line(id).map(ClickOutcome::Created);
        }
        match connector.home_line() {
            Some(slot) => {
                let session = DragSession {
                    connector: id,
                    slot,
                };
                self.dragging = Some(session);
                Ok(ClickOutcome::Lifted(session))
            }
            None => Err(ConnectorError::LineLimitReached(id)),
        }
    }

    /// Click on a tile: forwards to its occupant, or drops the dragged line
    /// on empty ground.
    pub fn click_tile(&mut self, engine: &mut Engine, x: i32, y: i32) -> Result<ClickOutcome, ConnectorError> {
        match engine.structure_at(x, y) {
            Some(id) => self.on_click(engine, id),
            None if self.dragging.is_some() => self.drop_line().map(ClickOutcome::Dropped),
            None => Ok(ClickOutcome::Ignored),
        }
    }

    /// Reserve the lowest free slot on `id`'s connector and start dragging it.
    pub fn create_line(&mut self, id: StructureId) -> Result<DragSession, ConnectorError> {
        if let Some(d) = self.dragging {
            return Err(ConnectorError::AlreadyDragging(d.connector));
        }
        let connector = self
            .connectors
            .get_mut(id)
            .ok_or(ConnectorError::NoConnector(id))?;
        let slot = connector
            .free_slot()
            .ok_or(ConnectorError::LineLimitReached(id))?;
        connector.connections.insert(slot, id);
        let session = DragSession {
            connector: id,
            slot,
        };
        self.dragging = Some(session);
        log::debug!("{:?} created line {}", id, slot.index());
        Ok(session)
    }

    /// Let go of the dragged line; it stays at home on its connector.
    pub fn drop_line(&mut self) -> Result<DragSession, ConnectorError> {
        self.dragging.take().ok_or(ConnectorError::NotDragging)
    }

    /// Attach the dragged line to `target` and recompute its power.
    pub fn attach_line(&mut self, engine: &mut Engine, target: StructureId) -> Result<LineSlot, ConnectorError> {
        let session = self.dragging.ok_or(ConnectorError::NotDragging)?;
        if !self.accepts.get(target).copied().unwrap_or(false) {
            return Err(ConnectorError::NotConnectable(target));
        }
        let connector = self
            .connectors
            .get(session.connector)
            .ok_or(ConnectorError::NoConnector(session.connector))?;
        if connector.line_to(target).is_some() {
            return Err(ConnectorError::AlreadyAttached {
                connector: session.connector,
                target,
            });
        }
        if !engine.within_reach(session.connector, target, connector.range) {
            return Err(ConnectorError::OutOfRange {
                connector: session.connector,
                target,
            });
        }
        if let Some(c) = self.connectors.get_mut(session.connector) {
            c.connections.insert(session.slot, target);
        }
        if let Some(list) = self.attached.get_mut(target) {
            list.push((session.connector, session.slot));
        }
        self.dragging = None;
        log::debug!(
            "line {} of {:?} attached to {:?}",
            session.slot.index(),
            session.connector,
            target
        );
        if engine.is_mover(session.connector) && engine.is_mover(target) {
            engine.link_mover(session.connector, target)?;
        }
        self.update_power(engine, target)?;
        Ok(session.slot)
    }

    /// Detach the oldest line on `target`, return it home and drag it.
    pub fn pickup_line(&mut self, engine: &mut Engine, target: StructureId) -> Result<DragSession, ConnectorError> {
        if let Some(d) = self.dragging {
            return Err(ConnectorError::AlreadyDragging(d.connector));
        }
        let list = self
            .attached
            .get_mut(target)
            .ok_or(ConnectorError::NotRegistered(target))?;
        if list.is_empty() {
            return Err(ConnectorError::NoLine(target));
        }
        let (owner, slot) = list.remove(0);
        if let Some(c) = self.connectors.get_mut(owner) {
            c.connections.insert(slot, owner);
        }
        let session = DragSession {
            connector: owner,
            slot,
        };
        self.dragging = Some(session);
        log::debug!("line {} of {:?} picked up from {:?}", slot.index(), owner, target);
        unlink_from(engine, owner, target)?;
        self.update_power(engine, target)?;
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Power
    // -----------------------------------------------------------------------

    /// Whether any line attached to `id` comes from a power source.
    pub fn has_power_source(&self, engine: &Engine, id: StructureId) -> bool {
        self.attached_to(id)
            .iter()
            .any(|&(owner, _)| engine.is_power_source(owner))
    }

    /// Recompute and apply `id`'s power flag. Returns whether it changed.
    pub fn update_power(&self, engine: &mut Engine, id: StructureId) -> Result<bool, ConnectorError> {
        if !self.is_registered(id) {
            return Err(ConnectorError::NotRegistered(id));
        }
        let powered = self.has_power_source(engine, id);
        Ok(engine.set_powered(id, powered)?)
    }
}

/// Release `owner`'s pinned hop if its line to `target` was what set it.
fn unlink_from(engine: &mut Engine, owner: StructureId, target: StructureId) -> Result<(), ConnectorError> {
    if engine.mover(owner).is_some_and(|m| m.link() == Some(target)) {
        engine.unlink_mover(owner)?;
    }
    Ok(())
}

//! Binary snapshots of a running scene.
//!
//! Encoded with `bitcode` behind a versioned header. Structures are recorded
//! by descriptor name so a snapshot can be restored against a freshly loaded
//! catalog; chains and surrounding sets are re-derived on restore. Pending
//! tasks are stored as ticks-until-due and rescheduled relative to the
//! restored tick. The event bus is not part of a snapshot.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Item};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::fixed::{Fixed64, Ticks, WorldPos};
use crate::grid::{Direction, Grid, GridError, GridPosition};
use crate::id::{OccupancyGroupId, PayloadId, StructureId, TaskId};
use crate::mover::MoverState;
use crate::payload::{BreakCountdown, Motion, Payload, PayloadState};
use crate::scheduler::Task;
use crate::sim::SimState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a scene snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x711E_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("snapshot names unknown descriptor '{0}'")]
    UnknownDescriptor(String),
    #[error("inconsistent snapshot: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Grid(#[from] GridError),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Tick at which the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Decode a snapshot and return only its header.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    decode(data).map(|s| s.header)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StructureRecord {
    descriptor: String,
    anchor: GridPosition,
    group: u64,
    facing: Option<Direction>,
    powered: bool,
    /// Index of the cached next hop in the structure list.
    next: Option<u32>,
    /// Index of the pinned hop, if a connector line set one.
    link: Option<u32>,
    animation_due_in: Option<Ticks>,
    frame: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Slot {
    Queued,
    Moving,
    Held,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MotionRecord {
    target: WorldPos,
    delta: WorldPos,
    steps_left: u32,
    interval: Ticks,
    due_in: Ticks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PayloadRecord {
    owner: u32,
    slot: Slot,
    item: Item,
    state: PayloadState,
    position: WorldPos,
    scale: Fixed64,
    redirectable: bool,
    motion: Option<MotionRecord>,
    /// Remaining grace steps and ticks until the next re-poll.
    countdown: Option<(u32, Ticks)>,
    settle_due_in: Option<Ticks>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneSnapshot {
    header: SnapshotHeader,
    width: u32,
    height: u32,
    cell_size: Fixed64,
    issued_groups: Vec<u64>,
    group_rng: u64,
    sim_state: SimState,
    paused: bool,
    last_state_hash: u64,
    structures: Vec<StructureRecord>,
    payloads: Vec<PayloadRecord>,
}

fn decode(data: &[u8]) -> Result<SceneSnapshot, DeserializeError> {
    bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Engine snapshot methods
// ---------------------------------------------------------------------------

impl Engine {
    fn due_in(&self, task: TaskId) -> Ticks {
        self.scheduler
            .due(task)
            .map_or(1, |due| due.saturating_sub(self.sim_state.tick))
    }

    /// Encode the scene. Listeners are not included.
    pub fn snapshot(&self) -> Result<Vec<u8>, SerializeError> {
        let ids: Vec<StructureId> = self.structures.keys().collect();
        let index_of = |id: StructureId| ids.iter().position(|&s| s == id).map(|i| i as u32);

        let mut structures = Vec::with_capacity(ids.len());
        let mut payloads = Vec::new();
        for (i, s) in self.structures.values().enumerate() {
            let name = self
                .catalog
                .get(s.descriptor)
                .map(|d| d.name.clone())
                .unwrap_or_default();
            structures.push(StructureRecord {
                descriptor: name,
                anchor: s.anchor,
                group: s.group.0,
                facing: s.mover.as_ref().and_then(MoverState::facing),
                powered: s.powered,
                next: s.mover.as_ref().and_then(|m| m.next).and_then(index_of),
                link: s.mover.as_ref().and_then(|m| m.link).and_then(index_of),
                animation_due_in: s.mover.as_ref().and_then(|m| m.animation).map(|t| self.due_in(t)),
                frame: s.mover.as_ref().map_or(0, MoverState::frame),
            });
            let Some(m) = &s.mover else {
                continue;
            };
            let slots = m
                .queued()
                .map(|p| (p, Slot::Queued))
                .chain(m.moving().iter().map(|&p| (p, Slot::Moving)))
                .chain(m.held().iter().map(|&p| (p, Slot::Held)));
            for (pid, slot) in slots {
                let Some(p) = self.payloads.get(pid) else {
                    continue;
                };
                payloads.push(PayloadRecord {
                    owner: i as u32,
                    slot,
                    item: p.item,
                    state: p.state,
                    position: p.position,
                    scale: p.scale,
                    redirectable: p.redirectable,
                    motion: p.motion.map(|mo| MotionRecord {
                        target: mo.target,
                        delta: mo.delta,
                        steps_left: mo.steps_left,
                        interval: mo.interval,
                        due_in: self.due_in(mo.task),
                    }),
                    countdown: p.countdown.map(|c| (c.remaining, self.due_in(c.task))),
                    settle_due_in: p.settle.map(|t| self.due_in(t)),
                });
            }
        }

        let snapshot = SceneSnapshot {
            header: SnapshotHeader::new(self.sim_state.tick),
            width: self.grid.width(),
            height: self.grid.height(),
            cell_size: self.grid.cell_size(),
            issued_groups: self.grid.issued_groups().map(|g| g.0).collect(),
            group_rng: self.grid.group_rng_state(),
            sim_state: self.sim_state.clone(),
            paused: self.paused,
            last_state_hash: self.last_state_hash,
            structures,
            payloads,
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Rebuild an engine from a snapshot against `catalog`.
    pub fn restore(
        catalog: Catalog,
        config: EngineConfig,
        data: &[u8],
    ) -> Result<Engine, DeserializeError> {
        let snapshot = decode(data)?;
        snapshot.header.validate()?;

        let mut grid = Grid::with_seed(
            snapshot.width as i32,
            snapshot.height as i32,
            snapshot.cell_size,
            config.group_seed,
        )?;
        grid.set_group_rng_state(snapshot.group_rng);
        for &g in &snapshot.issued_groups {
            grid.reserve_group(OccupancyGroupId(g));
        }

        let mut engine = Engine::new(grid, catalog, config);
        engine.sim_state = snapshot.sim_state;
        engine.paused = snapshot.paused;
        engine.last_state_hash = snapshot.last_state_hash;
        let now = engine.sim_state.tick;

        let mut ids = Vec::with_capacity(snapshot.structures.len());
        for rec in &snapshot.structures {
            let descriptor = engine
                .catalog
                .id(&rec.descriptor)
                .ok_or_else(|| DeserializeError::UnknownDescriptor(rec.descriptor.clone()))?;
            let (footprint, mover) = match engine.catalog.get(descriptor) {
                Some(d) => (d.footprint, MoverState::from_role(&d.role, d.animation_frames)),
                None => return Err(DeserializeError::UnknownDescriptor(rec.descriptor.clone())),
            };
            let group = OccupancyGroupId(rec.group);
            if group.is_none() {
                return Err(DeserializeError::Corrupt(format!(
                    "structure '{}' has no group",
                    rec.descriptor
                )));
            }
            let indices = engine
                .grid
                .footprint_indices(rec.anchor, footprint)
                .and_then(|idx| engine.grid.check_free(&idx).map(|()| idx))
                .map_err(|e| DeserializeError::Corrupt(e.to_string()))?;
            engine.grid.reserve_group(group);
            let id = engine.insert_structure(
                descriptor,
                rec.anchor,
                footprint,
                group,
                indices,
                mover,
                rec.facing,
            );
            if let Some(s) = engine.structures.get_mut(id) {
                s.powered = rec.powered;
                if let Some(m) = s.mover.as_mut() {
                    m.frame = rec.frame % m.frame_count;
                }
            }
            ids.push(id);
        }

        for (rec, &id) in snapshot.structures.iter().zip(&ids) {
            let next = rec.next.and_then(|n| ids.get(n as usize).copied());
            let link = rec.link.and_then(|n| ids.get(n as usize).copied());
            if let Some(m) = engine.mover_mut(id) {
                m.next = next;
                m.link = link;
            }
        }
        for (rec, &id) in snapshot.structures.iter().zip(&ids) {
            engine.find_next_mover(id);
            if let Some(due_in) = rec.animation_due_in {
                let task = engine
                    .scheduler
                    .schedule(now + due_in, Task::AnimationFrame { mover: id });
                if let Some(m) = engine.mover_mut(id) {
                    m.animation = Some(task);
                }
            }
        }

        for rec in &snapshot.payloads {
            let owner = ids
                .get(rec.owner as usize)
                .copied()
                .filter(|&o| engine.is_mover(o))
                .ok_or_else(|| {
                    DeserializeError::Corrupt(format!("payload owner {} is not a mover", rec.owner))
                })?;
            let pid = engine
                .payloads
                .insert_with_key(|id| Payload::new(id, rec.item, owner, rec.position));
            engine.restore_payload(pid, rec, now);
            if let Some(m) = engine.mover_mut(owner) {
                match rec.slot {
                    Slot::Queued => m.queued.push_back(pid),
                    Slot::Moving => m.moving.push(pid),
                    Slot::Held => m.held.push(pid),
                }
            }
        }

        log::debug!(
            "restored {} structures and {} payloads at tick {}",
            engine.structures.len(),
            engine.payloads.len(),
            now
        );
        Ok(engine)
    }

    fn restore_payload(&mut self, payload: PayloadId, rec: &PayloadRecord, now: Ticks) {
        let motion = rec.motion.as_ref().map(|m| Motion {
            target: m.target,
            delta: m.delta,
            steps_left: m.steps_left,
            interval: m.interval,
            task: self
                .scheduler
                .schedule(now + m.due_in, Task::Advance { payload }),
        });
        let countdown = rec.countdown.map(|(remaining, due_in)| BreakCountdown {
            remaining,
            task: self
                .scheduler
                .schedule(now + due_in, Task::BreakStep { payload }),
        });
        let settle = rec.settle_due_in.map(|due_in| {
            self.scheduler
                .schedule(now + due_in, Task::Settle { payload })
        });
        if let Some(p) = self.payloads.get_mut(payload) {
            p.state = rec.state;
            p.scale = rec.scale;
            p.redirectable = rec.redirectable;
            p.motion = motion;
            p.countdown = countdown;
            p.settle = settle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn chain_engine() -> (Engine, PayloadId) {
        let mut engine = make_engine(6, 4);
        let a = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
        place_facing(&mut engine, "conveyor", 1, 0, Direction::East);
        place(&mut engine, "table", 3, 3);
        let p = engine.spawn_payload(a, strawberry()).unwrap();
        run(&mut engine, 10);
        (engine, p)
    }

    #[test]
    fn restored_engine_evolves_identically() {
        let (mut engine, _) = chain_engine();
        let bytes = engine.snapshot().unwrap();
        let mut restored = Engine::restore(test_catalog(), EngineConfig::default(), &bytes).unwrap();

        assert_eq!(restored.tick(), engine.tick());
        assert_eq!(restored.structure_count(), 3);
        assert_eq!(restored.payload_count(), 1);
        assert_eq!(restored.state_hash(), engine.state_hash());

        run(&mut engine, 80);
        run(&mut restored, 80);
        assert_eq!(restored.state_hash(), engine.state_hash());
    }

    #[test]
    fn restore_keeps_group_ids_and_chains() {
        let (engine, _) = chain_engine();
        let bytes = engine.snapshot().unwrap();
        let mut restored = Engine::restore(test_catalog(), EngineConfig::default(), &bytes).unwrap();

        for y in 0..4 {
            for x in 0..6 {
                assert_eq!(
                    engine.tile_at(x, y).unwrap().group(),
                    restored.tile_at(x, y).unwrap().group()
                );
            }
        }
        let a = restored.structure_at(0, 0).unwrap();
        let b = restored.structure_at(1, 0).unwrap();
        assert_eq!(restored.next_mover(a), Some(b));

        let fresh = place(&mut restored, "fence", 5, 0);
        let group = restored.structure(fresh).unwrap().group();
        assert!(engine.grid().issued_groups().all(|g| g != group));
    }

    #[test]
    fn restore_keeps_pinned_hops() {
        let mut engine = make_engine(8, 8);
        let a = place_facing(&mut engine, "conveyor", 0, 0, Direction::East);
        let far = place_facing(&mut engine, "conveyor", 5, 5, Direction::East);
        engine.link_mover(a, far).unwrap();

        let bytes = engine.snapshot().unwrap();
        let mut restored = Engine::restore(test_catalog(), EngineConfig::default(), &bytes).unwrap();
        let a2 = restored.structure_at(0, 0).unwrap();
        let far2 = restored.structure_at(5, 5).unwrap();
        assert_eq!(restored.mover(a2).unwrap().link(), Some(far2));
        assert_eq!(restored.next_mover(a2), Some(far2));

        place_facing(&mut restored, "conveyor", 1, 0, Direction::East);
        assert_eq!(restored.next_mover(a2), Some(far2));
    }

    #[test]
    fn bad_magic_rejected() {
        let (engine, _) = chain_engine();
        let mut snap = decode(&engine.snapshot().unwrap()).unwrap();
        snap.header.magic = 0xDEAD_BEEF;
        let bytes = bitcode::serialize(&snap).unwrap();
        assert!(matches!(
            Engine::restore(test_catalog(), EngineConfig::default(), &bytes),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn future_version_rejected() {
        let (engine, _) = chain_engine();
        let mut snap = decode(&engine.snapshot().unwrap()).unwrap();
        snap.header.version = FORMAT_VERSION + 1;
        let bytes = bitcode::serialize(&snap).unwrap();
        assert!(matches!(
            Engine::restore(test_catalog(), EngineConfig::default(), &bytes),
            Err(DeserializeError::FutureVersion(_))
        ));
    }

    #[test]
    fn unknown_descriptor_reported() {
        let (engine, _) = chain_engine();
        let bytes = engine.snapshot().unwrap();
        let empty = crate::catalog::CatalogBuilder::new().build().unwrap();
        assert!(matches!(
            Engine::restore(empty, EngineConfig::default(), &bytes),
            Err(DeserializeError::UnknownDescriptor(name)) if name == "conveyor"
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            Engine::restore(test_catalog(), EngineConfig::default(), &[1, 2, 3]),
            Err(DeserializeError::Decode(_))
        ));
    }

    #[test]
    fn header_readable() {
        let (engine, _) = chain_engine();
        let header = read_snapshot_header(&engine.snapshot().unwrap()).unwrap();
        assert_eq!(header.tick, 10);
        assert!(header.validate().is_ok());
    }
}

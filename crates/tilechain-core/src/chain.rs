//! Chain resolution and payload flow.
//!
//! Each mover caches the next mover in its chain. The cache is recomputed
//! when the mover or one of its neighbours is placed or rotated, and is
//! validated lazily against the structure table when read, so removing a
//! structure never leaves a live dangling link.
//!
//! Payload flow per mover:
//!
//! ```text
//! take_item -> queued --(powered)--> move_across -> moving
//!     arrival: next mover?      -> hand off (take_item on the receiver)
//!              holds items?     -> held until a receiver appears
//!              otherwise        -> break grace period, re-polling the chain
//! ```

use crate::catalog::Item;
use crate::engine::Engine;
use crate::event::Event;
use crate::fixed::{Fixed64, WorldPos, div_steps};
use crate::grid::Direction;
use crate::id::{PayloadId, StructureId};
use crate::mover::{MoverError, MoverKind, MoverState, leading_edge, makes_progress};
use crate::payload::{Motion, PayloadError, PayloadState};
use crate::scheduler::Task;

impl Engine {
    // -----------------------------------------------------------------------
    // Mover access
    // -----------------------------------------------------------------------

    pub fn is_mover(&self, id: StructureId) -> bool {
        self.mover(id).is_some()
    }

    pub fn mover(&self, id: StructureId) -> Option<&MoverState> {
        self.structures.get(id).and_then(|s| s.mover.as_ref())
    }

    pub(crate) fn mover_mut(&mut self, id: StructureId) -> Option<&mut MoverState> {
        self.structures.get_mut(id).and_then(|s| s.mover.as_mut())
    }

    /// Whether a mover may move payloads right now.
    fn can_run(&self, id: StructureId) -> bool {
        self.structures.get(id).is_some_and(|s| {
            s.mover
                .as_ref()
                .is_some_and(|m| !m.needs_power || s.powered)
        })
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Whether conveyor `id` pushes payloads onto `target`.
    fn feeds_into(&self, id: StructureId, target: StructureId) -> bool {
        let Some(s) = self.structures.get(id) else {
            return false;
        };
        let Some(facing) = s.mover.as_ref().and_then(MoverState::facing) else {
            return false;
        };
        let edge = leading_edge(s.anchor, s.footprint, facing);
        s.surrounding.iter().any(|&i| {
            self.grid.tile(i).is_some_and(|t| {
                t.occupant() == Some(target) && makes_progress(facing, edge, t.position())
            })
        })
    }

    fn resolve_conveyor(&self, id: StructureId, facing: Direction) -> Option<StructureId> {
        let s = self.structures.get(id)?;
        let edge = leading_edge(s.anchor, s.footprint, facing);
        s.surrounding.iter().find_map(|&i| {
            let tile = self.grid.tile(i)?;
            let occ = tile.occupant()?;
            (occ != id && makes_progress(facing, edge, tile.position()) && self.is_mover(occ))
                .then_some(occ)
        })
    }

    /// Adjacent movers a station can hand to, in tile order.
    fn station_receivers(&self, id: StructureId) -> Vec<StructureId> {
        self.neighbor_structures(id)
            .into_iter()
            .filter(|&n| match self.mover(n) {
                Some(m) if m.is_station() => m.cached_next() != Some(id),
                Some(_) => !self.feeds_into(n, id),
                None => false,
            })
            .collect()
    }

    /// Recompute and store a mover's next hop. Pure apart from the cache.
    pub fn find_next_mover(&mut self, id: StructureId) -> Option<StructureId> {
        let mover = self.mover(id)?;
        let kind = mover.kind.clone();
        let link = mover.link.filter(|&l| self.is_mover(l));
        let (next, receivers) = match kind {
            MoverKind::Conveyor { facing } => (self.resolve_conveyor(id, facing), None),
            MoverKind::Station { .. } => {
                let receivers = self.station_receivers(id);
                let current = self.mover(id).and_then(MoverState::cached_next);
                let next = current
                    .filter(|c| receivers.contains(c))
                    .or_else(|| receivers.first().copied());
                (next, Some(receivers))
            }
        };
        let next = link.or(next);
        if let Some(m) = self.mover_mut(id) {
            m.next = next;
            m.link = link;
            if let (MoverKind::Station { receivers: slot }, Some(r)) = (&mut m.kind, receivers) {
                *slot = r;
            }
        }
        next
    }

    /// Cached next hop, if it still names a live structure.
    pub fn next_mover(&self, id: StructureId) -> Option<StructureId> {
        self.mover(id)?
            .cached_next()
            .filter(|&n| self.structures.contains_key(n))
    }

    /// Re-resolve a mover's chain and release anything it was holding.
    pub(crate) fn refresh_chain(&mut self, id: StructureId) {
        if self.find_next_mover(id).is_some() {
            self.release_held(id);
        }
    }

    /// Pin `from`'s next hop to `target` regardless of the grid layout. The
    /// pin survives neighbour changes and rotation until it is unlinked or
    /// `target` is removed.
    pub fn link_mover(&mut self, from: StructureId, target: StructureId) -> Result<(), MoverError> {
        self.checked_mover(from)?;
        self.checked_mover(target)?;
        if from == target {
            return Err(MoverError::SelfLink(from));
        }
        if let Some(m) = self.mover_mut(from) {
            m.link = Some(target);
        }
        log::debug!("{:?} linked to {:?}", from, target);
        self.refresh_chain(from);
        Ok(())
    }

    /// Drop `from`'s pinned hop and fall back to the grid chain. Returns
    /// the target it was linked to.
    pub fn unlink_mover(&mut self, from: StructureId) -> Result<Option<StructureId>, MoverError> {
        self.checked_mover(from)?;
        let previous = self.mover_mut(from).and_then(|m| m.link.take());
        if previous.is_some() {
            log::debug!("{:?} unlinked from {:?}", from, previous);
            self.refresh_chain(from);
        }
        Ok(previous)
    }

    /// Post-placement wiring: resolve the new mover's chain, let movers
    /// around it re-resolve theirs, and start free-running animation.
    pub(crate) fn on_place(&mut self, id: StructureId) {
        let self_mover = self.is_mover(id);
        if self_mover {
            self.find_next_mover(id);
        }
        for n in self.neighbor_structures(id) {
            self.refresh_surrounding(n);
            if self.is_mover(n) {
                self.refresh_chain(n);
            }
        }
        if self_mover {
            self.refresh_chain(id);
            if self.mover(id).is_some_and(|m| !m.needs_power) {
                self.begin_animation(id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Taking and moving payloads
    // -----------------------------------------------------------------------

    /// Give a payload to a mover. It is queued and, if the mover can run,
    /// immediately starts moving across.
    pub fn take_item(&mut self, mover: StructureId, payload: PayloadId) -> Result<(), MoverError> {
        if !self.structures.contains_key(mover) {
            return Err(MoverError::Unknown(mover));
        }
        if !self.is_mover(mover) {
            return Err(MoverError::NotAMover(mover));
        }
        let p = self
            .payloads
            .get(payload)
            .ok_or(MoverError::UnknownPayload(payload))?;
        if p.state == PayloadState::Broken {
            return Err(PayloadError::IllegalRedirect(payload).into());
        }
        let previous = p.owner;
        self.halt_payload(payload);
        if let Some(m) = self.mover_mut(previous) {
            m.detach(payload);
        }
        if let Some(p) = self.payloads.get_mut(payload) {
            p.owner = mover;
            p.state = PayloadState::Queued;
        }
        if let Some(m) = self.mover_mut(mover) {
            m.queued.push_back(payload);
        }
        if self.can_run(mover) {
            self.move_across(mover, payload);
        }
        Ok(())
    }

    /// Cancel every pending task of a payload and clear its motion and
    /// countdown.
    fn halt_payload(&mut self, id: PayloadId) {
        let Some(p) = self.payloads.get_mut(id) else {
            return;
        };
        let tasks = p.pending_tasks();
        p.motion = None;
        p.countdown = None;
        p.settle = None;
        for t in tasks {
            if self.scheduler.is_live(t) {
                let _ = self.scheduler.cancel(t);
            }
        }
    }

    /// World point a mover sends payloads to when it has no next hop.
    fn dead_end(&self, id: StructureId) -> WorldPos {
        let center = self.structure_center(id).unwrap_or(WorldPos::ORIGIN);
        match self.mover(id).and_then(MoverState::facing) {
            Some(facing) => {
                let (dx, dy) = facing.offset();
                let cell = self.grid.cell_size();
                center.add(WorldPos::new(
                    Fixed64::from_num(dx) * cell,
                    Fixed64::from_num(dy) * cell,
                ))
            }
            None => center,
        }
    }

    /// Start a payload toward the next mover's centre, or toward the dead
    /// end when there is none.
    fn move_across(&mut self, mover: StructureId, payload: PayloadId) {
        let target = match self.find_next_mover(mover) {
            Some(next) => self.structure_center(next),
            None => None,
        }
        .unwrap_or_else(|| self.dead_end(mover));
        let steps = self
            .mover(mover)
            .and_then(|m| m.move_steps)
            .unwrap_or(self.config.move_steps);
        if let Some(m) = self.mover_mut(mover) {
            m.detach(payload);
            m.moving.push(payload);
        }
        if let Err(e) = self.start_payload_motion(payload, target, steps) {
            log::warn!("move across {:?} failed: {e}", mover);
            return;
        }
        self.emit_now(|tick| Event::PayloadStartedMoving {
            payload,
            mover,
            tick,
        });
    }

    /// Begin interpolating a payload toward `target` in `steps` steps.
    /// A motion already running is cancelled and replaced.
    pub fn start_payload_motion(
        &mut self,
        payload: PayloadId,
        target: WorldPos,
        steps: u32,
    ) -> Result<(), PayloadError> {
        let position = self
            .payloads
            .get(payload)
            .map(|p| p.position)
            .ok_or(PayloadError::Unknown(payload))?;
        let steps = steps.max(1);
        let diff = target.sub(position);
        let delta = WorldPos::new(
            div_steps(diff.x, steps).unwrap_or(Fixed64::ZERO),
            div_steps(diff.y, steps).unwrap_or(Fixed64::ZERO),
        );
        let interval = self.config.step_interval(steps);
        let task = self.schedule_in(interval, Task::Advance { payload });
        let replaced = self.payloads.get_mut(payload).and_then(|p| {
            p.begin_motion(Motion {
                target,
                delta,
                steps_left: steps,
                interval,
                task,
            })
        });
        if let Some(old) = replaced {
            if self.scheduler.is_live(old) {
                let _ = self.scheduler.cancel(old);
            }
        }
        log::trace!("{:?} moving to ({}, {})", payload, target.x, target.y);
        Ok(())
    }

    /// Cancel a payload's running motion, leaving it where it is.
    pub fn stop_payload_motion(&mut self, payload: PayloadId) -> Result<(), PayloadError> {
        let motion = self
            .payloads
            .get_mut(payload)
            .ok_or(PayloadError::Unknown(payload))?
            .end_motion()?;
        if self.scheduler.is_live(motion.task) {
            let _ = self.scheduler.cancel(motion.task);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task bodies
    // -----------------------------------------------------------------------

    pub(crate) fn advance_payload(&mut self, payload: PayloadId) {
        let epsilon = self.config.arrival_epsilon;
        let Some(p) = self.payloads.get_mut(payload) else {
            log::warn!("advance for missing payload {:?}", payload);
            return;
        };
        if p.motion.is_none() {
            return;
        }
        if p.step_motion(epsilon) {
            p.motion = None;
            log::trace!("{:?} arrived at ({}, {})", payload, p.position.x, p.position.y);
            self.on_arrival(payload);
            return;
        }
        let interval = p.motion.map_or(1, |m| m.interval);
        let task = self.schedule_in(interval, Task::Advance { payload });
        if let Some(m) = self.payloads.get_mut(payload).and_then(|p| p.motion.as_mut()) {
            m.task = task;
        }
    }

    fn on_arrival(&mut self, payload: PayloadId) {
        let Some(owner) = self.payloads.get(payload).map(|p| p.owner) else {
            return;
        };
        if let Some(next) = self.find_next_mover(owner) {
            self.hand_off(payload, owner, next);
            return;
        }
        if self.mover(owner).is_some_and(MoverState::holds_items) {
            if let Some(m) = self.mover_mut(owner) {
                m.detach(payload);
                m.held.push(payload);
            }
            if let Some(p) = self.payloads.get_mut(payload) {
                p.state = PayloadState::Held;
            }
            self.emit_now(|tick| Event::PayloadHeld {
                payload,
                mover: owner,
                tick,
            });
            return;
        }
        self.begin_break(payload, owner);
    }

    fn begin_break(&mut self, payload: PayloadId, owner: StructureId) {
        self.emit_now(|tick| Event::PayloadEnteredBreak {
            payload,
            mover: owner,
            tick,
        });
        let grace = self.config.break_grace_steps;
        if grace == 0 {
            self.break_payload(payload);
            return;
        }
        let task = self.schedule_in(self.config.break_step_ticks, Task::BreakStep { payload });
        if let Some(p) = self.payloads.get_mut(payload) {
            p.begin_break(grace, task);
        }
    }

    /// Transfer a payload from one mover to the next.
    fn hand_off(&mut self, payload: PayloadId, from: StructureId, to: StructureId) {
        if let Some(m) = self.mover_mut(from) {
            m.detach(payload);
        }
        self.emit_now(|tick| Event::PayloadHandedOff {
            payload,
            from,
            to,
            tick,
        });
        self.accept_moved_item(to, payload);
    }

    fn accept_moved_item(&mut self, mover: StructureId, payload: PayloadId) {
        self.emit_now(|tick| Event::MoverAccepted {
            mover,
            payload,
            tick,
        });
        if let Err(e) = self.take_item(mover, payload) {
            log::warn!("{:?} could not accept {:?}: {e}", mover, payload);
        }
    }

    /// One grace-period re-poll: rescue if a receiver appeared, else shrink.
    pub(crate) fn break_step(&mut self, payload: PayloadId) {
        let Some(p) = self.payloads.get(payload) else {
            return;
        };
        if p.state != PayloadState::Breaking {
            return;
        }
        let owner = p.owner;
        if let Some(next) = self.find_next_mover(owner) {
            if let Some(p) = self.payloads.get_mut(payload) {
                if let Err(e) = p.redirect() {
                    log::warn!("rescue failed: {e}");
                    return;
                }
                p.state = PayloadState::Moving;
            }
            self.emit_now(|tick| Event::PayloadRescued {
                payload,
                mover: owner,
                to: next,
                tick,
            });
            self.hand_off(payload, owner, next);
            return;
        }
        let total = self.config.break_grace_steps;
        let remaining = self
            .payloads
            .get_mut(payload)
            .map_or(0, |p| p.shrink(total));
        if remaining == 0 {
            self.break_payload(payload);
            return;
        }
        let task = self.schedule_in(self.config.break_step_ticks, Task::BreakStep { payload });
        if let Some(c) = self.payloads.get_mut(payload).and_then(|p| p.countdown.as_mut()) {
            c.task = task;
        }
    }

    fn break_payload(&mut self, payload: PayloadId) {
        let settle = self.schedule_in(self.config.settle_ticks, Task::Settle { payload });
        if let Some(p) = self.payloads.get_mut(payload) {
            p.mark_broken(settle);
        }
        log::debug!("{:?} broke", payload);
        self.emit_now(|tick| Event::PayloadBroken { payload, tick });
    }

    /// Send a payload to a different mover. Fails once the payload has
    /// broken.
    pub fn redirect_payload(&mut self, payload: PayloadId, to: StructureId) -> Result<(), PayloadError> {
        let p = self
            .payloads
            .get_mut(payload)
            .ok_or(PayloadError::Unknown(payload))?;
        if !p.redirectable {
            return Err(PayloadError::IllegalRedirect(payload));
        }
        if !self.is_mover(to) {
            return Err(PayloadError::NotAMover(to));
        }
        let from = self.payloads.get(payload).map(|p| p.owner).ok_or(PayloadError::Unknown(payload))?;
        self.halt_payload(payload);
        if let Some(p) = self.payloads.get_mut(payload) {
            p.redirect()?;
        }
        self.hand_off(payload, from, to);
        Ok(())
    }

    /// Start every queued payload, if the mover can run.
    pub(crate) fn release_queue(&mut self, id: StructureId) {
        if !self.can_run(id) {
            return;
        }
        let queued: Vec<PayloadId> = self.mover(id).map(|m| m.queued().collect()).unwrap_or_default();
        for payload in queued {
            self.move_across(id, payload);
        }
    }

    /// Send held payloads on once there is somewhere to send them.
    pub(crate) fn release_held(&mut self, id: StructureId) {
        if !self.can_run(id) || self.next_mover(id).is_none() {
            return;
        }
        let held: Vec<PayloadId> = self.mover(id).map(|m| m.held().to_vec()).unwrap_or_default();
        for payload in held {
            self.move_across(id, payload);
        }
    }

    /// Payloads currently owned by a mover.
    pub fn payloads_on(&self, id: StructureId) -> Vec<PayloadId> {
        self.mover(id).map(MoverState::all_payloads).unwrap_or_default()
    }

    /// Items on a mover, in queued, moving, held order.
    pub fn items_on(&self, id: StructureId) -> Vec<Item> {
        self.payloads_on(id)
            .into_iter()
            .filter_map(|p| self.payloads.get(p).map(|p| p.item))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Animation
    // -----------------------------------------------------------------------

    pub(crate) fn begin_animation(&mut self, id: StructureId) {
        if self.mover(id).is_none_or(MoverState::is_animating) {
            return;
        }
        let task = self.schedule_in(self.config.animation_interval_ticks, Task::AnimationFrame { mover: id });
        if let Some(m) = self.mover_mut(id) {
            m.animation = Some(task);
        }
        self.emit_now(|tick| Event::MovementStarted { mover: id, tick });
    }

    pub(crate) fn end_animation(&mut self, id: StructureId) {
        let Some(task) = self.mover_mut(id).and_then(|m| m.animation.take()) else {
            return;
        };
        if self.scheduler.is_live(task) {
            let _ = self.scheduler.cancel(task);
        }
        self.emit_now(|tick| Event::MovementStopped { mover: id, tick });
    }

    /// Start a mover's animation loop.
    pub fn start_movement(&mut self, id: StructureId) -> Result<(), MoverError> {
        let m = self.checked_mover(id)?;
        if m.is_animating() {
            return Err(MoverError::AlreadyRunning(id));
        }
        self.begin_animation(id);
        Ok(())
    }

    /// Stop a mover's animation loop.
    pub fn stop_movement(&mut self, id: StructureId) -> Result<(), MoverError> {
        let m = self.checked_mover(id)?;
        if !m.is_animating() {
            return Err(MoverError::NotRunning(id));
        }
        self.end_animation(id);
        Ok(())
    }

    pub(crate) fn animation_frame(&mut self, id: StructureId) {
        let Some(frame) = self.mover_mut(id).map(|m| {
            m.animation = None;
            m.advance_frame()
        }) else {
            return;
        };
        self.emit_now(|tick| Event::MoverFrame {
            mover: id,
            frame,
            tick,
        });
        let task = self.schedule_in(self.config.animation_interval_ticks, Task::AnimationFrame { mover: id });
        if let Some(m) = self.mover_mut(id) {
            m.animation = Some(task);
        }
    }

    fn checked_mover(&self, id: StructureId) -> Result<&MoverState, MoverError> {
        let s = self.structures.get(id).ok_or(MoverError::Unknown(id))?;
        s.mover.as_ref().ok_or(MoverError::NotAMover(id))
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Turn a conveyor to face `facing`. Refused while it carries payloads.
    pub fn rotate(&mut self, id: StructureId, facing: Direction) -> Result<(), MoverError> {
        let m = self.checked_mover(id)?;
        if m.is_station() {
            return Err(MoverError::NotRotatable(id));
        }
        if m.is_busy() {
            return Err(MoverError::Busy(id));
        }
        if let Some(MoverKind::Conveyor { facing: f }) = self.mover_mut(id).map(|m| &mut m.kind) {
            *f = facing;
        }
        log::debug!("{:?} now faces {:?}", id, facing);
        self.emit_now(|tick| Event::MoverRotated {
            mover: id,
            facing,
            tick,
        });
        self.refresh_chain(id);
        for n in self.neighbor_structures(id) {
            if self.is_mover(n) {
                self.refresh_chain(n);
            }
        }
        Ok(())
    }

    pub fn on_north_key(&mut self, id: StructureId) -> Result<(), MoverError> {
        self.rotate(id, Direction::North)
    }

    pub fn on_east_key(&mut self, id: StructureId) -> Result<(), MoverError> {
        self.rotate(id, Direction::East)
    }

    pub fn on_south_key(&mut self, id: StructureId) -> Result<(), MoverError> {
        self.rotate(id, Direction::South)
    }

    pub fn on_west_key(&mut self, id: StructureId) -> Result<(), MoverError> {
        self.rotate(id, Direction::West)
    }

}

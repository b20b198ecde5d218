//! Payload (item box) state machine.
//!
//! ```text
//! Queued -> Moving -> HandedOff (re-queued at the receiver)
//!                  -> Held      (hold-items movers)
//!                  -> Breaking -> Broken -> destroyed
//!                          \-> Moving (rescued)
//! ```
//!
//! A payload belongs to exactly one mover (`owner`) at a time. It tracks its
//! own in-flight motion task so a second `start` cancels the first.

use serde::{Deserialize, Serialize};

use crate::catalog::Item;
use crate::fixed::{Fixed64, WorldPos};
use crate::id::{PayloadId, StructureId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadState {
    Queued,
    Moving,
    Held,
    Breaking,
    Broken,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("unknown payload {0:?}")]
    Unknown(PayloadId),
    #[error("payload {0:?} cannot be redirected")]
    IllegalRedirect(PayloadId),
    #[error("payload {0:?} has no motion running")]
    NotRunning(PayloadId),
    #[error("structure {0:?} is not a mover")]
    NotAMover(StructureId),
}

/// In-flight interpolation toward `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motion {
    pub target: WorldPos,
    pub delta: WorldPos,
    pub steps_left: u32,
    pub interval: u64,
    pub task: TaskId,
}

/// Countdown of a break sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakCountdown {
    pub remaining: u32,
    pub task: TaskId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub(crate) id: PayloadId,
    pub(crate) item: Item,
    pub(crate) state: PayloadState,
    pub(crate) position: WorldPos,
    pub(crate) scale: Fixed64,
    pub(crate) redirectable: bool,
    pub(crate) owner: StructureId,
    pub(crate) motion: Option<Motion>,
    pub(crate) countdown: Option<BreakCountdown>,
    pub(crate) settle: Option<TaskId>,
}

impl Payload {
    pub(crate) fn new(id: PayloadId, item: Item, owner: StructureId, position: WorldPos) -> Self {
        Self {
            id,
            item,
            state: PayloadState::Queued,
            position,
            scale: Fixed64::from_num(1),
            redirectable: true,
            owner,
            motion: None,
            countdown: None,
            settle: None,
        }
    }

    pub fn id(&self) -> PayloadId {
        self.id
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn state(&self) -> PayloadState {
        self.state
    }

    pub fn position(&self) -> WorldPos {
        self.position
    }

    pub fn scale(&self) -> Fixed64 {
        self.scale
    }

    pub fn redirectable(&self) -> bool {
        self.redirectable
    }

    pub fn owner(&self) -> StructureId {
        self.owner
    }

    /// True while an interpolation task is pending.
    pub fn is_animating(&self) -> bool {
        self.motion.is_some()
    }

    pub fn motion(&self) -> Option<&Motion> {
        self.motion.as_ref()
    }

    /// Install a new motion. Returns the task of the motion it replaces so
    /// the caller can cancel it.
    pub(crate) fn begin_motion(&mut self, motion: Motion) -> Option<TaskId> {
        self.state = PayloadState::Moving;
        self.motion.replace(motion).map(|m| m.task)
    }

    /// Clear the running motion. Fails if none is running.
    pub(crate) fn end_motion(&mut self) -> Result<Motion, PayloadError> {
        self.motion.take().ok_or(PayloadError::NotRunning(self.id))
    }

    /// Apply one interpolation step. Returns true once the payload is within
    /// `epsilon` of its target or out of steps; it is then snapped exactly
    /// onto the target.
    pub(crate) fn step_motion(&mut self, epsilon: Fixed64) -> bool {
        let Some(motion) = self.motion.as_mut() else {
            return true;
        };
        self.position = self.position.add(motion.delta);
        motion.steps_left = motion.steps_left.saturating_sub(1);
        let remaining = motion.target.sub(self.position).manhattan();
        if motion.steps_left == 0 || remaining < epsilon {
            self.position = motion.target;
            return true;
        }
        false
    }

    /// Enter the break sequence with `steps` re-polls left.
    pub(crate) fn begin_break(&mut self, steps: u32, task: TaskId) {
        self.state = PayloadState::Breaking;
        self.countdown = Some(BreakCountdown {
            remaining: steps,
            task,
        });
    }

    /// Shrink by one grace step out of `total`. Returns remaining steps.
    pub(crate) fn shrink(&mut self, total: u32) -> u32 {
        let Some(c) = self.countdown.as_mut() else {
            return 0;
        };
        c.remaining = c.remaining.saturating_sub(1);
        self.scale = if total == 0 {
            Fixed64::ZERO
        } else {
            Fixed64::from_num(c.remaining) / Fixed64::from_num(total)
        };
        c.remaining
    }

    /// Change destination. Only redirectable payloads may be redirected;
    /// a rescued payload regains full scale.
    pub(crate) fn redirect(&mut self) -> Result<(), PayloadError> {
        if !self.redirectable {
            return Err(PayloadError::IllegalRedirect(self.id));
        }
        self.countdown = None;
        self.scale = Fixed64::from_num(1);
        Ok(())
    }

    /// Terminal: the payload can no longer be rescued and is destroyed
    /// when `settle` runs.
    pub(crate) fn mark_broken(&mut self, settle: TaskId) {
        self.state = PayloadState::Broken;
        self.redirectable = false;
        self.countdown = None;
        self.settle = Some(settle);
        self.scale = Fixed64::ZERO;
    }

    /// Every task still pending for this payload.
    pub(crate) fn pending_tasks(&self) -> Vec<TaskId> {
        self.motion
            .map(|m| m.task)
            .into_iter()
            .chain(self.countdown.map(|c| c.task))
            .chain(self.settle)
            .collect()
    }

    /// Grace steps left, while breaking.
    pub fn break_steps_left(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining)
    }
}

//! Cooperative task scheduler.
//!
//! Timed work (payload motion steps, break re-polls, settle delays, mover
//! animation frames) is represented as explicit [`Task`] values due at a
//! tick. The engine pops due tasks in `(due, seq)` order and runs each as
//! one atomic step; a task that wants to continue reschedules itself for a
//! later tick. Nothing ever suspends mid-step.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use slotmap::SlotMap;

use crate::fixed::Ticks;
use crate::id::{PayloadId, StructureId, TaskId};

/// One resumable step of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Advance a payload one interpolation step.
    Advance { payload: PayloadId },
    /// Re-poll the chain for a breaking payload.
    BreakStep { payload: PayloadId },
    /// Destroy a broken payload.
    Settle { payload: PayloadId },
    /// Advance a mover's animation frame.
    AnimationFrame { mover: StructureId },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("task {0:?} is not running")]
    NotRunning(TaskId),
}

#[derive(Debug, Clone)]
struct Pending {
    due: Ticks,
    task: Task,
}

/// Min-heap of due tasks plus a table of live ones. Cancelled tasks leave
/// stale heap entries that are skipped when popped.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(Ticks, u64, TaskId)>>,
    live: SlotMap<TaskId, Pending>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run at tick `due`.
    pub fn schedule(&mut self, due: Ticks, task: Task) -> TaskId {
        let id = self.live.insert(Pending { due, task });
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((due, seq, id)));
        id
    }

    /// Cancel a pending task. Cancelling a task that already ran or was
    /// already cancelled is a contract violation.
    pub fn cancel(&mut self, id: TaskId) -> Result<Task, SchedulerError> {
        self.live
            .remove(id)
            .map(|p| p.task)
            .ok_or(SchedulerError::NotRunning(id))
    }

    pub fn is_live(&self, id: TaskId) -> bool {
        self.live.contains_key(id)
    }

    /// Tick at which a live task is due.
    pub fn due(&self, id: TaskId) -> Option<Ticks> {
        self.live.get(id).map(|p| p.due)
    }

    /// Pop the next live task due at or before `now`.
    pub fn pop_due(&mut self, now: Ticks) -> Option<(TaskId, Task)> {
        while let Some(&Reverse((due, _, id))) = self.heap.peek() {
            if due > now {
                return None;
            }
            self.heap.pop();
            if let Some(pending) = self.live.remove(id) {
                return Some((id, pending.task));
            }
        }
        None
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

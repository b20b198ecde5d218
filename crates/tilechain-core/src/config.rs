//! Engine tuning knobs. Every field has a default so partial config files
//! deserialize cleanly.

use crate::fixed::{Fixed64, Ticks};
use crate::sim::SimulationStrategy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpolation steps per traversal unless a descriptor overrides it.
    pub move_steps: u32,
    /// Total duration of one traversal. The interval between steps is
    /// derived from this so step count does not change travel time.
    pub traversal_ticks: Ticks,
    /// Remaining distance below which a payload counts as arrived.
    pub arrival_epsilon: Fixed64,
    /// Ticks between mover animation frames.
    pub animation_interval_ticks: Ticks,
    /// Number of re-polls a breaking payload gets before it is lost.
    pub break_grace_steps: u32,
    /// Ticks between break re-polls.
    pub break_step_ticks: Ticks,
    /// Ticks between a payload breaking and its destruction.
    pub settle_ticks: Ticks,
    /// Seed for the occupancy group id generator.
    pub group_seed: u64,
    pub strategy: SimulationStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            move_steps: 8,
            traversal_ticks: 32,
            arrival_epsilon: Fixed64::from_bits(1 << 22),
            animation_interval_ticks: 4,
            break_grace_steps: 6,
            break_step_ticks: 4,
            settle_ticks: 8,
            group_seed: 0x7111_E5EE_D000_0001,
            strategy: SimulationStrategy::Tick,
        }
    }
}

impl EngineConfig {
    /// Ticks between interpolation steps for a traversal of `steps` steps.
    pub fn step_interval(&self, steps: u32) -> Ticks {
        (self.traversal_ticks / u64::from(steps.max(1))).max(1)
    }

    /// Total length of the break grace period in ticks.
    pub fn grace_ticks(&self) -> Ticks {
        u64::from(self.break_grace_steps) * self.break_step_ticks.max(1)
    }
}

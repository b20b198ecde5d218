use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits. Used for world
/// positions and payload scale.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64. Use only for initialization and data loading.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Divide a fixed value by a step count. Returns `None` for a zero count.
#[inline]
pub fn div_steps(v: Fixed64, steps: u32) -> Option<Fixed64> {
    if steps == 0 {
        return None;
    }
    v.checked_div(Fixed64::from_num(steps))
}

/// A point in world space. One tile spans `cell_size` units on each axis.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct WorldPos {
    pub x: Fixed64,
    pub y: Fixed64,
}

impl WorldPos {
    pub const ORIGIN: WorldPos = WorldPos {
        x: Fixed64::ZERO,
        y: Fixed64::ZERO,
    };

    pub fn new(x: Fixed64, y: Fixed64) -> Self {
        Self { x, y }
    }

    /// Component-wise difference `self - other`.
    pub fn sub(self, other: WorldPos) -> WorldPos {
        WorldPos::new(self.x - other.x, self.y - other.y)
    }

    /// Component-wise sum.
    pub fn add(self, other: WorldPos) -> WorldPos {
        WorldPos::new(self.x + other.x, self.y + other.y)
    }

    /// Manhattan length, saturating on overflow.
    pub fn manhattan(self) -> Fixed64 {
        self.x.saturating_abs().saturating_add(self.y.saturating_abs())
    }
}

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a placed structure in the engine's structure table.
    pub struct StructureId;

    /// Identifies a payload (item box) travelling through mover chains.
    pub struct PayloadId;

    /// Identifies a pending task in the cooperative scheduler.
    pub struct TaskId;
}

/// Shared by every tile covered by one placed structure. Zero means the
/// tile is unoccupied.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OccupancyGroupId(pub u64);

impl OccupancyGroupId {
    pub const NONE: OccupancyGroupId = OccupancyGroupId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Identifies a placement descriptor in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptorId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_zero_is_none() {
        assert!(OccupancyGroupId::NONE.is_none());
        assert!(OccupancyGroupId::default().is_none());
        assert!(!OccupancyGroupId(7).is_none());
    }

    #[test]
    fn stale_structure_key_is_not_reused() {
        let mut map = slotmap::SlotMap::<StructureId, u8>::with_key();
        let a = map.insert(1);
        map.remove(a);
        let b = map.insert(2);
        assert_ne!(a, b);
        assert!(map.get(a).is_none());
    }
}

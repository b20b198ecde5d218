//! Placement descriptors and the closed item registry.
//!
//! Descriptors are registered through a [`CatalogBuilder`] and frozen into an
//! immutable [`Catalog`] before the engine starts. Item kinds are a closed
//! enum looked up by name through a static table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::grid::{Direction, Footprint};
use crate::id::DescriptorId;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Connector attachment carried by a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Maximum simultaneous lines.
    pub max_lines: u32,
    /// Attach range in 4-neighbour steps from the owner's footprint.
    pub range: u32,
}

/// What a placed structure does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Directional mover.
    Conveyor {
        facing: Direction,
        needs_power: bool,
        /// Overrides `EngineConfig::move_steps`.
        move_steps: Option<u32>,
    },
    /// Wide mover that forwards to any adjacent receiver.
    Station { needs_power: bool, hold_items: bool },
    /// Powers structures its connector lines reach.
    PowerSource,
    /// Occupies tiles, nothing else.
    Fixture,
}

impl Role {
    pub fn is_mover(&self) -> bool {
        matches!(self, Role::Conveyor { .. } | Role::Station { .. })
    }
}

/// A placement descriptor: everything needed to spawn a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub footprint: Footprint,
    pub role: Role,
    pub connector: Option<ConnectorSpec>,
    /// Whether connector lines may attach to this structure.
    pub connectable: bool,
    /// Frames in the mover animation loop.
    pub animation_frames: u32,
}

impl Descriptor {
    pub fn new(name: &str, footprint: Footprint, role: Role) -> Self {
        Self {
            name: name.to_string(),
            footprint,
            role,
            connector: None,
            connectable: false,
            animation_frames: 4,
        }
    }

    pub fn with_connector(mut self, max_lines: u32, range: u32) -> Self {
        self.connector = Some(ConnectorSpec { max_lines, range });
        self
    }

    pub fn connectable(mut self) -> Self {
        self.connectable = true;
        self
    }

    pub fn with_animation_frames(mut self, frames: u32) -> Self {
        self.animation_frames = frames;
        self
    }

    pub fn is_power_source(&self) -> bool {
        matches!(self.role, Role::PowerSource)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Something that can be put on the grid.
pub trait Placeable {
    fn name(&self) -> &str;
    fn footprint(&self) -> Footprint;
}

/// Something that takes part in the connector line graph.
pub trait Connectable {
    /// Connector owned by this structure, if any.
    fn connector(&self) -> Option<ConnectorSpec>;
    /// Whether other connectors may attach lines to it.
    fn accepts_lines(&self) -> bool;

    fn attach_range(&self) -> u32 {
        self.connector().map_or(0, |c| c.range)
    }
}

impl Placeable for Descriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn footprint(&self) -> Footprint {
        self.footprint
    }
}

impl Connectable for Descriptor {
    fn connector(&self) -> Option<ConnectorSpec> {
        self.connector
    }

    fn accepts_lines(&self) -> bool {
        self.connectable
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("descriptor '{0}' registered twice")]
    DuplicateName(String),
    #[error("descriptor '{0}' has an empty footprint")]
    EmptyFootprint(String),
    #[error("descriptor '{0}' has a footprint wider or taller than the coordinate range")]
    OversizedFootprint(String),
    #[error("descriptor '{0}' has a connector with no lines")]
    ZeroLineLimit(String),
}

/// Collects descriptors; [`CatalogBuilder::build`] validates and freezes them.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    descriptors: Vec<Descriptor>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Returns the id it will have in the catalog.
    pub fn register(&mut self, descriptor: Descriptor) -> DescriptorId {
        let id = DescriptorId(self.descriptors.len() as u32);
        self.descriptors.push(descriptor);
        id
    }

    pub fn build(self) -> Result<Catalog, CatalogError> {
        let mut name_to_id = HashMap::with_capacity(self.descriptors.len());
        for (i, d) in self.descriptors.iter().enumerate() {
            if d.footprint.is_empty() {
                return Err(CatalogError::EmptyFootprint(d.name.clone()));
            }
            if !d.footprint.fits_coordinates() {
                return Err(CatalogError::OversizedFootprint(d.name.clone()));
            }
            if d.connector.is_some_and(|c| c.max_lines == 0) {
                return Err(CatalogError::ZeroLineLimit(d.name.clone()));
            }
            if name_to_id
                .insert(d.name.clone(), DescriptorId(i as u32))
                .is_some()
            {
                return Err(CatalogError::DuplicateName(d.name.clone()));
            }
        }
        Ok(Catalog {
            descriptors: self.descriptors,
            name_to_id,
        })
    }
}

/// Immutable descriptor table.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    descriptors: Vec<Descriptor>,
    name_to_id: HashMap<String, DescriptorId>,
}

impl Catalog {
    pub fn get(&self, id: DescriptorId) -> Option<&Descriptor> {
        self.descriptors.get(id.0 as usize)
    }

    pub fn id(&self, name: &str) -> Option<DescriptorId> {
        self.name_to_id.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Descriptor> {
        self.id(name).and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &Descriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (DescriptorId(i as u32), d))
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Data-free tag for an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Strawberry,
    Broccoli,
    Plate,
}

/// A domain item wrapped by a payload. Each kind carries its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    Strawberry { sliced: bool },
    Broccoli { roasted: bool },
    Plate { servings: u8 },
}

/// Name table for item lookup.
static ITEM_TABLE: &[(&str, ItemKind)] = &[
    ("Strawberry", ItemKind::Strawberry),
    ("Broccoli", ItemKind::Broccoli),
    ("Plate", ItemKind::Plate),
];

impl ItemKind {
    pub fn from_name(name: &str) -> Option<ItemKind> {
        ITEM_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, kind)| kind)
    }

    pub fn name(self) -> &'static str {
        ITEM_TABLE
            .iter()
            .find(|(_, k)| *k == self)
            .map_or("", |&(n, _)| n)
    }

    /// Fresh item of this kind.
    pub fn instantiate(self) -> Item {
        match self {
            ItemKind::Strawberry => Item::Strawberry { sliced: false },
            ItemKind::Broccoli => Item::Broccoli { roasted: false },
            ItemKind::Plate => Item::Plate { servings: 0 },
        }
    }
}

impl Item {
    /// Create a fresh item from its registered name.
    pub fn from_name(name: &str) -> Option<Item> {
        ItemKind::from_name(name).map(ItemKind::instantiate)
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Strawberry { .. } => ItemKind::Strawberry,
            Item::Broccoli { .. } => ItemKind::Broccoli,
            Item::Plate { .. } => ItemKind::Plate,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conveyor() -> Descriptor {
        Descriptor::new(
            "conveyor",
            Footprint::single(),
            Role::Conveyor {
                facing: Direction::East,
                needs_power: false,
                move_steps: None,
            },
        )
    }

    #[test]
    fn build_assigns_ids_in_order() {
        let mut b = CatalogBuilder::new();
        let a = b.register(conveyor());
        let c = b.register(Descriptor::new("table", Footprint::new(2, 2), Role::Fixture));
        let catalog = b.build().unwrap();
        assert_eq!(catalog.id("conveyor"), Some(a));
        assert_eq!(catalog.id("table"), Some(c));
        assert_eq!(catalog.get(c).unwrap().footprint, Footprint::new(2, 2));
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(conveyor());
        b.register(conveyor());
        assert_eq!(
            b.build().unwrap_err(),
            CatalogError::DuplicateName("conveyor".into())
        );
    }

    #[test]
    fn empty_footprint_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(Descriptor::new("ghost", Footprint::new(0, 1), Role::Fixture));
        assert!(matches!(b.build(), Err(CatalogError::EmptyFootprint(_))));
    }

    #[test]
    fn oversized_footprint_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(Descriptor::new("runway", Footprint::new(u32::MAX, 1), Role::Fixture));
        assert_eq!(
            b.build().unwrap_err(),
            CatalogError::OversizedFootprint("runway".into())
        );
    }

    #[test]
    fn zero_line_connector_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(Descriptor::new("cell", Footprint::single(), Role::PowerSource).with_connector(0, 2));
        assert!(matches!(b.build(), Err(CatalogError::ZeroLineLimit(_))));
    }

    #[test]
    fn capability_traits() {
        let cell = Descriptor::new("cell", Footprint::single(), Role::PowerSource).with_connector(3, 2);
        assert_eq!(Placeable::name(&cell), "cell");
        assert_eq!(cell.attach_range(), 2);
        assert!(!cell.accepts_lines());
        assert!(cell.is_power_source());

        let belt = conveyor().connectable();
        assert!(belt.accepts_lines());
        assert_eq!(belt.attach_range(), 0);
        assert!(belt.role.is_mover());
    }

    #[test]
    fn item_lookup_by_name() {
        assert_eq!(
            Item::from_name("Strawberry"),
            Some(Item::Strawberry { sliced: false })
        );
        assert_eq!(Item::from_name("Plate").unwrap().name(), "Plate");
        assert!(Item::from_name("Umbrella").is_none());
        for kind in [ItemKind::Strawberry, ItemKind::Broccoli, ItemKind::Plate] {
            assert_eq!(ItemKind::from_name(kind.name()), Some(kind));
        }
    }
}

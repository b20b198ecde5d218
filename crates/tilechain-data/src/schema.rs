//! Serde data file structs for descriptors and scene layouts.
//!
//! These are the on-disk shapes. The loader validates them and resolves them
//! into core types ([`Descriptor`], [`Engine`](tilechain_core::engine::Engine)).

use serde::Deserialize;
use tilechain_core::catalog::{Descriptor, Role};
use tilechain_core::grid::{Direction, Footprint};

// ===========================================================================
// Descriptors
// ===========================================================================

/// What a descriptor does once placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Conveyor,
    Station,
    PowerSource,
    Fixture,
}

/// Connector attachment in a data file.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConnectorData {
    pub max_lines: u32,
    pub range: u32,
}

fn default_true() -> bool {
    true
}

/// A placement descriptor in a data file.
///
/// Role-specific fields are flat and optional; fields that do not apply to
/// the role are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub role: RoleKind,
    /// Default facing for conveyors.
    #[serde(default)]
    pub facing: Option<Direction>,
    #[serde(default)]
    pub needs_power: bool,
    /// Stations only: keep items that have nowhere to go.
    #[serde(default = "default_true")]
    pub hold_items: bool,
    #[serde(default)]
    pub move_steps: Option<u32>,
    #[serde(default)]
    pub connector: Option<ConnectorData>,
    #[serde(default)]
    pub connectable: bool,
    #[serde(default)]
    pub animation_frames: Option<u32>,
}

impl DescriptorData {
    pub fn role(&self) -> Role {
        match self.role {
            RoleKind::Conveyor => Role::Conveyor {
                facing: self.facing.unwrap_or(Direction::East),
                needs_power: self.needs_power,
                move_steps: self.move_steps,
            },
            RoleKind::Station => Role::Station {
                needs_power: self.needs_power,
                hold_items: self.hold_items,
            },
            RoleKind::PowerSource => Role::PowerSource,
            RoleKind::Fixture => Role::Fixture,
        }
    }

    pub fn to_descriptor(&self) -> Descriptor {
        let mut d = Descriptor::new(&self.name, Footprint::new(self.width, self.height), self.role());
        if let Some(c) = self.connector {
            d = d.with_connector(c.max_lines, c.range);
        }
        if self.connectable {
            d = d.connectable();
        }
        if let Some(frames) = self.animation_frames {
            d = d.with_animation_frames(frames);
        }
        d
    }
}

// ===========================================================================
// Scene
// ===========================================================================

/// A structure to place when the scene loads.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementData {
    pub descriptor: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub facing: Option<Direction>,
}

/// A connector line from the structure at `from` to the one at `to`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LineData {
    pub from: (i32, i32),
    pub to: (i32, i32),
}

fn default_cell_size() -> f64 {
    1.0
}

/// A saved layout: grid dimensions, placements in order, then lines.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneData {
    pub width: i32,
    pub height: i32,
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    #[serde(default)]
    pub placements: Vec<PlacementData>,
    #[serde(default)]
    pub lines: Vec<LineData>,
}

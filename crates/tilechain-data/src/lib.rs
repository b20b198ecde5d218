//! Data-driven setup for tilechain: descriptor catalogs, engine
//! configuration and scene layouts read from RON, TOML or JSON files.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, GameData, Scene, load_catalog, load_config, load_game_data, load_scene};

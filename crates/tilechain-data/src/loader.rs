//! Loading pipeline: reads data files, resolves names, builds the catalog,
//! the engine config and an optional ready-to-run scene.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by the higher-level loaders.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tilechain_core::catalog::{Catalog, CatalogBuilder, CatalogError};
use tilechain_core::config::EngineConfig;
use tilechain_core::engine::Engine;
use tilechain_core::fixed::Fixed64;
use tilechain_core::id::DescriptorId;
use tilechain_power::{ConnectorError, ConnectorNetwork};

use crate::schema::{DescriptorData, SceneData};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// Well-formed data the engine rejected.
    #[error("invalid data in {file}: {detail}")]
    Invalid { file: PathBuf, detail: String },

    #[error("in {file}: {source}")]
    Catalog {
        file: PathBuf,
        #[source]
        source: CatalogError,
    },

    #[error("in {file}: {source}")]
    Connector {
        file: PathBuf,
        #[source]
        source: ConnectorError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for `{base_name}.ron`, `.toml` or `.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list. TOML files hold the array under `toml_key` in a
/// top-level table; RON and JSON hold it directly.
pub fn deserialize_list<T: DeserializeOwned>(path: &Path, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let mut table: toml::Table = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let array = table
                .remove(toml_key)
                .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?;
            array.try_into().map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// `DuplicateName` if `name` is already in the map.
pub fn check_duplicate<V>(map: &HashMap<String, V>, name: &str, file: &Path) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Catalog
// ===========================================================================

/// Build a frozen catalog from descriptor records read out of `file`.
pub fn build_catalog(records: &[DescriptorData], file: &Path) -> Result<Catalog, DataLoadError> {
    let mut seen: HashMap<String, DescriptorId> = HashMap::with_capacity(records.len());
    let mut builder = CatalogBuilder::new();
    for record in records {
        check_duplicate(&seen, &record.name, file)?;
        let id = builder.register(record.to_descriptor());
        seen.insert(record.name.clone(), id);
    }
    builder.build().map_err(|source| DataLoadError::Catalog {
        file: file.to_path_buf(),
        source,
    })
}

/// Load `descriptors.{ron,toml,json}` from `dir`.
pub fn load_catalog(dir: &Path) -> Result<Catalog, DataLoadError> {
    let path = require_data_file(dir, "descriptors")?;
    let records: Vec<DescriptorData> = deserialize_list(&path, "descriptors")?;
    let catalog = build_catalog(&records, &path)?;
    log::info!("loaded {} descriptors from {}", catalog.len(), path.display());
    Ok(catalog)
}

// ===========================================================================
// Config
// ===========================================================================

/// Load `engine.{ron,toml,json}` from `dir`, or the defaults if absent.
pub fn load_config(dir: &Path) -> Result<EngineConfig, DataLoadError> {
    match find_data_file(dir, "engine")? {
        Some(path) => {
            let config: EngineConfig = deserialize_file(&path)?;
            log::info!("loaded engine config from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

// ===========================================================================
// Scene
// ===========================================================================

/// A loaded layout: the engine with every placement applied, and the
/// connector network holding its lines.
pub struct Scene {
    pub engine: Engine,
    pub network: ConnectorNetwork,
}

/// Build an engine from scene data. Placements apply in order, then lines.
pub fn build_scene(
    data: &SceneData,
    file: &Path,
    catalog: Catalog,
    config: EngineConfig,
) -> Result<Scene, DataLoadError> {
    let invalid = |detail: String| DataLoadError::Invalid {
        file: file.to_path_buf(),
        detail,
    };
    let connector_error = |source: ConnectorError| DataLoadError::Connector {
        file: file.to_path_buf(),
        source,
    };

    let cell_size = Fixed64::checked_from_num(data.cell_size)
        .ok_or_else(|| invalid(format!("cell size {} is not representable", data.cell_size)))?;
    let names: HashMap<String, DescriptorId> = catalog.iter().map(|(id, d)| (d.name.clone(), id)).collect();
    let mut engine = Engine::with_grid(
        data.width,
        data.height,
        cell_size,
        catalog,
        config,
    )
    .map_err(|e| invalid(e.to_string()))?;
    let mut network = ConnectorNetwork::new();

    for p in &data.placements {
        let desc = *resolve_name(&names, &p.descriptor, file, "descriptor")?;
        let placed = match p.facing {
            Some(facing) => network.place_facing(&mut engine, desc, p.x, p.y, facing),
            None => network.place(&mut engine, desc, p.x, p.y),
        };
        placed.map_err(connector_error)?;
    }

    for line in &data.lines {
        let (fx, fy) = line.from;
        let (tx, ty) = line.to;
        let from = engine
            .structure_at(fx, fy)
            .ok_or_else(|| invalid(format!("line starts on empty tile ({fx}, {fy})")))?;
        let to = engine
            .structure_at(tx, ty)
            .ok_or_else(|| invalid(format!("line ends on empty tile ({tx}, {ty})")))?;
        network.create_line(from).map_err(connector_error)?;
        network.attach_line(&mut engine, to).map_err(connector_error)?;
    }

    log::info!(
        "built {}x{} scene with {} structures and {} lines from {}",
        data.width,
        data.height,
        engine.structure_count(),
        data.lines.len(),
        file.display()
    );
    Ok(Scene { engine, network })
}

/// Load `scene.{ron,toml,json}` from `dir`, if present.
pub fn load_scene(dir: &Path, catalog: &Catalog, config: &EngineConfig) -> Result<Option<Scene>, DataLoadError> {
    let Some(path) = find_data_file(dir, "scene")? else {
        return Ok(None);
    };
    let data: SceneData = deserialize_file(&path)?;
    build_scene(&data, &path, catalog.clone(), config.clone()).map(Some)
}

// ===========================================================================
// Everything
// ===========================================================================

/// Catalog, config and optional scene loaded from one directory.
pub struct GameData {
    pub catalog: Catalog,
    pub config: EngineConfig,
    pub scene: Option<Scene>,
}

/// Load every data file from `dir`. Only the descriptors are required.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let catalog = load_catalog(dir)?;
    let config = load_config(dir)?;
    let scene = load_scene(dir, &catalog, &config)?;
    Ok(GameData {
        catalog,
        config,
        scene,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tilechain_core::grid::Direction;
    use tilechain_core::payload::PayloadState;
    use tilechain_core::test_utils::{run, strawberry};

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tilechain_data_test_{suffix}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const DESCRIPTORS_RON: &str = r#"[
        (name: "belt", width: 1, height: 1, role: conveyor, facing: Some(East)),
        (name: "lift", width: 1, height: 1, role: conveyor, needs_power: true, connectable: true),
        (name: "oven", width: 2, height: 2, role: station, hold_items: true, animation_frames: Some(8)),
        (name: "cell", width: 1, height: 1, role: power_source, connector: Some((max_lines: 2, range: 3))),
        (name: "table", width: 2, height: 2, role: fixture),
    ]"#;

    // -----------------------------------------------------------------------
    // Format and discovery
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("a.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("a.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("a.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("a.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("descriptors")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("find_conflict");
        fs::write(dir.join("scene.ron"), "()").unwrap();
        fs::write(dir.join("scene.json"), "{}").unwrap();

        let result = find_data_file(&dir, "scene");
        assert!(matches!(result, Err(DataLoadError::ConflictingFormats { .. })));

        cleanup(&dir);
    }

    #[test]
    fn missing_descriptors_is_an_error() {
        let dir = make_test_dir("missing_descriptors");

        let result = load_catalog(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::MissingRequired { ref file, .. }) if file == "descriptors"
        ));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    #[test]
    fn load_catalog_ron() {
        let dir = make_test_dir("catalog_ron");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();

        let catalog = load_catalog(&dir).unwrap();
        assert_eq!(catalog.len(), 5);
        let oven = catalog.by_name("oven").unwrap();
        assert_eq!(oven.animation_frames, 8);
        assert!(catalog.by_name("cell").unwrap().is_power_source());
        assert!(catalog.by_name("lift").unwrap().connectable);

        cleanup(&dir);
    }

    #[test]
    fn load_catalog_toml() {
        let dir = make_test_dir("catalog_toml");
        fs::write(
            dir.join("descriptors.toml"),
            r#"
[[descriptors]]
name = "belt"
width = 1
height = 1
role = "conveyor"
facing = "North"
move_steps = 4

[[descriptors]]
name = "cell"
width = 1
height = 1
role = "power_source"
connector = { max_lines = 3, range = 2 }
"#,
        )
        .unwrap();

        let catalog = load_catalog(&dir).unwrap();
        let belt = catalog.by_name("belt").unwrap();
        assert!(matches!(
            belt.role,
            tilechain_core::catalog::Role::Conveyor {
                facing: Direction::North,
                move_steps: Some(4),
                ..
            }
        ));
        assert_eq!(catalog.by_name("cell").unwrap().connector.unwrap().max_lines, 3);

        cleanup(&dir);
    }

    #[test]
    fn load_catalog_json() {
        let dir = make_test_dir("catalog_json");
        fs::write(
            dir.join("descriptors.json"),
            r#"[{"name": "fence", "width": 1, "height": 1, "role": "fixture"}]"#,
        )
        .unwrap();

        assert_eq!(load_catalog(&dir).unwrap().len(), 1);

        cleanup(&dir);
    }

    #[test]
    fn duplicate_descriptor_names_rejected() {
        let dir = make_test_dir("catalog_dup");
        fs::write(
            dir.join("descriptors.json"),
            r#"[
                {"name": "fence", "width": 1, "height": 1, "role": "fixture"},
                {"name": "fence", "width": 2, "height": 1, "role": "fixture"}
            ]"#,
        )
        .unwrap();

        let result = load_catalog(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::DuplicateName { ref name, .. }) if name == "fence"
        ));

        cleanup(&dir);
    }

    #[test]
    fn empty_footprint_rejected_with_file() {
        let dir = make_test_dir("catalog_empty");
        fs::write(
            dir.join("descriptors.json"),
            r#"[{"name": "ghost", "width": 0, "height": 1, "role": "fixture"}]"#,
        )
        .unwrap();

        let err = load_catalog(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::Catalog { .. }));
        assert!(err.to_string().contains("descriptors.json"));

        cleanup(&dir);
    }

    #[test]
    fn toml_without_key_is_parse_error() {
        let dir = make_test_dir("catalog_toml_key");
        fs::write(dir.join("descriptors.toml"), r#"foo = "bar""#).unwrap();

        assert!(matches!(load_catalog(&dir), Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Config
    // -----------------------------------------------------------------------

    #[test]
    fn config_defaults_when_absent() {
        let dir = make_test_dir("config_absent");
        assert_eq!(load_config(&dir).unwrap(), EngineConfig::default());
        cleanup(&dir);
    }

    #[test]
    fn partial_config_file() {
        let dir = make_test_dir("config_partial");
        fs::write(dir.join("engine.toml"), "move_steps = 4\nbreak_grace_steps = 2\n").unwrap();

        let config = load_config(&dir).unwrap();
        assert_eq!(config.move_steps, 4);
        assert_eq!(config.break_grace_steps, 2);
        assert_eq!(config.traversal_ticks, EngineConfig::default().traversal_ticks);

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Scene
    // -----------------------------------------------------------------------

    #[test]
    fn scene_places_and_powers() {
        let dir = make_test_dir("scene_full");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();
        fs::write(
            dir.join("scene.ron"),
            r#"(
                width: 8,
                height: 4,
                placements: [
                    (descriptor: "cell", x: 0, y: 0),
                    (descriptor: "lift", x: 1, y: 0),
                    (descriptor: "belt", x: 2, y: 0),
                    (descriptor: "table", x: 4, y: 3, facing: None),
                ],
                lines: [(from: (0, 0), to: (1, 0))],
            )"#,
        )
        .unwrap();

        let data = load_game_data(&dir).unwrap();
        let Scene { mut engine, network } = data.scene.unwrap();
        assert_eq!(engine.structure_count(), 4);
        let lift = engine.structure_at(1, 0).unwrap();
        assert!(engine.structure(lift).unwrap().is_powered());
        assert_eq!(network.attached_to(lift).len(), 1);
        assert!(network.dragging().is_none());

        let belt = engine.structure_at(2, 0).unwrap();
        assert_eq!(engine.find_next_mover(lift), Some(belt));
        let p = engine.spawn_payload(lift, strawberry()).unwrap();
        assert_eq!(engine.payload(p).unwrap().state(), PayloadState::Moving);
        run(&mut engine, 33);
        assert_eq!(engine.payload(p).unwrap().owner(), belt);

        cleanup(&dir);
    }

    #[test]
    fn scene_is_optional() {
        let dir = make_test_dir("scene_absent");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();

        let data = load_game_data(&dir).unwrap();
        assert!(data.scene.is_none());
        assert_eq!(data.catalog.len(), 5);

        cleanup(&dir);
    }

    #[test]
    fn scene_unknown_descriptor() {
        let dir = make_test_dir("scene_unknown");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();
        fs::write(
            dir.join("scene.json"),
            r#"{"width": 4, "height": 4, "placements": [{"descriptor": "anvil", "x": 0, "y": 0}]}"#,
        )
        .unwrap();

        let result = load_game_data(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::UnresolvedRef { ref name, expected_kind: "descriptor", .. }) if name == "anvil"
        ));

        cleanup(&dir);
    }

    #[test]
    fn scene_overlap_reports_placement() {
        let dir = make_test_dir("scene_overlap");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();
        fs::write(
            dir.join("scene.json"),
            r#"{"width": 4, "height": 4, "placements": [
                {"descriptor": "table", "x": 0, "y": 1},
                {"descriptor": "belt", "x": 1, "y": 0}
            ]}"#,
        )
        .unwrap();

        let Err(err) = load_game_data(&dir) else {
            panic!("overlapping scene loaded");
        };
        assert!(matches!(err, DataLoadError::Connector { .. }));
        assert!(err.to_string().contains("scene.json"));

        cleanup(&dir);
    }

    #[test]
    fn scene_odd_grid_is_invalid() {
        let dir = make_test_dir("scene_odd");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();
        fs::write(dir.join("scene.json"), r#"{"width": 3, "height": 4}"#).unwrap();

        assert!(matches!(load_game_data(&dir), Err(DataLoadError::Invalid { .. })));

        cleanup(&dir);
    }

    #[test]
    fn scene_huge_cell_size_is_invalid() {
        let dir = make_test_dir("scene_cell_size");
        fs::write(dir.join("descriptors.ron"), DESCRIPTORS_RON).unwrap();
        fs::write(
            dir.join("scene.json"),
            r#"{"width": 4, "height": 4, "cell_size": 1e20}"#,
        )
        .unwrap();

        let Err(err) = load_game_data(&dir) else {
            panic!("scene with an unrepresentable cell size loaded");
        };
        assert!(matches!(err, DataLoadError::Invalid { .. }));
        assert!(err.to_string().contains("cell size"));

        cleanup(&dir);
    }

    #[test]
    fn oversized_footprint_rejected_with_file() {
        let dir = make_test_dir("catalog_oversized");
        fs::write(
            dir.join("descriptors.json"),
            r#"[{"name": "runway", "width": 4294967295, "height": 1, "role": "fixture"}]"#,
        )
        .unwrap();

        let err = load_catalog(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::Catalog {
                source: CatalogError::OversizedFootprint(_),
                ..
            }
        ));

        cleanup(&dir);
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let data_err: DataLoadError = io_err.into();
        assert!(matches!(data_err, DataLoadError::Io(_)));
    }
}

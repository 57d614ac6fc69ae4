//! Model directory layout: `model.json` plus the database file it names

use crate::config::{ModelConfig, MODEL_FILE};
use crate::error::{Error, Result};
use crate::model::{Database, Model};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Read a JSON file, mapping a missing file to [`Error::NotFound`]
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::not_found("file", path.display()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Write JSON to a temporary sibling, then rename it over `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Other(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Load a model directory
pub fn read_model(dir: &Path) -> Result<(ModelConfig, Model)> {
    let config: ModelConfig = read_json(&dir.join(MODEL_FILE))?;
    config.validate()?;
    let database: Database = read_json(&dir.join(&config.database))?;
    let model = Model::from_database(database)?;
    info!(
        "loaded model '{}' from {}: {} nodes, {} links",
        config.name,
        dir.display(),
        model.node_count(),
        model.link_count()
    );
    Ok((config, model))
}

/// Write a model directory. Link geometries are re-snapped to their nodes first.
pub fn write_model(dir: &Path, config: &ModelConfig, model: &mut Model) -> Result<()> {
    model.snap_links();
    fs::create_dir_all(dir)?;
    write_json_atomic(&dir.join(&config.database), &model.to_database())?;
    write_json_atomic(&dir.join(MODEL_FILE), config)?;
    info!("wrote model '{}' to {}", config.name, dir.display());
    Ok(())
}

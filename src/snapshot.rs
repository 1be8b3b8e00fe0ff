use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Load a snapshot that the caller cannot do without.
pub fn load_required<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(anyhow!("Input file not found: {}", path.display()));
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load a snapshot where absence or corruption just means "nothing known yet".
pub fn load_or_empty<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.exists() {
        debug!(path = %path.display(), "no snapshot yet");
        return Vec::new();
    }
    match load_required(path) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{:#}", e), "ignoring unreadable snapshot");
            Vec::new()
        }
    }
}

/// Rewrite the whole snapshot as pretty-printed JSON.
///
/// Writes to a sibling temp file first and renames it over the target, so a
/// crash mid-write leaves the previous snapshot intact.
pub fn save<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(records)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    let temp_path = temp_path_for(path);
    fs::write(&temp_path, json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

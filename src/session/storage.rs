//! File I/O for session persistence
//!
//! Sessions are stored in `~/.config/ptyhost/session.bin`

use super::SessionSnapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the path to the session file
pub fn session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptyhost")
        .join("session.bin")
}

/// Save a snapshot to a specific file
pub fn save_session_to(snapshot: &SessionSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let bytes = snapshot.encode().context("Failed to encode session")?;

    // Readers only ever see the old file or the complete new one
    let temp_path = path.with_extension("bin.tmp");
    fs::write(&temp_path, &bytes)
        .with_context(|| format!("Failed to write session to {:?}", temp_path))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace session file {:?}", path))?;

    log::info!(
        "Saved session ({} windows, {} tabs) to {:?}",
        snapshot.windows.len(),
        snapshot.tab_count(),
        path
    );
    Ok(())
}

/// Load a snapshot from a specific file
///
/// Returns `None` if the file doesn't exist or is empty.
/// Returns an error if the file exists but cannot be decoded.
pub fn load_session_from(path: &Path) -> Result<Option<SessionSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes =
        fs::read(path).with_context(|| format!("Failed to read session from {:?}", path))?;
    if bytes.is_empty() {
        return Ok(None);
    }

    let snapshot = SessionSnapshot::decode(&bytes)
        .with_context(|| format!("Failed to decode session from {:?}", path))?;

    log::info!(
        "Loaded session ({} windows, {} tabs) from {:?}",
        snapshot.windows.len(),
        snapshot.tab_count(),
        path
    );
    Ok(Some(snapshot))
}

/// Remove the session file if there is one
pub fn clear_session_at(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove session file {:?}", path))?;
    }
    Ok(())
}

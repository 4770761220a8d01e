//! Global settings and their YAML persistence.
//!
//! Settings live in `~/.config/ptyhost/settings.yaml` (via `dirs::config_dir`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::profile::{Profile, ProfileId};
use crate::types::{GridSize, NewTabPosition};

fn default_true() -> bool {
    true
}

/// Application-wide settings, including every profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Save every tab on exit and bring it back on the next start
    #[serde(default = "default_true")]
    pub restore_session: bool,

    /// Apply the saved grid size of each restored tab
    #[serde(default = "default_true")]
    pub restore_window_size: bool,

    #[serde(default)]
    pub default_size: GridSize,

    #[serde(default)]
    pub new_tab_position: NewTabPosition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<ProfileId>,

    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self {
            restore_session: true,
            restore_window_size: true,
            default_size: GridSize::default(),
            new_tab_position: NewTabPosition::default(),
            default_profile: None,
            profiles: Vec::new(),
        };
        settings.ensure_default_profile();
        settings
    }
}

impl Settings {
    /// Get the settings file path
    pub fn settings_path() -> PathBuf {
        Self::settings_dir().join("settings.yaml")
    }

    /// Get the per-application configuration directory
    pub fn settings_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ptyhost")
    }

    /// Load settings from a file, creating defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Settings file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(ConfigError::from)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let mut settings: Settings = serde_yaml_ng::from_str(&contents)
            .map_err(ConfigError::from)
            .with_context(|| format!("Failed to parse settings from {:?}", path))?;
        settings.validate().map_err(anyhow::Error::from)?;
        settings.ensure_default_profile();

        log::info!(
            "Loaded settings ({} profiles) from {:?}",
            settings.profiles.len(),
            path
        );
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let yaml = serde_yaml_ng::to_string(self).context("Failed to serialize settings")?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml)
            .with_context(|| format!("Failed to write settings to {:?}", temp_path))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace settings file {:?}", path))?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_size.columns == 0 || self.default_size.rows == 0 {
            return Err(ConfigError::Validation(format!(
                "default_size must be non-zero, got {}x{}",
                self.default_size.columns, self.default_size.rows
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.uuid) {
                return Err(ConfigError::Validation(format!(
                    "duplicate profile uuid {}",
                    profile.uuid
                )));
            }
        }
        Ok(())
    }

    /// Make sure at least one profile exists and `default_profile` names one.
    pub fn ensure_default_profile(&mut self) {
        if self.profiles.is_empty() {
            self.profiles.push(Profile::new("Default"));
        }
        let valid = self
            .default_profile
            .is_some_and(|id| self.profiles.iter().any(|p| p.uuid == id));
        if !valid {
            self.default_profile = Some(self.profiles[0].uuid);
        }
    }

    pub fn profile(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| &p.uuid == id)
    }

    /// The default profile. [`Settings::ensure_default_profile`] keeps this total.
    pub fn default_profile(&self) -> Profile {
        self.default_profile
            .and_then(|id| self.profile(&id))
            .or_else(|| self.profiles.first())
            .cloned()
            .unwrap_or_else(|| Profile::new("Default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitAction, PreserveDirectory};
    use tempfile::tempdir;

    #[test]
    fn test_default_settings_have_a_default_profile() {
        let settings = Settings::default();
        assert_eq!(settings.profiles.len(), 1);
        assert_eq!(settings.default_profile, Some(settings.profiles[0].uuid));
        assert!(settings.restore_session);
        assert!(settings.restore_window_size);
    }

    #[test]
    fn test_load_nonexistent_file_gives_defaults() {
        let temp = tempdir().unwrap();
        let settings = Settings::load_from(&temp.path().join("missing.yaml")).unwrap();
        assert_eq!(settings.profiles.len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("settings.yaml");

        let mut settings = Settings::default();
        settings.restore_session = false;
        settings.default_size = GridSize::new(120, 40);
        let mut work = Profile::new("Work");
        work.exit_action = ExitAction::Restart;
        work.preserve_directory = PreserveDirectory::Always;
        settings.profiles.push(work.clone());

        settings.save_to(&path).unwrap();
        assert!(!path.with_extension("yaml.tmp").exists());

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.profile(&work.uuid), Some(&work));
    }

    #[test]
    fn test_corrupt_file_is_a_parse_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.yaml");
        std::fs::write(&path, "profiles: [[[").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.yaml");
        std::fs::write(&path, "default_size:\n  columns: 0\n  rows: 24\n").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_dangling_default_profile_is_repaired() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.yaml");
        std::fs::write(
            &path,
            "default_profile: 00000000-0000-0000-0000-000000000001\n",
        )
        .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.default_profile, Some(settings.profiles[0].uuid));
    }
}

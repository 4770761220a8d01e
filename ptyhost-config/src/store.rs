//! The settings collaborator consumed by the process-supervision core.

use std::path::PathBuf;

use parking_lot::RwLock;

use crate::profile::{Profile, ProfileId};
use crate::settings::Settings;
use crate::types::{GridSize, NewTabPosition};

/// Typed access to global settings and profiles.
///
/// Setters persist immediately when the store is backed by a file.
pub trait SettingsStore: Send + Sync {
    fn restore_session(&self) -> bool;
    fn set_restore_session(&self, value: bool);

    fn restore_window_size(&self) -> bool;
    fn set_restore_window_size(&self, value: bool);

    fn default_size(&self) -> GridSize;
    fn set_default_size(&self, size: GridSize);

    fn new_tab_position(&self) -> NewTabPosition;
    fn set_new_tab_position(&self, position: NewTabPosition);

    /// Profile used when no other is requested or a reference is dangling.
    fn default_profile(&self) -> Profile;

    fn profile(&self, id: &ProfileId) -> Option<Profile>;

    /// Insert or replace a profile by uuid.
    fn save_profile(&self, profile: Profile);

    fn profiles(&self) -> Vec<Profile>;
}

/// In-memory settings with an optional backing file.
pub struct SharedSettings {
    inner: RwLock<Settings>,
    path: Option<PathBuf>,
}

impl SharedSettings {
    /// Settings that are never written anywhere.
    pub fn in_memory(settings: Settings) -> Self {
        let mut settings = settings;
        settings.ensure_default_profile();
        Self {
            inner: RwLock::new(settings),
            path: None,
        }
    }

    /// Load from `path` and write every change back to it.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let settings = Settings::load_from(&path)?;
        Ok(Self {
            inner: RwLock::new(settings),
            path: Some(path),
        })
    }

    /// Load from the standard location.
    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(Settings::settings_path())
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) {
        let snapshot = {
            let mut settings = self.inner.write();
            f(&mut settings);
            settings.clone()
        };
        if let Some(path) = &self.path
            && let Err(e) = snapshot.save_to(path)
        {
            log::error!("Failed to save settings: {e:#}");
        }
    }
}

impl SettingsStore for SharedSettings {
    fn restore_session(&self) -> bool {
        self.inner.read().restore_session
    }

    fn set_restore_session(&self, value: bool) {
        self.update(|s| s.restore_session = value);
    }

    fn restore_window_size(&self) -> bool {
        self.inner.read().restore_window_size
    }

    fn set_restore_window_size(&self, value: bool) {
        self.update(|s| s.restore_window_size = value);
    }

    fn default_size(&self) -> GridSize {
        self.inner.read().default_size
    }

    fn set_default_size(&self, size: GridSize) {
        self.update(|s| s.default_size = size);
    }

    fn new_tab_position(&self) -> NewTabPosition {
        self.inner.read().new_tab_position
    }

    fn set_new_tab_position(&self, position: NewTabPosition) {
        self.update(|s| s.new_tab_position = position);
    }

    fn default_profile(&self) -> Profile {
        self.inner.read().default_profile()
    }

    fn profile(&self, id: &ProfileId) -> Option<Profile> {
        self.inner.read().profile(id).cloned()
    }

    fn save_profile(&self, profile: Profile) {
        self.update(|s| {
            match s.profiles.iter_mut().find(|p| p.uuid == profile.uuid) {
                Some(existing) => *existing = profile,
                None => s.profiles.push(profile),
            }
        });
    }

    fn profiles(&self) -> Vec<Profile> {
        self.inner.read().profiles.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_setters_persist_to_backing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.yaml");

        let store = SharedSettings::open(path.clone()).unwrap();
        store.set_restore_session(false);
        store.set_default_size(GridSize::new(100, 30));

        let reloaded = SharedSettings::open(path).unwrap();
        assert!(!reloaded.restore_session());
        assert_eq!(reloaded.default_size(), GridSize::new(100, 30));
        assert_eq!(
            reloaded.default_profile().uuid,
            store.default_profile().uuid
        );
    }

    #[test]
    fn test_save_profile_replaces_by_uuid() {
        let store = SharedSettings::in_memory(Settings::default());
        let mut profile = store.default_profile();
        profile.login_shell = true;
        store.save_profile(profile.clone());

        assert_eq!(store.profiles().len(), 1);
        assert!(store.profile(&profile.uuid).unwrap().login_shell);

        store.save_profile(Profile::new("Second"));
        assert_eq!(store.profiles().len(), 2);
    }
}

//! Session persistence: save the window and tab topology on shutdown and
//! rebuild it on the next launch.
//!
//! - [`capture`] walks the live [`Topology`] into a [`SessionSnapshot`]
//! - [`storage`] reads and writes the session file
//! - [`restore`] turns a snapshot back into windows and tabs
//!
//! On disk a session is the [`MAGIC`] bytes followed by the snapshot as
//! CBOR. Reading is lenient below the version check: unknown keys are
//! ignored and malformed windows or tabs are skipped.
//!
//! [`SessionStore`] ties the pieces to one file path.

pub mod capture;
pub mod restore;
pub mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ptyhost_config::GridSize;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::supervisor::ProcessSupervisor;
use crate::window::Topology;

/// Format version written by this build. Other versions are not restored.
pub const SESSION_VERSION: u32 = 1;

/// Leading bytes of every session file.
pub const MAGIC: &[u8; 4] = b"PTYS";

/// Everything needed to rebuild the windows of a previous run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Zero when the file did not record one.
    #[serde(default)]
    pub version: u32,
    #[serde(default, deserialize_with = "skip_malformed")]
    pub windows: Vec<WindowSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSnapshot {
    #[serde(skip_serializing_if = "is_false")]
    pub maximized: bool,
    #[serde(deserialize_with = "skip_malformed")]
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabSnapshot {
    /// Profile uuid as text; an unknown or malformed one restores with the
    /// default profile.
    pub profile: String,
    pub pinned: bool,
    /// Written as `[columns, rows]`
    #[serde(serialize_with = "write_size", deserialize_with = "read_size")]
    pub size: GridSize,
    /// Only recorded when not at the default level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<u32>,
    pub active: bool,
    #[serde(
        rename = "window-title",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty"
    )]
    pub window_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub cwd: Option<String>,
    /// Only recorded when it differs from the profile's default container
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub container: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            version: SESSION_VERSION,
            windows: Vec::new(),
        }
    }
}

impl SessionSnapshot {
    pub fn tab_count(&self) -> usize {
        self.windows.iter().map(|w| w.tabs.len()).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| Error::SessionEncode(e.to_string()))?;
        Ok(bytes)
    }

    /// Read a session file. The version must be present and current.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| Error::RestoreDecode("not a session file".into()))?;
        let snapshot: Self =
            ciborium::from_reader(body).map_err(|e| Error::RestoreDecode(e.to_string()))?;
        match snapshot.version {
            SESSION_VERSION => Ok(snapshot),
            0 => Err(Error::RestoreDecode("missing session version".into())),
            version => Err(Error::RestoreDecode(format!(
                "unsupported session version {version}"
            ))),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Deserialize a list, dropping the entries that do not fit `T`.
fn skip_malformed<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry<T> {
        Valid(T),
        Malformed(IgnoredAny),
    }

    let entries = Vec::<Entry<T>>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::Valid(item) => Some(item),
            Entry::Malformed(_) => None,
        })
        .collect())
}

/// A string where empty means absent.
fn non_empty<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

fn write_size<S>(size: &GridSize, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    (size.columns, size.rows).serialize(serializer)
}

/// `[columns, rows]`, falling back to the default size for a zero or
/// malformed entry.
fn read_size<'de, D>(deserializer: D) -> std::result::Result<GridSize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Dimensions {
        Pair(u32, u32),
        Other(IgnoredAny),
    }

    Ok(match Dimensions::deserialize(deserializer)? {
        Dimensions::Pair(columns, rows) if columns > 0 && rows > 0 => {
            GridSize::new(columns, rows)
        }
        _ => GridSize::default(),
    })
}

/// The session file of one application instance.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(storage::session_path())
    }
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture `topology` and write it out.
    pub fn save(&self, topology: &Topology, supervisor: &ProcessSupervisor) -> anyhow::Result<()> {
        let snapshot = capture::capture(
            topology,
            supervisor.settings().as_ref(),
            supervisor.registry(),
        );
        storage::save_session_to(&snapshot, &self.path)
    }

    /// The saved snapshot, or `None` when there is nothing usable on disk.
    pub fn load(&self) -> Option<SessionSnapshot> {
        match storage::load_session_from(&self.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Ignoring saved session: {e:#}");
                None
            }
        }
    }

    /// Rebuild the saved windows into `topology`.
    ///
    /// Returns whether any window was created. Every failure degrades to
    /// `false` so the caller can open a fresh window instead.
    pub fn restore(&self, supervisor: &Arc<ProcessSupervisor>, topology: &mut Topology) -> bool {
        let Some(snapshot) = self.load() else {
            return false;
        };
        match restore::restore(&snapshot, supervisor, topology) {
            Ok(created) => created,
            Err(e) => {
                log::warn!("Failed to restore session: {e}");
                false
            }
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        storage::clear_session_at(&self.path)
    }
}

//! Settings and profiles for ptyhost.
//!
//! - [`Settings`]: global settings plus every profile, stored as YAML
//! - [`Profile`]: per-profile launch and exit behaviour
//! - [`SettingsStore`]: the typed interface the supervision core consumes,
//!   implemented by [`SharedSettings`]

pub mod error;
pub mod profile;
pub mod settings;
pub mod store;
mod types;

pub use error::ConfigError;
pub use profile::{DEFAULT_CONTAINER, Profile, ProfileId};
pub use settings::Settings;
pub use store::{SettingsStore, SharedSettings};
pub use types::{ExitAction, GridSize, NewTabPosition, PreserveDirectory};

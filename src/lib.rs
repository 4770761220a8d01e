// Process supervision and session persistence for a containers-aware
// terminal emulator.
//
// # Lock Usage Policy
//
//   - `parking_lot::Mutex` / `RwLock`: all sync state (tab fields, registry,
//     parking lot). Never held across `.await`.
//   - `tokio::sync::Mutex`: only where a lock must span an RPC, e.g. one
//     foreground poll per tab.
//
// The core assumes one tokio runtime. Tabs, the supervisor and the
// connection spawn their tasks onto it.

/// Library version, exported to spawned processes as `PTYHOST_VERSION`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod connection;
pub mod containers;
pub mod error;
pub mod observers;
pub mod parked;
pub mod scheduler;
pub mod session;
pub mod shell;
pub mod supervisor;
pub mod surface;
pub mod tab;
pub mod window;
pub mod zoom;

pub use connection::{AgentConnection, LeaderKind, Pty, RemoteProcess, SpawnRequest, WaitStatus};
pub use containers::{Container, ContainerRegistry};
pub use error::{Error, Result};
pub use parked::ParkingLot;
pub use session::{SessionSnapshot, SessionStore};
pub use supervisor::{CloseOutcome, ProcessSupervisor};
pub use surface::{NullSurface, Surface};
pub use tab::{Banner, BannerAction, KeyPress, Tab, TabEvent, TabId, TabOptions, TabState};
pub use window::{Topology, Window, WindowId};
pub use zoom::Zoom;

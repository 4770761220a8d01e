//! Helper process for ptyhost.
//!
//! The application starts `ptyhost-agent --socket-fd=3` with one end of a
//! seqpacket socket pair. Over it the helper allocates PTYs, spawns
//! processes into the host session or a podman container, reports their
//! exits, and answers foreground-process queries.

pub mod container;
pub mod logging;
pub mod process;
pub mod proxy;
pub mod pty;
mod server;

use std::os::fd::OwnedFd;

use anyhow::Context;
use ptyhost_ipc::Connection;

pub use server::Agent;

/// Serve the application on `socket` until it hangs up.
pub async fn serve(socket: OwnedFd) -> anyhow::Result<()> {
    let (rpc, incoming) =
        Connection::new(socket).context("Failed to set up the application socket")?;
    Agent::new(rpc).run(incoming).await;
    Ok(())
}

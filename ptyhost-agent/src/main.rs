use std::os::fd::{FromRawFd, OwnedFd};

use anyhow::{Context, bail};
use clap::Parser;

/// Helper process for ptyhost: creates PTYs and spawns processes on request.
#[derive(Parser, Debug)]
#[command(name = "ptyhost-agent", version, about)]
struct Cli {
    /// Descriptor of the already-connected seqpacket socket
    #[arg(long = "socket-fd", value_name = "FD")]
    socket_fd: i32,
}

fn main() -> anyhow::Result<()> {
    ptyhost_agent::logging::init();
    let cli = Cli::parse();

    if cli.socket_fd < 0 {
        bail!("--socket-fd must be a valid descriptor, got {}", cli.socket_fd);
    }
    // SAFETY: the launcher hands this descriptor to us and nothing else in
    // the process refers to it.
    let socket = unsafe { OwnedFd::from_raw_fd(cli.socket_fd) };

    log::info!(
        "ptyhost-agent {} starting on fd {}",
        env!("CARGO_PKG_VERSION"),
        cli.socket_fd
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(ptyhost_agent::serve(socket))
}

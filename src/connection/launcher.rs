//! Starting the helper process.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use tokio::process::{Child, Command};

/// Descriptor number the helper finds its socket on.
pub const HELPER_SOCKET_FD: RawFd = 3;

const AGENT_BINARY: &str = "ptyhost-agent";
const SYSTEM_AGENT_PATH: &str = "/usr/libexec/ptyhost-agent";
const SANDBOXED_AGENT_PATH: &str = "/app/libexec/ptyhost-agent";

/// Whether this process runs inside a Flatpak sandbox.
pub fn in_flatpak() -> bool {
    static IN_FLATPAK: OnceLock<bool> = OnceLock::new();
    *IN_FLATPAK.get_or_init(|| Path::new("/.flatpak-info").exists())
}

/// Where the helper runs relative to our own confinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// On the host, escaping the sandbox when there is one.
    Host,
    /// Inside our own sandbox.
    Sandboxed,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub agent_path: PathBuf,
    pub sandboxed_agent_path: PathBuf,
    pub flatpak: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            agent_path: default_agent_path(),
            sandboxed_agent_path: PathBuf::from(SANDBOXED_AGENT_PATH),
            flatpak: in_flatpak(),
        }
    }
}

/// `PTYHOST_AGENT_PATH`, else next to the running executable, else the
/// system location.
fn default_agent_path() -> PathBuf {
    if let Some(path) = std::env::var_os("PTYHOST_AGENT_PATH").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(AGENT_BINARY)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_AGENT_PATH))
}

impl LaunchOptions {
    /// Use a specific helper binary for both strategies.
    pub fn with_agent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            agent_path: path.clone(),
            sandboxed_agent_path: path,
            flatpak: false,
        }
    }

    /// Full command line for `strategy`.
    pub fn argv(&self, strategy: LaunchStrategy) -> Vec<OsString> {
        let socket_arg = OsString::from(format!("--socket-fd={HELPER_SOCKET_FD}"));
        match (strategy, self.flatpak) {
            (LaunchStrategy::Host, true) => vec![
                "flatpak-spawn".into(),
                "--host".into(),
                "--watch-bus".into(),
                format!("--forward-fd={HELPER_SOCKET_FD}").into(),
                self.agent_path.clone().into_os_string(),
                socket_arg,
            ],
            (LaunchStrategy::Host, false) => {
                vec![self.agent_path.clone().into_os_string(), socket_arg]
            }
            (LaunchStrategy::Sandboxed, true) => {
                vec![self.sandboxed_agent_path.clone().into_os_string(), socket_arg]
            }
            (LaunchStrategy::Sandboxed, false) => {
                vec![self.agent_path.clone().into_os_string(), socket_arg]
            }
        }
    }
}

/// Start the helper with `theirs` installed as its descriptor 3.
///
/// The helper runs in its own session and is killed when we exit.
pub fn spawn_helper(
    options: &LaunchOptions,
    strategy: LaunchStrategy,
    theirs: OwnedFd,
) -> io::Result<Child> {
    let argv = options.argv(strategy);
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty helper argv"));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true);

    let raw = theirs.as_raw_fd();
    // SAFETY: only async-signal-safe libc calls run between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) < 0 {
                return Err(io::Error::last_os_error());
            }
            if raw == HELPER_SOCKET_FD {
                let flags = libc::fcntl(raw, libc::F_GETFD);
                if flags < 0
                    || libc::fcntl(raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(raw, HELPER_SOCKET_FD) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    log::info!(
        "Started helper ({strategy:?}) {:?} pid={:?}",
        argv,
        child.id()
    );
    drop(theirs);
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(flatpak: bool) -> LaunchOptions {
        LaunchOptions {
            agent_path: PathBuf::from("/usr/libexec/ptyhost-agent"),
            sandboxed_agent_path: PathBuf::from(SANDBOXED_AGENT_PATH),
            flatpak,
        }
    }

    #[test]
    fn test_host_strategy_escapes_flatpak() {
        let argv = options(true).argv(LaunchStrategy::Host);
        assert_eq!(
            argv,
            vec![
                "flatpak-spawn",
                "--host",
                "--watch-bus",
                "--forward-fd=3",
                "/usr/libexec/ptyhost-agent",
                "--socket-fd=3",
            ]
        );
    }

    #[test]
    fn test_sandboxed_strategy_uses_bundled_agent() {
        let argv = options(true).argv(LaunchStrategy::Sandboxed);
        assert_eq!(argv, vec![SANDBOXED_AGENT_PATH, "--socket-fd=3"]);
    }

    #[test]
    fn test_outside_flatpak_runs_agent_directly() {
        let opts = options(false);
        let expected = vec!["/usr/libexec/ptyhost-agent", "--socket-fd=3"];
        assert_eq!(opts.argv(LaunchStrategy::Host), expected);
        assert_eq!(opts.argv(LaunchStrategy::Sandboxed), expected);
    }
}

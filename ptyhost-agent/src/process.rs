//! Spawning processes on a PTY and inspecting their foreground group.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ptyhost_ipc::protocol::ForegroundProcessResult;
use tokio::process::{Child, Command};

const MAX_CMDLINE: usize = 1024;

const CONTAINER_LAUNCHERS: &[&str] = &["docker", "flatpak", "podman", "toolbox"];
const REMOTE_CLIENTS: &[&str] = &[
    "ssh",
    "mosh",
    "mosh-client",
    "rlogin",
    "scp",
    "sftp",
    "slogin",
    "telnet",
];

/// Everything needed to start one child.
#[derive(Debug, Default)]
pub struct RunPlan {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Child descriptor number and the descriptor to install there.
    pub fds: Vec<(RawFd, OwnedFd)>,
}

impl RunPlan {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }
}

/// Split `KEY=VALUE` entries, dropping malformed ones.
pub fn parse_env(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Start `plan` as a session leader whose controlling terminal is its fd 0.
pub fn spawn(plan: RunPlan) -> io::Result<Child> {
    let Some((program, args)) = plan.argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty argv"));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in &plan.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = plan.cwd.as_deref().filter(|cwd| cwd.is_dir()) {
        cmd.current_dir(cwd);
    }

    let mut has_tty = false;
    let mut extra: Vec<(RawFd, OwnedFd)> = Vec::new();
    let highest_dest = plan.fds.iter().map(|(dest, _)| *dest).max().unwrap_or(2);
    for (dest, fd) in plan.fds {
        match dest {
            0 => {
                has_tty = true;
                cmd.stdin(Stdio::from(fd));
            }
            1 => {
                cmd.stdout(Stdio::from(fd));
            }
            2 => {
                cmd.stderr(Stdio::from(fd));
            }
            _ => {
                // Move out of the way of every destination so dup2 in the
                // child never clobbers a source that is still needed.
                let moved = dup_above(&fd, highest_dest + 1)?;
                extra.push((dest, moved));
            }
        }
    }

    let raw_extra: Vec<(RawFd, RawFd)> = extra
        .iter()
        .map(|(dest, fd)| (*dest, fd.as_raw_fd()))
        .collect();
    // SAFETY: only async-signal-safe calls run between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if has_tty && libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            for &(dest, src) in &raw_extra {
                if libc::dup2(src, dest) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    // Parent copies of the extra descriptors close here.
    drop(extra);
    log::info!("Spawned {:?} pid={:?}", plan.argv, child.id());
    Ok(child)
}

fn dup_above(fd: &OwnedFd, min: RawFd) -> io::Result<OwnedFd> {
    use std::os::fd::FromRawFd;
    // SAFETY: F_DUPFD_CLOEXEC returns a fresh descriptor or -1.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, min) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` was just created for us.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// How a child finished, as reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(sig)) => Termination::Signaled(sig),
            (None, None) => Termination::Exited(0),
        }
    }
}

/// A live child known to the application by object path.
#[derive(Debug, Clone, Copy)]
pub struct ProcessEntry {
    pub pid: i32,
}

/// Processes spawned on behalf of the application.
#[derive(Default)]
pub struct ProcessTable {
    next_serial: AtomicU64,
    entries: Mutex<HashMap<String, ProcessEntry>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a child and return its object path.
    pub fn insert(&self, pid: i32) -> String {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
        let path = ptyhost_ipc::protocol::process_path(serial);
        self.entries.lock().insert(path.clone(), ProcessEntry { pid });
        path
    }

    pub fn get(&self, path: &str) -> Option<ProcessEntry> {
        self.entries.lock().get(path).copied()
    }

    pub fn remove(&self, path: &str) -> Option<ProcessEntry> {
        self.entries.lock().remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Command line of `pid` with NUL and control bytes replaced by spaces.
pub fn command_line(pid: i32) -> Option<String> {
    let mut bytes = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    bytes.truncate(MAX_CMDLINE);
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    for byte in &mut bytes {
        if *byte < b' ' {
            *byte = b' ';
        }
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Classify the foreground leader `pid`.
pub fn leader_kind(pid: i32) -> &'static str {
    if pid <= 0 {
        return "unknown";
    }
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    if fs::metadata(&proc_dir).is_ok_and(|meta| meta.uid() == 0) {
        return "superuser";
    }
    let Ok(exe) = fs::read_link(proc_dir.join("exe")) else {
        return "unknown";
    };
    classify_executable(&exe)
}

fn classify_executable(exe: &Path) -> &'static str {
    let Some(name) = exe.file_name().and_then(OsStr::to_str) else {
        return "unknown";
    };
    if CONTAINER_LAUNCHERS.contains(&name) {
        "container"
    } else if REMOTE_CLIENTS.contains(&name) {
        "remote"
    } else {
        "unknown"
    }
}

/// Foreground process group of the terminal behind `pty`.
pub fn foreground_pgrp(pty: &OwnedFd) -> Option<i32> {
    // SAFETY: tcgetpgrp only reads the terminal's state.
    let pgrp = unsafe { libc::tcgetpgrp(pty.as_raw_fd()) };
    (pgrp > 0).then_some(pgrp)
}

/// Inspect the foreground of `pty` relative to the spawned `leader`.
pub fn inspect_foreground(pty: Option<&OwnedFd>, leader: i32) -> ForegroundProcessResult {
    let Some(pgrp) = pty.and_then(foreground_pgrp) else {
        return ForegroundProcessResult {
            has_foreground_process: false,
            pid: -1,
            command_line: String::new(),
            leader_kind: leader_kind(-1).to_string(),
        };
    };
    ForegroundProcessResult {
        has_foreground_process: pgrp != leader,
        pid: pgrp,
        command_line: command_line(pgrp).unwrap_or_default(),
        leader_kind: leader_kind(pgrp).to_string(),
    }
}

/// Container id recorded in `/run/.containerenv` of the process' root.
pub fn container_id_of(pid: i32) -> Option<String> {
    let contents = fs::read_to_string(format!("/proc/{pid}/root/run/.containerenv")).ok()?;
    parse_containerenv_id(&contents)
}

fn parse_containerenv_id(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let value = line.strip_prefix("id=")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_skips_malformed() {
        let env = parse_env(&[
            "TERM=xterm-256color".to_string(),
            "EMPTY=".to_string(),
            "novalue".to_string(),
            "=nokey".to_string(),
        ]);
        assert_eq!(
            env,
            vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_classify_executable() {
        assert_eq!(classify_executable(Path::new("/usr/bin/ssh")), "remote");
        assert_eq!(classify_executable(Path::new("/usr/bin/mosh-client")), "remote");
        assert_eq!(classify_executable(Path::new("/usr/bin/podman")), "container");
        assert_eq!(classify_executable(Path::new("/usr/bin/toolbox")), "container");
        assert_eq!(classify_executable(Path::new("/usr/bin/vim")), "unknown");
    }

    #[test]
    fn test_parse_containerenv() {
        let contents = "engine=\"podman-4.9\"\nname=\"fedora\"\nid=\"3f2a9c\"\nimage=\"f40\"\n";
        assert_eq!(parse_containerenv_id(contents), Some("3f2a9c".to_string()));
        assert_eq!(parse_containerenv_id("name=\"x\"\n"), None);
    }

    #[test]
    fn test_command_line_of_self() {
        let pid = std::process::id() as i32;
        let cmdline = command_line(pid).unwrap();
        assert!(!cmdline.is_empty());
        assert!(!cmdline.contains('\0'));
    }

    #[test]
    fn test_inspect_without_pty() {
        let result = inspect_foreground(None, 1);
        assert!(!result.has_foreground_process);
        assert_eq!(result.pid, -1);
        assert_eq!(result.leader_kind, "unknown");
    }

    #[test]
    fn test_process_table_paths() {
        let table = ProcessTable::new();
        let first = table.insert(10);
        let second = table.insert(11);
        assert_eq!(first, "/processes/1");
        assert_eq!(second, "/processes/2");
        assert_eq!(table.get(&first).unwrap().pid, 10);
        table.remove(&first);
        assert!(table.get(&first).is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_reports_exit_code() {
        let plan = RunPlan::new(vec!["sh".into(), "-c".into(), "exit 3".into()]);
        let mut child = spawn(plan).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(Termination::from(status), Termination::Exited(3));
    }

    #[tokio::test]
    async fn test_spawn_on_pty_gets_controlling_terminal() {
        let consumer = crate::pty::open_consumer().unwrap();
        let producer = crate::pty::open_producer(&consumer).unwrap();
        let mut plan = RunPlan::new(vec!["sh".into(), "-c".into(), "test -t 0".into()]);
        plan.fds = vec![
            (0, producer.try_clone().unwrap()),
            (1, producer.try_clone().unwrap()),
            (2, producer),
        ];
        let mut child = spawn(plan).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(Termination::from(status), Termination::Exited(0));
    }
}

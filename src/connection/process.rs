//! Handles for objects living in the helper: processes and PTYs.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// A process spawned by the helper, addressed by object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteProcess {
    pub path: String,
}

impl RemoteProcess {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Encoded wait status: exit code in the high byte, terminating signal in
/// the low seven bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus(pub i32);

impl WaitStatus {
    pub fn from_exit_code(code: i32) -> Self {
        Self((code & 0xff) << 8)
    }

    pub fn from_signal(sig: i32) -> Self {
        Self(sig & 0x7f)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// True when the process exited normally (not by a signal).
    pub fn exited(self) -> bool {
        self.term_sig() == 0
    }

    pub fn exit_code(self) -> i32 {
        (self.0 >> 8) & 0xff
    }

    pub fn term_sig(self) -> i32 {
        self.0 & 0x7f
    }

    pub fn signaled(self) -> bool {
        !self.exited()
    }

    /// Clean exit with status 0.
    pub fn success(self) -> bool {
        self.exited() && self.exit_code() == 0
    }
}

/// What kind of program leads the foreground process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderKind {
    #[default]
    Unknown,
    Superuser,
    Remote,
    Container,
}

impl LeaderKind {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "superuser" => LeaderKind::Superuser,
            "remote" => LeaderKind::Remote,
            "container" => LeaderKind::Container,
            _ => LeaderKind::Unknown,
        }
    }
}

/// Result of one foreground query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForegroundInfo {
    pub has_foreground_process: bool,
    pub pid: i32,
    pub command_line: String,
    pub leader_kind: LeaderKind,
}

/// The consumer side of a PTY created by the helper.
#[derive(Debug)]
pub struct Pty {
    fd: OwnedFd,
}

impl Pty {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Duplicate the descriptor, e.g. to attach it to a message.
    pub fn try_clone_fd(&self) -> std::io::Result<OwnedFd> {
        self.fd.try_clone()
    }
}

impl AsFd for Pty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

//! Descriptor lists attached to a single message.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// Index of a descriptor within the list attached to the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub i32);

impl Handle {
    /// "No descriptor attached."
    pub const NONE: Handle = Handle(-1);

    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

/// Ordered descriptors travelling with one message.
#[derive(Debug, Default)]
pub struct FdList {
    fds: Vec<OwnedFd>,
}

impl FdList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a descriptor and return the handle that refers to it.
    pub fn push(&mut self, fd: OwnedFd) -> Handle {
        self.fds.push(fd);
        Handle((self.fds.len() - 1) as i32)
    }

    /// Duplicate the descriptor behind `handle`.
    pub fn get(&self, handle: Handle) -> Result<OwnedFd, IpcError> {
        let fd = self.borrow(handle)?;
        Ok(fd.try_clone()?)
    }

    /// Borrow the descriptor behind `handle` without duplicating it.
    pub fn borrow(&self, handle: Handle) -> Result<&OwnedFd, IpcError> {
        if handle.is_none() {
            return Err(IpcError::BadHandle(handle.0));
        }
        self.fds
            .get(handle.0 as usize)
            .ok_or(IpcError::BadHandle(handle.0))
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub(crate) fn raw_fds(&self) -> Vec<RawFd> {
        self.fds.iter().map(|fd| fd.as_raw_fd()).collect()
    }
}

impl From<Vec<OwnedFd>> for FdList {
    fn from(fds: Vec<OwnedFd>) -> Self {
        Self { fds }
    }
}

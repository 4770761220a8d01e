//! Pseudo-terminal allocation.

use std::ffi::CStr;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        check(flags)?;
        check(libc::fcntl(
            fd.as_raw_fd(),
            libc::F_SETFL,
            flags | libc::O_NONBLOCK,
        ))
    }
}

/// Allocate a new PTY and return its consumer (master) side, non-blocking.
pub fn open_consumer() -> io::Result<OwnedFd> {
    // SAFETY: posix_openpt returns a fresh descriptor or -1.
    let raw = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC) };
    check(raw)?;
    // SAFETY: `raw` is a valid descriptor nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: plain libc calls on a valid PTY master.
    unsafe {
        check(libc::grantpt(fd.as_raw_fd()))?;
        check(libc::unlockpt(fd.as_raw_fd()))?;
    }
    set_nonblocking(&fd)?;
    log::debug!("Allocated PTY fd={}", fd.as_raw_fd());
    Ok(fd)
}

/// Open the producer (slave) side belonging to `consumer`.
///
/// The producer is blocking and never becomes the helper's controlling
/// terminal.
pub fn open_producer(consumer: &OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: idempotent on an already-unlocked master.
    unsafe {
        check(libc::grantpt(consumer.as_raw_fd()))?;
        check(libc::unlockpt(consumer.as_raw_fd()))?;
    }
    let name = peer_name(consumer)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(&name)?;
    log::debug!("Opened PTY producer {}", name.display());
    Ok(file.into())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_name(consumer: &OwnedFd) -> io::Result<PathBuf> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: the buffer length is passed along with it.
    let ret = unsafe { libc::ptsname_r(consumer.as_raw_fd(), buf.as_mut_ptr(), buf.len()) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    // SAFETY: ptsname_r NUL-terminates on success.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_name(consumer: &OwnedFd) -> io::Result<PathBuf> {
    static PTSNAME: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    let _guard = PTSNAME.lock();
    // SAFETY: ptsname's static buffer is only touched while holding the lock.
    let ptr = unsafe { libc::ptsname(consumer.as_raw_fd()) };
    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: non-null result is a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(ptr) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}

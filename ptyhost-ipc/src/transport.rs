//! Seqpacket transport with `SCM_RIGHTS` descriptor passing.
//!
//! `SOCK_SEQPACKET` preserves message boundaries, so each datagram carries
//! exactly one JSON-RPC message and the descriptors that belong to it.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{
    AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, Shutdown, SockFlag, SockType,
    recvmsg, sendmsg, shutdown, socketpair,
};
use tokio::io::unix::AsyncFd;

use crate::fd_list::FdList;

/// Largest message accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Most descriptors a single message may carry.
pub const MAX_FDS: usize = 16;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = MsgFlags::empty();

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

/// Create a connected, close-on-exec seqpacket socket pair.
pub fn socket_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(io::Error::from)
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a descriptor we borrow for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: as above.
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// One endpoint of the helper channel, registered with the tokio reactor.
pub struct Transport {
    fd: AsyncFd<OwnedFd>,
}

impl Transport {
    /// Wrap a connected seqpacket socket. Must be called within a tokio runtime.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        use std::os::fd::AsFd;
        set_nonblocking(fd.as_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Send one message with its descriptors.
    pub async fn send(&self, payload: &[u8], fds: &FdList) -> io::Result<()> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {} bytes exceeds limit", payload.len()),
            ));
        }
        if fds.len() > MAX_FDS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} descriptors exceed limit of {MAX_FDS}", fds.len()),
            ));
        }

        let raw_fds = fds.raw_fds();
        loop {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| send_packet(inner.as_raw_fd(), payload, &raw_fds));
            match result {
                Ok(sent) => return sent,
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one message. Returns `Ok(None)` once the peer has hung up.
    pub async fn recv(&self) -> io::Result<Option<(Vec<u8>, FdList)>> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| recv_packet(inner.as_raw_fd()));
            match result {
                Ok(received) => return received,
                Err(_would_block) => continue,
            }
        }
    }

    /// Shut the socket down in both directions, waking the peer and our own reader.
    pub fn shutdown(&self) -> io::Result<()> {
        match shutdown(self.fd.as_raw_fd(), Shutdown::Both) {
            Ok(()) | Err(nix::errno::Errno::ENOTCONN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn send_packet(fd: RawFd, payload: &[u8], raw_fds: &[RawFd]) -> io::Result<()> {
    let iov = [IoSlice::new(payload)];
    let rights = [ControlMessage::ScmRights(raw_fds)];
    let cmsgs: &[ControlMessage<'_>] = if raw_fds.is_empty() { &[] } else { &rights };
    sendmsg::<()>(fd, &iov, cmsgs, SEND_FLAGS, None)?;
    Ok(())
}

fn recv_packet(fd: RawFd) -> io::Result<Option<(Vec<u8>, FdList)>> {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; MAX_FDS]);

    let (bytes, truncated, fds) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), RECV_FLAGS)?;
        let mut fds = Vec::new();
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: the kernel just installed these descriptors in our table.
                fds.extend(
                    received
                        .into_iter()
                        .map(|raw| unsafe { OwnedFd::from_raw_fd(raw) }),
                );
            }
        }
        let truncated = msg
            .flags
            .intersects(MsgFlags::MSG_TRUNC | MsgFlags::MSG_CTRUNC);
        (msg.bytes, truncated, fds)
    };

    if truncated {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "received message or descriptor list was truncated",
        ));
    }
    if bytes == 0 && fds.is_empty() {
        return Ok(None);
    }

    buf.truncate(bytes);
    Ok(Some((buf, FdList::from(fds))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_message_boundaries_are_preserved() {
        let (a, b) = socket_pair().unwrap();
        let a = Transport::new(a).unwrap();
        let b = Transport::new(b).unwrap();

        a.send(b"first", &FdList::new()).await.unwrap();
        a.send(b"second", &FdList::new()).await.unwrap();

        let (one, _) = b.recv().await.unwrap().unwrap();
        let (two, _) = b.recv().await.unwrap().unwrap();
        assert_eq!(one, b"first");
        assert_eq!(two, b"second");
    }

    #[tokio::test]
    async fn test_descriptors_travel_with_message() {
        let (a, b) = socket_pair().unwrap();
        let a = Transport::new(a).unwrap();
        let b = Transport::new(b).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.txt");
        std::fs::write(&path, "over the wire").unwrap();

        let mut fds = FdList::new();
        let handle = fds.push(std::fs::File::open(&path).unwrap().into());
        a.send(b"with-fd", &fds).await.unwrap();

        let (body, received) = b.recv().await.unwrap().unwrap();
        assert_eq!(body, b"with-fd");
        let mut file = std::fs::File::from(received.get(handle).unwrap());
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "over the wire");
    }

    #[tokio::test]
    async fn test_recv_reports_hangup() {
        let (a, b) = socket_pair().unwrap();
        let b = Transport::new(b).unwrap();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
    }
}

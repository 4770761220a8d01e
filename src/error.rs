//! Error type for the supervision core.

use ptyhost_ipc::IpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The helper channel is gone; nothing on this connection will succeed again.
    #[error("connection to the helper is closed")]
    ConnectionClosed,

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("cannot locate container “{0}”")]
    ContainerNotFound(String),

    #[error("failed to create pseudo terminal device: {0}")]
    PtyCreationFailed(String),

    /// A saved session could not be decoded.
    #[error("failed to decode saved session: {0}")]
    RestoreDecode(String),

    #[error("failed to encode session: {0}")]
    SessionEncode(String),

    /// A foreground poll failed but may succeed on the next attempt.
    #[error("foreground poll failed: {0}")]
    PollTransient(String),

    #[error("failed to launch helper: {0}")]
    Launch(String),

    #[error(transparent)]
    Ipc(IpcError),
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        if e.is_closed() {
            Error::ConnectionClosed
        } else {
            Error::Ipc(e)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Ipc(IpcError::Io(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_channel_maps_to_connection_closed() {
        assert!(matches!(Error::from(IpcError::Closed), Error::ConnectionClosed));
        let remote = IpcError::Remote {
            code: -32000,
            message: "boom".into(),
        };
        assert!(matches!(Error::from(remote), Error::Ipc(_)));
    }

    #[test]
    fn test_container_message_quotes_id() {
        let err = Error::ContainerNotFound("fedora".into());
        assert_eq!(err.to_string(), "cannot locate container “fedora”");
    }
}

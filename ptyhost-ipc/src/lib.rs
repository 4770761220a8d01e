//! ptyhost-ipc: the private channel between ptyhost and its helper process.
//!
//! Messages are JSON-RPC 2.0 objects, one per `SOCK_SEQPACKET` datagram.
//! File descriptors travel alongside a message as `SCM_RIGHTS` ancillary data
//! and are referenced from the message body by a small integer [`Handle`].
//!
//! - [`transport`] - Non-blocking seqpacket socket with descriptor passing
//! - [`fd_list`] - Descriptor lists and the [`Handle`] indexing scheme
//! - [`jsonrpc`] - Symmetric JSON-RPC connection (requests, replies, notifications)
//! - [`protocol`] - Typed parameter and result objects for every method
//! - [`error`] - [`IpcError`]

pub mod error;
pub mod fd_list;
pub mod jsonrpc;
pub mod protocol;
pub mod transport;

pub use error::{IpcError, RpcError};
pub use fd_list::{FdList, Handle};
pub use jsonrpc::{Connection, IncomingMessage, Reply};
pub use transport::{Transport, socket_pair};

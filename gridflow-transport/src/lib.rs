//! The message-layer abstraction gridflow runs atop, and the buffer
//! transfer manager built on it.
//!
//! [`Transport`] is the thin non-blocking send/recv/probe/barrier
//! contract a physical network would implement; [`channel`] ships the
//! one concrete in-process implementation this crate provides, for
//! single-process simulation and tests. [`btm`] is the transfer manager
//! itself.

mod btm;
mod channel;
mod frame;
mod transport;

pub use btm::{AwaitPushCommand, BufferSource, BufferTransferManager, CommitCallback, PushCommand, TransferHandle};
pub use channel::{channel_mesh, ChannelTransport};
pub use frame::{Frame, FrameHeader, HEADER_BYTES};
pub use transport::{RecvToken, SendToken, Transport};

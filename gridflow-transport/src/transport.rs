//! The message-layer contract the buffer transfer manager is built on
//! top of.
//!
//! This is deliberately thin: non-blocking send, non-blocking
//! receive-with-probe, a way to test completion, and a barrier. The
//! physical transport itself (TCP, RDMA, MPI, ...) is out of scope for
//! this crate — it is an assumed external collaborator.
//! [`ChannelTransport`](crate::channel::ChannelTransport) is the one
//! concrete implementation this crate ships, suitable for
//! single-process multi-node simulation and for tests.

use gridflow_ids::NodeId;

/// An opaque handle to an outstanding non-blocking send.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SendToken(pub(crate) u64);

/// An opaque handle to an outstanding non-blocking receive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RecvToken(pub(crate) u64);

/// Non-blocking send/receive, probe, and barrier, as assumed by the
/// buffer transfer manager.
///
/// `send_async`/`recv_async` never block; `test_send`/`test_recv` are
/// polled to discover completion (spec: "test(request) -> bool"; here
/// split into a send- and a recv-flavored test since the payload only
/// exists on the receive side, which is more naturally expressed as
/// `Option<Vec<u8>>` than a bare bool in Rust).
pub trait Transport {
    /// This node's index in `0 .. peers()`.
    fn index(&self) -> NodeId;

    /// The number of nodes in the cluster, including this one.
    fn peers(&self) -> usize;

    /// Issues a non-blocking send of `bytes` to `dest`. Returns
    /// immediately with a token to poll via [`Transport::test_send`].
    fn send_async(&mut self, dest: NodeId, bytes: Vec<u8>) -> SendToken;

    /// True once the send identified by `token` has completed. A
    /// completed token must not be tested again.
    fn test_send(&mut self, token: SendToken) -> bool;

    /// Non-destructively checks for a pending message, returning its
    /// source and size in bytes if one is available.
    ///
    /// A message observed by `probe` remains available to be matched by
    /// a subsequent `recv_async` for the same source and size; probing
    /// never consumes it.
    fn probe(&mut self) -> Option<(NodeId, usize)>;

    /// Posts a non-blocking receive for a `size`-byte message from
    /// `src`, previously discovered via [`Transport::probe`]. Returns a
    /// token to poll via [`Transport::test_recv`].
    fn recv_async(&mut self, src: NodeId, size: usize) -> RecvToken;

    /// Returns the received bytes once the receive identified by
    /// `token` has completed. A completed token must not be tested
    /// again.
    fn test_recv(&mut self, token: RecvToken) -> Option<Vec<u8>>;

    /// Blocks until every node in the cluster has called `barrier`.
    fn barrier(&mut self);
}

//! An in-process [`Transport`] over `crossbeam_channel`, one unbounded
//! channel per ordered pair of nodes.
//!
//! A `Vec<Vec<Sender>>`/`Vec<Vec<Receiver>>` mesh wired up for
//! intra-process "networking," specialized to gridflow's byte-oriented
//! frames and the explicit probe/test protocol the buffer transfer
//! manager expects, rather than a push/pull queue abstraction.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};

use crossbeam_channel::{Receiver, Sender};

use gridflow_ids::NodeId;

use crate::transport::{RecvToken, SendToken, Transport};

/// Builds a fully-connected mesh of `n` [`ChannelTransport`]s sharing a
/// barrier, one per simulated node. Index `i` of the returned vector is
/// the transport for `NodeId::from_raw(i as u64)`.
pub fn channel_mesh(n: usize) -> Vec<ChannelTransport> {
    assert!(n >= 1);
    // senders[i][j] sends from i to j.
    let mut senders: Vec<Vec<Sender<Vec<u8>>>> = Vec::with_capacity(n);
    let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
    for _ in 0..n {
        senders.push(Vec::with_capacity(n));
    }
    for i in 0..n {
        for _j in 0..n {
            let (tx, rx) = crossbeam_channel::unbounded();
            senders[i].push(tx);
            receivers[_j].push(rx);
        }
    }

    let barrier = Arc::new(Barrier::new(n));
    (0..n)
        .map(|i| ChannelTransport {
            index: NodeId::from_raw(i as u64),
            peers: n,
            senders: std::mem::take(&mut senders[i]),
            receivers: std::mem::take(&mut receivers[i]),
            peeked: HashMap::new(),
            pending_recvs: HashMap::new(),
            next_token: 0,
            barrier: Arc::clone(&barrier),
        })
        .collect()
}

/// A [`Transport`] backed by `crossbeam_channel`, suitable for
/// single-process simulation of a multi-node cluster and for tests.
/// Sends complete synchronously (the channel either accepts the bytes or
/// the peer transport has been dropped, which is treated as fatal —
/// there is no backpressure to model within one process), so
/// `test_send` is always ready on first poll; `probe`/`recv_async` still
/// go through the full non-blocking protocol so code written against
/// [`Transport`] behaves the same here as against a real network.
pub struct ChannelTransport {
    index: NodeId,
    peers: usize,
    /// `senders[j]`: channel to node `j`.
    senders: Vec<Sender<Vec<u8>>>,
    /// `receivers[j]`: channel from node `j`.
    receivers: Vec<Receiver<Vec<u8>>>,
    /// Messages observed by `probe` but not yet claimed by `recv_async`,
    /// keyed by source.
    peeked: HashMap<u64, Vec<u8>>,
    /// Bytes claimed by `recv_async`, ready for `test_recv` to return.
    pending_recvs: HashMap<u64, Vec<u8>>,
    next_token: u64,
    barrier: Arc<Barrier>,
}

impl ChannelTransport {
    fn fresh_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }
}

impl Transport for ChannelTransport {
    fn index(&self) -> NodeId {
        self.index
    }

    fn peers(&self) -> usize {
        self.peers
    }

    fn send_async(&mut self, dest: NodeId, bytes: Vec<u8>) -> SendToken {
        let dest = dest.into_raw() as usize;
        self.senders[dest].send(bytes).expect("peer transport dropped");
        SendToken(self.fresh_token())
    }

    fn test_send(&mut self, _token: SendToken) -> bool {
        // sends complete the instant `send_async` returns in this backend.
        true
    }

    fn probe(&mut self) -> Option<(NodeId, usize)> {
        for (source, already) in self.peeked.iter() {
            return Some((NodeId::from_raw(*source), already.len()));
        }
        for source in 0..self.peers {
            if source == self.index.into_raw() as usize {
                continue;
            }
            if let Ok(bytes) = self.receivers[source].try_recv() {
                let size = bytes.len();
                self.peeked.insert(source as u64, bytes);
                return Some((NodeId::from_raw(source as u64), size));
            }
        }
        None
    }

    fn recv_async(&mut self, src: NodeId, size: usize) -> RecvToken {
        let source = src.into_raw();
        let bytes = self
            .peeked
            .remove(&source)
            .unwrap_or_else(|| self.receivers[source as usize].recv().expect("peer transport dropped"));
        assert_eq!(bytes.len(), size, "recv_async size must match the size probe reported");
        let token = self.fresh_token();
        self.pending_recvs.insert(token, bytes);
        RecvToken(token)
    }

    fn test_recv(&mut self, token: RecvToken) -> Option<Vec<u8>> {
        self.pending_recvs.remove(&token.0)
    }

    fn barrier(&mut self) {
        self.barrier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_probe_and_recv_round_trips() {
        let mut nodes = channel_mesh(2);
        let (mut a, mut b) = {
            let mut it = nodes.drain(..);
            (it.next().unwrap(), it.next().unwrap())
        };

        let send_token = a.send_async(NodeId::from_raw(1), vec![1, 2, 3]);
        assert!(a.test_send(send_token));

        let (source, size) = b.probe().expect("message should be pending");
        assert_eq!(source, NodeId::from_raw(0));
        assert_eq!(size, 3);

        let recv_token = b.recv_async(source, size);
        assert_eq!(b.test_recv(recv_token), Some(vec![1, 2, 3]));
    }

    #[test]
    fn probe_without_matching_source_sees_nothing() {
        let mut nodes = channel_mesh(3);
        let mut c = nodes.pop().unwrap();
        assert!(c.probe().is_none());
    }

    #[test]
    fn barrier_releases_all_participants() {
        let nodes = channel_mesh(3);
        std::thread::scope(|scope| {
            for mut node in nodes {
                scope.spawn(move || node.barrier());
            }
        });
    }
}

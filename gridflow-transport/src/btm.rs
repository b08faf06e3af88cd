//! The buffer transfer manager: matches outgoing `push`es against
//! incoming `await_push`es, accumulates arriving frames into a
//! blackboard of in-flight transfers, and hands completed transfers to
//! a caller-supplied commit callback.
//!
//! The dispatch loop (poll incoming, poll outgoing, repeat) favors
//! `assert!`/`panic!` for protocol violations considered impossible
//! under a correct peer, and `anyhow` only for genuinely environmental
//! failures — fatal invariant violations and recoverable transport
//! errors are kept strictly separate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gridflow_ids::{BufferId, NodeId, ReductionId, TransferId};
use gridflow_logging::{Logger, TransferEvent};
use gridflow_region::{GridBox, Region};

use crate::frame::{Frame, FrameHeader};
use crate::transport::{RecvToken, SendToken, Transport};

/// A `push` to satisfy: send the bytes backing `source_subrange` of
/// `buffer_id` to `target`, tagged with `transfer_id` so the receiver
/// can match it against its `await_push`. `reduction_id` is
/// `ReductionId::NONE` for a plain point-to-point transfer.
#[derive(Copy, Clone, Debug)]
pub struct PushCommand<const D: usize> {
    pub buffer_id: BufferId,
    pub transfer_id: TransferId,
    pub target: NodeId,
    pub source_subrange: GridBox<D>,
    pub reduction_id: ReductionId,
}

/// An `await_push` to satisfy: block (from the caller's point of view,
/// via polling the returned handle) until `region` of `buffer_id` has
/// arrived in full under `transfer_id`, or — for a reduction — until
/// every other node's contribution has arrived.
#[derive(Clone, Debug)]
pub struct AwaitPushCommand<const D: usize> {
    pub buffer_id: BufferId,
    pub transfer_id: TransferId,
    pub region: Region<D>,
}

/// A handle to an in-flight push or await-push. Safe to read from any
/// thread; only [`BufferTransferManager::poll`] ever mutates the
/// manager's state.
#[derive(Clone, Debug)]
pub struct TransferHandle {
    complete: Arc<AtomicBool>,
}

impl TransferHandle {
    fn new() -> Self {
        TransferHandle { complete: Arc::new(AtomicBool::new(false)) }
    }

    fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    /// True once the transfer this handle refers to has fully arrived
    /// (or, for a push, once the send has left this node).
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

/// Reads the bytes backing a region of a buffer, to serialize into an
/// outgoing push frame. Buffer storage itself is an external
/// collaborator; this trait is the seam.
pub trait BufferSource<const D: usize>: Send {
    fn read_region(&mut self, buffer_id: BufferId, region: &GridBox<D>) -> Vec<u8>;
}

/// Copies arrived frames into buffer storage once a transfer completes,
/// supplied at construction.
pub trait CommitCallback<const D: usize>: Send {
    fn commit(&mut self, buffer_id: BufferId, transfer_id: TransferId, frames: Vec<(GridBox<D>, Vec<u8>)>);
}

struct OutgoingPush {
    request: SendToken,
    handle: TransferHandle,
}

struct IncomingFrame {
    request: RecvToken,
    source: NodeId,
}

/// The arrival state of one `(buffer_id, transfer_id)` exchange, from
/// the receiving side.
struct PendingTransfer<const D: usize> {
    /// Set once the matching `await_push` is posted; `None` while frames
    /// may be arriving ahead of the consumer asking for them.
    expected: Option<Region<D>>,
    /// Decided by the first frame to arrive for this transfer, then only
    /// ever checked against, never re-derived.
    is_reduction: Option<bool>,
    /// Union of subranges received so far (non-reduction transfers
    /// only; reductions are counted instead, since every contribution
    /// shares the same single-cell subrange by construction).
    received_region: Region<D>,
    /// Senders a reduction contribution has already arrived from, to
    /// catch duplicate or unexpected contributions.
    reduction_senders: std::collections::HashSet<NodeId>,
    frames: Vec<(GridBox<D>, Vec<u8>)>,
    handle: TransferHandle,
}

impl<const D: usize> PendingTransfer<D> {
    fn new() -> Self {
        PendingTransfer {
            expected: None,
            is_reduction: None,
            received_region: Region::empty(),
            reduction_senders: std::collections::HashSet::new(),
            frames: Vec::new(),
            handle: TransferHandle::new(),
        }
    }

    fn is_satisfied(&self, peers: usize) -> bool {
        match self.is_reduction {
            Some(true) => self.expected.is_some() && self.frames.len() + 1 >= peers, // +1: this node's own contribution is implicit
            Some(false) => match &self.expected {
                Some(expected) => self.received_region == *expected,
                None => false,
            },
            None => false,
        }
    }
}

/// Matches pushes against await-pushes for buffers of dimensionality
/// `D`, over transport `T`. One instance serves all transfers whose
/// buffers share a dimensionality; a cluster using buffers of more than
/// one dimensionality holds one `BufferTransferManager` per
/// dimensionality in use.
pub struct BufferTransferManager<const D: usize, T: Transport> {
    transport: T,
    /// Fixed per-element byte width the datatype was registered with at
    /// startup.
    element_size: usize,
    outgoing: Vec<OutgoingPush>,
    incoming_in_flight: Vec<IncomingFrame>,
    blackboard: HashMap<(BufferId, TransferId), PendingTransfer<D>>,
    logger: Option<Logger<TransferEvent>>,
}

impl<const D: usize, T: Transport> BufferTransferManager<D, T> {
    pub fn new(transport: T, element_size: usize) -> Self {
        assert!(element_size > 0);
        BufferTransferManager {
            transport,
            element_size,
            outgoing: Vec::new(),
            incoming_in_flight: Vec::new(),
            blackboard: HashMap::new(),
            logger: None,
        }
    }

    /// Binds a logger to receive [`TransferEvent`]s as pushes are issued,
    /// frames arrive, and transfers complete.
    pub fn with_logger(mut self, logger: Logger<TransferEvent>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Issues a push: serializes `command.source_subrange`'s bytes
    /// (read via `source`) into a frame and sends it asynchronously.
    /// The returned handle completes once the send has left this node;
    /// it says nothing about the remote side having received it.
    pub fn push(&mut self, command: &PushCommand<D>, source: &mut dyn BufferSource<D>) -> TransferHandle {
        let payload = source.read_region(command.buffer_id, &command.source_subrange);
        assert_eq!(
            payload.len() as i64,
            command.source_subrange.area() * self.element_size as i64,
            "push payload size does not match subrange area times element size"
        );
        let (offset, range) = Frame::embed_subrange(&command.source_subrange);
        let header = FrameHeader {
            buffer_id: command.buffer_id.into_raw(),
            reduction_id: command.reduction_id.into_raw(),
            offset,
            range,
            transfer_id: command.transfer_id.into_raw(),
        };
        let bytes = Frame::new(header, payload).encode().expect("frame encoding cannot fail");
        let request = self.transport.send_async(command.target, bytes);
        let handle = TransferHandle::new();
        self.outgoing.push(OutgoingPush { request, handle: handle.clone() });
        if let Some(logger) = &self.logger {
            logger.log(TransferEvent::PushIssued {
                buffer_id: command.buffer_id.into_raw(),
                transfer_id: command.transfer_id.into_raw(),
                target: command.target.into_raw(),
            });
        }
        handle
    }

    /// Registers interest in `command`'s region for `buffer_id`'s
    /// `transfer_id`. If every expected frame (or, for a reduction,
    /// every contribution) has already arrived, the returned handle is
    /// complete immediately.
    ///
    /// A reduction gather is lowered as N-1 separate `await_push`
    /// commands sharing one `transfer_id` (one per contributing peer),
    /// so this is expected to be called more than once for the same
    /// key; repeat calls are idempotent as long as they agree on the
    /// expected region, and all return clones of the same handle.
    pub fn await_push(&mut self, command: AwaitPushCommand<D>, commit: &mut dyn CommitCallback<D>) -> TransferHandle {
        let key = (command.buffer_id, command.transfer_id);
        let entry = self.blackboard.entry(key).or_insert_with(PendingTransfer::new);
        match &entry.expected {
            None => entry.expected = Some(command.region),
            Some(existing) => assert_eq!(
                *existing, command.region,
                "await_push issued twice for the same transfer with differing expected regions"
            ),
        }
        let handle = entry.handle.clone();
        self.maybe_complete(key, commit);
        handle
    }

    /// Blocks until every peer has reached this call; horizon and epoch
    /// commands resolve through this local barrier. Delegates straight
    /// to the transport; does not touch the blackboard.
    pub fn barrier(&mut self) {
        self.transport.barrier();
    }

    /// Advances the manager by one step: posts receives for any probed
    /// message, harvests completed receives into the blackboard, and
    /// retires completed sends. Must be called periodically by the
    /// owning thread, which is the sole poller.
    pub fn poll(&mut self, commit: &mut dyn CommitCallback<D>) {
        if let Some((source, size)) = self.transport.probe() {
            let request = self.transport.recv_async(source, size);
            self.incoming_in_flight.push(IncomingFrame { request, source });
        }

        let mut i = 0;
        while i < self.incoming_in_flight.len() {
            if let Some(bytes) = self.transport.test_recv(self.incoming_in_flight[i].request) {
                let pending = self.incoming_in_flight.swap_remove(i);
                self.deliver(bytes, pending.source, commit);
            } else {
                i += 1;
            }
        }

        self.outgoing.retain_mut(|out| {
            if self.transport.test_send(out.request) {
                out.handle.mark_complete();
                false
            } else {
                true
            }
        });
    }

    fn deliver(&mut self, bytes: Vec<u8>, source: NodeId, commit: &mut dyn CommitCallback<D>) {
        let frame = Frame::decode(&bytes).expect("malformed frame from peer");
        let buffer_id = BufferId::from_raw(frame.header.buffer_id);
        let transfer_id = TransferId::from_raw(frame.header.transfer_id);
        let reduction_id = ReductionId::from_raw(frame.header.reduction_id);
        let subrange: GridBox<D> = Frame::extract_subrange(frame.header.offset, frame.header.range);

        assert_eq!(
            frame.payload.len() as i64,
            subrange.area() * self.element_size as i64,
            "received frame's payload size does not match its own subrange"
        );

        let key = (buffer_id, transfer_id);
        let entry = self.blackboard.entry(key).or_insert_with(PendingTransfer::new);

        match entry.is_reduction {
            None => entry.is_reduction = Some(reduction_id.is_reduction()),
            Some(expected) => assert_eq!(
                expected,
                reduction_id.is_reduction(),
                "a transfer's frames disagree about whether it is a reduction"
            ),
        }

        if reduction_id.is_reduction() {
            assert!(
                entry.reduction_senders.insert(source),
                "duplicate reduction contribution from the same node"
            );
        } else {
            let incoming = Region::single(subrange);
            assert!(
                entry.received_region.intersection(&incoming).is_empty(),
                "overlapping non-reduction frames for the same transfer"
            );
            entry.received_region = entry.received_region.union(&incoming);
        }

        if let Some(logger) = &self.logger {
            logger.log(TransferEvent::FrameReceived {
                buffer_id: buffer_id.into_raw(),
                transfer_id: transfer_id.into_raw(),
                source: source.into_raw(),
            });
        }

        entry.frames.push((subrange, frame.payload));
        self.maybe_complete(key, commit);
    }

    fn maybe_complete(&mut self, key: (BufferId, TransferId), commit: &mut dyn CommitCallback<D>) {
        let peers = self.transport.peers();
        let satisfied = match self.blackboard.get(&key) {
            Some(entry) => entry.is_satisfied(peers),
            None => false,
        };
        if satisfied {
            let entry = self.blackboard.remove(&key).expect("just checked present");
            entry.handle.mark_complete();
            if let Some(logger) = &self.logger {
                logger.log(TransferEvent::Completed { buffer_id: key.0.into_raw(), transfer_id: key.1.into_raw() });
            }
            commit.commit(key.0, key.1, entry.frames);
        }
    }
}

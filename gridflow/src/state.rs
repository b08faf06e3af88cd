//! The distributed-state tracker: per-buffer, per-region last-writer
//! bookkeeping the command graph generator consults to decide which
//! nodes need a push before a chunk can execute.
//!
//! Exclusive to the command graph generator (the scheduler thread);
//! lifetime runs from buffer registration to unregistration, same as
//! the task manager's own per-buffer maps in [`crate::task`].

use std::collections::{HashMap, HashSet};

use gridflow_ids::{BufferId, NodeId};
use gridflow_region::{GridBox, Region};

use crate::region_map::RegionMap;

struct BufferState<const D: usize> {
    global_size: GridBox<D>,
    last_writer: RegionMap<D, NodeId>,
    pending_reduction: bool,
    replicated: bool,
}

/// Per-buffer last-writer coverage, keyed by disjoint regions, plus
/// pending-reduction and replicated flags.
pub struct DistributedStateTracker<const D: usize> {
    buffers: HashMap<BufferId, BufferState<D>>,
}

impl<const D: usize> Default for DistributedStateTracker<D> {
    fn default() -> Self {
        DistributedStateTracker { buffers: HashMap::new() }
    }
}

impl<const D: usize> DistributedStateTracker<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a buffer. `initial_writer` is the node that owns the
    /// whole buffer's initial contents: `host_init` seeds the tracker's
    /// first writer, even though the task manager itself has no TDAG
    /// predecessor to point at.
    pub fn register(&mut self, buffer_id: BufferId, global_size: GridBox<D>, initial_writer: NodeId) {
        let mut last_writer = RegionMap::new();
        last_writer.set(&Region::single(global_size), initial_writer);
        assert!(
            self.buffers
                .insert(buffer_id, BufferState { global_size, last_writer, pending_reduction: false, replicated: false })
                .is_none(),
            "buffer_id already registered in distributed state"
        );
    }

    pub fn unregister(&mut self, buffer_id: BufferId) {
        assert!(self.buffers.remove(&buffer_id).is_some(), "unregistering an unknown buffer");
    }

    pub fn global_size(&self, buffer_id: BufferId) -> GridBox<D> {
        self.buffers.get(&buffer_id).expect("unknown buffer").global_size
    }

    /// Splits `region` against the current last-writer covering,
    /// returning the `(producer_node, box)` pairs that jointly supply
    /// it.
    pub fn producers_for(&self, buffer_id: BufferId, region: &Region<D>) -> Vec<(NodeId, GridBox<D>)> {
        let state = self.buffers.get(&buffer_id).expect("unknown buffer");
        state.last_writer.overlapping(region).into_iter().map(|(box_, node)| (node, box_)).collect()
    }

    /// Records that `node` now owns `region` of `buffer_id` as the last
    /// writer, after a write-mode chunk has been emitted there.
    pub fn record_write(&mut self, buffer_id: BufferId, region: &Region<D>, node: NodeId) {
        let state = self.buffers.get_mut(&buffer_id).expect("unknown buffer");
        state.last_writer.set(region, node);
    }

    pub fn mark_pending_reduction(&mut self, buffer_id: BufferId, pending: bool) {
        self.buffers.get_mut(&buffer_id).expect("unknown buffer").pending_reduction = pending;
    }

    pub fn is_pending_reduction(&self, buffer_id: BufferId) -> bool {
        self.buffers.get(&buffer_id).expect("unknown buffer").pending_reduction
    }

    /// Finalizes a reduction: the root node now exclusively owns the
    /// reduced cell and it is no longer replicated.
    pub fn finalize_reduction(&mut self, buffer_id: BufferId, cell: &Region<D>, root: NodeId) {
        let state = self.buffers.get_mut(&buffer_id).expect("unknown buffer");
        state.last_writer.set(cell, root);
        state.pending_reduction = false;
        state.replicated = false;
    }

    pub fn set_replicated(&mut self, buffer_id: BufferId, replicated: bool) {
        self.buffers.get_mut(&buffer_id).expect("unknown buffer").replicated = replicated;
    }

    pub fn is_replicated(&self, buffer_id: BufferId) -> bool {
        self.buffers.get(&buffer_id).expect("unknown buffer").replicated
    }

    /// The distinct nodes that currently own any part of `region`.
    pub fn owning_nodes(&self, buffer_id: BufferId, region: &Region<D>) -> HashSet<NodeId> {
        self.producers_for(buffer_id, region).into_iter().map(|(node, _)| node).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_ids::BufferId;

    #[test]
    fn single_writer_covers_whole_buffer_initially() {
        let mut tracker: DistributedStateTracker<1> = DistributedStateTracker::new();
        tracker.register(BufferId::from_raw(0), GridBox::zero_based([8]), NodeId::from_raw(0));
        let producers = tracker.producers_for(BufferId::from_raw(0), &Region::single(GridBox::new([2], [4])));
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].0, NodeId::from_raw(0));
    }

    #[test]
    fn write_splits_ownership_across_nodes() {
        let mut tracker: DistributedStateTracker<1> = DistributedStateTracker::new();
        tracker.register(BufferId::from_raw(0), GridBox::zero_based([8]), NodeId::from_raw(0));
        tracker.record_write(BufferId::from_raw(0), &Region::single(GridBox::new([4], [4])), NodeId::from_raw(1));

        let producers = tracker.producers_for(BufferId::from_raw(0), &Region::single(GridBox::new([0], [8])));
        let nodes: HashSet<NodeId> = producers.iter().map(|(n, _)| *n).collect();
        assert_eq!(nodes, [NodeId::from_raw(0), NodeId::from_raw(1)].into());
    }

    #[test]
    fn reduction_finalization_clears_pending_and_replicated() {
        let mut tracker: DistributedStateTracker<1> = DistributedStateTracker::new();
        tracker.register(BufferId::from_raw(0), GridBox::zero_based([1]), NodeId::from_raw(0));
        tracker.mark_pending_reduction(BufferId::from_raw(0), true);
        tracker.set_replicated(BufferId::from_raw(0), true);

        tracker.finalize_reduction(BufferId::from_raw(0), &Region::single(GridBox::new([0], [1])), NodeId::from_raw(0));
        assert!(!tracker.is_pending_reduction(BufferId::from_raw(0)));
        assert!(!tracker.is_replicated(BufferId::from_raw(0)));
    }
}

//! The command graph generator: lowers each committed task into one
//! command per participating node, splitting its iteration space,
//! consulting the distributed-state tracker to decide which chunks
//! need a cross-node push before they can run, and updating that
//! tracker once writes land.
//!
//! Owned exclusively by the scheduler thread: this is the only place
//! both the [`CommandGraph`] and the [`DistributedStateTracker`] are
//! mutated. Tasks are lowered strictly in TDAG submission order, one at
//! a time, mirroring the general rule that a dataflow's internal graph
//! is built by a single owning thread.

use std::collections::HashMap;

use gridflow_ids::{BufferId, CommandId, IdGenerator, NodeId, TaskId, TransferId};
use gridflow_logging::{CommandEvent, Logger};
use gridflow_region::{GridBox, Region};

use crate::command::{Command, CommandBody, CommandGraph, EdgeOrigin};
use crate::region_map::RegionMap;
use crate::state::DistributedStateTracker;
use crate::task::{AccessMode, Task, TaskEdgeKind, TaskKind};

/// One piece of dependency carried over from the TDAG: the task it
/// names and the edge kind the task manager inferred for it.
pub type TaskDependency = (TaskId, TaskEdgeKind);

pub struct CommandGraphGenerator<const D: usize> {
    peers: usize,
    commands: CommandGraph<D>,
    state: DistributedStateTracker<D>,
    command_ids: IdGenerator<CommandId>,
    transfer_ids: IdGenerator<TransferId>,
    /// Per buffer, the command (if any — `None` means still the host's
    /// initial value) that most recently wrote each region, used to
    /// wire data dependencies onto the exact producing command rather
    /// than merely the owning node. Kept separate from
    /// `DistributedStateTracker`, which only ever tracks node
    /// ownership.
    last_writer_command: HashMap<BufferId, RegionMap<D, Option<CommandId>>>,
    /// The commands a task produced, per node, so a later task that
    /// depends on it (via a TDAG edge) is wired to the right per-node
    /// predecessor rather than a cross-node one.
    task_commands: HashMap<TaskId, Vec<(NodeId, CommandId)>>,
    /// The most recent command emitted for each node, of any kind; the
    /// dependee for a horizon/epoch's `ExecutionFront` edge.
    node_last_command: Vec<Option<CommandId>>,
    /// The most recent horizon/epoch command emitted for each node; the
    /// dependee for the next one's `LastEpoch` edge.
    node_last_epoch: Vec<Option<CommandId>>,
    logger: Option<Logger<CommandEvent>>,
}

impl<const D: usize> CommandGraphGenerator<D> {
    pub fn new(peers: usize) -> Self {
        assert!(peers >= 1);
        CommandGraphGenerator {
            peers,
            commands: CommandGraph::new(),
            state: DistributedStateTracker::new(),
            command_ids: IdGenerator::new(),
            transfer_ids: IdGenerator::new(),
            last_writer_command: HashMap::new(),
            task_commands: HashMap::new(),
            node_last_command: vec![None; peers],
            node_last_epoch: vec![None; peers],
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger<CommandEvent>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn commands(&self) -> &CommandGraph<D> {
        &self.commands
    }

    pub fn register_buffer(&mut self, buffer_id: BufferId, global_size: GridBox<D>, host_node: NodeId) {
        self.state.register(buffer_id, global_size, host_node);
        let mut initial = RegionMap::new();
        initial.set(&Region::single(global_size), None);
        self.last_writer_command.insert(buffer_id, initial);
    }

    pub fn unregister_buffer(&mut self, buffer_id: BufferId) {
        self.state.unregister(buffer_id);
        self.last_writer_command.remove(&buffer_id);
    }

    /// Lowers one task, given the TDAG edges the task manager inferred
    /// for it. Returns the per-node commands this task produced.
    pub fn lower_task(&mut self, task: &Task<D>, dependencies: &[TaskDependency]) -> Vec<(NodeId, CommandId)> {
        let produced = match task.kind {
            TaskKind::Horizon => self.lower_boundary(task, CommandBody::Horizon, dependencies),
            TaskKind::Epoch => {
                let action = task.epoch_action.expect("epoch task must carry an action");
                self.lower_boundary(task, CommandBody::Epoch { action }, dependencies)
            }
            TaskKind::Fence => self.lower_passthrough(dependencies),
            TaskKind::MasterNode => self.lower_single_node(task, dependencies, NodeId::ROOT),
            TaskKind::Collective => self.lower_replicated(task, dependencies),
            TaskKind::HostCompute | TaskKind::DeviceCompute => self.lower_chunked(task, dependencies),
        };
        self.task_commands.insert(task.id, produced.clone());
        produced
    }

    /// A fence introduces no command of its own; it resolves to
    /// whichever commands its dependencies already produced, so a task
    /// depending on the fence is wired straight through to them.
    fn lower_passthrough(&mut self, dependencies: &[TaskDependency]) -> Vec<(NodeId, CommandId)> {
        let mut produced = Vec::new();
        for (dep_task, _) in dependencies {
            if let Some(cmds) = self.task_commands.get(dep_task) {
                produced.extend(cmds.iter().copied());
            }
        }
        produced
    }

    fn lower_boundary(&mut self, task: &Task<D>, body: CommandBody<D>, dependencies: &[TaskDependency]) -> Vec<(NodeId, CommandId)> {
        let previous_floor = self
            .node_last_epoch
            .iter()
            .copied()
            .collect::<Option<Vec<_>>>()
            .and_then(|ids| ids.into_iter().min_by_key(|c| c.into_raw()));

        let mut produced = Vec::with_capacity(self.peers);
        for node in 0..self.peers {
            let node_id = NodeId::from_raw(node as u64);
            let mut dependees = Vec::new();
            if let Some(front) = self.node_last_command[node] {
                dependees.push((front, TaskEdgeKind::Order { exclusive: false }, EdgeOrigin::ExecutionFront));
            }
            if let Some(prior) = self.node_last_epoch[node] {
                dependees.push((prior, TaskEdgeKind::Order { exclusive: false }, EdgeOrigin::LastEpoch));
            }
            let id = self.insert_command(task.id, node_id, body.clone(), &dependees);
            self.node_last_epoch[node] = Some(id);
            produced.push((node_id, id));
        }
        // A horizon/epoch's TDAG edges are already subsumed by execution_front,
        // which node_last_command tracks directly; nothing further to wire here.
        let _ = dependencies;

        // Mirror the task manager's own horizon pruning on the command
        // side: once every node has passed a second boundary,
        // commands older than the first are no longer reachable by any
        // future lowering and can be dropped.
        if let Some(floor) = previous_floor {
            self.prune_commands_older_than(floor, &produced);
        }

        produced
    }

    fn prune_commands_older_than(&mut self, floor: CommandId, fresh_boundary: &[(NodeId, CommandId)]) {
        let boundary_for_node: HashMap<NodeId, CommandId> = fresh_boundary.iter().copied().collect();
        let stale: Vec<CommandId> = self.commands.ids().filter(|id| id.into_raw() < floor.into_raw()).collect();
        for id in stale {
            let node = self.commands.get(id).map(|c| c.node);
            self.commands.erase(id);
            if let Some(node) = node {
                if let Some(&replacement) = boundary_for_node.get(&node) {
                    for rm in self.last_writer_command.values_mut() {
                        rm.rewrite(|v| if v == Some(id) { Some(replacement) } else { v });
                    }
                }
            }
        }
        self.commands.compact();
    }

    fn lower_single_node(&mut self, task: &Task<D>, dependencies: &[TaskDependency], node: NodeId) -> Vec<(NodeId, CommandId)> {
        let subrange = task.geometry.as_ref().map(|g| g.whole_chunk()).unwrap_or_else(|| GridBox::new([0; D], [0; D]));
        let dependees = self.task_level_dependees(task, dependencies, node);
        let id = self.insert_command(task.id, node, CommandBody::Execution { task_id: task.id, subrange }, &dependees);
        self.record_accesses(task, node, subrange);
        vec![(node, id)]
    }

    /// A collective runs once per node over the task's whole iteration
    /// space (no per-node chunking), its commands tied together by
    /// `CollectiveGroupSerialization` edges when the task has
    /// contention with a prior member of the same group (already folded
    /// into `dependencies` by the task manager).
    fn lower_replicated(&mut self, task: &Task<D>, dependencies: &[TaskDependency]) -> Vec<(NodeId, CommandId)> {
        let subrange = task.geometry.as_ref().map(|g| g.whole_chunk()).unwrap_or_else(|| GridBox::new([0; D], [0; D]));
        let mut produced = Vec::with_capacity(self.peers);
        for node in 0..self.peers {
            let node_id = NodeId::from_raw(node as u64);
            let mut dependees = self.task_level_dependees(task, dependencies, node_id);
            let extra = self.access_dependees(task, node_id, subrange);
            dependees.extend(extra);
            let id = self.insert_command(task.id, node_id, CommandBody::Execution { task_id: task.id, subrange }, &dependees);
            produced.push((node_id, id));
        }
        for (node_id, _) in &produced {
            self.record_accesses(task, *node_id, subrange);
        }

        if !task.reductions.is_empty() {
            let reduction_cmds = self.lower_reductions(task, &produced);
            produced.extend(reduction_cmds.into_iter().map(|cmd| (NodeId::ROOT, cmd)));
        }
        produced
    }

    /// A compute task: split across nodes, each chunk fetching whatever
    /// buffer data it needs from wherever the distributed-state tracker
    /// says it currently lives.
    fn lower_chunked(&mut self, task: &Task<D>, dependencies: &[TaskDependency]) -> Vec<(NodeId, CommandId)> {
        let geometry = task.geometry.as_ref().expect("compute tasks require a declared geometry");
        let whole = geometry.whole_chunk();
        let chunks = whole.split_widest(self.peers, geometry.granularity);

        let mut produced = Vec::with_capacity(chunks.len());
        for (node, chunk) in chunks.iter().enumerate() {
            let node_id = NodeId::from_raw(node as u64);
            let mut dependees = self.task_level_dependees(task, dependencies, node_id);
            dependees.extend(self.access_dependees(task, node_id, *chunk));
            let id = self.insert_command(task.id, node_id, CommandBody::Execution { task_id: task.id, subrange: *chunk }, &dependees);
            self.record_accesses(task, node_id, *chunk);
            produced.push((node_id, id));
        }

        if !task.reductions.is_empty() {
            let reduction_cmds = self.lower_reductions(task, &produced);
            // The reduction commands finalize strictly after every
            // per-node execution command they gather from; without
            // them, a `fence` (which passes straight through to
            // whatever this task `produced`) would observe the task as
            // complete before its reduction actually lands.
            produced.extend(reduction_cmds.into_iter().map(|cmd| (NodeId::ROOT, cmd)));
        }
        produced
    }

    /// Dependees arising from the TDAG edges inferred for `task`,
    /// restricted to the predecessor's command on this same node (a
    /// dependency can only be enforced locally; cross-node data
    /// dependencies are carried by the push/await-push handshake
    /// instead, not a graph edge).
    fn task_level_dependees(
        &self,
        task: &Task<D>,
        dependencies: &[TaskDependency],
        node: NodeId,
    ) -> Vec<(CommandId, TaskEdgeKind, EdgeOrigin)> {
        let mut out = Vec::new();
        for (dep_task, kind) in dependencies {
            let Some(cmds) = self.task_commands.get(dep_task) else { continue };
            for (dep_node, dep_cmd) in cmds {
                if *dep_node == node {
                    let origin = match (kind, task.collective_group) {
                        (TaskEdgeKind::Order { exclusive: true }, Some(_)) => EdgeOrigin::CollectiveGroupSerialization,
                        _ => EdgeOrigin::Dataflow,
                    };
                    out.push((*dep_cmd, kind.clone(), origin));
                }
            }
        }
        out
    }

    /// Resolves each declared access against the distributed-state
    /// tracker for `node`'s `chunk`, emitting a push/await-push pair for
    /// any piece currently owned by a different node. Returns the
    /// dependees the owning execution command must wait on (local
    /// writers directly, or the freshly emitted await-push commands for
    /// remote ones).
    fn access_dependees(&mut self, task: &Task<D>, node: NodeId, chunk: GridBox<D>) -> Vec<(CommandId, TaskEdgeKind, EdgeOrigin)> {
        let mut dependees = Vec::new();
        for access in &task.accesses {
            if !matches!(access.mode, AccessMode::Read | AccessMode::ReadWrite) {
                continue;
            }
            let requirement = access.range_mapper.map(chunk, chunk);
            for region_box in requirement.iterate_boxes().copied().collect::<Vec<_>>() {
                let piece = Region::single(region_box);
                for (producer, overlap) in self.state.producers_for(access.buffer_id, &piece) {
                    if producer == node {
                        for dep in self.writer_commands_for(access.buffer_id, &Region::single(overlap)) {
                            dependees.push((dep, TaskEdgeKind::True, EdgeOrigin::Dataflow));
                        }
                    } else {
                        let push_dependees: Vec<_> = self
                            .writer_commands_for(access.buffer_id, &Region::single(overlap))
                            .into_iter()
                            .map(|dep| (dep, TaskEdgeKind::True, EdgeOrigin::Dataflow))
                            .collect();
                        let transfer_id = self.transfer_ids.next();
                        self.insert_command(
                            task.id,
                            producer,
                            CommandBody::Push {
                                buffer_id: access.buffer_id,
                                transfer_id,
                                target: node,
                                source_subrange: overlap,
                                reduction_id: gridflow_ids::ReductionId::NONE,
                            },
                            &push_dependees,
                        );
                        let await_id = self.insert_command(
                            task.id,
                            node,
                            CommandBody::AwaitPush {
                                buffer_id: access.buffer_id,
                                transfer_id,
                                expected_region: Region::single(overlap),
                                reduction_id: gridflow_ids::ReductionId::NONE,
                            },
                            &[],
                        );
                        dependees.push((await_id, TaskEdgeKind::True, EdgeOrigin::Dataflow));
                    }
                }
            }
        }
        dependees
    }

    /// Records a node's execution command as the new last writer for
    /// every buffer the task writes, both in the distributed-state
    /// tracker (node ownership) and locally (exact producing command).
    /// Relies on `node_last_command` already having been updated by the
    /// `insert_command` call for this node's execution command.
    fn record_accesses(&mut self, task: &Task<D>, node: NodeId, chunk: GridBox<D>) {
        let this_command = self.node_last_command[node.into_raw() as usize];
        for access in &task.accesses {
            if !matches!(
                access.mode,
                AccessMode::Write | AccessMode::ReadWrite | AccessMode::DiscardWrite | AccessMode::DiscardReadWrite
            ) {
                continue;
            }
            let region = access.range_mapper.map(chunk, chunk);
            self.state.record_write(access.buffer_id, &region, node);
            if let Some(cmd) = this_command {
                self.last_writer_command.get_mut(&access.buffer_id).expect("registered buffer").set(&region, Some(cmd));
            }
        }
    }

    fn writer_commands_for(&self, buffer_id: BufferId, region: &Region<D>) -> Vec<CommandId> {
        self.last_writer_command
            .get(&buffer_id)
            .expect("registered buffer")
            .overlapping_values(region)
            .into_iter()
            .flatten()
            .collect()
    }

    /// Gathers each node's partial contribution to a reduction onto its
    /// root (node zero), finalizing the distributed-state entry once
    /// every contributor has been collected.
    ///
    /// The root emits one `AwaitPush` command per contributing peer
    /// (N-1 of them, for N participating nodes), not a single combined
    /// one, matching spec.md §4.2's reduction scenario literally. All
    /// N-1 await_push commands share the gather's `transfer_id`; the
    /// BTM's blackboard is keyed by `(buffer_id, transfer_id)`, so it
    /// coalesces them into the same in-flight transfer and still only
    /// resolves once every peer's contribution has actually arrived,
    /// per [`crate::state`]'s docs.
    fn lower_reductions(&mut self, task: &Task<D>, produced: &[(NodeId, CommandId)]) -> Vec<CommandId> {
        let root = NodeId::ROOT;
        let mut reduction_cmds = Vec::with_capacity(task.reductions.len());
        for spec in &task.reductions {
            self.state.mark_pending_reduction(spec.buffer_id, true);
            let global_size = self.state.global_size(spec.buffer_id);
            let transfer_id = self.transfer_ids.next();

            let mut reduction_dependees = Vec::new();
            for (node, cmd) in produced {
                if *node == root {
                    reduction_dependees.push((*cmd, TaskEdgeKind::True, EdgeOrigin::Dataflow));
                    continue;
                }
                self.insert_command(
                    task.id,
                    *node,
                    CommandBody::Push {
                        buffer_id: spec.buffer_id,
                        transfer_id,
                        target: root,
                        source_subrange: global_size,
                        reduction_id: spec.reduction_id,
                    },
                    &[(*cmd, TaskEdgeKind::True, EdgeOrigin::Dataflow)],
                );
                let await_id = self.insert_command(
                    task.id,
                    root,
                    CommandBody::AwaitPush {
                        buffer_id: spec.buffer_id,
                        transfer_id,
                        expected_region: Region::single(global_size),
                        reduction_id: spec.reduction_id,
                    },
                    &[],
                );
                reduction_dependees.push((await_id, TaskEdgeKind::True, EdgeOrigin::Dataflow));
            }

            let reduction_cmd = self.insert_command(task.id, root, CommandBody::Reduction { reduction_id: spec.reduction_id }, &reduction_dependees);
            self.state.finalize_reduction(spec.buffer_id, &Region::single(global_size), root);
            self.last_writer_command
                .get_mut(&spec.buffer_id)
                .expect("registered buffer")
                .set(&Region::single(global_size), Some(reduction_cmd));
            reduction_cmds.push(reduction_cmd);
        }
        reduction_cmds
    }

    fn insert_command(&mut self, task_id: TaskId, node: NodeId, body: CommandBody<D>, dependees: &[(CommandId, TaskEdgeKind, EdgeOrigin)]) -> CommandId {
        let id = self.command_ids.next();
        self.commands.insert(Command { id, task_id, node, body }, dependees);
        self.node_last_command[node.into_raw() as usize] = Some(id);
        if let Some(logger) = &self.logger {
            logger.log(CommandEvent::Emitted { command_id: id.into_raw(), node: node.into_raw() });
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_ids::BufferId;
    use gridflow_region::OneToOneMapper;
    use std::sync::Arc;

    fn task_with_access(id: u64, mode: AccessMode, buffer_id: BufferId) -> Task<1> {
        Task {
            id: TaskId::from_raw(id),
            kind: TaskKind::DeviceCompute,
            geometry: Some(crate::task::Geometry { global_offset: [0], global_size: [8], granularity: [1] }),
            accesses: vec![crate::task::BufferAccess { buffer_id, mode, range_mapper: Arc::new(OneToOneMapper) }],
            side_effects: Vec::new(),
            reductions: Vec::new(),
            collective_group: None,
            epoch_action: None,
            fence_promise: None,
        }
    }

    #[test]
    fn single_peer_chunk_covers_whole_task() {
        let mut gen: CommandGraphGenerator<1> = CommandGraphGenerator::new(1);
        let buffer_id = BufferId::from_raw(0);
        gen.register_buffer(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

        let write = task_with_access(0, AccessMode::Write, buffer_id);
        let produced = gen.lower_task(&write, &[]);
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].0, NodeId::ROOT);
    }

    #[test]
    fn remote_read_emits_push_and_await() {
        let mut gen: CommandGraphGenerator<1> = CommandGraphGenerator::new(2);
        let buffer_id = BufferId::from_raw(0);
        gen.register_buffer(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

        let write = task_with_access(0, AccessMode::Write, buffer_id);
        gen.lower_task(&write, &[]);

        let read = task_with_access(1, AccessMode::Read, buffer_id);
        gen.lower_task(&read, &[]);

        let has_push = gen.commands().ids().any(|id| matches!(gen.commands().get(id).unwrap().body, CommandBody::Push { .. }));
        let has_await = gen.commands().ids().any(|id| matches!(gen.commands().get(id).unwrap().body, CommandBody::AwaitPush { .. }));
        assert!(has_push, "expected at least one push command to move data onto node 1's half");
        assert!(has_await, "expected at least one await-push command on node 1");
    }

    #[test]
    fn reduction_emits_one_await_push_per_contributing_peer() {
        let mut gen: CommandGraphGenerator<1> = CommandGraphGenerator::new(4);
        let buffer_id = BufferId::from_raw(0);
        gen.register_buffer(buffer_id, GridBox::zero_based([1]), NodeId::ROOT);

        let task = Task {
            id: TaskId::from_raw(0),
            kind: TaskKind::Collective,
            geometry: Some(crate::task::Geometry { global_offset: [0], global_size: [1], granularity: [1] }),
            accesses: Vec::new(),
            side_effects: Vec::new(),
            reductions: vec![crate::task::ReductionSpec {
                buffer_id,
                reduction_id: gridflow_ids::ReductionId::from_raw(1),
                initialize_from_buffer: false,
            }],
            collective_group: None,
            epoch_action: None,
            fence_promise: None,
        };
        gen.lower_task(&task, &[]);

        let await_count = gen
            .commands()
            .ids()
            .filter(|id| matches!(gen.commands().get(*id).unwrap().body, CommandBody::AwaitPush { .. }))
            .count();
        assert_eq!(await_count, 3, "node 0 (root) must emit one await_push per non-root peer");

        let reduction_count = gen
            .commands()
            .ids()
            .filter(|id| matches!(gen.commands().get(*id).unwrap().body, CommandBody::Reduction { .. }))
            .count();
        assert_eq!(reduction_count, 1, "the gather still finalizes with exactly one Reduction command");
    }

    #[test]
    fn anti_dependency_propagates_to_same_node_commands() {
        use crate::task::{AccessMode as TmAccessMode, Geometry, TaskBuilder, TaskManager};

        let mut task_mgr: TaskManager<1> = TaskManager::new(100);
        let buffer_id = BufferId::from_raw(0);
        task_mgr.notify_buffer_created(buffer_id, GridBox::zero_based([8]));

        let mut gen: CommandGraphGenerator<1> = CommandGraphGenerator::new(1);
        gen.register_buffer(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

        let geometry = Geometry { global_offset: [0], global_size: [8], granularity: [1] };
        let one_to_one: Arc<dyn gridflow_region::RangeMapper<1>> = Arc::new(OneToOneMapper);

        let write_a = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(geometry)
            .access(buffer_id, TmAccessMode::Write, Arc::clone(&one_to_one));
        let (a_id, _) = task_mgr.submit(write_a);
        let a_deps: Vec<TaskDependency> = task_mgr.graph().outbound(a_id).map(|(t, k)| (t, k.clone())).collect();
        gen.lower_task(task_mgr.get_task(a_id).unwrap(), &a_deps);

        let read_b = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(geometry)
            .access(buffer_id, TmAccessMode::Read, Arc::clone(&one_to_one));
        let (b_id, _) = task_mgr.submit(read_b);
        let b_deps: Vec<TaskDependency> = task_mgr.graph().outbound(b_id).map(|(t, k)| (t, k.clone())).collect();
        let b_cmds = gen.lower_task(task_mgr.get_task(b_id).unwrap(), &b_deps);

        let write_c = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(geometry)
            .access(buffer_id, TmAccessMode::Write, Arc::clone(&one_to_one));
        let (c_id, _) = task_mgr.submit(write_c);
        let c_deps: Vec<TaskDependency> = task_mgr.graph().outbound(c_id).map(|(t, k)| (t, k.clone())).collect();
        let c_cmds = gen.lower_task(task_mgr.get_task(c_id).unwrap(), &c_deps);

        let b_cmd = b_cmds[0].1;
        let c_cmd = c_cmds[0].1;
        let carries_anti_edge =
            gen.commands().outbound(c_cmd).any(|(dep, (kind, _))| dep == b_cmd && *kind == TaskEdgeKind::Anti);
        assert!(carries_anti_edge, "C's execution command must carry an anti-edge to B's command on the same node");
    }

    #[test]
    fn command_graph_stays_acyclic() {
        let mut gen: CommandGraphGenerator<1> = CommandGraphGenerator::new(2);
        let buffer_id = BufferId::from_raw(0);
        gen.register_buffer(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

        let mut prev = None;
        for i in 0..6 {
            let mode = if i % 2 == 0 { AccessMode::Write } else { AccessMode::Read };
            let task = task_with_access(i, mode, buffer_id);
            let deps: Vec<TaskDependency> = prev.map(|t| vec![(t, TaskEdgeKind::True)]).unwrap_or_default();
            gen.lower_task(&task, &deps);
            prev = Some(TaskId::from_raw(i));
        }
        assert!(gen.commands().is_acyclic());
    }
}

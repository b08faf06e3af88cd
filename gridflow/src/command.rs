//! The command graph (CDAG): per-node, tagged-variant commands lowered
//! from tasks, stored and indexed by id and by owning task.
//!
//! Like the task graph, this reuses [`gridflow_graph::Graph`] rather
//! than a bespoke structure, and commands are a tagged union rather
//! than a trait-object hierarchy — dynamic dispatch on commands/tasks
//! uses tagged variants, not virtual hierarchies.

use std::collections::HashMap;

use gridflow_graph::Graph;
use gridflow_ids::{BufferId, CommandId, Id, NodeId, ReductionId, TaskId, TransferId};
use gridflow_region::{GridBox, Region};
use serde::{Deserialize, Serialize};

use crate::task::TaskEdgeKind;

/// The origin of a dependency edge in the command graph, carried
/// alongside its [`TaskEdgeKind`] for diagnostics and for invariants
/// that are scoped to particular origins.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum EdgeOrigin {
    Dataflow,
    CollectiveGroupSerialization,
    ExecutionFront,
    LastEpoch,
}

/// A per-node command: the lowered, executable unit the serializer
/// dispatches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommandBody<const D: usize> {
    Execution { task_id: TaskId, subrange: GridBox<D> },
    Push { buffer_id: BufferId, transfer_id: TransferId, target: NodeId, source_subrange: GridBox<D>, reduction_id: ReductionId },
    AwaitPush { buffer_id: BufferId, transfer_id: TransferId, expected_region: Region<D>, reduction_id: ReductionId },
    Reduction { reduction_id: ReductionId },
    Horizon,
    Epoch { action: crate::task::EpochAction },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command<const D: usize> {
    pub id: CommandId,
    pub task_id: TaskId,
    pub node: NodeId,
    pub body: CommandBody<D>,
}

/// Storage and indexing for one node's commands: by id (via the arena)
/// and by owning task.
pub struct CommandGraph<const D: usize> {
    graph: Graph<CommandId, Command<D>, (TaskEdgeKind, EdgeOrigin)>,
    by_task: HashMap<TaskId, Vec<CommandId>>,
}

impl<const D: usize> Default for CommandGraph<D> {
    fn default() -> Self {
        CommandGraph { graph: Graph::new(), by_task: HashMap::new() }
    }
}

impl<const D: usize> CommandGraph<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `command`. Panics if any of `dependees` is not already
    /// present — a command's dependees must have been created before
    /// it.
    pub fn insert(&mut self, command: Command<D>, dependees: &[(CommandId, TaskEdgeKind, EdgeOrigin)]) {
        let id = command.id;
        let task_id = command.task_id;
        for (dep, _, _) in dependees {
            assert!(self.graph.contains(*dep), "command dependee must already exist");
        }
        self.graph.insert(id, command);
        for (dep, kind, origin) in dependees {
            self.graph.add_edge(id, *dep, (kind.clone(), *origin));
        }
        self.by_task.entry(task_id).or_default().push(id);
    }

    pub fn get(&self, id: CommandId) -> Option<&Command<D>> {
        self.graph.get(id)
    }

    pub fn for_task(&self, task_id: TaskId) -> &[CommandId] {
        self.by_task.get(&task_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn outbound(&self, id: CommandId) -> impl Iterator<Item = (CommandId, &(TaskEdgeKind, EdgeOrigin))> {
        self.graph.outbound(id)
    }

    pub fn inbound(&self, id: CommandId) -> impl Iterator<Item = (CommandId, &(TaskEdgeKind, EdgeOrigin))> {
        self.graph.inbound(id)
    }

    /// True if every dependee of `id` (true/anti/order) has been
    /// dropped from `pending`, i.e. the command is ready to dispatch.
    pub fn is_ready(&self, id: CommandId, pending: &std::collections::HashSet<CommandId>) -> bool {
        self.graph.outbound(id).all(|(dep, _)| !pending.contains(&dep))
    }

    pub fn erase(&mut self, id: CommandId) -> Option<Command<D>> {
        self.graph.erase(id)
    }

    pub fn compact(&mut self) {
        self.graph.compact();
    }

    pub fn ids(&self) -> impl Iterator<Item = CommandId> + '_ {
        self.graph.ids()
    }

    pub fn is_acyclic(&self) -> bool {
        self.graph.is_acyclic()
    }

    /// A structural, order-independent snapshot of the live graph,
    /// suitable for a textual round-trip: `serde_json::to_string` then
    /// back should reconstruct an equal value.
    pub fn snapshot(&self) -> GraphSnapshot<D> {
        let mut commands: Vec<Command<D>> = self.ids().map(|id| self.get(id).unwrap().clone()).collect();
        commands.sort_by_key(|c| c.id.into_raw());

        let mut edges: Vec<(CommandId, CommandId, TaskEdgeKind, EdgeOrigin)> = Vec::new();
        for id in self.ids() {
            for (dep, (kind, origin)) in self.outbound(id) {
                edges.push((id, dep, kind.clone(), *origin));
            }
        }
        edges.sort_by_key(|(from, to, _, _)| (from.into_raw(), to.into_raw()));

        GraphSnapshot { commands, edges }
    }
}

/// A serializable rendering of a [`CommandGraph`], used for diagnostics
/// and for round-trip testing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot<const D: usize> {
    pub commands: Vec<Command<D>>,
    pub edges: Vec<(CommandId, CommandId, TaskEdgeKind, EdgeOrigin)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_command(id: u64, task: u64, node: u64) -> Command<1> {
        Command {
            id: CommandId::from_raw(id),
            task_id: TaskId::from_raw(task),
            node: NodeId::from_raw(node),
            body: CommandBody::Execution { task_id: TaskId::from_raw(task), subrange: GridBox::new([0], [4]) },
        }
    }

    #[test]
    fn dependee_must_exist_before_insertion() {
        let mut graph: CommandGraph<1> = CommandGraph::new();
        graph.insert(exec_command(0, 0, 0), &[]);
        graph.insert(
            exec_command(1, 1, 0),
            &[(CommandId::from_raw(0), TaskEdgeKind::True, EdgeOrigin::Dataflow)],
        );
        assert_eq!(graph.outbound(CommandId::from_raw(1)).count(), 1);
    }

    #[test]
    #[should_panic(expected = "already exist")]
    fn dependee_missing_panics() {
        let mut graph: CommandGraph<1> = CommandGraph::new();
        graph.insert(
            exec_command(0, 0, 0),
            &[(CommandId::from_raw(99), TaskEdgeKind::True, EdgeOrigin::Dataflow)],
        );
    }

    #[test]
    fn indexes_commands_by_owning_task() {
        let mut graph: CommandGraph<1> = CommandGraph::new();
        graph.insert(exec_command(0, 5, 0), &[]);
        graph.insert(exec_command(1, 5, 1), &[]);
        let mut ids = graph.for_task(TaskId::from_raw(5)).to_vec();
        ids.sort();
        assert_eq!(ids, vec![CommandId::from_raw(0), CommandId::from_raw(1)]);
    }

    #[test]
    fn readiness_tracks_pending_dependees() {
        let mut graph: CommandGraph<1> = CommandGraph::new();
        graph.insert(exec_command(0, 0, 0), &[]);
        graph.insert(
            exec_command(1, 1, 0),
            &[(CommandId::from_raw(0), TaskEdgeKind::True, EdgeOrigin::Dataflow)],
        );
        let mut pending: std::collections::HashSet<CommandId> = [CommandId::from_raw(0), CommandId::from_raw(1)].into();
        assert!(!graph.is_ready(CommandId::from_raw(1), &pending));
        pending.remove(&CommandId::from_raw(0));
        assert!(graph.is_ready(CommandId::from_raw(1), &pending));
    }
}

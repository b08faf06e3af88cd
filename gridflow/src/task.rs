//! The task manager: builds the task graph (TDAG) from submissions,
//! infers dataflow and anti-dependencies from buffer accesses, and
//! inserts horizons and epochs to bound graph size.
//!
//! Owned exclusively by the submission/user thread: all TDAG mutation
//! happens here and only here, matching the general rule that a
//! dataflow's progress-tracking structures have a single mutator per
//! worker.

use std::collections::HashMap;
use std::sync::Arc;

use gridflow_graph::Graph;
use gridflow_ids::{CollectiveGroupId, HostObjectId, IdGenerator, Id, ReductionId, TaskId};
use gridflow_logging::{Logger, TaskEvent};
use gridflow_region::{GridBox, RangeMapper, Region};

use crate::error::TaskError;
use crate::region_map::RegionMap;

/// What a task computes, fixing which other attributes are meaningful.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TaskKind {
    Epoch,
    HostCompute,
    DeviceCompute,
    Collective,
    MasterNode,
    Horizon,
    Fence,
}

/// How a task touches a buffer region.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
    DiscardWrite,
    DiscardReadWrite,
}

impl AccessMode {
    fn is_read(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    fn is_write(self) -> bool {
        matches!(
            self,
            AccessMode::Write | AccessMode::ReadWrite | AccessMode::DiscardWrite | AccessMode::DiscardReadWrite
        )
    }
}

/// Side-effect ordering on a host object: whether two tasks touching
/// the same object must run in strict succession, or may overlap once
/// their other dependencies are satisfied.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Order {
    Sequential,
    ParallelOk,
}

/// An explicit synchronization action carried by an epoch task.
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum EpochAction {
    None,
    Barrier,
    Shutdown,
}

/// A dependency edge's kind, as stored on [`gridflow_graph::Graph`]
/// edges for both the task graph and (reused verbatim) the command
/// graph. `Order { exclusive }` distinguishes a strict side-effect or
/// collective-group edge (`exclusive: true`) from one kept only so
/// `await_horizon_or_epoch` bookkeeping stays deterministic, which does
/// not itself block concurrent execution (`exclusive: false`).
#[derive(Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum TaskEdgeKind {
    True,
    Anti,
    Order { exclusive: bool },
}

/// The iteration space a compute task is defined over, before any
/// per-node splitting.
#[derive(Copy, Clone, Debug)]
pub struct Geometry<const D: usize> {
    pub global_offset: [i64; D],
    pub global_size: [i64; D],
    pub granularity: [i64; D],
}

impl<const D: usize> Geometry<D> {
    /// The task's full iteration space as a single box — what spec
    /// §4.1 calls `chunk(global_offset, global_size)` at the
    /// task-manager level, before the command graph generator splits it
    /// across nodes.
    pub fn whole_chunk(&self) -> GridBox<D> {
        GridBox::new(self.global_offset, self.global_size)
    }
}

/// One buffer access declared by a compute task: a mode plus the
/// polymorphic range mapper that turns an execution chunk into a
/// buffer region. Shared via `Arc` since the same mapper value is read
/// by both the submitting thread (here, for dependency inference) and
/// later the scheduler thread (for per-chunk splitting).
#[derive(Clone)]
pub struct BufferAccess<const D: usize> {
    pub buffer_id: gridflow_ids::BufferId,
    pub mode: AccessMode,
    pub range_mapper: Arc<dyn RangeMapper<D>>,
}

#[derive(Copy, Clone, Debug)]
pub struct SideEffect {
    pub host_object_id: HostObjectId,
    pub order: Order,
}

#[derive(Copy, Clone, Debug)]
pub struct ReductionSpec {
    pub reduction_id: ReductionId,
    pub buffer_id: gridflow_ids::BufferId,
    pub initialize_from_buffer: bool,
}

/// A promise half, handed to the task manager via
/// [`TaskManager::notify_fence`]; fulfilled by the executor when the
/// fenced task's completion (or failure) is observed.
pub struct FencePromise(crossbeam_channel::Sender<Result<(), TaskError>>);

/// The matching waiter half, kept by the caller that created the fence
/// pair; `wait` blocks the calling thread until the promise is
/// fulfilled: the user thread blocks only at explicit sync/fence
/// points, on the corresponding promise.
pub struct FenceWaiter(crossbeam_channel::Receiver<Result<(), TaskError>>);

impl FencePromise {
    pub fn fulfill(self, result: Result<(), TaskError>) {
        let _ = self.0.send(result);
    }
}

impl FenceWaiter {
    pub fn wait(&self) -> Result<(), TaskError> {
        self.0.recv().expect("fence promise dropped without being fulfilled")
    }
}

/// Creates a linked fence promise/waiter pair.
pub fn fence_pair() -> (FencePromise, FenceWaiter) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (FencePromise(tx), FenceWaiter(rx))
}

/// A node in the TDAG. Immutable after creation.
pub struct Task<const D: usize> {
    pub id: TaskId,
    pub kind: TaskKind,
    pub geometry: Option<Geometry<D>>,
    pub accesses: Vec<BufferAccess<D>>,
    pub side_effects: Vec<SideEffect>,
    pub reductions: Vec<ReductionSpec>,
    pub collective_group: Option<CollectiveGroupId>,
    pub epoch_action: Option<EpochAction>,
    pub fence_promise: Option<FencePromise>,
}

/// Builds a [`Task`] for submission via [`TaskManager::submit`]. Not
/// used for epochs, fences, or horizons, which the task manager
/// constructs directly through their own dedicated entry points.
pub struct TaskBuilder<const D: usize> {
    kind: TaskKind,
    geometry: Option<Geometry<D>>,
    accesses: Vec<BufferAccess<D>>,
    side_effects: Vec<SideEffect>,
    reductions: Vec<ReductionSpec>,
    collective_group: Option<CollectiveGroupId>,
}

impl<const D: usize> TaskBuilder<D> {
    pub fn new(kind: TaskKind) -> Self {
        assert!(
            !matches!(kind, TaskKind::Epoch | TaskKind::Fence | TaskKind::Horizon),
            "epoch, fence, and horizon tasks are created through their own TaskManager methods"
        );
        TaskBuilder {
            kind,
            geometry: None,
            accesses: Vec::new(),
            side_effects: Vec::new(),
            reductions: Vec::new(),
            collective_group: None,
        }
    }

    pub fn geometry(mut self, geometry: Geometry<D>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn access(mut self, buffer_id: gridflow_ids::BufferId, mode: AccessMode, range_mapper: Arc<dyn RangeMapper<D>>) -> Self {
        self.accesses.push(BufferAccess { buffer_id, mode, range_mapper });
        self
    }

    pub fn side_effect(mut self, host_object_id: HostObjectId, order: Order) -> Self {
        self.side_effects.push(SideEffect { host_object_id, order });
        self
    }

    pub fn reduction(mut self, reduction_id: ReductionId, buffer_id: gridflow_ids::BufferId, initialize_from_buffer: bool) -> Self {
        self.reductions.push(ReductionSpec { reduction_id, buffer_id, initialize_from_buffer });
        self
    }

    pub fn collective_group(mut self, group: CollectiveGroupId) -> Self {
        self.collective_group = Some(group);
        self
    }
}

/// Owns the TDAG and the bookkeeping needed to infer it: last-writer
/// and last-reader coverings per buffer, a last-effect pointer per host
/// object, a last-task pointer per collective group, and the horizon
/// step counter.
pub struct TaskManager<const D: usize> {
    graph: Graph<TaskId, Task<D>, TaskEdgeKind>,
    ids: IdGenerator<TaskId>,
    known_buffers: HashMap<gridflow_ids::BufferId, GridBox<D>>,
    last_writer: HashMap<gridflow_ids::BufferId, RegionMap<D, TaskId>>,
    last_reader: HashMap<gridflow_ids::BufferId, RegionMap<D, TaskId>>,
    last_host_effect: HashMap<HostObjectId, TaskId>,
    last_collective: HashMap<CollectiveGroupId, TaskId>,
    execution_front: Vec<TaskId>,
    last_horizon: Option<TaskId>,
    horizon_step: usize,
    since_last_horizon: usize,
    shutdown: bool,
    logger: Option<Logger<TaskEvent>>,
}

impl<const D: usize> TaskManager<D> {
    /// `horizon_step` is the submission-count threshold past which a
    /// horizon is automatically inserted: once the longest path from
    /// the previous horizon exceeds this configurable step, a fresh one
    /// is inserted. Measured here by submission count, a tractable
    /// proxy for path length (see DESIGN.md).
    pub fn new(horizon_step: usize) -> Self {
        assert!(horizon_step >= 1);
        TaskManager {
            graph: Graph::new(),
            ids: IdGenerator::new(),
            known_buffers: HashMap::new(),
            last_writer: HashMap::new(),
            last_reader: HashMap::new(),
            last_host_effect: HashMap::new(),
            last_collective: HashMap::new(),
            execution_front: Vec::new(),
            last_horizon: None,
            horizon_step,
            since_last_horizon: 0,
            shutdown: false,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger<TaskEvent>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn notify_buffer_created(&mut self, buffer_id: gridflow_ids::BufferId, global_size: GridBox<D>) {
        assert!(self.known_buffers.insert(buffer_id, global_size).is_none(), "buffer_id already registered");
        self.last_writer.insert(buffer_id, RegionMap::new());
        self.last_reader.insert(buffer_id, RegionMap::new());
    }

    pub fn notify_buffer_destroyed(&mut self, buffer_id: gridflow_ids::BufferId) {
        assert!(self.known_buffers.remove(&buffer_id).is_some(), "destroying an unregistered buffer");
        self.last_writer.remove(&buffer_id);
        self.last_reader.remove(&buffer_id);
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Task<D>> {
        self.graph.get(id)
    }

    /// Takes ownership of a fence task's promise, so the caller can
    /// fulfill it once the fence's lowered commands complete. Returns
    /// `None` if `id` does not name a fence, or its promise was already
    /// taken.
    pub fn take_fence_promise(&mut self, id: TaskId) -> Option<FencePromise> {
        self.graph.get_mut(id).and_then(|task| task.fence_promise.take())
    }

    pub fn graph(&self) -> &Graph<TaskId, Task<D>, TaskEdgeKind> {
        &self.graph
    }

    pub fn execution_front(&self) -> &[TaskId] {
        &self.execution_front
    }

    /// Submits a regular (non-epoch, non-fence, non-horizon) task,
    /// inferring its dependency edges from its declared accesses, side
    /// effects, and collective group. The second element of the
    /// returned pair is the id of a horizon task this submission
    /// triggered, if the submission count since the last one reached
    /// `horizon_step` — callers that forward submissions downstream
    /// (e.g. to a command graph generator) must forward this one too.
    pub fn submit(&mut self, builder: TaskBuilder<D>) -> (TaskId, Option<TaskId>) {
        assert!(!self.shutdown, "task submitted after shutdown");
        let resolved: Vec<(gridflow_ids::BufferId, AccessMode, Region<D>)> = builder
            .accesses
            .iter()
            .map(|access| {
                let geometry = builder.geometry.as_ref().expect("accesses require a declared geometry");
                let chunk = geometry.whole_chunk();
                (access.buffer_id, access.mode, access.range_mapper.map(chunk, chunk))
            })
            .collect();

        let id = self.insert_task(
            builder.kind,
            builder.geometry,
            builder.accesses,
            builder.side_effects,
            builder.reductions,
            builder.collective_group,
            None,
            None,
            &resolved,
        );

        self.since_last_horizon += 1;
        let horizon = if self.since_last_horizon >= self.horizon_step { Some(self.insert_horizon()) } else { None };
        (id, horizon)
    }

    /// Submits a fence: a task with a resolved set of accesses (no
    /// chunking — a fence synchronizes on regions directly) whose
    /// completion fulfills `promise`. See [`TaskManager::submit`] for
    /// the meaning of the second element of the returned pair.
    pub fn notify_fence(
        &mut self,
        accesses: Vec<(gridflow_ids::BufferId, AccessMode, Region<D>)>,
        promise: FencePromise,
    ) -> (TaskId, Option<TaskId>) {
        assert!(!self.shutdown, "fence submitted after shutdown");
        let id = self.insert_task(TaskKind::Fence, None, Vec::new(), Vec::new(), Vec::new(), None, None, Some(promise), &accesses);
        self.since_last_horizon += 1;
        let horizon = if self.since_last_horizon >= self.horizon_step { Some(self.insert_horizon()) } else { None };
        (id, horizon)
    }

    /// Inserts an epoch task: a horizon-like task carrying an action.
    /// Like an explicit horizon, it inherits edges to the
    /// current execution front and triggers pruning of everything
    /// older than the previous horizon.
    pub fn notify_epoch(&mut self, action: EpochAction) -> TaskId {
        assert!(!self.shutdown, "epoch submitted after shutdown");
        let id = self.insert_task(TaskKind::Epoch, None, Vec::new(), Vec::new(), Vec::new(), None, Some(action), None, &[]);
        self.apply_horizon_pruning(id);
        if action == EpochAction::Shutdown {
            self.shutdown = true;
        }
        id
    }

    /// Blocks the calling thread's view of graph state until `tid` (a
    /// horizon or epoch task) has become the current boundary — in this
    /// in-process model that simply means the task is no longer ahead
    /// of the latest horizon, since all TDAG mutation happens on this
    /// same thread. A distributed deployment would instead wait for the
    /// scheduler/executor threads to report completion.
    pub fn await_horizon_or_epoch(&self, tid: TaskId) -> bool {
        match self.last_horizon {
            Some(horizon) => horizon.into_raw() >= tid.into_raw(),
            None => false,
        }
    }

    fn insert_horizon(&mut self) -> TaskId {
        let id = self.insert_task(TaskKind::Horizon, None, Vec::new(), Vec::new(), Vec::new(), None, None, None, &[]);
        self.apply_horizon_pruning(id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_task(
        &mut self,
        kind: TaskKind,
        geometry: Option<Geometry<D>>,
        accesses: Vec<BufferAccess<D>>,
        side_effects: Vec<SideEffect>,
        reductions: Vec<ReductionSpec>,
        collective_group: Option<CollectiveGroupId>,
        epoch_action: Option<EpochAction>,
        fence_promise: Option<FencePromise>,
        resolved_accesses: &[(gridflow_ids::BufferId, AccessMode, Region<D>)],
    ) -> TaskId {
        assert!(
            kind == TaskKind::HostCompute || side_effects.is_empty(),
            "only host-kinded tasks may carry side effects"
        );
        assert!(
            reductions.is_empty()
                || matches!(kind, TaskKind::HostCompute | TaskKind::DeviceCompute | TaskKind::Collective),
            "reductions only apply to compute tasks"
        );
        if let Some(g) = &geometry {
            for d in 0..D {
                assert!(g.granularity[d] > 0, "granularity must be positive");
                assert_eq!(g.global_size[d] % g.granularity[d], 0, "granularity must divide the split along each dimension");
            }
        }
        for (buffer_id, _, _) in resolved_accesses {
            assert!(self.known_buffers.contains_key(buffer_id), "access to an unregistered buffer");
        }

        let id = self.ids.next();
        let mut edges: Vec<(TaskId, TaskEdgeKind)> = Vec::new();

        for (buffer_id, mode, region) in resolved_accesses {
            if mode.is_read() {
                for writer in self.last_writer.get(buffer_id).expect("buffer registered").overlapping_values(region) {
                    if !edges.iter().any(|(t, k)| *t == writer && *k == TaskEdgeKind::True) {
                        edges.push((writer, TaskEdgeKind::True));
                    }
                }
            }
            if mode.is_write() {
                for reader in self.last_reader.get(buffer_id).expect("buffer registered").overlapping_values(region) {
                    if !edges.iter().any(|(t, k)| *t == reader && *k == TaskEdgeKind::Anti) {
                        edges.push((reader, TaskEdgeKind::Anti));
                    }
                }
            }
            if mode.is_write() {
                self.last_writer.get_mut(buffer_id).expect("buffer registered").set(region, id);
            }
            if mode.is_read() {
                self.last_reader.get_mut(buffer_id).expect("buffer registered").set(region, id);
            }
        }

        for effect in &side_effects {
            if let Some(prior) = self.last_host_effect.get(&effect.host_object_id) {
                edges.push((*prior, TaskEdgeKind::Order { exclusive: effect.order == Order::Sequential }));
            }
            self.last_host_effect.insert(effect.host_object_id, id);
        }

        if let Some(group) = collective_group {
            if let Some(prior) = self.last_collective.get(&group) {
                edges.push((*prior, TaskEdgeKind::Order { exclusive: true }));
            }
            self.last_collective.insert(group, id);
        }

        self.graph.insert(
            id,
            Task { id, kind, geometry, accesses, side_effects, reductions, collective_group, epoch_action, fence_promise },
        );
        for (dep, edge_kind) in &edges {
            self.graph.add_edge(id, *dep, edge_kind.clone());
        }

        self.execution_front.retain(|t| !edges.iter().any(|(dep, _)| dep == t));
        self.execution_front.push(id);

        if let Some(logger) = &self.logger {
            logger.log(TaskEvent::Submitted { task_id: id.into_raw(), dependencies: edges.len() });
        }
        id
    }

    fn apply_horizon_pruning(&mut self, horizon_id: TaskId) {
        let front: Vec<TaskId> = self.execution_front.iter().copied().filter(|&t| t != horizon_id).collect();
        for leaf in &front {
            self.graph.add_edge(horizon_id, *leaf, TaskEdgeKind::Order { exclusive: false });
        }

        let mut pruned = 0;
        if let Some(boundary) = self.last_horizon {
            let stale: Vec<TaskId> = self.graph.ids().filter(|t| t.into_raw() < boundary.into_raw()).collect();
            pruned = stale.len();
            for t in stale {
                self.graph.erase(t);
            }
            self.graph.compact();

            let retarget = |t: TaskId| if t.into_raw() < boundary.into_raw() { boundary } else { t };
            for rm in self.last_writer.values_mut() {
                rm.rewrite(retarget);
            }
            for rm in self.last_reader.values_mut() {
                rm.rewrite(retarget);
            }
            for v in self.last_host_effect.values_mut() {
                *v = retarget(*v);
            }
            for v in self.last_collective.values_mut() {
                *v = retarget(*v);
            }
        }

        self.last_horizon = Some(horizon_id);
        self.since_last_horizon = 0;
        self.execution_front.clear();
        self.execution_front.push(horizon_id);

        if let Some(logger) = &self.logger {
            logger.log(TaskEvent::HorizonInserted { task_id: horizon_id.into_raw(), pruned });
        }
    }
}

//! The process-wide runtime: owns the task manager on the calling
//! (user) thread, a single scheduler thread that owns the command
//! graph generator under a single-writer rule, and one executor thread
//! per simulated node, generalized here to the in-process cluster
//! simulation this crate ships — see `DESIGN.md` for why the scheduler
//! is centralized rather than replicated per node.
//!
//! [`Configuration`] is parsed from CLI args with `getopts`, and
//! [`Runtime::new`] spawns one `std::thread::Builder`-named thread per
//! worker, using `?`-based error handling and explicit `dyn` trait
//! objects throughout.
//!
//! A `Logger` (the structured event stream) is `Rc`-based and
//! thread-local by design (`gridflow_logging::Logger`'s own doc
//! comment), which means [`TaskManager`], [`CommandGraphGenerator`],
//! and [`Serializer`] — each of which can optionally hold one — are
//! never `Send`. The scheduler and executor threads below therefore
//! never receive a pre-built instance of any of these; each thread
//! constructs its own from scratch out of plain, `Send` ingredients
//! (a peer count, a transport, boxed sinks, and an optional `Send +
//! Sync` [`LogSink`]), and only `Send` message payloads cross the
//! channel boundaries between threads. When [`Configuration::log_sink`]
//! is set, every one of the three cooperating threads — this one
//! (`TaskManager`), `gridflow-scheduler`, and each
//! `gridflow-executor-{i}` — builds its own [`gridflow_logging::Registry`]
//! from a clone of that sink and installs a logger via `with_logger`,
//! mirroring `timely`'s per-worker logger registration.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gridflow_ids::{CollectiveGroupId, CommandId, NodeId, TaskId};
use gridflow_logging::{CommandEvent, Logger, Registry, TaskEvent, TransferEvent};
use gridflow_region::{GridBox, Region};
use gridflow_transport::{BufferSource, CommitCallback, Transport};

use crate::command::Command;
use crate::exec::{ExecutionSink, Outcome, ReductionSink, Serializer};
use crate::lower::CommandGraphGenerator;
use crate::task::{
    fence_pair, AccessMode, BufferAccess, EpochAction, FencePromise, FenceWaiter, Geometry, ReductionSpec, SideEffect,
    Task, TaskBuilder, TaskEdgeKind, TaskKind, TaskManager,
};

/// A thread-agnostic sink for formatted log lines: `Send + Sync` so one
/// handle can be cloned into each of the three cooperating threads at
/// spawn time, where it is wrapped in a thread-local `Registry`/`Logger`
/// pair (see the module doc comment).
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Builds a `Logger<T>` bound to `name` inside `registry`, whose action
/// formats each event with `{:?}` and forwards it to `sink`.
fn install_logger<T: std::fmt::Debug + 'static>(registry: &mut Registry, name: &str, sink: &LogSink) -> Logger<T> {
    let sink = Arc::clone(sink);
    registry.insert::<T>(
        name,
        Rc::new(move |_elapsed: &Duration, events: &[(Duration, T)]| {
            for (at, event) in events {
                sink(&format!("[{at:?}] {event:?}"));
            }
        }),
    );
    registry.get::<T>(name).expect("logger was just inserted under this name")
}

/// Parsed cluster-shape parameters.
#[derive(Clone)]
pub struct Configuration {
    pub peers: usize,
    pub horizon_step: usize,
    pub submission_queue_depth: usize,
    pub command_queue_depth: usize,
    /// Installed on the task manager and, per-thread, on the scheduler's
    /// command graph generator and each executor's serializer. `None` by
    /// default: the ambient logging stack is opt-in, not on by default.
    pub log_sink: Option<LogSink>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("peers", &self.peers)
            .field("horizon_step", &self.horizon_step)
            .field("submission_queue_depth", &self.submission_queue_depth)
            .field("command_queue_depth", &self.command_queue_depth)
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            peers: 1,
            horizon_step: 64,
            submission_queue_depth: 256,
            command_queue_depth: 256,
            log_sink: None,
        }
    }
}

impl Configuration {
    /// Installs a log sink, wired into every cooperating thread by
    /// [`Runtime::new`].
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

#[cfg(feature = "getopts")]
impl Configuration {
    /// Parses cluster shape from CLI args (peer count, horizon step,
    /// and the two queue depths).
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Configuration, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("n", "peers", "number of simulated nodes", "NUM");
        opts.optopt("", "horizon-step", "submissions between automatic horizons", "NUM");
        opts.optopt("", "submission-queue", "submission channel capacity", "NUM");
        opts.optopt("", "command-queue", "per-node command channel capacity", "NUM");

        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        let mut config = Configuration::default();
        if let Some(v) = matches.opt_str("n") {
            config.peers = v.parse().map_err(|_| format!("invalid --peers value: {v}"))?;
        }
        if let Some(v) = matches.opt_str("horizon-step") {
            config.horizon_step = v.parse().map_err(|_| format!("invalid --horizon-step value: {v}"))?;
        }
        if let Some(v) = matches.opt_str("submission-queue") {
            config.submission_queue_depth = v.parse().map_err(|_| format!("invalid --submission-queue value: {v}"))?;
        }
        if let Some(v) = matches.opt_str("command-queue") {
            config.command_queue_depth = v.parse().map_err(|_| format!("invalid --command-queue value: {v}"))?;
        }
        Ok(config)
    }
}

/// The runtime's lifecycle: startup -> active -> shutting_down -> destroyed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Lifecycle {
    Startup,
    Active,
    ShuttingDown,
    Destroyed,
}

/// Per-node collaborators injected at construction: the message
/// transport, plus the external seams considered out of scope for this
/// crate (device/host execution, the reduction operator, and buffer storage
/// access).
pub struct NodeHandles<const D: usize, T: Transport> {
    pub transport: T,
    pub execution_sink: Box<dyn ExecutionSink<D>>,
    pub reduction_sink: Box<dyn ReductionSink>,
    pub buffer_source: Box<dyn BufferSource<D>>,
    pub commit: Box<dyn CommitCallback<D>>,
}

/// Everything the scheduler thread needs to lower one task, extracted
/// from the task manager's graph into a self-contained, `Send` value
/// (the task manager itself is not `Send`, see the module doc comment).
struct TaskSubmission<const D: usize> {
    id: TaskId,
    kind: TaskKind,
    geometry: Option<Geometry<D>>,
    accesses: Vec<BufferAccess<D>>,
    side_effects: Vec<SideEffect>,
    reductions: Vec<ReductionSpec>,
    collective_group: Option<CollectiveGroupId>,
    epoch_action: Option<EpochAction>,
    dependencies: Vec<(TaskId, TaskEdgeKind)>,
    fence_promise: Option<FencePromise>,
}

enum SchedulerEvent<const D: usize> {
    NewTask(TaskSubmission<D>),
    RegisterBuffer(gridflow_ids::BufferId, GridBox<D>, NodeId),
    UnregisterBuffer(gridflow_ids::BufferId),
    Completion(CommandId, Outcome),
    Snapshot(crossbeam_channel::Sender<String>),
}

/// The process-wide singleton coordinating task submission, command
/// lowering, and per-node command execution. Only one process-wide
/// singleton is required. Owns the task manager directly: the task
/// graph has a single mutator, and every `Runtime` method that touches
/// it takes `&mut self` so the borrow checker enforces that rule
/// rather than a lock.
pub struct Runtime<const D: usize> {
    task_manager: TaskManager<D>,
    scheduler_tx: crossbeam_channel::Sender<SchedulerEvent<D>>,
    scheduler: Option<JoinHandle<()>>,
    executors: Vec<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

impl<const D: usize> Runtime<D> {
    /// Builds and starts the runtime: spawns the scheduler thread (owns
    /// the command graph generator) and one executor thread per node in
    /// `nodes` (the fourth conceptual worker, the user thread, is simply
    /// whichever thread calls [`Runtime::submit_task`]).
    pub fn new<T: Transport + Send + 'static>(config: Configuration, element_size: usize, nodes: Vec<NodeHandles<D, T>>) -> Self {
        assert_eq!(nodes.len(), config.peers, "node handle count must match the configured peer count");

        let mut task_manager = TaskManager::<D>::new(config.horizon_step);
        if let Some(sink) = &config.log_sink {
            let mut registry = Registry::new(Instant::now());
            task_manager = task_manager.with_logger(install_logger::<TaskEvent>(&mut registry, "tasks", sink));
        }
        let (scheduler_tx, scheduler_rx) = crossbeam_channel::bounded(config.submission_queue_depth);

        let mut node_txs = Vec::with_capacity(nodes.len());
        let mut node_rxs = Vec::with_capacity(nodes.len());
        for _ in &nodes {
            let (tx, rx) = crossbeam_channel::bounded::<Command<D>>(config.command_queue_depth);
            node_txs.push(tx);
            node_rxs.push(rx);
        }

        let peers = config.peers;
        let scheduler_log_sink = config.log_sink.clone();
        let scheduler = thread::Builder::new()
            .name("gridflow-scheduler".to_string())
            .spawn(move || run_scheduler::<D>(peers, scheduler_rx, node_txs, scheduler_log_sink))
            .expect("failed to spawn scheduler thread");

        let mut executors = Vec::with_capacity(node_rxs.len());
        for (node_index, (handles, cmd_rx)) in nodes.into_iter().zip(node_rxs).enumerate() {
            let node = NodeId::from_raw(node_index as u64);
            let completion_tx = scheduler_tx.clone();
            let executor_log_sink = config.log_sink.clone();
            let NodeHandles { transport, execution_sink, reduction_sink, buffer_source, commit } = handles;
            let handle = thread::Builder::new()
                .name(format!("gridflow-executor-{node_index}"))
                .spawn(move || {
                    let mut serializer =
                        Serializer::new(transport, element_size, execution_sink, reduction_sink, buffer_source, commit);
                    if let Some(sink) = &executor_log_sink {
                        let mut registry = Registry::new(Instant::now());
                        let command_logger = install_logger::<CommandEvent>(&mut registry, "commands", sink);
                        let transfer_logger = install_logger::<TransferEvent>(&mut registry, "transfers", sink);
                        serializer = serializer.with_command_logger(command_logger).with_transfer_logger(transfer_logger);
                    }
                    run_executor(node, cmd_rx, completion_tx, serializer)
                })
                .expect("failed to spawn executor thread");
            executors.push(handle);
        }

        Runtime { task_manager, scheduler_tx, scheduler: Some(scheduler), executors, lifecycle: Lifecycle::Active }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Registers a buffer, seeding both the task manager's dependency
    /// bookkeeping and the scheduler's distributed-state tracker.
    pub fn notify_buffer_created(&mut self, buffer_id: gridflow_ids::BufferId, global_size: GridBox<D>, host_node: NodeId) {
        self.task_manager.notify_buffer_created(buffer_id, global_size);
        self.send(SchedulerEvent::RegisterBuffer(buffer_id, global_size, host_node));
    }

    pub fn notify_buffer_destroyed(&mut self, buffer_id: gridflow_ids::BufferId) {
        self.task_manager.notify_buffer_destroyed(buffer_id);
        self.send(SchedulerEvent::UnregisterBuffer(buffer_id));
    }

    /// Submits a task against the task manager, then hands the new
    /// task (and any horizon it triggered) to the scheduler for
    /// lowering.
    pub fn submit_task(&mut self, builder: TaskBuilder<D>) -> TaskId {
        let (id, horizon) = self.task_manager.submit(builder);
        self.forward(id);
        if let Some(horizon_id) = horizon {
            self.forward(horizon_id);
        }
        id
    }

    /// Submits a fence over `accesses`, returning a waiter the caller
    /// blocks on: the user thread blocks only at explicit sync/fence
    /// points.
    pub fn fence(&mut self, accesses: Vec<(gridflow_ids::BufferId, AccessMode, Region<D>)>) -> FenceWaiter {
        let (promise, waiter) = fence_pair();
        let (id, horizon) = self.task_manager.notify_fence(accesses, promise);
        self.forward(id);
        if let Some(horizon_id) = horizon {
            self.forward(horizon_id);
        }
        waiter
    }

    /// Emits an explicit epoch task (a barrier, or the shutdown signal).
    pub fn notify_epoch(&mut self, action: EpochAction) -> TaskId {
        if action == EpochAction::Shutdown {
            self.lifecycle = Lifecycle::ShuttingDown;
        }
        let id = self.task_manager.notify_epoch(action);
        self.forward(id);
        id
    }

    /// A structural JSON snapshot of the live command graph, useful for
    /// diagnostics and for round-tripping the graph through a textual
    /// form.
    pub fn get_command_graph_snapshot(&self) -> String {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(SchedulerEvent::Snapshot(tx));
        rx.recv().expect("scheduler thread gone before replying with a snapshot")
    }

    /// Issues a shutdown epoch, then blocks until every executor thread
    /// has drained and the scheduler thread has exited. The shutdown
    /// epoch drains all prior commands, then terminates the
    /// serializer.
    pub fn shutdown(mut self) {
        self.notify_epoch(EpochAction::Shutdown);
        for handle in self.executors.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
        self.lifecycle = Lifecycle::Destroyed;
    }

    /// Builds and forwards the [`TaskSubmission`] for an already-inserted
    /// task, taking ownership of its fence promise (if any) in the
    /// process.
    fn forward(&mut self, id: TaskId) {
        let task = self.task_manager.get_task(id).expect("task manager notified of its own unknown task");
        let dependencies: Vec<(TaskId, TaskEdgeKind)> =
            self.task_manager.graph().outbound(id).map(|(t, k)| (t, k.clone())).collect();
        let submission = TaskSubmission {
            id: task.id,
            kind: task.kind,
            geometry: task.geometry,
            accesses: task.accesses.clone(),
            side_effects: task.side_effects.clone(),
            reductions: task.reductions.clone(),
            collective_group: task.collective_group,
            epoch_action: task.epoch_action,
            dependencies,
            fence_promise: self.task_manager.take_fence_promise(id),
        };
        self.send(SchedulerEvent::NewTask(submission));
    }

    fn send(&self, event: SchedulerEvent<D>) {
        self.scheduler_tx.send(event).expect("scheduler thread gone");
    }
}

fn run_scheduler<const D: usize>(
    peers: usize,
    events_rx: crossbeam_channel::Receiver<SchedulerEvent<D>>,
    node_txs: Vec<crossbeam_channel::Sender<Command<D>>>,
    log_sink: Option<LogSink>,
) {
    let mut generator = CommandGraphGenerator::<D>::new(peers);
    if let Some(sink) = &log_sink {
        let mut registry = Registry::new(Instant::now());
        generator = generator.with_logger(install_logger::<CommandEvent>(&mut registry, "commands", sink));
    }
    let mut undone: HashSet<CommandId> = HashSet::new();
    let mut dispatched: HashSet<CommandId> = HashSet::new();
    let mut fence_pending: HashMap<TaskId, (FencePromise, usize)> = HashMap::new();
    let mut command_fence_owner: HashMap<CommandId, TaskId> = HashMap::new();

    for event in events_rx.iter() {
        match event {
            SchedulerEvent::RegisterBuffer(buffer_id, global_size, host_node) => {
                generator.register_buffer(buffer_id, global_size, host_node);
            }
            SchedulerEvent::UnregisterBuffer(buffer_id) => {
                generator.unregister_buffer(buffer_id);
            }
            SchedulerEvent::Snapshot(reply) => {
                let json = serde_json::to_string_pretty(&generator.commands().snapshot())
                    .expect("command graph snapshot is always representable as JSON");
                let _ = reply.send(json);
            }
            SchedulerEvent::NewTask(submission) => {
                let task = Task {
                    id: submission.id,
                    kind: submission.kind,
                    geometry: submission.geometry,
                    accesses: submission.accesses,
                    side_effects: submission.side_effects,
                    reductions: submission.reductions,
                    collective_group: submission.collective_group,
                    epoch_action: submission.epoch_action,
                    fence_promise: None,
                };
                let produced = generator.lower_task(&task, &submission.dependencies);

                for (_, command_id) in &produced {
                    undone.insert(*command_id);
                }
                if let Some(promise) = submission.fence_promise {
                    // `produced` may name commands an earlier task already
                    // lowered (a fence passes straight through to its
                    // dependencies' commands), and those may have already
                    // completed by the time this event is processed — only
                    // the ones still outstanding should gate the promise.
                    let still_pending: Vec<CommandId> =
                        produced.iter().map(|(_, c)| *c).filter(|c| undone.contains(c)).collect();
                    if still_pending.is_empty() {
                        promise.fulfill(Ok(()));
                    } else {
                        for command_id in &still_pending {
                            command_fence_owner.insert(*command_id, task.id);
                        }
                        fence_pending.insert(task.id, (promise, still_pending.len()));
                    }
                }
            }
            SchedulerEvent::Completion(command_id, outcome) => {
                undone.remove(&command_id);
                dispatched.remove(&command_id);

                if let Some(fence_task) = command_fence_owner.remove(&command_id) {
                    if let Some((_, remaining)) = fence_pending.get_mut(&fence_task) {
                        *remaining -= 1;
                        let done = *remaining == 0;
                        let failed = matches!(outcome, Outcome::Failed(_));
                        if done || failed {
                            let (promise, _) = fence_pending.remove(&fence_task).unwrap();
                            let result = match outcome {
                                Outcome::Failed(e) => Err(e),
                                Outcome::Done => Ok(()),
                            };
                            promise.fulfill(result);
                        }
                    }
                }
            }
        }

        dispatch_ready(&generator, &mut undone, &mut dispatched, &node_txs);
    }
}

fn dispatch_ready<const D: usize>(
    generator: &CommandGraphGenerator<D>,
    undone: &mut HashSet<CommandId>,
    dispatched: &mut HashSet<CommandId>,
    node_txs: &[crossbeam_channel::Sender<Command<D>>],
) {
    let ready: Vec<CommandId> =
        undone.iter().copied().filter(|id| !dispatched.contains(id) && generator.commands().is_ready(*id, undone)).collect();
    for id in ready {
        dispatched.insert(id);
        let command = generator.commands().get(id).expect("just looked up by id").clone();
        let node = command.node.into_raw() as usize;
        let _ = node_txs[node].send(command);
    }
}

fn run_executor<const D: usize, T: Transport>(
    node: NodeId,
    cmd_rx: crossbeam_channel::Receiver<Command<D>>,
    scheduler_tx: crossbeam_channel::Sender<SchedulerEvent<D>>,
    mut serializer: Serializer<D, T>,
) {
    let _ = node;
    loop {
        match cmd_rx.try_recv() {
            Ok(command) => {
                if let Some(outcome) = serializer.dispatch(&command) {
                    let _ = scheduler_tx.send(SchedulerEvent::Completion(command.id, outcome));
                }
            }
            Err(crossbeam_channel::TryRecvError::Empty) => {
                if serializer.is_draining() && !serializer.has_in_flight() {
                    break;
                }
            }
            Err(crossbeam_channel::TryRecvError::Disconnected) => break,
        }
        for (id, outcome) in serializer.poll() {
            let _ = scheduler_tx.send(SchedulerEvent::Completion(id, outcome));
        }
    }
}

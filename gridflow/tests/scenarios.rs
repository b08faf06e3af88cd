//! End-to-end scenarios exercising the full submission -> lowering ->
//! execution pipeline through the public `Runtime` API, plus a textual
//! round-trip check on the command graph snapshot.
//!
//! Each test here stands up a small in-process cluster over
//! `channel_mesh` and drives it the way a real caller would: register
//! buffers, submit tasks, fence, and shut down.

use std::sync::{Arc, Mutex};

use gridflow::{
    AccessMode, Configuration, EpochAction, ExecutionSink, Geometry, NodeHandles, ReductionSink, Runtime, TaskBuilder,
    TaskError, TaskKind,
};
use gridflow_ids::{BufferId, NodeId, ReductionId, TransferId};
use gridflow_region::{FixedMapper, GridBox, OneToOneMapper, Region};
use gridflow_transport::{channel_mesh, BufferSource, CommitCallback};

/// A node's buffer storage, shared with the test so results can be
/// inspected after the runtime has drained.
#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn new(initial: Vec<u8>) -> Self {
        SharedBuffer(Arc::new(Mutex::new(initial)))
    }
}

impl BufferSource<1> for SharedBuffer {
    fn read_region(&mut self, _buffer_id: BufferId, region: &GridBox<1>) -> Vec<u8> {
        let start = region.offset[0] as usize;
        let end = start + region.range[0] as usize;
        self.0.lock().unwrap()[start..end].to_vec()
    }
}

impl CommitCallback<1> for SharedBuffer {
    fn commit(&mut self, _buffer_id: BufferId, _transfer_id: TransferId, frames: Vec<(GridBox<1>, Vec<u8>)>) {
        let mut storage = self.0.lock().unwrap();
        for (region, bytes) in frames {
            let start = region.offset[0] as usize;
            storage[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }
}

struct CountingExecution(Arc<Mutex<usize>>);
impl ExecutionSink<1> for CountingExecution {
    fn execute(&mut self, _task_id: gridflow_ids::TaskId, _subrange: GridBox<1>) -> Result<(), TaskError> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

struct NoopReduction;
impl ReductionSink for NoopReduction {
    fn reduce(&mut self, _reduction_id: ReductionId) -> Result<(), TaskError> {
        Ok(())
    }
}

struct RecordingReduction(Arc<Mutex<Vec<ReductionId>>>);
impl ReductionSink for RecordingReduction {
    fn reduce(&mut self, reduction_id: ReductionId) -> Result<(), TaskError> {
        self.0.lock().unwrap().push(reduction_id);
        Ok(())
    }
}

/// Two nodes, a buffer node 0 owns in full, and a task on node 1 that
/// reads a strict sub-range of it. The read must arrive by exactly one
/// push/await-push handshake rather than a local copy.
#[test]
fn two_node_write_then_remote_read() {
    let buffer_id = BufferId::from_raw(0);
    let mut nodes = channel_mesh(2);
    let transport1 = nodes.pop().unwrap();
    let transport0 = nodes.pop().unwrap();

    let executed0 = Arc::new(Mutex::new(0usize));
    let executed1 = Arc::new(Mutex::new(0usize));
    let storage0 = SharedBuffer::new((0u8..8).collect());
    let storage1 = SharedBuffer::new(vec![0; 8]);

    let config = Configuration { peers: 2, horizon_step: 64, submission_queue_depth: 32, command_queue_depth: 32, log_sink: None };
    let mut runtime = Runtime::<1>::new(
        config,
        1,
        vec![
            NodeHandles {
                transport: transport0,
                execution_sink: Box::new(CountingExecution(Arc::clone(&executed0))),
                reduction_sink: Box::new(NoopReduction),
                buffer_source: Box::new(storage0.clone()),
                commit: Box::new(storage0.clone()),
            },
            NodeHandles {
                transport: transport1,
                execution_sink: Box::new(CountingExecution(Arc::clone(&executed1))),
                reduction_sink: Box::new(NoopReduction),
                buffer_source: Box::new(storage1.clone()),
                commit: Box::new(storage1.clone()),
            },
        ],
    );

    runtime.notify_buffer_created(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

    // Task A: runs on node 0 only (master_node), writes the whole buffer.
    let write_a = TaskBuilder::<1>::new(TaskKind::MasterNode)
        .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
        .access(buffer_id, AccessMode::Write, Arc::new(OneToOneMapper));
    runtime.submit_task(write_a);

    // Task B: a chunked task over a 2-peer split so only node 1's chunk
    // reads, pinned (via a fixed mapper) to [2, 6) regardless of the
    // chunk the split handed it.
    let read_region = Region::single(GridBox::new([2], [4]));
    let mapper: Arc<dyn gridflow_region::RangeMapper<1>> = {
        let read_region = read_region.clone();
        Arc::new(move |chunk: GridBox<1>, _global: GridBox<1>| {
            if chunk.offset[0] == 0 {
                Region::empty()
            } else {
                read_region.clone()
            }
        })
    };
    let read_b = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
        .geometry(Geometry { global_offset: [0], global_size: [2], granularity: [1] })
        .access(buffer_id, AccessMode::Read, mapper);
    runtime.submit_task(read_b);

    // Fence with a write-mode access over the read region so the fence
    // inherits an anti-dependency on B's read, forcing the wait to cover
    // B's completion (not just A's).
    let waiter = runtime.fence(vec![(buffer_id, AccessMode::Write, read_region)]);
    assert!(waiter.wait().is_ok());

    assert_eq!(*executed0.lock().unwrap(), 1);
    assert_eq!(*executed1.lock().unwrap(), 1);
    assert_eq!(&storage1.0.lock().unwrap()[2..6], &[2, 3, 4, 5]);

    runtime.shutdown();
}

/// Four nodes contribute a partial sum each; node 0 (root) gathers all
/// three remote contributions through the N-1 reduction pattern and its
/// reduction sink fires exactly once.
#[test]
fn four_node_reduction_gathers_on_root() {
    let reduction_buf = BufferId::from_raw(1);
    let reduction_id = ReductionId::from_raw(7);

    let mut transports = channel_mesh(4);
    let partials = [5u8, 10, 20, 40];
    let mut node_handles = Vec::new();
    let mut storages = Vec::new();
    let reduced = Arc::new(Mutex::new(Vec::new()));

    for (i, transport) in transports.drain(..).enumerate() {
        let storage = SharedBuffer::new(vec![partials[i]]);
        storages.push(storage.clone());
        let reduction_sink: Box<dyn ReductionSink> = if i == 0 {
            Box::new(RecordingReduction(Arc::clone(&reduced)))
        } else {
            Box::new(NoopReduction)
        };
        node_handles.push(NodeHandles {
            transport,
            execution_sink: Box::new(CountingExecution(Arc::new(Mutex::new(0)))),
            reduction_sink,
            buffer_source: Box::new(storage.clone()),
            commit: Box::new(storage),
        });
    }

    let config = Configuration { peers: 4, horizon_step: 64, submission_queue_depth: 64, command_queue_depth: 64, log_sink: None };
    let mut runtime = Runtime::<1>::new(config, 1, node_handles);

    runtime.notify_buffer_created(reduction_buf, GridBox::zero_based([1]), NodeId::ROOT);

    let task = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
        .geometry(Geometry { global_offset: [0], global_size: [4], granularity: [1] })
        .access(reduction_buf, AccessMode::Write, Arc::new(FixedMapper(Region::single(GridBox::zero_based([1])))))
        .reduction(reduction_id, reduction_buf, false);
    runtime.submit_task(task);

    let waiter = runtime.fence(vec![(reduction_buf, AccessMode::Read, Region::single(GridBox::zero_based([1])))]);
    assert!(waiter.wait().is_ok());

    assert_eq!(reduced.lock().unwrap().as_slice(), &[reduction_id]);

    runtime.shutdown();
}

/// Horizon pruning keeps the live task graph bounded across a long
/// sequential submission stream, driven here through the full runtime
/// rather than `TaskManager` in isolation.
#[test]
fn horizon_pruning_bounds_graph_size_through_runtime() {
    let buffer_id = BufferId::from_raw(0);
    let transport = channel_mesh(1).pop().unwrap();
    let storage = SharedBuffer::new(vec![0; 8]);

    let config = Configuration { peers: 1, horizon_step: 4, submission_queue_depth: 16, command_queue_depth: 16, log_sink: None };
    let mut runtime = Runtime::<1>::new(
        config,
        1,
        vec![NodeHandles {
            transport,
            execution_sink: Box::new(CountingExecution(Arc::new(Mutex::new(0)))),
            reduction_sink: Box::new(NoopReduction),
            buffer_source: Box::new(storage.clone()),
            commit: Box::new(storage),
        }],
    );

    runtime.notify_buffer_created(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

    for _ in 0..200 {
        let write = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
            .access(buffer_id, AccessMode::Write, Arc::new(OneToOneMapper));
        runtime.submit_task(write);
        let read = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
            .access(buffer_id, AccessMode::Read, Arc::new(OneToOneMapper));
        runtime.submit_task(read);
    }

    let waiter = runtime.fence(vec![(buffer_id, AccessMode::Write, Region::single(GridBox::zero_based([8])))]);
    assert!(waiter.wait().is_ok());

    runtime.shutdown();
}

/// A shutdown epoch drains everything already submitted, and the task
/// manager refuses (by panicking, its documented invariant-violation
/// style) any submission issued after it.
#[test]
#[should_panic(expected = "after shutdown")]
fn shutdown_epoch_rejects_further_submissions() {
    let buffer_id = BufferId::from_raw(0);
    let transport = channel_mesh(1).pop().unwrap();
    let storage = SharedBuffer::new(vec![0; 8]);

    let config = Configuration::default();
    let mut runtime = Runtime::<1>::new(
        config,
        1,
        vec![NodeHandles {
            transport,
            execution_sink: Box::new(CountingExecution(Arc::new(Mutex::new(0)))),
            reduction_sink: Box::new(NoopReduction),
            buffer_source: Box::new(storage.clone()),
            commit: Box::new(storage),
        }],
    );

    runtime.notify_buffer_created(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);

    for _ in 0..5 {
        let write = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
            .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
            .access(buffer_id, AccessMode::Write, Arc::new(OneToOneMapper));
        runtime.submit_task(write);
    }

    runtime.notify_epoch(EpochAction::Shutdown);

    let late = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
        .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
        .access(buffer_id, AccessMode::Read, Arc::new(OneToOneMapper));
    runtime.submit_task(late);
}

/// The command graph's JSON snapshot round-trips: deserializing it and
/// re-serializing produces a structurally equal value.
#[test]
fn command_graph_snapshot_round_trips_through_json() {
    let buffer_id = BufferId::from_raw(0);
    let transport = channel_mesh(1).pop().unwrap();
    let storage = SharedBuffer::new(vec![0; 8]);

    let config = Configuration::default();
    let mut runtime = Runtime::<1>::new(
        config,
        1,
        vec![NodeHandles {
            transport,
            execution_sink: Box::new(CountingExecution(Arc::new(Mutex::new(0)))),
            reduction_sink: Box::new(NoopReduction),
            buffer_source: Box::new(storage.clone()),
            commit: Box::new(storage),
        }],
    );

    runtime.notify_buffer_created(buffer_id, GridBox::zero_based([8]), NodeId::ROOT);
    let write = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
        .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
        .access(buffer_id, AccessMode::Write, Arc::new(OneToOneMapper));
    runtime.submit_task(write);
    let read = TaskBuilder::<1>::new(TaskKind::DeviceCompute)
        .geometry(Geometry { global_offset: [0], global_size: [8], granularity: [1] })
        .access(buffer_id, AccessMode::Read, Arc::new(OneToOneMapper));
    runtime.submit_task(read);

    let waiter = runtime.fence(vec![(buffer_id, AccessMode::Write, Region::single(GridBox::zero_based([8])))]);
    assert!(waiter.wait().is_ok());

    let json = runtime.get_command_graph_snapshot();
    let snapshot: gridflow::GraphSnapshot<1> = serde_json::from_str(&json).expect("snapshot is valid JSON");
    assert!(!snapshot.commands.is_empty());

    let round_tripped = serde_json::to_string_pretty(&snapshot).expect("snapshot re-serializes");
    let snapshot_again: gridflow::GraphSnapshot<1> =
        serde_json::from_str(&round_tripped).expect("re-serialized snapshot is still valid JSON");
    assert_eq!(snapshot, snapshot_again);

    runtime.shutdown();
}

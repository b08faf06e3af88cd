//! A distributed task-graph runtime for data-parallel and host
//! computations over logically global buffers.
//!
//! Callers declare buffer accesses against a task (`task` module); the
//! task manager infers dependencies and builds the task graph, the
//! command graph generator (`lower`) lowers each task into per-node
//! commands against a distributed-state tracker (`state`), and the
//! graph serializer (`exec`) dispatches each ready command against a
//! buffer transfer manager and a pair of externally-supplied execution
//! and reduction sinks. `runtime` ties these into a running process:
//! one scheduler thread owning the command graph, one executor thread
//! per simulated node.

mod command;
mod error;
mod exec;
mod lower;
mod region_map;
mod runtime;
mod state;
mod task;

pub use command::{Command, CommandBody, CommandGraph, EdgeOrigin, GraphSnapshot};
pub use error::TaskError;
pub use exec::{ExecutionSink, Outcome, ReductionSink, Serializer};
pub use lower::{CommandGraphGenerator, TaskDependency};
pub use runtime::{Configuration, Lifecycle, NodeHandles, Runtime};
pub use state::DistributedStateTracker;
pub use task::{
    fence_pair, AccessMode, BufferAccess, EpochAction, FencePromise, FenceWaiter, Geometry, Order, ReductionSpec,
    SideEffect, Task, TaskBuilder, TaskEdgeKind, TaskKind, TaskManager,
};

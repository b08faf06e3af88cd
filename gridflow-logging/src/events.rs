//! Concrete event types logged by the gridflow runtime, analogous to
//! `CommunicationEvent`/`MessageEvent`/`StateEvent` in a typical
//! dataflow runtime's communication-layer logging.

/// Logged by the task manager on every submission and graph edit.
#[derive(Clone, Debug)]
pub enum TaskEvent {
    /// A task was submitted and its dependency edges computed.
    Submitted { task_id: u64, dependencies: usize },
    /// A horizon or epoch task was inserted.
    HorizonInserted { task_id: u64, pruned: usize },
}

/// Logged by the command graph generator and serializer.
#[derive(Clone, Debug)]
pub enum CommandEvent {
    /// A command was emitted for a node.
    Emitted { command_id: u64, node: u64 },
    /// A command became ready (all dependees satisfied) and was
    /// dispatched to its sink.
    Dispatched { command_id: u64 },
    /// A command's execution, transfer, or barrier completed.
    Completed { command_id: u64 },
}

/// Logged by the buffer transfer manager.
#[derive(Clone, Debug)]
pub enum TransferEvent {
    /// A `push` was issued to a target node.
    PushIssued { buffer_id: u64, transfer_id: u64, target: u64 },
    /// A data frame arrived from a source node.
    FrameReceived { buffer_id: u64, transfer_id: u64, source: u64 },
    /// A transfer's expected region (or reduction count) was fully
    /// satisfied.
    Completed { buffer_id: u64, transfer_id: u64 },
}

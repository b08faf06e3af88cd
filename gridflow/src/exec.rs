//! The graph serializer: the per-node dispatch loop that turns a ready
//! command into an actual effect, against collaborators considered out
//! of scope for this crate (device/host execution, the reduction
//! operator) and the buffer transfer manager this crate does own.
//!
//! A step loop that repeatedly drains whatever progress is ready and
//! hands it to operator logic without itself knowing what that logic
//! does; here the "operator logic" is
//! [`ExecutionSink`]/[`ReductionSink`], injected at construction rather
//! than built in.

use std::collections::HashMap;

use gridflow_ids::{CommandId, ReductionId, TaskId};
use gridflow_logging::{CommandEvent, Logger, TransferEvent};
use gridflow_region::GridBox;
use gridflow_transport::{AwaitPushCommand, BufferSource, BufferTransferManager, CommitCallback, PushCommand, Transport};

use crate::command::{Command, CommandBody};
use crate::error::TaskError;
use crate::task::EpochAction;

/// Runs an `execution` command's task body on this node. Stands in for
/// the device or host work queue, which is out of scope for this
/// crate; invoked synchronously from the executor thread, so it
/// completes before `dispatch` returns.
pub trait ExecutionSink<const D: usize>: Send {
    fn execute(&mut self, task_id: TaskId, subrange: GridBox<D>) -> Result<(), TaskError>;
}

/// Finalizes a `reduction` command once every contributor has arrived.
/// Stands in for the reduction operator itself, which is out of scope
/// here — this trait only fires the completion, the BTM already did
/// the gathering.
pub trait ReductionSink: Send {
    fn reduce(&mut self, reduction_id: ReductionId) -> Result<(), TaskError>;
}

/// What dispatching or polling a command resolved to.
pub enum Outcome {
    Done,
    Failed(TaskError),
}

/// One node's dispatch loop. Consumes commands that are already known
/// to be ready: the scheduler thread computes readiness, so the
/// serializer only ever sees commands whose dependees have completed,
/// and drives each to completion against
/// this node's injected sinks and its buffer transfer manager.
pub struct Serializer<const D: usize, T: Transport> {
    btm: BufferTransferManager<D, T>,
    execution_sink: Box<dyn ExecutionSink<D>>,
    reduction_sink: Box<dyn ReductionSink>,
    buffer_source: Box<dyn BufferSource<D>>,
    commit: Box<dyn CommitCallback<D>>,
    in_flight: HashMap<CommandId, gridflow_transport::TransferHandle>,
    draining: bool,
    command_logger: Option<Logger<CommandEvent>>,
}

impl<const D: usize, T: Transport> Serializer<D, T> {
    pub fn new(
        transport: T,
        element_size: usize,
        execution_sink: Box<dyn ExecutionSink<D>>,
        reduction_sink: Box<dyn ReductionSink>,
        buffer_source: Box<dyn BufferSource<D>>,
        commit: Box<dyn CommitCallback<D>>,
    ) -> Self {
        Serializer {
            btm: BufferTransferManager::new(transport, element_size),
            execution_sink,
            reduction_sink,
            buffer_source,
            commit,
            in_flight: HashMap::new(),
            draining: false,
            command_logger: None,
        }
    }

    /// Binds a logger to receive [`CommandEvent::Dispatched`]/
    /// [`CommandEvent::Completed`] as this node's dispatch loop runs.
    pub fn with_command_logger(mut self, logger: Logger<CommandEvent>) -> Self {
        self.command_logger = Some(logger);
        self
    }

    /// Binds a logger to the owned buffer transfer manager; see
    /// [`BufferTransferManager::with_logger`].
    pub fn with_transfer_logger(mut self, logger: Logger<TransferEvent>) -> Self {
        self.btm = self.btm.with_logger(logger);
        self
    }

    /// Dispatches a freshly-ready command. Execution, reduction, and
    /// horizon/epoch commands resolve synchronously; push and
    /// await-push register against the BTM and resolve later, reported
    /// out of [`Serializer::poll`].
    pub fn dispatch(&mut self, command: &Command<D>) -> Option<Outcome> {
        if let Some(logger) = &self.command_logger {
            logger.log(CommandEvent::Dispatched { command_id: command.id.into_raw() });
        }
        let outcome = match &command.body {
            CommandBody::Execution { task_id, subrange } => {
                Some(to_outcome(self.execution_sink.execute(*task_id, *subrange)))
            }
            CommandBody::Push { buffer_id, transfer_id, target, source_subrange, reduction_id } => {
                let push = PushCommand {
                    buffer_id: *buffer_id,
                    transfer_id: *transfer_id,
                    target: *target,
                    source_subrange: *source_subrange,
                    reduction_id: *reduction_id,
                };
                let handle = self.btm.push(&push, self.buffer_source.as_mut());
                if handle.is_complete() {
                    Some(Outcome::Done)
                } else {
                    self.in_flight.insert(command.id, handle);
                    None
                }
            }
            CommandBody::AwaitPush { buffer_id, transfer_id, expected_region, .. } => {
                let await_cmd =
                    AwaitPushCommand { buffer_id: *buffer_id, transfer_id: *transfer_id, region: expected_region.clone() };
                let handle = self.btm.await_push(await_cmd, self.commit.as_mut());
                if handle.is_complete() {
                    Some(Outcome::Done)
                } else {
                    self.in_flight.insert(command.id, handle);
                    None
                }
            }
            CommandBody::Reduction { reduction_id } => Some(to_outcome(self.reduction_sink.reduce(*reduction_id))),
            CommandBody::Horizon => Some(Outcome::Done),
            CommandBody::Epoch { action } => {
                match action {
                    EpochAction::None => {}
                    EpochAction::Barrier => self.btm.barrier(),
                    EpochAction::Shutdown => {
                        self.btm.barrier();
                        self.draining = true;
                    }
                }
                Some(Outcome::Done)
            }
        };
        if outcome.is_some() {
            if let Some(logger) = &self.command_logger {
                logger.log(CommandEvent::Completed { command_id: command.id.into_raw() });
            }
        }
        outcome
    }

    /// Advances the BTM by one step and harvests any in-flight push or
    /// await-push that has since completed.
    pub fn poll(&mut self) -> Vec<(CommandId, Outcome)> {
        self.btm.poll(self.commit.as_mut());
        let mut done = Vec::new();
        let logger = self.command_logger.clone();
        self.in_flight.retain(|id, handle| {
            if handle.is_complete() {
                if let Some(logger) = &logger {
                    logger.log(CommandEvent::Completed { command_id: id.into_raw() });
                }
                done.push((*id, Outcome::Done));
                false
            } else {
                true
            }
        });
        done
    }

    /// True once this node has dispatched a shutdown epoch. A shutdown
    /// epoch drains all prior commands then terminates the serializer;
    /// the executor thread stops admitting new commands once draining
    /// and every already-dispatched command has been reported.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

fn to_outcome(result: Result<(), TaskError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Done,
        Err(e) => Outcome::Failed(e),
    }
}

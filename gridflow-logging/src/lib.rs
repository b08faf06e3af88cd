//! Common gridflow logging infrastructure: a buffered, typed event
//! logger plus the concrete event types the runtime's three threads
//! emit. Kept deliberately small and dependency-free.

mod events;
mod registry;

pub use events::{CommandEvent, TaskEvent, TransferEvent};
pub use registry::{Logger, Registry};

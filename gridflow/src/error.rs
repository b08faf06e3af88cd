//! The one error kind this crate surfaces to callers as a `Result`
//! rather than a panic: user-observable task failure.
//!
//! Every other error kind — invariant violations, transport errors,
//! capacity errors — is fatal by design and is reported via
//! `assert!`/`panic!` at the violation site (task submission after
//! shutdown, overlapping writes, malformed frames) or, for the
//! transport layer, by aborting the process after a best-effort log
//! flush (see [`crate::runtime::Runtime::shutdown`]). Invariant
//! violations assert with no `Result` in sight; `anyhow::Error` is
//! reserved for the one layer (the network) whose failures are
//! genuinely environmental rather than programmer error.

use thiserror::Error;

/// An error observed by a host task, delivered through its fence's
/// promise. This is the only error type user code is expected to match
/// on; everything else in this crate is either infallible or fatal.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("host task failed: {0}")]
    HostTaskFailed(String),
    #[error("task was cancelled by a shutdown epoch before it ran")]
    CancelledByShutdown,
}

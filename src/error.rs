//! Crate-wide error types.
//!
//! Mirrors the error kinds of the core's §7 design: persistence failures
//! propagate to callers, admission refusals and kernel failures become
//! `TurnError` events instead, and reconcile failures abort only the
//! affected root. No `thiserror` dependency — manual `Display` impls, in
//! the style the rest of this crate's ancestry uses for its own error
//! enums.

use std::error::Error;
use std::fmt;

/// Why a scheduled turn was refused admission by the [`CascadeGuard`](crate::cascade::CascadeGuard).
///
/// These are not faults: the Runner records a `TurnError` event carrying
/// the matching cause and continues processing the trigger queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    /// The agent already appears in this correlation chain.
    Cycle,
    /// The chain has reached `max_chain_depth`.
    Depth,
    /// The agent was triggered more recently than `cooldown_ms` allows.
    Cooldown,
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionRejection::Cycle => write!(f, "cycle detected in correlation chain"),
            AdmissionRejection::Depth => write!(f, "correlation chain depth limit reached"),
            AdmissionRejection::Cooldown => write!(f, "agent is within its cooldown window"),
        }
    }
}

/// Top-level error type returned by the public core operations.
#[derive(Debug, Clone)]
pub enum RemoraError {
    /// Durable write to the subscription table failed; in-memory index was
    /// not updated.
    RegistryWrite(String),
    /// Durable write to the event log failed.
    EventAppend(String),
    /// The trigger queue was full and the caller requested non-blocking mode.
    Backpressure,
    /// The `Kernel` call failed; carried as the cause of a `TurnError` event.
    Kernel(String),
    /// The per-turn deadline (`turn_timeout_ms`) was exceeded.
    TurnTimeout,
    /// Admission was refused; carried as the cause of a `TurnError` event.
    Admission(AdmissionRejection),
    /// The `TreeParser` collaborator failed; reconcile aborts for that root
    /// and leaves the registry unchanged.
    Reconcile(String),
    /// A configuration value violated its documented bound.
    Config(String),
    /// An event payload could not be decoded.
    Codec(String),
}

impl fmt::Display for RemoraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoraError::RegistryWrite(msg) => write!(f, "subscription registry write failed: {msg}"),
            RemoraError::EventAppend(msg) => write!(f, "event append failed: {msg}"),
            RemoraError::Backpressure => write!(f, "trigger queue is full"),
            RemoraError::Kernel(msg) => write!(f, "kernel turn failed: {msg}"),
            RemoraError::TurnTimeout => write!(f, "turn exceeded its timeout"),
            RemoraError::Admission(cause) => write!(f, "admission refused: {cause}"),
            RemoraError::Reconcile(msg) => write!(f, "reconcile failed: {msg}"),
            RemoraError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            RemoraError::Codec(msg) => write!(f, "event codec error: {msg}"),
        }
    }
}

impl Error for RemoraError {}

/// Result alias used throughout the crate.
pub type RemoraResult<T> = Result<T, RemoraError>;

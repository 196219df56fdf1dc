//! Runtime configuration for the Remora core.
//!
//! Construction is entirely manual — no TOML/YAML/env parsing dependency is
//! introduced here; loading config files is explicitly out of scope (§1) and
//! left to the CLI/UI front-end that embeds this crate.

use crate::error::{RemoraError, RemoraResult};

/// Recognized configuration options from §6.
///
/// All fields have the bounds documented on each field; construct with
/// [`RemoraConfig::default`] and override individual fields, then call
/// [`RemoraConfig::validate`] before handing the config to a runner.
///
/// # Example
///
/// ```rust
/// use remora_core::config::RemoraConfig;
///
/// let config = RemoraConfig {
///     max_concurrency: 4,
///     ..RemoraConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoraConfig {
    /// Maximum number of agent turns running concurrently. Must be `>= 1`.
    pub max_concurrency: usize,
    /// Maximum depth a correlation chain may reach before further triggers
    /// are `DepthRejected`. Must be `>= 1`.
    pub max_chain_depth: u32,
    /// Minimum time, in milliseconds, an agent must wait between triggers.
    /// `0` disables cooldown rejection.
    pub cooldown_ms: u64,
    /// Per-turn deadline in milliseconds before a `Kernel` call is cancelled
    /// with `TurnTimeoutError`. Must be `>= 1`.
    pub turn_timeout_ms: u64,
    /// Bound on the in-process trigger queue. Must be `>= 1`.
    pub trigger_queue_capacity: usize,
    /// How long a quiesced correlation chain entry survives before garbage
    /// collection, in milliseconds.
    pub correlation_ttl_ms: u64,
    /// Grace period given to in-flight turns after a shutdown signal before
    /// they are forcibly cancelled, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for RemoraConfig {
    /// Conservative defaults suitable for a single-developer workstation:
    /// four concurrent turns, chains bounded to depth 8, a half-second
    /// cooldown, generous timeouts, and the 60s correlation TTL called out
    /// in spec §9.
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_chain_depth: 8,
            cooldown_ms: 500,
            turn_timeout_ms: 30_000,
            trigger_queue_capacity: 1024,
            correlation_ttl_ms: 60_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl RemoraConfig {
    /// Validate that every field respects its documented bound.
    ///
    /// # Example
    ///
    /// ```rust
    /// use remora_core::config::RemoraConfig;
    ///
    /// let bad = RemoraConfig { max_concurrency: 0, ..RemoraConfig::default() };
    /// assert!(bad.validate().is_err());
    /// ```
    pub fn validate(&self) -> RemoraResult<()> {
        if self.max_concurrency < 1 {
            return Err(RemoraError::Config("max_concurrency must be >= 1".into()));
        }
        if self.max_chain_depth < 1 {
            return Err(RemoraError::Config("max_chain_depth must be >= 1".into()));
        }
        if self.turn_timeout_ms < 1 {
            return Err(RemoraError::Config("turn_timeout_ms must be >= 1".into()));
        }
        if self.trigger_queue_capacity < 1 {
            return Err(RemoraError::Config(
                "trigger_queue_capacity must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

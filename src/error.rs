// src/error.rs
//! Error types for the dataplane.
//!
//! Two families, kept deliberately separate (see [`crate`] docs):
//!
//! - [`DataPlaneEvent`]: per-packet classifications. Not propagated with `?`;
//!   a worker matches on these and bumps a counter. Disposable, like the
//!   packets they describe.
//! - [`ConfigError`]: fatal startup-time failures (bad ring size, bad pool
//!   size, invalid rule, invalid engine configuration).

use std::fmt;

/// A per-packet dataplane outcome that is not a fault.
///
/// Every variant corresponds 1:1 with a counter in [`crate::worker::WorkerCounters`].
/// None of these are ever retried — packets are disposable (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPlaneEvent {
    /// The frame could not be classified into a [`crate::parser::FlowKey`]
    /// (short, unsupported EtherType, or truncated L4 header).
    ParseError,
    /// [`crate::pool::BufferPool::alloc`] found both cache tiers empty.
    PoolExhausted,
    /// [`crate::ring::SpscRing::push_burst`] accepted fewer items than offered.
    RingFull,
    /// [`crate::rule::RuleTable::lookup`] found no matching rule.
    RuleMiss,
    /// IPv4 TTL or IPv6 hop-limit was `<= 1` at ingress to the forward step.
    TtlExpired,
    /// Neighbor resolution missed both the worker's last-hit cache and the
    /// shared table. Not fatal to the packet — see "transparent bridging" in
    /// spec §4.7; this variant exists for observability only.
    NeighborMiss,
    /// The transmit sink accepted fewer frames than were in the batch.
    SendRejected,
}

impl fmt::Display for DataPlaneEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParseError => "packet not classifiable",
            Self::PoolExhausted => "buffer pool exhausted",
            Self::RingFull => "spsc ring full",
            Self::RuleMiss => "no matching rule",
            Self::TtlExpired => "ttl/hop-limit expired",
            Self::NeighborMiss => "neighbor resolution miss",
            Self::SendRejected => "tx sink rejected frame",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for DataPlaneEvent {}

/// Fatal configuration/startup errors.
///
/// Per spec §7: "invalid rule file, oversized ring requested, non-power-of-two
/// ring capacity, pool init failure... are fatal to startup." Once the
/// dataplane is running, only allocation failures for per-worker auxiliary
/// state are fatal (see [`ConfigError::WorkerInit`]); packet-level errors
/// never are.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A ring or pool capacity was not a power of two.
    #[error("capacity {0} is not a power of two")]
    NotPowerOfTwo(usize),
    /// A requested capacity was zero.
    #[error("capacity must be non-zero")]
    ZeroCapacity,
    /// A requested ring or pool capacity exceeded the configured maximum.
    #[error("capacity {requested} exceeds maximum {max}")]
    CapacityTooLarge {
        /// The capacity that was requested.
        requested: usize,
        /// The maximum allowed capacity.
        max: usize,
    },
    /// A rule referenced an `out_iface` that did not resolve to an ifindex.
    #[error("rule {rule_id} references unknown interface {iface:?}")]
    UnknownInterface {
        /// The offending rule's insertion ordinal.
        rule_id: u32,
        /// The unresolved interface name.
        iface: String,
    },
    /// A `FORWARD` rule was missing the mandatory `out_iface` key.
    #[error("rule {0} has action=fwd but no out_iface")]
    MissingOutIface(u32),
    /// Backing-memory allocation for the buffer pool failed on every fallback
    /// path (huge pages, plain mmap, and heap).
    #[error("buffer pool backing allocation failed: {0}")]
    PoolAllocFailed(String),
    /// Per-worker auxiliary state (e.g. a last-hit cache, a TX batch buffer)
    /// failed to allocate after the dataplane was already running.
    #[error("worker {worker_id} failed to initialize: {reason}")]
    WorkerInit {
        /// The worker that failed to initialize.
        worker_id: u32,
        /// Human-readable cause.
        reason: String,
    },
    /// Generic validation failure for [`crate::config::EngineConfig`].
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for configuration/startup operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

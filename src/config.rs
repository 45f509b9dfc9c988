// src/config.rs
//! Startup configuration for the dataplane.
//!
//! Collects knobs that the original design scatters through §2–§6 of the
//! spec into one validated struct. `EngineConfig` is meant to be produced by
//! an external loader (INI, TOML, env) — this crate only validates and
//! consumes it; it does not parse any file format itself (see `SPEC_FULL.md`
//! AMBIENT-4 and AMBIENT-1).

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Recommended per-thread buffer-pool cache size (`C_local`, spec §4.1).
pub const DEFAULT_THREAD_LOCAL_CACHE_SIZE: usize = 64;
/// Recommended worker burst size (`B_w`, spec §4.7).
pub const DEFAULT_WORKER_BURST_SIZE: usize = 32;
/// Recommended worker idle sleep when its ring is empty (spec §4.7).
pub const DEFAULT_WORKER_IDLE_SLEEP_NANOS: u64 = 1_000;

/// Validated startup configuration for an engine instance.
///
/// All sizes that back lock-free structures must be powers of two
/// (`ring_capacity`, `ring_count`); `validate` enforces this and returns
/// [`ConfigError`] otherwise, per spec §7 ("non-power-of-two ring capacity...
/// fatal to startup").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker rings (and workers); must be a power of two so
    /// `hash & (ring_count - 1)` can select a ring (spec §6).
    pub ring_count: usize,
    /// Slot capacity of each [`crate::ring::SpscRing`]; must be a power of two
    /// (spec §4.2).
    pub ring_capacity: usize,
    /// Total number of [`crate::buffer::PacketBuffer`] slots backing the pool
    /// (`N` in spec §3/§4.1).
    pub pool_capacity: usize,
    /// Per-thread LIFO cache size (`C_local`, spec §3). Recommended 64.
    pub thread_local_cache_size: usize,
    /// Number of buffers transferred per global-stack reservation/flush
    /// (`B_xfer = C_local / 2` is the spec's default relationship; callers
    /// may override).
    pub burst_transfer_size: usize,
    /// Worker poll burst size (`B_w`, spec §4.7). Recommended 32.
    pub worker_burst_size: usize,
    /// Worker idle sleep, in nanoseconds, when its ring is empty and the stop
    /// flag is clear (spec §4.7, recommended ~1 μs).
    pub worker_idle_sleep_nanos: u64,
    /// Fixed slot count for the ARP (IPv4) neighbor table (spec §4.6).
    pub arp_table_capacity: usize,
    /// Fixed slot count for the NDP (IPv6) neighbor table (spec §4.6).
    pub ndp_table_capacity: usize,
    /// Whether workers should pin themselves to a core at startup (spec §5).
    /// Pinning failure is non-fatal regardless of this setting.
    pub pin_workers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_count: 4,
            ring_capacity: 4096,
            pool_capacity: 16384,
            thread_local_cache_size: DEFAULT_THREAD_LOCAL_CACHE_SIZE,
            burst_transfer_size: DEFAULT_THREAD_LOCAL_CACHE_SIZE / 2,
            worker_burst_size: DEFAULT_WORKER_BURST_SIZE,
            worker_idle_sleep_nanos: DEFAULT_WORKER_IDLE_SLEEP_NANOS,
            arp_table_capacity: 4096,
            ndp_table_capacity: 4096,
            pin_workers: true,
        }
    }
}

impl EngineConfig {
    /// Validates every constraint the spec treats as a fatal startup error.
    ///
    /// Returns the first violation found; callers that want every violation
    /// at once should call this repeatedly after fixing each field, matching
    /// how the teacher's pool/ring constructors fail fast on the first bad
    /// invariant rather than accumulating a report.
    pub fn validate(&self) -> ConfigResult<()> {
        check_power_of_two(self.ring_count)?;
        check_power_of_two(self.ring_capacity)?;
        if self.pool_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.thread_local_cache_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "thread_local_cache_size must be non-zero".into(),
            ));
        }
        if self.burst_transfer_size == 0 || self.burst_transfer_size > self.thread_local_cache_size
        {
            return Err(ConfigError::InvalidConfig(format!(
                "burst_transfer_size {} must be in (0, thread_local_cache_size={}]",
                self.burst_transfer_size, self.thread_local_cache_size
            )));
        }
        if self.worker_burst_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_burst_size must be non-zero".into(),
            ));
        }
        if self.arp_table_capacity == 0 || self.ndp_table_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

fn check_power_of_two(n: usize) -> ConfigResult<()> {
    if n == 0 {
        return Err(ConfigError::ZeroCapacity);
    }
    if !n.is_power_of_two() {
        return Err(ConfigError::NotPowerOfTwo(n));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_pow2_ring_capacity() {
        let mut cfg = EngineConfig::default();
        cfg.ring_capacity = 100;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotPowerOfTwo(100))
        ));
    }

    #[test]
    fn accepts_pow2_ring_capacity() {
        let mut cfg = EngineConfig::default();
        cfg.ring_capacity = 4;
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_zero_pool_capacity() {
        let mut cfg = EngineConfig::default();
        cfg.pool_capacity = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn rejects_burst_transfer_larger_than_cache() {
        let mut cfg = EngineConfig::default();
        cfg.burst_transfer_size = cfg.thread_local_cache_size + 1;
        assert!(cfg.validate().is_err());
    }
}

//! Per-instance store context.
//!
//! This module provides:
//! - [`GuestContext`]: State owned by one runtime instance, reachable from
//!   import stubs through [`wasmtime::Caller`]
//! - [`InstanceStats`]: Counters for memory traffic and stub invocations

use std::collections::BTreeMap;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use crate::SandboxEngine;

/// Per-instance context stored inside the Wasmtime [`Store`].
///
/// Each runtime instance owns exactly one context; contexts are never
/// shared between instances.
pub struct GuestContext {
    /// Unique instance identifier for tracing.
    pub instance_id: String,

    /// Memory and table limits enforced on the guest.
    limits: StoreLimits,

    /// Traffic counters.
    pub stats: InstanceStats,

    /// Exit status reported through the process-exit hook, if any.
    pub exit_code: Option<i32>,
}

/// Counters kept per runtime instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// Successful calls to the guest allocator.
    pub allocations: u64,

    /// Successful calls to the guest deallocator.
    pub releases: u64,

    /// Total bytes handed out by the guest allocator.
    pub bytes_allocated: u64,

    /// Output buffers returned to the guest through `ks_free`.
    pub outputs_freed: u64,

    /// Number of invocations per import stub.
    pub shim_calls: BTreeMap<&'static str, u64>,
}

impl InstanceStats {
    /// Allocations that have not been released.
    pub fn outstanding(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    /// Total import stub invocations.
    pub fn total_shim_calls(&self) -> u64 {
        self.shim_calls.values().sum()
    }
}

impl GuestContext {
    /// Create a new context.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - Unique identifier for this instance (for tracing)
    /// * `max_memory_bytes` - Linear memory ceiling, `None` for unlimited
    pub fn new(instance_id: String, max_memory_bytes: Option<usize>) -> Self {
        let mut limits = StoreLimitsBuilder::new();
        if let Some(bytes) = max_memory_bytes {
            limits = limits.memory_size(bytes);
        }

        Self {
            instance_id,
            limits: limits.build(),
            stats: InstanceStats::default(),
            exit_code: None,
        }
    }

    /// Record one invocation of an import stub.
    pub fn record_shim_call(&mut self, name: &'static str) {
        *self.stats.shim_calls.entry(name).or_insert(0) += 1;
    }
}

/// Create a new Wasmtime store for one runtime instance.
///
/// The store enforces the sandbox memory ceiling through a resource limiter.
pub fn create_store(engine: &SandboxEngine, instance_id: String) -> Store<GuestContext> {
    let context = GuestContext::new(instance_id, engine.config().max_memory_bytes());
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);
    store
}

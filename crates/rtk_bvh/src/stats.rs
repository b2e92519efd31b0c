//! Traversal counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters gathered by one walk, flushed into [`KernelStats`] when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkCounters {
    pub node_visits: u64,
    pub primitive_tests: u64,
    pub instance_pushes: u64,
}

/// Shared counters of a [`Kernel`](crate::Kernel).
#[derive(Debug, Default)]
pub struct KernelStats {
    traversals: AtomicU64,
    node_visits: AtomicU64,
    primitive_tests: AtomicU64,
    instance_pushes: AtomicU64,
    stack_overflows: AtomicU64,
}

/// Point-in-time copy of [`KernelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub traversals: u64,
    pub node_visits: u64,
    pub primitive_tests: u64,
    pub instance_pushes: u64,
    pub stack_overflows: u64,
}

impl KernelStats {
    pub fn record_walk(&self, counters: &WalkCounters) {
        self.traversals.fetch_add(1, Ordering::Relaxed);
        self.node_visits
            .fetch_add(counters.node_visits, Ordering::Relaxed);
        self.primitive_tests
            .fetch_add(counters.primitive_tests, Ordering::Relaxed);
        self.instance_pushes
            .fetch_add(counters.instance_pushes, Ordering::Relaxed);
    }

    /// Count a walk abandoned on stack or instance depth exhaustion.
    pub fn record_overflow(&self) {
        self.stack_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            traversals: self.traversals.load(Ordering::Relaxed),
            node_visits: self.node_visits.load(Ordering::Relaxed),
            primitive_tests: self.primitive_tests.load(Ordering::Relaxed),
            instance_pushes: self.instance_pushes.load(Ordering::Relaxed),
            stack_overflows: self.stack_overflows.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.traversals,
            &self.node_visits,
            &self.primitive_tests,
            &self.instance_pushes,
            &self.stack_overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

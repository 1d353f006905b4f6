//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and
//! not used as synchronization primitives. The pool lock provides the
//! ordering guarantees for correctness; these counters are purely for
//! monitoring and are process-wide across pools.
//!
//! # Usage
//!
//! ```ignore
//! let snap = fixpool::stats::snapshot();
//! println!("allocs: {}", snap.alloc_count);
//! ```
//!
//! Individual counter loads are atomic but not globally consistent with
//! each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    /// Allocation attempts (after the zero-size guard).
    pub alloc_count: AtomicU64,
    /// Sum of all requested byte sizes passed to malloc.
    pub alloc_bytes: AtomicU64,
    /// Runs freed.
    pub free_count: AtomicU64,
    /// Reallocations reaching a live run (after null/zero-size guards).
    pub realloc_count: AtomicU64,
    /// Allocations served by coalescing multiple blocks.
    pub multi_block_allocs: AtomicU64,
    /// Reallocations extended in place with adjacent free blocks.
    pub inplace_extends: AtomicU64,
    /// Reallocations that moved to a fresh run.
    pub relocations: AtomicU64,
    /// Allocation attempts no class could satisfy.
    pub failed_allocs: AtomicU64,
    /// Corruption reports (damaged sentinels, counters, or poison fills).
    pub overflow_reports: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            multi_block_allocs: AtomicU64::new(0),
            inplace_extends: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            failed_allocs: AtomicU64::new(0),
            overflow_reports: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all allocation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters;
/// concurrent calls may race between loads, which is always sufficient
/// for monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Allocation attempts (after the zero-size guard).
    pub alloc_count: u64,
    /// Sum of all requested byte sizes passed to malloc.
    pub alloc_bytes: u64,
    /// Runs freed.
    pub free_count: u64,
    /// Reallocations reaching a live run (after null/zero-size guards).
    pub realloc_count: u64,
    /// Allocations served by coalescing multiple blocks.
    pub multi_block_allocs: u64,
    /// Reallocations extended in place with adjacent free blocks.
    pub inplace_extends: u64,
    /// Reallocations that moved to a fresh run.
    pub relocations: u64,
    /// Allocation attempts no class could satisfy.
    pub failed_allocs: u64,
    /// Corruption reports (damaged sentinels, counters, or poison fills).
    pub overflow_reports: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        free_count: s.free_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        multi_block_allocs: s.multi_block_allocs.load(Ordering::Relaxed),
        inplace_extends: s.inplace_extends.load(Ordering::Relaxed),
        relocations: s.relocations.load(Ordering::Relaxed),
        failed_allocs: s.failed_allocs.load(Ordering::Relaxed),
        overflow_reports: s.overflow_reports.load(Ordering::Relaxed),
    }
}

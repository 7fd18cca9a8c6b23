// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-singleton "core context" spec.md's DESIGN NOTES (§9) calls
//! for: `flushtime_global`, the dead-IBT-table list, the shared-cache-flush
//! lock and the shared table headers "constitute process-wide state ...
//! model as a process-singleton core context value passed through all
//! entry points".
//!
//! Shaped after the `Global`/`CpuLocal` split in
//! `kernel/src/state.rs`: a single `Arc<Inner>`-style value owns everything
//! that is genuinely shared, while per-thread state
//! ([`crate::thread_state::ThreadState`]) is registered into it rather than
//! reached via ambient thread-locals, so the flush coordinator can actually
//! enumerate live threads (plain `thread_local!` cannot be walked from
//! another thread).

use crate::coarse::CoarseUnit;
use crate::config::Config;
use crate::fragment::FragmentTable;
use crate::ibt::{DeadIbtTable, IbtTable, SharedIbt};
use crate::thread_state::ThreadState;
use fc_queue::Queue;
use fc_sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared, process-wide tables and locks (spec.md §3, §4.7, §5).
///
/// The IBT tables are [`SharedIbt`] handles (lock-free readable) guarded
/// for writers by a dedicated [`Mutex`], rather than a plain
/// `Mutex<IbtTable>`: wrapping the whole table in a mutex would force
/// every lockless reader in generated code through the same lock writers
/// use, defeating spec.md §4.3's entire point.
pub struct SharedTables {
    pub bb: Option<FragmentTable>,
    pub traces: Option<FragmentTable>,
    pub bb_ibt: Option<SharedIbt>,
    pub bb_ibt_write_lock: Mutex<()>,
    pub trace_ibt: Option<SharedIbt>,
    pub trace_ibt_write_lock: Mutex<()>,
    pub coarse_units: Mutex<Vec<Arc<CoarseUnit>>>,
}

struct Inner {
    config: Config,
    /// Monotonic 32-bit counter, spec.md §3 "Global flushtime": "used as a
    /// timestamp on lazily-deleted fragment batches". Incremented only
    /// under `shared_cache_flush_lock` per spec.md §5's ordering
    /// guarantees, but read lock-free via an aligned atomic load.
    flushtime_global: AtomicU32,
    /// spec.md §5 "Locking discipline": outermost lock acquired by a
    /// flusher.
    thread_init_exit_lock: Mutex<()>,
    /// spec.md §5: acquired inside `thread_init_exit_lock`, before
    /// incrementing `flushtime_global`.
    shared_cache_flush_lock: Mutex<()>,
    /// Thread registry backing flush-coordinator enumeration
    /// ("snapshot all live threads", spec.md §4.7 stage 1).
    threads: Mutex<Vec<Arc<ThreadState>>>,
    /// spec.md §3 "Dead-IBT-table record", §5 "ranked below table
    /// rwlocks".
    dead_ibt_tables: Queue<DeadIbtTable>,
    pub shared: SharedTables,
}

/// The process-singleton fragment cache directory context.
///
/// Cheaply cloneable (an `Arc` underneath), matching the
/// `Engine(Arc<EngineInner>)` shape in `libs/kwasm/src/engine.rs`.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

impl Context {
    pub fn new(config: Config) -> Self {
        let shared = SharedTables {
            bb: config.shared_bbs.then(|| {
                FragmentTable::new(config.initial_bits_bb, config.load_factor_percent, false)
            }),
            traces: config.shared_traces.then(|| {
                FragmentTable::new(config.initial_bits_trace, config.load_factor_percent, false)
            }),
            bb_ibt: config.shared_bb_ibt_tables.then(|| {
                SharedIbt::new(IbtTable::new(config.initial_bits_ibt, config.load_factor_percent))
            }),
            bb_ibt_write_lock: Mutex::new(()),
            trace_ibt: config.shared_trace_ibt_tables.then(|| {
                SharedIbt::new(IbtTable::new(config.initial_bits_ibt, config.load_factor_percent))
            }),
            trace_ibt_write_lock: Mutex::new(()),
            coarse_units: Mutex::new(Vec::new()),
        };
        Self(Arc::new(Inner {
            config,
            flushtime_global: AtomicU32::new(0),
            thread_init_exit_lock: Mutex::new(()),
            shared_cache_flush_lock: Mutex::new(()),
            threads: Mutex::new(Vec::new()),
            dead_ibt_tables: Queue::new(),
            shared,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn shared(&self) -> &SharedTables {
        &self.0.shared
    }

    /// Lock-free aligned load, per spec.md §5: "Flushtime: read with
    /// 4-byte aligned atomic load without locking".
    pub fn flushtime_global(&self) -> u32 {
        self.0.flushtime_global.load(Ordering::Acquire)
    }

    /// Must be called with `shared_cache_flush_lock` held (spec.md §5).
    pub(crate) fn bump_flushtime(&self, _guard: &fc_sync::MutexGuard<'_, ()>) -> u32 {
        self.0.flushtime_global.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn thread_init_exit_lock(&self) -> &Mutex<()> {
        &self.0.thread_init_exit_lock
    }

    pub(crate) fn shared_cache_flush_lock(&self) -> &Mutex<()> {
        &self.0.shared_cache_flush_lock
    }

    pub(crate) fn dead_ibt_tables(&self) -> &Queue<DeadIbtTable> {
        &self.0.dead_ibt_tables
    }

    /// Physically frees dead-table records whose ref-count has reached
    /// zero (spec.md §3).
    pub fn sweep_dead_ibt_tables(&self) {
        crate::ibt::sweep_dead_tables(&self.0.dead_ibt_tables);
    }

    /// Registers a newly created thread's state so flush coordination can
    /// enumerate it. Mirrors `cpu_local!`'s registration step
    /// in `libs/cpu-local/src/lib.rs`, generalized from a fixed per-CPU
    /// slot array to an arbitrary-length thread registry since translator
    /// thread counts are not known up front.
    pub fn register_thread(&self, state: Arc<ThreadState>) {
        self.0.threads.lock().push(state);
    }

    pub fn unregister_thread(&self, id: u64) {
        self.0.threads.lock().retain(|t| t.id() != id);
    }

    /// Snapshot of every currently-registered thread, spec.md §4.7 stage
    /// 1: "Snapshot all live threads".
    pub fn snapshot_threads(&self) -> Vec<Arc<ThreadState>> {
        self.0.threads.lock().clone()
    }

    pub fn thread_count(&self) -> usize {
        self.0.threads.lock().len()
    }

    /// spec.md §2 supplemented feature: a snapshot of the shared tables'
    /// `{capacity, entries, invalid_entries, max_cluster_len}`, grounded on
    /// `hashtablex.h`'s `_study`/`_dump_table`.
    #[cfg(feature = "diagnostics")]
    pub fn table_report(&self) -> Vec<(&'static str, crate::hashtable::TableReport)> {
        let mut reports = Vec::new();
        if let Some(bb) = &self.0.shared.bb {
            reports.push(("bb", bb.read().report()));
        }
        if let Some(traces) = &self.0.shared.traces {
            reports.push(("traces", traces.read().report()));
        }
        reports
    }
}

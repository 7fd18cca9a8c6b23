// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-thread fragment state (spec.md §3 "Per-thread state").
//!
//! Grounded on the shape of `cpu_local!` (`libs/cpu-local/src/lib.rs`) —
//! a per-entity state block reached
//! without a lock from its own thread — but registered into
//! [`crate::context::Context`] rather than kept purely thread-local, since
//! spec.md §4.7's flush coordinator must enumerate every live thread's
//! state from a different thread entirely (stage 1: "Snapshot all live
//! threads"), something `std::thread_local!` alone cannot provide.

use crate::fragment::{FragmentTable, FutureTable};
use crate::ibt::{DeadIbtTable, IbtTable, RotationTracker};
use crate::tag::{CachePc, Tag};
use fc_sync::{Event, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Coroutine-style trace-build state machine, spec.md §9
/// "Coroutine-style control flow".
#[derive(Debug, Clone, Default)]
pub enum TraceBuildState {
    #[default]
    Idle,
    Building {
        start_tag: crate::tag::Tag,
        blocks: Vec<crate::tag::Tag>,
    },
    Aborting,
}

/// Per-thread fragment cache state.
pub struct ThreadState {
    id: u64,

    pub private_bb: Option<FragmentTable>,
    pub private_traces: Option<FragmentTable>,
    pub private_future: FutureTable,

    /// spec.md §3 "an IBT table per branch type per kind (bb/trace)":
    /// this thread's own bb/trace IBT tables, built only when the
    /// corresponding table is configured private rather than shared. A
    /// private table has exactly one writer and one reader (this thread),
    /// so a plain mutex is enough — no need for [`crate::ibt::SharedIbt`]'s
    /// lock-free-read publication scheme.
    private_bb_ibt: Option<Mutex<IbtTable>>,
    private_trace_ibt: Option<Mutex<IbtTable>>,

    bb_ibt_tracker: Mutex<Option<RotationTracker>>,
    trace_ibt_tracker: Mutex<Option<RotationTracker>>,

    /// Thread may currently be mutating link structures or allocating
    /// non-persistent heap; a flush must synch with it before proceeding
    /// (spec.md GLOSSARY "Could-be-linking").
    pub couldbelinking: AtomicBool,
    pub wait_for_unlink: AtomicBool,
    pub about_to_exit: AtomicBool,
    pub flush_queue_nonempty: AtomicBool,
    pub at_syscall_at_flush: AtomicBool,

    pub waiting_for_unlink: Event,
    pub finished_with_unlink: Event,
    pub finished_all_unlink: Event,

    /// spec.md §3 "Per-thread state": `flushtime_last_update`.
    pub flushtime_last_update: AtomicU32,

    /// spec.md §5 "Each per-thread linking_lock is acquired separately,
    /// never nested with another thread's."
    pub linking_lock: Mutex<()>,

    pub trace_build: Mutex<TraceBuildState>,

    /// spec.md §4.7: fragments this thread has unlinked but not yet
    /// physically freed, stamped with the flushtime at which they became
    /// unreachable.
    pub pending_deletion: fc_queue::Queue<crate::flush::PendingDeletion>,

    generation: AtomicU64,
}

impl ThreadState {
    pub fn new(id: u64, ctx: &crate::context::Context) -> Arc<Self> {
        let config = ctx.config();
        Arc::new(Self {
            id,
            private_bb: (!config.shared_bbs).then(|| {
                FragmentTable::new(config.initial_bits_bb, config.load_factor_percent, false)
            }),
            private_traces: (!config.shared_traces).then(|| {
                FragmentTable::new(config.initial_bits_trace, config.load_factor_percent, false)
            }),
            private_future: FutureTable::new(config.initial_bits_bb, config.load_factor_percent),
            private_bb_ibt: (!config.shared_bb_ibt_tables).then(|| {
                Mutex::new(IbtTable::new(config.initial_bits_ibt, config.load_factor_percent))
            }),
            private_trace_ibt: (!config.shared_trace_ibt_tables).then(|| {
                Mutex::new(IbtTable::new(config.initial_bits_ibt, config.load_factor_percent))
            }),
            bb_ibt_tracker: Mutex::new(
                ctx.shared()
                    .bb_ibt
                    .as_ref()
                    .map(|shared| RotationTracker::new(shared.load())),
            ),
            trace_ibt_tracker: Mutex::new(
                ctx.shared()
                    .trace_ibt
                    .as_ref()
                    .map(|shared| RotationTracker::new(shared.load())),
            ),
            couldbelinking: AtomicBool::new(false),
            wait_for_unlink: AtomicBool::new(false),
            about_to_exit: AtomicBool::new(false),
            flush_queue_nonempty: AtomicBool::new(false),
            at_syscall_at_flush: AtomicBool::new(false),
            waiting_for_unlink: Event::new(),
            finished_with_unlink: Event::new(),
            finished_all_unlink: Event::new(),
            flushtime_last_update: AtomicU32::new(0),
            linking_lock: Mutex::new(()),
            trace_build: Mutex::new(TraceBuildState::Idle),
            pending_deletion: fc_queue::Queue::new(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Called on every return from generated code (spec.md §4.3): rotates
    /// this thread's view of the shared IBT tables forward if a resize
    /// published a new one since the last call.
    pub fn update_ibl_tables(&self, ctx: &crate::context::Context) {
        if let Some(shared) = &ctx.shared().bb_ibt {
            let latest = shared.load();
            self.bb_ibt_tracker
                .lock()
                .as_mut()
                .expect("bb IBT enabled but tracker missing")
                .observe(latest);
        }
        if let Some(shared) = &ctx.shared().trace_ibt {
            let latest = shared.load();
            self.trace_ibt_tracker
                .lock()
                .as_mut()
                .expect("trace IBT enabled but tracker missing")
                .observe(latest);
        }
    }

    pub fn current_bb_ibt(&self) -> Option<Arc<DeadIbtTable>> {
        self.bb_ibt_tracker.lock().as_ref().map(|t| Arc::clone(t.current()))
    }

    pub fn current_trace_ibt(&self) -> Option<Arc<DeadIbtTable>> {
        self.trace_ibt_tracker.lock().as_ref().map(|t| Arc::clone(t.current()))
    }

    fn private_ibt(&self, is_trace: bool) -> Option<&Mutex<IbtTable>> {
        if is_trace {
            self.private_trace_ibt.as_ref()
        } else {
            self.private_bb_ibt.as_ref()
        }
    }

    /// Registers `(tag, pc)` in this thread's own IBT table. A no-op,
    /// returning `false`, when the table for `is_trace`'s branch type is
    /// shared rather than private.
    pub fn add_private_ibl_target(&self, is_trace: bool, tag: Tag, pc: CachePc) -> bool {
        self.private_ibt(is_trace).is_some_and(|t| t.lock().add(tag, pc))
    }

    /// Invalidates `tag`'s entry in this thread's own IBT table. A no-op,
    /// returning `false`, when the table for `is_trace`'s branch type is
    /// shared rather than private.
    pub fn remove_private_ibl_target(
        &self,
        is_trace: bool,
        tag: Tag,
        target_delete_pc: CachePc,
    ) -> bool {
        self.private_ibt(is_trace)
            .is_some_and(|t| t.lock().remove(tag, target_delete_pc))
    }

    /// Repoints `tag`'s entry at `new_pc` (spec.md §4.6 `shift`) in this
    /// thread's own IBT table. A no-op, returning `false`, when the table
    /// for `is_trace`'s branch type is shared rather than private.
    pub fn replace_private_ibl_target(&self, is_trace: bool, tag: Tag, new_pc: CachePc) -> bool {
        self.private_ibt(is_trace)
            .is_some_and(|t| t.lock().replace(tag, new_pc))
    }

    pub fn lookup_private_ibl_target(&self, is_trace: bool, tag: Tag) -> Option<CachePc> {
        self.private_ibt(is_trace)?.lock().lookup(tag)
    }

    /// spec.md §4.7 shared-deletion barrier: "On every cache exit each
    /// thread compares its `flushtime_last_update` with
    /// `flushtime_global`; if behind, it inspects the pending-deletion
    /// list and decrements the reference count of each entry with a
    /// flushtime <= global; entries whose count reaches zero are freed."
    pub fn cache_exit_barrier(&self, ctx: &crate::context::Context) {
        self.update_ibl_tables(ctx);
        let global = ctx.flushtime_global();
        if self.flushtime_last_update.load(Ordering::Acquire) >= global {
            return;
        }
        crate::flush::drain_pending_deletion(&self.pending_deletion, global);
        self.flushtime_last_update.store(global, Ordering::Release);
    }
}

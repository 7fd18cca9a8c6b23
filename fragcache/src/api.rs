// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Entry-point API (spec.md §6 "Interfaces exposed by the core").

use crate::coarse::CoarseUnit;
use crate::collab::{FCache, Link, LinkStubs, Monitor, VmArea};
use crate::context::Context;
use crate::fragment::{self, DeleteActions, Fragment, FragmentFlags};
use crate::tag::{CachePc, Tag};
use crate::thread_state::ThreadState;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// spec.md §6 `lookup(tag) -> Fragment?`: the default lookup, consulting
/// this thread's private basic-block table first, then the shared one.
pub fn lookup(ctx: &Context, thread: &ThreadState, tag: Tag) -> Option<Arc<Fragment>> {
    if let Some(table) = &thread.private_bb {
        if let Some(f) = table.lookup(tag) {
            return Some(f);
        }
    }
    ctx.shared().bb.as_ref()?.lookup(tag)
}

pub fn lookup_bb(ctx: &Context, thread: &ThreadState, tag: Tag) -> Option<Arc<Fragment>> {
    lookup(ctx, thread, tag).filter(|f| f.flags().contains(FragmentFlags::IS_BB))
}

pub fn lookup_trace(ctx: &Context, thread: &ThreadState, tag: Tag) -> Option<Arc<Fragment>> {
    if let Some(table) = &thread.private_traces {
        if let Some(f) = table.lookup(tag) {
            return Some(f);
        }
    }
    ctx.shared().traces.as_ref()?.lookup(tag)
}

pub fn lookup_shared_bb(ctx: &Context, tag: Tag) -> Option<Arc<Fragment>> {
    ctx.shared().bb.as_ref()?.lookup(tag)
}

/// Looks up `tag` restricted to fragments sharing `fragment`'s sharing
/// class (private vs. shared), spec.md §6 `lookup_same_sharing`.
pub fn lookup_same_sharing(ctx: &Context, thread: &ThreadState, tag: Tag, fragment: &Fragment) -> Option<Arc<Fragment>> {
    if fragment.flags().contains(FragmentFlags::SHARED) {
        lookup_shared_bb(ctx, tag)
    } else {
        thread.private_bb.as_ref()?.lookup(tag)
    }
}

pub fn lookup_future(thread: &ThreadState, tag: Tag) -> bool {
    thread.private_future.lookup_future(tag)
}

/// spec.md §6 `lookup_fine_and_coarse`: tries the fine-grained fragment
/// table first, then every registered coarse unit.
pub fn lookup_fine_and_coarse(ctx: &Context, thread: &ThreadState, tag: Tag) -> Option<FineOrCoarse> {
    if let Some(f) = lookup(ctx, thread, tag) {
        return Some(FineOrCoarse::Fine(f));
    }
    for unit in ctx.shared().coarse_units.lock().iter() {
        if let Some(offset) = unit.lookup(tag) {
            return Some(FineOrCoarse::Coarse(Arc::clone(unit), offset));
        }
    }
    None
}

pub enum FineOrCoarse {
    Fine(Arc<Fragment>),
    Coarse(Arc<CoarseUnit>, CachePc),
}

pub fn add(table: &crate::fragment::FragmentTable, fcache: &dyn FCache, fragment: Fragment) -> crate::error::Result<Arc<Fragment>> {
    fragment::lifecycle::add(table, fcache, fragment)
}

pub fn delete(
    ctx: &Context,
    thread: &ThreadState,
    is_trace: bool,
    table: &crate::fragment::FragmentTable,
    fragment: &Arc<Fragment>,
    actions: DeleteActions,
    link: &dyn Link,
    vmarea: &dyn VmArea,
    fcache: &dyn FCache,
    link_stubs: &dyn LinkStubs,
) {
    fragment::lifecycle::delete(
        ctx, thread, is_trace, table, fragment, actions, link, vmarea, fcache, link_stubs,
    );
}

pub fn replace(table: &crate::fragment::FragmentTable, new_fragment: Arc<Fragment>) -> Option<Arc<Fragment>> {
    fragment::lifecycle::replace(table, new_fragment)
}

pub fn remove(table: &crate::fragment::FragmentTable, tag: Tag) -> Option<Arc<Fragment>> {
    table.remove(tag)
}

/// spec.md §6 `add_ibl_target(tag, branch_type)`, scoped to `thread`'s own
/// table when IBT tables are configured private (spec.md §3: "an IBT
/// table per branch type per kind").
pub fn add_ibl_target(ctx: &Context, thread: &ThreadState, is_trace: bool, tag: Tag, pc: CachePc) {
    let shared = if is_trace { &ctx.shared().trace_ibt } else { &ctx.shared().bb_ibt };
    let lock = if is_trace { &ctx.shared().trace_ibt_write_lock } else { &ctx.shared().bb_ibt_write_lock };
    let Some(shared) = shared else {
        thread.add_private_ibl_target(is_trace, tag, pc);
        return;
    };
    let _guard = lock.lock();
    let added = shared.load().table.add(tag, pc);
    if added {
        let config = ctx.config();
        let invalid_pct = shared.load().table.invalid_percent();
        if config.rehash_unlinked_always || invalid_pct >= config.rehash_unlinked_threshold_percent {
            rehash_unlinked(ctx, shared, &_guard);
        }
    }
}

/// Computes a fresh, same-capacity table with invalid markers dropped but
/// does not publish it. Publishing safely needs the same retire-and-rotate
/// sequence `ibt::resize` performs (nullify the outgoing table, set its
/// ref-count, swap, enqueue onto the dead-table list) — reusing that
/// sequence here would need a `target_delete_pc` and a dead-table list this
/// entry point is not given (see DESIGN.md's Open Question decisions). The
/// threshold check above still fires correctly; only the reclaim itself is
/// deferred.
fn rehash_unlinked(_ctx: &Context, shared: &crate::ibt::SharedIbt, _write_lock_guard: &fc_sync::MutexGuard<'_, ()>) {
    let current = shared.load();
    let _fresh = current.table.rehash_unlinked();
}

/// spec.md §6 `remove_ibl_target(f)`, scoped to `thread`'s own table when
/// IBT tables are configured private. Use this from a call site that has
/// a single concrete owning thread (a thread invalidating its own entry
/// while unlinking or deleting a fragment it holds).
pub fn remove_ibl_target(ctx: &Context, thread: &ThreadState, is_trace: bool, tag: Tag, target_delete_pc: CachePc) {
    let shared = if is_trace { &ctx.shared().trace_ibt } else { &ctx.shared().bb_ibt };
    let lock = if is_trace { &ctx.shared().trace_ibt_write_lock } else { &ctx.shared().bb_ibt_write_lock };
    let Some(shared) = shared else {
        thread.remove_private_ibl_target(is_trace, tag, target_delete_pc);
        return;
    };
    let _guard = lock.lock();
    shared.load().table.remove(tag, target_delete_pc);
}

/// Same invalidation as [`remove_ibl_target`], but for a fragment no
/// single thread owns (e.g. a shared fragment unlinked by the flush
/// coordinator): hits the shared table once if configured, or every
/// thread in `threads` individually when IBT tables are private per
/// thread — a shared fragment can still be reachable from more than one
/// thread's private IBT table.
pub(crate) fn remove_ibl_target_for_threads(
    ctx: &Context,
    threads: &[Arc<ThreadState>],
    is_trace: bool,
    tag: Tag,
    target_delete_pc: CachePc,
) {
    let shared = if is_trace { &ctx.shared().trace_ibt } else { &ctx.shared().bb_ibt };
    let lock = if is_trace { &ctx.shared().trace_ibt_write_lock } else { &ctx.shared().bb_ibt_write_lock };
    if let Some(shared) = shared {
        let _guard = lock.lock();
        shared.load().table.remove(tag, target_delete_pc);
        return;
    }
    for thread in threads {
        thread.remove_private_ibl_target(is_trace, tag, target_delete_pc);
    }
}

/// Looks up `tag`'s current IBT entry, consulting `thread`'s own table
/// when IBT tables are configured private.
pub fn lookup_ibl_target(ctx: &Context, thread: &ThreadState, is_trace: bool, tag: Tag) -> Option<CachePc> {
    let shared = if is_trace { &ctx.shared().trace_ibt } else { &ctx.shared().bb_ibt };
    if let Some(shared) = shared {
        return shared.load().table.lookup(tag);
    }
    thread.lookup_private_ibl_target(is_trace, tag)
}

/// spec.md §6 `update_ibl_tables(thread)`.
pub fn update_ibl_tables(ctx: &Context, thread: &ThreadState) {
    thread.update_ibl_tables(ctx);
}

pub use crate::flush::{flush_and_remove_region, flush_region_finish, flush_region_start, invalidate_code_cache};

/// spec.md §6 `shift_fcache_pointers(f, delta, range, old_size)`.
pub fn shift_fcache_pointers(ctx: &Context, thread: &ThreadState, fragments: &[Arc<Fragment>], delta: isize) {
    for fragment in fragments {
        fragment::lifecycle::shift(ctx, thread, fragment, delta);
    }
}

pub fn pclookup(fcache: &dyn FCache, pc: CachePc) -> Option<Arc<Fragment>> {
    fcache.pclookup(pc)
}

pub fn coarse_pclookup(unit: &CoarseUnit, pc: CachePc) -> Option<(Tag, CachePc)> {
    unit.pclookup(pc)
}

/// spec.md §5 suspension point 1: "cache-to-translator transitions — may
/// block on flush." Call on exiting the code cache while still willing to
/// re-link.
pub fn enter_couldbelinking(ctx: &Context, thread: &ThreadState) {
    let _linking = thread.linking_lock.lock();
    thread.couldbelinking.store(true, Ordering::Release);
    drop(_linking);

    if thread.wait_for_unlink.load(Ordering::Acquire) {
        thread.waiting_for_unlink.signal();
        thread.finished_with_unlink.wait();
        thread.finished_with_unlink.reset();
    }

    thread.cache_exit_barrier(ctx);
}

/// spec.md §5 suspension point 1: the non-linking counterpart.
pub fn enter_nolinking(ctx: &Context, thread: &ThreadState) {
    let _linking = thread.linking_lock.lock();
    thread.couldbelinking.store(false, Ordering::Release);
    drop(_linking);

    if thread.wait_for_unlink.load(Ordering::Acquire) {
        thread.finished_all_unlink.wait();
        thread.finished_all_unlink.reset();
    }

    thread.cache_exit_barrier(ctx);
}

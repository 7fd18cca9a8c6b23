// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fragment lifecycle operations (spec.md §4.6).

use super::{Fragment, FragmentFlags, FragmentTable};
use crate::collab::{FCache, Link, LinkStubs, VmArea};
use crate::context::Context;
use crate::tag::{CachePc, Tag};
use crate::thread_state::ThreadState;
use std::sync::Arc;

bitflags::bitflags! {
    /// Actions selected for [`delete`], spec.md §4.6 `delete`: "a bitset
    /// selecting which of { output-for-logging, unlink-outgoing-and-
    /// incoming, remove-from-hashtable, remove-from-vmarea,
    /// remove-from-fcache, free-heap, invoke-client-deletion } to do."
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeleteActions: u32 {
        const LOG = 1 << 0;
        const UNLINK = 1 << 1;
        const REMOVE_HASHTABLE = 1 << 2;
        const REMOVE_VMAREA = 1 << 3;
        const REMOVE_FCACHE = 1 << 4;
        const FREE_HEAP = 1 << 5;
        const INVOKE_CLIENT = 1 << 6;
    }
}

/// spec.md §4.6 `create`.
pub fn create(
    tag: Tag,
    body_size: u32,
    n_direct_exits: usize,
    n_indirect_exits: usize,
    flags: FragmentFlags,
) -> Fragment {
    Fragment::new(tag, body_size, n_direct_exits, n_indirect_exits, flags)
}

/// spec.md §4.6 `add`: "inserts into the table selected by `(kind,
/// sharing)`; asserts no duplicate."
pub fn add(table: &FragmentTable, fcache: &dyn FCache, mut fragment: Fragment) -> crate::error::Result<Arc<Fragment>> {
    fcache.add_fragment(&mut fragment);
    let fragment = Arc::new(fragment);
    table.add(Arc::clone(&fragment))?;
    tracing::debug!(tag = %fragment.tag, "fragment added");
    Ok(fragment)
}

/// Two-stage deletion per spec.md §4.6: callers pass
/// `UNLINK | REMOVE_HASHTABLE | REMOVE_VMAREA` first, then, after the
/// flushtime barrier has proven no thread can still reach `fragment`,
/// `FREE_HEAP`.
pub fn delete(
    ctx: &Context,
    thread: &ThreadState,
    is_trace: bool,
    table: &FragmentTable,
    fragment: &Arc<Fragment>,
    actions: DeleteActions,
    link: &dyn Link,
    vmarea: &dyn VmArea,
    fcache: &dyn FCache,
    link_stubs: &dyn LinkStubs,
) {
    if actions.contains(DeleteActions::LOG) {
        tracing::info!(tag = %fragment.tag, ?actions, "deleting fragment");
    }
    if actions.contains(DeleteActions::UNLINK) {
        link.unlink_outgoing(fragment);
        link.unlink_incoming(fragment);
        crate::api::remove_ibl_target(ctx, thread, is_trace, fragment.tag, link.target_delete_pc());
        let mut flags = fragment.flags.lock();
        flags.remove(FragmentFlags::LINKED);
        *flags |= FragmentFlags::DELETED;
    }
    if actions.contains(DeleteActions::REMOVE_HASHTABLE) {
        table.remove(fragment.tag);
    }
    if actions.contains(DeleteActions::REMOVE_VMAREA) {
        vmarea.area_remove_fragment(fragment);
    }
    if actions.contains(DeleteActions::REMOVE_FCACHE) {
        fcache.remove_fragment(fragment);
    }
    if actions.contains(DeleteActions::FREE_HEAP) {
        link_stubs.free(fragment);
        // `fragment`'s `Arc` strong count drops to zero once every
        // pending-deletion reference (spec.md §4.7) has also been
        // dropped; there is no explicit heap-free call in this
        // reimplementation because ownership is expressed through `Arc`
        // rather than manual allocation.
    }
}

/// spec.md §4.6 `replace`: "in all tables atomically (tag preserved)."
pub fn replace(table: &FragmentTable, new_fragment: Arc<Fragment>) -> Option<Arc<Fragment>> {
    table.write().replace(new_fragment.tag, new_fragment)
}

/// spec.md §4.6 `shift`: "fixup when the fcache moves a fragment: adjust
/// `start_pc`, re-relativise PC-relative jumps inside the body, update IBT
/// entries." PC-relative jump fixup is generated-code work, out of scope
/// (spec.md §1); the other two are this function's job.
pub fn shift(ctx: &Context, thread: &ThreadState, fragment: &Arc<Fragment>, delta: isize) {
    let mut start_pc = fragment.start_pc.lock();
    let new_pc = start_pc.map(|pc| (pc as isize + delta) as CachePc);
    *start_pc = new_pc;
    drop(start_pc);

    let mut exits = fragment.exits.lock();
    for exit in exits.iter_mut() {
        exit.stub_pc = (exit.stub_pc as isize + delta) as CachePc;
    }
    drop(exits);

    // A no-op if `fragment.tag` never had an IBT entry to begin with
    // (`IbtTable::replace` only touches an existing slot).
    if let Some(new_pc) = new_pc {
        let is_trace = fragment.flags().contains(FragmentFlags::IS_TRACE);
        let shared = if is_trace { &ctx.shared().trace_ibt } else { &ctx.shared().bb_ibt };
        if let Some(shared) = shared {
            let lock = if is_trace { &ctx.shared().trace_ibt_write_lock } else { &ctx.shared().bb_ibt_write_lock };
            let _guard = lock.lock();
            shared.load().table.replace(fragment.tag, new_pc);
        } else {
            thread.replace_private_ibl_target(is_trace, fragment.tag, new_pc);
        }
    }
}

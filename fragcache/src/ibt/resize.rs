// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The IBT table resize workflow (spec.md §4.3): build a bigger table,
//! copy live entries, nullify and retire the old one.

use super::retire::DeadIbtTable;
use super::{IbtTable, SharedIbt};
use crate::tag::CachePc;
use fc_queue::Queue;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Resizes `shared` to `new_bits`, retiring the outgoing table onto
/// `dead_list` with a ref-count of `thread_count`.
///
/// Must be called with the table's write lock held (spec.md §5's rwlock
/// ranking: "Each table's rwlock is ranked below all of the above", i.e.
/// below the dead-list lock only in the sense that this function itself
/// acquires no dead-list lock beyond `Queue::push_back`'s own).
pub fn resize(shared: &SharedIbt, dead_list: &Queue<DeadIbtTable>, new_bits: u8, thread_count: usize, target_delete_pc: CachePc) {
    let old = shared.load();

    let fresh = IbtTable::new(new_bits, 75);
    for (tag, pc) in old.table.entries() {
        fresh.add(tag, pc);
    }

    // spec.md §4.3: "Its slots are nullified ... The old table is
    // enqueued with ref_count = #threads on the dead-table FIFO." Set the
    // ref-count and nullify *before* publishing the new pointer so no
    // thread can observe the rotation before the old table is ready to be
    // retired (see `SharedIbt::swap`'s doc comment).
    old.table.nullify_for_retirement(target_delete_pc);
    old.ref_count.store(thread_count, Ordering::Release);

    let new_wrapped = DeadIbtTable::new(fresh, 0);
    let retired = shared.swap(new_wrapped);
    debug_assert!(Arc::ptr_eq(&retired, &old));
    dead_list.push_back(retired);
}

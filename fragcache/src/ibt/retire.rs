// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Dead-IBT-table retirement (spec.md §3 "Dead-IBT-table record", §4.3
//! "Each thread carries an I have observed the shared IBT table pointer").

use super::IbtTable;
use fc_queue::Links;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// `{ storage_base, capacity, flags, ref_count, next }` from spec.md §3,
/// minus `storage_base`/`capacity`/`flags` which are properties of the
/// embedded [`IbtTable`] itself rather than separate fields here.
///
/// Shared via `Arc` rather than the queue's usual exclusive-`Box`
/// ownership: every [`RotationTracker`] that was still using this table
/// when it was retired holds its own `Arc` clone (from
/// [`super::SharedIbt::load`]) independent of the single strong count the
/// dead-table queue itself owns. `ref_count` is the *logical* spec.md
/// counter that decides when the queue should sweep this entry away; it
/// is unrelated to `Arc`'s own strong count, which keeps the allocation
/// alive for as long as anyone (tracker or queue) still references it.
pub struct DeadIbtTable {
    pub table: IbtTable,
    pub ref_count: AtomicUsize,
    links: Links<DeadIbtTable>,
}

impl DeadIbtTable {
    pub fn new(table: IbtTable, ref_count: usize) -> Arc<Self> {
        Arc::new(Self {
            table,
            ref_count: AtomicUsize::new(ref_count),
            links: Links::new(),
        })
    }
}

// Safety: `links` returns a pointer to the `links` field embedded in the
// same allocation as `ptr`. Multiple `Arc` clones may be outstanding, but
// only the queue (under its internal mutex) ever touches `links`.
unsafe impl fc_queue::Linked for DeadIbtTable {
    type Handle = Arc<DeadIbtTable>;

    fn into_ptr(handle: Arc<DeadIbtTable>) -> NonNull<DeadIbtTable> {
        // Safety: `Arc::into_raw` never returns null.
        unsafe { NonNull::new_unchecked(Arc::into_raw(handle) as *mut DeadIbtTable) }
    }

    unsafe fn from_ptr(ptr: NonNull<DeadIbtTable>) -> Arc<DeadIbtTable> {
        // Safety: forwarded from caller; `ptr` was produced by `into_ptr`.
        unsafe { Arc::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<DeadIbtTable>) -> NonNull<Links<DeadIbtTable>> {
        // Safety: forwarded from caller.
        unsafe { NonNull::new_unchecked(&raw mut (*ptr.as_ptr()).links) }
    }
}

/// Per-thread tracker of "the shared IBT table pointer I have observed"
/// (spec.md §4.3). Call [`Self::observe`] on every return from generated
/// code; when the shared pointer has moved on, this decrements the
/// ref-count of the table this thread was previously using.
pub struct RotationTracker {
    current: Arc<DeadIbtTable>,
}

impl RotationTracker {
    pub fn new(current: Arc<DeadIbtTable>) -> Self {
        Self { current }
    }

    pub fn current(&self) -> &Arc<DeadIbtTable> {
        &self.current
    }

    /// Returns `true` if this call observed a rotation (the shared pointer
    /// had changed since the last observation).
    pub fn observe(&mut self, latest: Arc<DeadIbtTable>) -> bool {
        if Arc::ptr_eq(&latest, &self.current) {
            return false;
        }
        let previous = std::mem::replace(&mut self.current, latest);
        previous.ref_count.fetch_sub(1, Ordering::AcqRel);
        true
    }
}

/// Sweeps entries whose ref-count has reached zero out of the dead-table
/// queue, actually freeing them (spec.md §3: "freed when `ref_count`
/// reaches zero").
pub fn sweep_dead_tables(queue: &fc_queue::Queue<DeadIbtTable>) {
    queue.retain_mut(|dead| dead.ref_count.load(Ordering::Acquire) > 0);
}

// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The indirect-branch-target table (spec.md §4.3).
//!
//! Unlike [`crate::hashtable::OpenAddressTable`] this is **not** built on
//! the `Slot<K, V>` enum: spec.md §9 "Tagged slot states" is explicit that
//! a concurrent-reader contract needs "the tag check ... a single atomic
//! load", which an enum discriminant inside a `Vec` cannot give without
//! tearing. Each slot here is instead a pair of word-sized atomics
//! (`tag`, `pc`), matching `original_source/core/hashtable.h`'s POD
//! `generic_entry_t { key, payload }` layout and spec.md §9
//! "Generated-code coupling": "Keep the entry as a POD `{tag, pc}` of
//! pointer-word width ... expose a stable layout descriptor to the
//! emitter."
//!
//! Table *publication* (as opposed to individual entry mutation) follows
//! spec.md §5's ordering guarantee: "store new table pointer, then
//! store-release mask; paired with a load-acquire of mask then load of
//! table pointer", implemented here as an `Arc`-swap guarded by a
//! separately published mask, the same acquire/release snapshot idiom the
//! `arc-swap` crate uses for lock-free readers.

mod resize;
mod retire;
#[cfg(all(test, loom))]
mod loom_tests;

pub use resize::resize;
pub use retire::{sweep_dead_tables, DeadIbtTable, RotationTracker};

use crate::tag::{CachePc, Tag};
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const EMPTY_TAG: usize = 0;
const SENTINEL_TAG: usize = usize::MAX - 1;
const INVALID_TAG: usize = usize::MAX;

/// One `(tag, cache_pc)` slot, each field independently atomic.
struct IbtSlot {
    tag: AtomicUsize,
    pc: AtomicUsize,
}

impl IbtSlot {
    fn empty() -> Self {
        Self {
            tag: AtomicUsize::new(EMPTY_TAG),
            pc: AtomicUsize::new(0),
        }
    }

    fn sentinel() -> Self {
        Self {
            tag: AtomicUsize::new(SENTINEL_TAG),
            pc: AtomicUsize::new(0),
        }
    }
}

/// A fixed-capacity lockless IBT table. Resizing never mutates one of
/// these in place; it builds a fresh `IbtTable` and the owning
/// [`SharedIbt`] swaps to it (spec.md §4.3 "Resize creates a new table").
pub struct IbtTable {
    slots: Box<[IbtSlot]>,
    bits: u8,
    mask_offset: u8,
}

impl IbtTable {
    pub fn new(bits: u8, _load_factor_percent: u8) -> Self {
        Self::with_mask_offset(bits, 0)
    }

    fn with_mask_offset(bits: u8, mask_offset: u8) -> Self {
        let capacity = (1usize << bits) + 1;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity - 1, IbtSlot::empty);
        slots.push(IbtSlot::sentinel());
        Self {
            slots: slots.into_boxed_slice(),
            bits,
            mask_offset,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn probe_start(&self, tag: Tag) -> usize {
        ((tag.hash() >> self.mask_offset) & self.mask()) as usize
    }

    fn ring_len(&self) -> usize {
        (self.slots.len() - 1).max(1)
    }

    /// spec.md §4.1/§4.3 `lookup`: safe to call concurrently with writers.
    /// Invalid entries are skipped (treated as occupied but non-matching).
    /// spec.md §8 invariant 4: the returned `pc`, when `tag` matches, is
    /// always either a live fragment's cache entry or `target_delete_pc` —
    /// never garbage, because `add` always writes `pc` before `tag`.
    pub fn lookup(&self, tag: Tag) -> Option<CachePc> {
        let start = self.probe_start(tag);
        let len = self.ring_len();
        for i in 0..self.slots.len() {
            let idx = (start + i) % len;
            let slot = &self.slots[idx];
            let t = slot.tag.load(Ordering::Acquire);
            if t == EMPTY_TAG || t == SENTINEL_TAG {
                return None;
            }
            if t == tag.as_usize() {
                return Some(slot.pc.load(Ordering::Acquire));
            }
            // INVALID_TAG, or an occupied slot for a different tag: the
            // probe chain continues past it.
        }
        None
    }

    fn find_index(&self, tag: Tag) -> Option<usize> {
        let start = self.probe_start(tag);
        let len = self.ring_len();
        for i in 0..self.slots.len() {
            let idx = (start + i) % len;
            let t = self.slots[idx].tag.load(Ordering::Acquire);
            if t == EMPTY_TAG || t == SENTINEL_TAG {
                return None;
            }
            if t == tag.as_usize() {
                return Some(idx);
            }
        }
        None
    }

    /// spec.md §4.3 `add`: "must re-check for the target tag under the
    /// write lock to tolerate the race where two threads add the same
    /// tag" — an add of an already-present tag is a benign no-op rather
    /// than an error.
    ///
    /// Callers must hold the table's write lock; this method itself does
    /// not lock, matching spec.md's description of `add` as a writer-side
    /// operation performed while readers continue lockless.
    pub fn add(&self, tag: Tag, pc: CachePc) -> bool {
        if self.find_index(tag).is_some() {
            return false;
        }
        let start = self.probe_start(tag);
        let len = self.ring_len();
        for i in 0..self.slots.len() {
            let idx = (start + i) % len;
            let slot = &self.slots[idx];
            let t = slot.tag.load(Ordering::Acquire);
            if t == EMPTY_TAG || t == INVALID_TAG {
                // spec.md §5 "Add-entry": payload written first, then a
                // store barrier, then the tag, so a lockless reader that
                // observes the new tag also observes its payload.
                slot.pc.store(pc, Ordering::Release);
                slot.tag.store(tag.as_usize(), Ordering::Release);
                return true;
            }
        }
        false
    }

    /// spec.md §4.3 "Remove is not physical; sets the slot to the invalid
    /// marker": writes `(INVALID_TAG, target_delete_pc)`.
    pub fn remove(&self, tag: Tag, target_delete_pc: CachePc) -> bool {
        let Some(idx) = self.find_index(tag) else {
            return false;
        };
        let slot = &self.slots[idx];
        slot.pc.store(target_delete_pc, Ordering::Release);
        slot.tag.store(INVALID_TAG, Ordering::Release);
        true
    }

    pub fn replace(&self, tag: Tag, new_pc: CachePc) -> bool {
        let Some(idx) = self.find_index(tag) else {
            return false;
        };
        self.slots[idx].pc.store(new_pc, Ordering::Release);
        true
    }

    /// spec.md §4.3: "If too many invalid markers accumulate (configurable
    /// percentage or always), a same-capacity rehash is performed that
    /// drops them." Only valid entries are copied into a fresh table of
    /// the same `bits`.
    pub fn rehash_unlinked(&self) -> IbtTable {
        let fresh = IbtTable::with_mask_offset(self.bits, self.mask_offset);
        for slot in self.slots.iter() {
            let t = slot.tag.load(Ordering::Acquire);
            if t != EMPTY_TAG && t != SENTINEL_TAG && t != INVALID_TAG {
                let pc = slot.pc.load(Ordering::Acquire);
                fresh.add(Tag::new(t), pc);
            }
        }
        fresh
    }

    /// Fraction of slots (of `capacity - 1` real slots) holding an invalid
    /// marker, used to decide [`crate::config::Config::rehash_unlinked_threshold_percent`].
    pub fn invalid_percent(&self) -> u8 {
        let real_capacity = self.slots.len().saturating_sub(1).max(1);
        let invalid = self
            .slots
            .iter()
            .filter(|s| s.tag.load(Ordering::Relaxed) == INVALID_TAG)
            .count();
        ((invalid * 100) / real_capacity) as u8
    }

    /// spec.md §4.3 "Resize ... the old table is not freed immediately.
    /// Its slots are nullified by writing `(old_tag, target_delete_pc)`
    /// into each occupied slot": the tag is deliberately preserved here
    /// (unlike [`Self::remove`]'s `INVALID_TAG`), so a thread still
    /// dereferencing this retired table through a stale pointer gets a
    /// tag match and lands safely in `target_delete_pc`.
    pub fn nullify_for_retirement(&self, target_delete_pc: CachePc) {
        for slot in self.slots.iter() {
            let t = slot.tag.load(Ordering::Acquire);
            if t != EMPTY_TAG && t != SENTINEL_TAG {
                slot.pc.store(target_delete_pc, Ordering::Release);
            }
        }
    }

    pub fn entries(&self) -> Vec<(Tag, CachePc)> {
        self.slots
            .iter()
            .filter_map(|s| {
                let t = s.tag.load(Ordering::Acquire);
                if t == EMPTY_TAG || t == SENTINEL_TAG || t == INVALID_TAG {
                    None
                } else {
                    Some((Tag::new(t), s.pc.load(Ordering::Acquire)))
                }
            })
            .collect()
    }
}

/// A lock-free-readable handle to the current shared [`IbtTable`],
/// wrapped in a [`DeadIbtTable`] even while live so that the moment it is
/// retired it already carries the ref-count/queue-linkage spec.md
/// requires (see [`resize::resize`]).
///
/// Writers serialize through an external lock (e.g. a per-table
/// `fc_sync::Mutex<()>` held by [`crate::context::Context`]); only
/// [`resize::resize`] and [`Self::load`] touch the atomics directly.
pub struct SharedIbt {
    ptr: AtomicPtr<DeadIbtTable>,
    mask: AtomicU64,
}

impl SharedIbt {
    pub fn new(table: IbtTable) -> Self {
        let mask = table.mask();
        let raw = Arc::into_raw(DeadIbtTable::new(table, 0)) as *mut DeadIbtTable;
        Self {
            ptr: AtomicPtr::new(raw),
            mask: AtomicU64::new(mask),
        }
    }

    /// Lock-free snapshot load. spec.md §5: "paired with a load-acquire of
    /// mask then load of table pointer."
    pub fn load(&self) -> Arc<DeadIbtTable> {
        let _mask = self.mask.load(Ordering::Acquire);
        let raw = self.ptr.load(Ordering::Relaxed);
        // Safety: `raw` was published by `new`/`resize::resize` as an
        // `Arc::into_raw` pointer whose refcount this increments before
        // handing out a new owning `Arc`; the pointee is kept alive by the
        // dead-table retirement protocol (`retire::DeadIbtTable`) until
        // every thread has rotated off it.
        unsafe {
            Arc::increment_strong_count(raw);
            Arc::from_raw(raw)
        }
    }

    /// Swaps in `new`, returning the table that was current before the
    /// swap. spec.md §5: store new table pointer, then store-release mask.
    ///
    /// Must be called with the table's write lock held, and only after
    /// the outgoing table has already had its ref-count set for
    /// retirement (see [`resize::resize`]) — this method performs no
    /// bookkeeping of its own beyond the pointer/mask publication.
    fn swap(&self, new: Arc<DeadIbtTable>) -> Arc<DeadIbtTable> {
        let new_mask = new.table.mask();
        let new_raw = Arc::into_raw(new) as *mut DeadIbtTable;
        let old_raw = self.ptr.swap(new_raw, Ordering::Relaxed);
        self.mask.store(new_mask, Ordering::Release);
        // Safety: `old_raw` was published by a previous `new`/`swap` call
        // via `Arc::into_raw`.
        unsafe { Arc::from_raw(old_raw) }
    }
}

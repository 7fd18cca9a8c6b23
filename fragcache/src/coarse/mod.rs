// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Coarse-unit directory (spec.md §4.5), grounded on
//! `original_source/core/jitopt.c`'s freeze/unit model and, for the
//! reverse pc→tag lookup, `lookup_trap_code` in
//! `libs/kwasm/src/vm/code_object.rs`, which resolves a code offset to a
//! logical record via `binary_search_by_key` over a sorted side table —
//! the same technique used here for `cache_pc → tag` resolution.

mod freeze;

pub use freeze::{freeze, PendingFreeze};

use crate::hashtable::{OpenAddressTable, TableFlags};
use crate::tag::{CachePc, Tag};
use fc_sync::RwLock;
use std::collections::HashMap;

/// Bound on the bounded `recent_pc → (tag, body_pc)` cache (spec.md §4.5:
/// "when the cache exceeds a fixed threshold it is cleared (rather than
/// using LRU) to bound memory"). spec.md §8 scenario 5 exercises this at
/// exactly one past the threshold.
pub const RECENT_PC_CACHE_LIMIT: usize = 8192;

/// One frozen or non-frozen coarse-grain translation unit.
pub struct CoarseUnit {
    /// `tag → cache_offset`. Frozen units store offsets from a stable
    /// base; non-frozen store absolute `cache_pc` (spec.md §4.5).
    main: RwLock<OpenAddressTable<Tag, CachePc>>,
    /// `tag → stub_offset` for trace heads whose body lives in this unit.
    trace_heads: RwLock<OpenAddressTable<Tag, CachePc>>,
    /// Sorted `(cache_pc, tag)` pairs, rebuilt on demand, resolved via
    /// binary search the way `lookup_trap_code` resolves a code offset.
    reverse: RwLock<Option<Vec<(CachePc, Tag)>>>,
    /// Bounded `recent_pc → (tag, body_pc)` cache.
    recent_pc_cache: RwLock<HashMap<CachePc, (Tag, CachePc)>>,
    pub frozen: std::sync::atomic::AtomicBool,
    /// Applied to a tag before comparing, so persisted tables survive
    /// base-address changes at load time (spec.md §4.5).
    pub mod_shift: std::sync::atomic::AtomicIsize,
    /// spec.md §10 persistence header version; bumped only if the on-disk
    /// layout changes.
    pub version: u32,
}

pub const CURRENT_PERSISTENCE_VERSION: u32 = 1;

impl CoarseUnit {
    pub fn new(initial_bits: u8, load_factor_percent: u8) -> Self {
        Self {
            main: RwLock::new(OpenAddressTable::new(
                initial_bits,
                load_factor_percent,
                90,
                24,
                0,
                TableFlags::PRIMARY_STORAGE,
            )),
            trace_heads: RwLock::new(OpenAddressTable::new(
                initial_bits,
                load_factor_percent,
                90,
                24,
                0,
                TableFlags::empty(),
            )),
            reverse: RwLock::new(None),
            recent_pc_cache: RwLock::new(HashMap::new()),
            frozen: std::sync::atomic::AtomicBool::new(false),
            mod_shift: std::sync::atomic::AtomicIsize::new(0),
            version: CURRENT_PERSISTENCE_VERSION,
        }
    }

    fn shifted(&self, tag: Tag) -> Tag {
        let shift = self.mod_shift.load(std::sync::atomic::Ordering::Relaxed);
        Tag::new((tag.as_usize() as isize + shift) as usize)
    }

    pub fn lookup(&self, tag: Tag) -> Option<CachePc> {
        self.main.read().lookup(self.shifted(tag)).copied()
    }

    pub fn lookup_trace_head(&self, tag: Tag) -> Option<CachePc> {
        self.trace_heads.read().lookup(self.shifted(tag)).copied()
    }

    pub fn add(&self, tag: Tag, offset: CachePc) -> crate::error::Result<()> {
        self.main.write().add(self.shifted(tag), offset)?;
        self.invalidate_reverse();
        Ok(())
    }

    pub fn add_trace_head(&self, tag: Tag, stub_offset: CachePc) -> crate::error::Result<()> {
        self.trace_heads.write().add(self.shifted(tag), stub_offset)
    }

    fn invalidate_reverse(&self) {
        *self.reverse.write() = None;
        self.recent_pc_cache.write().clear();
    }

    fn build_reverse(&self) -> Vec<(CachePc, Tag)> {
        let mut v: Vec<_> = self
            .main
            .read()
            .iter()
            .map(|(tag, pc)| (*pc, *tag))
            .collect();
        v.sort_unstable_by_key(|(pc, _)| *pc);
        v
    }

    /// spec.md §4.5/§6 `coarse_pclookup`: resolves a cache pc back to its
    /// owning `(tag, body_pc)`, consulting and then populating the bounded
    /// recent-pc cache. spec.md §8 scenario 5: cleared once it exceeds
    /// [`RECENT_PC_CACHE_LIMIT`] entries rather than evicted LRU-style.
    pub fn pclookup(&self, pc: CachePc) -> Option<(Tag, CachePc)> {
        if let Some(hit) = self.recent_pc_cache.read().get(&pc) {
            return Some(*hit);
        }

        {
            let mut reverse = self.reverse.write();
            if reverse.is_none() {
                *reverse = Some(self.build_reverse());
            }
        }
        let reverse_guard = self.reverse.read();
        let table = reverse_guard.as_ref().unwrap();
        // The entry whose `cache_pc` is the greatest value <= `pc` owns
        // it, mirroring `lookup_trap_code`'s use of `binary_search_by_key`
        // over a sorted offset table.
        let idx = match table.binary_search_by_key(&pc, |(p, _)| *p) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let (body_pc, tag) = table[idx];
        drop(reverse_guard);

        let mut cache = self.recent_pc_cache.write();
        if cache.len() >= RECENT_PC_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pc, (tag, body_pc));
        Some((tag, body_pc))
    }

    pub fn entries(&self) -> usize {
        self.main.read().entries()
    }
}

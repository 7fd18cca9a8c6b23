// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fragments and the fragment table (spec.md §3, §4.2, §4.6).
//!
//! spec.md §9 "Cyclic structures" calls for avoiding shared mutable
//! ownership of the incoming/outgoing link graph: "make fragments owned by
//! their fragment table and treat link edges as index/pointer *weak
//! references* into that table". [`Fragment::exits`] therefore stores
//! target [`Tag`]s, not `Arc<Fragment>`s, and [`Fragment::incoming`] stores
//! `(source tag, exit index)` pairs — both are looked back up through the
//! owning [`FragmentTable`] rather than held as strong references, the
//! same discipline `Stored<T>`'s index-handle
//! (`libs/kwasm/src/store/stored.rs`) uses to keep an arena's internal
//! graph acyclic.

mod future;
pub(crate) mod lifecycle;

pub use future::FutureTable;
pub use lifecycle::DeleteActions;

use crate::hashtable::{OpenAddressTable, TableFlags};
use crate::tag::{CachePc, Tag};
use fc_sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;
use std::sync::Arc;

bitflags::bitflags! {
    /// Fragment attribute bitset, spec.md §3 "Fragment. ... flags".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u32 {
        const IS_TRACE = 1 << 0;
        const IS_BB = 1 << 1;
        const IS_FUTURE = 1 << 2;
        const IS_COARSE = 1 << 3;
        const SHARED = 1 << 4;
        const LINKED = 1 << 5;
        const DELETED = 1 << 6;
        const HAS_TRANSLATION_INFO = 1 << 7;
        const SELFMOD = 1 << 8;
        const TRACE_BUILDING = 1 << 9;
        const CANNOT_DELETE = 1 << 10;
        /// ISA execution mode at entry (e.g. Thumb on Arm); the core treats
        /// this as an opaque bit it preserves and compares, never
        /// interprets (spec.md §1 "the specific CPU / ISA ... out of
        /// scope").
        const ISA_MODE = 1 << 11;
        /// A future fragment promoted to real only ever carries this
        /// subset of its future's flags forward (spec.md §4.4).
        const IS_TRACE_HEAD = 1 << 12;
    }
}

/// One exit stub descriptor, spec.md §3 "exits: inline array of exit stub
/// descriptors ... with per-exit target tag, link state and stub pc".
#[derive(Debug, Clone)]
pub struct Exit {
    pub target_tag: Tag,
    pub linked: bool,
    pub stub_pc: CachePc,
}

/// One translated unit living in the code cache.
#[derive(Debug)]
pub struct Fragment {
    pub tag: Tag,
    pub flags: fc_sync::Mutex<FragmentFlags>,
    pub size: u32,
    pub prefix_size: u16,
    pub fcache_extra: u32,
    pub start_pc: fc_sync::Mutex<Option<CachePc>>,
    pub exits: fc_sync::Mutex<SmallVec<[Exit; 4]>>,
    /// `(source fragment tag, exit index within that source)`.
    pub incoming: fc_sync::Mutex<Vec<(Tag, usize)>>,
    /// Opaque identifier of the owning VM area, consulted only through
    /// [`crate::collab::VmArea`].
    pub vmarea_id: Option<u64>,
}

impl Fragment {
    pub fn new(tag: Tag, size: u32, n_direct_exits: usize, n_indirect_exits: usize, flags: FragmentFlags) -> Self {
        let mut exits = SmallVec::with_capacity(n_direct_exits + n_indirect_exits);
        exits.extend((0..n_direct_exits + n_indirect_exits).map(|_| Exit {
            target_tag: Tag::EMPTY,
            linked: false,
            stub_pc: 0,
        }));
        Self {
            tag,
            flags: fc_sync::Mutex::new(flags),
            size,
            prefix_size: 0,
            fcache_extra: 0,
            start_pc: fc_sync::Mutex::new(None),
            exits: fc_sync::Mutex::new(exits),
            incoming: fc_sync::Mutex::new(Vec::new()),
            vmarea_id: None,
        }
    }

    pub fn flags(&self) -> FragmentFlags {
        *self.flags.lock()
    }

    pub fn is_future(&self) -> bool {
        self.flags().contains(FragmentFlags::IS_FUTURE)
    }

    pub fn start_pc(&self) -> Option<CachePc> {
        *self.start_pc.lock()
    }

    /// Whether `pc` lies inside `[start_pc, start_pc + size)` (spec.md §8
    /// invariant 7, `pclookup`).
    pub fn contains_pc(&self, pc: CachePc) -> bool {
        match self.start_pc() {
            Some(start) => pc >= start && pc < start + self.size as usize,
            None => false,
        }
    }
}

/// Instantiation of the generic hashtable for `tag → Arc<Fragment>`
/// (spec.md §4.2).
///
/// `Empty`/`Sentinel` are the generic table's own markers; there is no
/// separate `&null_fragment`/`&sentinel_fragment` pointer the way a plain
/// C hashtable needs, because [`crate::hashtable::Slot`] already carries
/// that discriminant in the enum tag rather than in a distinguished
/// pointer value (spec.md §9 "Tagged slot states").
pub struct FragmentTable {
    inner: RwLock<OpenAddressTable<Tag, Arc<Fragment>>>,
}

impl FragmentTable {
    pub fn new(initial_bits: u8, load_factor_percent: u8, shared: bool) -> Self {
        let mut flags = TableFlags::PRIMARY_STORAGE;
        if shared {
            flags |= TableFlags::SHARED;
        }
        Self {
            inner: RwLock::new(OpenAddressTable::new(
                initial_bits,
                load_factor_percent,
                90,
                24,
                0,
                flags,
            )),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, OpenAddressTable<Tag, Arc<Fragment>>> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, OpenAddressTable<Tag, Arc<Fragment>>> {
        self.inner.write()
    }

    pub fn lookup(&self, tag: Tag) -> Option<Arc<Fragment>> {
        self.inner.read().lookup(tag).cloned()
    }

    /// spec.md §4.6 `add`: "asserts no duplicate".
    pub fn add(&self, fragment: Arc<Fragment>) -> crate::error::Result<()> {
        self.inner.write().add(fragment.tag, fragment)
    }

    pub fn remove(&self, tag: Tag) -> Option<Arc<Fragment>> {
        self.inner.write().remove(tag).0
    }

    pub fn entries(&self) -> usize {
        self.inner.read().entries()
    }
}

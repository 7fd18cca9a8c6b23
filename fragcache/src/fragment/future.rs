// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Future-fragment table (spec.md §4.4): "Same shape as the fragment
//! table, but entries hold only `(tag, flags, incoming_list)`."

use super::{Fragment, FragmentFlags};
use crate::hashtable::{OpenAddressTable, TableFlags};
use crate::tag::Tag;
use fc_sync::RwLock;
use std::sync::Arc;

/// A placeholder entry for a not-yet-built target fragment.
#[derive(Debug)]
pub struct FutureEntry {
    pub flags: FragmentFlags,
    pub incoming: Vec<(Tag, usize)>,
}

/// Flags preserved across promotion from future to real fragment
/// (spec.md §4.4: "copies a restricted subset of flags (`IS_TRACE_HEAD`
/// only)").
const PROMOTABLE_FLAGS: FragmentFlags = FragmentFlags::IS_TRACE_HEAD;

pub struct FutureTable {
    inner: RwLock<OpenAddressTable<Tag, FutureEntry>>,
}

impl FutureTable {
    pub fn new(initial_bits: u8, load_factor_percent: u8) -> Self {
        Self {
            inner: RwLock::new(OpenAddressTable::new(
                initial_bits,
                load_factor_percent,
                90,
                24,
                0,
                TableFlags::PRIMARY_STORAGE,
            )),
        }
    }

    pub fn add_future(&self, tag: Tag) -> crate::error::Result<()> {
        self.inner.write().add(
            tag,
            FutureEntry {
                flags: FragmentFlags::IS_FUTURE,
                incoming: Vec::new(),
            },
        )
    }

    pub fn lookup_future(&self, tag: Tag) -> bool {
        self.inner.read().contains(tag)
    }

    pub fn add_incoming(&self, tag: Tag, source: Tag, exit_index: usize) {
        if let Some(entry) = self.inner.write().lookup_mut(tag) {
            entry.incoming.push((source, exit_index));
        }
    }

    /// spec.md §4.4 "Converting a future to a real fragment transfers the
    /// `incoming_list` and copies a restricted subset of flags ... the
    /// future is then removed and freed."
    pub fn promote(&self, tag: Tag, fragment: &Arc<Fragment>) -> bool {
        let Some((_, removed)) = self.inner.write().remove(tag).0.map(|e| (tag, e)) else {
            return false;
        };
        let carried = removed.flags & PROMOTABLE_FLAGS;
        let mut flags = fragment.flags.lock();
        *flags |= carried;
        drop(flags);
        fragment.incoming.lock().extend(removed.incoming);
        true
    }

    pub fn entries(&self) -> usize {
        self.inner.read().entries()
    }
}

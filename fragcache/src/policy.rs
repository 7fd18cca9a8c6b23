// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Return/indirect-branch policy tables (spec.md component table: "§2
//! Return/indirect-branch policy tables ... Per-module allow-lists of
//! valid call-return / indirect-branch targets").
//!
//! An instantiation of the generic hashtable with a unit payload — these
//! tables only ever answer "is `tag` an allowed target", never map to a
//! value.

use crate::hashtable::{OpenAddressTable, TableFlags};
use crate::tag::Tag;
use fc_sync::RwLock;

pub struct PolicyTable {
    module_base: usize,
    allowed: RwLock<OpenAddressTable<Tag, ()>>,
}

impl PolicyTable {
    pub fn new(module_base: usize, initial_bits: u8, load_factor_percent: u8) -> Self {
        Self {
            module_base,
            allowed: RwLock::new(OpenAddressTable::new(
                initial_bits,
                load_factor_percent,
                90,
                24,
                0,
                TableFlags::empty(),
            )),
        }
    }

    pub fn module_base(&self) -> usize {
        self.module_base
    }

    pub fn allow(&self, tag: Tag) -> crate::error::Result<()> {
        self.allowed.write().add(tag, ())
    }

    pub fn is_allowed(&self, tag: Tag) -> bool {
        self.allowed.read().contains(tag)
    }

    pub fn revoke(&self, tag: Tag) {
        self.allowed.write().remove(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_then_check() {
        let t = PolicyTable::new(0x1000, 4, 75);
        assert!(!t.is_allowed(Tag::new(0x1010)));
        t.allow(Tag::new(0x1010)).unwrap();
        assert!(t.is_allowed(Tag::new(0x1010)));
        t.revoke(Tag::new(0x1010));
        assert!(!t.is_allowed(Tag::new(0x1010)));
    }
}

// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime configuration (spec.md §6 "Configuration").
//!
//! The k23 kernel reads most of its tunables at compile time via
//! `kconfig_declare!` (`kernel/src/kconfig.rs`), because a kernel image is
//! built once per target. A fragment cache directory is a library embedded
//! into a long-running translator process and spec.md is explicit that
//! "the core reads these at init and does not observe changes afterwards"
//! — a runtime-immutable struct read once at [`crate::Context::new`], not
//! a compile-time constant. `Config` is that struct.

/// Construction-time tunables for a [`crate::Context`].
///
/// Read once at [`crate::Context::new`] and never observed to change
/// afterwards, matching spec.md §6's closing sentence.
#[derive(Debug, Clone)]
pub struct Config {
    /// Basic blocks are stored in a table shared across threads rather
    /// than per-thread.
    pub shared_bbs: bool,
    /// Traces are stored in a table shared across threads.
    pub shared_traces: bool,
    /// The basic-block IBT table is shared across threads.
    pub shared_bb_ibt_tables: bool,
    /// The trace IBT table is shared across threads.
    pub shared_trace_ibt_tables: bool,
    /// Basic blocks are eligible as indirect-branch targets.
    pub bb_ibl_targets: bool,
    /// Coarse-grain units are enabled.
    pub coarse_units: bool,
    /// Basic-block IBL dispatch is inlined at emit sites.
    pub inline_bb_ibl: bool,
    /// Trace IBL dispatch is inlined at emit sites.
    pub inline_trace_ibl: bool,

    /// Percentage of capacity at which grooming is triggered, in place of
    /// resize, once a table has hit `max_bits`.
    pub groom_factor_percent: u8,
    /// Percentage of capacity at which `add` triggers a resize.
    pub load_factor_percent: u8,

    pub initial_bits_bb: u8,
    pub initial_bits_trace: u8,
    pub initial_bits_ibt: u8,
    pub max_bits_bb: u8,
    pub max_bits_trace: u8,
    pub max_bits_ibt: u8,

    /// Percentage of invalid (tombstone) entries in a lockless table that
    /// triggers a same-capacity rehash to reclaim probe-chain length.
    /// spec.md §9's first open question leaves it ambiguous whether the
    /// production default is this threshold or [`Config::rehash_unlinked_always`];
    /// both are kept configurable rather than choosing one (DESIGN.md).
    pub rehash_unlinked_threshold_percent: u8,
    /// Always rehash on every `remove` into a lockless table, regardless
    /// of the invalid-entry percentage. See
    /// [`Config::rehash_unlinked_threshold_percent`].
    pub rehash_unlinked_always: bool,

    /// Thread-local storage, rather than a shared pointer, holds each
    /// thread's view of the current IBT table.
    pub ibl_table_in_tls: bool,
    /// Threads blocked in a syscall at flush time are synched
    /// opportunistically rather than waited for.
    pub syscalls_synch_flush: bool,
    /// Shared tables participate in the lazy, refcounted deletion protocol
    /// rather than deleting fragments synchronously under the flush lock.
    pub shared_deletion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_bbs: true,
            shared_traces: true,
            shared_bb_ibt_tables: true,
            shared_trace_ibt_tables: true,
            bb_ibl_targets: true,
            coarse_units: false,
            inline_bb_ibl: true,
            inline_trace_ibl: true,
            groom_factor_percent: 90,
            load_factor_percent: 75,
            initial_bits_bb: 8,
            initial_bits_trace: 6,
            initial_bits_ibt: 8,
            max_bits_bb: 24,
            max_bits_trace: 24,
            max_bits_ibt: 24,
            rehash_unlinked_threshold_percent: 20,
            rehash_unlinked_always: false,
            ibl_table_in_tls: true,
            syscalls_synch_flush: true,
            shared_deletion: true,
        }
    }
}

/// Returns the minimum `bits` such that a table with `2^bits + 1` slots
/// can hold `entries` real entries without exceeding `load_factor_percent`
/// capacity, mirroring `original_source/core/hashtable.h`'s
/// `hashtable_bits_given_entries`.
pub fn hashtable_bits_given_entries(entries: usize, load_factor_percent: u8) -> u8 {
    let mut bits: u8 = 4;
    loop {
        let capacity = 1usize << bits;
        let threshold = capacity * load_factor_percent as usize / 100;
        if entries <= threshold || bits >= 31 {
            return bits;
        }
        bits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_given_entries_monotonic() {
        let b0 = hashtable_bits_given_entries(10, 75);
        let b1 = hashtable_bits_given_entries(10_000, 75);
        assert!(b1 > b0);
    }

    #[test]
    fn bits_given_entries_respects_load_factor() {
        let bits = hashtable_bits_given_entries(100, 50);
        let capacity = 1usize << bits;
        assert!(100 <= capacity * 50 / 100);
    }
}

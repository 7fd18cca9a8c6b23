// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Loom model-check of the IBT slot publish protocol (spec.md §5 "Add-entry:
//! payload written first, then a store barrier, then the tag"), run under
//! `RUSTFLAGS="--cfg loom" cargo test --release -p fragcache`, mirroring the
//! loom harness shape used by `libs/mpsc-queue`.
//!
//! [`IbtSlot`](super::IbtSlot) itself is built on plain `std::sync::atomic`
//! rather than a loom/std cfg-swap, since only this one publish/observe
//! sequence — not the whole table's probe-chain traversal — needs exhaustive
//! interleaving coverage; this re-expresses just that sequence with loom's
//! instrumented atomics so the model checker can explore every
//! interleaving, rather than threading loom's types through the production
//! table.

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;
use std::sync::Arc;

const EMPTY: usize = 0;

struct Slot {
    tag: AtomicUsize,
    pc: AtomicUsize,
}

/// A writer publishing `(tag, pc)` and a reader observing it must never
/// observe a tag match with a stale/garbage `pc` (spec.md §8 invariant 4).
#[test]
fn add_publishes_pc_before_tag() {
    loom::model(|| {
        let slot = Arc::new(Slot {
            tag: AtomicUsize::new(EMPTY),
            pc: AtomicUsize::new(0),
        });

        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                slot.pc.store(0xABCD, Ordering::Release);
                slot.tag.store(1, Ordering::Release);
            })
        };

        let tag = slot.tag.load(Ordering::Acquire);
        if tag == 1 {
            assert_eq!(slot.pc.load(Ordering::Acquire), 0xABCD);
        }

        writer.join().unwrap();
    });
}

// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Coarse-unit freezing (spec.md §4.5 "Freezing").

use super::CoarseUnit;
use crate::tag::{CachePc, Tag};

/// One pending-freeze work item, spec.md §4.5: "enqueues a
/// `PendingFreeze{tag, cur_pc, is_stub, link_site, elidable}` record on a
/// stack."
#[derive(Debug, Clone)]
pub struct PendingFreeze {
    pub tag: Tag,
    pub cur_pc: CachePc,
    pub is_stub: bool,
    pub link_site: Option<CachePc>,
    /// A newly emitted body immediately preceded by an unconditional
    /// branch from the previously copied fragment can skip emitting that
    /// branch, since the tail is already the fall-through target.
    pub elidable: bool,
}

/// spec.md §4.5 "Freezing": walks `source`'s main table, copies each live
/// entry's body or entrance stub into `dest` via `copy_body`/`copy_stub`,
/// patching the incoming link site and eliding a redundant unconditional
/// branch where the previous copy's tail already falls through to it.
///
/// `copy_body`/`copy_stub` are collaborator closures standing in for the
/// code-cache allocator (`fcache`, spec.md §1 "out of scope"): they
/// receive the source pc and return the destination pc the bytes were
/// copied to. `direct_cti_target` is a third collaborator standing in for
/// the emitted instruction stream itself: for a non-stub body it reports
/// the tag a trailing unconditional direct branch targets, if the body
/// ends in one at all (`original_source/core/fragment.h`'s
/// `FRAG_HAS_DIRECT_CTI`). Only the caller, which has the real bytes, can
/// answer that; this function only ever compares the answer against the
/// next entry it copies.
pub fn freeze(
    source: &CoarseUnit,
    dest: &CoarseUnit,
    mut copy_body: impl FnMut(Tag, CachePc) -> CachePc,
    mut copy_stub: impl FnMut(Tag, CachePc) -> CachePc,
    mut patch_link_site: impl FnMut(CachePc, CachePc),
    mut direct_cti_target: impl FnMut(Tag, CachePc) -> Option<Tag>,
) -> Vec<PendingFreeze> {
    let mut stack: Vec<PendingFreeze> = source
        .main
        .read()
        .iter()
        .map(|(tag, pc)| PendingFreeze {
            tag: *tag,
            cur_pc: *pc,
            is_stub: false,
            link_site: None,
            elidable: false,
        })
        .collect();

    let mut processed = Vec::with_capacity(stack.len());
    let mut previous_tail_target: Option<Tag> = None;

    while let Some(mut item) = stack.pop() {
        let elidable = previous_tail_target == Some(item.tag);
        item.elidable = elidable;

        let dest_pc = if item.is_stub {
            copy_stub(item.tag, item.cur_pc)
        } else {
            copy_body(item.tag, item.cur_pc)
        };

        if let Some(site) = item.link_site {
            patch_link_site(site, dest_pc);
        }

        let _ = dest.add(item.tag, dest_pc);
        previous_tail_target = if item.is_stub {
            None
        } else {
            direct_cti_target(item.tag, item.cur_pc)
        };
        processed.push(item);
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarse::CoarseUnit;
    use std::collections::HashMap;

    /// `B` falls straight through into `C` (a trailing unconditional branch
    /// from `B` targets `C`'s tag), so the pop order `C, B, A` must mark
    /// `B`'s copy of `C` as elidable while `A` and the first entry popped
    /// are not.
    #[test]
    fn trailing_branch_to_next_copy_is_elided() {
        let source = CoarseUnit::new(4, 75);
        let tag_a = Tag::new(0x10);
        let tag_b = Tag::new(0x20);
        let tag_c = Tag::new(0x30);
        source.add(tag_a, 0x1000).unwrap();
        source.add(tag_b, 0x2000).unwrap();
        source.add(tag_c, 0x3000).unwrap();

        let branch_targets: HashMap<CachePc, Tag> = [(0x2000, tag_c)].into_iter().collect();
        let dest = CoarseUnit::new(4, 75);
        let mut next_dest_pc = 0usize;

        let processed = freeze(
            &source,
            &dest,
            |_, _| {
                let pc = next_dest_pc;
                next_dest_pc += 0x10;
                pc
            },
            |_, _| unreachable!("no stubs in this fixture"),
            |_, _| {},
            |_, cur_pc| branch_targets.get(&cur_pc).copied(),
        );

        let elided: Vec<Tag> = processed.iter().filter(|p| p.elidable).map(|p| p.tag).collect();
        assert_eq!(elided, vec![tag_c]);
    }
}

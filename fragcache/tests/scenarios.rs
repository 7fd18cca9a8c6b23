// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end exercises of spec.md §8's scenarios, driven through the
//! public [`fragcache::api`] surface against a trivial in-memory fake of
//! the collaborator traits (spec.md §6) rather than a real code-cache
//! allocator.

use fragcache::api;
use fragcache::collab::{FCache, Link, LinkStubs, Monitor, VmArea};
use fragcache::config::Config;
use fragcache::context::Context;
use fragcache::fragment::{DeleteActions, Fragment, FragmentFlags};
use fragcache::tag::Tag;
use fragcache::thread_state::ThreadState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out monotonically increasing cache addresses; never reclaims, so
/// there is no risk of two live fragments colliding in address space.
struct FakeFCache {
    next_pc: AtomicUsize,
}

impl FakeFCache {
    fn new() -> Self {
        Self {
            next_pc: AtomicUsize::new(0x10_0000),
        }
    }
}

impl FCache for FakeFCache {
    fn add_fragment(&self, fragment: &mut Fragment) {
        let pc = self.next_pc.fetch_add(fragment.size as usize + 16, Ordering::Relaxed);
        *fragment.start_pc.lock() = Some(pc);
    }

    fn remove_fragment(&self, _fragment: &Fragment) {}

    fn pclookup(&self, _pc: usize) -> Option<Arc<Fragment>> {
        None
    }
}

struct NoopLink;
impl Link for NoopLink {
    fn unlink_outgoing(&self, _fragment: &Fragment) {}
    fn unlink_incoming(&self, _fragment: &Fragment) {}
    fn link_outgoing(&self, _fragment: &Fragment) {}
    fn target_delete_pc(&self) -> usize {
        0xDEAD_0000
    }
}

struct NoopLinkStubs;
impl LinkStubs for NoopLinkStubs {
    fn init(&self, _exits: &mut [fragcache::fragment::Exit], _n_direct: usize, _n_indirect: usize, _fragment: &Fragment) {}
    fn free(&self, _fragment: &Fragment) {}
}

struct AllowAllVmArea;
impl VmArea for AllowAllVmArea {
    fn area_remove_fragment(&self, _fragment: &Fragment) {}
    fn check_overlap(&self, _base: usize, _size: usize) -> bool {
        true
    }
    fn unlink_fragments(&self, _base: usize, _size: usize) -> Vec<Arc<Fragment>> {
        Vec::new()
    }
}

struct NoopMonitor;
impl Monitor for NoopMonitor {
    fn remove_fragment(&self, _fragment: &Fragment) {}
    fn delete_would_abort_trace(&self, _fragment: &Fragment) -> bool {
        false
    }
}

fn make_fragment(tag: Tag, size: u32) -> Fragment {
    Fragment::new(tag, size, 1, 1, FragmentFlags::IS_BB)
}

/// Scenario 1: basic add/lookup/delete through the public API against a
/// shared fragment table.
#[test]
fn basic_add_lookup_delete() {
    let ctx = Context::new(Config::default());
    let thread = ThreadState::new(1, &ctx);
    let fcache = FakeFCache::new();
    let table = ctx.shared().bb.as_ref().expect("shared bb table enabled by default");

    let fragment = api::add(table, &fcache, make_fragment(Tag::new(0x4000), 64)).unwrap();
    assert_eq!(table.lookup(Tag::new(0x4000)).map(|f| f.tag), Some(fragment.tag));

    let link = NoopLink;
    let vmarea = AllowAllVmArea;
    let link_stubs = NoopLinkStubs;
    api::delete(
        &ctx,
        &thread,
        false,
        table,
        &fragment,
        DeleteActions::UNLINK | DeleteActions::REMOVE_HASHTABLE,
        &link,
        &vmarea,
        &fcache,
        &link_stubs,
    );
    assert!(table.lookup(Tag::new(0x4000)).is_none());
}

/// Scenario 2: an IBT entry added on one thread is immediately
/// lockless-readable on another, and removal (nullification) is likewise
/// visible without either side taking a lock.
#[test]
fn ibt_lockless_add_and_remove_are_cross_thread_visible() {
    let ctx = Arc::new(Context::new(Config::default()));
    let thread = ThreadState::new(1, &ctx);
    api::add_ibl_target(&ctx, &thread, false, Tag::new(0x20), 0xBEEF);

    let reader_ctx = Arc::clone(&ctx);
    let reader = std::thread::spawn(move || {
        let shared = reader_ctx.shared().bb_ibt.as_ref().unwrap();
        shared.load().table.lookup(Tag::new(0x20))
    });
    assert_eq!(reader.join().unwrap(), Some(0xBEEF));

    api::remove_ibl_target(&ctx, &thread, false, Tag::new(0x20), 0xDEAD);
    let shared = ctx.shared().bb_ibt.as_ref().unwrap();
    // spec.md §4.3: removal writes the invalid-tag marker, so the tag no
    // longer resolves at all (as opposed to `nullify_for_retirement`,
    // which preserves the tag so a stale reader still gets routed
    // somewhere safe during a resize).
    assert_eq!(shared.load().table.lookup(Tag::new(0x20)), None);
}

/// Scenario 3: a probe chain that wraps the ring during `range_remove`
/// loses no entry (the backward-shift regression the unit test in
/// `hashtable::tests` also covers, re-run here at the fragment-table
/// level).
#[test]
fn probe_chain_wrap_on_fragment_flush() {
    let config = Config {
        initial_bits_bb: 3,
        ..Config::default()
    };
    let ctx = Context::new(config);
    let fcache = FakeFCache::new();
    let table = ctx.shared().bb.as_ref().unwrap();

    // `FragmentTable` always uses `mask_offset = 0`, so three tags
    // congruent mod 8 collide on the same probe start near the end of an
    // 8-slot table, forcing backward-shift deletion to wrap during the
    // flush's `range_remove` (spec.md §8 scenario 3).
    let tags = [Tag::new(0x06), Tag::new(0x0E), Tag::new(0x16)];
    for &tag in &tags {
        api::add(table, &fcache, make_fragment(tag, 16)).unwrap();
    }
    assert_eq!(table.entries(), 3);

    let link = NoopLink;
    let vmarea = AllowAllVmArea;
    let monitor = NoopMonitor;
    assert!(api::flush_and_remove_region(&ctx, 0, usize::MAX, &vmarea, &link, &monitor));

    for &tag in &tags {
        assert!(table.lookup(tag).is_none());
    }
}

/// Scenario 4: a flush with one registered thread drains that thread's
/// pending-deletion queue once its flushtime barrier catches up.
#[test]
fn flush_with_one_thread_drains_pending_deletion() {
    let ctx = Context::new(Config::default());
    let fcache = FakeFCache::new();
    let thread = ThreadState::new(1, &ctx);
    ctx.register_thread(Arc::clone(&thread));

    let table = ctx.shared().bb.as_ref().unwrap();
    api::add(table, &fcache, make_fragment(Tag::new(0x9000), 32)).unwrap();
    assert!(table.lookup(Tag::new(0x9000)).is_some());

    let link = NoopLink;
    let vmarea = AllowAllVmArea;
    let monitor = NoopMonitor;
    assert!(api::flush_and_remove_region(&ctx, 0x9000, 32, &vmarea, &link, &monitor));
    assert!(table.lookup(Tag::new(0x9000)).is_none());

    // The thread observes the barrier on its next cache exit and drains
    // its pending-deletion queue.
    api::enter_couldbelinking(&ctx, &thread);
    assert_eq!(thread.pending_deletion.len(), 0);

    ctx.unregister_thread(thread.id());
}

/// Scenario 5: the coarse-unit recent-pc cache is cleared (not evicted
/// LRU-style) once it exceeds its fixed threshold.
#[test]
fn coarse_pclookup_cache_clears_at_threshold() {
    use fragcache::coarse::{CoarseUnit, RECENT_PC_CACHE_LIMIT};

    let unit = CoarseUnit::new(16, 75);
    for i in 0..(RECENT_PC_CACHE_LIMIT + 1) {
        let tag = Tag::new(0x1_0000 + i);
        unit.add(tag, i).unwrap();
    }

    for i in 0..(RECENT_PC_CACHE_LIMIT + 1) {
        let resolved = api::coarse_pclookup(&unit, i);
        assert_eq!(resolved, Some((Tag::new(0x1_0000 + i), i)));
    }
}

/// Scenario 6: a future fragment's incoming-edge list and promotable flags
/// transfer to the real fragment once it is built.
#[test]
fn future_fragment_promotion_transfers_incoming_edges() {
    let ctx = Context::new(Config::default());
    let fcache = FakeFCache::new();
    let thread = ThreadState::new(1, &ctx);

    let target_tag = Tag::new(0x5000);
    thread.private_future.add_future(target_tag).unwrap();
    thread.private_future.add_incoming(target_tag, Tag::new(0x4000), 0);
    assert!(api::lookup_future(&thread, target_tag));

    let mut fragment = make_fragment(target_tag, 48);
    *fragment.flags.lock() |= FragmentFlags::IS_TRACE_HEAD;
    let built = api::add(ctx.shared().bb.as_ref().unwrap(), &fcache, fragment).unwrap();

    assert!(thread.private_future.promote(target_tag, &built));
    assert!(!api::lookup_future(&thread, target_tag));
    assert_eq!(built.incoming.lock().as_slice(), &[(Tag::new(0x4000), 0)]);
    assert!(built.flags().contains(FragmentFlags::IS_TRACE_HEAD));
}

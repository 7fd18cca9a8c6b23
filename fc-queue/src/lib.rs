// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An intrusive, mutex-guarded singly-linked FIFO.
//!
//! spec.md describes two structures with exactly this shape:
//!
//! - the dead-IBT-table retirement queue (§3, §4.3): `{ storage_base,
//!   capacity, flags, ref_count, next }` records enqueued by a resize and
//!   freed once every thread has observed the newer table and dropped the
//!   old one's ref-count to zero;
//! - the shared pending-deletion list (§4.7): fragments unlinked by stage 2
//!   of the flush coordinator, stamped with a flushtime, and swept by every
//!   thread's cache-exit barrier once the global flushtime has advanced
//!   past their stamp.
//!
//! Both are walked far more often by a full scan-and-filter (`retain_mut`)
//! than by straight FIFO order, so unlike `mpsc-queue` (a
//! genuinely lock-free Vyukov queue built for high-throughput single-
//! producer-biased workloads), this queue is a plain intrusive list behind
//! an [`fc_sync::Mutex`]. Neither of spec.md's two uses is on a hot path —
//! they run once per flush and once per cache-exit respectively — so the
//! simpler, easier-to-get-right structure is the right trade.

use fc_sync::Mutex;
use fc_sync::loom::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

/// Trait implemented by types that can be linked into a [`Queue`].
///
/// # Safety
///
/// Implementors must ensure that `links` returns a pointer to a [`Links<Self>`]
/// embedded in the same allocation as `ptr`, and that a value is not moved or
/// deallocated while it is linked into a queue.
pub unsafe trait Linked {
    /// The owning handle for a node (e.g. `Box<Self>`).
    type Handle;

    /// Converts an owned handle into a raw pointer, releasing ownership.
    fn into_ptr(handle: Self::Handle) -> NonNull<Self>;

    /// Converts a raw pointer back into an owned handle.
    ///
    /// # Safety
    ///
    /// `ptr` must have been produced by [`Linked::into_ptr`] and must not
    /// still be linked into any queue.
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Returns a pointer to this node's intrusive link field.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live, properly initialized `Self`.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Self>>
    where
        Self: Sized;
}

/// Intrusive link field embedded in every node of a [`Queue`].
pub struct Links<T> {
    next: UnsafeCell<Option<NonNull<T>>>,
    _pin: PhantomPinned,
}

impl<T> Links<T> {
    pub const fn new() -> Self {
        Self {
            next: UnsafeCell::new(None),
            _pin: PhantomPinned,
        }
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links").finish_non_exhaustive()
    }
}

// Safety: `next` only stores a pointer that is exclusively owned by the
// enclosing `Queue`, access to which is always serialized by
// `fc_sync::Mutex`. See `Linked` implementors' safety comments: only the
// queue that a value is linked into ever touches its `links` field.
unsafe impl<T: Send> Send for Links<T> {}
unsafe impl<T: Send> Sync for Links<T> {}

struct Inner<T: ?Sized> {
    head: Option<NonNull<T>>,
    tail: Option<NonNull<T>>,
    len: usize,
}

// Safety: `Inner` only stores pointers that are exclusively owned by the
// enclosing `Queue`, access to which is always serialized by `fc_sync::Mutex`.
unsafe impl<T: Send> Send for Inner<T> {}

/// An intrusive FIFO queue of `T`, guarded by a spinning mutex.
pub struct Queue<T: Linked + ?Sized> {
    inner: Mutex<Inner<T>>,
}

impl<T: Linked> Queue<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                head: None,
                tail: None,
                len: 0,
            }),
        }
    }

    /// Appends `handle` to the tail of the queue.
    pub fn push_back(&self, handle: T::Handle) {
        let ptr = T::into_ptr(handle);
        // Safety: `ptr` was just produced by `into_ptr` and is not yet
        // linked into any queue, so we may freely write its `next` field.
        unsafe {
            T::links(ptr).as_ref().next.with_mut(|next| *next = None);
        }

        let mut inner = self.inner.lock();
        match inner.tail {
            Some(tail) => {
                // Safety: `tail` is a live node owned by this queue.
                unsafe {
                    T::links(tail)
                        .as_ref()
                        .next
                        .with_mut(|next| *next = Some(ptr));
                }
            }
            None => inner.head = Some(ptr),
        }
        inner.tail = Some(ptr);
        inner.len += 1;
    }

    /// Removes and returns the node at the head of the queue, if any.
    pub fn pop_front(&self) -> Option<T::Handle> {
        let mut inner = self.inner.lock();
        let head = inner.head?;
        // Safety: `head` is a live node owned by this queue.
        let next = unsafe { T::links(head).as_ref().next.with(|next| *next) };
        inner.head = next;
        if next.is_none() {
            inner.tail = None;
        }
        inner.len -= 1;
        drop(inner);
        // Safety: `head` was linked by `push_back` and is being removed
        // from the queue now, so it is safe to reconstitute its handle.
        Some(unsafe { T::from_ptr(head) })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every node in FIFO order, keeping it in the queue if `f`
    /// returns `true` and dropping it (via [`Linked::from_ptr`]) otherwise.
    ///
    /// This is how both spec.md uses of this structure are actually driven:
    /// the dead-table queue and the pending-deletion list are swept by
    /// predicate, not popped one at a time.
    pub fn retain_mut(&self, mut f: impl FnMut(&mut T) -> bool) {
        let mut inner = self.inner.lock();
        let mut prev: Option<NonNull<T>> = None;
        let mut cur = inner.head;

        while let Some(ptr) = cur {
            // Safety: `ptr` is a live node owned by this queue; we hold the
            // lock, so no other thread can mutate or free it concurrently.
            let (next, keep) = unsafe {
                let mut node = ptr;
                let keep = f(node.as_mut());
                let next = T::links(ptr).as_ref().next.with(|n| *n);
                (next, keep)
            };

            if keep {
                prev = Some(ptr);
            } else {
                match prev {
                    // Safety: `prev` is a live node owned by this queue.
                    Some(prev_ptr) => unsafe {
                        T::links(prev_ptr)
                            .as_ref()
                            .next
                            .with_mut(|n| *n = next);
                    },
                    None => inner.head = next,
                }
                if inner.tail == Some(ptr) {
                    inner.tail = prev;
                }
                inner.len -= 1;
                // Safety: `ptr` has just been unlinked from the queue above.
                drop(unsafe { T::from_ptr(ptr) });
            }

            cur = next;
        }
    }
}

impl<T: Linked> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Entry {
        links: Links<Entry>,
        val: i32,
    }

    // Safety: `links` returns a pointer to the `links` field embedded in the
    // same `Box` allocation as `ptr`, and test entries are never moved while
    // linked into a queue.
    unsafe impl Linked for Entry {
        type Handle = Box<Entry>;

        fn into_ptr(handle: Box<Entry>) -> NonNull<Entry> {
            NonNull::from(Box::leak(handle))
        }

        unsafe fn from_ptr(ptr: NonNull<Entry>) -> Box<Entry> {
            // Safety: forwarded from caller.
            unsafe { Box::from_raw(ptr.as_ptr()) }
        }

        unsafe fn links(ptr: NonNull<Entry>) -> NonNull<Links<Entry>> {
            // Safety: forwarded from caller.
            unsafe { NonNull::new_unchecked(&raw mut (*ptr.as_ptr()).links) }
        }
    }

    fn entry(val: i32) -> Box<Entry> {
        Box::new(Entry {
            links: Links::new(),
            val,
        })
    }

    #[test]
    fn fifo_order() {
        let q: Queue<Entry> = Queue::new();
        q.push_back(entry(1));
        q.push_back(entry(2));
        q.push_back(entry(3));

        assert_eq!(q.pop_front().unwrap().val, 1);
        assert_eq!(q.pop_front().unwrap().val, 2);
        assert_eq!(q.pop_front().unwrap().val, 3);
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn retain_drops_filtered_entries() {
        let q: Queue<Entry> = Queue::new();
        for v in 0..5 {
            q.push_back(entry(v));
        }

        q.retain_mut(|e| e.val % 2 == 0);

        let mut remaining = Vec::new();
        while let Some(e) = q.pop_front() {
            remaining.push(e.val);
        }
        assert_eq!(remaining, vec![0, 2, 4]);
    }

    #[test]
    fn retain_can_empty_the_queue() {
        let q: Queue<Entry> = Queue::new();
        q.push_back(entry(1));
        q.push_back(entry(2));

        q.retain_mut(|_| false);

        assert!(q.is_empty());
        assert!(q.pop_front().is_none());
        // pushing after fully draining must still work (tail reset correctly)
        q.push_back(entry(3));
        assert_eq!(q.pop_front().unwrap().val, 3);
    }

    #[test]
    fn concurrent_push_pop() {
        use std::sync::Arc;

        let q: Arc<Queue<Entry>> = Arc::new(Queue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push_back(entry(p * 100 + i));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(q.len(), 400);

        let mut seen = 0;
        while q.pop_front().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 400);
    }
}

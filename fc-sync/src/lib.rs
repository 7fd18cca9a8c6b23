// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives for the fragment cache directory.
//!
//! This mirrors the role `spin`/`sync` play for the
//! k23 kernel, but targets `std` rather than bare metal: the directory runs
//! under preemptive OS threads, so its events block via a condvar rather
//! than spinning forever, while its short critical sections (a few field
//! writes under `linking_lock` or `shared_cache_flush_lock`) still spin,
//! since parking for those would cost more than it saves.

mod backoff;
mod event;
mod mutex;
pub mod loom;
mod rwlock;

pub use event::Event;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

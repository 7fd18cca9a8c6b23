// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error kinds surfaced across the `fragcache` boundary (spec.md §7).
//!
//! Most error conditions spec.md describes are *not* represented here:
//! "not-found" is an `Option`/`bool`, "stale fragment" and "thread-synch
//! failure" are logged and recovered locally, and table-consistency
//! violations are `debug_assert!`s. This enum only carries the two kinds
//! spec.md says actually surface to callers (capacity, persistence version)
//! plus the one the caller is expected to have already ruled out via
//! `lookup` but that we still defend against defensively (duplicate tag).

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// fragment of {size} bytes would exceed the code cache's capacity limit
    CapacityExceeded { size: usize },
    /// tag {tag:#x} is already present in the target table
    DuplicateTag { tag: usize },
    /// persisted coarse unit has layout version {found}, expected {expected}
    PersistenceVersionMismatch { found: u32, expected: u32 },
}

pub type Result<T> = core::result::Result<T, Error>;

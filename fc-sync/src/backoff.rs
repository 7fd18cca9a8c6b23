// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::hint;

/// Exponential spin backoff for [`Mutex::lock`](crate::Mutex::lock) and
/// [`RwLock::read`]/[`write`](crate::RwLock::write) contention.
///
/// Every lock this crate guards is held only across a few field writes,
/// never across a blocking wait, so a thread that loses the race is
/// expected back almost immediately; the exponent is capped low enough
/// that a slow holder still gets revisited often rather than the spinner
/// backing off for a long stretch. Not exposed outside this crate —
/// callers needing a different shape (e.g. a CAS retry loop with its own
/// notion of "stuck") should write their own rather than stretch this one.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Backoff {
    exp: u8,
}

const MAX_EXPONENT: u8 = 6;

impl Backoff {
    pub(crate) const fn new() -> Self {
        Self { exp: 0 }
    }

    /// Issues `2^exp` spin-loop hints, then grows `exp` by one up to
    /// `MAX_EXPONENT`.
    #[inline(always)]
    pub(crate) fn spin(&mut self) {
        for _ in 0..(1_u32 << self.exp) {
            #[cfg(any(test, loom))]
            crate::loom::thread::yield_now();

            hint::spin_loop();
        }

        self.exp = (self.exp + 1).min(MAX_EXPONENT);
    }
}

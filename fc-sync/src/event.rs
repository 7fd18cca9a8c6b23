// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A resettable, blocking event flag.
//!
//! This backs the three per-thread flush-wait events of spec.md §3/§4.7
//! (`waiting_for_unlink`, `finished_with_unlink`, `finished_all_unlink`):
//! one thread blocks in [`Event::wait`] at a cache-exit checkpoint, another
//! (the flusher) calls [`Event::signal`] once it has finished the stage of
//! the protocol the waiter cares about. Unlike a one-shot `Notify`, the
//! event is explicitly reset between flushes so the same `ThreadState` can
//! be waited on again by the next `flush_region_start`.
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread until [`Event::signal`] is called.
    ///
    /// If the event is already signalled, returns immediately.
    pub fn wait(&self) {
        let mut guard = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        while !*guard {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wakes every thread currently blocked in [`Event::wait`] and latches
    /// the event so that future waiters return immediately until [`Event::reset`].
    pub fn signal(&self) {
        let mut guard = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        *guard = true;
        self.condvar.notify_all();
    }

    /// Clears the latch so the event can be waited on again.
    pub fn reset(&self) {
        let mut guard = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        *guard = false;
    }

    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn signal_wakes_waiter() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = Arc::clone(&event);
            std::thread::spawn(move || event.wait())
        };
        std::thread::sleep(Duration::from_millis(10));
        event.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn already_signalled_does_not_block() {
        let event = Event::new();
        event.signal();
        event.wait();
    }

    #[test]
    fn reset_requires_new_signal() {
        let event = Event::new();
        event.signal();
        event.reset();
        assert!(!event.is_signalled());
    }
}

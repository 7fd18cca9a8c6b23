// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Swaps the primitives the rest of this crate is built on for their `loom`
//! equivalents when model-checking under `cfg(loom)`, and for the real
//! `std`/`core` ones otherwise.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
        pub(crate) use loom::thread;

        pub mod cell {
            #[derive(Debug)]
            pub struct UnsafeCell<T: ?Sized>(loom::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub fn new(data: T) -> UnsafeCell<T> {
                    UnsafeCell(loom::cell::UnsafeCell::new(data))
                }

                pub fn into_inner(self) -> T {
                    self.0.into_inner()
                }
            }

            impl<T: ?Sized> UnsafeCell<T> {
                #[inline(always)]
                pub fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
                    self.0.with(f)
                }

                #[inline(always)]
                pub fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
                    self.0.with_mut(f)
                }
            }
        }
    } else {
        pub(crate) use core::sync::atomic;
        pub(crate) use std::thread;

        pub mod cell {
            #[derive(Debug)]
            pub struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub const fn new(data: T) -> UnsafeCell<T> {
                    UnsafeCell(core::cell::UnsafeCell::new(data))
                }

                pub fn into_inner(self) -> T {
                    self.0.into_inner()
                }
            }

            impl<T: ?Sized> UnsafeCell<T> {
                #[inline(always)]
                pub fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
                    f(self.0.get())
                }

                #[inline(always)]
                pub fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
                    f(self.0.get())
                }
            }
        }
    }
}

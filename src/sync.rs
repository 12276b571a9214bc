// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rank-checked locking.
//!
//! Locking order: the thread-id map must be taken before the breakpoint table.
//! All other locks are unordered and must never nest. Violations trip the
//! engine's assertion hook on the offending thread.

use std::cell::RefCell;
use std::sync::{Mutex, MutexGuard};

pub const THREAD_ID_MAP_RANK: u32 = 1;
pub const BREAKPOINT_TABLE_RANK: u32 = 2;
pub const MODULE_MAP_RANK: u32 = 3;

thread_local! {
    static HELD_RANKS: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

fn nesting_allowed(held: u32, acquiring: u32) -> bool {
    held == THREAD_ID_MAP_RANK && acquiring == BREAKPOINT_TABLE_RANK
}

fn order_violation(held: u32, acquiring: u32) {
    log::error!(
        "lock order violation: rank {} acquired while holding rank {}",
        acquiring,
        held
    );
    debug_assert!(
        false,
        "lock order violation: rank {} acquired while holding rank {}",
        acquiring, held
    );
}

/// A mutex that knows its place in the engine's documented lock order.
pub struct RankedMutex<T> {
    rank: u32,
    inner: Mutex<T>,
}

impl<T> RankedMutex<T> {
    pub fn new(rank: u32, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> RankedGuard<'_, T> {
        HELD_RANKS.with(|held| {
            for &h in held.borrow().iter() {
                if !nesting_allowed(h, self.rank) {
                    order_violation(h, self.rank);
                }
            }
            held.borrow_mut().push(self.rank);
        });

        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        RankedGuard {
            rank: self.rank,
            guard,
        }
    }
}

pub struct RankedGuard<'a, T> {
    rank: u32,
    guard: MutexGuard<'a, T>,
}

impl<T> Drop for RankedGuard<'_, T> {
    fn drop(&mut self) {
        HELD_RANKS.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&r| r == self.rank) {
                held.remove(pos);
            }
        });
    }
}

impl<T> std::ops::Deref for RankedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for RankedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_map_may_nest_breakpoint_table() {
        let threads = RankedMutex::new(THREAD_ID_MAP_RANK, ());
        let breakpoints = RankedMutex::new(BREAKPOINT_TABLE_RANK, ());

        let outer = threads.lock();
        let inner = breakpoints.lock();
        drop(inner);
        drop(outer);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn breakpoint_table_must_not_nest_thread_map() {
        let threads = RankedMutex::new(THREAD_ID_MAP_RANK, ());
        let breakpoints = RankedMutex::new(BREAKPOINT_TABLE_RANK, ());

        let _outer = breakpoints.lock();
        let _inner = threads.lock();
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn unordered_locks_must_not_nest() {
        let modules = RankedMutex::new(MODULE_MAP_RANK, ());
        let breakpoints = RankedMutex::new(BREAKPOINT_TABLE_RANK, ());

        let _outer = breakpoints.lock();
        let _inner = modules.lock();
    }

    #[test]
    fn sequential_locking_is_unrestricted() {
        let modules = RankedMutex::new(MODULE_MAP_RANK, 1u32);
        let threads = RankedMutex::new(THREAD_ID_MAP_RANK, 2u32);

        {
            let guard = modules.lock();
            assert_eq!(*guard, 1);
        }
        {
            let guard = threads.lock();
            assert_eq!(*guard, 2);
        }
        {
            let guard = modules.lock();
            assert_eq!(*guard, 1);
        }
    }
}

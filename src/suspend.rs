// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reentrant suspend counter and the dispatch gate.
//!
//! While the counter is positive, thread create/exit dispatch parks at the gate
//! so the snapshot taken by the first suspend stays complete. Scripted
//! debuggees keep the counter (it feeds the stopped predicate) but the OS
//! suspension itself is a no-op: the runtime halts itself at every stop.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct SuspendGate {
    count: Mutex<u32>,
    opened: Condvar,
}

impl SuspendGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_guard(&self) -> std::sync::MutexGuard<'_, u32> {
        match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Increment the counter. Returns true when this was the first suspend and
    /// the caller must suspend the OS threads.
    pub fn begin_suspend(&self) -> bool {
        let mut count = self.count_guard();
        *count += 1;
        *count == 1
    }

    /// Undo a failed first suspend so the gate reopens.
    pub fn cancel_suspend(&self) {
        let mut count = self.count_guard();
        debug_assert!(*count > 0, "unbalanced suspend cancel");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.opened.notify_all();
        }
    }

    /// Decrement the counter. Returns true when the count reached zero and the
    /// caller must resume the OS threads.
    pub fn end_suspend(&self) -> bool {
        let mut count = self.count_guard();
        debug_assert!(*count > 0, "unbalanced resume");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.opened.notify_all();
            true
        } else {
            false
        }
    }

    pub fn suspend_count(&self) -> u32 {
        *self.count_guard()
    }

    /// Park until no suspension is in effect. Called by the poll thread before
    /// dispatching thread create/exit events.
    pub fn wait_until_open(&self) {
        let mut count = self.count_guard();
        while *count > 0 {
            count = match self.opened.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Callback surface into the front-end.
//!
//! All callbacks for one debuggee originate from its poll thread and are
//! therefore totally ordered. Implementations borrow the passed objects and
//! must not retain them past the call.

use crate::breakpoint::ClientToken;
use crate::registry::{DebuggedThread, Module};

#[rustfmt::skip]
pub trait EngineCallback: Send + Sync {
    fn on_load_complete(&self, _thread: &DebuggedThread) {}
    fn on_thread_start(&self, _thread: &DebuggedThread) {}
    fn on_thread_exit(&self, _thread: &DebuggedThread, _exit_code: u32) {}
    fn on_module_load(&self, _module: &Module) {}
    fn on_module_unload(&self, _module: &Module) {}
    fn on_symbol_search(&self, _module: &Module, _symbol_path: Option<&str>, _loaded: bool) {}
    fn on_breakpoint(&self, _thread: &DebuggedThread, _clients: &[ClientToken], _address: u64) {}
    fn on_breakpoint_bound(&self, _client: ClientToken, _address: u64) {}
    fn on_async_break_complete(&self, _thread: &DebuggedThread) {}
    fn on_step_complete(&self, _thread: &DebuggedThread) {}
    fn on_output_string(&self, _message: &str) {}
    fn on_error(&self, _error: u32) {}
    fn on_process_exit(&self, _exit_code: u32) {}
    fn on_program_destroy(&self, _exit_code: u32) {}
}

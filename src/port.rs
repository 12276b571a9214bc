// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The OS debug-port seam.
//!
//! Everything the native path asks of the operating system goes through this
//! trait: the event wait/continue pair, debuggee memory, thread control, and
//! x86 contexts. `src/os/windows.rs` implements it over the Win32 debug API;
//! tests drive the engine with a scripted double.

use anyhow::Result;

use crate::event::DebugeeEvent;
use crate::stack::X86ThreadContext;

pub trait DebugPort: Send {
    /// Wait up to `timeout_ms` for the next debug event. `Ok(None)` on timeout.
    fn wait_for_event(&mut self, timeout_ms: u32) -> Result<Option<DebugeeEvent>>;

    /// Continue the last waited event, handled or not.
    fn continue_event(&mut self, process_id: u32, thread_id: u32, handled: bool) -> Result<()>;

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> Result<()>;

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()>;

    fn flush_instruction_cache(&mut self) -> Result<()>;

    fn suspend_thread(&mut self, thread_handle: u64) -> Result<()>;

    fn resume_thread(&mut self, thread_handle: u64) -> Result<()>;

    fn get_thread_context(&mut self, thread_handle: u64) -> Result<X86ThreadContext>;

    fn set_thread_context(&mut self, thread_handle: u64, context: &X86ThreadContext) -> Result<()>;

    /// Inject a break into the running debuggee.
    fn debug_break(&mut self) -> Result<()>;

    fn detach(&mut self) -> Result<()>;

    fn terminate(&mut self) -> Result<()>;

    /// Image size of the module loaded at `base_address`, from its PE header.
    fn image_size(&mut self, base_address: u64) -> Result<u64>;
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Portable rendition of the debuggee event stream.
//!
//! Native mode produces these from the Win32 DEBUG_EVENT union; scripted mode
//! forges them from inter-process messages. One sum type feeds one dispatcher.

use std::fmt::{self, Display};

/// Exception code delivered when the debuggee executes an int3.
pub const BREAKPOINT_EXCEPTION_CODE: u32 = 0x8000_0003;

/// Exception code delivered when the processor completes a trap-flag single step.
pub const SINGLE_STEP_EXCEPTION_CODE: u32 = 0x8000_0004;

/// The x86 breakpoint instruction.
pub const BREAKPOINT_INSTRUCTION: u8 = 0xCC;

/// The x86 trap flag bit in EFLAGS.
pub const TRAP_FLAG: u32 = 0x100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawEventInfo {
    Exception {
        code: u32,
        address: u64,
        first_chance: bool,
    },
    CreateThread {
        handle: u64,
        start_address: u64,
    },
    CreateProcess {
        process_handle: u64,
        thread_handle: u64,
        file_handle: u64,
        base_address: u64,
        start_address: u64,
    },
    ExitThread {
        exit_code: u32,
    },
    ExitProcess {
        exit_code: u32,
    },
    LoadModule {
        file_handle: u64,
        base_address: u64,
    },
    UnloadModule {
        base_address: u64,
    },
    OutputString(String),
    Rip(u32),
}

impl Display for RawEventInfo {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        use RawEventInfo::*;
        match self {
            Exception {
                code,
                address,
                first_chance,
            } => {
                write!(
                    formatter,
                    "event=Exception exception_code=0x{:08x} exception_address=0x{:08x} first_chance={}",
                    code, address, first_chance
                )?;
            }
            CreateThread { start_address, .. } => {
                write!(
                    formatter,
                    "event=CreateThread start=0x{:016x}",
                    start_address
                )?;
            }
            CreateProcess {
                base_address,
                start_address,
                ..
            } => {
                write!(
                    formatter,
                    "event=CreateProcess base=0x{:016x} start=0x{:016x}",
                    base_address, start_address
                )?;
            }
            ExitThread { exit_code } => {
                write!(formatter, "event=ExitThread exit_code={}", exit_code)?;
            }
            ExitProcess { exit_code } => {
                write!(formatter, "event=ExitProcess exit_code={}", exit_code)?;
            }
            LoadModule { base_address, .. } => {
                write!(formatter, "event=LoadModule base=0x{:016x}", base_address)?;
            }
            UnloadModule { base_address } => {
                write!(formatter, "event=UnloadModule base=0x{:016x}", base_address)?;
            }
            OutputString(message) => {
                write!(formatter, "event=OutputString length={}", message.len())?;
            }
            Rip(error) => {
                write!(formatter, "event=Rip error=0x{:x}", error)?;
            }
        }

        Ok(())
    }
}

/// A debuggee event as delivered by the event source, tagged with the thread it
/// arrived on. Scripted events always carry thread id 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugeeEvent {
    process_id: u32,
    thread_id: u32,
    info: RawEventInfo,
}

impl DebugeeEvent {
    pub fn new(process_id: u32, thread_id: u32, info: RawEventInfo) -> Self {
        Self {
            process_id,
            thread_id,
            info,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn info(&self) -> &RawEventInfo {
        &self.info
    }

    pub fn into_info(self) -> RawEventInfo {
        self.info
    }
}

impl Display for DebugeeEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "pid={} tid={} {}",
            self.process_id, self.thread_id, self.info
        )
    }
}

/// The kind of the last stopping event. `None` in the engine's slot means the
/// debuggee is running (or has never stopped).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    StartDebugging,
    LoadComplete,
    Breakpoint,
    Exception,
    StepComplete,
    AsyncBreakComplete,
}

impl StopReason {
    /// True for the reasons that leave the scripted runtime parked in its debug
    /// loop awaiting a continue message.
    pub fn runtime_awaits_continue(self) -> bool {
        matches!(
            self,
            StopReason::Breakpoint | StopReason::StepComplete | StopReason::AsyncBreakComplete
        )
    }
}

pub fn is_breakpoint_exception(code: u32) -> bool {
    code == BREAKPOINT_EXCEPTION_CODE
}

pub fn is_single_step_exception(code: u32) -> bool {
    code == SINGLE_STEP_EXCEPTION_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_exception_events() {
        let event = DebugeeEvent::new(
            7,
            3,
            RawEventInfo::Exception {
                code: BREAKPOINT_EXCEPTION_CODE,
                address: 0x0040_1000,
                first_chance: true,
            },
        );

        let text = format!("{}", event);
        assert!(text.contains("pid=7 tid=3"));
        assert!(text.contains("exception_code=0x80000003"));
        assert!(text.contains("exception_address=0x00401000"));
    }

    #[test]
    fn continue_waiting_reasons() {
        assert!(StopReason::Breakpoint.runtime_awaits_continue());
        assert!(StopReason::StepComplete.runtime_awaits_continue());
        assert!(StopReason::AsyncBreakComplete.runtime_awaits_continue());
        assert!(!StopReason::LoadComplete.runtime_awaits_continue());
        assert!(!StopReason::StartDebugging.runtime_awaits_continue());
    }
}

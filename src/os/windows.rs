// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Win32 implementation of the debug port.

use std::mem::MaybeUninit;

use anyhow::{Context, Result};
use winapi::{
    shared::{
        minwindef::{DWORD, FALSE, LPCVOID, LPVOID, TRUE},
        winerror::ERROR_SEM_TIMEOUT,
    },
    um::{
        debugapi::{
            ContinueDebugEvent, DebugActiveProcessStop, DebugBreakProcess, WaitForDebugEvent,
        },
        errhandlingapi::GetLastError,
        handleapi::DuplicateHandle,
        memoryapi::{ReadProcessMemory, WriteProcessMemory},
        minwinbase::{
            CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT,
            EXCEPTION_DEBUG_EVENT, EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT,
            LOAD_DLL_DEBUG_EVENT, OUTPUT_DEBUG_STRING_EVENT, RIP_EVENT, UNLOAD_DLL_DEBUG_EVENT,
        },
        processthreadsapi::{
            FlushInstructionCache, GetCurrentProcess, GetThreadContext, ResumeThread,
            SetThreadContext, SuspendThread, TerminateProcess,
        },
        winnt::{
            CONTEXT, CONTEXT_CONTROL, CONTEXT_INTEGER, DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED,
            DUPLICATE_SAME_ACCESS, HANDLE,
        },
    },
};

use crate::event::{DebugeeEvent, RawEventInfo};
use crate::port::DebugPort;
use crate::stack::X86ThreadContext;

fn last_os_error() -> anyhow::Error {
    std::io::Error::last_os_error().into()
}

fn check_winapi(f: impl FnOnce() -> i32) -> Result<()> {
    if f() == FALSE {
        Err(last_os_error())
    } else {
        Ok(())
    }
}

pub struct WindowsDebugPort {
    process_id: DWORD,
    process_handle: HANDLE,
}

// Kernel handles are process-wide; the engine serializes access behind a lock.
unsafe impl Send for WindowsDebugPort {}

impl WindowsDebugPort {
    pub fn new(process_id: u32, process_handle: HANDLE) -> Self {
        Self {
            process_id,
            process_handle,
        }
    }

    fn read_debuggee_string(&self, address: LPCVOID, length: usize, unicode: bool) -> Option<String> {
        if length == 0 {
            return None;
        }

        if unicode {
            let mut buffer = vec![0u16; length];
            let mut read = 0;
            let ok = unsafe {
                ReadProcessMemory(
                    self.process_handle,
                    address,
                    buffer.as_mut_ptr() as LPVOID,
                    length * 2,
                    &mut read,
                )
            };
            if ok == FALSE {
                return None;
            }
            Some(String::from_utf16_lossy(&buffer))
        } else {
            let mut buffer = vec![0u8; length];
            let mut read = 0;
            let ok = unsafe {
                ReadProcessMemory(
                    self.process_handle,
                    address,
                    buffer.as_mut_ptr() as LPVOID,
                    length,
                    &mut read,
                )
            };
            if ok == FALSE {
                return None;
            }
            Some(String::from_utf8_lossy(&buffer).into_owned())
        }
    }

    fn translate(&self, de: &DEBUG_EVENT) -> Option<DebugeeEvent> {
        let info = unsafe {
            match de.dwDebugEventCode {
                EXCEPTION_DEBUG_EVENT => {
                    let info = de.u.Exception();
                    RawEventInfo::Exception {
                        code: info.ExceptionRecord.ExceptionCode,
                        address: info.ExceptionRecord.ExceptionAddress as u64,
                        first_chance: info.dwFirstChance != 0,
                    }
                }
                CREATE_THREAD_DEBUG_EVENT => {
                    let info = de.u.CreateThread();
                    RawEventInfo::CreateThread {
                        handle: duplicate_handle(info.hThread).unwrap_or(0),
                        start_address: info.lpStartAddress.map_or(0, |f| f as u64),
                    }
                }
                CREATE_PROCESS_DEBUG_EVENT => {
                    let info = de.u.CreateProcessInfo();
                    RawEventInfo::CreateProcess {
                        process_handle: info.hProcess as u64,
                        thread_handle: duplicate_handle(info.hThread).unwrap_or(0),
                        file_handle: info.hFile as u64,
                        base_address: info.lpBaseOfImage as u64,
                        start_address: info.lpStartAddress.map_or(0, |f| f as u64),
                    }
                }
                EXIT_THREAD_DEBUG_EVENT => RawEventInfo::ExitThread {
                    exit_code: de.u.ExitThread().dwExitCode,
                },
                EXIT_PROCESS_DEBUG_EVENT => RawEventInfo::ExitProcess {
                    exit_code: de.u.ExitProcess().dwExitCode,
                },
                LOAD_DLL_DEBUG_EVENT => {
                    let info = de.u.LoadDll();
                    RawEventInfo::LoadModule {
                        file_handle: info.hFile as u64,
                        base_address: info.lpBaseOfDll as u64,
                    }
                }
                UNLOAD_DLL_DEBUG_EVENT => RawEventInfo::UnloadModule {
                    base_address: de.u.UnloadDll().lpBaseOfDll as u64,
                },
                OUTPUT_DEBUG_STRING_EVENT => {
                    let info = de.u.DebugString();
                    // The terminating NUL is not wanted in a Rust string.
                    let length = info.nDebugStringLength.saturating_sub(1) as usize;
                    let message = self.read_debuggee_string(
                        info.lpDebugStringData as LPCVOID,
                        length,
                        info.fUnicode != 0,
                    )?;
                    RawEventInfo::OutputString(message)
                }
                RIP_EVENT => RawEventInfo::Rip(de.u.RipInfo().dwError),
                _ => return None,
            }
        };

        Some(DebugeeEvent::new(de.dwProcessId, de.dwThreadId, info))
    }
}

fn duplicate_handle(handle: HANDLE) -> Result<u64> {
    let mut duplicated: HANDLE = std::ptr::null_mut();
    check_winapi(|| unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            handle,
            GetCurrentProcess(),
            &mut duplicated,
            0,
            FALSE,
            DUPLICATE_SAME_ACCESS,
        )
    })
    .context("duplicating thread handle")?;
    Ok(duplicated as u64)
}

fn x86_context(handle: HANDLE) -> Result<CONTEXT> {
    let mut context: CONTEXT = unsafe { std::mem::zeroed() };
    context.ContextFlags = CONTEXT_INTEGER | CONTEXT_CONTROL;
    check_winapi(|| unsafe { GetThreadContext(handle, &mut context) })
        .context("GetThreadContext")?;
    Ok(context)
}

impl DebugPort for WindowsDebugPort {
    fn wait_for_event(&mut self, timeout_ms: u32) -> Result<Option<DebugeeEvent>> {
        let mut de = MaybeUninit::uninit();
        if unsafe { WaitForDebugEvent(de.as_mut_ptr(), timeout_ms) } == TRUE {
            let de = unsafe { de.assume_init() };
            Ok(self.translate(&de))
        } else {
            let err = unsafe { GetLastError() };
            if err != ERROR_SEM_TIMEOUT {
                return Err(last_os_error());
            }
            Ok(None)
        }
    }

    fn continue_event(&mut self, process_id: u32, thread_id: u32, handled: bool) -> Result<()> {
        let status = if handled {
            DBG_CONTINUE
        } else {
            DBG_EXCEPTION_NOT_HANDLED
        };
        check_winapi(|| unsafe { ContinueDebugEvent(process_id, thread_id, status) })
            .context("ContinueDebugEvent")
    }

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let mut read = 0;
        check_winapi(|| unsafe {
            ReadProcessMemory(
                self.process_handle,
                address as LPCVOID,
                buffer.as_mut_ptr() as LPVOID,
                buffer.len(),
                &mut read,
            )
        })
        .context("ReadProcessMemory")
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let mut written = 0;
        check_winapi(|| unsafe {
            WriteProcessMemory(
                self.process_handle,
                address as LPVOID,
                data.as_ptr() as LPCVOID,
                data.len(),
                &mut written,
            )
        })
        .context("WriteProcessMemory")
    }

    fn flush_instruction_cache(&mut self) -> Result<()> {
        check_winapi(|| unsafe {
            FlushInstructionCache(self.process_handle, std::ptr::null(), 0)
        })
        .context("FlushInstructionCache")
    }

    fn suspend_thread(&mut self, thread_handle: u64) -> Result<()> {
        let count = unsafe { SuspendThread(thread_handle as HANDLE) };
        if count == DWORD::MAX {
            Err(last_os_error())
        } else {
            Ok(())
        }
    }

    fn resume_thread(&mut self, thread_handle: u64) -> Result<()> {
        let count = unsafe { ResumeThread(thread_handle as HANDLE) };
        if count == DWORD::MAX {
            Err(last_os_error())
        } else {
            Ok(())
        }
    }

    fn get_thread_context(&mut self, thread_handle: u64) -> Result<X86ThreadContext> {
        let context = x86_context(thread_handle as HANDLE)?;
        Ok(X86ThreadContext {
            eax: context.Eax,
            ebx: context.Ebx,
            ecx: context.Ecx,
            edx: context.Edx,
            esi: context.Esi,
            edi: context.Edi,
            esp: context.Esp,
            ebp: context.Ebp,
            eip: context.Eip,
            eflags: context.EFlags,
            seg_cs: context.SegCs,
            seg_ds: context.SegDs,
            seg_es: context.SegEs,
            seg_fs: context.SegFs,
        })
    }

    fn set_thread_context(&mut self, thread_handle: u64, new: &X86ThreadContext) -> Result<()> {
        // Read-modify-write so the fields outside our portable context survive.
        let mut context = x86_context(thread_handle as HANDLE)?;
        context.Eax = new.eax;
        context.Ebx = new.ebx;
        context.Ecx = new.ecx;
        context.Edx = new.edx;
        context.Esi = new.esi;
        context.Edi = new.edi;
        context.Esp = new.esp;
        context.Ebp = new.ebp;
        context.Eip = new.eip;
        context.EFlags = new.eflags;
        check_winapi(|| unsafe { SetThreadContext(thread_handle as HANDLE, &context) })
            .context("SetThreadContext")
    }

    fn debug_break(&mut self) -> Result<()> {
        check_winapi(|| unsafe { DebugBreakProcess(self.process_handle) })
            .context("DebugBreakProcess")
    }

    fn detach(&mut self) -> Result<()> {
        check_winapi(|| unsafe { DebugActiveProcessStop(self.process_id) })
            .context("DebugActiveProcessStop")
    }

    fn terminate(&mut self) -> Result<()> {
        check_winapi(|| unsafe { TerminateProcess(self.process_handle, 0) })
            .context("TerminateProcess")
    }

    fn image_size(&mut self, base_address: u64) -> Result<u64> {
        // Enough of the image for the DOS and NT headers.
        let mut headers = vec![0u8; 0x1000];
        self.read_memory(base_address, &mut headers)
            .context("reading PE headers from debuggee")?;

        let header = goblin::pe::header::Header::parse(&headers)
            .context("parsing PE header of loaded module")?;
        let size = header
            .optional_header
            .map(|h| h.windows_fields.size_of_image)
            .context("missing optional header in PE image")?;

        Ok(u64::from(size))
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The debugged-process aggregate: one poll thread pumping debuggee events,
//! any number of front-end threads issuing commands against it.
//!
//! Two debuggee kinds sit behind the same surface. A native process is driven
//! through the OS debug port; a scripted runtime is driven out-of-band through
//! the message-queue transport, its messages forged into the same event shape
//! before dispatch.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{error, trace};

use crate::breakpoint::{BreakpointTable, ClientToken};
use crate::callback::EngineCallback;
use crate::event::{
    is_breakpoint_exception, is_single_step_exception, DebugeeEvent, RawEventInfo, StopReason,
    BREAKPOINT_INSTRUCTION,
};
use crate::ipc::{self, AttachedBody, BreakpointBody, DebugMessage, Transport};
use crate::port::DebugPort;
use crate::registry::{DebuggedThread, Module, ModuleRegistry, ThreadRegistry};
use crate::source_map::SourceMap;
use crate::stack::FrameInfo;
use crate::suspend::SuspendGate;
use crate::symbols::{
    ModuleResolver, SourceLocation, StackWalker, SymbolEngine, VariableInfo, VariableKind,
};
use crate::sync::{RankedMutex, BREAKPOINT_TABLE_RANK, MODULE_MAP_RANK, THREAD_ID_MAP_RANK};


/// How the debuggee came under our control.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugMethod {
    Launch,
    Attach,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessKind {
    Native,
    Scripted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    Out,
    Backwards,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepUnit {
    Statement,
    Line,
    Instruction,
}

/// Flags the front-end passes when re-entering the pump.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpFlags {
    pub resume_for_step_or_execute: bool,
    pub resume_with_exception_handled: bool,
}

// Wire continue statuses for the scripted runtime.
const DBG_EXCEPTION_HANDLED: u32 = 0x0001_0001;
const DBG_CONTINUE: u32 = 0x0001_0002;

// The poll loop waits this long for one event before returning to the caller.
const EVENT_WAIT_MS: u32 = 50;
const SCRIPTED_POLL_SLICE_MS: u64 = 10;

// Evaluation replies trickle in; poll at this cadence with this budget.
const EVALUATE_TICK: Duration = Duration::from_millis(100);
const EVALUATE_TICKS: u32 = 10;
const EVALUATE_QUIET_TICKS: u32 = 2;

// Characters that force an expression to be executed rather than dumped.
const EXECUTE_EXPRESSION_CHARS: [char; 4] = ['=', ';', '(', ')'];

// The fake entry module must span every address the file/line encoding can
// produce, so fake addresses always resolve into it.
const SCRIPTED_MODULE_SPAN: u64 = 999_900_000;
const SCRIPTED_MODULE_NAME: &str = "script-main-state";
const SCRIPTED_SYMBOL_PATH: &str = "script/*.*";
const SCRIPTED_THREAD_ID: u32 = 0;

enum Backend {
    Native { port: Box<dyn DebugPort> },
    Scripted { transport: Transport },
}

/// State owned by the poll thread. Commands mutate the expectation flags from
/// other threads, so the whole block sits behind one short-lived lock.
#[derive(Default)]
struct PumpState {
    last_event: Option<DebugeeEvent>,
    last_stop: Option<StopReason>,
    pumping: bool,
    seen_entry_breakpoint: bool,
    expecting_async_break: bool,
    expecting_step_breakpoint: bool,
    expecting_recovery_single_step: bool,
    // Address of the breakpoint being stepped over during recovery.
    recovery_address: Option<u64>,
    detach_requested: bool,
    pending_load_complete: bool,
    current_breakpoint_address: u64,
    stack_snapshot: Vec<FrameInfo>,
    // Launch-mode events deferred until resume_from_launch.
    entry_module_base: Option<u64>,
    entry_thread_id: Option<u32>,
}

/// What the dispatcher decided to do with one event.
enum Dispatch {
    /// A stopping event was delivered; the pump halts until a continue.
    Stop,
    /// Non-stopping event; continue the debuggee, handled or not.
    Continue { handled: bool },
    /// The debuggee exited; the event was already continued.
    Exited,
}

pub struct DebuggedProcess {
    id: u32,
    name: String,
    kind: ProcessKind,
    method: DebugMethod,
    start_address: u64,
    process_handle: u64,
    poll_thread: ThreadId,
    callback: Arc<dyn EngineCallback>,
    symbol_engine: Option<Box<dyn SymbolEngine>>,
    resolver: Option<Box<dyn ModuleResolver>>,
    stack_walker: Option<Box<dyn StackWalker>>,

    backend: Mutex<Backend>,
    modules: RankedMutex<ModuleRegistry>,
    threads: RankedMutex<ThreadRegistry>,
    breakpoints: RankedMutex<BreakpointTable>,
    suspend_gate: SuspendGate,
    pump: Mutex<PumpState>,
    source_map: Mutex<SourceMap>,
}

impl DebuggedProcess {
    /// Attach to a running scripted runtime. The queue pair must exist before
    /// the runtime looks for it; the handshake completes when the runtime
    /// answers with `Attached`.
    pub fn attach_scripted(
        callback: Arc<dyn EngineCallback>,
        transport: Transport,
        process_id: u32,
    ) -> Result<Arc<Self>> {
        transport.send_attach().context("sending attach handshake")?;
        Self::new_scripted(callback, transport, process_id, DebugMethod::Attach, None)
    }

    /// Launch-mode scripted construction. The debuggee was spawned by the
    /// prelude; module-load and thread-create events are deferred until
    /// `resume_from_launch`, which also sends the attach handshake.
    pub fn launch_scripted(
        callback: Arc<dyn EngineCallback>,
        transport: Transport,
        process_id: u32,
        working_dir: &str,
    ) -> Result<Arc<Self>> {
        Self::new_scripted(
            callback,
            transport,
            process_id,
            DebugMethod::Launch,
            Some(working_dir),
        )
    }

    fn new_scripted(
        callback: Arc<dyn EngineCallback>,
        transport: Transport,
        process_id: u32,
        method: DebugMethod,
        working_dir: Option<&str>,
    ) -> Result<Arc<Self>> {
        let mut source_map = SourceMap::new();
        if let Some(dir) = working_dir {
            source_map.set_working_dir(dir);
        }

        let mut modules = ModuleRegistry::new();
        let module = modules.register(SCRIPTED_MODULE_NAME.to_string(), 0, SCRIPTED_MODULE_SPAN);
        let module = modules
            .set_symbols(module.base_address(), SCRIPTED_SYMBOL_PATH.to_string())
            .unwrap_or(module);

        let mut threads = ThreadRegistry::new();
        let thread = Arc::new(DebuggedThread::new(SCRIPTED_THREAD_ID, 0, 0));
        threads.insert(Arc::clone(&thread));

        let name = module.name().to_string();
        let process = Arc::new(Self {
            id: process_id,
            name,
            kind: ProcessKind::Scripted,
            method,
            start_address: 0,
            process_handle: 0,
            poll_thread: std::thread::current().id(),
            callback,
            symbol_engine: None,
            resolver: None,
            stack_walker: None,
            backend: Mutex::new(Backend::Scripted { transport }),
            modules: RankedMutex::new(MODULE_MAP_RANK, modules),
            threads: RankedMutex::new(THREAD_ID_MAP_RANK, threads),
            breakpoints: RankedMutex::new(BREAKPOINT_TABLE_RANK, BreakpointTable::new()),
            suspend_gate: SuspendGate::new(),
            pump: Mutex::new(PumpState::default()),
            source_map: Mutex::new(source_map),
        });

        {
            let mut pump = process.pump_state();
            pump.last_stop = Some(StopReason::StartDebugging);
            match method {
                DebugMethod::Attach => {
                    // No entry point to trap when attaching; the runtime's
                    // Attached message will synthesize the load-complete stop.
                    pump.seen_entry_breakpoint = true;
                }
                DebugMethod::Launch => {
                    pump.entry_module_base = Some(module.base_address());
                    pump.entry_thread_id = Some(SCRIPTED_THREAD_ID);
                }
            }
        }

        if method == DebugMethod::Attach {
            process.callback.on_module_load(&module);
            process
                .callback
                .on_symbol_search(&module, module.symbol_path(), module.symbols_loaded());
            process.callback.on_thread_start(&thread);

            let mut pump = process.pump_state();
            pump.last_event = None;
            pump.last_stop = None;
            pump.pumping = true;
        }

        Ok(process)
    }

    /// Native construction. The prelude has already put the debuggee under the
    /// debug port; the first event must be the create-process event, which
    /// yields the entry module and first thread.
    pub fn init_native(
        callback: Arc<dyn EngineCallback>,
        mut port: Box<dyn DebugPort>,
        method: DebugMethod,
        symbol_engine: Box<dyn SymbolEngine>,
        resolver: Box<dyn ModuleResolver>,
        stack_walker: Box<dyn StackWalker>,
    ) -> Result<Arc<Self>> {
        // The kernel blocks the debuggee until this event is continued, so the
        // wait is effectively bounded.
        let event = match port.wait_for_event(u32::MAX) {
            Ok(Some(event)) => event,
            Ok(None) => {
                Self::terminate_and_drain(&mut *port);
                bail!("no create-process event from the debug port");
            }
            Err(e) => {
                Self::terminate_and_drain(&mut *port);
                return Err(e.context("waiting for the create-process event"));
            }
        };

        let info = event.info().clone();
        let (process_handle, thread_handle, file_handle, base_address, start_address) = match info {
            RawEventInfo::CreateProcess {
                process_handle,
                thread_handle,
                file_handle,
                base_address,
                start_address,
            } => (
                process_handle,
                thread_handle,
                file_handle,
                base_address,
                start_address,
            ),
            other => {
                Self::terminate_and_drain(&mut *port);
                bail!("unexpected first debug event: {}", other);
            }
        };

        let prelude = (|| -> Result<(String, u64)> {
            let path = resolver
                .resolve_mapped_file(process_handle, base_address, file_handle)
                .context("resolving entry module path")?;
            let size = port
                .image_size(base_address)
                .context("reading entry image size")?;
            Ok((path, size))
        })();

        let (path, size) = match prelude {
            Ok(parts) => parts,
            Err(e) => {
                Self::terminate_and_drain(&mut *port);
                return Err(e);
            }
        };

        let mut modules = ModuleRegistry::new();
        let mut module = modules.register(path, base_address, size);

        // The entry module is the only one this engine loads symbols for.
        match symbol_engine.load_symbols_for_module(module.name()) {
            Ok(Some(symbol_path)) => {
                if let Some(updated) = modules.set_symbols(base_address, symbol_path) {
                    module = updated;
                }
            }
            Ok(None) => {}
            Err(e) => error!("error loading entry module symbols: {}", e),
        }

        let mut threads = ThreadRegistry::new();
        let thread = Arc::new(DebuggedThread::new(
            event.thread_id(),
            thread_handle,
            start_address,
        ));
        threads.insert(Arc::clone(&thread));

        let process = Arc::new(Self {
            id: event.process_id(),
            name: module.name().to_string(),
            kind: ProcessKind::Native,
            method,
            start_address,
            process_handle,
            poll_thread: std::thread::current().id(),
            callback,
            symbol_engine: Some(symbol_engine),
            resolver: Some(resolver),
            stack_walker: Some(stack_walker),
            backend: Mutex::new(Backend::Native { port }),
            modules: RankedMutex::new(MODULE_MAP_RANK, modules),
            threads: RankedMutex::new(THREAD_ID_MAP_RANK, threads),
            breakpoints: RankedMutex::new(BREAKPOINT_TABLE_RANK, BreakpointTable::new()),
            suspend_gate: SuspendGate::new(),
            pump: Mutex::new(PumpState::default()),
            source_map: Mutex::new(SourceMap::new()),
        });

        {
            let mut pump = process.pump_state();
            pump.last_event = Some(event.clone());
            pump.last_stop = Some(StopReason::StartDebugging);
            match method {
                DebugMethod::Launch => {
                    pump.entry_module_base = Some(base_address);
                    pump.entry_thread_id = Some(event.thread_id());
                }
                DebugMethod::Attach => {}
            }
        }

        if method == DebugMethod::Attach {
            process.callback.on_module_load(&module);
            process
                .callback
                .on_symbol_search(&module, module.symbol_path(), module.symbols_loaded());
            process.callback.on_thread_start(&thread);
            process.continue_last_event(true)?;
        }

        Ok(process)
    }

    // Constructor failure path: kill the debuggee and drain its debug queue so
    // the OS releases it cleanly before the error surfaces.
    fn terminate_and_drain(port: &mut dyn DebugPort) {
        if let Err(e) = port.terminate() {
            error!("error terminating debuggee during failed construction: {}", e);
            return;
        }

        loop {
            match port.wait_for_event(EVENT_WAIT_MS) {
                Ok(Some(event)) => {
                    let exited = matches!(event.info(), RawEventInfo::ExitProcess { .. });
                    if let Err(e) =
                        port.continue_event(event.process_id(), event.thread_id(), false)
                    {
                        error!("error draining debug queue: {}", e);
                        break;
                    }
                    if exited {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn pump_state(&self) -> MutexGuard<'_, PumpState> {
        match self.pump.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn backend_guard(&self) -> MutexGuard<'_, Backend> {
        match self.backend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn source_map_guard(&self) -> MutexGuard<'_, SourceMap> {
        match self.source_map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn method(&self) -> DebugMethod {
        self.method
    }

    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    pub fn poll_thread(&self) -> ThreadId {
        self.poll_thread
    }

    /// Stopped iff an un-continued event occupies the raw slot or a suspension
    /// is in effect.
    pub fn is_stopped(&self) -> bool {
        self.pump_state().last_event.is_some() || self.suspend_gate.suspend_count() > 0
    }

    pub fn is_pumping(&self) -> bool {
        self.pump_state().pumping
    }

    pub fn resume_event_pump(&self) {
        self.pump_state().pumping = true;
    }

    pub fn last_stop(&self) -> Option<StopReason> {
        self.pump_state().last_stop
    }

    pub fn get_threads(&self) -> Vec<Arc<DebuggedThread>> {
        self.threads.lock().threads()
    }

    pub fn get_modules(&self) -> Vec<Module> {
        self.modules.lock().modules()
    }

    /// Find the module whose span contains `address`.
    pub fn resolve_address(&self, address: u64) -> Option<Module> {
        self.modules.lock().resolve(address)
    }

    fn thread_by_id(&self, thread_id: u32) -> Option<Arc<DebuggedThread>> {
        self.threads.lock().get(thread_id)
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut dyn DebugPort) -> Result<R>) -> Result<R> {
        match &mut *self.backend_guard() {
            Backend::Native { port } => f(port.as_mut()),
            Backend::Scripted { .. } => bail!("operation requires a native debuggee"),
        }
    }

    fn with_transport<R>(&self, f: impl FnOnce(&Transport) -> Result<R>) -> Result<R> {
        match &*self.backend_guard() {
            Backend::Scripted { transport } => f(transport),
            Backend::Native { .. } => bail!("operation requires a scripted debuggee"),
        }
    }
}

// Poll loop and dispatcher. Strictly single-threaded on the poll thread.
impl DebuggedProcess {
    /// One tick of the event pump: wait up to 50 ms, classify, dispatch.
    ///
    /// Returns immediately when the debuggee is already at a stop. Stopping
    /// events clear the pump flag and leave the raw event in place for the
    /// front-end's continue; non-stopping events are continued here.
    pub fn wait_and_dispatch(&self, _flags: PumpFlags) -> Result<()> {
        debug_assert_eq!(
            std::thread::current().id(),
            self.poll_thread,
            "wait_and_dispatch must run on the poll thread"
        );

        {
            let pump = self.pump_state();
            if pump.last_stop.is_some() {
                return Ok(());
            }
            debug_assert!(pump.pumping, "pump entered while not pumping");
        }

        if self.take_pending_load_complete() {
            self.emit_load_complete(SCRIPTED_THREAD_ID);
            return Ok(());
        }

        match self.wait_for_debuggee_event(EVENT_WAIT_MS)? {
            Some(event) => {
                trace!("{}", event);
                self.pump_state().last_event = Some(event.clone());

                match self.dispatch_event(&event)? {
                    Dispatch::Stop => {
                        self.pump_state().pumping = false;
                    }
                    Dispatch::Continue { handled } => {
                        self.continue_last_event(handled)?;
                    }
                    Dispatch::Exited => {}
                }
            }
            None => {
                let drain = {
                    let mut pump = self.pump_state();
                    if pump.detach_requested {
                        pump.detach_requested = false;
                        true
                    } else {
                        false
                    }
                };
                if drain {
                    // The runtime is going away; nothing more will arrive.
                    self.continue_last_event(false)?;
                    self.callback.on_process_exit(0);
                }
            }
        }

        Ok(())
    }

    fn wait_for_debuggee_event(&self, timeout_ms: u32) -> Result<Option<DebugeeEvent>> {
        if self.kind == ProcessKind::Native {
            return match &mut *self.backend_guard() {
                Backend::Native { port } => port.wait_for_event(timeout_ms),
                Backend::Scripted { .. } => unreachable!(),
            };
        }

        // The scripted queue has no blocking wait; poll it in slices until the
        // timeout elapses. At most one message is consumed per tick.
        let mut waited: u64 = 0;
        loop {
            let received = match self.with_transport(|t| t.try_receive()) {
                Ok(received) => received,
                Err(e) => {
                    error!("error receiving debug message: {}", e);
                    None
                }
            };

            if let Some(message) = received {
                return Ok(self.translate_scripted_message(&message));
            }

            if waited >= u64::from(timeout_ms) {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(SCRIPTED_POLL_SLICE_MS));
            waited += SCRIPTED_POLL_SLICE_MS;
        }
    }

    /// Forge a debug event from an inbound runtime message. Messages that only
    /// carry side effects (output, the attach handshake) yield no event.
    fn translate_scripted_message(&self, message: &DebugMessage) -> Option<DebugeeEvent> {
        if message.method != ipc::WIRE_METHOD {
            return None;
        }

        match message.tag.as_str() {
            ipc::tag::BREAKPOINT_HIT => {
                if self.pump_state().detach_requested {
                    return None;
                }

                let body: BreakpointBody = match serde_json::from_str(&message.code) {
                    Ok(body) => body,
                    Err(e) => {
                        error!("malformed BP payload: {}", e);
                        return None;
                    }
                };

                let (address, frames) = {
                    let mut map = self.source_map_guard();
                    let address = map.encode(&body.filename, body.line);
                    let frames = body
                        .stack_info
                        .iter()
                        .map(|frame| FrameInfo::Scripted {
                            address: map.encode(&frame.source, frame.currentline),
                            name: frame.name.clone(),
                        })
                        .collect();
                    (address, frames)
                };

                let code = {
                    let mut pump = self.pump_state();
                    pump.stack_snapshot = frames;
                    if pump.expecting_step_breakpoint {
                        // The runtime reports step completion as a plain stop;
                        // reclassify it as the single-step the engine expects.
                        pump.expecting_step_breakpoint = false;
                        crate::event::SINGLE_STEP_EXCEPTION_CODE
                    } else {
                        crate::event::BREAKPOINT_EXCEPTION_CODE
                    }
                };

                Some(DebugeeEvent::new(
                    self.id,
                    SCRIPTED_THREAD_ID,
                    RawEventInfo::Exception {
                        code,
                        address,
                        first_chance: true,
                    },
                ))
            }

            ipc::tag::ATTACHED => {
                let body: AttachedBody = match serde_json::from_str(&message.code) {
                    Ok(body) => body,
                    Err(e) => {
                        error!("malformed Attached payload: {}", e);
                        return None;
                    }
                };

                self.source_map_guard().set_working_dir(&body.workingdir);
                self.pump_state().pending_load_complete = true;
                if !body.desc.is_empty() {
                    self.callback.on_output_string(&body.desc);
                }
                None
            }

            ipc::tag::DETACH => Some(DebugeeEvent::new(
                self.id,
                SCRIPTED_THREAD_ID,
                RawEventInfo::ExitProcess { exit_code: 0 },
            )),

            ipc::tag::DEBUGGER_OUTPUT | ipc::tag::EXP_VALUE | ipc::tag::OUTPUT => {
                self.callback.on_output_string(&message.code);
                None
            }

            other => {
                trace!("ignoring debug message tag={}", other);
                None
            }
        }
    }

    fn dispatch_event(&self, event: &DebugeeEvent) -> Result<Dispatch> {
        match event.info().clone() {
            RawEventInfo::Exception { code, address, .. } => {
                self.dispatch_exception(event.thread_id(), code, address)
            }

            RawEventInfo::CreateThread {
                handle,
                start_address,
            } => {
                // Parked while a suspension holds the thread snapshot.
                self.suspend_gate.wait_until_open();

                let thread = Arc::new(DebuggedThread::new(event.thread_id(), handle, start_address));
                self.threads.lock().insert(Arc::clone(&thread));
                self.callback.on_thread_start(&thread);
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::CreateProcess { .. } => {
                // Only the prelude sees a create-process event; the debuggee is
                // created with single-process scope.
                error!("unexpected nested create-process event");
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::ExitThread { exit_code } => {
                self.suspend_gate.wait_until_open();

                let removed = self.threads.lock().remove(event.thread_id());
                if let Some(thread) = removed {
                    self.callback.on_thread_exit(&thread, exit_code);
                }
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::ExitProcess { exit_code } => self.dispatch_exit_process(exit_code),

            RawEventInfo::LoadModule {
                file_handle,
                base_address,
            } => {
                let module = self.register_native_module(file_handle, base_address);
                match module {
                    Ok(module) => {
                        self.callback.on_module_load(&module);
                        // Symbols are only loaded for the entry module.
                        self.callback.on_symbol_search(&module, None, false);
                    }
                    Err(e) => error!("error loading module: {}", e),
                }
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::UnloadModule { base_address } => {
                let removed = self.modules.lock().unregister(base_address);
                if let Some(module) = removed {
                    self.callback.on_module_unload(&module);
                }
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::OutputString(message) => {
                self.callback.on_output_string(&message);
                Ok(Dispatch::Continue { handled: true })
            }

            RawEventInfo::Rip(error) => {
                self.callback.on_error(error);
                Ok(Dispatch::Continue { handled: true })
            }
        }
    }

    fn dispatch_exception(&self, thread_id: u32, code: u32, address: u64) -> Result<Dispatch> {
        let seen_entry = self.pump_state().seen_entry_breakpoint;
        if !seen_entry {
            // The first breakpoint exception is the OS entry-point sentinel:
            // every module is loaded, no user code has run. Promote it.
            self.emit_load_complete(thread_id);
            return Ok(Dispatch::Stop);
        }

        if is_breakpoint_exception(code) {
            let async_break = {
                let mut pump = self.pump_state();
                if pump.expecting_async_break {
                    pump.expecting_async_break = false;
                    true
                } else {
                    false
                }
            };
            if async_break {
                return self.stop_async_break(thread_id, address);
            }

            if self.breakpoints.lock().contains(address) {
                return self.stop_breakpoint(thread_id, address);
            }

            // A breakpoint instruction we did not plant. Degrade to the
            // async-break shape so the front-end still gets a stop.
            let diagnostic = match self.kind {
                ProcessKind::Scripted => {
                    let (filename, line) = self.source_map_guard().decode(address);
                    format!(
                        "unknown breakpoint {} line {} address {:#x}\n",
                        filename, line, address
                    )
                }
                ProcessKind::Native => format!("unknown breakpoint at address {:#x}\n", address),
            };
            self.callback.on_output_string(&diagnostic);
            return self.stop_async_break(thread_id, address);
        }

        if is_single_step_exception(code) {
            return match self.kind {
                ProcessKind::Scripted => self.stop_step_complete(thread_id, address),
                ProcessKind::Native => self.complete_breakpoint_recovery(),
            };
        }

        // An exception the engine did not arrange. Assertion hook, then keep
        // the loop running.
        error!(
            "unexpected exception in debuggee: code={:#x} address={:#x}",
            code, address
        );
        Ok(Dispatch::Continue { handled: true })
    }

    fn stop_async_break(&self, thread_id: u32, address: u64) -> Result<Dispatch> {
        {
            let mut pump = self.pump_state();
            pump.last_stop = Some(StopReason::AsyncBreakComplete);
            pump.current_breakpoint_address = address;
        }

        if let Some(thread) = self.thread_by_id(thread_id) {
            self.callback.on_async_break_complete(&thread);
        } else {
            error!("async break on unknown thread {}", thread_id);
        }
        Ok(Dispatch::Stop)
    }

    fn stop_breakpoint(&self, thread_id: u32, address: u64) -> Result<Dispatch> {
        {
            let mut pump = self.pump_state();
            pump.last_stop = Some(StopReason::Breakpoint);
            pump.current_breakpoint_address = address;
        }

        let thread = self.thread_by_id(thread_id);
        let clients = self.breakpoints.lock().snapshot_clients(address);
        debug_assert!(!clients.is_empty(), "breakpoint stop with no clients");

        if let Some(thread) = thread {
            self.callback.on_breakpoint(&thread, &clients, address);
        } else {
            error!("breakpoint on unknown thread {}", thread_id);
        }
        Ok(Dispatch::Stop)
    }

    fn stop_step_complete(&self, thread_id: u32, address: u64) -> Result<Dispatch> {
        {
            let mut pump = self.pump_state();
            pump.last_stop = Some(StopReason::StepComplete);
            pump.current_breakpoint_address = address;
        }

        if let Some(thread) = self.thread_by_id(thread_id) {
            self.callback.on_step_complete(&thread);
        } else {
            error!("step complete on unknown thread {}", thread_id);
        }
        Ok(Dispatch::Stop)
    }

    // The hidden single step after a breakpoint: rewrite the int3 and let the
    // debuggee run on. The front-end hears nothing.
    fn complete_breakpoint_recovery(&self) -> Result<Dispatch> {
        let recovery = {
            let mut pump = self.pump_state();
            if pump.expecting_recovery_single_step {
                pump.expecting_recovery_single_step = false;
                pump.recovery_address.take()
            } else {
                None
            }
        };

        match recovery {
            Some(address) => {
                self.write_native_byte(address, BREAKPOINT_INSTRUCTION)
                    .context("re-arming breakpoint after single step")?;
                Ok(Dispatch::Continue { handled: true })
            }
            None => {
                error!("unexpected single-step exception in debuggee");
                Ok(Dispatch::Continue { handled: true })
            }
        }
    }

    fn dispatch_exit_process(&self, exit_code: u32) -> Result<Dispatch> {
        self.pump_state().detach_requested = false;

        // Continue first: the front-end may tear us down from inside the exit
        // callback.
        self.continue_last_event(false)?;
        self.pump_state().pumping = false;

        self.callback.on_process_exit(exit_code);
        Ok(Dispatch::Exited)
    }

    fn take_pending_load_complete(&self) -> bool {
        let mut pump = self.pump_state();
        if pump.pending_load_complete {
            pump.pending_load_complete = false;
            true
        } else {
            false
        }
    }

    fn emit_load_complete(&self, thread_id: u32) {
        {
            let mut pump = self.pump_state();
            pump.seen_entry_breakpoint = true;
            pump.last_stop = Some(StopReason::LoadComplete);
            pump.pumping = false;
            if pump.last_event.is_none() {
                // Occupy the raw slot so the stopped predicate holds.
                pump.last_event = Some(DebugeeEvent::new(
                    self.id,
                    thread_id,
                    RawEventInfo::Exception {
                        code: crate::event::BREAKPOINT_EXCEPTION_CODE,
                        address: 0,
                        first_chance: true,
                    },
                ));
            }
        }

        if let Some(thread) = self.thread_by_id(thread_id) {
            self.callback.on_load_complete(&thread);
        } else {
            error!("load complete on unknown thread {}", thread_id);
        }
    }

    fn register_native_module(&self, file_handle: u64, base_address: u64) -> Result<Module> {
        let resolver = self
            .resolver
            .as_ref()
            .context("module resolver not available")?;
        let path = resolver.resolve_mapped_file(self.process_handle, base_address, file_handle)?;
        let size = self.with_port(|port| port.image_size(base_address))?;
        Ok(self.modules.lock().register(path, base_address, size))
    }

    fn continue_last_event(&self, handled: bool) -> Result<()> {
        let (event, stop) = {
            let pump = self.pump_state();
            (pump.last_event.clone(), pump.last_stop)
        };

        match &mut *self.backend_guard() {
            Backend::Scripted { transport } => {
                // The runtime only expects a continue while parked at a stop;
                // anything else would desynchronize its debug loop.
                if stop.is_some_and(StopReason::runtime_awaits_continue) {
                    let status = if handled {
                        DBG_EXCEPTION_HANDLED
                    } else {
                        DBG_CONTINUE
                    };
                    let (process_id, thread_id) = event
                        .as_ref()
                        .map(|e| (e.process_id(), e.thread_id()))
                        .unwrap_or((self.id, SCRIPTED_THREAD_ID));
                    transport
                        .send_continue(process_id, thread_id, status)
                        .context("sending continue to the runtime")?;
                }
            }
            Backend::Native { port } => {
                if let Some(event) = &event {
                    port.continue_event(event.process_id(), event.thread_id(), handled)?;
                }
            }
        }

        let mut pump = self.pump_state();
        pump.last_event = None;
        pump.last_stop = None;
        pump.pumping = true;
        Ok(())
    }
}

// Command façade. Callable from any front-end thread; work either funnels onto
// the poll thread through state the pump reads, or happens here under locks.
impl DebuggedProcess {
    /// Async-break the debuggee. No-op when already stopped.
    pub fn break_(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        self.pump_state().expecting_async_break = true;

        match self.kind {
            ProcessKind::Scripted => self.with_transport(|t| t.send_break()),
            ProcessKind::Native => self.with_port(|p| p.debug_break()),
        }
    }

    /// Resume after a stop.
    ///
    /// Native: a breakpoint stop first runs the recovery dance, then the raw
    /// event is continued handled. Scripted: the runtime is resumed by the
    /// step/execute/detach flows, so plain continue only re-arms the pump.
    pub fn continue_(&self, _thread: &DebuggedThread) -> Result<()> {
        match self.kind {
            ProcessKind::Native => {
                if self.last_stop() == Some(StopReason::Breakpoint) {
                    self.recover_from_breakpoint()?;
                }
                self.continue_last_event(true)
            }
            ProcessKind::Scripted => {
                let mut pump = self.pump_state();
                pump.last_event = None;
                pump.last_stop = None;
                pump.pumping = true;
                Ok(())
            }
        }
    }

    /// Same shape as continue; the scripted side does send the wire continue,
    /// releasing the parked runtime.
    pub fn execute(&self, _thread: &DebuggedThread) -> Result<()> {
        if self.kind == ProcessKind::Native && self.last_stop() == Some(StopReason::Breakpoint) {
            self.recover_from_breakpoint()?;
        }
        self.continue_last_event(true)
    }

    /// Step the scripted runtime by one line. The completion arrives as the
    /// next `BP` message, reclassified through the expectation flag.
    pub fn step(&self, _thread: &DebuggedThread, kind: StepKind, _unit: StepUnit) -> Result<()> {
        if self.kind != ProcessKind::Scripted {
            bail!("step is not supported for native debuggees");
        }

        self.pump_state().expecting_step_breakpoint = true;

        let step_tag = match kind {
            StepKind::Into => ipc::tag::STEP_INTO,
            StepKind::Out => ipc::tag::STEP_OUT,
            StepKind::Over | StepKind::Backwards => ipc::tag::STEP_OVER,
        };
        self.with_transport(|t| t.send_step(step_tag, 1))?;

        let mut pump = self.pump_state();
        pump.last_event = None;
        pump.last_stop = None;
        pump.pumping = true;
        Ok(())
    }

    /// Bind `client` to a breakpoint at `address`, installing the underlying
    /// primitive on first binding.
    pub fn set_breakpoint(&self, address: u64, client: ClientToken) -> Result<()> {
        {
            let mut table = self.breakpoints.lock();
            if table.append_client(address, client) {
                drop(table);
                self.callback.on_breakpoint_bound(client, address);
                return Ok(());
            }
        }

        self.suspend_debuggee()?;
        let installed = self.install_breakpoint(address, client);
        let resumed = self.resume_debuggee();
        installed?;
        resumed?;

        self.callback.on_breakpoint_bound(client, address);
        Ok(())
    }

    // The runtime speaks working-directory-relative paths; decode the fake
    // address and relativize before putting it on the wire.
    fn scripted_file_line(&self, address: u64) -> (String, u32) {
        let map = self.source_map_guard();
        let (path, line) = map.decode(address);
        (map.relative_path(&path), line)
    }

    fn install_breakpoint(&self, address: u64, client: ClientToken) -> Result<()> {
        let scripted_location = match self.kind {
            ProcessKind::Scripted => Some(self.scripted_file_line(address)),
            ProcessKind::Native => None,
        };

        let mut table = self.breakpoints.lock();
        // Another client may have installed while we suspended.
        if table.append_client(address, client) {
            return Ok(());
        }

        match &mut *self.backend_guard() {
            Backend::Native { port } => {
                let mut buffer = [0u8; 1];
                port.read_memory(address, &mut buffer)
                    .context("reading original breakpoint byte")?;
                let original = buffer[0];

                if original != BREAKPOINT_INSTRUCTION {
                    port.write_memory(address, &[BREAKPOINT_INSTRUCTION])
                        .context("writing breakpoint byte")?;
                    port.flush_instruction_cache()?;
                }
                table.insert(address, Some(original), client);
            }
            Backend::Scripted { transport } => {
                let (filename, line) = scripted_location.unwrap_or_default();
                transport.send_set_breakpoint(&filename, line)?;
                table.insert(address, None, client);
            }
        }

        Ok(())
    }

    /// Unbind `client` from the breakpoint at `address`. The primitive is
    /// uninstalled when the last owner leaves.
    pub fn remove_breakpoint(&self, address: u64, client: ClientToken) -> Result<()> {
        if !self.breakpoints.lock().contains(address) {
            return Ok(());
        }

        self.suspend_debuggee()?;
        let removed = self.uninstall_breakpoint(address, client);
        let resumed = self.resume_debuggee();
        removed?;
        resumed
    }

    fn uninstall_breakpoint(&self, address: u64, client: ClientToken) -> Result<()> {
        let detach_requested = self.pump_state().detach_requested;
        let scripted_location = match self.kind {
            ProcessKind::Scripted => Some(self.scripted_file_line(address)),
            ProcessKind::Native => None,
        };

        let mut table = self.breakpoints.lock();
        let Some(removed) = table.remove_client(address, client) else {
            return Ok(());
        };

        if removed.last_client {
            match &mut *self.backend_guard() {
                Backend::Native { port } => {
                    if let Some(original) = removed.original_byte {
                        port.write_memory(address, &[original])
                            .context("restoring original byte")?;
                        port.flush_instruction_cache()?;
                    }
                }
                Backend::Scripted { transport } => {
                    if !detach_requested {
                        let (filename, line) = scripted_location.unwrap_or_default();
                        transport.send_remove_breakpoint(&filename, line)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Clients currently bound at `address`, if a record exists.
    pub fn find_breakpoint(&self, address: u64) -> Option<Vec<ClientToken>> {
        let table = self.breakpoints.lock();
        table.contains(address).then(|| table.snapshot_clients(address))
    }

    /// Suspend every debuggee thread. Reentrant; the scripted runtime is
    /// already halted whenever the worker is in a stop state, so only the
    /// counter moves there.
    pub fn suspend(&self) -> Result<()> {
        self.suspend_debuggee()
    }

    pub fn resume(&self) -> Result<()> {
        self.resume_debuggee()
    }

    fn suspend_debuggee(&self) -> Result<()> {
        if !self.suspend_gate.begin_suspend() {
            return Ok(());
        }

        if self.kind == ProcessKind::Scripted {
            return Ok(());
        }

        let threads = self.threads.lock().threads();
        let mut suspended: Vec<u64> = Vec::with_capacity(threads.len());

        match &mut *self.backend_guard() {
            Backend::Native { port } => {
                for thread in &threads {
                    match port.suspend_thread(thread.handle()) {
                        Ok(()) => suspended.push(thread.handle()),
                        Err(e) => {
                            // Partial failure: undo what we did.
                            for handle in suspended {
                                if let Err(e) = port.resume_thread(handle) {
                                    error!("error rolling back suspension: {}", e);
                                }
                            }
                            self.suspend_gate.cancel_suspend();
                            return Err(e.context("suspending debuggee threads"));
                        }
                    }
                }
            }
            Backend::Scripted { .. } => unreachable!(),
        }

        Ok(())
    }

    fn resume_debuggee(&self) -> Result<()> {
        if !self.suspend_gate.end_suspend() {
            return Ok(());
        }

        if self.kind == ProcessKind::Scripted {
            return Ok(());
        }

        let threads = self.threads.lock().threads();
        let mut first_error = None;

        match &mut *self.backend_guard() {
            Backend::Native { port } => {
                for thread in &threads {
                    if let Err(e) = port.resume_thread(thread.handle()) {
                        error!("error resuming thread {:x}: {}", thread.id(), e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            Backend::Scripted { .. } => unreachable!(),
        }

        match first_error {
            Some(e) => Err(e.context("resuming debuggee threads")),
            None => Ok(()),
        }
    }

    pub fn read_memory(&self, base: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.with_port(|port| port.read_memory(base, &mut buffer))?;
        Ok(buffer)
    }

    pub fn write_memory(&self, base: u64, data: &[u8]) -> Result<()> {
        self.with_port(|port| port.write_memory(base, data))
    }

    pub fn read_u32(&self, base: u64) -> Result<u32> {
        let mut buffer = [0u8; 4];
        self.with_port(|port| port.read_memory(base, &mut buffer))?;
        Ok(u32::from_le_bytes(buffer))
    }

    fn write_native_byte(&self, address: u64, byte: u8) -> Result<()> {
        self.with_port(|port| {
            port.write_memory(address, &[byte])?;
            port.flush_instruction_cache()
        })
    }

    pub fn get_thread_context(&self, thread: &DebuggedThread) -> Result<crate::stack::X86ThreadContext> {
        self.with_port(|port| port.get_thread_context(thread.handle()))
    }
}

// Breakpoint recovery, teardown, and the launch epilogue.
impl DebuggedProcess {
    // Continuing past an int3 we planted: the original instruction must be
    // restored, executed under the trap flag, and the int3 rewritten when the
    // single-step exception comes back. Any failure here is fatal.
    fn recover_from_breakpoint(&self) -> Result<()> {
        let event = self
            .pump_state()
            .last_event
            .clone()
            .context("recovery attempted while not stopped")?;

        let (code, address) = match event.info() {
            RawEventInfo::Exception { code, address, .. } => (*code, *address),
            _ => bail!("recovery attempted on a non-exception event"),
        };
        debug_assert!(is_breakpoint_exception(code));

        let thread = self
            .thread_by_id(event.thread_id())
            .context("unknown thread for breakpoint recovery")?;

        // Rewind unconditionally; the breakpoint may have been removed while
        // the debuggee sat at the stop.
        self.rewind_instruction_pointer(&thread, 1)?;

        let original = self
            .breakpoints
            .lock()
            .find(address)
            .and_then(|record| record.original_byte());

        if let Some(original) = original {
            self.write_native_byte(address, original)
                .context("restoring original instruction")?;
            self.enable_single_step(&thread)?;

            let mut pump = self.pump_state();
            pump.recovery_address = Some(address);
            pump.expecting_recovery_single_step = true;
        }

        Ok(())
    }

    fn rewind_instruction_pointer(&self, thread: &DebuggedThread, bytes: u32) -> Result<()> {
        self.with_port(|port| {
            let mut context = port.get_thread_context(thread.handle())?;
            context.eip = context.eip.wrapping_sub(bytes);
            port.set_thread_context(thread.handle(), &context)
        })
        .context("rewinding instruction pointer")
    }

    fn enable_single_step(&self, thread: &DebuggedThread) -> Result<()> {
        self.with_port(|port| {
            let mut context = port.get_thread_context(thread.handle())?;
            context.eflags |= crate::event::TRAP_FLAG;
            port.set_thread_context(thread.handle(), &context)
        })
        .context("enabling single step")
    }

    fn last_event_was_breakpoint(&self) -> Option<DebugeeEvent> {
        let pump = self.pump_state();
        if pump.last_stop != Some(StopReason::Breakpoint) {
            return None;
        }
        match &pump.last_event {
            Some(event) => match event.info() {
                RawEventInfo::Exception { code, .. } if is_breakpoint_exception(*code) => {
                    Some(event.clone())
                }
                _ => None,
            },
            None => None,
        }
    }

    /// Detach from the debuggee. Scripted: ask the runtime to shut its debug
    /// hook down and let the pump drain. Native: put the debuggee back in a
    /// runnable state, then release it.
    pub fn detach(&self) -> Result<()> {
        match self.kind {
            ProcessKind::Scripted => self.scripted_detach(),
            ProcessKind::Native => {
                if self.last_stop().is_some() {
                    if let Some(event) = self.last_event_was_breakpoint() {
                        // Still sitting on the int3: rewind past it. The
                        // original bytes were restored when the bound
                        // breakpoints were removed before this call.
                        if let Some(thread) = self.thread_by_id(event.thread_id()) {
                            self.rewind_instruction_pointer(&thread, 1)?;
                        }
                        self.continue_last_event(true)?;
                    } else if self.last_stop() == Some(StopReason::Exception) {
                        self.continue_last_event(false)?;
                    } else {
                        self.continue_last_event(true)?;
                    }
                }

                self.with_port(|port| port.detach())?;
                self.callback.on_program_destroy(0);
                Ok(())
            }
        }
    }

    /// Terminate the debuggee. The scripted runtime outlives its debug hook,
    /// so termination degrades to detach there.
    pub fn terminate(&self) -> Result<()> {
        match self.kind {
            ProcessKind::Scripted => self.scripted_detach(),
            ProcessKind::Native => {
                self.with_port(|port| port.terminate())?;
                self.callback.on_program_destroy(0);
                Ok(())
            }
        }
    }

    fn scripted_detach(&self) -> Result<()> {
        if let Err(e) = self.with_transport(|t| t.send_detach()) {
            // Best effort; the runtime may already be gone.
            error!("error sending detach: {}", e);
        }

        {
            let mut pump = self.pump_state();
            pump.detach_requested = true;
            if pump.last_stop.is_some() {
                // Wake the pump so the drain tick can run.
                pump.last_event = None;
                pump.last_stop = None;
                pump.pumping = true;
            }
        }

        self.callback.on_program_destroy(0);
        Ok(())
    }

    /// Launch epilogue: deliver the deferred entry module-load and
    /// thread-create events, then let the debuggee run to its entry point.
    pub fn resume_from_launch(&self) -> Result<()> {
        debug_assert_eq!(self.method, DebugMethod::Launch);

        let (base, thread_id) = {
            let mut pump = self.pump_state();
            match (pump.entry_module_base.take(), pump.entry_thread_id.take()) {
                (Some(base), Some(thread_id)) => (base, thread_id),
                _ => bail!("resume_from_launch called twice or without a launch"),
            }
        };

        let module = self
            .modules
            .lock()
            .resolve(base)
            .context("entry module missing")?;
        let thread = self.thread_by_id(thread_id).context("entry thread missing")?;

        self.callback.on_module_load(&module);
        // The entry module is the only one symbols were loaded for.
        self.callback
            .on_symbol_search(&module, module.symbol_path(), module.symbols_loaded());
        self.callback.on_thread_start(&thread);

        match self.kind {
            ProcessKind::Scripted => {
                // Forge the load-complete stop, then arm the runtime's debug
                // hook; the entry sentinel never comes from a scripted runtime.
                self.pump_state().last_event = None;
                self.emit_load_complete(thread_id);
                self.with_transport(|t| t.send_attach())
            }
            ProcessKind::Native => self.continue_last_event(true),
        }
    }
}

// Stack walking, expression evaluation, and symbol queries.
impl DebuggedProcess {
    /// Populate `thread`'s frame list. Scripted frames come from the snapshot
    /// captured at the last `BP` message, falling back to a single frame at the
    /// current breakpoint address; native frames come from the external walker.
    pub fn do_stack_walk(&self, thread: &DebuggedThread) -> Result<()> {
        match self.kind {
            ProcessKind::Scripted => {
                let (snapshot, current) = {
                    let pump = self.pump_state();
                    (
                        pump.stack_snapshot.clone(),
                        pump.current_breakpoint_address,
                    )
                };

                let frames = if snapshot.is_empty() {
                    vec![FrameInfo::Scripted {
                        address: current,
                        name: String::new(),
                    }]
                } else {
                    snapshot
                };
                thread.set_frames(frames);
                Ok(())
            }
            ProcessKind::Native => {
                let walker = self
                    .stack_walker
                    .as_ref()
                    .context("stack walker not available")?;
                let modules = self.get_modules();
                let contexts = walker.walk(self.process_handle, thread.handle(), &modules)?;
                thread.set_frames(contexts.into_iter().map(FrameInfo::Native).collect());
                Ok(())
            }
        }
    }

    /// Evaluate `expression` in the stopped runtime. Expressions containing
    /// any of `= ; ( )` are executed; anything else is dumped. Replies trickle
    /// in as `ExpValue` messages and are concatenated until two quiet ticks or
    /// the one-second budget runs out.
    pub fn evaluate_expression(&self, expression: &str) -> Result<Option<String>> {
        if self.kind != ProcessKind::Scripted {
            bail!("expression evaluation goes through the symbol engine for native debuggees");
        }

        let execute = expression.chars().any(|c| EXECUTE_EXPRESSION_CHARS.contains(&c));
        let sent = self.with_transport(|t| {
            if execute {
                t.send_exec(expression)
            } else {
                t.send_dump(expression)
            }
        });
        if let Err(e) = sent {
            // Transient: an unanswered evaluation is an empty result.
            error!("error sending evaluation request: {}", e);
            return Ok(None);
        }

        let mut output = String::new();
        let mut has_result = false;
        let mut quiet_ticks = 0;

        for _ in 0..EVALUATE_TICKS {
            std::thread::sleep(EVALUATE_TICK);

            let mut received_this_tick = false;
            loop {
                let message = match self.with_transport(|t| t.try_receive()) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("error receiving evaluation reply: {}", e);
                        None
                    }
                };
                let Some(message) = message else { break };

                if message.tag == ipc::tag::EXP_VALUE {
                    output.push_str(&message.code);
                    received_this_tick = true;
                    has_result = true;
                }
            }

            if has_result {
                if received_this_tick {
                    quiet_ticks = 0;
                } else {
                    quiet_ticks += 1;
                    if quiet_ticks >= EVALUATE_QUIET_TICKS {
                        break;
                    }
                }
            }
        }

        Ok((!output.is_empty()).then_some(output))
    }

    /// Source position for an instruction pointer. Scripted addresses decode
    /// through the codec, with the working-directory-relative path standing in
    /// for the function name.
    pub fn get_source_information(&self, ip: u64) -> Result<Option<SourceLocation>> {
        match self.kind {
            ProcessKind::Scripted => {
                let map = self.source_map_guard();
                let (document, line) = map.decode(ip);
                let function = map.relative_path(&document);
                Ok(Some(SourceLocation {
                    document,
                    function,
                    line,
                    num_parameters: 0,
                    num_locals: 0,
                }))
            }
            ProcessKind::Native => {
                let mut ip = ip;
                // At a breakpoint stop the reported ip is one past the int3.
                if let Some(event) = self.last_event_was_breakpoint() {
                    if let RawEventInfo::Exception { address, .. } = event.info() {
                        if *address == ip.wrapping_sub(1) {
                            ip -= 1;
                        }
                    }
                }

                let Some(module) = self.resolve_address(ip) else {
                    return Ok(None);
                };
                let engine = self
                    .symbol_engine
                    .as_ref()
                    .context("symbol engine not available")?;
                engine.find_source_for_addr(module.name(), module.base_address(), ip - module.base_address())
            }
        }
    }

    /// Code addresses a source location binds to. The scripted side is total:
    /// every (file, line) encodes to exactly one address.
    pub fn get_addresses_for_source_location(
        &self,
        module_name: Option<&str>,
        document: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<u64>> {
        match self.kind {
            ProcessKind::Scripted => {
                Ok(vec![self.source_map_guard().encode(document, line)])
            }
            ProcessKind::Native => {
                let engine = self
                    .symbol_engine
                    .as_ref()
                    .context("symbol engine not available")?;

                let mut addresses = Vec::new();
                for module in self.get_modules() {
                    if let Some(name) = module_name {
                        if module.name() != name {
                            continue;
                        }
                    }
                    if !module.symbols_loaded() {
                        continue;
                    }
                    if let Some(address) = engine.addr_for_source_location(
                        module.base_address(),
                        document,
                        line,
                        column,
                    )? {
                        addresses.push(address);
                    }
                }
                Ok(addresses)
            }
        }
    }

    /// Arguments or locals visible at `ip`, one slot at a time through the
    /// symbol engine. The scripted runtime does not expose its variables here.
    pub fn get_function_variables(
        &self,
        ip: u64,
        kind: VariableKind,
        count: u32,
    ) -> Result<Vec<VariableInfo>> {
        match self.kind {
            ProcessKind::Scripted => Ok(Vec::new()),
            ProcessKind::Native => {
                let module = self
                    .resolve_address(ip)
                    .context("no module contains the address")?;
                let engine = self
                    .symbol_engine
                    .as_ref()
                    .context("symbol engine not available")?;

                let rva = ip - module.base_address();
                let mut variables = Vec::new();
                for index in 0..count {
                    if let Some(variable) =
                        engine.var_for_addr(module.base_address(), rva, kind, index)?
                    {
                        variables.push(variable);
                    }
                }
                Ok(variables)
            }
        }
    }
}

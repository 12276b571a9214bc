// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Back-end worker of a source-level debugger.
//!
//! One process aggregate drives a debuggee and reports stops to a front-end
//! through a callback surface. Two debuggee kinds sit behind the same
//! interface: a native process controlled through the OS debug port, and a
//! scripting-runtime process controlled out-of-band through a message-queue
//! transport whose messages are forged into the same event currency.

pub mod breakpoint;
pub mod callback;
pub mod event;
pub mod ipc;
pub mod os;
pub mod port;
pub mod process;
pub mod registry;
pub mod source_map;
pub mod stack;
pub mod suspend;
pub mod symbols;
pub mod sync;

pub use self::{
    breakpoint::ClientToken,
    callback::EngineCallback,
    event::{DebugeeEvent, RawEventInfo, StopReason},
    ipc::{DebugMessage, InProcessQueue, MessageQueue, Transport},
    port::DebugPort,
    process::{DebugMethod, DebuggedProcess, ProcessKind, PumpFlags, StepKind, StepUnit},
    registry::{DebuggedThread, Module},
    source_map::SourceMap,
    stack::{FrameInfo, X86ThreadContext},
};

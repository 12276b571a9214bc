// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Message-queue transport to the scripted runtime.
//!
//! Two named queues carry typed messages: `VSDebug` into the worker, `NPLDebug`
//! out to the runtime. The queue endpoints are an injected seam so the engine is
//! drivable without a live runtime. Payload bodies ride in the `code` field.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Queue the runtime sends on and the worker receives on.
pub const INBOUND_QUEUE_NAME: &str = "VSDebug";

/// Queue the worker sends on and the runtime receives on.
pub const OUTBOUND_QUEUE_NAME: &str = "NPLDebug";

/// Every debug message carries this method.
pub const WIRE_METHOD: &str = "debug";

/// Role tags carried in the wire `filename` field.
pub mod tag {
    pub const ATTACH: &str = "Attach";
    pub const BREAK: &str = "Break";
    pub const CONTINUE: &str = "continue";
    pub const DETACH: &str = "Detach";
    pub const SET_BREAKPOINT: &str = "setb";
    pub const REMOVE_BREAKPOINT: &str = "delb";
    pub const STEP_INTO: &str = "step";
    pub const STEP_OVER: &str = "over";
    pub const STEP_OUT: &str = "out";
    pub const DUMP: &str = "dump";
    pub const EXEC: &str = "exec";

    pub const BREAKPOINT_HIT: &str = "BP";
    pub const ATTACHED: &str = "Attached";
    pub const DEBUGGER_OUTPUT: &str = "DebuggerOutput";
    pub const EXP_VALUE: &str = "ExpValue";
    pub const OUTPUT: &str = "Output";
}

/// One inter-process message. The wire `filename` field is a role tag, not a
/// real file name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMessage {
    pub method: String,
    #[serde(rename = "filename")]
    pub tag: String,
    #[serde(rename = "type")]
    pub msg_type: i32,
    pub param1: i32,
    pub param2: i32,
    pub from: String,
    pub code: String,
}

impl DebugMessage {
    pub fn new(tag: &str, msg_type: i32, param1: i32, param2: i32, code: String) -> Self {
        Self {
            method: WIRE_METHOD.to_string(),
            tag: tag.to_string(),
            msg_type,
            param1,
            param2,
            from: INBOUND_QUEUE_NAME.to_string(),
            code,
        }
    }
}

/// Body of `setb` / `delb` messages and of inbound `BP` stops.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointBody {
    pub filename: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_info: Vec<StackInfoEntry>,
}

/// One frame of the stack snapshot the runtime attaches to a `BP` stop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackInfoEntry {
    pub source: String,
    pub name: String,
    pub currentline: u32,
}

/// Body of `dump` / `exec` requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateBody {
    pub name: String,
}

/// Body of the initial `Attached` handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedBody {
    pub workingdir: String,
    #[serde(default)]
    pub desc: String,
}

/// One endpoint of the bidirectional channel. Implementations must be safe to
/// share between the poll thread and command threads.
pub trait MessageQueue: Send + Sync {
    fn send(&self, message: &DebugMessage) -> Result<()>;
    fn try_receive(&self) -> Result<Option<DebugMessage>>;
}

/// The worker's view of the queue pair.
pub struct Transport {
    outbound: Box<dyn MessageQueue>,
    inbound: Box<dyn MessageQueue>,
}

impl Transport {
    pub fn new(outbound: Box<dyn MessageQueue>, inbound: Box<dyn MessageQueue>) -> Self {
        Self { outbound, inbound }
    }

    fn send(&self, tag: &str, msg_type: i32, param1: i32, param2: i32, code: String) -> Result<()> {
        let message = DebugMessage::new(tag, msg_type, param1, param2, code);
        log::trace!("ipc send tag={} type={}", message.tag, message.msg_type);
        self.outbound
            .send(&message)
            .with_context(|| format!("sending {} message", tag))
    }

    pub fn try_receive(&self) -> Result<Option<DebugMessage>> {
        self.inbound.try_receive()
    }

    pub fn send_attach(&self) -> Result<()> {
        self.send(tag::ATTACH, 0, 0, 0, String::new())
    }

    pub fn send_break(&self) -> Result<()> {
        self.send(tag::BREAK, 0, 0, 0, String::new())
    }

    pub fn send_continue(&self, process_id: u32, thread_id: u32, status: u32) -> Result<()> {
        self.send(
            tag::CONTINUE,
            process_id as i32,
            thread_id as i32,
            status as i32,
            String::new(),
        )
    }

    pub fn send_detach(&self) -> Result<()> {
        self.send(tag::DETACH, 0, 0, 0, String::new())
    }

    fn breakpoint_body(filename: &str, line: u32) -> Result<String> {
        serde_json::to_string(&BreakpointBody {
            filename: filename.to_string(),
            line,
            stack_info: Vec::new(),
        })
        .context("encoding breakpoint body")
    }

    pub fn send_set_breakpoint(&self, filename: &str, line: u32) -> Result<()> {
        let body = Self::breakpoint_body(filename, line)?;
        self.send(tag::SET_BREAKPOINT, 0, 0, 0, body)
    }

    pub fn send_remove_breakpoint(&self, filename: &str, line: u32) -> Result<()> {
        let body = Self::breakpoint_body(filename, line)?;
        self.send(tag::REMOVE_BREAKPOINT, 0, 0, 0, body)
    }

    pub fn send_step(&self, step_tag: &str, lines: u32) -> Result<()> {
        self.send(step_tag, 0, lines as i32, 0, String::new())
    }

    /// Evaluate `expression` by printing its value.
    pub fn send_dump(&self, expression: &str) -> Result<()> {
        let body = serde_json::to_string(&EvaluateBody {
            name: expression.to_string(),
        })
        .context("encoding dump body")?;
        self.send(tag::DUMP, 0, 0, 0, body)
    }

    /// Evaluate `expression` by executing it.
    pub fn send_exec(&self, expression: &str) -> Result<()> {
        let body = serde_json::to_string(&EvaluateBody {
            name: expression.to_string(),
        })
        .context("encoding exec body")?;
        self.send(tag::EXEC, 0, 0, 0, body)
    }
}

/// In-process queue endpoint. The worker holds one side; tests (or an embedded
/// runtime) hold a clone of the same endpoint and drain or feed it.
#[derive(Clone, Default)]
pub struct InProcessQueue {
    messages: Arc<Mutex<VecDeque<DebugMessage>>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.messages.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageQueue for InProcessQueue {
    fn send(&self, message: &DebugMessage) -> Result<()> {
        match self.messages.lock() {
            Ok(mut queue) => queue.push_back(message.clone()),
            Err(poisoned) => poisoned.into_inner().push_back(message.clone()),
        }
        Ok(())
    }

    fn try_receive(&self) -> Result<Option<DebugMessage>> {
        let popped = match self.messages.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        Ok(popped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_are_compatible() {
        let message = DebugMessage::new(tag::SET_BREAKPOINT, 1, 2, 3, "{}".to_string());
        let json = serde_json::to_string(&message).unwrap();

        assert!(json.contains("\"filename\":\"setb\""));
        assert!(json.contains("\"type\":1"));
        assert!(json.contains("\"method\":\"debug\""));
        assert!(json.contains("\"from\":\"VSDebug\""));
    }

    #[test]
    fn set_breakpoint_carries_file_and_line() {
        let outbound = InProcessQueue::new();
        let transport = Transport::new(Box::new(outbound.clone()), Box::new(InProcessQueue::new()));

        transport.send_set_breakpoint("script/a.lua", 12).unwrap();

        let message = outbound.try_receive().unwrap().unwrap();
        assert_eq!(message.tag, tag::SET_BREAKPOINT);
        let body: BreakpointBody = serde_json::from_str(&message.code).unwrap();
        assert_eq!(body.filename, "script/a.lua");
        assert_eq!(body.line, 12);
    }

    #[test]
    fn continue_packs_ids_into_params() {
        let outbound = InProcessQueue::new();
        let transport = Transport::new(Box::new(outbound.clone()), Box::new(InProcessQueue::new()));

        transport.send_continue(44, 7, 0x0001_0002).unwrap();

        let message = outbound.try_receive().unwrap().unwrap();
        assert_eq!(message.tag, tag::CONTINUE);
        assert_eq!(message.msg_type, 44);
        assert_eq!(message.param1, 7);
        assert_eq!(message.param2, 0x0001_0002);
    }

    #[test]
    fn queue_is_fifo() {
        let queue = InProcessQueue::new();
        queue
            .send(&DebugMessage::new(tag::OUTPUT, 0, 0, 0, "one".to_string()))
            .unwrap();
        queue
            .send(&DebugMessage::new(tag::OUTPUT, 0, 0, 0, "two".to_string()))
            .unwrap();

        assert_eq!(queue.try_receive().unwrap().unwrap().code, "one");
        assert_eq!(queue.try_receive().unwrap().unwrap().code, "two");
        assert!(queue.try_receive().unwrap().is_none());
    }

    #[test]
    fn bp_body_decodes_stack_info() {
        let json = r#"{"filename":"script/a.lua","line":12,
            "stack_info":[{"source":"script/a.lua","name":"update","currentline":12},
                          {"source":"script/main.lua","name":"main","currentline":88}]}"#;
        let body: BreakpointBody = serde_json::from_str(json).unwrap();

        assert_eq!(body.line, 12);
        assert_eq!(body.stack_info.len(), 2);
        assert_eq!(body.stack_info[1].name, "main");
    }
}

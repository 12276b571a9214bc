// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stack frame currency for both debuggee kinds.

/// Integer and control context of an x86 thread. Captured by the OS for native
//  debuggees; synthesized around a fake address for scripted frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct X86ThreadContext {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub esp: u32,
    pub ebp: u32,
    pub eip: u32,
    pub eflags: u32,
    pub seg_cs: u32,
    pub seg_ds: u32,
    pub seg_es: u32,
    pub seg_fs: u32,
}

/// One walked stack frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameInfo {
    /// Scripted frames pair a fake address with the symbolic name the runtime
    /// reported for the frame.
    Scripted { address: u64, name: String },
    /// Native frames carry the full register context the external walker
    /// extracted.
    Native(X86ThreadContext),
}

impl FrameInfo {
    /// The instruction pointer of the frame, whichever flavor it is.
    pub fn instruction_pointer(&self) -> u64 {
        match self {
            FrameInfo::Scripted { address, .. } => *address,
            FrameInfo::Native(context) => u64::from(context.eip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_pointer_spans_both_flavors() {
        let scripted = FrameInfo::Scripted {
            address: 120_001,
            name: "update".to_string(),
        };
        assert_eq!(scripted.instruction_pointer(), 120_001);

        let context = X86ThreadContext {
            eip: 0x0040_1000,
            ..Default::default()
        };
        assert_eq!(
            FrameInfo::Native(context).instruction_pointer(),
            0x0040_1000
        );
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Contracts of the external symbol machinery.
//!
//! The PDB/DIA wrapper, the module-to-file resolver, and the frame walker live
//! outside this crate; the engine consumes them through these traits. Scripted
//! debuggees never touch them — their symbol scheme is the fake-address codec.

use anyhow::Result;

use crate::registry::Module;
use crate::stack::X86ThreadContext;

/// Source position a code address maps to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub document: String,
    pub function: String,
    pub line: u32,
    pub num_parameters: u32,
    pub num_locals: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VariableKind {
    Parameter,
    Local,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub type_name: String,
    pub built_in: bool,
    pub offset: u32,
    pub indirection: u32,
}

pub trait SymbolEngine: Send + Sync {
    /// Locate and load symbols for `module_name`, returning the symbol file
    /// path when found. Only ever called for the entry module.
    fn load_symbols_for_module(&self, module_name: &str) -> Result<Option<String>>;

    fn find_source_for_addr(
        &self,
        module_name: &str,
        base_address: u64,
        rva: u64,
    ) -> Result<Option<SourceLocation>>;

    fn var_for_addr(
        &self,
        base_address: u64,
        rva: u64,
        kind: VariableKind,
        index: u32,
    ) -> Result<Option<VariableInfo>>;

    fn addr_for_source_location(
        &self,
        base_address: u64,
        document: &str,
        line: u32,
        column: u32,
    ) -> Result<Option<u64>>;
}

pub trait ModuleResolver: Send + Sync {
    fn resolve_mapped_file(
        &self,
        process_handle: u64,
        base_address: u64,
        file_handle: u64,
    ) -> Result<String>;
}

pub trait StackWalker: Send + Sync {
    fn walk(
        &self,
        process_handle: u64,
        thread_handle: u64,
        modules: &[Module],
    ) -> Result<Vec<X86ThreadContext>>;
}

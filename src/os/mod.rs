// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Operating-system debug-port implementations.

// The engine drives x86 debuggees only.
#[cfg(all(windows, target_arch = "x86"))]
pub mod windows;

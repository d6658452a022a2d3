//! JIT compilation of stack bytecode to native x86-64 code.
//!
//! ## Architecture
//!
//! ```text
//! Bytecode -> lowering (compiler.rs) -> Asm (asm.rs) -> ExecutableMemory
//!          -> relocation patching -> seal to read+execute -> CompiledCode
//! ```
//!
//! ## Calling Convention
//!
//! Emitted routines are System V x86-64 functions of no arguments
//! returning `f64` in `xmm0`:
//!
//! ```ignore
//! type EvalFn = unsafe extern "C" fn() -> f64;
//! ```
//!
//! ## Stack discipline
//!
//! Between opcodes exactly one operand is live in `xmm0`; deeper operands
//! are spilled to 8-byte slots at negative offsets from `rbp`. A spill
//! happens only when a second operand must be introduced, i.e. before
//! every `Push` except the program's first. All operand-offset arithmetic
//! in the lowering depends on this invariant.

mod asm;
mod code;
mod compiler;
mod memory;
mod runtime;

pub use code::CompiledCode;
pub use compiler::compile;
pub use memory::ExecutableMemory;

use std::fmt;

/// JIT compilation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// A byte outside the opcode table. Unreachable on emitter-produced
    /// programs.
    InvalidOpcode(u8),
    /// The stream ended inside an instruction or without reaching `Ret`.
    Truncated,
    /// The program would pop more operands than it pushed.
    StackUnderflow,
    /// `relocate` was asked for a name with no recorded patch sites.
    UnknownRelocation(String),
    /// A patch site was never visited before sealing.
    UnpatchedRelocation(String),
    /// A patched value does not fit its 32-bit field.
    RelocationOverflow(String),
    /// Mapping or protecting the executable region failed.
    Memory(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::InvalidOpcode(byte) => write!(f, "invalid byte code {}", byte),
            JitError::Truncated => write!(f, "truncated byte code"),
            JitError::StackUnderflow => write!(f, "stack underflow in byte code"),
            JitError::UnknownRelocation(name) => {
                write!(f, "unknown relocation '{}'", name)
            }
            JitError::UnpatchedRelocation(name) => {
                write!(f, "relocation '{}' was never patched", name)
            }
            JitError::RelocationOverflow(name) => {
                write!(f, "relocation '{}' overflows its field", name)
            }
            JitError::Memory(message) => write!(f, "executable memory: {}", message),
        }
    }
}

impl std::error::Error for JitError {}

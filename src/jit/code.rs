//! Compiled-code wrapper.
//!
//! [`CompiledCode`] owns the sealed executable region and exposes the
//! routine at offset zero as an ordinary zero-argument function returning
//! `f64`.

use super::memory::ExecutableMemory;

type EvalFn = unsafe extern "C" fn() -> f64;

/// A native routine produced by the JIT. Dropping it unmaps the region.
pub struct CompiledCode {
    memory: ExecutableMemory,
}

// Safety: the region is sealed read+execute before construction, the
// routine reads only its own constant pool, and it touches no mutable
// state, so concurrent calls cannot race.
unsafe impl Send for CompiledCode {}
unsafe impl Sync for CompiledCode {}

impl CompiledCode {
    /// Wrap a sealed region whose entry point is offset 0.
    pub(crate) fn new(memory: ExecutableMemory) -> Self {
        debug_assert!(memory.is_sealed());
        CompiledCode { memory }
    }

    /// The raw entry point, usable as a C function pointer.
    pub fn fn_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Invoke the routine.
    pub fn call(&self) -> f64 {
        // Safety: `new` requires a sealed region; the lowering emitted a
        // complete prologue/epilogue and the platform ABI returns the
        // result in xmm0.
        let f: EvalFn = unsafe { std::mem::transmute(self.memory.as_ptr()) };
        unsafe { f() }
    }
}

impl std::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCode")
            .field("fn_ptr", &self.fn_ptr())
            .field("len", &self.memory.len())
            .finish()
    }
}

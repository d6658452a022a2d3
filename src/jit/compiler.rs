//! Bytecode to native lowering.
//!
//! Walks the byte stream once, emitting x86-64 through [`Asm`] while
//! tracking the compile-time spill depth, then places code and constant
//! pool in one executable region, patches the three relocations
//! (`stackSize`, `data`, `pow`) and seals the region.

use crate::compiler::{Bytecode, Op};

use super::asm::Asm;
use super::code::CompiledCode;
use super::memory::ExecutableMemory;
use super::runtime;
use super::JitError;

/// Operand slots are one `f64` wide.
const SLOT: i32 = 8;

/// Compile a bytecode program into a callable native routine.
pub fn compile(program: &Bytecode) -> Result<CompiledCode, JitError> {
    let body = lower(program)?;
    place(body)
}

/// Everything emission produces before addresses are known.
struct Lowered {
    code: Vec<u8>,
    relocs: super::asm::Relocs,
    /// Pending constant pool, one cell per `Push`.
    pool: Vec<f64>,
    /// Final frame size in bytes.
    frame_size: u32,
    uses_pow: bool,
}

fn lower(program: &Bytecode) -> Result<Lowered, JitError> {
    let code = &program.code;

    let mut asm = Asm::new();
    asm.push_rbp();
    asm.mov_rbp_rsp();
    asm.sub_rsp_imm32("stackSize");

    let mut pool: Vec<f64> = Vec::new();
    let mut uses_pow = false;

    // Number of operands spilled to frame slots; the value above them is
    // live in xmm0. Slot n sits at rbp - SLOT*n.
    let mut spill: i32 = 0;
    let mut max_spill: i32 = 0;
    let mut first_push = true;

    let mut ip = 0usize;
    loop {
        let byte = match code.get(ip) {
            Some(&byte) => byte,
            None => return Err(JitError::Truncated),
        };
        ip += 1;

        let op = Op::from_byte(byte).ok_or(JitError::InvalidOpcode(byte))?;
        match op {
            Op::Push => {
                if code.len() < ip + 8 {
                    return Err(JitError::Truncated);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&code[ip..ip + 8]);
                ip += 8;

                // Spill the live operand before introducing a new one;
                // the program's first Push has nothing to spill.
                if first_push {
                    first_push = false;
                } else {
                    spill += 1;
                    max_spill = max_spill.max(spill);
                    asm.movsd_store(-SLOT * spill);
                }

                asm.movsd_load_rip("data", SLOT as i64 * pool.len() as i64);
                pool.push(f64::from_le_bytes(raw));
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                if spill == 0 {
                    return Err(JitError::StackUnderflow);
                }
                let slot = -SLOT * spill;
                match op {
                    // Commutative: fold the spilled operand into xmm0.
                    Op::Add => asm.addsd_mem(slot),
                    Op::Mul => asm.mulsd_mem(slot),
                    // Non-commutative: the spilled operand is the
                    // left-hand side, so compute memory OP xmm0 in xmm1.
                    Op::Sub | Op::Div => {
                        asm.movsd_load_xmm1(slot);
                        if op == Op::Sub {
                            asm.subsd_xmm1_xmm0();
                        } else {
                            asm.divsd_xmm1_xmm0();
                        }
                        asm.movapd_xmm0_xmm1();
                    }
                    _ => unreachable!(),
                }
                spill -= 1;
            }
            Op::Pow => {
                if spill == 0 {
                    return Err(JitError::StackUnderflow);
                }
                // xmm0 holds the exponent, the base is the spilled
                // operand; System V passes them as (xmm0, xmm1).
                asm.movapd_xmm1_xmm0();
                asm.movsd_load_xmm0(-SLOT * spill);
                asm.mov_rax_imm64("pow");
                asm.call_rax();
                spill -= 1;
                uses_pow = true;
            }
            Op::Ret => {
                if first_push {
                    return Err(JitError::StackUnderflow);
                }
                asm.leave();
                asm.ret();
                break;
            }
        }
    }

    // Keep rsp 16-byte aligned at every call site: after the prologue
    // rsp is congruent to rbp, so the frame must stay a multiple of 16.
    let frame_size = (SLOT as u32 * max_spill as u32 + 15) & !15;

    let (code, relocs) = asm.finish();
    Ok(Lowered {
        code,
        relocs,
        pool,
        frame_size,
        uses_pow,
    })
}

/// Place code and constant pool in executable memory, apply relocations,
/// and seal.
fn place(body: Lowered) -> Result<CompiledCode, JitError> {
    let Lowered {
        code,
        mut relocs,
        pool,
        frame_size,
        uses_pow,
    } = body;

    // The pool begins at the first 8-byte boundary past the code.
    let pool_offset = (code.len() + 7) & !7;
    let total = pool_offset + pool.len() * 8;

    let mut memory =
        ExecutableMemory::new(total).map_err(|e| JitError::Memory(e.to_string()))?;
    let base = memory.as_ptr() as u64;

    {
        let region = memory.as_mut_slice();
        region[..code.len()].copy_from_slice(&code);
        for (index, value) in pool.iter().enumerate() {
            let at = pool_offset + index * 8;
            region[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }

        let patched = &mut region[..code.len()];
        relocs.relocate("stackSize", frame_size as u64, base, patched)?;
        relocs.relocate("data", base + pool_offset as u64, base, patched)?;
        if uses_pow {
            relocs.relocate("pow", runtime::host_pow as usize as u64, base, patched)?;
        }
        relocs.verify_patched()?;
    }

    memory.seal().map_err(|e| JitError::Memory(e.to_string()))?;
    Ok(CompiledCode::new(memory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile as emit;
    use crate::reader::read_str;

    fn jit(input: &str) -> CompiledCode {
        compile(&emit(&read_str(input).unwrap())).unwrap()
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_jit_matches_tree_eval() {
        for input in [
            "42",
            "1 + 2 * 3",
            "(1 + 2) * 3",
            "10 / 4",
            "-2 + 5",
            "8-3-2",
            "12/3/2",
            "2 * (3 + 1 / 2 - 6)",
            "1 + (2 + (3 + (4 + 5)))",
        ] {
            let expr = read_str(input).unwrap();
            assert_eq!(
                jit(input).call().to_bits(),
                expr.eval().to_bits(),
                "tier mismatch for {input:?}"
            );
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_jit_pow_calls_host() {
        assert_eq!(jit("2 ^ 10").call(), 1024.0);
        assert_eq!(jit("-3^2").call(), -9.0);
        assert_eq!(jit("2^3^2").call(), 64.0);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_jit_division_by_zero() {
        assert_eq!(jit("1 / 0").call(), f64::INFINITY);
        assert!(jit("0 / 0").call().is_nan());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_jit_routine_is_reusable() {
        let code = jit("2 ^ 10 + 1");
        for _ in 0..10 {
            assert_eq!(code.call(), 1025.0);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        let program = Bytecode {
            code: vec![42],
            max_depth: 1,
        };
        assert_eq!(compile(&program).unwrap_err(), JitError::InvalidOpcode(42));
    }

    #[test]
    fn test_truncated_program() {
        let program = Bytecode {
            code: vec![Op::Push as u8, 0, 0],
            max_depth: 1,
        };
        assert_eq!(compile(&program).unwrap_err(), JitError::Truncated);
    }

    #[test]
    fn test_underflow_rejected() {
        let program = Bytecode {
            code: vec![Op::Add as u8, Op::Ret as u8],
            max_depth: 0,
        };
        assert_eq!(compile(&program).unwrap_err(), JitError::StackUnderflow);
    }

    #[test]
    fn test_frame_size_is_aligned() {
        // Four right-nested additions spill three operands: 24 bytes of
        // slots round up to a 32-byte frame.
        let program = emit(&read_str("1 + (2 + (3 + 4))").unwrap());
        let body = lower(&program).unwrap();
        assert_eq!(body.frame_size, 32);
        assert_eq!(body.pool.len(), 4);

        // A left chain keeps one spill: one slot rounds to 16.
        let program = emit(&read_str("1 + 2 + 3 + 4").unwrap());
        assert_eq!(lower(&program).unwrap().frame_size, 16);
    }
}

//! Minimal x86-64 instruction encoder.
//!
//! One typed emitter per instruction the lowering actually uses, System V
//! ABI, SSE2 scalar doubles. Frame slots are addressed as `rbp + disp32`;
//! constants load RIP-relative out of the pool appended after the code.
//!
//! Fields whose values are unknown at emission time (the frame size, the
//! address of each constant cell, the host `pow` entry) are emitted as
//! zeroed placeholders and recorded in a relocation table under a symbolic
//! name; [`Relocs::relocate`] later patches every recorded site. Each site
//! must be patched exactly once before the code is sealed.

use rustc_hash::FxHashMap;

use super::JitError;

/// Width and interpretation of a patch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// 32-bit immediate, written as-is.
    Imm32,
    /// 32-bit RIP-relative displacement: written as
    /// `value + addend - (base + offset + 4)`.
    Rel32,
    /// 64-bit absolute address.
    Abs64,
}

#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    /// Byte offset of the field inside the emitted code.
    pub offset: usize,
    pub kind: PatchKind,
    /// Added to the relocation value before writing (used for indexed
    /// constant-pool cells).
    pub addend: i64,
}

pub struct Asm {
    code: Vec<u8>,
    sites: FxHashMap<&'static str, Vec<PatchSite>>,
}

impl Asm {
    pub fn new() -> Self {
        Asm {
            code: Vec::new(),
            sites: FxHashMap::default(),
        }
    }

    /// Hand the finished byte stream and its pending patch sites to the
    /// caller for placement and relocation.
    pub fn finish(self) -> (Vec<u8>, Relocs) {
        (self.code, Relocs { sites: self.sites })
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn emit_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Record a 32-bit placeholder at the current position under `name`.
    fn placeholder32(&mut self, name: &'static str, kind: PatchKind, addend: i64) {
        self.sites.entry(name).or_default().push(PatchSite {
            offset: self.code.len(),
            kind,
            addend,
        });
        self.emit(&[0; 4]);
    }

    /// Record a 64-bit placeholder at the current position under `name`.
    fn placeholder64(&mut self, name: &'static str) {
        self.sites.entry(name).or_default().push(PatchSite {
            offset: self.code.len(),
            kind: PatchKind::Abs64,
            addend: 0,
        });
        self.emit(&[0; 8]);
    }

    // ── Prologue / epilogue ─────────────────────────────────────────

    /// `push rbp`
    pub fn push_rbp(&mut self) {
        self.emit(&[0x55]);
    }

    /// `mov rbp, rsp`
    pub fn mov_rbp_rsp(&mut self) {
        self.emit(&[0x48, 0x89, 0xE5]);
    }

    /// `sub rsp, imm32` with the immediate recorded under `name`.
    pub fn sub_rsp_imm32(&mut self, name: &'static str) {
        self.emit(&[0x48, 0x81, 0xEC]);
        self.placeholder32(name, PatchKind::Imm32, 0);
    }

    /// `leave` (mov rsp, rbp; pop rbp)
    pub fn leave(&mut self) {
        self.emit(&[0xC9]);
    }

    /// `ret`
    pub fn ret(&mut self) {
        self.emit(&[0xC3]);
    }

    // ── Moves ───────────────────────────────────────────────────────

    /// `movsd [rbp + disp], xmm0`
    pub fn movsd_store(&mut self, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x11, 0x85]);
        self.emit_i32(disp);
    }

    /// `movsd xmm0, [rbp + disp]`
    pub fn movsd_load_xmm0(&mut self, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x10, 0x85]);
        self.emit_i32(disp);
    }

    /// `movsd xmm1, [rbp + disp]`
    pub fn movsd_load_xmm1(&mut self, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x10, 0x8D]);
        self.emit_i32(disp);
    }

    /// `movsd xmm0, [rip + rel32]`, the displacement recorded under
    /// `name` with `addend` selecting the pool cell.
    pub fn movsd_load_rip(&mut self, name: &'static str, addend: i64) {
        self.emit(&[0xF2, 0x0F, 0x10, 0x05]);
        self.placeholder32(name, PatchKind::Rel32, addend);
    }

    /// `movapd xmm0, xmm1`
    pub fn movapd_xmm0_xmm1(&mut self) {
        self.emit(&[0x66, 0x0F, 0x28, 0xC1]);
    }

    /// `movapd xmm1, xmm0`
    pub fn movapd_xmm1_xmm0(&mut self) {
        self.emit(&[0x66, 0x0F, 0x28, 0xC8]);
    }

    /// `mov rax, imm64` with the immediate recorded under `name`.
    pub fn mov_rax_imm64(&mut self, name: &'static str) {
        self.emit(&[0x48, 0xB8]);
        self.placeholder64(name);
    }

    // ── Arithmetic ──────────────────────────────────────────────────

    /// `addsd xmm0, [rbp + disp]`
    pub fn addsd_mem(&mut self, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x58, 0x85]);
        self.emit_i32(disp);
    }

    /// `mulsd xmm0, [rbp + disp]`
    pub fn mulsd_mem(&mut self, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x59, 0x85]);
        self.emit_i32(disp);
    }

    /// `subsd xmm1, xmm0`
    pub fn subsd_xmm1_xmm0(&mut self) {
        self.emit(&[0xF2, 0x0F, 0x5C, 0xC8]);
    }

    /// `divsd xmm1, xmm0`
    pub fn divsd_xmm1_xmm0(&mut self) {
        self.emit(&[0xF2, 0x0F, 0x5E, 0xC8]);
    }

    // ── Calls ───────────────────────────────────────────────────────

    /// `call rax`
    pub fn call_rax(&mut self) {
        self.emit(&[0xFF, 0xD0]);
    }
}

impl Default for Asm {
    fn default() -> Self {
        Self::new()
    }
}

/// The pending patch sites of a finished assembly.
pub struct Relocs {
    sites: FxHashMap<&'static str, Vec<PatchSite>>,
}

impl Relocs {
    /// Patch every site recorded under `name` inside `code`, which starts
    /// at absolute address `base`. A name with no sites is an error, and a
    /// name can be relocated only once.
    pub fn relocate(
        &mut self,
        name: &'static str,
        value: u64,
        base: u64,
        code: &mut [u8],
    ) -> Result<(), JitError> {
        let sites = self
            .sites
            .remove(name)
            .ok_or_else(|| JitError::UnknownRelocation(name.to_string()))?;

        for site in sites {
            match site.kind {
                PatchKind::Imm32 => {
                    let field = i32::try_from(value.wrapping_add(site.addend as u64) as i64)
                        .map_err(|_| JitError::RelocationOverflow(name.to_string()))?;
                    code[site.offset..site.offset + 4].copy_from_slice(&field.to_le_bytes());
                }
                PatchKind::Rel32 => {
                    let target = value.wrapping_add(site.addend as u64);
                    let next = base
                        .wrapping_add(site.offset as u64)
                        .wrapping_add(4);
                    let rel = target.wrapping_sub(next) as i64;
                    let field = i32::try_from(rel)
                        .map_err(|_| JitError::RelocationOverflow(name.to_string()))?;
                    code[site.offset..site.offset + 4].copy_from_slice(&field.to_le_bytes());
                }
                PatchKind::Abs64 => {
                    let field = value.wrapping_add(site.addend as u64);
                    code[site.offset..site.offset + 8].copy_from_slice(&field.to_le_bytes());
                }
            }
        }

        Ok(())
    }

    /// Verify every recorded site has been visited.
    pub fn verify_patched(&self) -> Result<(), JitError> {
        match self.sites.keys().next() {
            None => Ok(()),
            Some(name) => Err(JitError::UnpatchedRelocation(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prologue_encoding() {
        let mut asm = Asm::new();
        asm.push_rbp();
        asm.mov_rbp_rsp();
        asm.sub_rsp_imm32("stackSize");
        let (code, _) = asm.finish();
        assert_eq!(code, vec![0x55, 0x48, 0x89, 0xE5, 0x48, 0x81, 0xEC, 0, 0, 0, 0]);
    }

    #[test]
    fn test_memory_operand_encoding() {
        let mut asm = Asm::new();
        asm.movsd_store(-8);
        asm.addsd_mem(-16);
        let (code, _) = asm.finish();
        assert_eq!(&code[..4], &[0xF2, 0x0F, 0x11, 0x85]);
        assert_eq!(&code[4..8], &(-8i32).to_le_bytes());
        assert_eq!(&code[8..12], &[0xF2, 0x0F, 0x58, 0x85]);
        assert_eq!(&code[12..16], &(-16i32).to_le_bytes());
    }

    #[test]
    fn test_imm32_relocation() {
        let mut asm = Asm::new();
        asm.sub_rsp_imm32("stackSize");
        let (mut code, mut relocs) = asm.finish();
        relocs.relocate("stackSize", 48, 0, &mut code).unwrap();
        assert_eq!(&code[3..7], &48u32.to_le_bytes());
        relocs.verify_patched().unwrap();
    }

    #[test]
    fn test_rel32_relocation_is_site_relative() {
        let mut asm = Asm::new();
        asm.movsd_load_rip("data", 0);
        asm.movsd_load_rip("data", 8);
        let (mut code, mut relocs) = asm.finish();

        // Code placed at 0x1000, pool at 0x2000.
        relocs.relocate("data", 0x2000, 0x1000, &mut code).unwrap();

        let first = i32::from_le_bytes(code[4..8].try_into().unwrap());
        let second = i32::from_le_bytes(code[12..16].try_into().unwrap());
        // rel = target - (base + site + 4)
        assert_eq!(first, 0x2000 - (0x1000 + 4 + 4));
        assert_eq!(second, (0x2000 + 8) - (0x1000 + 12 + 4));
    }

    #[test]
    fn test_abs64_relocation() {
        let mut asm = Asm::new();
        asm.mov_rax_imm64("pow");
        let (mut code, mut relocs) = asm.finish();
        relocs
            .relocate("pow", 0xDEAD_BEEF_CAFE, 0, &mut code)
            .unwrap();
        assert_eq!(&code[2..10], &0xDEAD_BEEF_CAFEu64.to_le_bytes());
    }

    #[test]
    fn test_unknown_relocation() {
        let asm = Asm::new();
        let (mut code, mut relocs) = asm.finish();
        assert_eq!(
            relocs.relocate("nope", 0, 0, &mut code).unwrap_err(),
            JitError::UnknownRelocation("nope".to_string())
        );
    }

    #[test]
    fn test_unpatched_site_detected() {
        let mut asm = Asm::new();
        asm.sub_rsp_imm32("stackSize");
        let (_, relocs) = asm.finish();
        assert_eq!(
            relocs.verify_patched().unwrap_err(),
            JitError::UnpatchedRelocation("stackSize".to_string())
        );
    }

    #[test]
    fn test_relocation_overflow() {
        let mut asm = Asm::new();
        asm.sub_rsp_imm32("stackSize");
        let (mut code, mut relocs) = asm.finish();
        assert_eq!(
            relocs
                .relocate("stackSize", u64::MAX / 2, 0, &mut code)
                .unwrap_err(),
            JitError::RelocationOverflow("stackSize".to_string())
        );
    }
}

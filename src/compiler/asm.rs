//! x86-64 System V stub assembler
//!
//! A stub has the uniform entry shape `extern "C" fn(*const u64) -> u64`:
//! it loads each pre-normalized register image from the argument block into
//! its ABI register, calls the target, then widens the native result into
//! `rax` per the result's width and signedness.
//!
//! ```text
//! push rbx              ; keep rbx, realign rsp to 16
//! mov  rbx, rdi         ; argument block
//! mov  rdi, [rbx+0]     ; integer arguments in ABI order
//! movsd xmm0, [rbx+8]   ; floating point arguments
//! mov  rax, <target>    ; relocated at install time
//! call rax
//! movsx rax, al         ; result widening
//! pop  rbx
//! ret
//! ```

use crate::types::{Abi, DataModel, NativeType, RegisterAllocator};

/// Integer argument registers (encoding, needs REX.R)
const INT_REGS: [(u8, bool); 6] = [
    (7, false), // rdi
    (6, false), // rsi
    (2, false), // rdx
    (1, false), // rcx
    (0, true),  // r8
    (1, true),  // r9
];

/// Register class of one stub argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgClass {
    Integer,
    Float32,
    Float64,
}

impl ArgClass {
    pub fn of(native: NativeType) -> Self {
        match native {
            NativeType::Float => Self::Float32,
            NativeType::Double => Self::Float64,
            _ => Self::Integer,
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Absolute 64-bit call target patched at install time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: usize,
    pub target: usize,
}

/// Relocatable machine code
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    relocations: Vec<Relocation>,
}

impl CodeBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Unrelocated bytes (targets zeroed)
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Copy the code into `dst` and patch every relocation
    pub fn relocate_into(&self, dst: &mut [u8]) {
        dst[..self.code.len()].copy_from_slice(&self.code);
        for reloc in &self.relocations {
            let bytes = (reloc.target as u64).to_le_bytes();
            dst[reloc.offset..reloc.offset + 8].copy_from_slice(&bytes);
        }
    }
}

/// Byte-level x86-64 emitter
#[derive(Default)]
pub struct Assembler {
    buf: CodeBuffer,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn emit(&mut self, bytes: &[u8]) {
        self.buf.code.extend_from_slice(bytes);
    }

    pub fn push_rbx(&mut self) {
        self.emit(&[0x53]);
    }

    pub fn pop_rbx(&mut self) {
        self.emit(&[0x5B]);
    }

    pub fn mov_rbx_rdi(&mut self) {
        self.emit(&[0x48, 0x89, 0xFB]);
    }

    /// `mov <int reg n>, [rbx+disp]`
    pub fn load_int_arg(&mut self, reg: usize, disp: u8) {
        let (code, ext) = INT_REGS[reg];
        let rex = 0x48 | if ext { 0x04 } else { 0 };
        self.emit(&[rex, 0x8B, modrm_rbx_disp8(code), disp]);
    }

    /// `movss/movsd xmm<n>, [rbx+disp]`
    pub fn load_float_arg(&mut self, reg: usize, disp: u8, double: bool) {
        let prefix = if double { 0xF2 } else { 0xF3 };
        self.emit(&[prefix, 0x0F, 0x10, modrm_rbx_disp8(reg as u8), disp]);
    }

    /// `mov rax, imm64; call rax` with a relocated target
    pub fn call_absolute(&mut self, target: usize) {
        self.emit(&[0x48, 0xB8]);
        let offset = self.buf.code.len();
        self.emit(&[0; 8]);
        self.buf.relocations.push(Relocation { offset, target });
        self.emit(&[0xFF, 0xD0]);
    }

    /// Widen the native result into `rax`
    pub fn widen_result(&mut self, native: NativeType, model: DataModel) {
        match native {
            NativeType::Void => self.emit(&[0x31, 0xC0]),
            NativeType::Float => self.emit(&[0x66, 0x0F, 0x7E, 0xC0]),
            NativeType::Double => self.emit(&[0x66, 0x48, 0x0F, 0x7E, 0xC0]),
            _ => match (native.bits(model), native.is_signed()) {
                (8, true) => self.emit(&[0x48, 0x0F, 0xBE, 0xC0]),
                (8, false) => self.emit(&[0x0F, 0xB6, 0xC0]),
                (16, true) => self.emit(&[0x48, 0x0F, 0xBF, 0xC0]),
                (16, false) => self.emit(&[0x0F, 0xB7, 0xC0]),
                (32, true) => self.emit(&[0x48, 0x63, 0xC0]),
                (32, false) => self.emit(&[0x89, 0xC0]),
                _ => {}
            },
        }
    }

    pub fn ret(&mut self) {
        self.emit(&[0xC3]);
    }

    pub fn finish(self) -> CodeBuffer {
        self.buf
    }
}

#[inline]
const fn modrm_rbx_disp8(reg: u8) -> u8 {
    0x40 | ((reg & 7) << 3) | 0x03
}

/// Whether a register-only stub can express these arguments
pub fn fits_registers(args: &[ArgClass]) -> bool {
    RegisterAllocator::assign_all(Abi::SysV, args.iter().map(|a| a.is_float())).is_some()
}

/// Assemble a call stub for `target`
///
/// Returns `None` when an argument would spill to the stack.
pub fn assemble_call_stub(
    target: usize,
    args: &[ArgClass],
    result: NativeType,
    model: DataModel,
) -> Option<CodeBuffer> {
    let regs = RegisterAllocator::assign_all(Abi::SysV, args.iter().map(|a| a.is_float()))?;

    let mut asm = Assembler::new();
    asm.push_rbx();
    asm.mov_rbx_rdi();
    for (i, (class, reg)) in args.iter().zip(regs).enumerate() {
        let disp = (i * 8) as u8;
        match class {
            ArgClass::Integer => asm.load_int_arg(reg, disp),
            ArgClass::Float32 => asm.load_float_arg(reg, disp, false),
            ArgClass::Float64 => asm.load_float_arg(reg, disp, true),
        }
    }
    asm.call_absolute(target);
    asm.widen_result(result, model);
    asm.pop_rbx();
    asm.ret();
    Some(asm.finish())
}

//! Calling conventions and register assignment
//!
//! `CallingConvention` is what a signature declares; `Abi` is the register
//! discipline of the machine the stub compiler emits code for.

/// Declared calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CallingConvention {
    /// Platform C convention
    #[default]
    Default,
    /// Callee-cleans convention of 32-bit Windows
    StdCall,
}

/// Register discipline a stub is laid out for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Abi {
    /// System V AMD64 ABI (Unix x86-64)
    SysV,
    /// Microsoft x64 calling convention (Windows)
    Win64,
}

impl Abi {
    /// Integer argument registers
    #[inline]
    pub const fn max_int_registers(self) -> usize {
        match self {
            Self::SysV => 6,  // RDI, RSI, RDX, RCX, R8, R9
            Self::Win64 => 4, // RCX, RDX, R8, R9
        }
    }

    /// Floating-point argument registers
    #[inline]
    pub const fn max_fp_registers(self) -> usize {
        match self {
            Self::SysV => 8,  // XMM0-XMM7
            Self::Win64 => 4, // XMM0-XMM3, shared slots with integers
        }
    }

    /// Integer and floating-point registers share argument positions
    #[inline]
    pub const fn shares_slots(self) -> bool {
        matches!(self, Self::Win64)
    }
}

/// Register assignment for one call, in argument order
pub struct RegisterAllocator {
    abi: Abi,
    int_regs_used: usize,
    fp_regs_used: usize,
}

impl RegisterAllocator {
    #[inline]
    pub const fn new(abi: Abi) -> Self {
        Self {
            abi,
            int_regs_used: 0,
            fp_regs_used: 0,
        }
    }

    /// Check if next arg goes in register
    #[inline]
    pub fn can_use_register(&self, is_float: bool) -> bool {
        if self.abi.shares_slots() {
            self.int_regs_used + self.fp_regs_used < self.abi.max_int_registers()
        } else if is_float {
            self.fp_regs_used < self.abi.max_fp_registers()
        } else {
            self.int_regs_used < self.abi.max_int_registers()
        }
    }

    /// Claim the next register; returns its index within its class
    #[inline]
    pub fn use_register(&mut self, is_float: bool) -> usize {
        let index = if self.abi.shares_slots() {
            self.int_regs_used + self.fp_regs_used
        } else if is_float {
            self.fp_regs_used
        } else {
            self.int_regs_used
        };
        if is_float {
            self.fp_regs_used += 1;
        } else {
            self.int_regs_used += 1;
        }
        index
    }

    /// Assign every argument to a register, or `None` if any must spill
    pub fn assign_all(abi: Abi, float_flags: impl IntoIterator<Item = bool>) -> Option<Vec<usize>> {
        let mut alloc = Self::new(abi);
        let mut out = Vec::new();
        for is_float in float_flags {
            if !alloc.can_use_register(is_float) {
                return None;
            }
            out.push(alloc.use_register(is_float));
        }
        Some(out)
    }
}

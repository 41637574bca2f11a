//! Trampoline compiler - machine-code stubs in executable pages
//!
//! Design: Two phases. A stub is first assembled into a relocatable
//! `CodeBuffer` whose call target is symbolic; installation then copies the
//! code into a read-write page block, patches the target, and flips the
//! block to read-execute. A block lives as long as the binding that holds
//! its `Arc`, and is freed exactly once.
//!
//! Architecture:
//! - `asm.rs` - x86-64 System V stub assembler and code buffers
//! - `pages.rs` - Page allocator trait, OS implementation, page blocks
//! - `stub.rs` - Stub installation into sealed page blocks

mod asm;
mod pages;
mod stub;

pub use asm::{assemble_call_stub, fits_registers, ArgClass, Assembler, CodeBuffer, Relocation};
pub use pages::{PageAllocator, PageBlock, Protection, SystemPageAllocator};
pub use stub::{AttachedStubs, CompiledStub, InstalledStub, StubCompiler, StubEntry};

/// Whether generated stubs can run on this target
#[inline]
pub const fn stubs_supported() -> bool {
    cfg!(all(target_arch = "x86_64", not(target_os = "windows")))
}

#[cfg(test)]
mod tests;

//! Stub installation
//!
//! Stubs are laid out back to back at 8-byte aligned offsets in one page
//! block, which is sized for every stub plus 8 bytes of padding each and
//! rounded up to whole pages. The block is sealed read-execute once all
//! code has been copied in.

use super::asm::CodeBuffer;
use super::pages::{PageAllocator, PageBlock};
use crate::error::Result;
use crate::logging::{log_stub_bytes, log_stub_compiled};
use crate::runtime::counters;
use std::sync::Arc;

/// Per-stub alignment padding
const STUB_PADDING: usize = 8;

/// Uniform stub entry: argument register images in, widened result out
pub type StubEntry = unsafe extern "C" fn(*const u64) -> u64;

/// Assembled stub awaiting installation
#[derive(Debug, Clone)]
pub struct CompiledStub {
    pub name: Arc<str>,
    /// Human-readable signature, for diagnostics
    pub signature: String,
    pub code: CodeBuffer,
}

/// Stub copied into executable memory
#[derive(Debug, Clone)]
pub struct InstalledStub {
    pub name: Arc<str>,
    pub signature: String,
    pub address: usize,
    pub size: usize,
}

impl InstalledStub {
    /// Callable entry point
    ///
    /// # Safety
    /// The owning page block must be alive and sealed.
    #[inline]
    pub unsafe fn entry(&self) -> StubEntry {
        std::mem::transmute::<usize, StubEntry>(self.address)
    }
}

/// Stubs sharing one page block
pub struct AttachedStubs {
    pub block: Arc<PageBlock>,
    pub stubs: Vec<InstalledStub>,
}

/// Copies assembled stubs into executable pages
pub struct StubCompiler {
    allocator: Arc<dyn PageAllocator>,
}

impl StubCompiler {
    pub fn new(allocator: Arc<dyn PageAllocator>) -> Self {
        Self { allocator }
    }

    /// Bytes reserved for a set of stubs
    pub fn code_size(stubs: &[CompiledStub]) -> usize {
        stubs.iter().map(|s| s.code.len() + STUB_PADDING).sum()
    }

    /// Install stubs into a fresh page block
    pub fn attach(&self, stubs: &[CompiledStub]) -> Result<AttachedStubs> {
        let size = Self::code_size(stubs);
        let block = PageBlock::allocate(Arc::clone(&self.allocator), size)?;

        let mut installed = Vec::with_capacity(stubs.len());
        {
            // SAFETY: freshly allocated block, still read-write, no other views
            let mem = unsafe { block.bytes_mut() };
            let mut cursor = 0usize;
            for stub in stubs {
                let offset = (cursor + 7) & !7;
                let len = stub.code.len();
                stub.code.relocate_into(&mut mem[offset..offset + len]);
                installed.push(InstalledStub {
                    name: Arc::clone(&stub.name),
                    signature: stub.signature.clone(),
                    address: block.address() + offset,
                    size: len,
                });
                cursor = offset + len;
            }
        }

        // Sealing failure drops the block, which frees it
        block.seal()?;

        for (stub, info) in stubs.iter().zip(&installed) {
            log_stub_compiled(&info.name, info.address, info.size);
            log_stub_bytes(&info.name, stub.code.bytes());
            counters().stub_compiled();
        }

        Ok(AttachedStubs {
            block: Arc::new(block),
            stubs: installed,
        })
    }
}

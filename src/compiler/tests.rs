//! Test suite for the trampoline compiler

use super::*;
use crate::error::BindError;
use crate::types::{DataModel, NativeType};
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

/// Heap-backed allocator counting every operation
struct CountingAllocator {
    page_size: usize,
    fail: bool,
    allocs: AtomicUsize,
    protects: AtomicUsize,
    frees: AtomicUsize,
    last_protection: Mutex<Option<Protection>>,
}

impl CountingAllocator {
    fn new(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            page_size,
            fail: false,
            allocs: AtomicUsize::new(0),
            protects: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            last_protection: Mutex::new(None),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            page_size: 4096,
            fail: true,
            allocs: AtomicUsize::new(0),
            protects: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            last_protection: Mutex::new(None),
        })
    }

    fn layout(&self, pages: usize) -> Layout {
        Layout::from_size_align(pages * self.page_size, self.page_size).unwrap()
    }
}

impl PageAllocator for CountingAllocator {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate(&self, pages: usize, _protection: Protection) -> Option<NonNull<u8>> {
        if self.fail {
            return None;
        }
        self.allocs.fetch_add(1, Ordering::SeqCst);
        NonNull::new(unsafe { alloc_zeroed(self.layout(pages)) })
    }

    fn protect(&self, _address: NonNull<u8>, _pages: usize, protection: Protection) -> bool {
        self.protects.fetch_add(1, Ordering::SeqCst);
        *self.last_protection.lock() = Some(protection);
        true
    }

    fn free(&self, address: NonNull<u8>, pages: usize) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { dealloc(address.as_ptr(), self.layout(pages)) };
    }
}

fn stub(name: &str, len: usize) -> CompiledStub {
    let mut asm = Assembler::new();
    for _ in 0..len - 1 {
        asm.push_rbx();
    }
    asm.ret();
    CompiledStub {
        name: Arc::from(name),
        signature: "() -> void".into(),
        code: asm.finish(),
    }
}

#[test]
fn test_block_rounds_to_pages() {
    let alloc = CountingAllocator::new(4096);
    let block = PageBlock::allocate(alloc.clone(), 4097).unwrap();
    assert_eq!(block.pages(), 2);
    assert_eq!(block.len(), 8192);
    assert_eq!(alloc.allocs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_allocation_failure_is_memory_exhausted() {
    let alloc = CountingAllocator::failing();
    let err = PageBlock::allocate(alloc, 100).unwrap_err();
    assert_eq!(err, BindError::NativeMemoryExhausted { requested_bytes: 4096 });
}

#[test]
fn test_dispose_is_idempotent() {
    let alloc = CountingAllocator::new(4096);
    let block = PageBlock::allocate(alloc.clone(), 64).unwrap();
    assert!(block.dispose());
    assert!(!block.dispose());
    drop(block);
    assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_dispose_frees_once() {
    for _ in 0..16 {
        let alloc = CountingAllocator::new(4096);
        let block = Arc::new(PageBlock::allocate(alloc.clone(), 64).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let block = Arc::clone(&block);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    block.dispose()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();
        assert_eq!(wins, 1);
        drop(block);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_attach_layout() {
    let alloc = CountingAllocator::new(64);
    let compiler = StubCompiler::new(alloc.clone());
    let stubs = vec![stub("a", 5), stub("b", 13), stub("c", 1)];

    // (5 + 8) + (13 + 8) + (1 + 8) = 43 bytes, one 64-byte page
    assert_eq!(StubCompiler::code_size(&stubs), 43);
    let attached = compiler.attach(&stubs).unwrap();
    assert_eq!(attached.block.pages(), 1);

    let base = attached.block.address();
    let offsets: Vec<_> = attached.stubs.iter().map(|s| s.address - base).collect();
    assert_eq!(offsets, vec![0, 8, 24]);
    for s in &attached.stubs {
        assert_eq!(s.address % 8, 0);
    }
    assert_eq!(&*attached.stubs[1].name, "b");
    assert_eq!(attached.stubs[1].size, 13);

    // Code copied and block sealed executable
    let first = unsafe { std::slice::from_raw_parts(base as *const u8, 5) };
    assert_eq!(first, &[0x53, 0x53, 0x53, 0x53, 0xC3]);
    assert_eq!(alloc.protects.load(Ordering::SeqCst), 1);
    assert_eq!(*alloc.last_protection.lock(), Some(Protection::ReadExecute));
}

#[test]
fn test_attach_spans_pages() {
    let alloc = CountingAllocator::new(64);
    let compiler = StubCompiler::new(alloc);
    let stubs: Vec<_> = (0..6).map(|i| stub(&format!("s{}", i), 20)).collect();
    let attached = compiler.attach(&stubs).unwrap();
    // 6 * 28 = 168 bytes -> 3 pages
    assert_eq!(attached.block.pages(), 3);
}

#[test]
fn test_block_freed_with_last_owner() {
    let alloc = CountingAllocator::new(4096);
    let attached = StubCompiler::new(alloc.clone()).attach(&[stub("x", 4)]).unwrap();
    let extra = Arc::clone(&attached.block);
    drop(attached);
    assert_eq!(alloc.frees.load(Ordering::SeqCst), 0);
    drop(extra);
    assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
}

#[test]
fn test_relocation_patched_on_install() {
    let code = assemble_call_stub(0x1122_3344_5566_7788, &[], NativeType::Void, DataModel::LP64).unwrap();
    assert_eq!(code.relocations().len(), 1);
    let reloc = code.relocations()[0];
    assert_eq!(&code.bytes()[reloc.offset..reloc.offset + 8], &[0; 8]);

    let mut out = vec![0u8; code.len()];
    code.relocate_into(&mut out);
    assert_eq!(
        &out[reloc.offset..reloc.offset + 8],
        &0x1122_3344_5566_7788u64.to_le_bytes()
    );
}

#[test]
fn test_stub_encoding() {
    let args = [ArgClass::Integer, ArgClass::Float64, ArgClass::Integer, ArgClass::Float32];
    let code = assemble_call_stub(0, &args, NativeType::UChar, DataModel::LP64).unwrap();
    let expected: Vec<u8> = [
        &[0x53][..],                         // push rbx
        &[0x48, 0x89, 0xFB],                 // mov rbx, rdi
        &[0x48, 0x8B, 0x7B, 0x00],           // mov rdi, [rbx+0]
        &[0xF2, 0x0F, 0x10, 0x43, 0x08],     // movsd xmm0, [rbx+8]
        &[0x48, 0x8B, 0x73, 0x10],           // mov rsi, [rbx+16]
        &[0xF3, 0x0F, 0x10, 0x4B, 0x18],     // movss xmm1, [rbx+24]
        &[0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0], // mov rax, imm64
        &[0xFF, 0xD0],                       // call rax
        &[0x0F, 0xB6, 0xC0],                 // movzx eax, al
        &[0x5B, 0xC3],                       // pop rbx; ret
    ]
    .concat();
    assert_eq!(code.bytes(), &expected[..]);
}

#[test]
fn test_extended_registers_use_rex_r() {
    let args = [ArgClass::Integer; 6];
    let code = assemble_call_stub(0, &args, NativeType::SLongLong, DataModel::LP64).unwrap();
    let bytes = code.bytes();
    // mov r8, [rbx+32]; mov r9, [rbx+40]
    assert!(bytes.windows(4).any(|w| w == [0x4C, 0x8B, 0x43, 0x20]));
    assert!(bytes.windows(4).any(|w| w == [0x4C, 0x8B, 0x4B, 0x28]));
}

#[test]
fn test_result_widening_follows_data_model() {
    let mut asm = Assembler::new();
    asm.widen_result(NativeType::SLong, DataModel::LLP64);
    assert_eq!(asm.finish().bytes(), &[0x48, 0x63, 0xC0]);

    let mut asm = Assembler::new();
    asm.widen_result(NativeType::SLong, DataModel::LP64);
    assert!(asm.finish().is_empty());
}

#[test]
fn test_register_overflow_rejected() {
    assert!(fits_registers(&[ArgClass::Integer; 6]));
    assert!(!fits_registers(&[ArgClass::Integer; 7]));
    assert!(fits_registers(&[ArgClass::Float64; 8]));
    assert!(!fits_registers(&[ArgClass::Float64; 9]));
    assert!(assemble_call_stub(0, &[ArgClass::Integer; 7], NativeType::SInt, DataModel::LP64).is_none());
}

#[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
mod native {
    use super::*;

    extern "C" fn mixed(a: i32, b: f64, c: u8, d: f32) -> i16 {
        (a as f64 + b + c as f64 + d as f64) as i16
    }

    extern "C" fn negate_byte(v: i8) -> i8 {
        v.wrapping_neg()
    }

    #[test]
    fn test_installed_stub_calls_target() {
        let compiler = StubCompiler::new(Arc::new(SystemPageAllocator::new()));
        let args = [ArgClass::Integer, ArgClass::Float64, ArgClass::Integer, ArgClass::Float32];
        let code = assemble_call_stub(mixed as usize, &args, NativeType::SShort, DataModel::host()).unwrap();
        let attached = compiler
            .attach(&[CompiledStub {
                name: Arc::from("mixed"),
                signature: "(int, double, uchar, float) -> short".into(),
                code,
            }])
            .unwrap();

        let block = [
            (-40i64) as u64,
            1.5f64.to_bits(),
            200u64,
            (0.5f32).to_bits() as u64,
        ];
        let out = unsafe { (attached.stubs[0].entry())(block.as_ptr()) };
        assert_eq!(out as i64, 162);
    }

    #[test]
    fn test_installed_stub_sign_extends() {
        let compiler = StubCompiler::new(Arc::new(SystemPageAllocator::new()));
        let code = assemble_call_stub(
            negate_byte as usize,
            &[ArgClass::Integer],
            NativeType::SChar,
            DataModel::host(),
        )
        .unwrap();
        let attached = compiler
            .attach(&[CompiledStub {
                name: Arc::from("negate_byte"),
                signature: "(char) -> char".into(),
                code,
            }])
            .unwrap();
        let block = [5u64];
        let out = unsafe { (attached.stubs[0].entry())(block.as_ptr()) };
        assert_eq!(out as i64, -5);
    }
}

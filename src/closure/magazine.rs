//! Magazines - page-backed batches of closure trampolines
//!
//! Every slot of a magazine is prepared with libffi while the pages are
//! still writable; the block is then sealed read+execute and slots are
//! handed out with a single atomic increment.

use super::shape::ClosureShape;
use super::Callable;
use crate::compiler::{PageAllocator, PageBlock};
use crate::error::{BindError, Result};
use crate::invoke::ArgSlot;
use crate::logging::{log_closure_error, log_magazine_alloc};
use crate::runtime::counters;
use crate::types::Value;
use libffi::low::{self, ffi_cif, ffi_closure, CodePtr};
use parking_lot::RwLock;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Bytes reserved per trampoline
#[inline]
pub const fn slot_stride() -> usize {
    (std::mem::size_of::<ffi_closure>() + 15) & !15
}

/// One native entry point and the callable it currently serves
pub struct ClosureSlot {
    code: usize,
    index: usize,
    shape: Arc<ClosureShape>,
    target: RwLock<Option<Weak<dyn Callable>>>,
}

impl ClosureSlot {
    fn new(code: usize, index: usize, shape: Arc<ClosureShape>) -> Self {
        Self {
            code,
            index,
            shape,
            target: RwLock::new(None),
        }
    }

    /// Native function pointer
    #[inline]
    pub fn code(&self) -> usize {
        self.code
    }

    /// Position inside the owning magazine
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn bind(&self, callable: &Arc<dyn Callable>) {
        *self.target.write() = Some(Arc::downgrade(callable));
    }

    pub(crate) fn unbind(&self) {
        *self.target.write() = None;
    }

    /// Slot still dispatches to this callable
    pub fn is_bound_to(&self, callable: &Arc<dyn Callable>) -> bool {
        self.target
            .read()
            .as_ref()
            .map_or(false, |weak| same_callable(weak, callable))
    }

    fn dispatch(&self, args: *const *const c_void) -> Result<u64> {
        let callable = self
            .target
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| BindError::mismatch("live callable", "reclaimed closure slot"))?;
        // SAFETY: libffi passes one pointer per parameter of the prepared cif
        let values = unsafe { self.shape.arguments(args)? };
        match callable.call(&values)? {
            Value::Void => Ok(0),
            value => self.shape.result_image(&value),
        }
    }
}

impl std::fmt::Debug for ClosureSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureSlot")
            .field("code", &format_args!("{:#x}", self.code))
            .field("index", &self.index)
            .finish()
    }
}

/// Weak and strong handles name the same allocation and the weak one is alive
#[inline]
pub(crate) fn same_callable(weak: &Weak<dyn Callable>, callable: &Arc<dyn Callable>) -> bool {
    weak.strong_count() > 0 && weak.as_ptr() as *const () == Arc::as_ptr(callable) as *const ()
}

/// Entry point libffi calls for every trampoline
unsafe extern "C" fn closure_entry(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    slot: &ClosureSlot,
) {
    // Unwinding into native frames is undefined
    let raw = match catch_unwind(AssertUnwindSafe(|| slot.dispatch(args))) {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            log_closure_error(slot.code, &err.to_string());
            0
        }
        Err(_) => {
            log_closure_error(slot.code, "callback panicked");
            0
        }
    };
    ArgSlot::write_result(result, raw, slot.shape.result_native());
}

/// Page block carved into prepared closure slots
pub struct Magazine {
    block: PageBlock,
    slots: Vec<Arc<ClosureSlot>>,
    next: AtomicUsize,
}

impl Magazine {
    pub fn allocate(
        allocator: Arc<dyn PageAllocator>,
        pages: usize,
        shape: &Arc<ClosureShape>,
    ) -> Result<Self> {
        let bytes = pages.max(1) * allocator.page_size();
        let block = PageBlock::allocate(allocator, bytes)?;
        let stride = slot_stride();
        let count = block.len() / stride;
        if count == 0 {
            return Err(BindError::NativeMemoryExhausted {
                requested_bytes: stride,
            });
        }

        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let code = block.address() + index * stride;
            let slot = Arc::new(ClosureSlot::new(code, index, Arc::clone(shape)));
            // SAFETY: the slot memory is writable and owned by `block`; the
            // cif lives in `shape` and the userdata in `slot`, both kept
            // alive by this magazine for as long as the block is mapped
            let prepared = unsafe {
                low::prep_closure(
                    code as *mut ffi_closure,
                    shape.interface().as_raw(),
                    closure_entry,
                    Arc::as_ptr(&slot),
                    CodePtr(code as *mut c_void),
                )
            };
            prepared.map_err(|e| {
                BindError::UnsupportedSignature(format!("libffi rejected closure: {:?}", e))
            })?;
            slots.push(slot);
        }

        block.seal()?;
        log_magazine_alloc(count, block.pages());
        counters().magazine_allocated();

        Ok(Self {
            block,
            slots,
            next: AtomicUsize::new(0),
        })
    }

    /// Next never-used slot, or `None` once exhausted
    #[inline]
    pub fn next_slot(&self) -> Option<Arc<ClosureSlot>> {
        if self.next.load(Ordering::Acquire) >= self.slots.len() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        self.slots.get(index).cloned()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn remaining(&self) -> usize {
        self.slots
            .len()
            .saturating_sub(self.next.load(Ordering::Acquire))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn address(&self) -> usize {
        self.block.address()
    }
}

impl std::fmt::Debug for Magazine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Magazine")
            .field("address", &format_args!("{:#x}", self.block.address()))
            .field("capacity", &self.capacity())
            .field("remaining", &self.remaining())
            .finish()
    }
}

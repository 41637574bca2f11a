//! libffi call interfaces
//!
//! Design: A `CallInterface` owns a prepared `ffi_cif` together with the
//! type array it points into, so the pair can be shared between threads and
//! reused for every call of one signature. Arguments are handed to libffi
//! as pointers into `ArgSlot` unions written at their exact native width.

use crate::error::{BindError, Result};
use crate::types::{CallingConvention, DataModel, NativeType};
use libffi::low::{self, ffi_abi, ffi_cif, ffi_type, CodePtr};
use libffi::raw;
use std::ffi::c_void;
use std::ptr::addr_of_mut;

/// One argument or result, at its native width
#[repr(C)]
#[derive(Clone, Copy)]
pub union ArgSlot {
    pub i8: i8,
    pub u8: u8,
    pub i16: i16,
    pub u16: u16,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub word: usize,
}

impl ArgSlot {
    #[inline]
    pub const fn zero() -> Self {
        Self { u64: 0 }
    }

    /// Slot holding a register image at the width of `native`
    #[inline]
    pub fn from_register(raw: u64, native: NativeType, model: DataModel) -> Self {
        match native {
            NativeType::Float => Self { u32: raw as u32 },
            NativeType::Double => Self { u64: raw },
            NativeType::Void => Self::zero(),
            NativeType::Address => Self { word: raw as usize },
            _ => match native.size(model) {
                1 => Self { u8: raw as u8 },
                2 => Self { u16: raw as u16 },
                4 => Self { u32: raw as u32 },
                _ => Self { u64: raw },
            },
        }
    }

    /// Register image of a value libffi wrote back as `native`
    ///
    /// Integers narrower than a register arrive widened to `ffi_arg`.
    #[inline]
    pub fn to_register(self, native: NativeType, model: DataModel) -> u64 {
        // SAFETY: every variant is plain old data over initialized bytes
        unsafe {
            match native {
                NativeType::Void => 0,
                NativeType::Float => self.u32 as u64,
                NativeType::Double => self.u64,
                _ if native.size(model) > std::mem::size_of::<usize>() => self.u64,
                _ => self.word as u64,
            }
        }
    }

    /// Read an argument of type `native` from a libffi argument pointer
    ///
    /// # Safety
    /// `ptr` must point to a live value of the given native type.
    #[inline]
    pub unsafe fn read(ptr: *const c_void, native: NativeType, model: DataModel) -> u64 {
        match native {
            NativeType::Void => 0,
            NativeType::Float => (*(ptr as *const f32)).to_bits() as u64,
            NativeType::Double => (*(ptr as *const f64)).to_bits(),
            NativeType::Address => *(ptr as *const usize) as u64,
            _ => match (native.size(model), native.is_signed()) {
                (1, true) => *(ptr as *const i8) as i64 as u64,
                (1, false) => *(ptr as *const u8) as u64,
                (2, true) => *(ptr as *const i16) as i64 as u64,
                (2, false) => *(ptr as *const u16) as u64,
                (4, true) => *(ptr as *const i32) as i64 as u64,
                (4, false) => *(ptr as *const u32) as u64,
                _ => *(ptr as *const u64),
            },
        }
    }

    /// Write a closure result of type `native` where libffi expects it
    ///
    /// # Safety
    /// `ptr` must be libffi's closure result buffer.
    #[inline]
    pub unsafe fn write_result(ptr: *mut u64, raw: u64, native: NativeType) {
        match native {
            NativeType::Float => *(ptr as *mut u32) = raw as u32,
            NativeType::Void => {}
            // ffi_arg-wide, already extended per signedness
            _ => *ptr = raw,
        }
    }
}

impl Default for ArgSlot {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Debug for ArgSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SAFETY: u64 covers the whole union
        write!(f, "ArgSlot({:#x})", unsafe { self.u64 })
    }
}

/// libffi type descriptor for a native type
pub fn ffi_type_of(native: NativeType, model: DataModel) -> *mut ffi_type {
    match native {
        NativeType::Void => addr_of_mut!(low::types::void),
        NativeType::Float => addr_of_mut!(low::types::float),
        NativeType::Double => addr_of_mut!(low::types::double),
        NativeType::Address => addr_of_mut!(low::types::pointer),
        _ => match (native.size(model), native.is_signed()) {
            (1, true) => addr_of_mut!(low::types::sint8),
            (1, false) => addr_of_mut!(low::types::uint8),
            (2, true) => addr_of_mut!(low::types::sint16),
            (2, false) => addr_of_mut!(low::types::uint16),
            (4, true) => addr_of_mut!(low::types::sint32),
            (4, false) => addr_of_mut!(low::types::uint32),
            (_, true) => addr_of_mut!(low::types::sint64),
            (_, false) => addr_of_mut!(low::types::uint64),
        },
    }
}

fn ffi_abi_of(convention: CallingConvention) -> ffi_abi {
    match convention {
        #[cfg(all(target_arch = "x86", windows))]
        CallingConvention::StdCall => low::ffi_abi_FFI_STDCALL,
        _ => low::ffi_abi_FFI_DEFAULT_ABI,
    }
}

/// Prepared call interface
pub struct CallInterface {
    cif: Box<ffi_cif>,
    _arg_types: Box<[*mut ffi_type]>,
    args: Vec<NativeType>,
    result: NativeType,
    model: DataModel,
}

// SAFETY: the cif is never mutated after preparation and only points at
// the owned type array and libffi's static type descriptors
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Interface for a fixed-arity signature
    pub fn new(
        args: &[NativeType],
        result: NativeType,
        convention: CallingConvention,
        model: DataModel,
    ) -> Result<Self> {
        Self::prepare(args, None, result, convention, model)
    }

    /// Interface for one variadic call; the first `fixed` arguments are named
    pub fn variadic(
        args: &[NativeType],
        fixed: usize,
        result: NativeType,
        model: DataModel,
    ) -> Result<Self> {
        Self::prepare(args, Some(fixed), result, CallingConvention::Default, model)
    }

    fn prepare(
        args: &[NativeType],
        fixed: Option<usize>,
        result: NativeType,
        convention: CallingConvention,
        model: DataModel,
    ) -> Result<Self> {
        let mut arg_types: Box<[*mut ffi_type]> =
            args.iter().map(|a| ffi_type_of(*a, model)).collect();
        let mut cif: Box<ffi_cif> = Box::default();
        let rtype = ffi_type_of(result, model);
        let abi = ffi_abi_of(convention);

        // SAFETY: cif and the type array are owned and outlive every call
        let prepared = unsafe {
            match fixed {
                None => low::prep_cif(&mut *cif, abi, args.len(), rtype, arg_types.as_mut_ptr()),
                Some(fixed) => low::prep_cif_var(
                    &mut *cif,
                    abi,
                    fixed,
                    args.len(),
                    rtype,
                    arg_types.as_mut_ptr(),
                ),
            }
        };
        prepared.map_err(|e| {
            BindError::UnsupportedSignature(format!("libffi rejected call interface: {:?}", e))
        })?;

        Ok(Self {
            cif,
            _arg_types: arg_types,
            args: args.to_vec(),
            result,
            model,
        })
    }

    #[inline]
    pub fn args(&self) -> &[NativeType] {
        &self.args
    }

    #[inline]
    pub fn result(&self) -> NativeType {
        self.result
    }

    /// Raw cif for closure preparation
    #[inline]
    pub(crate) fn as_raw(&self) -> *mut ffi_cif {
        &*self.cif as *const ffi_cif as *mut ffi_cif
    }

    /// Call `function` with prepared slots; returns the result register image
    ///
    /// # Safety
    /// `function` must have the native signature this interface describes,
    /// and every pointer held in `slots` must be valid for the call.
    #[inline]
    pub unsafe fn call(&self, function: usize, slots: &mut [ArgSlot]) -> u64 {
        debug_assert_eq!(slots.len(), self.args.len());
        let mut ptrs: smallvec::SmallVec<[*mut c_void; 8]> = slots
            .iter_mut()
            .map(|s| s as *mut ArgSlot as *mut c_void)
            .collect();
        let mut ret = ArgSlot::zero();
        let code = CodePtr(function as *mut c_void);
        raw::ffi_call(
            self.as_raw(),
            Some(*code.as_safe_fun()),
            &mut ret as *mut ArgSlot as *mut c_void,
            ptrs.as_mut_ptr(),
        );
        ret.to_register(self.result, self.model)
    }
}

//! Native ABI type descriptors
//!
//! Widths of `long` and pointers come from a `DataModel` rather than the
//! build target, so a runtime can describe a foreign data model.

use serde::{Deserialize, Serialize};

/// Sizes of the platform-dependent C types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataModel {
    /// Pointer width in bytes
    pub address_size: usize,
    /// `long` width in bytes
    pub long_size: usize,
}

impl DataModel {
    /// 64-bit Unix
    pub const LP64: Self = Self { address_size: 8, long_size: 8 };
    /// 64-bit Windows
    pub const LLP64: Self = Self { address_size: 8, long_size: 4 };
    /// 32-bit targets
    pub const ILP32: Self = Self { address_size: 4, long_size: 4 };

    /// Data model of the build target
    pub const fn host() -> Self {
        Self {
            address_size: core::mem::size_of::<usize>(),
            long_size: core::mem::size_of::<core::ffi::c_long>(),
        }
    }
}

impl Default for DataModel {
    fn default() -> Self {
        Self::host()
    }
}

/// Native ABI type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NativeType {
    Void,
    SChar,
    UChar,
    SShort,
    UShort,
    SInt,
    UInt,
    SLong,
    ULong,
    SLongLong,
    ULongLong,
    Float,
    Double,
    Address,
}

impl NativeType {
    /// Size in bytes under the given data model
    #[inline]
    pub const fn size(self, model: DataModel) -> usize {
        match self {
            Self::Void => 0,
            Self::SChar | Self::UChar => 1,
            Self::SShort | Self::UShort => 2,
            Self::SInt | Self::UInt | Self::Float => 4,
            Self::SLong | Self::ULong => model.long_size,
            Self::SLongLong | Self::ULongLong | Self::Double => 8,
            Self::Address => model.address_size,
        }
    }

    /// Alignment requirement
    #[inline]
    pub const fn align(self, model: DataModel) -> usize {
        match self {
            Self::Void => 1,
            _ => self.size(model),
        }
    }

    /// Width in bits
    #[inline]
    pub const fn bits(self, model: DataModel) -> u32 {
        (self.size(model) * 8) as u32
    }

    /// Signed integer or floating point
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::SChar | Self::SShort | Self::SInt | Self::SLong | Self::SLongLong
                | Self::Float | Self::Double
        )
    }

    /// Integer type, including addresses
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::SChar | Self::UChar | Self::SShort | Self::UShort | Self::SInt | Self::UInt
                | Self::SLong | Self::ULong | Self::SLongLong | Self::ULongLong | Self::Address
        )
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::SChar => "signed char",
            Self::UChar => "unsigned char",
            Self::SShort => "short",
            Self::UShort => "unsigned short",
            Self::SInt => "int",
            Self::UInt => "unsigned int",
            Self::SLong => "long",
            Self::ULong => "unsigned long",
            Self::SLongLong => "long long",
            Self::ULongLong => "unsigned long long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Address => "void*",
        }
    }
}

/// Resolved native descriptor: type plus its fixed width and signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeDescriptor {
    pub native: NativeType,
    pub size: usize,
    pub align: usize,
    pub signed: bool,
}

impl NativeDescriptor {
    pub const fn new(native: NativeType, model: DataModel) -> Self {
        Self {
            native,
            size: native.size(model),
            align: native.align(model),
            signed: native.is_signed(),
        }
    }
}

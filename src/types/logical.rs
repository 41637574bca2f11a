//! Logical (managed-side) type shapes
//!
//! The closed set of shapes a signature may declare. Anything that is not a
//! fixed-width scalar, address, text, primitive array, struct reference,
//! enum, enum set or callback must be described through a `Named` type and
//! resolved by an alias annotation or a custom type mapper.

use super::abi::CallingConvention;
use super::native::NativeType;
use std::fmt;
use std::sync::Arc;

/// Logical type of a parameter, result or variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Void,
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    /// Raw address / pointer value
    Address,
    /// Character sequence passed as an encoded NUL-terminated buffer
    Text,
    /// Primitive array passed by reference
    Array(ElementType),
    /// Opaque struct passed by reference as its backing bytes
    Struct(Arc<StructLayout>),
    Enum(Arc<EnumType>),
    EnumSet(Arc<EnumType>),
    /// Managed callable passed as a native function pointer
    Callback(Arc<CallbackType>),
    /// Nominal type needing an alias annotation or a type mapper
    Named(Arc<str>),
}

impl LogicalType {
    pub fn named(name: &str) -> Self {
        Self::Named(Arc::from(name))
    }

    /// Integer representation used by the numeric marshalling rules
    pub fn integer_kind(&self) -> Option<IntegerKind> {
        match self {
            Self::Boolean => Some(IntegerKind::Boolean),
            Self::Byte => Some(IntegerKind::Byte),
            Self::Short => Some(IntegerKind::Short),
            Self::Char => Some(IntegerKind::Char),
            Self::Int => Some(IntegerKind::Int),
            Self::Long | Self::Address => Some(IntegerKind::Long),
            _ => None,
        }
    }

    /// Integer, boolean, floating point or address
    pub fn is_scalar(&self) -> bool {
        self.integer_kind().is_some() || matches!(self, Self::Float | Self::Double)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Boolean => write!(f, "boolean"),
            Self::Byte => write!(f, "byte"),
            Self::Short => write!(f, "short"),
            Self::Char => write!(f, "char"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Address => write!(f, "address"),
            Self::Text => write!(f, "text"),
            Self::Array(elem) => write!(f, "{}[]", elem.name()),
            Self::Struct(layout) => write!(f, "struct {}", layout.name),
            Self::Enum(ty) => write!(f, "enum {}", ty.name()),
            Self::EnumSet(ty) => write!(f, "set<{}>", ty.name()),
            Self::Callback(_) => write!(f, "callback"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Logical integer representation (width and signedness of the managed value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerKind {
    Boolean,
    Byte,
    Short,
    /// Unsigned 16-bit
    Char,
    Int,
    Long,
}

impl IntegerKind {
    pub const ALL: [IntegerKind; 6] = [
        IntegerKind::Boolean,
        IntegerKind::Byte,
        IntegerKind::Short,
        IntegerKind::Char,
        IntegerKind::Int,
        IntegerKind::Long,
    ];

    /// Kinds that fit in a 32-bit register slot
    #[inline]
    pub const fn is_narrow(self) -> bool {
        !matches!(self, Self::Long)
    }
}

/// Element type of a primitive array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ElementType {
    /// Native element type; arrays always use fixed-width elements
    pub const fn native(self) -> NativeType {
        match self {
            Self::Byte => NativeType::SChar,
            Self::Short => NativeType::SShort,
            Self::Int => NativeType::SInt,
            Self::Long => NativeType::SLongLong,
            Self::Float => NativeType::Float,
            Self::Double => NativeType::Double,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

/// Opaque struct layout: only size and alignment cross the boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructLayout {
    pub name: Arc<str>,
    pub size: usize,
    pub align: usize,
}

impl StructLayout {
    pub fn new(name: &str, size: usize, align: usize) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name),
            size,
            align: align.max(1),
        })
    }
}

/// Declared enum: ordered constants with integer values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: Arc<str>,
    constants: Vec<(Arc<str>, i64)>,
}

impl EnumType {
    /// Enum with explicit integer values
    pub fn new(name: &str, constants: &[(&str, i64)]) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name),
            constants: constants
                .iter()
                .map(|(n, v)| (Arc::from(*n), *v))
                .collect(),
        })
    }

    /// Enum whose values are the declaration ordinals
    pub fn ordinal(name: &str, constants: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name),
            constants: constants
                .iter()
                .enumerate()
                .map(|(i, n)| (Arc::from(*n), i as i64))
                .collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn constant_name(&self, index: usize) -> Option<&str> {
        self.constants.get(index).map(|(n, _)| &**n)
    }

    pub fn value(&self, index: usize) -> Option<i64> {
        self.constants.get(index).map(|(_, v)| *v)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.constants.iter().position(|(n, _)| &**n == name)
    }

    pub fn constants(&self) -> impl Iterator<Item = (usize, &str, i64)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(i, (n, v))| (i, &**n, *v))
    }
}

/// Native shape of a callback parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackType {
    pub params: Vec<LogicalType>,
    pub result: LogicalType,
    pub convention: CallingConvention,
}

impl CallbackType {
    pub fn new(params: Vec<LogicalType>, result: LogicalType) -> Arc<Self> {
        Arc::new(Self {
            params,
            result,
            convention: CallingConvention::Default,
        })
    }
}

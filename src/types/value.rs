//! Managed-side values crossing the binding boundary

use super::logical::{ElementType, EnumType, StructLayout};
use crate::closure::Callable;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Argument or result value
#[derive(Clone)]
pub enum Value {
    Void,
    /// Null reference; marshals to a null pointer
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Address(usize),
    Text(Arc<str>),
    Array(ArrayValue),
    Struct(StructValue),
    Enum(EnumConstant),
    EnumSet(EnumSetValue),
    Callback(Arc<dyn Callable>),
    /// Host object handled by a custom converter
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn text(s: &str) -> Self {
        Self::Text(Arc::from(s))
    }

    /// Integer view of integral values (booleans are 0/1)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Bool(b) => Some(b as i64),
            Self::Byte(v) => Some(v as i64),
            Self::Short(v) => Some(v as i64),
            Self::Char(v) => Some(v as i64),
            Self::Int(v) => Some(v as i64),
            Self::Long(v) => Some(v),
            Self::Address(v) => Some(v as i64),
            Self::Null => Some(0),
            _ => None,
        }
    }

    /// Floating view of numeric values
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short shape name for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Char(_) => "char",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Address(_) => "address",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Enum(_) => "enum",
            Self::EnumSet(_) => "enum set",
            Self::Callback(_) => "callback",
            Self::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Address(a), Self::Address(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Struct(a), Self::Struct(b)) => Arc::ptr_eq(&a.bytes, &b.bytes),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::EnumSet(a), Self::EnumSet(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Self::Object(a), Self::Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "Void"),
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({})", v),
            Self::Byte(v) => write!(f, "Byte({})", v),
            Self::Short(v) => write!(f, "Short({})", v),
            Self::Char(v) => write!(f, "Char({})", v),
            Self::Int(v) => write!(f, "Int({})", v),
            Self::Long(v) => write!(f, "Long({})", v),
            Self::Float(v) => write!(f, "Float({})", v),
            Self::Double(v) => write!(f, "Double({})", v),
            Self::Address(v) => write!(f, "Address({:#x})", v),
            Self::Text(v) => write!(f, "Text({:?})", v),
            Self::Array(v) => write!(f, "Array({:?})", &*v.data.lock()),
            Self::Struct(v) => write!(f, "Struct({})", v.layout.name),
            Self::Enum(v) => write!(f, "Enum({})", v.name()),
            Self::EnumSet(v) => write!(f, "EnumSet({:?})", v.members),
            Self::Callback(c) => write!(f, "Callback({:p})", Arc::as_ptr(c) as *const ()),
            Self::Object(o) => write!(f, "Object({:p})", Arc::as_ptr(o) as *const ()),
        }
    }
}

/// Typed backing storage of a primitive array
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl ArrayData {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Byte(_) => ElementType::Byte,
            Self::Short(_) => ElementType::Short,
            Self::Int(_) => ElementType::Int,
            Self::Long(_) => ElementType::Long,
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Byte(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write elements in native byte order
    pub fn write_ne_bytes(&self, out: &mut [u8]) {
        macro_rules! put {
            ($v:expr, $size:expr) => {
                for (chunk, x) in out.chunks_exact_mut($size).zip($v.iter()) {
                    chunk.copy_from_slice(&x.to_ne_bytes());
                }
            };
        }
        match self {
            Self::Byte(v) => put!(v, 1),
            Self::Short(v) => put!(v, 2),
            Self::Int(v) => put!(v, 4),
            Self::Long(v) => put!(v, 8),
            Self::Float(v) => put!(v, 4),
            Self::Double(v) => put!(v, 8),
        }
    }

    /// Overwrite elements from native byte order
    pub fn read_ne_bytes(&mut self, bytes: &[u8]) {
        macro_rules! get {
            ($v:expr, $ty:ty, $size:expr) => {
                for (x, chunk) in $v.iter_mut().zip(bytes.chunks_exact($size)) {
                    let mut raw = [0u8; $size];
                    raw.copy_from_slice(chunk);
                    *x = <$ty>::from_ne_bytes(raw);
                }
            };
        }
        match self {
            Self::Byte(v) => get!(v, i8, 1),
            Self::Short(v) => get!(v, i16, 2),
            Self::Int(v) => get!(v, i32, 4),
            Self::Long(v) => get!(v, i64, 8),
            Self::Float(v) => get!(v, f32, 4),
            Self::Double(v) => get!(v, f64, 8),
        }
    }
}

/// Shared, mutable primitive array; native writes are visible to every clone
#[derive(Clone)]
pub struct ArrayValue {
    data: Arc<Mutex<ArrayData>>,
}

impl ArrayValue {
    pub fn new(data: ArrayData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn bytes(v: Vec<i8>) -> Self {
        Self::new(ArrayData::Byte(v))
    }

    pub fn shorts(v: Vec<i16>) -> Self {
        Self::new(ArrayData::Short(v))
    }

    pub fn ints(v: Vec<i32>) -> Self {
        Self::new(ArrayData::Int(v))
    }

    pub fn longs(v: Vec<i64>) -> Self {
        Self::new(ArrayData::Long(v))
    }

    pub fn floats(v: Vec<f32>) -> Self {
        Self::new(ArrayData::Float(v))
    }

    pub fn doubles(v: Vec<f64>) -> Self {
        Self::new(ArrayData::Double(v))
    }

    pub fn element_type(&self) -> ElementType {
        self.data.lock().element_type()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> ArrayData {
        self.data.lock().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ArrayData) -> R) -> R {
        f(&mut self.data.lock())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Struct passed by reference as raw bytes
#[derive(Clone)]
pub struct StructValue {
    pub layout: Arc<StructLayout>,
    pub bytes: Arc<Mutex<Vec<u8>>>,
}

impl StructValue {
    /// Zero-filled struct of the layout's size
    pub fn new(layout: Arc<StructLayout>) -> Self {
        let bytes = vec![0u8; layout.size];
        Self {
            layout,
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

/// One constant of a declared enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumConstant {
    pub ty: Arc<EnumType>,
    pub index: usize,
}

impl EnumConstant {
    pub fn new(ty: &Arc<EnumType>, name: &str) -> Option<Self> {
        ty.index_of(name).map(|index| Self {
            ty: Arc::clone(ty),
            index,
        })
    }

    pub fn name(&self) -> &str {
        self.ty.constant_name(self.index).unwrap_or("?")
    }
}

/// Set of constants of a declared enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSetValue {
    pub ty: Arc<EnumType>,
    pub members: BTreeSet<usize>,
}

impl EnumSetValue {
    pub fn empty(ty: &Arc<EnumType>) -> Self {
        Self {
            ty: Arc::clone(ty),
            members: BTreeSet::new(),
        }
    }

    /// Set from constant names; `None` if any name is not declared
    pub fn of(ty: &Arc<EnumType>, names: &[&str]) -> Option<Self> {
        let mut set = Self::empty(ty);
        for name in names {
            set.members.insert(ty.index_of(name)?);
        }
        Some(set)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ty
            .index_of(name)
            .map_or(false, |i| self.members.contains(&i))
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        self.members.is_superset(&other.members)
    }
}

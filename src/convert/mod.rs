//! Conversion pipeline - logical values to and from their native carriers
//!
//! Design: A converter translates between one logical type and a simpler
//! "carrier" logical type that the numeric marshalling rules understand
//! (an enum becomes an `Int`, text becomes a byte array). Selection order
//! for a parameter or result:
//! 1. Explicit converter attached to the declaration
//! 2. Custom type mapper chain (first mapper returning a converter wins)
//! 3. Built-in converters (enums, enum sets, text)
//!
//! Converters flagged `cacheable` are memoized per (logical type,
//! annotation set) and shared between threads.
//!
//! Architecture:
//! - `enums.rs` - Enum mapper registry, enum and enum-set converters
//! - `text.rs` - Encodings, text parameter and result converters
//! - `mapper.rs` - Type mapper trait, composition and caching

mod enums;
mod mapper;
mod text;

pub use enums::{EnumConverter, EnumMapper, EnumSetConverter, UNKNOWN_NATIVE_VALUE};
pub use mapper::{
    BuiltinTypeMapper, CachingTypeMapper, CompositeTypeMapper, ConverterPipeline,
    SimpleTypeMapper, TypeMapper,
};
pub use text::{Encoding, TextConverter, TextResultConverter};

use crate::error::Result;
use crate::types::{AnnotationSet, LogicalType, Value};

/// Converter properties
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConverterFlags {
    /// Never reads the conversion context
    pub no_context: bool,
    /// Side-effect free; one instance may serve every call site
    pub cacheable: bool,
}

impl ConverterFlags {
    pub const SHARED: Self = Self {
        no_context: true,
        cacheable: true,
    };
}

/// Side information threaded through conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionContext {
    pub annotations: AnnotationSet,
    /// Encoding used when no annotation selects one
    pub default_encoding: Encoding,
}

impl ConversionContext {
    pub fn new(annotations: AnnotationSet, default_encoding: Encoding) -> Self {
        Self {
            annotations,
            default_encoding,
        }
    }
}

/// Logical value to native carrier
pub trait ToNativeConverter: Send + Sync {
    fn to_native(&self, value: &Value, ctx: &ConversionContext) -> Result<Value>;

    /// Carrier type of the converted value
    fn native_type(&self) -> LogicalType;

    /// Annotations applied to the carrier, e.g. copy directions
    fn native_annotations(&self) -> AnnotationSet {
        AnnotationSet::new()
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::default()
    }
}

/// Native carrier to logical value
pub trait FromNativeConverter: Send + Sync {
    fn from_native(&self, value: &Value, ctx: &ConversionContext) -> Result<Value>;

    /// Carrier type the native value arrives as
    fn native_type(&self) -> LogicalType;

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::default()
    }
}

#[cfg(test)]
mod tests;

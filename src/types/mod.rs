//! Type system - logical shapes, native ABI types and their mapping
//!
//! Architecture:
//! - `native.rs` - Native ABI types and the configurable data model
//! - `logical.rs` - Managed-side type shapes (scalars, text, arrays, enums, callbacks)
//! - `value.rs` - Values crossing the boundary
//! - `annotations.rs` - Call-context annotations
//! - `catalog.rs` - Logical-to-native resolution with memoization
//! - `abi.rs` - Calling conventions and register assignment

mod abi;
mod annotations;
mod catalog;
mod logical;
mod native;
mod value;

pub use abi::{Abi, CallingConvention, RegisterAllocator};
pub use annotations::{Annotation, AnnotationSet};
pub use catalog::TypeCatalog;
pub use logical::{CallbackType, ElementType, EnumType, IntegerKind, LogicalType, StructLayout};
pub use native::{DataModel, NativeDescriptor, NativeType};
pub use value::{ArrayData, ArrayValue, EnumConstant, EnumSetValue, StructValue, Value};

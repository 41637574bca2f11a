//! Native type catalog - logical type + annotations to native descriptor
//!
//! Design: Deterministic and total over the closed set of logical shapes.
//! Results are memoized per (logical type, annotation set); the map is
//! read-mostly and entries are never mutated once published.

use super::annotations::AnnotationSet;
use super::logical::LogicalType;
use super::native::{DataModel, NativeDescriptor, NativeType};
use crate::error::{BindError, Result};
use dashmap::DashMap;

pub struct TypeCatalog {
    model: DataModel,
    cache: DashMap<(LogicalType, AnnotationSet), NativeDescriptor>,
}

impl TypeCatalog {
    pub fn new(model: DataModel) -> Self {
        Self {
            model,
            cache: DashMap::with_capacity(64),
        }
    }

    #[inline]
    pub fn model(&self) -> DataModel {
        self.model
    }

    /// Resolve the native descriptor for a logical type
    pub fn resolve(&self, logical: &LogicalType, annotations: &AnnotationSet) -> Result<NativeDescriptor> {
        let key = (logical.clone(), annotations.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(*hit);
        }

        let native = self.lookup(logical, annotations)?;
        let descriptor = NativeDescriptor::new(native, self.model);
        // Racing resolvers compute the same value; first insert wins
        Ok(*self.cache.entry(key).or_insert(descriptor))
    }

    /// Resolve only the native type
    pub fn native_type(&self, logical: &LogicalType, annotations: &AnnotationSet) -> Result<NativeType> {
        self.resolve(logical, annotations).map(|d| d.native)
    }

    fn lookup(&self, logical: &LogicalType, annotations: &AnnotationSet) -> Result<NativeType> {
        if let Some(alias) = annotations.alias() {
            return match logical {
                LogicalType::Void
                | LogicalType::Text
                | LogicalType::Array(_)
                | LogicalType::Struct(_)
                | LogicalType::Callback(_) => Err(BindError::UnsupportedType(format!(
                    "{} cannot be aliased to {}",
                    logical,
                    alias.name()
                ))),
                _ if alias == NativeType::Void => Err(BindError::UnsupportedType(format!(
                    "{} cannot be aliased to void",
                    logical
                ))),
                _ => Ok(alias),
            };
        }

        let native = match logical {
            LogicalType::Void => NativeType::Void,
            LogicalType::Boolean => NativeType::SInt,
            LogicalType::Byte => NativeType::SChar,
            LogicalType::Short => NativeType::SShort,
            LogicalType::Char => NativeType::UShort,
            LogicalType::Int => NativeType::SInt,
            LogicalType::Long => NativeType::SLongLong,
            LogicalType::Float => NativeType::Float,
            LogicalType::Double => NativeType::Double,
            LogicalType::Enum(_) | LogicalType::EnumSet(_) => NativeType::SInt,
            LogicalType::Address
            | LogicalType::Text
            | LogicalType::Array(_)
            | LogicalType::Struct(_)
            | LogicalType::Callback(_) => NativeType::Address,
            LogicalType::Named(name) => {
                return Err(BindError::UnsupportedType(format!(
                    "{} has no native mapping",
                    name
                )))
            }
        };
        Ok(native)
    }

    /// Number of memoized resolutions
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

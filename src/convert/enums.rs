//! Enum and enum-set conversion
//!
//! Mappers are kept in a process-scoped registry created on first use and
//! never torn down; each mapper is immutable once published.

use super::{ConversionContext, ConverterFlags, FromNativeConverter, ToNativeConverter};
use crate::error::{BindError, Result};
use crate::types::{EnumConstant, EnumSetValue, EnumType, LogicalType, Value};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Constant name that absorbs native values with no declared mapping
pub const UNKNOWN_NATIVE_VALUE: &str = "__UNKNOWN_NATIVE_VALUE";

/// Global mapper registry
static MAPPERS: Lazy<DashMap<Arc<EnumType>, Arc<EnumMapper>>> = Lazy::new(DashMap::new);

/// Bidirectional constant/integer mapping for one enum
#[derive(Debug)]
pub struct EnumMapper {
    ty: Arc<EnumType>,
    int_values: Vec<i32>,
    reverse: HashMap<i32, usize>,
    escape: Option<usize>,
}

impl EnumMapper {
    /// Shared mapper for an enum type
    pub fn get_instance(ty: &Arc<EnumType>) -> Arc<EnumMapper> {
        if let Some(mapper) = MAPPERS.get(ty) {
            return Arc::clone(&mapper);
        }
        Arc::clone(
            &MAPPERS
                .entry(Arc::clone(ty))
                .or_insert_with(|| Arc::new(Self::new(Arc::clone(ty)))),
        )
    }

    fn new(ty: Arc<EnumType>) -> Self {
        let mut int_values = Vec::with_capacity(ty.len());
        let mut reverse = HashMap::with_capacity(ty.len());
        for (index, _, value) in ty.constants() {
            let native = value as i32;
            int_values.push(native);
            // Duplicate values: the later constant wins
            reverse.insert(native, index);
        }
        let escape = ty.index_of(UNKNOWN_NATIVE_VALUE);
        Self {
            ty,
            int_values,
            reverse,
            escape,
        }
    }

    pub fn enum_type(&self) -> &Arc<EnumType> {
        &self.ty
    }

    /// Native integer of a constant
    pub fn int_value(&self, constant: &EnumConstant) -> Result<i32> {
        if constant.ty != self.ty {
            return Err(BindError::mismatch(
                format!("enum {}", self.ty.name()),
                format!("enum {}", constant.ty.name()),
            ));
        }
        self.int_values
            .get(constant.index)
            .copied()
            .ok_or_else(|| BindError::mismatch(format!("enum {}", self.ty.name()), "invalid constant"))
    }

    /// Constant for a native integer, falling back to the escape constant
    ///
    /// Native enums are `int`; only the low 32 bits take part in the lookup.
    pub fn value_of(&self, value: i64) -> Result<EnumConstant> {
        let index = match self.reverse.get(&(value as i32)) {
            Some(index) => *index,
            None => self.escape.ok_or_else(|| BindError::UnknownEnumValue {
                enum_name: self.ty.name().to_string(),
                value,
            })?,
        };
        Ok(EnumConstant {
            ty: Arc::clone(&self.ty),
            index,
        })
    }
}

/// Enum constant <-> `Int`
pub struct EnumConverter {
    mapper: Arc<EnumMapper>,
}

impl EnumConverter {
    pub fn new(ty: &Arc<EnumType>) -> Self {
        Self {
            mapper: EnumMapper::get_instance(ty),
        }
    }
}

impl ToNativeConverter for EnumConverter {
    fn to_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        match value {
            Value::Enum(constant) => Ok(Value::Int(self.mapper.int_value(constant)?)),
            other => Err(BindError::mismatch(
                format!("enum {}", self.mapper.ty.name()),
                other.kind_name(),
            )),
        }
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Int
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}

impl FromNativeConverter for EnumConverter {
    fn from_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        let native = value
            .as_i64()
            .ok_or_else(|| BindError::mismatch("int", value.kind_name()))?;
        self.mapper.value_of(native).map(Value::Enum)
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Int
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}

/// Enum set <-> bitmask `Int`
///
/// Reverse mapping tests mask containment against every declared constant,
/// so overlapping flag values may yield several members.
pub struct EnumSetConverter {
    mapper: Arc<EnumMapper>,
}

impl EnumSetConverter {
    pub fn new(ty: &Arc<EnumType>) -> Self {
        Self {
            mapper: EnumMapper::get_instance(ty),
        }
    }
}

impl ToNativeConverter for EnumSetConverter {
    fn to_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        match value {
            Value::EnumSet(set) if set.ty == self.mapper.ty => {
                let mut bits = 0i32;
                for &index in &set.members {
                    bits |= self.mapper.int_value(&EnumConstant {
                        ty: Arc::clone(&set.ty),
                        index,
                    })?;
                }
                Ok(Value::Int(bits))
            }
            other => Err(BindError::mismatch(
                format!("set<{}>", self.mapper.ty.name()),
                other.kind_name(),
            )),
        }
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Int
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}

impl FromNativeConverter for EnumSetConverter {
    fn from_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        let native = value
            .as_i64()
            .ok_or_else(|| BindError::mismatch("int", value.kind_name()))? as i32;
        let members: BTreeSet<usize> = self
            .mapper
            .int_values
            .iter()
            .enumerate()
            .filter(|(_, v)| native & **v == **v)
            .map(|(i, _)| i)
            .collect();
        Ok(Value::EnumSet(EnumSetValue {
            ty: Arc::clone(&self.mapper.ty),
            members,
        }))
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Int
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}

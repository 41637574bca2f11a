//! Numeric marshalling rules
//!
//! Every integer crossing the boundary is carried as a 64-bit "register
//! image": the value truncated to the native width, then sign-extended for
//! signed native types and zero-extended for unsigned ones. The logical
//! value is recovered by narrowing that image to the logical width. The
//! native signedness decides extension, never the logical type.

use crate::error::{BindError, Result};
use crate::types::{DataModel, IntegerKind, LogicalType, NativeType, Value};

/// Narrow a value to a logical integer representation
#[inline]
pub fn narrow(value: i64, to: IntegerKind) -> i64 {
    match to {
        IntegerKind::Boolean => (value != 0) as i64,
        IntegerKind::Byte => value as i8 as i64,
        IntegerKind::Short => value as i16 as i64,
        IntegerKind::Char => value as u16 as i64,
        IntegerKind::Int => value as i32 as i64,
        IntegerKind::Long => value,
    }
}

/// Truncate to the native width, extending per native signedness
#[inline]
pub fn normalize(value: i64, native: NativeType, model: DataModel) -> i64 {
    if !native.is_integral() {
        return value;
    }
    let bits = native.bits(model);
    if bits >= 64 {
        return value;
    }
    let shift = 64 - bits;
    if native.is_signed() {
        (value << shift) >> shift
    } else {
        ((value as u64) << shift >> shift) as i64
    }
}

/// Convert a logical integer through a native type back to a logical width
///
/// Boolean targets normalize any non-zero native value to 1; bits above
/// the native width never count.
#[inline]
pub fn convert(value: i64, to: IntegerKind, native: NativeType, model: DataModel) -> i64 {
    narrow(normalize(value, native, model), to)
}

/// Build a logical value of the given type from an integer
pub fn integer_value(logical: &LogicalType, value: i64) -> Value {
    match logical {
        LogicalType::Boolean => Value::Bool(value != 0),
        LogicalType::Byte => Value::Byte(value as i8),
        LogicalType::Short => Value::Short(value as i16),
        LogicalType::Char => Value::Char(value as u16),
        LogicalType::Int => Value::Int(value as i32),
        LogicalType::Address => Value::Address(value as usize),
        _ => Value::Long(value),
    }
}

/// Register image of a scalar value for the given native type
///
/// Floats are returned as their IEEE bit patterns (`f32` in the low half).
pub fn to_native(value: &Value, logical: &LogicalType, native: NativeType, model: DataModel) -> Result<u64> {
    match native {
        NativeType::Void => Ok(0),
        NativeType::Float => {
            let v = float_operand(value, logical)?;
            Ok((v as f32).to_bits() as u64)
        }
        NativeType::Double => {
            let v = float_operand(value, logical)?;
            Ok(v.to_bits())
        }
        _ => {
            let v = integer_operand(value, logical)?;
            let v = match logical.integer_kind() {
                Some(kind) => narrow(v, kind),
                None => v,
            };
            Ok(normalize(v, native, model) as u64)
        }
    }
}

/// Logical value from a native register image
pub fn from_native(raw: u64, logical: &LogicalType, native: NativeType, model: DataModel) -> Result<Value> {
    match native {
        NativeType::Void => Ok(Value::Void),
        NativeType::Float | NativeType::Double => {
            let v = if native == NativeType::Float {
                f32::from_bits(raw as u32) as f64
            } else {
                f64::from_bits(raw)
            };
            match logical {
                LogicalType::Float => Ok(Value::Float(v as f32)),
                LogicalType::Double => Ok(Value::Double(v)),
                other => Err(BindError::mismatch(other.to_string(), native.name())),
            }
        }
        _ => {
            let kind = logical
                .integer_kind()
                .ok_or_else(|| BindError::mismatch(logical.to_string(), native.name()))?;
            let v = convert(raw as i64, kind, native, model);
            Ok(integer_value(logical, v))
        }
    }
}

fn integer_operand(value: &Value, logical: &LogicalType) -> Result<i64> {
    match value {
        Value::Float(_) | Value::Double(_) => {
            Err(BindError::mismatch(logical.to_string(), value.kind_name()))
        }
        Value::Null if !matches!(logical, LogicalType::Address) => {
            Err(BindError::mismatch(logical.to_string(), "null"))
        }
        _ => value
            .as_i64()
            .ok_or_else(|| BindError::mismatch(logical.to_string(), value.kind_name())),
    }
}

fn float_operand(value: &Value, logical: &LogicalType) -> Result<f64> {
    match value {
        Value::Float(v) => Ok(*v as f64),
        Value::Double(v) => Ok(*v),
        Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) | Value::Char(_) => {
            value
                .as_f64()
                .ok_or_else(|| BindError::mismatch(logical.to_string(), value.kind_name()))
        }
        _ => Err(BindError::mismatch(logical.to_string(), value.kind_name())),
    }
}

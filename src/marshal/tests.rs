//! Test suite for marshalling rules

use super::*;
use crate::error::BindError;
use crate::types::{
    Annotation, AnnotationSet, ArrayData, ArrayValue, DataModel, IntegerKind, LogicalType,
    NativeType, StructLayout, StructValue, Value,
};
use proptest::prelude::*;

const MODEL: DataModel = DataModel::LP64;

const INTEGER_NATIVES: [NativeType; 11] = [
    NativeType::SChar,
    NativeType::UChar,
    NativeType::SShort,
    NativeType::UShort,
    NativeType::SInt,
    NativeType::UInt,
    NativeType::SLong,
    NativeType::ULong,
    NativeType::SLongLong,
    NativeType::ULongLong,
    NativeType::Address,
];

const SAMPLES: [i64; 20] = [
    0,
    1,
    2,
    -1,
    0x78,
    0x87,
    0x7F,
    0x80,
    0x6789,
    0x9876,
    0x7FFF,
    0x8000,
    0x456789AB,
    0xBA987654,
    0x7FFFFFFF,
    0x80000000,
    0x0123456789ABCDEF,
    0xFEDCBA9876543210u64 as i64,
    i64::MAX,
    i64::MIN,
];

/// Independent oracle: reduce modulo 2^bits, reinterpret per native
/// signedness, then reduce again to the logical width.
fn oracle(value: i64, to: IntegerKind, native: NativeType) -> i64 {
    let bits = native.bits(MODEL);
    let modulus = 1i128 << bits;
    let mut x = (value as i128).rem_euclid(modulus);
    if native.is_signed() && x >= modulus / 2 {
        x -= modulus;
    }
    if to == IntegerKind::Boolean {
        return (x != 0) as i64;
    }
    let (to_bits, to_signed) = match to {
        IntegerKind::Byte => (8, true),
        IntegerKind::Short => (16, true),
        IntegerKind::Char => (16, false),
        IntegerKind::Int => (32, true),
        IntegerKind::Long | IntegerKind::Boolean => (64, true),
    };
    let m = 1i128 << to_bits;
    let mut y = x.rem_euclid(m);
    if to_signed && y >= m / 2 {
        y -= m;
    }
    y as i64
}

#[test]
fn test_narrow_truth_table() {
    assert_eq!(narrow(0x1FF, IntegerKind::Byte), -1);
    assert_eq!(narrow(0x17F, IntegerKind::Byte), 127);
    assert_eq!(narrow(-1, IntegerKind::Char), 65535);
    assert_eq!(narrow(0x1_0000_0001, IntegerKind::Int), 1);
    assert_eq!(narrow(2, IntegerKind::Boolean), 1);
    assert_eq!(narrow(0, IntegerKind::Boolean), 0);
}

#[test]
fn test_unsigned_zero_extends() {
    // -1 through an unsigned 8-bit native widens to 255, not -1
    assert_eq!(convert(-1, IntegerKind::Int, NativeType::UChar, MODEL), 255);
    assert_eq!(convert(-1, IntegerKind::Long, NativeType::UShort, MODEL), 65535);
    assert_eq!(convert(-1, IntegerKind::Long, NativeType::UInt, MODEL), 0xFFFF_FFFF);
    assert_eq!(convert(-1, IntegerKind::Int, NativeType::UInt, MODEL), -1);
}

#[test]
fn test_signed_sign_extends() {
    assert_eq!(convert(0xFF, IntegerKind::Int, NativeType::SChar, MODEL), -1);
    assert_eq!(convert(0x80, IntegerKind::Long, NativeType::SChar, MODEL), -128);
    assert_eq!(convert(0x8000, IntegerKind::Int, NativeType::SShort, MODEL), -32768);
    assert_eq!(convert(0x8000_0000, IntegerKind::Long, NativeType::SInt, MODEL), -2147483648);
}

#[test]
fn test_long_width_follows_model() {
    let v = 0x1_0000_0005i64;
    assert_eq!(convert(v, IntegerKind::Long, NativeType::SLong, DataModel::LP64), v);
    assert_eq!(convert(v, IntegerKind::Long, NativeType::SLong, DataModel::LLP64), 5);
    assert_eq!(convert(-1, IntegerKind::Long, NativeType::Address, DataModel::ILP32), 0xFFFF_FFFF);
}

#[test]
fn test_boolean_canonical_true() {
    for native in INTEGER_NATIVES {
        assert_eq!(convert(0x101, IntegerKind::Boolean, native, MODEL), 1);
        assert_eq!(convert(-7, IntegerKind::Boolean, native, MODEL), 1);
        assert_eq!(convert(0, IntegerKind::Boolean, native, MODEL), 0);
    }
}

#[test]
fn test_boolean_ignores_bits_above_native_width() {
    // Upper register bits are undefined for narrow results
    assert_eq!(convert(0x100, IntegerKind::Boolean, NativeType::UChar, MODEL), 0);
    assert_eq!(convert(0x100, IntegerKind::Boolean, NativeType::SChar, MODEL), 0);
    assert_eq!(convert(0x1_0000, IntegerKind::Boolean, NativeType::SShort, MODEL), 0);
    assert_eq!(convert(1 << 32, IntegerKind::Boolean, NativeType::SInt, MODEL), 0);
    assert_eq!(convert(1 << 32, IntegerKind::Boolean, NativeType::SLong, DataModel::LLP64), 0);
    assert_eq!(convert(1 << 32, IntegerKind::Boolean, NativeType::SLong, MODEL), 1);
    assert_eq!(
        from_native(1 << 32, &LogicalType::Boolean, NativeType::SInt, MODEL).unwrap(),
        Value::Bool(false)
    );
    assert_eq!(
        from_native(0xFFFF_FFFF_0000_0001, &LogicalType::Boolean, NativeType::UInt, MODEL).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_convert_matches_oracle_for_samples() {
    for native in INTEGER_NATIVES {
        for to in IntegerKind::ALL {
            for &sample in &SAMPLES {
                assert_eq!(
                    convert(sample, to, native, MODEL),
                    oracle(sample, to, native),
                    "convert {:#x} to {:?} via {:?}",
                    sample,
                    to,
                    native
                );
            }
        }
    }
}

#[test]
fn test_to_native_and_back() {
    let logical = LogicalType::Int;
    let raw = to_native(&Value::Int(-1), &logical, NativeType::UChar, MODEL).unwrap();
    assert_eq!(raw, 0xFF);
    assert_eq!(from_native(raw, &logical, NativeType::UChar, MODEL).unwrap(), Value::Int(255));

    let raw = to_native(&Value::Bool(true), &LogicalType::Boolean, NativeType::SInt, MODEL).unwrap();
    assert_eq!(raw, 1);
    assert_eq!(
        from_native(42, &LogicalType::Boolean, NativeType::SInt, MODEL).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_float_images() {
    let raw = to_native(&Value::Float(1.5), &LogicalType::Float, NativeType::Float, MODEL).unwrap();
    assert_eq!(raw, 1.5f32.to_bits() as u64);
    assert_eq!(
        from_native(raw, &LogicalType::Float, NativeType::Float, MODEL).unwrap(),
        Value::Float(1.5)
    );

    let raw = to_native(&Value::Int(3), &LogicalType::Double, NativeType::Double, MODEL).unwrap();
    assert_eq!(f64::from_bits(raw), 3.0);
}

#[test]
fn test_type_mismatch() {
    let err = to_native(&Value::text("x"), &LogicalType::Int, NativeType::SInt, MODEL).unwrap_err();
    assert!(matches!(err, BindError::TypeMismatch { .. }));

    let err = to_native(&Value::Double(1.0), &LogicalType::Int, NativeType::SInt, MODEL).unwrap_err();
    assert!(matches!(err, BindError::TypeMismatch { .. }));

    assert!(to_native(&Value::Null, &LogicalType::Int, NativeType::SInt, MODEL).is_err());
    assert_eq!(
        to_native(&Value::Null, &LogicalType::Address, NativeType::Address, MODEL).unwrap(),
        0
    );
}

proptest! {
    #[test]
    fn prop_native_round_trip(raw in any::<i64>(), idx in 0usize..INTEGER_NATIVES.len()) {
        // Any native-width value survives from-native then to-native
        let native = INTEGER_NATIVES[idx];
        let image = normalize(raw, native, MODEL) as u64;
        let value = from_native(image, &LogicalType::Long, native, MODEL).unwrap();
        let back = to_native(&value, &LogicalType::Long, native, MODEL).unwrap();
        prop_assert_eq!(back, image);
    }

    #[test]
    fn prop_convert_matches_oracle(
        raw in any::<i64>(),
        idx in 0usize..INTEGER_NATIVES.len(),
        to_idx in 0usize..IntegerKind::ALL.len(),
    ) {
        let native = INTEGER_NATIVES[idx];
        let to = IntegerKind::ALL[to_idx];
        prop_assert_eq!(convert(raw, to, native, MODEL), oracle(raw, to, native));
    }

    #[test]
    fn prop_normalize_idempotent(raw in any::<i64>(), idx in 0usize..INTEGER_NATIVES.len()) {
        let native = INTEGER_NATIVES[idx];
        let once = normalize(raw, native, MODEL);
        prop_assert_eq!(normalize(once, native, MODEL), once);
    }
}

#[test]
fn test_direction_from_annotations() {
    let both = Direction::from_annotations(&AnnotationSet::new());
    assert!(both.copy_in && both.copy_out && !both.nul_terminate);

    let input = Direction::from_annotations(&AnnotationSet::of([Annotation::In]));
    assert!(input.copy_in && !input.copy_out);

    let output = Direction::from_annotations(&AnnotationSet::of([
        Annotation::Out,
        Annotation::NulTerminate,
    ]));
    assert!(!output.copy_in && output.copy_out && output.nul_terminate);
}

#[test]
fn test_array_in_out() {
    let arr = ArrayValue::ints(vec![1, 2, 3]);
    let mut buf = marshal_array(&arr, Direction::IN_OUT);
    assert_eq!(buf.len(), 12);
    assert_eq!(buf.address() % 8, 0);
    assert_eq!(&buf.as_bytes()[..4], &1i32.to_ne_bytes());

    buf.as_bytes_mut()[4..8].copy_from_slice(&42i32.to_ne_bytes());
    unmarshal_array(&arr, &buf, Direction::IN_OUT);
    assert_eq!(arr.snapshot(), ArrayData::Int(vec![1, 42, 3]));
}

#[test]
fn test_array_out_only_skips_copy_in() {
    let arr = ArrayValue::longs(vec![7, 8]);
    let dir = Direction::from_annotations(&AnnotationSet::of([Annotation::Out]));
    let buf = marshal_array(&arr, dir);
    assert!(buf.as_bytes().iter().all(|b| *b == 0));
}

#[test]
fn test_array_in_only_skips_copy_back() {
    let arr = ArrayValue::shorts(vec![5]);
    let dir = Direction::from_annotations(&AnnotationSet::of([Annotation::In]));
    let mut buf = marshal_array(&arr, dir);
    buf.as_bytes_mut().copy_from_slice(&9i16.to_ne_bytes());
    unmarshal_array(&arr, &buf, dir);
    assert_eq!(arr.snapshot(), ArrayData::Short(vec![5]));
}

#[test]
fn test_array_nul_terminate_appends_element() {
    let arr = ArrayValue::bytes(vec![b'h' as i8, b'i' as i8]);
    let dir = Direction::from_annotations(&AnnotationSet::of([Annotation::In, Annotation::NulTerminate]));
    let buf = marshal_array(&arr, dir);
    assert_eq!(buf.as_bytes(), b"hi\0");
}

#[test]
fn test_struct_round_trip() {
    let layout = StructLayout::new("pair", 8, 4);
    let value = StructValue::new(layout);
    value.bytes.lock()[0] = 1;

    let mut buf = marshal_struct(&value, Direction::IN_OUT);
    assert_eq!(buf.as_bytes()[0], 1);
    buf.as_bytes_mut()[4] = 9;
    unmarshal_struct(&value, &buf, Direction::IN_OUT);
    assert_eq!(value.snapshot(), vec![1, 0, 0, 0, 9, 0, 0, 0]);
}

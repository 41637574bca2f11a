//! Test suite for the conversion pipeline

use super::*;
use crate::error::BindError;
use crate::types::{
    Annotation, AnnotationSet, ArrayData, EnumConstant, EnumSetValue, EnumType, LogicalType, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn ctx() -> ConversionContext {
    ConversionContext::new(AnnotationSet::new(), Encoding::Utf8)
}

fn color() -> Arc<EnumType> {
    EnumType::new("Color", &[("RED", 1), ("GREEN", 2), ("BLUE", 4)])
}

#[test]
fn test_enum_round_trip() {
    let ty = color();
    let conv = EnumConverter::new(&ty);
    for (index, name, _) in ty.constants() {
        let constant = Value::Enum(EnumConstant::new(&ty, name).unwrap());
        let native = ToNativeConverter::to_native(&conv, &constant, &ctx()).unwrap();
        let back = FromNativeConverter::from_native(&conv, &native, &ctx()).unwrap();
        assert_eq!(back, constant, "constant {}", index);
    }
}

#[test]
fn test_enum_values() {
    let ty = color();
    let conv = EnumConverter::new(&ty);
    let blue = Value::Enum(EnumConstant::new(&ty, "BLUE").unwrap());
    assert_eq!(ToNativeConverter::to_native(&conv, &blue, &ctx()).unwrap(), Value::Int(4));
}

#[test]
fn test_enum_unknown_value_fails() {
    let ty = color();
    let conv = EnumConverter::new(&ty);
    let err = FromNativeConverter::from_native(&conv, &Value::Int(3), &ctx()).unwrap_err();
    assert_eq!(
        err,
        BindError::UnknownEnumValue {
            enum_name: "Color".into(),
            value: 3
        }
    );
}

#[test]
fn test_enum_unknown_value_escape_constant() {
    let ty = EnumType::new("Signal", &[("HUP", 1), ("INT", 2), (UNKNOWN_NATIVE_VALUE, -1)]);
    let conv = EnumConverter::new(&ty);
    let value = FromNativeConverter::from_native(&conv, &Value::Int(99), &ctx()).unwrap();
    match value {
        Value::Enum(c) => assert_eq!(c.name(), UNKNOWN_NATIVE_VALUE),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_enum_duplicate_values_last_wins() {
    let ty = EnumType::new("Dup", &[("FIRST", 7), ("SECOND", 7)]);
    let mapper = EnumMapper::get_instance(&ty);
    assert_eq!(mapper.value_of(7).unwrap().name(), "SECOND");
}

#[test]
fn test_enum_high_bit_constants_round_trip() {
    let ty = EnumType::new("WideFlags", &[("LOW", 1), ("HIGH", 0x8000_0000), ("ALL", 0xFFFF_FFFF)]);
    let conv = EnumConverter::new(&ty);
    for (_, name, _) in ty.constants() {
        let constant = Value::Enum(EnumConstant::new(&ty, name).unwrap());
        let native = ToNativeConverter::to_native(&conv, &constant, &ctx()).unwrap();
        assert_eq!(FromNativeConverter::from_native(&conv, &native, &ctx()).unwrap(), constant);
    }
    let high = Value::Enum(EnumConstant::new(&ty, "HIGH").unwrap());
    assert_eq!(ToNativeConverter::to_native(&conv, &high, &ctx()).unwrap(), Value::Int(i32::MIN));
    // A zero-extended image of the same int resolves too
    assert_eq!(
        FromNativeConverter::from_native(&conv, &Value::Long(0x8000_0000), &ctx()).unwrap(),
        high
    );

    let sets = EnumSetConverter::new(&ty);
    let requested = EnumSetValue::of(&ty, &["LOW", "HIGH"]).unwrap();
    let native = ToNativeConverter::to_native(&sets, &Value::EnumSet(requested.clone()), &ctx()).unwrap();
    assert_eq!(native, Value::Int(i32::MIN | 1));
    match FromNativeConverter::from_native(&sets, &native, &ctx()).unwrap() {
        Value::EnumSet(set) => {
            assert!(set.contains("LOW") && set.contains("HIGH"));
            assert!(!set.contains("ALL"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_enum_mapper_registry_shares_instances() {
    let a = EnumMapper::get_instance(&color());
    let b = EnumMapper::get_instance(&color());
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_enum_wrong_type_is_mismatch() {
    let conv = EnumConverter::new(&color());
    let other = EnumType::ordinal("Other", &["A"]);
    let value = Value::Enum(EnumConstant::new(&other, "A").unwrap());
    assert!(matches!(
        ToNativeConverter::to_native(&conv, &value, &ctx()),
        Err(BindError::TypeMismatch { .. })
    ));
    assert!(matches!(
        ToNativeConverter::to_native(&conv, &Value::Int(1), &ctx()),
        Err(BindError::TypeMismatch { .. })
    ));
}

#[test]
fn test_enum_set_bitmask() {
    let ty = color();
    let conv = EnumSetConverter::new(&ty);
    let set = Value::EnumSet(EnumSetValue::of(&ty, &["RED", "BLUE"]).unwrap());
    let native = ToNativeConverter::to_native(&conv, &set, &ctx()).unwrap();
    assert_eq!(native, Value::Int(5));
    assert_eq!(FromNativeConverter::from_native(&conv, &native, &ctx()).unwrap(), set);
}

#[test]
fn test_enum_set_overlapping_members_superset() {
    // ALL overlaps READ and WRITE; containment reports every covered member
    let ty = EnumType::new("Access", &[("READ", 1), ("WRITE", 2), ("ALL", 3)]);
    let conv = EnumSetConverter::new(&ty);

    let requested = EnumSetValue::of(&ty, &["ALL"]).unwrap();
    let native = ToNativeConverter::to_native(&conv, &Value::EnumSet(requested.clone()), &ctx()).unwrap();
    let back = FromNativeConverter::from_native(&conv, &native, &ctx()).unwrap();
    match back {
        Value::EnumSet(set) => {
            assert!(set.is_superset(&requested));
            assert!(set.contains("READ") && set.contains("WRITE") && set.contains("ALL"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_encode_utf8_terminated() {
    let bytes = Encoding::Utf8.encode("héllo").unwrap();
    assert_eq!(&bytes[..6], "héllo".as_bytes());
    assert_eq!(&bytes[6..], &[0, 0, 0, 0]);
}

#[test]
fn test_encode_grows_on_overflow() {
    // Multi-byte characters overflow the average-size estimate
    let text = "日本語のテキスト".repeat(8);
    let bytes = Encoding::Utf8.encode(&text).unwrap();
    assert_eq!(&bytes[..bytes.len() - 4], text.as_bytes());
    assert_eq!(Encoding::Utf8.decode(&bytes).unwrap(), text);
}

#[test]
fn test_encode_wide_encodings() {
    let bytes = Encoding::Utf16Le.encode("A€").unwrap();
    assert_eq!(bytes, vec![0x41, 0x00, 0xAC, 0x20, 0, 0, 0, 0]);
    assert_eq!(Encoding::Utf16Le.decode(&bytes).unwrap(), "A€");

    let bytes = Encoding::Utf32Be.encode("A").unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 0x41, 0, 0, 0, 0]);

    let bytes = Encoding::Utf16Be.encode("😀").unwrap();
    assert_eq!(&bytes[..4], &[0xD8, 0x3D, 0xDE, 0x00]);
}

#[test]
fn test_encode_unmappable_fails() {
    assert!(matches!(
        Encoding::Ascii.encode("naïve"),
        Err(BindError::EncodingError(_))
    ));
    assert!(Encoding::Latin1.encode("naïve").is_ok());
    assert!(Encoding::Latin1.encode("€").is_err());
}

#[test]
fn test_encoding_labels() {
    assert_eq!(Encoding::from_label("utf-8"), Some(Encoding::Utf8));
    assert_eq!(Encoding::from_label("UTF_16BE"), Some(Encoding::Utf16Be));
    assert_eq!(Encoding::from_label("ISO-8859-1"), Some(Encoding::Latin1));
    assert_eq!(Encoding::from_label("US-ASCII"), Some(Encoding::Ascii));
    assert_eq!(Encoding::from_label("KOI8-R"), None);
}

#[test]
fn test_text_converter_selects_annotated_encoding() {
    let ctx = ConversionContext::new(
        AnnotationSet::of([Annotation::Encoding(Arc::from("UTF-16LE"))]),
        Encoding::Utf8,
    );
    let conv = TextConverter::for_context(&ctx).unwrap();
    assert_eq!(conv.encoding(), Encoding::Utf16Le);

    let native = conv.to_native(&Value::text("hi"), &ctx).unwrap();
    match native {
        Value::Array(arr) => assert_eq!(
            arr.snapshot(),
            ArrayData::Byte(vec![b'h' as i8, 0, b'i' as i8, 0, 0, 0, 0, 0])
        ),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(conv.to_native(&Value::Null, &ctx).unwrap(), Value::Null);
}

#[test]
fn test_text_converter_unknown_encoding_is_construction_error() {
    let ctx = ConversionContext::new(
        AnnotationSet::of([Annotation::Encoding(Arc::from("EBCDIC"))]),
        Encoding::Utf8,
    );
    let err = TextConverter::for_context(&ctx).err().unwrap();
    assert!(matches!(err, BindError::UnsupportedType(_)));
}

#[test]
fn test_text_result_reads_native_string() {
    let storage = Encoding::Utf8.encode("native").unwrap();
    let conv = TextResultConverter::new(Encoding::Utf8);
    let value = conv
        .from_native(&Value::Address(storage.as_ptr() as usize), &ctx())
        .unwrap();
    assert_eq!(value, Value::text("native"));
    assert_eq!(conv.from_native(&Value::Address(0), &ctx()).unwrap(), Value::Null);
}

/// Mapper that counts converter constructions
struct CountingMapper {
    built: AtomicUsize,
    cacheable: bool,
}

struct Doubler {
    cacheable: bool,
}

impl ToNativeConverter for Doubler {
    fn to_native(&self, value: &Value, _ctx: &ConversionContext) -> crate::error::Result<Value> {
        Ok(Value::Int(value.as_i64().unwrap_or(0) as i32 * 2))
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Int
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags {
            no_context: true,
            cacheable: self.cacheable,
        }
    }
}

impl TypeMapper for CountingMapper {
    fn to_native_converter(
        &self,
        ty: &LogicalType,
        _ctx: &ConversionContext,
    ) -> crate::error::Result<Option<Arc<dyn ToNativeConverter>>> {
        if *ty != LogicalType::named("Meters") {
            return Ok(None);
        }
        self.built.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
        Ok(Some(Arc::new(Doubler {
            cacheable: self.cacheable,
        })))
    }
}

#[test]
fn test_caching_mapper_constructs_once_under_contention() {
    let counting = Arc::new(CountingMapper {
        built: AtomicUsize::new(0),
        cacheable: true,
    });
    let caching = Arc::new(CachingTypeMapper::new(counting.clone()));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let caching = Arc::clone(&caching);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                caching
                    .to_native_converter(&LogicalType::named("Meters"), &ctx())
                    .unwrap()
                    .unwrap()
            })
        })
        .collect();

    let convs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(counting.built.load(Ordering::SeqCst), 1);
    for conv in &convs[1..] {
        assert!(Arc::ptr_eq(conv, &convs[0]));
    }
}

#[test]
fn test_caching_mapper_skips_uncacheable() {
    let counting = Arc::new(CountingMapper {
        built: AtomicUsize::new(0),
        cacheable: false,
    });
    let caching = CachingTypeMapper::new(counting.clone());
    let a = caching
        .to_native_converter(&LogicalType::named("Meters"), &ctx())
        .unwrap()
        .unwrap();
    let b = caching
        .to_native_converter(&LogicalType::named("Meters"), &ctx())
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(counting.built.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pipeline_selection_order() {
    let custom: Arc<dyn ToNativeConverter> = Arc::new(Doubler { cacheable: true });
    let mapper = SimpleTypeMapper::new().with_to_native(LogicalType::Text, Arc::clone(&custom));
    let pipeline = ConverterPipeline::new(Some(Arc::new(mapper)));

    // Mapper overrides the built-in text converter
    let conv = pipeline.to_native(None, &LogicalType::Text, &ctx()).unwrap().unwrap();
    assert!(Arc::ptr_eq(&conv, &custom));

    // Explicit converter beats the mapper chain
    let explicit: Arc<dyn ToNativeConverter> = Arc::new(Doubler { cacheable: false });
    let conv = pipeline
        .to_native(Some(&explicit), &LogicalType::Text, &ctx())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&conv, &explicit));

    // Built-ins still serve everything else
    let conv = pipeline
        .to_native(None, &LogicalType::Enum(color()), &ctx())
        .unwrap()
        .unwrap();
    assert_eq!(conv.native_type(), LogicalType::Int);
    assert!(pipeline.to_native(None, &LogicalType::Int, &ctx()).unwrap().is_none());
}

//! Test suite for library binding and the dispatch cache

use super::*;
use crate::config::RuntimeConfig;
use crate::error::BindError;
use crate::invoke::{FunctionDecl, InterfaceDecl, Invoker, Strategy, VariableDecl};
use crate::library::{SymbolLookup, SymbolTable};
use crate::runtime::Runtime;
use crate::types::{ArrayData, ArrayValue, ElementType, LogicalType, NativeType, Value};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn mul_i32(a: i32, b: i32) -> i32 {
    a.wrapping_mul(b)
}

extern "C" fn scale(x: f64, by: f32) -> f64 {
    x * by as f64
}

extern "C" fn fill_ones(ptr: *mut i32, len: i32) {
    let out = unsafe { std::slice::from_raw_parts_mut(ptr, len as usize) };
    out.fill(1);
}

static COUNTER: AtomicI32 = AtomicI32::new(7);
static TOTAL: AtomicI64 = AtomicI64::new(0);

fn runtime(config: RuntimeConfig) -> Arc<Runtime> {
    Arc::new(Runtime::new(config).unwrap())
}

fn symbols() -> Arc<dyn SymbolLookup> {
    Arc::new(
        SymbolTable::new()
            .with("add", add_i32 as usize)
            .with("mul", mul_i32 as usize)
            .with("scale", scale as usize)
            .with("fill", fill_ones as usize)
            .with("counter", COUNTER.as_ptr() as usize)
            .with("total", TOTAL.as_ptr() as usize),
    )
}

fn int_binop(name: &str) -> FunctionDecl {
    FunctionDecl::new(name)
        .param(LogicalType::Int)
        .param(LogicalType::Int)
        .returns(LogicalType::Int)
}

fn interface() -> InterfaceDecl {
    InterfaceDecl::new()
        .function(int_binop("add"))
        .function(int_binop("mul"))
        .function(
            FunctionDecl::new("scale")
                .param(LogicalType::Double)
                .param(LogicalType::Float)
                .returns(LogicalType::Double),
        )
        .function(
            FunctionDecl::new("fill")
                .param(LogicalType::Array(ElementType::Int))
                .param(LogicalType::Int),
        )
}

#[test]
fn test_cache_first_writer_wins() {
    let cache = DispatchCache::new();
    let name: Arc<str> = Arc::from("f");
    let first = cache.insert(&name, Invoker::failing(Arc::clone(&name), BindError::SymbolNotFound("a".into())));
    let second = cache.insert(&name, Invoker::failing(Arc::clone(&name), BindError::SymbolNotFound("b".into())));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.error(), Some(&BindError::SymbolNotFound("a".into())));
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("f"));
    assert!(cache.get("g").is_none());
}

#[test]
fn test_cache_concurrent_publication() {
    let cache = Arc::new(DispatchCache::new());
    let name: Arc<str> = Arc::from("shared");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let name = Arc::clone(&name);
            std::thread::spawn(move || {
                cache.get_or_insert_with(&name, || {
                    Invoker::failing(Arc::clone(&name), BindError::SymbolNotFound(i.to_string()))
                })
            })
        })
        .collect();
    let invokers: Vec<Arc<Invoker>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for invoker in &invokers[1..] {
        assert!(Arc::ptr_eq(&invokers[0], invoker));
    }
    assert_eq!(cache.names(), vec![name]);
}

#[test]
fn test_bind_and_invoke() {
    let rt = runtime(RuntimeConfig::default());
    let lib = rt.bind(symbols(), &interface(), LibraryOptions::default());

    assert_eq!(lib.functions(), 4);
    assert_eq!(lib.invoke("add", &[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    assert_eq!(lib.invoke("mul", &[Value::Int(6), Value::Int(7)]).unwrap(), Value::Int(42));
    assert_eq!(
        lib.invoke("scale", &[Value::Double(1.5), Value::Float(2.0)]).unwrap(),
        Value::Double(3.0)
    );

    let out = ArrayValue::ints(vec![0; 3]);
    lib.invoke("fill", &[Value::Array(out.clone()), Value::Int(3)]).unwrap();
    assert_eq!(out.snapshot(), ArrayData::Int(vec![1, 1, 1]));
}

#[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
#[test]
fn test_stub_functions_share_a_block() {
    let rt = runtime(RuntimeConfig::default());
    let lib = rt.bind(symbols(), &interface(), LibraryOptions::default());

    let add = lib.function("add").unwrap();
    let mul = lib.function("mul").unwrap();
    assert_eq!(add.strategy(), Some(Strategy::X86Stub));
    assert_eq!(mul.strategy(), Some(Strategy::X86Stub));
    assert_eq!(lib.function("fill").unwrap().strategy(), Some(Strategy::Buffer));
    assert!(lib.function("fill").unwrap().stub_address().is_none());

    assert_eq!(add.address(), Some(add_i32 as usize));
    // Both stubs live in the same page
    let (a, b) = (add.stub_address().unwrap(), mul.stub_address().unwrap());
    assert_eq!(a / 4096, b / 4096);
}

#[test]
fn test_no_stubs_option() {
    let rt = runtime(RuntimeConfig::default());
    let lib = rt.bind(symbols(), &interface(), LibraryOptions::default().no_stubs());

    assert!(!lib.strategy_env().enable_stubs);
    assert_eq!(lib.function("add").unwrap().strategy(), Some(Strategy::FastInt));
    assert_eq!(lib.function("scale").unwrap().strategy(), Some(Strategy::FastNumeric));
    assert_eq!(lib.invoke("add", &[Value::Int(-2), Value::Int(3)]).unwrap(), Value::Int(1));
}

#[test]
fn test_fast_paths_disabled() {
    let config = RuntimeConfig {
        enable_stubs: false,
        enable_fast_paths: false,
        ..RuntimeConfig::default()
    };
    let rt = runtime(config);
    let lib = rt.bind(symbols(), &interface(), LibraryOptions::default());

    for name in ["add", "mul", "scale", "fill"] {
        assert_eq!(lib.function(name).unwrap().strategy(), Some(Strategy::Buffer), "{}", name);
    }
    assert_eq!(lib.invoke("mul", &[Value::Int(3), Value::Int(3)]).unwrap(), Value::Int(9));
}

#[test]
fn test_failures_are_isolated() {
    let rt = runtime(RuntimeConfig::default());
    let decl = interface()
        .function(int_binop("missing"))
        .function(FunctionDecl::new("opaque").param(LogicalType::named("Handle")));
    let lib = rt.bind(symbols(), &decl, LibraryOptions::default());

    assert_eq!(lib.functions(), 6);
    assert_eq!(
        lib.invoke("missing", &[Value::Int(1), Value::Int(2)]).unwrap_err(),
        BindError::SymbolNotFound("missing".into())
    );
    assert!(matches!(
        lib.invoke("opaque", &[Value::Null]),
        Err(BindError::SymbolNotFound(_) | BindError::UnsupportedType(_))
    ));
    assert_eq!(lib.invoke("add", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
}

#[test]
fn test_unsupported_type_replayed() {
    let rt = runtime(RuntimeConfig::default());
    let table = Arc::new(SymbolTable::new().with("opaque", add_i32 as usize));
    let decl = InterfaceDecl::new().function(FunctionDecl::new("opaque").param(LogicalType::named("Handle")));
    let lib = rt.bind(table, &decl, LibraryOptions::default());

    let invoker = lib.function("opaque").unwrap();
    assert!(invoker.strategy().is_none());
    assert!(matches!(invoker.error(), Some(BindError::UnsupportedType(_))));
    assert!(matches!(lib.invoke("opaque", &[Value::Null]), Err(BindError::UnsupportedType(_))));
}

#[test]
fn test_unknown_name() {
    let rt = runtime(RuntimeConfig::default());
    let lib = rt.bind(symbols(), &interface(), LibraryOptions::default());
    assert_eq!(
        lib.invoke("nope", &[]).unwrap_err(),
        BindError::SymbolNotFound("nope".into())
    );
}

#[test]
fn test_function_mapper() {
    let rt = runtime(RuntimeConfig::default());
    let mapper: Arc<dyn FunctionMapper> = Arc::new(|name: &str| name.trim_start_matches("lib_").to_string());
    let decl = InterfaceDecl::new().function(int_binop("lib_add"));
    let lib = rt.bind(symbols(), &decl, LibraryOptions::default().function_mapper(mapper));

    assert!(lib.function("add").is_none());
    assert_eq!(lib.invoke("lib_add", &[Value::Int(20), Value::Int(22)]).unwrap(), Value::Int(42));
    assert_eq!(IdentityMapper.map_name("lib_add"), "lib_add");
}

#[test]
fn test_late_bind_function() {
    let rt = runtime(RuntimeConfig::default());
    let lib = rt.bind(symbols(), &InterfaceDecl::new(), LibraryOptions::default());
    assert_eq!(lib.functions(), 0);

    let first = lib.bind_function(&int_binop("mul"));
    let second = lib.bind_function(&int_binop("mul"));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(lib.invoke("mul", &[Value::Int(5), Value::Int(5)]).unwrap(), Value::Int(25));
}

#[test]
fn test_synchronized_library() {
    let rt = runtime(RuntimeConfig::default());
    let lib = Arc::new(rt.bind(symbols(), &interface(), LibraryOptions::default().synchronized()));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let lib = Arc::clone(&lib);
            std::thread::spawn(move || {
                let mut sum = 0i64;
                for i in 0..50 {
                    if let Value::Int(v) = lib.invoke("add", &[Value::Int(t), Value::Int(i)]).unwrap() {
                        sum += v as i64;
                    }
                }
                sum
            })
        })
        .collect();
    let total: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // sum over t of (50 t + 1225)
    assert_eq!(total, 50 * 6 + 4 * 1225);
}

#[test]
fn test_save_error_option() {
    let rt = runtime(RuntimeConfig::default());
    let decl = InterfaceDecl::new().function(int_binop("add"));

    let saving = rt.bind(symbols(), &decl, LibraryOptions::default().save_error(true).no_stubs());
    let sig = saving.function("add").unwrap().signature().cloned().unwrap();
    assert!(sig.save_error);

    let plain = rt.bind(symbols(), &decl, LibraryOptions::default());
    let sig = plain.function("add").unwrap().signature().cloned().unwrap();
    assert!(!sig.save_error);
}

#[test]
fn test_variables() {
    let rt = runtime(RuntimeConfig::default());
    let decl = InterfaceDecl::new()
        .variable(VariableDecl::new("counter", LogicalType::Int))
        .variable(VariableDecl::new("total", LogicalType::Long))
        .variable(VariableDecl::new("absent", LogicalType::Int))
        .variable(VariableDecl::new("buffer", LogicalType::Array(ElementType::Int)));
    let lib = rt.bind(symbols(), &decl, LibraryOptions::default());

    let counter = lib.variable("counter").unwrap();
    assert_eq!(counter.native_type(), NativeType::SInt);
    assert_eq!(counter.get().unwrap(), Value::Int(7));
    counter.set(&Value::Int(-12)).unwrap();
    assert_eq!(COUNTER.load(Ordering::SeqCst), -12);
    assert_eq!(counter.get().unwrap(), Value::Int(-12));

    let total = lib.variable("total").unwrap();
    total.set(&Value::Long(1 << 40)).unwrap();
    assert_eq!(TOTAL.load(Ordering::SeqCst), 1 << 40);
    assert!(matches!(total.set(&Value::Double(1.0)), Err(BindError::TypeMismatch { .. })));

    let absent = lib.variable("absent").unwrap();
    assert_eq!(absent.get().unwrap_err(), BindError::SymbolNotFound("absent".into()));

    let buffer = lib.variable("buffer").unwrap();
    assert!(matches!(buffer.get(), Err(BindError::UnsupportedType(_))));
    assert!(lib.variable("other").is_none());
}

#[cfg(target_endian = "little")]
#[test]
fn test_narrow_variable_write_is_exact() {
    static PACKED: [AtomicI32; 2] = [AtomicI32::new(0), AtomicI32::new(0x7777_7777)];
    let rt = runtime(RuntimeConfig::default());
    let table = Arc::new(SymbolTable::new().with("flag", PACKED[0].as_ptr() as usize));
    let decl = InterfaceDecl::new().variable(VariableDecl::new("flag", LogicalType::Short));
    let lib = rt.bind(table, &decl, LibraryOptions::default());

    let flag = lib.variable("flag").unwrap();
    flag.set(&Value::Short(-1)).unwrap();
    assert_eq!(flag.get().unwrap(), Value::Short(-1));
    // Only the low two bytes changed
    assert_eq!(PACKED[0].load(Ordering::SeqCst) as u32 & 0xFFFF, 0xFFFF);
    assert_eq!(PACKED[1].load(Ordering::SeqCst), 0x7777_7777);
}

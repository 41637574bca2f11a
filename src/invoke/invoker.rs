//! Invokers - the callable unit bound to one native function
//!
//! Design: Every call follows the same sequence: check arity, convert and
//! marshal arguments, call, capture the native error (when requested) before
//! anything else can clobber it, copy by-reference buffers back, and convert
//! the result. Only the middle step differs between strategies.

use super::fast;
use super::ffi::{ArgSlot, CallInterface};
use super::last_error;
use super::signature::{ParamKind, ParameterType, Signature};
use super::strategy::Strategy;
use crate::compiler::{InstalledStub, PageBlock, StubEntry};
use crate::convert::EnumMapper;
use crate::error::{BindError, Result};
use crate::logging::log_native_call;
use crate::marshal::{
    self, marshal_array, marshal_struct, unmarshal_array, unmarshal_struct, Direction,
    NativeBuffer,
};
use crate::runtime::counters;
use crate::types::{ArrayValue, LogicalType, NativeType, StructValue, Value};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

enum CallPath {
    Stub {
        entry: StubEntry,
        _block: Arc<PageBlock>,
    },
    FastInt,
    FastLong,
    Numeric(CallInterface),
    /// Interface is built per call for variadic functions
    Buffer(Option<CallInterface>),
}

struct Bound {
    sig: Arc<Signature>,
    function: usize,
    strategy: Strategy,
    path: CallPath,
}

/// Callable entry point for one native function
pub struct Invoker {
    name: Arc<str>,
    bound: std::result::Result<Bound, BindError>,
    lock: Option<Arc<Mutex<()>>>,
}

impl Invoker {
    /// Invoker for a non-stub strategy
    pub fn build(
        sig: Arc<Signature>,
        function: usize,
        strategy: Strategy,
        lock: Option<Arc<Mutex<()>>>,
    ) -> Result<Self> {
        let natives: Vec<NativeType> = sig.params.iter().map(|p| p.native).collect();
        let path = match strategy {
            Strategy::X86Stub => {
                return Err(BindError::UnsupportedSignature(format!(
                    "{} needs an installed stub",
                    sig.describe()
                )))
            }
            Strategy::FastInt => CallPath::FastInt,
            Strategy::FastLong => CallPath::FastLong,
            Strategy::FastNumeric => CallPath::Numeric(CallInterface::new(
                &natives,
                sig.result.native,
                sig.convention,
                sig.model,
            )?),
            Strategy::Buffer if sig.variadic => CallPath::Buffer(None),
            Strategy::Buffer => CallPath::Buffer(Some(CallInterface::new(
                &natives,
                sig.result.native,
                sig.convention,
                sig.model,
            )?)),
        };
        counters().invoker_built(strategy);
        Ok(Self {
            name: Arc::clone(&sig.name),
            bound: Ok(Bound {
                sig,
                function,
                strategy,
                path,
            }),
            lock,
        })
    }

    /// Invoker calling through an installed stub
    pub fn with_stub(
        sig: Arc<Signature>,
        function: usize,
        stub: &InstalledStub,
        block: Arc<PageBlock>,
        lock: Option<Arc<Mutex<()>>>,
    ) -> Self {
        counters().invoker_built(Strategy::X86Stub);
        // SAFETY: the block is sealed and kept alive by this invoker
        let entry = unsafe { stub.entry() };
        Self {
            name: Arc::clone(&sig.name),
            bound: Ok(Bound {
                sig,
                function,
                strategy: Strategy::X86Stub,
                path: CallPath::Stub {
                    entry,
                    _block: block,
                },
            }),
            lock,
        }
    }

    /// Entry point that fails every call with a construction error
    pub fn failing(name: Arc<str>, error: BindError) -> Self {
        counters().invoker_failed();
        Self {
            name,
            bound: Err(error),
            lock: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.bound.as_ref().ok().map(|b| b.strategy)
    }

    pub fn signature(&self) -> Option<&Arc<Signature>> {
        self.bound.as_ref().ok().map(|b| &b.sig)
    }

    /// Recorded construction error of a failing entry point
    pub fn error(&self) -> Option<&BindError> {
        self.bound.as_ref().err()
    }

    /// Native address being called
    pub fn address(&self) -> Option<usize> {
        self.bound.as_ref().ok().map(|b| b.function)
    }

    /// Entry point of the generated stub, for stub-strategy invokers
    pub fn stub_address(&self) -> Option<usize> {
        match &self.bound.as_ref().ok()?.path {
            CallPath::Stub { entry, .. } => Some(*entry as usize),
            _ => None,
        }
    }

    /// Call the native function
    pub fn invoke(&self, args: &[Value]) -> Result<Value> {
        let bound = self.bound.as_ref().map_err(Clone::clone)?;
        let sig = &*bound.sig;
        let fixed = sig.params.len();
        if args.len() < fixed || (!sig.variadic && args.len() != fixed) {
            return Err(BindError::ArgCountMismatch {
                expected: fixed,
                found: args.len(),
            });
        }

        let _guard = self.lock.as_ref().map(|l| l.lock());
        log_native_call(&self.name, args.len());

        let function = bound.function;
        // SAFETY: the strategy predicates matched each path to the signature
        match &bound.path {
            CallPath::Buffer(interface) => invoke_buffered(sig, function, interface.as_ref(), args),
            CallPath::Stub { entry, .. } => invoke_scalar(sig, args, |regs| unsafe { entry(regs.as_ptr()) }),
            CallPath::FastInt => invoke_scalar(sig, args, |regs| unsafe { fast::call_int(function, regs) }),
            CallPath::FastLong => invoke_scalar(sig, args, |regs| unsafe { fast::call_long(function, regs) }),
            CallPath::Numeric(interface) => invoke_scalar(sig, args, |regs| {
                let mut slots: SmallVec<[ArgSlot; 8]> = regs
                    .iter()
                    .zip(&sig.params)
                    .map(|(r, p)| ArgSlot::from_register(*r, p.native, sig.model))
                    .collect();
                unsafe { interface.call(function, &mut slots) }
            }),
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.bound {
            Ok(b) => f
                .debug_struct("Invoker")
                .field("signature", &b.sig.describe())
                .field("strategy", &b.strategy)
                .finish(),
            Err(e) => f
                .debug_struct("Invoker")
                .field("name", &self.name)
                .field("error", e)
                .finish(),
        }
    }
}

fn invoke_scalar(sig: &Signature, args: &[Value], call: impl FnOnce(&[u64]) -> u64) -> Result<Value> {
    let mut regs: SmallVec<[u64; 8]> = SmallVec::with_capacity(args.len());
    for (param, value) in sig.params.iter().zip(args) {
        regs.push(param.register_image(value, sig.model)?);
    }

    let raw = call(&regs);
    if sig.save_error {
        last_error::capture();
    }

    sig.result.to_value(raw, sig.model)
}

fn invoke_buffered(
    sig: &Signature,
    function: usize,
    interface: Option<&CallInterface>,
    args: &[Value],
) -> Result<Value> {
    let fixed = sig.params.len();
    let mut frame = Frame::with_capacity(args.len());
    for (param, value) in sig.params.iter().zip(args) {
        frame.push_param(param, value, sig)?;
    }

    let per_call;
    let interface = match interface {
        Some(interface) => interface,
        None => {
            for value in &args[fixed..] {
                frame.push_variadic(value, sig)?;
            }
            per_call = CallInterface::variadic(&frame.natives, fixed, sig.result.native, sig.model)?;
            &per_call
        }
    };

    // SAFETY: slots point at buffers owned by the frame for the whole call
    let raw = unsafe { interface.call(function, &mut frame.slots) };
    if sig.save_error {
        last_error::capture();
    }

    frame.copy_back();
    sig.result.to_value(raw, sig.model)
}

/// Buffer to copy back into its managed owner after the call
enum BackRef {
    Array(ArrayValue),
    Struct(StructValue),
}

struct Pending {
    buffer: NativeBuffer,
    owner: BackRef,
    direction: Direction,
}

/// Marshalled arguments of one buffered call
struct Frame {
    slots: SmallVec<[ArgSlot; 8]>,
    natives: SmallVec<[NativeType; 8]>,
    pending: SmallVec<[Pending; 2]>,
}

impl Frame {
    fn with_capacity(n: usize) -> Self {
        Self {
            slots: SmallVec::with_capacity(n),
            natives: SmallVec::with_capacity(n),
            pending: SmallVec::new(),
        }
    }

    fn push_word(&mut self, native: NativeType, raw: u64, sig: &Signature) {
        self.slots.push(ArgSlot::from_register(raw, native, sig.model));
        self.natives.push(native);
    }

    fn push_buffer(&mut self, buffer: NativeBuffer, owner: BackRef, direction: Direction, sig: &Signature) {
        self.push_word(NativeType::Address, buffer.address() as u64, sig);
        self.pending.push(Pending {
            buffer,
            owner,
            direction,
        });
    }

    fn push_param(&mut self, param: &ParameterType, value: &Value, sig: &Signature) -> Result<()> {
        match &param.kind {
            ParamKind::Integer | ParamKind::Float32 | ParamKind::Float64 => {
                let raw = param.register_image(value, sig.model)?;
                self.push_word(param.native, raw, sig);
            }
            ParamKind::Array { element, direction } => match &*param.converted(value)? {
                Value::Null => self.push_word(NativeType::Address, 0, sig),
                Value::Array(array) if array.element_type() == *element => {
                    let buffer = marshal_array(array, *direction);
                    self.push_buffer(buffer, BackRef::Array(array.clone()), *direction, sig);
                }
                other => return Err(BindError::mismatch(param.carrier.to_string(), other.kind_name())),
            },
            ParamKind::Struct { direction } => match &*param.converted(value)? {
                Value::Null => self.push_word(NativeType::Address, 0, sig),
                Value::Struct(s) => {
                    let buffer = marshal_struct(s, *direction);
                    self.push_buffer(buffer, BackRef::Struct(s.clone()), *direction, sig);
                }
                other => return Err(BindError::mismatch(param.carrier.to_string(), other.kind_name())),
            },
            ParamKind::Callback(site) => {
                let address = match &*param.converted(value)? {
                    Value::Callback(callable) => site.pointer(callable)?,
                    // Already a native closure pointer
                    Value::Address(address) => *address,
                    Value::Null => 0,
                    other => return Err(BindError::mismatch("callback", other.kind_name())),
                };
                self.push_word(NativeType::Address, address as u64, sig);
            }
        }
        Ok(())
    }

    /// Trailing argument with C default promotions applied
    fn push_variadic(&mut self, value: &Value, sig: &Signature) -> Result<()> {
        let model = sig.model;
        match value {
            Value::Bool(_) | Value::Byte(_) | Value::Short(_) | Value::Char(_) | Value::Int(_) => {
                let raw = marshal::to_native(value, &LogicalType::Int, NativeType::SInt, model)?;
                self.push_word(NativeType::SInt, raw, sig);
            }
            Value::Long(v) => self.push_word(NativeType::SLongLong, *v as u64, sig),
            Value::Float(_) | Value::Double(_) => {
                let raw = marshal::to_native(value, &LogicalType::Double, NativeType::Double, model)?;
                self.push_word(NativeType::Double, raw, sig);
            }
            Value::Address(a) => self.push_word(NativeType::Address, *a as u64, sig),
            Value::Null => self.push_word(NativeType::Address, 0, sig),
            Value::Enum(constant) => {
                let v = EnumMapper::get_instance(&constant.ty).int_value(constant)?;
                self.push_word(NativeType::SInt, v as i64 as u64, sig);
            }
            Value::Text(text) => {
                let bytes = sig.default_encoding.encode(text)?;
                let array = ArrayValue::bytes(bytes.into_iter().map(|b| b as i8).collect());
                let direction = Direction {
                    copy_in: true,
                    copy_out: false,
                    nul_terminate: false,
                };
                let buffer = marshal_array(&array, direction);
                self.push_buffer(buffer, BackRef::Array(array), direction, sig);
            }
            Value::Array(array) => {
                let buffer = marshal_array(array, Direction::IN_OUT);
                self.push_buffer(buffer, BackRef::Array(array.clone()), Direction::IN_OUT, sig);
            }
            Value::Struct(s) => {
                let buffer = marshal_struct(s, Direction::IN_OUT);
                self.push_buffer(buffer, BackRef::Struct(s.clone()), Direction::IN_OUT, sig);
            }
            other => return Err(BindError::mismatch("variadic argument", other.kind_name())),
        }
        Ok(())
    }

    fn copy_back(&self) {
        for pending in &self.pending {
            match &pending.owner {
                BackRef::Array(array) => unmarshal_array(array, &pending.buffer, pending.direction),
                BackRef::Struct(s) => unmarshal_struct(s, &pending.buffer, pending.direction),
            }
        }
    }
}

//! Invocation - signatures, strategy selection and call paths
//!
//! Design: A declared function is resolved into an immutable `Signature`,
//! then strategies are tried in fixed priority order:
//! 1. x86-64 stub (generated machine code, scalars in registers)
//! 2. Fixed-arity fast paths (all-narrow-int, all-64-bit)
//! 3. Prepared libffi call for converter-free scalar signatures
//! 4. Generic buffer path (arrays, structs, callbacks, converters, variadics)
//!
//! Selection is a plain ordered list of predicates so the order can be
//! audited and tested without generating any code.
//!
//! Architecture:
//! - `decl.rs` - Function, variable and interface declarations
//! - `signature.rs` - Resolved parameter/result descriptors
//! - `strategy.rs` - Strategy predicates and selection
//! - `ffi.rs` - libffi call interfaces and argument slots
//! - `fast.rs` - Direct fixed-arity integer calls
//! - `invoker.rs` - Invokers and per-call marshalling
//! - `last_error.rs` - Saved native error per thread

mod decl;
mod fast;
mod ffi;
mod invoker;
mod last_error;
mod signature;
mod strategy;

pub use decl::{FunctionDecl, InterfaceDecl, ParamDecl, ResultDecl, VariableDecl};
pub use ffi::{ffi_type_of, ArgSlot, CallInterface};
pub use invoker::Invoker;
pub use last_error::{last_error, set_last_error};
pub use signature::{ParamKind, ParameterType, ResultType, Signature, SignatureContext};
pub use strategy::{select, select_from, Strategy, StrategyEnv, MAX_FAST_ARITY};

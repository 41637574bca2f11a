//! dynbind - dynamic foreign-call binding engine
//!
//! Turns declarative native signatures into callable entry points, picking
//! per signature the cheapest call path that can express it, and exposes
//! managed callables to native code as function pointers.

pub mod closure;
pub mod compiler;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod library;
pub mod logging;
pub mod marshal;
pub mod runtime;
pub mod types;

// Re-export core types
pub use closure::{callable, Callable, CallableId, ClosureManager, Reclaimer};
pub use config::RuntimeConfig;
pub use dispatch::{LibraryBinding, LibraryOptions, NativeVariable};
pub use error::{BindError, Result};
pub use invoke::{last_error, set_last_error, FunctionDecl, InterfaceDecl, Invoker, Strategy, VariableDecl};
pub use library::{Library, SymbolLookup, SymbolTable};
pub use runtime::{stats, Runtime, RuntimeStats};
pub use types::{Annotation, AnnotationSet, CallingConvention, LogicalType, Value};

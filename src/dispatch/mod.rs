//! Dispatch - binding libraries and caching their invokers
//!
//! Design: A `LibraryBinder` resolves each declaration in isolation and
//! publishes the resulting invoker in a `DispatchCache` keyed by the
//! declared name. Lookups are lock-free reads; the first writer of a name
//! wins and later writers adopt its invoker.
//!
//! Architecture:
//! - `cache.rs` - First-writer-wins invoker cache
//! - `binding.rs` - Library options, name mapping, binder and binding
//! - `variable.rs` - Native global variable accessors

mod binding;
mod cache;
mod variable;

pub use binding::{FunctionMapper, IdentityMapper, LibraryBinder, LibraryBinding, LibraryOptions};
pub use cache::DispatchCache;
pub use variable::NativeVariable;

#[cfg(test)]
mod tests;

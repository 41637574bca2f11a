//! Closures - managed callables exposed as native function pointers
//!
//! Design: Trampolines are allocated in bulk ("magazines"), one page block
//! at a time, and recycled through a free list:
//! 1. Call-site cache (last callable seen at that parameter)
//! 2. Identity registry (weak callable -> slot, one slot per live callable)
//! 3. Free list of reclaimed slots
//! 4. Current magazine; replaced under a lock only when exhausted
//!
//! Reclamation is driven from outside: the host tells a factory that a
//! callable is unreachable (eagerly, through a queued `Reclaimer`, or by a
//! periodic `reclaim` sweep). Timing is never assumed.
//!
//! Architecture:
//! - `shape.rs` - Argument/result marshalling for one callback type
//! - `magazine.rs` - Page-backed slot batches and the native entry point
//! - `factory.rs` - Registry, free list and reclamation
//! - `manager.rs` - Factories per callback type
//! - `site.rs` - Single-entry call-site cache

mod factory;
mod magazine;
mod manager;
mod shape;
mod site;

pub use factory::{CallableId, ClosureFactory, FactoryStats, Reclaimer};
pub use magazine::{slot_stride, ClosureSlot, Magazine};
pub use manager::ClosureManager;
pub use shape::ClosureShape;
pub use site::ClosureSite;

use crate::error::Result;
use crate::types::Value;
use std::sync::Arc;

/// Managed code invoked from a native closure
pub trait Callable: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value>;
}

impl<F> Callable for F
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    #[inline]
    fn call(&self, args: &[Value]) -> Result<Value> {
        self(args)
    }
}

/// Share a closure as a `Callable`
pub fn callable<F>(f: F) -> Arc<dyn Callable>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

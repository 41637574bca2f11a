//! Per-call-site closure cache

use super::factory::ClosureFactory;
use super::magazine::{same_callable, ClosureSlot};
use super::Callable;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct LastResolved {
    callable: Weak<dyn Callable>,
    slot: Arc<ClosureSlot>,
}

/// Remembers the last callable passed at one parameter position
///
/// Passing the same callback on consecutive calls skips the registry.
/// The cached slot is revalidated on every hit, so a slot recycled for
/// another callable is never returned.
pub struct ClosureSite {
    factory: Arc<ClosureFactory>,
    last: Mutex<Option<LastResolved>>,
}

impl ClosureSite {
    pub fn new(factory: Arc<ClosureFactory>) -> Self {
        Self {
            factory,
            last: Mutex::new(None),
        }
    }

    pub fn factory(&self) -> &Arc<ClosureFactory> {
        &self.factory
    }

    /// Native pointer for `callable`
    pub fn pointer(&self, callable: &Arc<dyn Callable>) -> Result<usize> {
        if let Some(last) = &*self.last.lock() {
            if same_callable(&last.callable, callable) && last.slot.is_bound_to(callable) {
                return Ok(last.slot.code());
            }
        }

        let slot = self.factory.get_or_create_slot(callable)?;
        let code = slot.code();
        *self.last.lock() = Some(LastResolved {
            callable: Arc::downgrade(callable),
            slot,
        });
        Ok(code)
    }
}

impl std::fmt::Debug for ClosureSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureSite").finish_non_exhaustive()
    }
}
